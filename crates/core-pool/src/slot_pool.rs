//! Bounded pool for a single partition
//!
//! A [`SlotPool`] couples a [`PermitGate`] (capacity = `max_size`) to an idle
//! list and a checked-out set:
//!
//! - the permit is always acquired before the pool lock;
//! - a permit travels with a leased resource and comes back when the
//!   resource returns to the idle list or is destroyed;
//! - returns push to the back of the idle list and reuse pops from the back
//!   (LIFO), while idle eviction scans from the front (oldest return first).
//!
//! Factory `create`, `cleanup` and `destroy` calls run outside the pool lock.

use crate::background::{BackgroundServices, Sweepable};
use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::factory::{PoolFactory, ResourceFactory, Validation};
use crate::lease::{Lease, LeaseState};
use crate::partition::{PartitionKey, PoolKey};
use crate::semaphore::PermitGate;
use crate::stats::{PoolCounters, PoolStats};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Floor for the idle reaper's sweep interval
const MIN_REAP_INTERVAL: Duration = Duration::from_millis(10);

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// Callback invoked after idle eviction, letting a router reclaim the pool
pub type EmptyListener<F> = Box<dyn Fn(&Arc<SlotPool<F>>) + Send + Sync>;

/// Partition key plus the identity used when the pool creates resources on
/// its own (prefill and fill-to-minimum)
pub struct PoolContext<F: ResourceFactory> {
    /// Key the pool is registered under
    pub key: PoolKey<F>,
    /// Principal for resources created without a caller
    pub principal: Option<F::Principal>,
    /// Criteria for resources created without a caller
    pub criteria: F::Criteria,
}

impl<F: ResourceFactory> PoolContext<F> {
    /// Context for a standalone pool that is not part of a router
    pub fn unpartitioned(principal: Option<F::Principal>, criteria: F::Criteria) -> Self {
        Self {
            key: PartitionKey::unpartitioned(),
            principal,
            criteria,
        }
    }
}

/// Idle list, checked-out set and shutdown flag, guarded by the pool lock
struct PoolState<F: ResourceFactory> {
    idle: VecDeque<Lease<F>>,
    checked_out: HashMap<u64, Lease<F>>,
    /// Factory creations in flight, from `lease` or fill-to-minimum
    creating: usize,
    /// Idle resources taken out for background validation
    validating: usize,
    shutdown: bool,
}

impl<F: ResourceFactory> PoolState<F> {
    /// Resources counted against `max_size`, including ones not yet (or
    /// momentarily no longer) in the idle list or checked-out set
    fn outstanding(&self) -> usize {
        self.idle.len() + self.checked_out.len() + self.creating + self.validating
    }
}

/// Resources pulled out of pool accounting, waiting for the factory
type Doomed<R> = Vec<(u64, R)>;

/// The bounded pool for one partition key
pub struct SlotPool<F: ResourceFactory> {
    id: u64,
    context: PoolContext<F>,
    config: PoolConfig,
    factory: Arc<PoolFactory<F>>,
    services: BackgroundServices,
    permits: PermitGate,
    state: Mutex<PoolState<F>>,
    counters: PoolCounters,
    next_lease_id: AtomicU64,
    first_lease_seen: AtomicBool,
    fill_running: AtomicBool,
    empty_listener: Option<EmptyListener<F>>,
    me: Weak<SlotPool<F>>,
}

impl<F: ResourceFactory> SlotPool<F> {
    /// Create a standalone pool
    ///
    /// Fails with [`PoolError::InvalidConfig`] when `config` does not
    /// validate. The pool does nothing in the background until
    /// [`SlotPool::start`].
    pub fn new(
        context: PoolContext<F>,
        config: PoolConfig,
        factory: Arc<PoolFactory<F>>,
        services: BackgroundServices,
    ) -> Result<Arc<Self>, PoolError> {
        config.validate().map_err(PoolError::InvalidConfig)?;
        Ok(Self::build(context, config, factory, services, None))
    }

    /// Router-owned pool; the router validated `config` already
    pub(crate) fn with_empty_listener(
        context: PoolContext<F>,
        config: PoolConfig,
        factory: Arc<PoolFactory<F>>,
        services: BackgroundServices,
        listener: EmptyListener<F>,
    ) -> Arc<Self> {
        Self::build(context, config, factory, services, Some(listener))
    }

    fn build(
        context: PoolContext<F>,
        config: PoolConfig,
        factory: Arc<PoolFactory<F>>,
        services: BackgroundServices,
        empty_listener: Option<EmptyListener<F>>,
    ) -> Arc<Self> {
        let permits = PermitGate::new(config.max_size);
        Arc::new_cyclic(|me| Self {
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            context,
            config,
            factory,
            services,
            permits,
            state: Mutex::new(PoolState {
                idle: VecDeque::new(),
                checked_out: HashMap::new(),
                creating: 0,
                validating: 0,
                shutdown: false,
            }),
            counters: PoolCounters::default(),
            next_lease_id: AtomicU64::new(1),
            first_lease_seen: AtomicBool::new(false),
            fill_running: AtomicBool::new(false),
            empty_listener,
            me: me.clone(),
        })
    }

    /// Register with the background services and prefill if configured
    pub fn start(&self) {
        let target: Weak<dyn Sweepable> = self.me.clone();

        if let Some(idle_timeout) = self.config.idle_timeout() {
            let interval = (idle_timeout / 2).max(MIN_REAP_INTERVAL);
            self.services
                .idle_reaper()
                .register(self.id, target.clone(), interval);
        }

        if let Some(interval) = self.config.background_validation_interval() {
            if self.factory.supports_validation() {
                self.services
                    .background_validator()
                    .register(self.id, target, interval);
            } else {
                warn!(
                    pool = self.id,
                    "Background validation requested but the factory cannot validate; skipping"
                );
            }
        }

        if self.config.prefill {
            self.trigger_fill();
        }
    }

    /// Lease a resource for the given identity and criteria
    ///
    /// Waits at most `blocking_timeout` for a permit. Idle resources are
    /// tried most-recently-returned first; anything that fails to match is
    /// destroyed. When nothing matches a new resource is created.
    pub fn lease(
        &self,
        principal: Option<&F::Principal>,
        criteria: &F::Criteria,
    ) -> Result<Lease<F>, PoolError> {
        let timeout = self.config.blocking_timeout();
        let started = Instant::now();
        let permit = self.permits.acquire_timeout(timeout);
        self.counters.record_wait(started.elapsed());

        let Some(permit) = permit else {
            self.counters.record_timeout();
            warn!(pool = self.id, ?timeout, "No permit available within blocking timeout");
            return Err(PoolError::Timeout(timeout));
        };

        let mut doomed = Vec::new();
        let reused = {
            let mut state = self.state.lock();
            if state.shutdown {
                drop(state);
                drop(permit);
                return Err(PoolError::RetryableShutdown);
            }

            let mut found = None;
            while let Some(candidate) = state.idle.pop_back() {
                if self.matches(&candidate, principal, criteria) {
                    found = Some(candidate);
                    break;
                }

                if let Some(resource) = candidate.mark_destroyed() {
                    doomed.push((candidate.id(), resource));
                }
                if self.config.fast_fail {
                    debug!(pool = self.id, "Match failed with fast-fail set; creating instead");
                    break;
                }
            }

            match found {
                Some(lease) => {
                    lease.meta().permit_held = true;
                    state.checked_out.insert(lease.id(), lease.clone());
                    self.counters.record_in_use(state.checked_out.len());
                    Some(lease)
                }
                None => {
                    // A fast-fail abort can leave idle entries behind; make
                    // room so the new resource stays within max_size.
                    if state.outstanding() >= self.config.max_size {
                        if let Some(oldest) = state.idle.pop_front() {
                            if let Some(resource) = oldest.mark_destroyed() {
                                doomed.push((oldest.id(), resource));
                            }
                        }
                    }
                    state.creating += 1;
                    None
                }
            }
        };
        self.destroy_all(doomed);

        if let Some(lease) = reused {
            permit.forget();
            debug!(pool = self.id, lease = lease.id(), "Reused idle resource");
            return Ok(lease);
        }

        let resource = match self.factory.factory().create(principal, criteria) {
            Ok(resource) => resource,
            Err(e) => {
                self.state.lock().creating -= 1;
                drop(permit);
                warn!(pool = self.id, error = %e, "Resource creation failed");
                return Err(PoolError::Creation(e));
            }
        };
        self.counters.record_created();

        let lease = self.wrap(resource);
        lease.meta().permit_held = true;
        {
            let mut state = self.state.lock();
            state.creating -= 1;
            if state.shutdown {
                // Flushed while we were creating; never pool it.
                lease.mark_to_destroy();
            }
            state.checked_out.insert(lease.id(), lease.clone());
            self.counters.record_in_use(state.checked_out.len());
        }
        permit.forget();
        debug!(pool = self.id, lease = lease.id(), "Created resource");

        if !self.first_lease_seen.swap(true, Ordering::AcqRel) {
            self.trigger_fill();
        }

        Ok(lease)
    }

    /// Return a leased resource
    ///
    /// Never fails: a resource that cannot be pooled again is destroyed.
    pub fn release(&self, lease: Lease<F>, force_destroy: bool) {
        if lease.state() == LeaseState::Destroyed {
            if lease.take_permit() {
                self.permits.release();
            }
            return;
        }

        let mut force_destroy = force_destroy;
        if let Some(resource) = lease.resource_slot().as_mut() {
            if let Err(e) = self.factory.factory().cleanup(resource) {
                warn!(pool = self.id, lease = lease.id(), error = %e, "Cleanup failed; destroying resource");
                force_destroy = true;
            }
        }

        let doomed = {
            let mut state = self.state.lock();
            state.checked_out.remove(&lease.id());

            let condemned = force_destroy
                || state.shutdown
                || lease.state() == LeaseState::ToDestroy
                || state.idle.len() >= self.config.max_size;

            if state.idle.iter().any(|idle| idle.same_lease(&lease)) {
                warn!(pool = self.id, lease = lease.id(), "Lease returned twice; ignoring");
                None
            } else if condemned {
                lease.mark_destroyed()
            } else {
                {
                    let mut meta = lease.meta();
                    meta.last_used = Instant::now();
                    meta.transaction = None;
                }
                state.idle.push_back(lease.clone());
                None
            }
        };

        if lease.take_permit() {
            self.permits.release();
        }

        if let Some(resource) = doomed {
            self.destroy_all(vec![(lease.id(), resource)]);
        }
    }

    /// Condemn a resource, e.g. after the caller saw a backend error
    ///
    /// An idle resource is destroyed at once; a leased one when released.
    pub fn invalidate(&self, lease: &Lease<F>) {
        let doomed = {
            let mut state = self.state.lock();
            match state.idle.iter().position(|idle| idle.same_lease(lease)) {
                Some(idx) => state
                    .idle
                    .remove(idx)
                    .and_then(|idle| idle.mark_destroyed())
                    .map(|resource| (lease.id(), resource)),
                None => {
                    lease.mark_to_destroy();
                    None
                }
            }
        };
        self.destroy_all(doomed.into_iter().collect());
    }

    /// Destroy every idle resource and condemn every leased one
    pub fn flush(&self) {
        let doomed: Doomed<F::Resource> = {
            let mut state = self.state.lock();
            for lease in state.checked_out.values() {
                lease.mark_to_destroy();
            }
            state
                .idle
                .drain(..)
                .filter_map(|lease| lease.mark_destroyed().map(|r| (lease.id(), r)))
                .collect()
        };

        if !doomed.is_empty() {
            debug!(pool = self.id, count = doomed.len(), "Flushed idle resources");
        }
        self.destroy_all(doomed);

        if self.config.min_size > 0 {
            self.trigger_fill();
        }
    }

    /// Destroy resources that have been idle longer than `idle_timeout`
    pub fn evict_idle(&self, now: Instant) {
        let Some(idle_timeout) = self.config.idle_timeout() else {
            return;
        };

        let doomed: Doomed<F::Resource> = {
            let mut state = self.state.lock();
            let mut doomed = Vec::new();
            loop {
                let expired = state
                    .idle
                    .front()
                    .is_some_and(|oldest| oldest.is_idle_expired(now, idle_timeout));
                if !expired {
                    break;
                }
                if self.config.strict_min && state.outstanding() <= self.config.min_size {
                    break;
                }
                if let Some(oldest) = state.idle.pop_front() {
                    if let Some(resource) = oldest.mark_destroyed() {
                        doomed.push((oldest.id(), resource));
                    }
                }
            }
            doomed
        };

        if !doomed.is_empty() {
            debug!(pool = self.id, count = doomed.len(), "Evicted idle resources");
        }
        self.destroy_all(doomed);

        if self.config.min_size > 0 {
            self.trigger_fill();
        }

        if let (Some(listener), Some(me)) = (&self.empty_listener, self.me.upgrade()) {
            listener(&me);
        }
    }

    /// Re-check idle resources whose last validation is older than the
    /// configured interval and destroy the ones the factory rejects
    ///
    /// Candidates leave the idle list one at a time while this holds a
    /// permit, so a concurrent lease cannot create past `max_size` in their
    /// place.
    pub fn validate_background(&self) {
        let Validation::Validating(validate) = self.factory.validation() else {
            warn!(pool = self.id, "Factory does not support validation; skipping");
            return;
        };
        let Some(interval) = self.config.background_validation_interval() else {
            return;
        };

        let Some(permit) = self.permits.acquire_timeout(self.config.blocking_timeout()) else {
            warn!(pool = self.id, "No permit for background validation within blocking timeout");
            return;
        };

        let mut seen = HashSet::new();
        let mut rejected = 0usize;
        loop {
            let candidate = {
                let mut state = self.state.lock();
                if state.shutdown {
                    break;
                }
                let now = Instant::now();
                let position = state.idle.iter().position(|lease| {
                    !seen.contains(&lease.id())
                        && now.saturating_duration_since(lease.last_validated()) >= interval
                });
                match position.and_then(|idx| state.idle.remove(idx)) {
                    Some(lease) => {
                        state.validating += 1;
                        lease
                    }
                    None => break,
                }
            };
            seen.insert(candidate.id());

            let invalid = match candidate.resource() {
                Some(resource) => {
                    let batch = [&*resource];
                    !validate(batch.as_slice()).is_empty()
                }
                None => true,
            };

            let lease_id = candidate.id();
            let doomed = {
                let mut state = self.state.lock();
                state.validating -= 1;
                if invalid || state.shutdown || candidate.state() == LeaseState::ToDestroy {
                    candidate.mark_destroyed()
                } else {
                    candidate.meta().last_validated = Instant::now();
                    // Keep the idle list ordered by return time for eviction.
                    let last_used = candidate.last_used();
                    let position = state
                        .idle
                        .iter()
                        .position(|idle| idle.last_used() > last_used)
                        .unwrap_or(state.idle.len());
                    state.idle.insert(position, candidate);
                    None
                }
            };

            if let Some(resource) = doomed {
                rejected += 1;
                self.destroy_all(vec![(lease_id, resource)]);
            }
        }
        drop(permit);

        if rejected == 0 {
            return;
        }

        info!(pool = self.id, count = rejected, "Background validation destroyed stale resources");
        if self.config.min_size > 0 {
            self.trigger_fill();
        }
    }

    /// Create idle resources until `min_size` resources are allocated
    pub fn fill_to_min(&self) {
        let min_size = self.config.min_size;
        if min_size == 0 {
            return;
        }

        loop {
            let Some(permit) = self.permits.acquire_timeout(self.config.blocking_timeout()) else {
                warn!(pool = self.id, "No permit for fill-to-minimum within blocking timeout");
                return;
            };

            {
                let mut state = self.state.lock();
                if state.shutdown || state.outstanding() >= min_size {
                    return;
                }
                state.creating += 1;
            }

            let resource = match self
                .factory
                .factory()
                .create(self.context.principal.as_ref(), &self.context.criteria)
            {
                Ok(resource) => resource,
                Err(e) => {
                    self.state.lock().creating -= 1;
                    warn!(pool = self.id, error = %e, "Fill-to-minimum creation failed");
                    return;
                }
            };
            self.counters.record_created();

            let lease = self.wrap(resource);
            let rejected = {
                let mut state = self.state.lock();
                state.creating -= 1;
                if state.shutdown {
                    lease.mark_destroyed()
                } else {
                    state.idle.push_back(lease.clone());
                    None
                }
            };
            drop(permit);

            if let Some(resource) = rejected {
                self.destroy_all(vec![(lease.id(), resource)]);
                return;
            }
        }
    }

    /// Unregister from the background services, then flush and refuse new
    /// leases
    pub fn shutdown(&self) {
        self.unregister();
        self.close();
    }

    /// Like [`SlotPool::shutdown`], but completes a fill-to-minimum first
    pub fn shutdown_drain(&self) {
        self.unregister();
        self.fill_to_min();
        self.close();
    }

    fn close(&self) {
        self.state.lock().shutdown = true;
        info!(pool = self.id, "Pool shut down");
        self.flush();
    }

    fn unregister(&self) {
        self.services.idle_reaper().unregister(self.id);
        self.services.background_validator().unregister(self.id);
    }

    /// Get current pool statistics
    pub fn stats(&self) -> PoolStats {
        let (idle, in_use) = {
            let state = self.state.lock();
            (state.idle.len() as u64, state.checked_out.len() as u64)
        };

        PoolStats {
            available: self.permits.available() as u64,
            in_use,
            idle,
            max_in_use: self.counters.max_used(),
            max_size: self.config.max_size as u64,
            created: self.counters.created(),
            destroyed: self.counters.destroyed(),
            timed_out: self.counters.timed_out(),
            total_block_time_ms: self.counters.total_block_time_ms(),
            max_wait_time_ms: self.counters.max_wait_time_ms(),
        }
    }

    /// Process-unique pool identifier
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Partition key this pool serves
    pub fn key(&self) -> &PoolKey<F> {
        &self.context.key
    }

    /// Pool configuration
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Number of idle resources
    pub fn idle_count(&self) -> usize {
        self.state.lock().idle.len()
    }

    /// Number of leased resources
    pub fn in_use_count(&self) -> usize {
        self.state.lock().checked_out.len()
    }

    /// Whether the pool currently holds no resources at all
    pub fn is_empty(&self) -> bool {
        self.state.lock().outstanding() == 0
    }

    /// Whether the pool has been shut down
    pub fn is_shutdown(&self) -> bool {
        self.state.lock().shutdown
    }

    fn wrap(&self, resource: F::Resource) -> Lease<F> {
        let id = self.next_lease_id.fetch_add(1, Ordering::Relaxed);
        Lease::new(id, self.id, self.me.clone(), resource, Instant::now())
    }

    fn matches(
        &self,
        candidate: &Lease<F>,
        principal: Option<&F::Principal>,
        criteria: &F::Criteria,
    ) -> bool {
        let Some(resource) = candidate.resource() else {
            return false;
        };

        match self.factory.factory().matches(&resource, principal, criteria) {
            Ok(true) => true,
            Ok(false) => {
                debug!(pool = self.id, lease = candidate.id(), "Idle resource did not match");
                false
            }
            Err(e) => {
                warn!(pool = self.id, lease = candidate.id(), error = %e, "Match check failed");
                false
            }
        }
    }

    fn destroy_all(&self, doomed: Doomed<F::Resource>) {
        if doomed.is_empty() {
            return;
        }

        self.counters.record_destroyed(doomed.len() as u64);
        for (lease_id, resource) in doomed {
            if let Err(e) = self.factory.factory().destroy(resource) {
                warn!(pool = self.id, lease = lease_id, error = %e, "Destroy failed");
            }
        }
    }

    fn trigger_fill(&self) {
        if self.config.min_size == 0 || self.fill_running.swap(true, Ordering::AcqRel) {
            return;
        }

        let Some(pool) = self.me.upgrade() else {
            self.fill_running.store(false, Ordering::Release);
            return;
        };

        let spawned = thread::Builder::new()
            .name(format!("slotpool-fill-{}", self.id))
            .spawn(move || {
                pool.fill_to_min();
                pool.fill_running.store(false, Ordering::Release);
            });

        if let Err(e) = spawned {
            self.fill_running.store(false, Ordering::Release);
            warn!(pool = self.id, error = %e, "Could not spawn fill-to-minimum thread");
        }
    }
}

impl<F: ResourceFactory> Sweepable for SlotPool<F> {
    fn sweep_id(&self) -> u64 {
        self.id
    }

    fn evict_idle(&self, now: Instant) {
        SlotPool::evict_idle(self, now);
    }

    fn validate_background(&self) {
        SlotPool::validate_background(self);
    }
}

impl<F: ResourceFactory> fmt::Debug for SlotPool<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotPool")
            .field("id", &self.id)
            .field("key", &self.context.key)
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish()
    }
}
