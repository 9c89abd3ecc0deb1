//! Partitioned router
//!
//! Maps every request onto the [`SlotPool`] of its partition and keeps
//! transaction affinity: while a transaction is active, every request it
//! makes against one partition gets the same [`Lease`].
//!
//! ```text
//!  lease_for(tx, principal, criteria)
//!        │
//!        ▼
//!  PartitionKey ──► DashMap<PartitionKey, Arc<SlotPool>> ──► SlotPool::lease
//!        │
//!        └─ tx? ──► DashMap<TransactionId, Arc<Mutex<bindings>>>
//! ```

use crate::background::BackgroundServices;
use crate::config::{PoolConfig, RouterConfig};
use crate::error::PoolError;
use crate::factory::{PoolFactory, ResourceFactory};
use crate::lease::{Lease, LeaseState};
use crate::partition::{PartitionKey, PoolKey, TransactionId};
use crate::slot_pool::{PoolContext, SlotPool};
use crate::stats::PoolStats;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

/// Leases bound to one transaction, keyed by pool id
struct TxBindings<F: ResourceFactory> {
    completed: bool,
    leases: HashMap<u64, Lease<F>>,
}

impl<F: ResourceFactory> Default for TxBindings<F> {
    fn default() -> Self {
        Self {
            completed: false,
            leases: HashMap::new(),
        }
    }
}

type TxCell<F> = Arc<Mutex<TxBindings<F>>>;

/// Routes requests to per-partition pools
pub struct PartitionedRouter<F: ResourceFactory> {
    config: RouterConfig,
    pool_config: PoolConfig,
    factory: Arc<PoolFactory<F>>,
    services: BackgroundServices,
    pools: DashMap<PoolKey<F>, Arc<SlotPool<F>>>,
    transactions: DashMap<TransactionId, TxCell<F>>,
    closed: AtomicBool,
    me: Weak<PartitionedRouter<F>>,
}

impl<F: ResourceFactory> PartitionedRouter<F> {
    /// Create a router; pools are created lazily on first use
    ///
    /// `pool_config` is validated once here, since every partition pool is
    /// built from it.
    pub fn new(
        config: RouterConfig,
        pool_config: PoolConfig,
        factory: Arc<PoolFactory<F>>,
        services: BackgroundServices,
    ) -> Result<Arc<Self>, PoolError> {
        pool_config.validate().map_err(PoolError::InvalidConfig)?;

        Ok(Arc::new_cyclic(|me| Self {
            config,
            pool_config,
            factory,
            services,
            pools: DashMap::new(),
            transactions: DashMap::new(),
            closed: AtomicBool::new(false),
            me: me.clone(),
        }))
    }

    /// Lease a resource for a request, optionally inside a transaction
    pub fn lease_for(
        &self,
        tx: Option<TransactionId>,
        principal: Option<&F::Principal>,
        criteria: &F::Criteria,
    ) -> Result<Lease<F>, PoolError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(PoolError::Closed);
        }

        let key = self.partition_key(tx, principal, criteria);

        match tx {
            Some(tx) if self.config.track_by_transaction => {
                self.lease_in_transaction(tx, &key, principal, criteria)
            }
            _ => self.lease_with_retry(&key, principal, criteria),
        }
    }

    /// Return a lease to its pool, clearing any transaction binding
    pub fn release(&self, lease: Lease<F>, force_destroy: bool) {
        let tx = lease.meta().transaction.take();
        if let Some(tx) = tx {
            let cell = self.transactions.get(&tx).map(|entry| entry.value().clone());
            if let Some(cell) = cell {
                let mut bindings = cell.lock();
                let bound = bindings
                    .leases
                    .get(&lease.pool_id())
                    .is_some_and(|bound| bound.same_lease(&lease));
                if bound {
                    bindings.leases.remove(&lease.pool_id());
                }
            }
        }

        self.release_to_pool(lease, force_destroy);
    }

    /// End a transaction, returning every lease still bound to it
    ///
    /// Returns how many leases were released. Callers must not release those
    /// leases again themselves.
    pub fn complete_transaction(&self, tx: TransactionId) -> usize {
        let Some((_, cell)) = self.transactions.remove(&tx) else {
            return 0;
        };

        let leases: Vec<Lease<F>> = {
            let mut bindings = cell.lock();
            bindings.completed = true;
            bindings.leases.drain().map(|(_, lease)| lease).collect()
        };

        let count = leases.len();
        for lease in leases {
            lease.meta().transaction = None;
            self.release_to_pool(lease, false);
        }

        debug!(%tx, released = count, "Transaction completed");
        count
    }

    /// Statistics summed across every registered pool
    pub fn stats(&self) -> PoolStats {
        let stats: Vec<PoolStats> = self.pools().iter().map(|pool| pool.stats()).collect();
        stats.iter().sum()
    }

    /// Statistics of every registered pool, keyed by partition
    pub fn partition_stats(&self) -> Vec<(PoolKey<F>, PoolStats)> {
        self.pools()
            .into_iter()
            .map(|pool| (pool.key().clone(), pool.stats()))
            .collect()
    }

    /// Flush every pool
    pub fn flush(&self) {
        for pool in self.pools() {
            pool.flush();
        }
    }

    /// Shut down every pool and refuse further leases
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);

        let pools = self.pools();
        self.pools.clear();
        for pool in &pools {
            pool.shutdown();
        }
        self.transactions.clear();

        info!(pools = pools.len(), "Router shut down");
    }

    /// The pool currently registered for `key`
    pub fn pool(&self, key: &PoolKey<F>) -> Option<Arc<SlotPool<F>>> {
        self.pools.get(key).map(|entry| entry.value().clone())
    }

    /// Number of registered pools
    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }

    /// Number of transactions with a live binding cell
    pub fn active_transactions(&self) -> usize {
        self.transactions.len()
    }

    /// Router configuration
    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Configuration every pool is created with
    pub fn pool_config(&self) -> &PoolConfig {
        &self.pool_config
    }

    /// Background services pools register with
    pub fn services(&self) -> &BackgroundServices {
        &self.services
    }

    /// Key a request is routed under
    pub fn partition_key(
        &self,
        tx: Option<TransactionId>,
        principal: Option<&F::Principal>,
        criteria: &F::Criteria,
    ) -> PoolKey<F> {
        let separate_no_tx = self.config.no_tx_separate_pools
            && self.factory.factory().is_transactional()
            && tx.is_none();
        PartitionKey::new(self.config.strategy, principal, criteria, separate_no_tx)
    }

    fn pools(&self) -> Vec<Arc<SlotPool<F>>> {
        self.pools.iter().map(|entry| entry.value().clone()).collect()
    }

    fn pool_for(
        &self,
        key: &PoolKey<F>,
        principal: Option<&F::Principal>,
        criteria: &F::Criteria,
    ) -> Arc<SlotPool<F>> {
        if let Some(pool) = self.pool(key) {
            return pool;
        }

        let candidate = self.build_pool(key.clone(), principal, criteria);
        let (pool, installed) = match self.pools.entry(key.clone()) {
            Entry::Occupied(entry) => (entry.get().clone(), false),
            Entry::Vacant(entry) => {
                entry.insert(candidate.clone());
                (candidate, true)
            }
        };

        if installed {
            debug!(pool = pool.id(), key = ?key, "Created partition pool");
            pool.start();
        }
        pool
    }

    fn build_pool(
        &self,
        key: PoolKey<F>,
        principal: Option<&F::Principal>,
        criteria: &F::Criteria,
    ) -> Arc<SlotPool<F>> {
        let context = PoolContext {
            key,
            principal: principal.cloned(),
            criteria: criteria.clone(),
        };
        let router = self.me.clone();

        SlotPool::with_empty_listener(
            context,
            self.pool_config.clone(),
            self.factory.clone(),
            self.services.clone(),
            Box::new(move |pool| {
                if let Some(router) = router.upgrade() {
                    router.reclaim_if_empty(pool);
                }
            }),
        )
    }

    fn lease_with_retry(
        &self,
        key: &PoolKey<F>,
        principal: Option<&F::Principal>,
        criteria: &F::Criteria,
    ) -> Result<Lease<F>, PoolError> {
        let pool = self.pool_for(key, principal, criteria);
        match pool.lease(principal, criteria) {
            Err(PoolError::RetryableShutdown) if !self.closed.load(Ordering::Acquire) => {
                self.pools
                    .remove_if(key, |_, current| Arc::ptr_eq(current, &pool));
                debug!(pool = pool.id(), "Partition pool shut down; retrying with a fresh pool");
                self.pool_for(key, principal, criteria)
                    .lease(principal, criteria)
            }
            Err(PoolError::RetryableShutdown) => Err(PoolError::Closed),
            result => result,
        }
    }

    fn lease_in_transaction(
        &self,
        tx: TransactionId,
        key: &PoolKey<F>,
        principal: Option<&F::Principal>,
        criteria: &F::Criteria,
    ) -> Result<Lease<F>, PoolError> {
        let cell = self
            .transactions
            .entry(tx)
            .or_insert_with(|| Arc::new(Mutex::new(TxBindings::default())))
            .value()
            .clone();
        let pool_id = self.pool_for(key, principal, criteria).id();

        {
            let bindings = cell.lock();
            if bindings.completed {
                drop(bindings);
                return self.lease_with_retry(key, principal, criteria);
            }
            if let Some(existing) = live_binding(&bindings, pool_id) {
                return Ok(existing);
            }
        }

        let fresh = self.lease_with_retry(key, principal, criteria)?;

        let mut bindings = cell.lock();
        if bindings.completed {
            return Ok(fresh);
        }
        if let Some(existing) = live_binding(&bindings, fresh.pool_id()) {
            drop(bindings);
            debug!(%tx, "Lost transaction binding race; returning fresh lease");
            self.release_to_pool(fresh, false);
            return Ok(existing);
        }

        fresh.meta().transaction = Some(tx);
        bindings.leases.insert(fresh.pool_id(), fresh.clone());
        Ok(fresh)
    }

    fn release_to_pool(&self, lease: Lease<F>, force_destroy: bool) {
        match lease.pool() {
            Some(pool) => pool.release(lease, force_destroy),
            None => warn!(
                lease = lease.id(),
                pool = lease.pool_id(),
                "Lease outlived its pool; dropping resource"
            ),
        }
    }

    fn reclaim_if_empty(&self, pool: &Arc<SlotPool<F>>) {
        if !self.config.remove_empty_pools {
            return;
        }

        let removed = self
            .pools
            .remove_if(pool.key(), |_, current| {
                Arc::ptr_eq(current, pool) && pool.is_empty()
            })
            .is_some();

        if removed {
            debug!(pool = pool.id(), "Reclaiming empty partition pool");
            pool.shutdown();
        }
    }
}

fn live_binding<F: ResourceFactory>(bindings: &TxBindings<F>, pool_id: u64) -> Option<Lease<F>> {
    bindings
        .leases
        .get(&pool_id)
        .filter(|lease| lease.state() != LeaseState::Destroyed)
        .cloned()
}

impl<F: ResourceFactory> fmt::Debug for PartitionedRouter<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartitionedRouter")
            .field("config", &self.config)
            .field("pools", &self.pools.len())
            .field("transactions", &self.transactions.len())
            .finish()
    }
}
