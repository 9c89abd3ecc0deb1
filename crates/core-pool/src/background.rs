//! Shared background sweep services
//!
//! One [`SweepService`] thread serves every registered pool: the idle reaper
//! evicts expired idle resources, the background validator re-checks idle
//! resources with the factory. Pools register on start and unregister on
//! shutdown; the worker thread exists only while something is registered.
//!
//! Registrations hold weak references, so a dropped pool silently falls out
//! of the schedule on the next sweep.

use crossbeam_channel::{unbounded, RecvTimeoutError, Sender};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// How long an empty worker parks before re-checking the registry
const IDLE_PARK: Duration = Duration::from_secs(60);

/// A pool that background services can sweep
pub trait Sweepable: Send + Sync {
    /// Registration identifier
    fn sweep_id(&self) -> u64;

    /// Evict resources idle past their timeout, relative to `now`
    fn evict_idle(&self, now: Instant);

    /// Re-check idle resources with the factory
    fn validate_background(&self);
}

/// Which operation a sweep service runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepKind {
    /// Calls [`Sweepable::evict_idle`]
    IdleReaper,
    /// Calls [`Sweepable::validate_background`]
    BackgroundValidator,
}

impl SweepKind {
    fn thread_name(self) -> &'static str {
        match self {
            SweepKind::IdleReaper => "slotpool-idle-reaper",
            SweepKind::BackgroundValidator => "slotpool-validator",
        }
    }
}

struct Registration {
    target: Weak<dyn Sweepable>,
    interval: Duration,
    next_due: Instant,
}

enum Signal {
    Wake,
    Stop,
}

struct Worker {
    tx: Sender<Signal>,
    handle: JoinHandle<()>,
}

struct SweepRegistry {
    kind: SweepKind,
    entries: DashMap<u64, Registration>,
}

impl SweepRegistry {
    /// Run every due registration; returns how long until the next one is due
    fn sweep_due(&self, now: Instant) -> Option<Duration> {
        let mut due = Vec::new();
        let mut dead = Vec::new();

        for mut entry in self.entries.iter_mut() {
            let id = *entry.key();
            let registration = entry.value_mut();
            if registration.next_due > now {
                continue;
            }
            match registration.target.upgrade() {
                Some(target) => {
                    registration.next_due = now + registration.interval;
                    due.push(target);
                }
                None => dead.push(id),
            }
        }

        for id in dead {
            debug!(kind = ?self.kind, pool = id, "Dropping registration of a released pool");
            self.entries.remove(&id);
        }

        // Targets run with no registry references held, so they may
        // unregister themselves.
        for target in due {
            self.run(&*target, now);
        }

        self.next_wait(Instant::now())
    }

    /// Run every registration regardless of schedule
    fn sweep_all(&self, now: Instant) {
        let targets: Vec<_> = self
            .entries
            .iter()
            .filter_map(|entry| entry.value().target.upgrade())
            .collect();

        for target in targets {
            self.run(&*target, now);
        }
    }

    fn run(&self, target: &dyn Sweepable, now: Instant) {
        debug!(kind = ?self.kind, pool = target.sweep_id(), "Sweeping pool");
        match self.kind {
            SweepKind::IdleReaper => target.evict_idle(now),
            SweepKind::BackgroundValidator => target.validate_background(),
        }
    }

    fn next_wait(&self, now: Instant) -> Option<Duration> {
        self.entries
            .iter()
            .map(|entry| entry.value().next_due.saturating_duration_since(now))
            .min()
    }
}

/// A single background thread sweeping every registered pool
pub struct SweepService {
    registry: Arc<SweepRegistry>,
    worker: Arc<Mutex<Option<Worker>>>,
}

impl SweepService {
    /// Create a stopped service of the given kind
    pub fn new(kind: SweepKind) -> Self {
        Self {
            registry: Arc::new(SweepRegistry {
                kind,
                entries: DashMap::new(),
            }),
            worker: Arc::new(Mutex::new(None)),
        }
    }

    /// Service that evicts idle resources
    pub fn idle_reaper() -> Self {
        Self::new(SweepKind::IdleReaper)
    }

    /// Service that validates idle resources
    pub fn background_validator() -> Self {
        Self::new(SweepKind::BackgroundValidator)
    }

    /// Which operation this service runs
    pub fn kind(&self) -> SweepKind {
        self.registry.kind
    }

    /// Schedule `target` every `interval`, starting the worker if needed
    ///
    /// Registering an id again replaces its schedule.
    pub fn register(&self, id: u64, target: Weak<dyn Sweepable>, interval: Duration) {
        self.registry.entries.insert(
            id,
            Registration {
                target,
                interval,
                next_due: Instant::now() + interval,
            },
        );
        debug!(kind = ?self.kind(), pool = id, ?interval, "Registered pool");

        let mut worker = self.worker.lock();
        match worker.as_ref() {
            Some(running) => {
                let _ = running.tx.send(Signal::Wake);
            }
            None => *worker = self.spawn_worker(),
        }
    }

    /// Remove `id` from the schedule, stopping the worker once empty
    pub fn unregister(&self, id: u64) {
        if self.registry.entries.remove(&id).is_none() {
            return;
        }
        debug!(kind = ?self.kind(), pool = id, "Unregistered pool");

        // Checked under the worker lock so a concurrent register either
        // lands before the check or spawns a fresh worker after it.
        let idle_worker = {
            let mut worker = self.worker.lock();
            if self.registry.entries.is_empty() {
                worker.take()
            } else {
                None
            }
        };
        if let Some(worker) = idle_worker {
            self.join(worker);
        }
    }

    /// Number of registered pools
    pub fn registered_count(&self) -> usize {
        self.registry.entries.len()
    }

    /// Whether the worker thread is running
    pub fn is_running(&self) -> bool {
        self.worker.lock().is_some()
    }

    /// Sweep every registered pool right now, on the calling thread
    pub fn sweep_all(&self) {
        self.registry.sweep_all(Instant::now());
    }

    /// Stop the worker thread; registrations are kept
    pub fn stop(&self) {
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            self.join(worker);
        }
    }

    fn join(&self, worker: Worker) {
        let _ = worker.tx.send(Signal::Stop);
        // A pool can unregister from inside its own sweep; the worker then
        // exits on its own after the sweep returns.
        if worker.handle.thread().id() != thread::current().id() && worker.handle.join().is_err()
        {
            error!(kind = ?self.kind(), "Sweep thread panicked");
        }
        info!(kind = ?self.kind(), "Sweep service stopped");
    }

    fn spawn_worker(&self) -> Option<Worker> {
        let (tx, rx) = unbounded();
        let registry = self.registry.clone();
        let slot = Arc::downgrade(&self.worker);
        let kind = registry.kind;

        let spawned = thread::Builder::new()
            .name(kind.thread_name().to_string())
            .spawn(move || {
                let mut wait = registry.next_wait(Instant::now()).unwrap_or(IDLE_PARK);
                loop {
                    match rx.recv_timeout(wait) {
                        Ok(Signal::Stop) | Err(RecvTimeoutError::Disconnected) => break,
                        Ok(Signal::Wake) => {
                            wait = registry.next_wait(Instant::now()).unwrap_or(IDLE_PARK);
                        }
                        Err(RecvTimeoutError::Timeout) => {
                            match registry.sweep_due(Instant::now()) {
                                Some(next) => wait = next,
                                None if retire(&registry, &slot) => break,
                                None => wait = IDLE_PARK,
                            }
                        }
                    }
                }
            });

        match spawned {
            Ok(handle) => {
                info!(kind = ?kind, "Sweep service started");
                Some(Worker { tx, handle })
            }
            Err(e) => {
                warn!(kind = ?kind, error = %e, "Could not spawn sweep thread");
                None
            }
        }
    }
}

/// Give up the worker slot once every registration is gone
///
/// Runs under the slot lock, so a concurrent `register` either lands first
/// and keeps this worker alive, or finds the slot empty and spawns anew.
fn retire(registry: &SweepRegistry, slot: &Weak<Mutex<Option<Worker>>>) -> bool {
    let Some(slot) = slot.upgrade() else {
        return true;
    };
    let mut worker = slot.lock();
    if !registry.entries.is_empty() {
        return false;
    }

    let is_current = worker
        .as_ref()
        .is_some_and(|running| running.handle.thread().id() == thread::current().id());
    if is_current {
        // Dropping the handle detaches this thread, which is about to exit.
        worker.take();
        info!(kind = ?registry.kind, "Sweep service stopped; no pools registered");
    }
    is_current
}

impl Drop for SweepService {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for SweepService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SweepService")
            .field("kind", &self.kind())
            .field("registered", &self.registered_count())
            .field("running", &self.is_running())
            .finish()
    }
}

/// The reaper and validator shared by every pool of a process
///
/// Cloning shares the same two services.
#[derive(Debug, Clone)]
pub struct BackgroundServices {
    reaper: Arc<SweepService>,
    validator: Arc<SweepService>,
}

impl BackgroundServices {
    /// Create both services, stopped
    pub fn new() -> Self {
        Self {
            reaper: Arc::new(SweepService::idle_reaper()),
            validator: Arc::new(SweepService::background_validator()),
        }
    }

    /// The idle reaper
    pub fn idle_reaper(&self) -> &SweepService {
        &self.reaper
    }

    /// The background validator
    pub fn background_validator(&self) -> &SweepService {
        &self.validator
    }

    /// Stop both worker threads
    pub fn shutdown(&self) {
        self.reaper.stop();
        self.validator.stop();
    }
}

impl Default for BackgroundServices {
    fn default() -> Self {
        Self::new()
    }
}
