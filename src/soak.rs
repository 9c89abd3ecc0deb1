//! Soak-test driver
//!
//! Runs a mixed workload against a [`PartitionedRouter`] over the simulated
//! backend: worker threads pick a random principal and database, optionally
//! open a transaction, hold each lease for a random time and release it.

use crate::config::{SlotpoolConfig, SoakConfig};
use crate::error::{Result, SlotpoolError};
use crate::sim::{FactoryCounters, SimulatedFactory};
use rand::Rng;
use serde::Serialize;
use slotpool_core::{
    BackgroundServices, PartitionedRouter, PoolError, PoolFactory, PoolStats, TransactionId,
};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// How often the driver checks the deadline and reports progress
const TICK: Duration = Duration::from_millis(100);

/// Live counters shared by the workers
#[derive(Debug, Default)]
pub struct SoakCounters {
    leases: AtomicU64,
    transactions: AtomicU64,
    invalidations: AtomicU64,
    timeouts: AtomicU64,
    creation_failures: AtomicU64,
    closed: AtomicU64,
}

impl SoakCounters {
    pub fn leases(&self) -> u64 {
        self.leases.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.timeouts.load(Ordering::Relaxed)
            + self.creation_failures.load(Ordering::Relaxed)
            + self.closed.load(Ordering::Relaxed)
    }

    fn record_error(&self, error: &PoolError) {
        let counter = match error {
            PoolError::Timeout(_) => &self.timeouts,
            PoolError::Creation(_) => &self.creation_failures,
            // Construction errors never come out of a lease; count them as
            // rejections if they ever do.
            PoolError::RetryableShutdown | PoolError::Closed | PoolError::InvalidConfig(_) => {
                &self.closed
            }
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Statistics of one partition at the end of the run
#[derive(Debug, Clone, Serialize)]
pub struct PartitionReport {
    pub principal: Option<String>,
    pub database: Option<String>,
    pub stats: PoolStats,
}

/// Outcome of a soak run
#[derive(Debug, Clone, Serialize)]
pub struct SoakReport {
    pub threads: usize,
    pub elapsed_ms: u64,
    pub leases: u64,
    pub transactions: u64,
    pub invalidations: u64,
    pub timeouts: u64,
    pub creation_failures: u64,
    pub closed: u64,
    /// Aggregate pool statistics just before shutdown
    pub totals: PoolStats,
    pub partitions: Vec<PartitionReport>,
    /// Factory counters after shutdown
    pub factory: FactoryCounters,
}

impl SoakReport {
    /// Lease attempts, successful or not
    pub fn attempted(&self) -> u64 {
        self.leases + self.failures()
    }

    /// Failed lease attempts
    pub fn failures(&self) -> u64 {
        self.timeouts + self.creation_failures + self.closed
    }

    /// Leases per second over the run
    pub fn throughput(&self) -> f64 {
        if self.elapsed_ms == 0 {
            0.0
        } else {
            self.leases as f64 * 1000.0 / self.elapsed_ms as f64
        }
    }

    /// Turn lease failures into an error for the exit code
    pub fn into_result(self) -> Result<Self> {
        match self.failures() {
            0 => Ok(self),
            failed => Err(SlotpoolError::LeaseFailures {
                failed,
                attempted: self.attempted(),
            }),
        }
    }
}

/// Drives the soak workload
pub struct SoakDriver {
    config: SlotpoolConfig,
    factory: Arc<SimulatedFactory>,
    services: BackgroundServices,
    router: Arc<PartitionedRouter<SimulatedFactory>>,
    counters: Arc<SoakCounters>,
}

impl SoakDriver {
    /// Validate the configuration and build the router
    pub fn new(config: SlotpoolConfig) -> Result<Self> {
        config.validate()?;

        let factory = Arc::new(SimulatedFactory::new(config.simulation.clone()));
        let services = BackgroundServices::new();
        let router = PartitionedRouter::new(
            config.router.clone(),
            config.pool.clone(),
            Arc::new(PoolFactory::validating(factory.clone())),
            services.clone(),
        )?;

        Ok(Self {
            config,
            factory,
            services,
            router,
            counters: Arc::new(SoakCounters::default()),
        })
    }

    /// The router under test
    pub fn router(&self) -> &Arc<PartitionedRouter<SimulatedFactory>> {
        &self.router
    }

    /// Run the workload to completion
    ///
    /// `on_tick` is called from the calling thread roughly every 100ms.
    pub fn run(self, mut on_tick: impl FnMut(&SoakCounters, Duration)) -> Result<SoakReport> {
        let soak = &self.config.soak;
        let duration = Duration::from_secs(soak.duration_secs);
        let stop = Arc::new(AtomicBool::new(false));

        info!(
            threads = soak.threads,
            duration_secs = soak.duration_secs,
            "Starting soak run"
        );

        let started = Instant::now();
        let workers = (0..soak.threads)
            .map(|index| self.spawn_worker(index, stop.clone()))
            .collect::<Result<Vec<_>>>();

        // Workers that did start must be stopped even if a later spawn failed.
        let workers = match workers {
            Ok(workers) => workers,
            Err(e) => {
                stop.store(true, Ordering::Release);
                self.router.shutdown();
                return Err(e);
            }
        };

        while started.elapsed() < duration {
            thread::sleep(TICK.min(duration.saturating_sub(started.elapsed())));
            on_tick(&self.counters, started.elapsed());
        }
        stop.store(true, Ordering::Release);

        let mut panicked = 0;
        for worker in workers {
            if worker.join().is_err() {
                panicked += 1;
            }
        }
        let elapsed = started.elapsed();

        let totals = self.router.stats();
        let partitions = self
            .router
            .partition_stats()
            .into_iter()
            .map(|(key, stats)| PartitionReport {
                principal: key.principal().cloned(),
                database: key.criteria().cloned(),
                stats,
            })
            .collect();

        self.router.shutdown();
        self.services.shutdown();

        if panicked > 0 {
            return Err(SlotpoolError::Worker(format!(
                "{} soak worker(s) panicked",
                panicked
            )));
        }

        let counters = &self.counters;
        let report = SoakReport {
            threads: soak.threads,
            elapsed_ms: elapsed.as_millis() as u64,
            leases: counters.leases(),
            transactions: counters.transactions.load(Ordering::Relaxed),
            invalidations: counters.invalidations.load(Ordering::Relaxed),
            timeouts: counters.timeouts.load(Ordering::Relaxed),
            creation_failures: counters.creation_failures.load(Ordering::Relaxed),
            closed: counters.closed.load(Ordering::Relaxed),
            totals,
            partitions,
            factory: self.factory.counters(),
        };

        info!(
            leases = report.leases,
            failures = report.failures(),
            elapsed_ms = report.elapsed_ms,
            "Soak run finished"
        );
        Ok(report)
    }

    fn spawn_worker(&self, index: usize, stop: Arc<AtomicBool>) -> Result<JoinHandle<()>> {
        let worker = Worker {
            index,
            soak: self.config.soak.clone(),
            router: self.router.clone(),
            counters: self.counters.clone(),
            stop,
        };

        thread::Builder::new()
            .name(format!("soak-worker-{}", index))
            .spawn(move || worker.run())
            .map_err(|e| SlotpoolError::Worker(format!("failed to spawn worker {}: {}", index, e)))
    }
}

struct Worker {
    index: usize,
    soak: SoakConfig,
    router: Arc<PartitionedRouter<SimulatedFactory>>,
    counters: Arc<SoakCounters>,
    stop: Arc<AtomicBool>,
}

impl Worker {
    fn run(self) {
        let mut rng = rand::rng();
        // Transaction ids are unique per worker: the index is the high half.
        let mut next_tx = (self.index as u64) << 32;

        while !self.stop.load(Ordering::Acquire) {
            let user = format!("user-{}", rng.random_range(0..self.soak.principals));
            let database = &self.soak.databases[rng.random_range(0..self.soak.databases.len())];

            if rng.random_bool(self.soak.transaction_ratio) {
                next_tx += 1;
                self.run_transaction(&mut rng, TransactionId(next_tx), &user, database);
            } else {
                self.run_plain(&mut rng, &user, database);
            }
        }

        debug!(worker = self.index, "Soak worker stopped");
    }

    fn run_plain(&self, rng: &mut impl Rng, user: &String, database: &String) {
        let lease = match self.router.lease_for(None, Some(user), database) {
            Ok(lease) => lease,
            Err(e) => {
                self.counters.record_error(&e);
                return;
            }
        };
        self.counters.leases.fetch_add(1, Ordering::Relaxed);

        if let Some(mut conn) = lease.resource() {
            conn.pending_requests += 1;
        }
        self.hold(rng);

        if rng.random_bool(self.soak.invalidate_ratio) {
            if let Some(pool) = lease.pool() {
                pool.invalidate(&lease);
                self.counters.invalidations.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.router.release(lease, false);
    }

    fn run_transaction(
        &self,
        rng: &mut impl Rng,
        tx: TransactionId,
        user: &String,
        database: &String,
    ) {
        let requests = rng.random_range(1..=self.soak.max_requests_per_tx);
        for _ in 0..requests {
            match self.router.lease_for(Some(tx), Some(user), database) {
                Ok(lease) => {
                    self.counters.leases.fetch_add(1, Ordering::Relaxed);
                    if let Some(mut conn) = lease.resource() {
                        conn.pending_requests += 1;
                    }
                    self.hold(rng);

                    // Unbound leases are not released by complete_transaction
                    if lease.transaction().is_none() {
                        self.router.release(lease, false);
                    }
                }
                Err(e) => {
                    self.counters.record_error(&e);
                    if !e.is_timeout() {
                        warn!(%tx, error = %e, "Transaction request failed");
                    }
                }
            }
        }

        self.router.complete_transaction(tx);
        self.counters.transactions.fetch_add(1, Ordering::Relaxed);
    }

    fn hold(&self, rng: &mut impl Rng) {
        let ms = rng.random_range(self.soak.hold_min_ms..=self.soak.hold_max_ms);
        if ms > 0 {
            thread::sleep(Duration::from_millis(ms));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn short_run() -> SlotpoolConfig {
        let mut config = SlotpoolConfig::default();
        config.soak.threads = 4;
        config.soak.duration_secs = 1;
        config.soak.hold_max_ms = 5;
        config.simulation.create_latency_ms = 1;
        config.pool.blocking_timeout_ms = 5_000;
        config
    }

    #[test]
    fn test_driver_rejects_invalid_config() {
        let mut config = short_run();
        config.soak.threads = 0;

        assert!(SoakDriver::new(config).is_err());
    }

    #[test]
    fn test_short_run_reports_activity() {
        crate::logging::init_test_logging();

        let driver = SoakDriver::new(short_run()).unwrap();
        let mut ticks = 0;
        let report = driver.run(|_, _| ticks += 1).unwrap();

        assert!(ticks > 0);
        assert!(report.leases > 0);
        assert_eq!(report.failures(), 0);
        assert_eq!(report.totals.in_use, 0);
        assert!(report.factory.created >= report.totals.created);
        assert!(!report.partitions.is_empty());
        assert!(report.throughput() > 0.0);
        assert!(report.clone().into_result().is_ok());
    }

    #[test]
    fn test_failures_become_partial_error() {
        let report = SoakReport {
            threads: 1,
            elapsed_ms: 1_000,
            leases: 8,
            transactions: 0,
            invalidations: 0,
            timeouts: 2,
            creation_failures: 0,
            closed: 0,
            totals: PoolStats::default(),
            partitions: Vec::new(),
            factory: FactoryCounters::default(),
        };

        assert_eq!(report.attempted(), 10);
        let err = report.into_result().unwrap_err();
        assert!(matches!(
            err,
            SlotpoolError::LeaseFailures {
                failed: 2,
                attempted: 10
            }
        ));
    }
}
