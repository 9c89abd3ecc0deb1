//! Simulated backend for exercising the pool without a real server
//!
//! Connections are plain structs. Latency and failures are injected at random
//! according to [`SimulationConfig`].

use crate::config::SimulationConfig;
use rand::Rng;
use slotpool_core::{FactoryError, ResourceFactory, ValidatingFactory};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;
use tracing::trace;

/// A fake backend connection
#[derive(Debug)]
pub struct SimConnection {
    pub id: u64,
    pub user: Option<String>,
    pub database: String,
    /// Leases served since creation
    pub uses: u64,
    /// Requests issued on the current lease
    pub pending_requests: u32,
}

/// Call counters of a [`SimulatedFactory`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct FactoryCounters {
    pub created: u64,
    pub destroyed: u64,
    pub create_failures: u64,
    pub match_failures: u64,
    pub cleanup_failures: u64,
    pub validation_rejections: u64,
}

/// Factory producing [`SimConnection`]s keyed by user and database
#[derive(Debug)]
pub struct SimulatedFactory {
    config: SimulationConfig,
    next_id: AtomicU64,
    created: AtomicU64,
    destroyed: AtomicU64,
    create_failures: AtomicU64,
    match_failures: AtomicU64,
    cleanup_failures: AtomicU64,
    validation_rejections: AtomicU64,
}

impl SimulatedFactory {
    pub fn new(config: SimulationConfig) -> Self {
        Self {
            config,
            next_id: AtomicU64::new(1),
            created: AtomicU64::new(0),
            destroyed: AtomicU64::new(0),
            create_failures: AtomicU64::new(0),
            match_failures: AtomicU64::new(0),
            cleanup_failures: AtomicU64::new(0),
            validation_rejections: AtomicU64::new(0),
        }
    }

    /// Snapshot of the call counters
    pub fn counters(&self) -> FactoryCounters {
        FactoryCounters {
            created: self.created.load(Ordering::Relaxed),
            destroyed: self.destroyed.load(Ordering::Relaxed),
            create_failures: self.create_failures.load(Ordering::Relaxed),
            match_failures: self.match_failures.load(Ordering::Relaxed),
            cleanup_failures: self.cleanup_failures.load(Ordering::Relaxed),
            validation_rejections: self.validation_rejections.load(Ordering::Relaxed),
        }
    }

    fn roll(rate: f64) -> bool {
        rate > 0.0 && rand::rng().random_bool(rate.min(1.0))
    }
}

impl ResourceFactory for SimulatedFactory {
    type Resource = SimConnection;
    type Principal = String;
    type Criteria = String;

    fn create(
        &self,
        user: Option<&String>,
        database: &String,
    ) -> Result<SimConnection, FactoryError> {
        if self.config.create_latency_ms > 0 {
            let latency = rand::rng().random_range(0..=self.config.create_latency_ms);
            thread::sleep(Duration::from_millis(latency));
        }

        if Self::roll(self.config.create_failure_rate) {
            self.create_failures.fetch_add(1, Ordering::Relaxed);
            return Err(FactoryError::backend(format!(
                "simulated connect failure to {}",
                database
            )));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.created.fetch_add(1, Ordering::Relaxed);
        trace!(connection = id, ?user, database = %database, "Opened simulated connection");

        Ok(SimConnection {
            id,
            user: user.cloned(),
            database: database.clone(),
            uses: 0,
            pending_requests: 0,
        })
    }

    fn matches(
        &self,
        conn: &SimConnection,
        user: Option<&String>,
        database: &String,
    ) -> Result<bool, FactoryError> {
        if Self::roll(self.config.match_failure_rate) {
            self.match_failures.fetch_add(1, Ordering::Relaxed);
            return Err(FactoryError::backend("simulated probe failure"));
        }
        Ok(conn.user.as_ref() == user && &conn.database == database)
    }

    fn cleanup(&self, conn: &mut SimConnection) -> Result<(), FactoryError> {
        conn.uses += 1;
        conn.pending_requests = 0;
        if Self::roll(self.config.cleanup_failure_rate) {
            self.cleanup_failures.fetch_add(1, Ordering::Relaxed);
            return Err(FactoryError::backend("simulated session reset failure"));
        }
        Ok(())
    }

    fn destroy(&self, conn: SimConnection) -> Result<(), FactoryError> {
        self.destroyed.fetch_add(1, Ordering::Relaxed);
        trace!(connection = conn.id, uses = conn.uses, "Closed simulated connection");
        Ok(())
    }

    fn is_transactional(&self) -> bool {
        self.config.transactional
    }
}

impl ValidatingFactory for SimulatedFactory {
    fn invalid_resources(&self, candidates: &[&SimConnection]) -> Vec<usize> {
        let invalid: Vec<usize> = (0..candidates.len())
            .filter(|_| Self::roll(self.config.validation_failure_rate))
            .collect();
        self.validation_rejections
            .fetch_add(invalid.len() as u64, Ordering::Relaxed);
        invalid
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quiet() -> SimulationConfig {
        SimulationConfig {
            create_latency_ms: 0,
            ..Default::default()
        }
    }

    #[test]
    fn test_create_and_match() {
        let factory = SimulatedFactory::new(quiet());
        let alice = "alice".to_string();
        let orders = "orders".to_string();

        let conn = factory.create(Some(&alice), &orders).unwrap();
        assert_eq!(conn.user.as_deref(), Some("alice"));
        assert!(factory.matches(&conn, Some(&alice), &orders).unwrap());
        assert!(!factory.matches(&conn, None, &orders).unwrap());
        assert!(!factory
            .matches(&conn, Some(&alice), &"billing".to_string())
            .unwrap());

        factory.destroy(conn).unwrap();
        let counters = factory.counters();
        assert_eq!(counters.created, 1);
        assert_eq!(counters.destroyed, 1);
    }

    #[test]
    fn test_certain_failures() {
        let factory = SimulatedFactory::new(SimulationConfig {
            create_failure_rate: 1.0,
            cleanup_failure_rate: 1.0,
            validation_failure_rate: 1.0,
            ..quiet()
        });
        let orders = "orders".to_string();

        assert!(factory.create(None, &orders).is_err());
        assert_eq!(factory.counters().create_failures, 1);

        let mut conn = SimConnection {
            id: 9,
            user: None,
            database: orders,
            uses: 0,
            pending_requests: 2,
        };
        assert!(factory.cleanup(&mut conn).is_err());
        assert_eq!(conn.uses, 1);
        assert_eq!(conn.pending_requests, 0);

        assert_eq!(factory.invalid_resources(&[&conn, &conn]), vec![0, 1]);
        assert_eq!(factory.counters().validation_rejections, 2);
    }

    #[test]
    fn test_zero_rates_never_fail() {
        let factory = SimulatedFactory::new(quiet());
        let orders = "orders".to_string();

        for _ in 0..100 {
            let mut conn = factory.create(None, &orders).unwrap();
            assert!(factory.matches(&conn, None, &orders).unwrap());
            assert!(factory.cleanup(&mut conn).is_ok());
            assert!(factory.invalid_resources(&[&conn]).is_empty());
        }
        assert_eq!(factory.counters().created, 100);
    }

    #[test]
    fn test_transactional_flag() {
        let factory = SimulatedFactory::new(SimulationConfig {
            transactional: false,
            ..quiet()
        });
        assert!(!factory.is_transactional());
    }
}
