//! Shared test factory for the integration tests

#![allow(dead_code)]

use slotpool_core::prelude::*;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// A fake backend session
#[derive(Debug)]
pub struct Session {
    pub id: u64,
    pub user: Option<String>,
    pub database: String,
}

/// Counts every factory call and lets tests break individual sessions
#[derive(Default)]
pub struct SessionFactory {
    next_id: AtomicU64,
    pub created: AtomicU64,
    pub destroyed: AtomicU64,
    pub broken: Mutex<HashSet<u64>>,
    pub refuse_creates: AtomicBool,
    /// Latency added to every `create`
    pub create_delay_ms: AtomicU64,
    /// Latency added to every validation call
    pub validate_delay_ms: AtomicU64,
}

impl SessionFactory {
    pub fn created(&self) -> u64 {
        self.created.load(Ordering::SeqCst)
    }

    pub fn destroyed(&self) -> u64 {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Make `matches` and validation reject this session from now on
    pub fn break_session(&self, id: u64) {
        self.broken.lock().unwrap().insert(id);
    }

    fn is_broken(&self, id: u64) -> bool {
        self.broken.lock().unwrap().contains(&id)
    }

    fn pause(delay_ms: &AtomicU64) {
        let ms = delay_ms.load(Ordering::SeqCst);
        if ms > 0 {
            thread::sleep(Duration::from_millis(ms));
        }
    }
}

impl ResourceFactory for SessionFactory {
    type Resource = Session;
    type Principal = String;
    type Criteria = String;

    fn create(&self, user: Option<&String>, database: &String) -> Result<Session, FactoryError> {
        Self::pause(&self.create_delay_ms);
        if self.refuse_creates.load(Ordering::SeqCst) {
            return Err(FactoryError::backend("backend refused session"));
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Session {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            user: user.cloned(),
            database: database.clone(),
        })
    }

    fn matches(
        &self,
        session: &Session,
        user: Option<&String>,
        database: &String,
    ) -> Result<bool, FactoryError> {
        if self.is_broken(session.id) {
            return Err(FactoryError::backend("session reset by peer"));
        }
        Ok(session.user.as_ref() == user && &session.database == database)
    }

    fn destroy(&self, _session: Session) -> Result<(), FactoryError> {
        self.destroyed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl ValidatingFactory for SessionFactory {
    fn invalid_resources(&self, candidates: &[&Session]) -> Vec<usize> {
        Self::pause(&self.validate_delay_ms);
        candidates
            .iter()
            .enumerate()
            .filter(|(_, session)| self.is_broken(session.id))
            .map(|(idx, _)| idx)
            .collect()
    }
}

/// A started standalone pool over a fresh [`SessionFactory`]
pub fn session_pool(
    config: PoolConfig,
    services: &BackgroundServices,
) -> (Arc<SlotPool<SessionFactory>>, Arc<SessionFactory>) {
    let factory = Arc::new(SessionFactory::default());
    let pool = SlotPool::new(
        slotpool_core::PoolContext::unpartitioned(None, "orders".to_string()),
        config,
        Arc::new(PoolFactory::validating(factory.clone())),
        services.clone(),
    )
    .expect("valid pool config");
    pool.start();
    (pool, factory)
}

/// An unstarted standalone pool: nothing sweeps it unless the test does
pub fn idle_session_pool(config: PoolConfig) -> (Arc<SlotPool<SessionFactory>>, Arc<SessionFactory>) {
    let factory = Arc::new(SessionFactory::default());
    let pool = SlotPool::new(
        slotpool_core::PoolContext::unpartitioned(None, "orders".to_string()),
        config,
        Arc::new(PoolFactory::validating(factory.clone())),
        BackgroundServices::new(),
    )
    .expect("valid pool config");
    (pool, factory)
}

/// Resources the pool accounts for right now
pub fn held(pool: &SlotPool<SessionFactory>) -> u64 {
    let stats = pool.stats();
    stats.idle + stats.in_use
}

/// A router over a fresh [`SessionFactory`]
pub fn session_router(
    config: RouterConfig,
    pool_config: PoolConfig,
) -> (Arc<PartitionedRouter<SessionFactory>>, Arc<SessionFactory>) {
    let factory = Arc::new(SessionFactory::default());
    let router = PartitionedRouter::new(
        config,
        pool_config,
        Arc::new(PoolFactory::validating(factory.clone())),
        BackgroundServices::new(),
    )
    .expect("valid pool config");
    (router, factory)
}

pub fn s(value: &str) -> String {
    value.to_string()
}
