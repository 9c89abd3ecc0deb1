//! In-memory factory for unit tests

use crate::background::BackgroundServices;
use crate::config::PoolConfig;
use crate::error::FactoryError;
use crate::factory::{PoolFactory, ResourceFactory, ValidatingFactory};
use crate::slot_pool::{PoolContext, SlotPool};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug)]
pub(crate) struct MockConn {
    pub(crate) id: u64,
    pub(crate) user: Option<String>,
}

/// Connections match when they belong to the requesting user
#[derive(Default)]
pub(crate) struct MockFactory {
    next_id: AtomicU64,
    created: AtomicUsize,
    destroyed: AtomicUsize,
    invalid: Mutex<HashSet<u64>>,
    pub(crate) fail_create: AtomicBool,
    pub(crate) fail_cleanup: AtomicBool,
    transactional: bool,
}

impl MockFactory {
    pub(crate) fn transactional() -> Self {
        Self {
            transactional: true,
            ..Default::default()
        }
    }

    pub(crate) fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub(crate) fn destroyed(&self) -> usize {
        self.destroyed.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_invalid(&self, id: u64) {
        self.invalid.lock().insert(id);
    }
}

impl ResourceFactory for MockFactory {
    type Resource = MockConn;
    type Principal = String;
    type Criteria = String;

    fn create(&self, principal: Option<&String>, _: &String) -> Result<MockConn, FactoryError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(FactoryError::backend("connection refused"));
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(MockConn {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            user: principal.cloned(),
        })
    }

    fn matches(
        &self,
        conn: &MockConn,
        principal: Option<&String>,
        _: &String,
    ) -> Result<bool, FactoryError> {
        Ok(conn.user.as_ref() == principal)
    }

    fn cleanup(&self, _: &mut MockConn) -> Result<(), FactoryError> {
        if self.fail_cleanup.load(Ordering::SeqCst) {
            return Err(FactoryError::backend("reset failed"));
        }
        Ok(())
    }

    fn destroy(&self, _: MockConn) -> Result<(), FactoryError> {
        self.destroyed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn is_transactional(&self) -> bool {
        self.transactional
    }
}

impl ValidatingFactory for MockFactory {
    fn invalid_resources(&self, candidates: &[&MockConn]) -> Vec<usize> {
        let invalid = self.invalid.lock();
        candidates
            .iter()
            .enumerate()
            .filter(|(_, conn)| invalid.contains(&conn.id))
            .map(|(idx, _)| idx)
            .collect()
    }
}

/// A standalone, unstarted pool over a validating [`MockFactory`]
pub(crate) fn mock_pool(config: PoolConfig) -> (Arc<SlotPool<MockFactory>>, Arc<MockFactory>) {
    let factory = Arc::new(MockFactory::default());
    let pool = SlotPool::new(
        PoolContext::unpartitioned(None, "orders".to_string()),
        config,
        Arc::new(PoolFactory::validating(factory.clone())),
        BackgroundServices::new(),
    )
    .expect("test pool config is valid");
    (pool, factory)
}
