//! Leases: pooled resources plus their pooling metadata
//!
//! A [`Lease`] is a cheap, cloneable handle. The owning [`SlotPool`] keeps one
//! clone in its idle list or checked-out set; callers hold another while the
//! resource is leased. Clones only escape to more than one caller through a
//! transaction binding, where every request of the transaction shares one lease.

use crate::factory::ResourceFactory;
use crate::partition::TransactionId;
use crate::slot_pool::SlotPool;
use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

/// Lifecycle state of a lease
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseState {
    /// Usable; may be idle or checked out
    Normal,
    /// Checked out but condemned; destroyed when it is released
    ToDestroy,
    /// Resource handed to the factory for destruction (terminal)
    Destroyed,
}

/// Mutable pooling metadata, guarded by the lease's own lock
#[derive(Debug)]
pub(crate) struct LeaseMeta {
    pub(crate) state: LeaseState,
    pub(crate) last_used: Instant,
    pub(crate) last_validated: Instant,
    pub(crate) permit_held: bool,
    pub(crate) transaction: Option<TransactionId>,
}

struct LeaseInner<F: ResourceFactory> {
    id: u64,
    pool_id: u64,
    pool: Weak<SlotPool<F>>,
    resource: Mutex<Option<F::Resource>>,
    meta: Mutex<LeaseMeta>,
}

/// A pooled resource together with its pooling state
pub struct Lease<F: ResourceFactory> {
    inner: Arc<LeaseInner<F>>,
}

impl<F: ResourceFactory> Clone for Lease<F> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<F: ResourceFactory> Lease<F> {
    pub(crate) fn new(
        id: u64,
        pool_id: u64,
        pool: Weak<SlotPool<F>>,
        resource: F::Resource,
        now: Instant,
    ) -> Self {
        Self {
            inner: Arc::new(LeaseInner {
                id,
                pool_id,
                pool,
                resource: Mutex::new(Some(resource)),
                meta: Mutex::new(LeaseMeta {
                    state: LeaseState::Normal,
                    last_used: now,
                    last_validated: now,
                    permit_held: false,
                    transaction: None,
                }),
            }),
        }
    }

    /// Identifier of this lease, unique within its pool
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Identifier of the pool that owns this lease
    pub fn pool_id(&self) -> u64 {
        self.inner.pool_id
    }

    /// The owning pool, if it is still alive
    pub fn pool(&self) -> Option<Arc<SlotPool<F>>> {
        self.inner.pool.upgrade()
    }

    /// Borrow the resource; `None` once the lease is destroyed
    ///
    /// Do not hold the guard across a release of the same lease.
    pub fn resource(&self) -> Option<MappedMutexGuard<'_, F::Resource>> {
        MutexGuard::try_map(self.inner.resource.lock(), Option::as_mut).ok()
    }

    /// Current lifecycle state
    pub fn state(&self) -> LeaseState {
        self.inner.meta.lock().state
    }

    /// When the resource was last returned (or created)
    pub fn last_used(&self) -> Instant {
        self.inner.meta.lock().last_used
    }

    /// When the resource last passed validation (or was created)
    pub fn last_validated(&self) -> Instant {
        self.inner.meta.lock().last_validated
    }

    /// Transaction this lease is bound to, if any
    pub fn transaction(&self) -> Option<TransactionId> {
        self.inner.meta.lock().transaction
    }

    /// Whether the lease still holds one of its pool's permits
    pub fn holds_permit(&self) -> bool {
        self.inner.meta.lock().permit_held
    }

    /// Condemn the resource: it is destroyed instead of pooled on release
    ///
    /// Returns `false` if the lease was already destroyed.
    pub fn mark_to_destroy(&self) -> bool {
        let mut meta = self.inner.meta.lock();
        match meta.state {
            LeaseState::Destroyed => false,
            _ => {
                meta.state = LeaseState::ToDestroy;
                true
            }
        }
    }

    /// Whether two handles refer to the same lease
    pub fn same_lease(&self, other: &Lease<F>) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn meta(&self) -> MutexGuard<'_, LeaseMeta> {
        self.inner.meta.lock()
    }

    pub(crate) fn resource_slot(&self) -> MutexGuard<'_, Option<F::Resource>> {
        self.inner.resource.lock()
    }

    /// Move to `Destroyed` and hand back the resource for the factory
    ///
    /// Only the first call returns the resource.
    pub(crate) fn mark_destroyed(&self) -> Option<F::Resource> {
        {
            let mut meta = self.inner.meta.lock();
            if meta.state == LeaseState::Destroyed {
                return None;
            }
            meta.state = LeaseState::Destroyed;
        }
        self.inner.resource.lock().take()
    }

    /// Clear the permit-held flag, reporting whether it was set
    pub(crate) fn take_permit(&self) -> bool {
        std::mem::replace(&mut self.inner.meta.lock().permit_held, false)
    }

    pub(crate) fn is_idle_expired(&self, now: Instant, idle_timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_used()) >= idle_timeout
    }
}

impl<F: ResourceFactory> fmt::Debug for Lease<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let meta = self.inner.meta.lock();
        f.debug_struct("Lease")
            .field("id", &self.inner.id)
            .field("pool_id", &self.inner.pool_id)
            .field("state", &meta.state)
            .field("permit_held", &meta.permit_held)
            .field("transaction", &meta.transaction)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FactoryError;

    struct Unit;

    impl ResourceFactory for Unit {
        type Resource = String;
        type Principal = ();
        type Criteria = ();

        fn create(&self, _: Option<&()>, _: &()) -> Result<String, FactoryError> {
            Ok("conn".to_string())
        }

        fn matches(&self, _: &String, _: Option<&()>, _: &()) -> Result<bool, FactoryError> {
            Ok(true)
        }
    }

    fn detached(resource: &str) -> Lease<Unit> {
        Lease::new(1, 1, Weak::new(), resource.to_string(), Instant::now())
    }

    #[test]
    fn test_new_lease_is_normal() {
        let lease = detached("conn-1");

        assert_eq!(lease.state(), LeaseState::Normal);
        assert!(!lease.holds_permit());
        assert_eq!(lease.transaction(), None);
        assert!(lease.pool().is_none());
        assert_eq!(lease.resource().as_deref().map(String::as_str), Some("conn-1"));
    }

    #[test]
    fn test_destroy_is_terminal_and_once() {
        let lease = detached("conn-1");

        assert!(lease.mark_to_destroy());
        assert_eq!(lease.state(), LeaseState::ToDestroy);

        assert_eq!(lease.mark_destroyed().as_deref(), Some("conn-1"));
        assert_eq!(lease.state(), LeaseState::Destroyed);
        assert!(lease.resource().is_none());

        assert_eq!(lease.mark_destroyed(), None);
        assert!(!lease.mark_to_destroy());
        assert_eq!(lease.state(), LeaseState::Destroyed);
    }

    #[test]
    fn test_take_permit_only_once() {
        let lease = detached("conn-1");
        lease.meta().permit_held = true;

        assert!(lease.take_permit());
        assert!(!lease.take_permit());
    }

    #[test]
    fn test_clones_share_state() {
        let lease = detached("conn-1");
        let other = lease.clone();

        other.mark_to_destroy();
        assert_eq!(lease.state(), LeaseState::ToDestroy);
        assert!(lease.same_lease(&other));
        assert!(!lease.same_lease(&detached("conn-1")));
    }

    #[test]
    fn test_idle_expiry() {
        let lease = detached("conn-1");
        let later = lease.last_used() + Duration::from_millis(500);

        assert!(!lease.is_idle_expired(later, Duration::from_secs(1)));
        assert!(lease.is_idle_expired(later, Duration::from_millis(500)));
    }
}
