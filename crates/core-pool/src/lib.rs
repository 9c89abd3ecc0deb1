//! Slotpool Core: Pure-logic partitioned resource pooling
//!
//! # Overview
//!
//! This crate pools expensive-to-create backend resources (connections,
//! sessions, handles) for a single process. It includes:
//!
//! - **Slot Pool**: A bounded pool for one partition with permit-based admission,
//!   LIFO reuse, idle eviction, background validation and fill-to-minimum
//! - **Partitioned Router**: Maps requests onto per-partition pools and keeps
//!   transaction affinity
//! - **Background Services**: Shared idle reaper and background validator threads
//!
//! # Key Principles
//!
//! This crate is **pure logic** with zero knowledge of:
//! - The pooled resource's protocol (SQL, LDAP, messaging)
//! - Authentication of principals
//! - Management or monitoring surfaces
//!
//! Everything backend-specific sits behind [`ResourceFactory`].
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │         Your Application                │
//! └─────────────┬───────────────────────────┘
//!               │ lease_for(tx, principal, criteria)
//!               ▼
//! ┌─────────────────────────────────────────┐
//! │       Partitioned Router                │  ← Partition + transaction affinity
//! │  (PartitionKey → SlotPool)              │
//! └─────────────┬───────────────────────────┘
//!               │
//!               ▼
//! ┌─────────────────────────────────────────┐
//! │       Slot Pool (one per partition)     │  ← Admission control
//! │  (Permit gate, idle list, checked-out)  │
//! └─────────────┬───────────────────────────┘
//!               │ create / matches / cleanup / destroy
//!               ▼
//!         ResourceFactory
//!        (your backend)
//!
//!  Continuously running:
//!   Idle Reaper          → evict_idle() every idle_timeout / 2
//!   Background Validator → validate_background() every validation interval
//! ```
//!
//! # Usage Example
//!
//! ```no_run
//! use slotpool_core::prelude::*;
//! use std::sync::Arc;
//!
//! struct Sessions;
//!
//! impl ResourceFactory for Sessions {
//!     type Resource = String;
//!     type Principal = String;
//!     type Criteria = String;
//!
//!     fn create(&self, user: Option<&String>, db: &String) -> Result<String, FactoryError> {
//!         Ok(format!("{}@{db}", user.map(String::as_str).unwrap_or("anonymous")))
//!     }
//!
//!     fn matches(&self, _: &String, _: Option<&String>, _: &String) -> Result<bool, FactoryError> {
//!         Ok(true)
//!     }
//! }
//!
//! # fn example() -> Result<(), PoolError> {
//! let router = PartitionedRouter::new(
//!     RouterConfig::default(),
//!     PoolConfig::default(),
//!     Arc::new(PoolFactory::non_validating(Arc::new(Sessions))),
//!     BackgroundServices::new(),
//! )?;
//!
//! let lease = router.lease_for(None, Some(&"alice".to_string()), &"orders".to_string())?;
//! // Use lease.resource()...
//! router.release(lease, false);
//! router.shutdown();
//! # Ok(())
//! # }
//! ```

pub mod background;
pub mod config;
pub mod error;
pub mod factory;
pub mod lease;
pub mod partition;
pub mod router;
pub mod semaphore;
pub mod slot_pool;
pub mod stats;

#[cfg(test)]
mod testing;

// Re-export main types for convenience
pub use background::{BackgroundServices, SweepKind, SweepService, Sweepable};
pub use config::{PartitionStrategy, PoolConfig, RouterConfig};
pub use error::{FactoryError, PoolError};
pub use factory::{PoolFactory, ResourceFactory, ValidatingFactory, Validation};
pub use lease::{Lease, LeaseState};
pub use partition::{PartitionKey, PoolKey, TransactionId};
pub use router::PartitionedRouter;
pub use semaphore::{Permit, PermitGate};
pub use slot_pool::{PoolContext, SlotPool};
pub use stats::PoolStats;

/// Prelude module for convenient imports
///
/// # Example
/// ```
/// use slotpool_core::prelude::*;
/// ```
pub mod prelude {
    pub use super::background::BackgroundServices;
    pub use super::config::{PartitionStrategy, PoolConfig, RouterConfig};
    pub use super::error::{FactoryError, PoolError};
    pub use super::factory::{PoolFactory, ResourceFactory, ValidatingFactory};
    pub use super::lease::{Lease, LeaseState};
    pub use super::partition::TransactionId;
    pub use super::router::PartitionedRouter;
    pub use super::slot_pool::SlotPool;
    pub use super::stats::PoolStats;
}
