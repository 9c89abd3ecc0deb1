//! Error types for the pooling engine

use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by [`SlotPool::lease`](crate::SlotPool::lease) and
/// [`PartitionedRouter::lease_for`](crate::PartitionedRouter::lease_for)
///
/// Match, cleanup, destroy and validation failures never show up here; the
/// pool absorbs them by destroying the affected resource.
#[derive(Debug, Error)]
pub enum PoolError {
    /// No permit became available within the blocking timeout
    #[error("No resource available within the blocking timeout of {0:?}")]
    Timeout(Duration),

    /// The pool was shut down while the lease was being admitted
    #[error("Pool is shutting down, retry against a fresh pool")]
    RetryableShutdown,

    /// The factory failed to produce a new resource
    #[error("Failed to create resource: {0}")]
    Creation(#[source] FactoryError),

    /// The router has been shut down and accepts no more leases
    #[error("Router has been shut down")]
    Closed,

    /// Pool parameters rejected at construction
    #[error("Invalid pool configuration: {0}")]
    InvalidConfig(String),
}

impl PoolError {
    /// Check if the router may retry the lease against a reinitialised pool
    pub fn is_retryable(&self) -> bool {
        matches!(self, PoolError::RetryableShutdown)
    }

    /// Check if this error came from the permit gate rather than the backend
    pub fn is_timeout(&self) -> bool {
        matches!(self, PoolError::Timeout(_))
    }
}

/// Failure reported by a [`ResourceFactory`](crate::ResourceFactory)
#[derive(Debug, Error)]
pub enum FactoryError {
    /// The backend refused or failed the operation
    #[error("Backend error: {0}")]
    Backend(String),

    /// I/O failure while talking to the backend
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FactoryError {
    /// Shorthand for [`FactoryError::Backend`]
    pub fn backend(message: impl Into<String>) -> Self {
        FactoryError::Backend(message.into())
    }
}
