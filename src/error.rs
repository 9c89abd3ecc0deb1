/*!
 * Error types for Slotpool
 */

use slotpool_core::PoolError;
use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SlotpoolError>;

/// Exit code constants for structured process exit
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_PARTIAL: i32 = 1;
pub const EXIT_FATAL: i32 = 2;

#[derive(Debug, Error)]
pub enum SlotpoolError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A lease failed outside the soak loop
    #[error("Pool error: {0}")]
    Pool(#[from] PoolError),

    /// Report could not be serialized
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A soak worker thread panicked
    #[error("Worker thread failed: {0}")]
    Worker(String),

    /// The soak run completed but some leases failed
    #[error("{failed} of {attempted} lease attempts failed")]
    LeaseFailures { failed: u64, attempted: u64 },
}

impl SlotpoolError {
    /// Get the process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            SlotpoolError::Config(_)
            | SlotpoolError::Io(_)
            | SlotpoolError::Worker(_)
            | SlotpoolError::Pool(PoolError::InvalidConfig(_)) => EXIT_FATAL,
            SlotpoolError::Pool(_)
            | SlotpoolError::Serialization(_)
            | SlotpoolError::LeaseFailures { .. } => EXIT_PARTIAL,
        }
    }

    /// Check if this error is fatal (the run produced no usable result)
    pub fn is_fatal(&self) -> bool {
        match self {
            SlotpoolError::Config(_) => true,
            SlotpoolError::Worker(_) => true,
            SlotpoolError::Io(_) => true,

            SlotpoolError::Pool(e) => !e.is_retryable(),
            SlotpoolError::Serialization(_) => false,
            SlotpoolError::LeaseFailures { .. } => false,
        }
    }
}

impl From<toml::de::Error> for SlotpoolError {
    fn from(err: toml::de::Error) -> Self {
        SlotpoolError::Config(format!("TOML parse error: {}", err))
    }
}

impl From<toml::ser::Error> for SlotpoolError {
    fn from(err: toml::ser::Error) -> Self {
        SlotpoolError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for SlotpoolError {
    fn from(err: serde_json::Error) -> Self {
        SlotpoolError::Serialization(err.to_string())
    }
}
