/*!
 * Slotpool - Partitioned Bounded Resource Pooling
 *
 * Application layer over `slotpool-core`:
 * - TOML configuration for pools, routing and the soak workload
 * - Structured logging to stderr or a JSON log file
 * - A simulated backend with latency and failure injection
 * - A multi-threaded soak driver that exercises the partitioned router
 * - Human-readable and JSON reports
 *
 * Version: 0.1.0
 * Author: Shane Wall <shaneawall@gmail.com>
 */

pub mod cli_style;
pub mod config;
pub mod error;
pub mod logging;
pub mod output;
pub mod sim;
pub mod soak;

// Re-export commonly used types
pub use config::{LogLevel, LoggingConfig, SimulationConfig, SlotpoolConfig, SoakConfig};
pub use error::{Result, SlotpoolError};
pub use output::OutputWriter;
pub use sim::{FactoryCounters, SimConnection, SimulatedFactory};
pub use soak::{PartitionReport, SoakCounters, SoakDriver, SoakReport};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
