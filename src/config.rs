/*!
 * Configuration for the slotpool application
 *
 * Loaded from a TOML file with `[pool]`, `[router]`, `[logging]`, `[soak]`
 * and `[simulation]` sections. Every field has a default, so a file only
 * names what it overrides and a missing file means all defaults.
 */

use crate::error::{Result, SlotpoolError};
use serde::{Deserialize, Serialize};
use slotpool_core::{PoolConfig, RouterConfig};
use std::path::{Path, PathBuf};

/// Top-level application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlotpoolConfig {
    /// Parameters every partition pool is created with
    pub pool: PoolConfig,

    /// Partitioning and transaction affinity
    pub router: RouterConfig,

    /// Diagnostic output
    pub logging: LoggingConfig,

    /// Soak-test workload
    pub soak: SoakConfig,

    /// Simulated backend behaviour
    pub simulation: SimulationConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: LogLevel,

    /// Log file path (None = stderr)
    pub file: Option<PathBuf>,

    /// Enable verbose logging (shorthand for level = debug)
    pub verbose: bool,
}

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Only errors
    Error,

    /// Warnings and errors
    Warn,

    /// Info, warnings, and errors
    #[default]
    Info,

    /// Debug and above
    Debug,

    /// All messages including traces
    Trace,
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

/// Soak-test workload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SoakConfig {
    /// Number of worker threads
    pub threads: usize,

    /// How long the workload runs
    pub duration_secs: u64,

    /// Number of distinct principals (`user-0` .. `user-N`)
    pub principals: usize,

    /// Criteria values requests are spread over
    pub databases: Vec<String>,

    /// Fraction of units of work that run inside a transaction
    pub transaction_ratio: f64,

    /// Upper bound on requests issued by one transaction
    pub max_requests_per_tx: u32,

    /// Shortest time a lease is held
    pub hold_min_ms: u64,

    /// Longest time a lease is held
    pub hold_max_ms: u64,

    /// Fraction of plain leases the caller invalidates before release
    pub invalidate_ratio: f64,
}

impl Default for SoakConfig {
    fn default() -> Self {
        Self {
            threads: 8,
            duration_secs: 10,
            principals: 4,
            databases: vec!["orders".to_string(), "billing".to_string()],
            transaction_ratio: 0.25,
            max_requests_per_tx: 3,
            hold_min_ms: 1,
            hold_max_ms: 20,
            invalidate_ratio: 0.01,
        }
    }
}

/// Behaviour of the simulated backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Upper bound on the random latency of creating a connection
    pub create_latency_ms: u64,

    /// Probability that creating a connection fails
    pub create_failure_rate: f64,

    /// Probability that checking an idle connection errors out
    pub match_failure_rate: f64,

    /// Probability that resetting a returned connection fails
    pub cleanup_failure_rate: f64,

    /// Probability that background validation rejects an idle connection
    pub validation_failure_rate: f64,

    /// Whether connections take part in transactions
    pub transactional: bool,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            create_latency_ms: 5,
            create_failure_rate: 0.0,
            match_failure_rate: 0.0,
            cleanup_failure_rate: 0.0,
            validation_failure_rate: 0.0,
            transactional: true,
        }
    }
}

impl SlotpoolConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            SlotpoolError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: SlotpoolConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` if given, else use defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    /// Render the configuration as TOML
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    /// Validate every section
    pub fn validate(&self) -> Result<()> {
        self.pool
            .validate()
            .map_err(|e| SlotpoolError::Config(format!("[pool] {}", e)))?;

        let soak = &self.soak;
        if soak.threads == 0 {
            return Err(SlotpoolError::Config(
                "[soak] threads must be at least 1".to_string(),
            ));
        }
        if soak.principals == 0 || soak.databases.is_empty() {
            return Err(SlotpoolError::Config(
                "[soak] needs at least one principal and one database".to_string(),
            ));
        }
        if soak.max_requests_per_tx == 0 {
            return Err(SlotpoolError::Config(
                "[soak] max_requests_per_tx must be at least 1".to_string(),
            ));
        }
        if soak.hold_min_ms > soak.hold_max_ms {
            return Err(SlotpoolError::Config(format!(
                "[soak] hold_min_ms ({}) exceeds hold_max_ms ({})",
                soak.hold_min_ms, soak.hold_max_ms
            )));
        }

        let sim = &self.simulation;
        let rates = [
            ("soak.transaction_ratio", soak.transaction_ratio),
            ("soak.invalidate_ratio", soak.invalidate_ratio),
            ("simulation.create_failure_rate", sim.create_failure_rate),
            ("simulation.match_failure_rate", sim.match_failure_rate),
            ("simulation.cleanup_failure_rate", sim.cleanup_failure_rate),
            ("simulation.validation_failure_rate", sim.validation_failure_rate),
        ];
        for (name, rate) in rates {
            if !(0.0..=1.0).contains(&rate) {
                return Err(SlotpoolError::Config(format!(
                    "{} must be between 0.0 and 1.0, got {}",
                    name, rate
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotpool_core::PartitionStrategy;

    #[test]
    fn test_default_config_is_valid() {
        let config = SlotpoolConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.pool.max_size, 10);
        assert_eq!(config.logging.level, LogLevel::Info);
        assert_eq!(config.soak.threads, 8);
        assert!(config.simulation.transactional);
    }

    #[test]
    fn test_partial_document() {
        let toml_str = r#"
            [pool]
            max_size = 3
            fast_fail = true

            [router]
            strategy = "by_principal"

            [logging]
            level = "debug"

            [simulation]
            create_failure_rate = 0.1
        "#;

        let config: SlotpoolConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.pool.max_size, 3);
        assert!(config.pool.fast_fail);
        assert_eq!(config.pool.blocking_timeout_ms, 30_000);
        assert_eq!(config.router.strategy, PartitionStrategy::ByPrincipal);
        assert!(config.router.track_by_transaction);
        assert_eq!(config.logging.level, LogLevel::Debug);
        assert_eq!(config.simulation.create_failure_rate, 0.1);
        assert_eq!(config.soak, SoakConfig::default());
    }

    #[test]
    fn test_toml_round_trip() {
        let mut config = SlotpoolConfig::default();
        config.pool.min_size = 2;
        config.logging.file = Some(PathBuf::from("/tmp/slotpool.log"));

        let rendered = config.to_toml().unwrap();
        let parsed: SlotpoolConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_rejects_out_of_range_rates() {
        let mut config = SlotpoolConfig::default();
        config.simulation.match_failure_rate = 1.5;

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("simulation.match_failure_rate"));
    }

    #[test]
    fn test_rejects_bad_pool_section() {
        let mut config = SlotpoolConfig::default();
        config.pool.min_size = 20;

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("[pool]"));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_rejects_inverted_hold_range() {
        let mut config = SlotpoolConfig::default();
        config.soak.hold_min_ms = 50;
        config.soak.hold_max_ms = 10;

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_log_level_conversion() {
        assert_eq!(LogLevel::Error.to_tracing_level(), tracing::Level::ERROR);
        assert_eq!(LogLevel::Warn.to_tracing_level(), tracing::Level::WARN);
        assert_eq!(LogLevel::Info.to_tracing_level(), tracing::Level::INFO);
        assert_eq!(LogLevel::Debug.to_tracing_level(), tracing::Level::DEBUG);
        assert_eq!(LogLevel::Trace.to_tracing_level(), tracing::Level::TRACE);
    }
}
