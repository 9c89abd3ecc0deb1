//! Pool and router configuration
//!
//! Both structs deserialize from partial documents: every field has a
//! default, so a config file only names what it overrides.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for one [`SlotPool`](crate::SlotPool)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Number of resources fill-to-minimum keeps allocated
    pub min_size: usize,

    /// Maximum number of resources allocated at once (permit count)
    pub max_size: usize,

    /// How long `lease()` waits for a permit before failing
    pub blocking_timeout_ms: u64,

    /// How long a returned resource may sit idle before the reaper destroys it
    pub idle_timeout_ms: u64,

    /// Minimum age of the last validation before the background validator
    /// re-checks an idle resource (0 = background validation disabled)
    pub background_validation_interval_ms: u64,

    /// Fill to `min_size` as soon as the pool is created
    pub prefill: bool,

    /// Never let idle eviction shrink the pool below `min_size`
    pub strict_min: bool,

    /// Stop scanning idle resources after the first match failure
    pub fast_fail: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_size: 0,
            max_size: 10,
            blocking_timeout_ms: 30_000,
            idle_timeout_ms: 1_800_000, // 30 minutes
            background_validation_interval_ms: 0,
            prefill: false,
            strict_min: false,
            fast_fail: false,
        }
    }
}

impl PoolConfig {
    /// Blocking timeout as a [`Duration`]
    pub fn blocking_timeout(&self) -> Duration {
        Duration::from_millis(self.blocking_timeout_ms)
    }

    /// Idle timeout, or `None` when idle reaping is disabled (0)
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_ms > 0).then(|| Duration::from_millis(self.idle_timeout_ms))
    }

    /// Background validation interval, or `None` when disabled (0)
    pub fn background_validation_interval(&self) -> Option<Duration> {
        (self.background_validation_interval_ms > 0)
            .then(|| Duration::from_millis(self.background_validation_interval_ms))
    }

    /// Validate the configuration
    ///
    /// Returns an error message if the combination cannot work.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_size == 0 {
            return Err("max_size must be at least 1".to_string());
        }

        if self.min_size > self.max_size {
            return Err(format!(
                "min_size ({}) must not exceed max_size ({})",
                self.min_size, self.max_size
            ));
        }

        if self.blocking_timeout_ms == 0 {
            return Err("blocking_timeout_ms must be greater than 0".to_string());
        }

        Ok(())
    }
}

/// How a request is mapped onto a partition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionStrategy {
    /// Every request shares one pool
    Single,
    /// One pool per distinct request criteria
    ByCriteria,
    /// One pool per distinct principal
    ByPrincipal,
    /// One pool per (principal, criteria) pair
    #[default]
    ByPrincipalAndCriteria,
}

impl PartitionStrategy {
    /// Whether the principal participates in the partition key
    pub fn uses_principal(self) -> bool {
        matches!(
            self,
            PartitionStrategy::ByPrincipal | PartitionStrategy::ByPrincipalAndCriteria
        )
    }

    /// Whether the request criteria participate in the partition key
    pub fn uses_criteria(self) -> bool {
        matches!(
            self,
            PartitionStrategy::ByCriteria | PartitionStrategy::ByPrincipalAndCriteria
        )
    }
}

/// Configuration for a [`PartitionedRouter`](crate::PartitionedRouter)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Which request attributes select the partition
    pub strategy: PartitionStrategy,

    /// Hand the same lease to every request of one active transaction
    pub track_by_transaction: bool,

    /// Keep non-transactional usage of a transactional resource in its own
    /// partition
    pub no_tx_separate_pools: bool,

    /// Drop a partition from the router once idle eviction leaves it empty
    pub remove_empty_pools: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            strategy: PartitionStrategy::default(),
            track_by_transaction: true,
            no_tx_separate_pools: false,
            remove_empty_pools: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_pool_config() {
        let config = PoolConfig::default();

        assert_eq!(config.min_size, 0);
        assert_eq!(config.max_size, 10);
        assert_eq!(config.blocking_timeout(), Duration::from_secs(30));
        assert_eq!(config.idle_timeout(), Some(Duration::from_secs(30 * 60)));
        assert_eq!(config.background_validation_interval(), None);
        assert!(!config.prefill);
        assert!(!config.strict_min);
        assert!(!config.fast_fail);

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_failures() {
        let mut config = PoolConfig::default();

        config.max_size = 0;
        assert!(config.validate().is_err());
        config.max_size = 2;

        config.min_size = 3;
        assert!(config.validate().is_err());
        config.min_size = 2;
        assert!(config.validate().is_ok());

        config.blocking_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_idle_timeout_disables_reaping() {
        let config = PoolConfig {
            idle_timeout_ms: 0,
            ..Default::default()
        };
        assert_eq!(config.idle_timeout(), None);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: PoolConfig = toml::from_str("max_size = 3\nfast_fail = true\n").unwrap();

        assert_eq!(config.max_size, 3);
        assert!(config.fast_fail);
        assert_eq!(config.blocking_timeout_ms, 30_000);
    }

    #[test]
    fn test_router_config_parsing() {
        let config: RouterConfig =
            toml::from_str("strategy = \"by_criteria\"\nno_tx_separate_pools = true\n").unwrap();

        assert_eq!(config.strategy, PartitionStrategy::ByCriteria);
        assert!(config.no_tx_separate_pools);
        assert!(config.track_by_transaction);
        assert!(!config.remove_empty_pools);
    }

    #[test]
    fn test_strategy_fields() {
        assert!(!PartitionStrategy::Single.uses_principal());
        assert!(!PartitionStrategy::Single.uses_criteria());
        assert!(PartitionStrategy::ByCriteria.uses_criteria());
        assert!(!PartitionStrategy::ByCriteria.uses_principal());
        assert!(PartitionStrategy::ByPrincipal.uses_principal());
        assert!(PartitionStrategy::ByPrincipalAndCriteria.uses_principal());
        assert!(PartitionStrategy::ByPrincipalAndCriteria.uses_criteria());
    }
}
