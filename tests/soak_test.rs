/*!
 * Integration tests for the soak driver
 *
 * Short runs against the simulated backend:
 * - A healthy backend serves every lease and leaves nothing checked out
 * - Injected connect failures surface as a partial-failure exit code
 * - A tiny pool under contention reports timeouts
 */

use slotpool::{
    config::SlotpoolConfig,
    error::{SlotpoolError, EXIT_PARTIAL},
    output::render_soak_report,
    soak::SoakDriver,
};
use slotpool_core::PartitionStrategy;

fn quick_config() -> SlotpoolConfig {
    let mut config = SlotpoolConfig::default();
    config.soak.threads = 4;
    config.soak.duration_secs = 1;
    config.soak.hold_min_ms = 0;
    config.soak.hold_max_ms = 3;
    config.simulation.create_latency_ms = 0;
    config.pool.blocking_timeout_ms = 5_000;
    config
}

#[test]
fn test_healthy_run_leaves_pools_drained() -> anyhow::Result<()> {
    let report = SoakDriver::new(quick_config())?.run(|_, _| {})?;

    assert!(report.leases > 0);
    assert_eq!(report.failures(), 0);
    assert_eq!(report.totals.in_use, 0);
    // Shutdown destroys every resource the factory ever created
    assert_eq!(report.factory.created, report.factory.destroyed);

    // 4 principals x 2 databases at most
    assert!(report.partitions.len() <= 8);
    for partition in &report.partitions {
        assert!(partition.stats.max_in_use <= partition.stats.max_size);
    }

    let rendered = render_soak_report(&report);
    assert!(rendered.contains("Partitions"));
    assert!(report.into_result().is_ok());
    Ok(())
}

#[test]
fn test_single_strategy_uses_one_partition() -> anyhow::Result<()> {
    let mut config = quick_config();
    config.router.strategy = PartitionStrategy::Single;
    config.router.track_by_transaction = false;

    let report = SoakDriver::new(config)?.run(|_, _| {})?;

    assert_eq!(report.partitions.len(), 1);
    assert_eq!(report.partitions[0].principal, None);
    assert_eq!(report.partitions[0].database, None);
    assert!(report.totals.max_in_use <= 10);
    Ok(())
}

#[test]
fn test_connect_failures_are_partial() -> anyhow::Result<()> {
    let mut config = quick_config();
    config.simulation.create_failure_rate = 1.0;

    let report = SoakDriver::new(config)?.run(|_, _| {})?;

    assert_eq!(report.leases, 0);
    assert!(report.creation_failures > 0);
    assert_eq!(report.factory.created, 0);
    assert_eq!(report.totals.in_use, 0);

    let err = report.into_result().unwrap_err();
    assert!(matches!(err, SlotpoolError::LeaseFailures { .. }));
    assert_eq!(err.exit_code(), EXIT_PARTIAL);
    Ok(())
}

#[test]
fn test_contention_on_tiny_pool_times_out() -> anyhow::Result<()> {
    let mut config = quick_config();
    config.router.strategy = PartitionStrategy::Single;
    config.router.track_by_transaction = false;
    config.pool.max_size = 1;
    config.pool.blocking_timeout_ms = 1;
    config.soak.threads = 8;
    config.soak.hold_min_ms = 20;
    config.soak.hold_max_ms = 20;

    let report = SoakDriver::new(config)?.run(|_, _| {})?;

    assert!(report.leases > 0);
    assert!(report.timeouts > 0);
    assert_eq!(report.totals.max_in_use, 1);
    assert_eq!(report.totals.timed_out, report.timeouts);
    Ok(())
}
