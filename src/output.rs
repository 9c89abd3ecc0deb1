//! Report writer supporting JSON and human-readable modes.

use crate::cli_style::{self, format_duration, pool_table, stats_table, PoolRow};
use crate::config::SlotpoolConfig;
use crate::error::Result;
use crate::soak::{PartitionReport, SoakReport};

/// Output mode for CLI results
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Human,
    Json,
}

/// Writes command results to stdout in the selected mode
#[derive(Debug, Clone)]
pub struct OutputWriter {
    pub mode: OutputMode,
}

impl OutputWriter {
    pub fn new(json: bool) -> Self {
        Self {
            mode: if json { OutputMode::Json } else { OutputMode::Human },
        }
    }

    pub fn is_json(&self) -> bool {
        self.mode == OutputMode::Json
    }

    /// Print the outcome of a soak run
    pub fn soak_report(&self, report: &SoakReport) -> Result<()> {
        match self.mode {
            OutputMode::Json => println!("{}", serde_json::to_string(report)?),
            OutputMode::Human => print!("{}", render_soak_report(report)),
        }
        Ok(())
    }

    /// Print the effective configuration
    pub fn config(&self, config: &SlotpoolConfig) -> Result<()> {
        match self.mode {
            OutputMode::Json => println!("{}", serde_json::to_string_pretty(config)?),
            OutputMode::Human => print!("{}", config.to_toml()?),
        }
        Ok(())
    }
}

/// Label a partition as `principal / database`
pub fn partition_label(partition: &PartitionReport) -> String {
    format!(
        "{} / {}",
        partition.principal.as_deref().unwrap_or("*"),
        partition.database.as_deref().unwrap_or("*")
    )
}

/// Human-readable rendering of a soak report
pub fn render_soak_report(report: &SoakReport) -> String {
    let mut out = String::new();

    let summary = stats_table(&[
        ("Threads", report.threads.to_string()),
        ("Elapsed", format_duration(report.elapsed_ms as f64 / 1000.0)),
        ("Leases", report.leases.to_string()),
        ("Throughput", format!("{:.1} leases/s", report.throughput())),
        ("Transactions", report.transactions.to_string()),
        ("Invalidated", report.invalidations.to_string()),
        ("Timeouts", report.timeouts.to_string()),
        ("Creation failures", report.creation_failures.to_string()),
        ("Rejected (closed)", report.closed.to_string()),
    ]);
    out.push_str(&format!("\nSoak summary\n{}\n", summary));

    let mut partitions: Vec<&PartitionReport> = report.partitions.iter().collect();
    partitions.sort_by_key(|p| (p.principal.clone(), p.database.clone()));

    let rows: Vec<PoolRow<'_>> = partitions
        .iter()
        .map(|p| PoolRow {
            label: partition_label(p),
            stats: &p.stats,
        })
        .chain(std::iter::once(PoolRow {
            label: "total".to_string(),
            stats: &report.totals,
        }))
        .collect();
    out.push_str(&format!("\nPartitions\n{}\n", pool_table(&rows)));

    let factory = &report.factory;
    let backend = stats_table(&[
        ("Opened", factory.created.to_string()),
        ("Closed", factory.destroyed.to_string()),
        ("Connect failures", factory.create_failures.to_string()),
        ("Probe failures", factory.match_failures.to_string()),
        ("Reset failures", factory.cleanup_failures.to_string()),
        ("Validation rejections", factory.validation_rejections.to_string()),
    ]);
    out.push_str(&format!("\nBackend\n{}\n", backend));

    if report.failures() == 0 {
        out.push_str(&format!(
            "\n{} All {} lease attempts succeeded\n",
            cli_style::Icons::SUCCESS,
            report.attempted()
        ));
    }

    out
}
