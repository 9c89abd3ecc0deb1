//! Pool counters and statistics snapshots

use serde::{Deserialize, Serialize};
use std::ops::AddAssign;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Monotonic counters updated lock-free by a pool
#[derive(Debug, Default)]
pub(crate) struct PoolCounters {
    created: AtomicU64,
    destroyed: AtomicU64,
    timed_out: AtomicU64,
    max_used: AtomicU64,
    total_block_time_ms: AtomicU64,
    max_wait_time_ms: AtomicU64,
}

impl PoolCounters {
    pub(crate) fn record_created(&self) {
        self.created.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_destroyed(&self, count: u64) {
        self.destroyed.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn record_timeout(&self) {
        self.timed_out.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_in_use(&self, in_use: usize) {
        self.max_used.fetch_max(in_use as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_wait(&self, waited: Duration) {
        let ms = waited.as_millis() as u64;
        self.total_block_time_ms.fetch_add(ms, Ordering::Relaxed);
        self.max_wait_time_ms.fetch_max(ms, Ordering::Relaxed);
    }

    pub(crate) fn created(&self) -> u64 {
        self.created.load(Ordering::Relaxed)
    }

    pub(crate) fn destroyed(&self) -> u64 {
        self.destroyed.load(Ordering::Relaxed)
    }

    pub(crate) fn timed_out(&self) -> u64 {
        self.timed_out.load(Ordering::Relaxed)
    }

    pub(crate) fn max_used(&self) -> u64 {
        self.max_used.load(Ordering::Relaxed)
    }

    pub(crate) fn total_block_time_ms(&self) -> u64 {
        self.total_block_time_ms.load(Ordering::Relaxed)
    }

    pub(crate) fn max_wait_time_ms(&self) -> u64 {
        self.max_wait_time_ms.load(Ordering::Relaxed)
    }
}

/// Point-in-time pool statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Free permits (leases that could start right now)
    pub available: u64,
    /// Resources currently leased
    pub in_use: u64,
    /// Resources sitting in the idle list
    pub idle: u64,
    /// High-water mark of `in_use`
    pub max_in_use: u64,
    /// Maximum pool size (sum across partitions when aggregated)
    pub max_size: u64,
    /// Resources created over the pool's lifetime
    pub created: u64,
    /// Resources destroyed over the pool's lifetime
    pub destroyed: u64,
    /// Leases that failed with a timeout
    pub timed_out: u64,
    /// Total time callers spent waiting for permits
    pub total_block_time_ms: u64,
    /// Longest single wait for a permit
    pub max_wait_time_ms: u64,
}

impl PoolStats {
    /// Get pool utilization as a percentage of `max_size`
    pub fn utilization(&self) -> f64 {
        if self.max_size == 0 {
            0.0
        } else {
            ((self.in_use + self.idle) as f64 / self.max_size as f64) * 100.0
        }
    }

    /// Resources still allocated according to the lifetime counters
    pub fn outstanding(&self) -> u64 {
        self.created.saturating_sub(self.destroyed)
    }
}

impl AddAssign<&PoolStats> for PoolStats {
    fn add_assign(&mut self, other: &PoolStats) {
        self.available += other.available;
        self.in_use += other.in_use;
        self.idle += other.idle;
        self.max_in_use += other.max_in_use;
        self.max_size += other.max_size;
        self.created += other.created;
        self.destroyed += other.destroyed;
        self.timed_out += other.timed_out;
        self.total_block_time_ms += other.total_block_time_ms;
        self.max_wait_time_ms += other.max_wait_time_ms;
    }
}

impl<'a> std::iter::Sum<&'a PoolStats> for PoolStats {
    fn sum<I: Iterator<Item = &'a PoolStats>>(iter: I) -> Self {
        iter.fold(PoolStats::default(), |mut acc, stats| {
            acc += stats;
            acc
        })
    }
}
