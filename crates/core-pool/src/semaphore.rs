//! Counting semaphore with bounded waits
//!
//! Permits are the unit of admission control for a [`SlotPool`](crate::SlotPool):
//! one permit per resource that is leased, being created, or being validated.
//! Pool code detaches permits with [`Permit::forget`] once ownership moves to a
//! [`Lease`](crate::Lease) and hands them back with [`PermitGate::release`].

use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};
use tracing::warn;

/// A counting semaphore whose waits are always bounded by a timeout
#[derive(Debug)]
pub struct PermitGate {
    available: Mutex<usize>,
    condvar: Condvar,
    max: usize,
}

impl PermitGate {
    /// Create a gate holding `max` permits
    pub fn new(max: usize) -> Self {
        Self {
            available: Mutex::new(max),
            condvar: Condvar::new(),
            max,
        }
    }

    /// Acquire a permit, waiting at most `timeout`
    ///
    /// Returns `None` when the deadline passes without a permit freeing up.
    pub fn acquire_timeout(&self, timeout: Duration) -> Option<Permit<'_>> {
        let deadline = Instant::now() + timeout;
        let mut available = self.available.lock();

        while *available == 0 {
            if self.condvar.wait_until(&mut available, deadline).timed_out() && *available == 0 {
                return None;
            }
        }

        *available -= 1;
        Some(Permit { gate: self })
    }

    /// Try to acquire a permit without blocking
    pub fn try_acquire(&self) -> Option<Permit<'_>> {
        let mut available = self.available.lock();

        if *available > 0 {
            *available -= 1;
            Some(Permit { gate: self })
        } else {
            None
        }
    }

    /// Return one detached permit to the gate
    pub fn release(&self) {
        let mut available = self.available.lock();
        if *available >= self.max {
            warn!(max = self.max, "Permit released more often than acquired; ignoring");
            return;
        }
        *available += 1;
        self.condvar.notify_one();
    }

    /// Maximum number of permits
    pub fn max(&self) -> usize {
        self.max
    }

    /// Number of permits currently free
    pub fn available(&self) -> usize {
        *self.available.lock()
    }
}

/// A permit borrowed from a [`PermitGate`], returned on drop
#[must_use = "dropping a permit returns it to the gate immediately"]
#[derive(Debug)]
pub struct Permit<'a> {
    gate: &'a PermitGate,
}

impl Permit<'_> {
    /// Detach the permit from this guard; the caller must later call
    /// [`PermitGate::release`] exactly once
    pub fn forget(self) {
        std::mem::forget(self);
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        self.gate.release();
    }
}
