//! Global atomic counters for verification runs.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (e.g. when the CLI exits).

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lightweight atomic counters, no allocations and no locking.
pub struct Metrics {
    runs_started: AtomicU64,
    runs_passed: AtomicU64,
    runs_failed: AtomicU64,
    scanner_degraded: AtomicU64,
    notifications_failed: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            runs_started: AtomicU64::new(0),
            runs_passed: AtomicU64::new(0),
            runs_failed: AtomicU64::new(0),
            scanner_degraded: AtomicU64::new(0),
            notifications_failed: AtomicU64::new(0),
        }
    }

    pub fn inc_runs_started(&self) {
        self.runs_started.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "runs_started", "counter incremented");
    }

    pub fn inc_runs_passed(&self) {
        self.runs_passed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "runs_passed", "counter incremented");
    }

    pub fn inc_runs_failed(&self) {
        self.runs_failed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "runs_failed", "counter incremented");
    }

    /// A scan stage that continued without a verdict.
    pub fn inc_scanner_degraded(&self) {
        self.scanner_degraded.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "scanner_degraded", "counter incremented");
    }

    /// A single channel delivery that failed.
    pub fn inc_notifications_failed(&self) {
        self.notifications_failed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "notifications_failed", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            runs_started = self.runs_started(),
            runs_passed = self.runs_passed(),
            runs_failed = self.runs_failed(),
            scanner_degraded = self.scanner_degraded(),
            notifications_failed = self.notifications_failed(),
        );
    }

    pub fn runs_started(&self) -> u64 {
        self.runs_started.load(Ordering::Relaxed)
    }

    pub fn runs_passed(&self) -> u64 {
        self.runs_passed.load(Ordering::Relaxed)
    }

    pub fn runs_failed(&self) -> u64 {
        self.runs_failed.load(Ordering::Relaxed)
    }

    pub fn scanner_degraded(&self) -> u64 {
        self.scanner_degraded.load(Ordering::Relaxed)
    }

    pub fn notifications_failed(&self) -> u64 {
        self.notifications_failed.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.runs_started.store(0, Ordering::Relaxed);
        self.runs_passed.store(0, Ordering::Relaxed);
        self.runs_failed.store(0, Ordering::Relaxed);
        self.scanner_degraded.store(0, Ordering::Relaxed);
        self.notifications_failed.store(0, Ordering::Relaxed);
    }
}
