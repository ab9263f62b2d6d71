//! Global atomic counters for helmsync observability.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (e.g. at the end of a CLI invocation).

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lightweight atomic counters, no allocations, no locking.
pub struct Metrics {
    reconciles: AtomicU64,
    noops: AtomicU64,
    applies: AtomicU64,
    apply_failures: AtomicU64,
    retries: AtomicU64,
    revisions_pruned: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            reconciles: AtomicU64::new(0),
            noops: AtomicU64::new(0),
            applies: AtomicU64::new(0),
            apply_failures: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            revisions_pruned: AtomicU64::new(0),
        }
    }

    pub fn inc_reconciles(&self) {
        self.reconciles.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "reconciles", "counter incremented");
    }

    pub fn inc_noops(&self) {
        self.noops.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "noops", "counter incremented");
    }

    /// Count one apply attempt that reached the backend.
    pub fn inc_applies(&self) {
        self.applies.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "applies", "counter incremented");
    }

    pub fn inc_apply_failures(&self) {
        self.apply_failures.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "apply_failures", "counter incremented");
    }

    pub fn inc_retries(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "retries", "counter incremented");
    }

    pub fn add_revisions_pruned(&self, n: u64) {
        self.revisions_pruned.fetch_add(n, Ordering::Relaxed);
        tracing::trace!(metric = "revisions_pruned", n, "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            reconciles = self.reconciles(),
            noops = self.noops(),
            applies = self.applies(),
            apply_failures = self.apply_failures(),
            retries = self.retries(),
            revisions_pruned = self.revisions_pruned(),
        );
    }

    pub fn reconciles(&self) -> u64 {
        self.reconciles.load(Ordering::Relaxed)
    }

    pub fn noops(&self) -> u64 {
        self.noops.load(Ordering::Relaxed)
    }

    pub fn applies(&self) -> u64 {
        self.applies.load(Ordering::Relaxed)
    }

    pub fn apply_failures(&self) -> u64 {
        self.apply_failures.load(Ordering::Relaxed)
    }

    pub fn retries(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }

    pub fn revisions_pruned(&self) -> u64 {
        self.revisions_pruned.load(Ordering::Relaxed)
    }
}
