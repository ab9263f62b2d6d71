//! Structured observability hooks for reconciliation lifecycle events.
//!
//! This module provides:
//! - Release-scoped tracing spans via [`reconcile_span`], attached to futures
//!   with `tracing::Instrument`
//! - Emission functions for key lifecycle events: start, decision, apply,
//!   rollback, prune, finish
//!
//! Events are emitted at `info!` level (filter with `RUST_LOG`).

use tracing::{info, warn, Span};

use crate::domain::ReconcileReport;

/// Span tagging every event of one reconciliation with its release.
///
/// ```ignore
/// drive(raw).instrument(reconcile_span("prometheus/prometheus-adapter")).await;
/// ```
pub fn reconcile_span(release: &str) -> Span {
    tracing::info_span!("helmsync.reconcile", release = %release)
}

/// Emit event: reconciliation started.
pub fn emit_reconcile_started(release: &str) {
    info!(event = "reconcile.started", release = %release);
}

/// Emit event: diff decided on an action.
pub fn emit_diff_decided(release: &str, action: &str, changed_keys: usize, chart_changed: bool) {
    info!(
        event = "reconcile.diff",
        release = %release,
        action = %action,
        changed_keys = changed_keys,
        chart_changed = chart_changed,
    );
}

/// Emit event: an apply attempt was handed to the backend.
pub fn emit_apply_started(release: &str, revision: u64, attempt_id: &str) {
    info!(
        event = "apply.started",
        release = %release,
        revision = revision,
        attempt_id = %attempt_id,
    );
}

/// Emit event: apply attempt finished.
pub fn emit_apply_finished(release: &str, revision: u64, status: &str) {
    info!(
        event = "apply.finished",
        release = %release,
        revision = revision,
        status = %status,
    );
}

/// Emit event: atomic attempt reverted (warning level).
pub fn emit_rolled_back(release: &str, revision: u64, changes: usize) {
    warn!(
        event = "apply.rolled_back",
        release = %release,
        revision = revision,
        changes = changes,
    );
}

/// Emit event: revisions pruned from history.
pub fn emit_pruned(release: &str, evicted: &[u64]) {
    info!(event = "history.pruned", release = %release, evicted = ?evicted);
}

/// Emit event: reconciliation finished, successfully or not.
pub fn emit_reconcile_finished(report: &ReconcileReport) {
    let action = report.action.map(|a| a.to_string()).unwrap_or_default();
    if let Some(error) = &report.error {
        warn!(
            event = "reconcile.failed",
            release = %report.release,
            action = %action,
            exit_code = report.exit_code(),
            duration_ms = report.duration_ms,
            error = %error,
        );
    } else {
        info!(
            event = "reconcile.finished",
            release = %report.release,
            action = %action,
            revision = ?report.revision,
            duration_ms = report.duration_ms,
        );
    }
}
