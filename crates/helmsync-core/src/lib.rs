//! helmsync Core Library
//!
//! Declarative release reconciliation: validate a desired release
//! configuration, read what is deployed, diff the two and apply the
//! difference as a new revision, with optional atomic rollback.
//!
//! ## Layer 1 - Reconciliation
//!
//! - `domain`: descriptor building, reports, error taxonomy
//! - `reader` / `diff` / `applier`: the read-diff-apply pipeline
//! - `reconciler`: per-release locking, retries and the pre-apply deadline

pub mod applier;
pub mod config;
pub mod diff;
pub mod domain;
pub mod lock;
pub mod metrics;
pub mod obs;
pub mod reader;
pub mod reconciler;
pub mod retention;
pub mod retry;
pub mod telemetry;

pub use applier::ReleaseApplier;
pub use config::{load_release_config, parse_release_config, ConfigFormat, ReconcilerConfig};
pub use diff::{compute as compute_diff, DiffAction, DiffResult};
pub use domain::{
    aggregate_exit_code, build, release_id, ApplyError, ClusterUnreachableError, ErrorKind,
    RawReleaseConfig, ReconcileAction, ReconcileError, ReconcileReport, Result, SetEntry,
    ValidationError,
};
pub use lock::{LockRegistry, ReleaseGuard};
pub use reconciler::Reconciler;
pub use retention::{plan_prune, PrunePlan};
pub use retry::RetryPolicy;

pub use helmsync_state::{
    BackendError, FsReleaseBackend, ReleaseBackend, ReleaseId, ReleaseRevision, ReleaseSpec,
    RevisionStatus,
};

/// Crate version, reported by the CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
