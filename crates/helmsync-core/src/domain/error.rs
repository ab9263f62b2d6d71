//! Domain-level error taxonomy for helmsync.

use helmsync_state::ReleaseId;
use serde::{Deserialize, Serialize};

/// Errors produced while building a `ReleaseSpec` or validating a request.
///
/// Never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("release name must not be empty")]
    EmptyName,

    #[error("invalid release name {name:?}: {reason}")]
    InvalidName { name: String, reason: String },

    #[error("chart reference must not be empty")]
    EmptyChartRef,

    #[error("invalid namespace {namespace:?}: {reason}")]
    InvalidNamespace { namespace: String, reason: String },

    #[error("max_history must be >= 0, got {value}")]
    NegativeMaxHistory { value: i64 },

    #[error("value key must not be empty (under {parent:?})")]
    EmptyValueKey { parent: String },

    #[error("value {key:?} is null")]
    NullValue { key: String },

    #[error("invalid namespace label {key:?}: {reason}")]
    InvalidLabel { key: String, reason: String },

    #[error("malformed {format} release config: {reason}")]
    MalformedConfig { format: &'static str, reason: String },

    #[error("cannot read config {path}: {reason}")]
    UnreadableConfig { path: String, reason: String },

    #[error("no revision of {release} to roll back to")]
    NoRollbackTarget { release: String },

    #[error("revision {revision} of {release} {reason}")]
    InvalidRollbackTarget {
        release: String,
        revision: u64,
        reason: String,
    },
}

/// The cluster could not be read (transport or auth failure).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cluster unreachable for {release}: {reason}")]
pub struct ClusterUnreachableError {
    pub release: String,
    pub reason: String,
}

/// An apply attempt failed. Terminal for the attempt; never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("apply of {release} revision {revision} failed{}: {reason}", rollback_suffix(.rolled_back))]
pub struct ApplyError {
    pub release: ReleaseId,
    pub revision: u64,
    pub reason: String,
    /// Whether a compensating rollback reverted the attempt.
    pub rolled_back: bool,
}

fn rollback_suffix(rolled_back: &bool) -> &'static str {
    if *rolled_back {
        " (rolled back)"
    } else {
        ""
    }
}

/// Errors surfaced by a reconciliation pass.
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("{last} (after {attempts} attempt(s))")]
    ClusterUnreachable {
        attempts: u32,
        #[source]
        last: ClusterUnreachableError,
    },

    #[error(transparent)]
    Apply(#[from] ApplyError),

    #[error("fatal inconsistency in {release}: rollback of revision {revision} left residue in [{}]", .residue.join(", "))]
    FatalInconsistency {
        release: ReleaseId,
        revision: u64,
        residue: Vec<String>,
    },

    #[error("timed out after {elapsed_ms}ms before apply started")]
    Timeout { elapsed_ms: u64 },
}

/// Coarse error classification carried in reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    Validation,
    ClusterUnreachable,
    ApplyFailed,
    FatalInconsistency,
    Timeout,
}

impl ErrorKind {
    /// Process exit code for this failure class.
    pub fn exit_code(&self) -> i32 {
        match self {
            ErrorKind::Validation => 2,
            ErrorKind::ClusterUnreachable => 3,
            ErrorKind::ApplyFailed => 4,
            ErrorKind::FatalInconsistency => 5,
            ErrorKind::Timeout => 6,
        }
    }
}

impl ReconcileError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ReconcileError::Validation(_) => ErrorKind::Validation,
            ReconcileError::ClusterUnreachable { .. } => ErrorKind::ClusterUnreachable,
            ReconcileError::Apply(_) => ErrorKind::ApplyFailed,
            ReconcileError::FatalInconsistency { .. } => ErrorKind::FatalInconsistency,
            ReconcileError::Timeout { .. } => ErrorKind::Timeout,
        }
    }

    /// Revision the failure is attached to, if an apply attempt was started.
    pub fn revision(&self) -> Option<u64> {
        match self {
            ReconcileError::Apply(e) => Some(e.revision),
            ReconcileError::FatalInconsistency { revision, .. } => Some(*revision),
            _ => None,
        }
    }
}

/// Result type for helmsync domain operations.
pub type Result<T> = std::result::Result<T, ReconcileError>;
