//! Reconcile reports: the outcome of one reconciliation or rollback.

use helmsync_state::RevisionStatus;
use serde::{Deserialize, Serialize};

use super::error::{ErrorKind, ReconcileError};
use crate::diff::DiffAction;

/// Action a reconciliation decided on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReconcileAction {
    Noop,
    Install,
    Upgrade,
    Rollback,
}

impl From<DiffAction> for ReconcileAction {
    fn from(action: DiffAction) -> Self {
        match action {
            DiffAction::Noop => ReconcileAction::Noop,
            DiffAction::Install => ReconcileAction::Install,
            DiffAction::Upgrade => ReconcileAction::Upgrade,
        }
    }
}

impl std::fmt::Display for ReconcileAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ReconcileAction::Noop => "noop",
            ReconcileAction::Install => "install",
            ReconcileAction::Upgrade => "upgrade",
            ReconcileAction::Rollback => "rollback",
        };
        f.write_str(s)
    }
}

/// Outcome of one reconciliation, suitable for logging and exit-code mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconcileReport {
    /// `namespace/name` of the release.
    pub release: String,
    /// Decided action; `None` if the pass failed before diffing.
    pub action: Option<ReconcileAction>,
    pub changed_keys: Vec<String>,
    /// Revision created or observed.
    pub revision: Option<u64>,
    pub status: Option<RevisionStatus>,
    pub error_kind: Option<ErrorKind>,
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl ReconcileReport {
    pub fn new(release: impl Into<String>) -> Self {
        Self {
            release: release.into(),
            action: None,
            changed_keys: Vec::new(),
            revision: None,
            status: None,
            error_kind: None,
            error: None,
            duration_ms: 0,
        }
    }

    /// Record a failure. An apply failure also pins the failed revision.
    pub fn fail(&mut self, err: &ReconcileError) {
        self.error_kind = Some(err.kind());
        self.error = Some(err.to_string());
        if let Some(revision) = err.revision() {
            self.revision = Some(revision);
            self.status = Some(RevisionStatus::Failed);
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// 0 for noop/deployed, the error kind's code otherwise.
    pub fn exit_code(&self) -> i32 {
        match (self.error_kind, &self.error) {
            (Some(kind), _) => kind.exit_code(),
            (None, Some(_)) => 1,
            (None, None) => 0,
        }
    }
}

impl std::fmt::Display for ReconcileReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.release)?;
        if let Some(action) = self.action {
            write!(f, " action={}", action)?;
        }
        if let Some(revision) = self.revision {
            write!(f, " revision={}", revision)?;
        }
        if let Some(status) = self.status {
            write!(f, " status={}", status)?;
        }
        if !self.changed_keys.is_empty() {
            write!(f, " changed=[{}]", self.changed_keys.join(","))?;
        }
        if let Some(error) = &self.error {
            write!(f, " error=\"{}\"", error)?;
        }
        Ok(())
    }
}

/// Worst exit code across reports (0 if all succeeded).
pub fn aggregate_exit_code(reports: &[ReconcileReport]) -> i32 {
    reports
        .iter()
        .map(ReconcileReport::exit_code)
        .max()
        .unwrap_or(0)
}
