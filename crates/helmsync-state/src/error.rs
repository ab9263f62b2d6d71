//! Error types for helmsync-state

use thiserror::Error;

use crate::schema::ResourceChange;

/// Errors that can occur in the release backend layer
#[derive(Error, Debug)]
pub enum BackendError {
    /// No history has ever been recorded for the release
    #[error("release not found: {release}")]
    ReleaseNotFound { release: String },

    /// Revision missing from a release's history
    #[error("revision {revision} not found for release {release}")]
    RevisionNotFound { release: String, revision: u64 },

    /// Transport or authentication failure talking to the cluster
    #[error("backend unreachable: {reason}")]
    Unreachable { reason: String },

    /// Apply aborted part way; `applied` lists the writes that did land
    #[error("apply failed after {} resource change(s): {reason}", .applied.len())]
    ApplyFailed {
        applied: Vec<ResourceChange>,
        reason: String,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BackendError {
    /// Whether the error means "nothing recorded yet" rather than a failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, BackendError::ReleaseNotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_failed_reports_change_count() {
        let err = BackendError::ApplyFailed {
            applied: vec![
                ResourceChange {
                    key: "a".to_string(),
                    previous: None,
                },
                ResourceChange {
                    key: "b".to_string(),
                    previous: Some("old".to_string()),
                },
            ],
            reason: "quota exceeded".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("2 resource change(s)"));
        assert!(msg.contains("quota exceeded"));
    }

    #[test]
    fn only_release_not_found_is_not_found() {
        assert!(BackendError::ReleaseNotFound {
            release: "ns/app".to_string()
        }
        .is_not_found());
        assert!(!BackendError::Unreachable {
            reason: "connection refused".to_string()
        }
        .is_not_found());
    }
}
