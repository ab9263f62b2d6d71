//! Record definitions for helmsync release state
//!
//! Records:
//! - `ReleaseId`: (name, namespace) identity of a release
//! - `ReleaseSpec`: desired configuration of a release, snapshotted per revision
//! - `ReleaseRevision`: one historical apply attempt with its status
//! - `ApplyPayload`: what the backend receives for a single apply attempt
//! - `ResourceChange` / `LiveState`: resource-level view used for rollback

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Live resources of a release, keyed by resource key.
pub type LiveState = BTreeMap<String, String>;

/// Identity of a release: unique name within a namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReleaseId {
    pub name: String,
    pub namespace: String,
}

impl ReleaseId {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
        }
    }
}

impl std::fmt::Display for ReleaseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// SHA-256 digest of the applied content of a spec (chart reference + values).
///
/// Only `ReleaseSpec::digest` constructs one, so the string is always
/// 64-char lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SpecDigest(String);

impl SpecDigest {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form (first 12 hex chars).
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl std::fmt::Display for SpecDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Desired configuration of a release.
///
/// `values` holds flattened dotted-path keys mapped to scalar strings. The map
/// is sorted, so digests and iteration order are deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseSpec {
    pub name: String,
    pub chart_ref: String,
    pub namespace: String,
    pub values: BTreeMap<String, String>,
    pub atomic: bool,
    /// Maximum number of revisions kept; `0` keeps every revision.
    pub max_history: u32,
    #[serde(default)]
    pub namespace_labels: BTreeMap<String, String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl ReleaseSpec {
    pub fn id(&self) -> ReleaseId {
        ReleaseId::new(self.name.clone(), self.namespace.clone())
    }

    /// Whether two specs would produce the same applied content.
    pub fn same_content(&self, other: &ReleaseSpec) -> bool {
        self.chart_ref == other.chart_ref && self.values == other.values
    }

    /// Digest over the applied content only. Policy flags do not contribute.
    pub fn digest(&self) -> SpecDigest {
        let mut hasher = Sha256::new();
        hasher.update(b"chart\0");
        hasher.update(self.chart_ref.as_bytes());
        for (key, value) in &self.values {
            hasher.update(b"\0k\0");
            hasher.update(key.as_bytes());
            hasher.update(b"\0v\0");
            hasher.update(value.as_bytes());
        }
        SpecDigest(hex::encode(hasher.finalize()))
    }
}

/// Status of a release revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RevisionStatus {
    Pending,
    Deployed,
    Failed,
    Superseded,
    RolledBack,
}

impl RevisionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RevisionStatus::Pending => "pending",
            RevisionStatus::Deployed => "deployed",
            RevisionStatus::Failed => "failed",
            RevisionStatus::Superseded => "superseded",
            RevisionStatus::RolledBack => "rolled-back",
        }
    }
}

impl std::fmt::Display for RevisionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One historical apply attempt of a release.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseRevision {
    /// Monotonically increasing per release, starting at 1.
    pub revision: u64,
    /// Snapshot of the spec this attempt applied.
    pub spec: ReleaseSpec,
    pub status: RevisionStatus,
    /// Apply attempt that produced this revision.
    pub attempt_id: Uuid,
    /// Volatile stamp sent to the backend with the attempt.
    pub applied_at: DateTime<Utc>,
    /// Last status transition.
    pub updated_at: DateTime<Utc>,
    pub description: String,
}

impl ReleaseRevision {
    /// Start a new `pending` revision for an apply attempt.
    pub fn pending(revision: u64, spec: ReleaseSpec, payload: &ApplyPayload) -> Self {
        Self {
            revision,
            spec,
            status: RevisionStatus::Pending,
            attempt_id: payload.attempt_id,
            applied_at: payload.applied_at,
            updated_at: Utc::now(),
            description: "Apply in progress".to_string(),
        }
    }

    /// Move to a new status, refreshing `updated_at`.
    pub fn transition(&mut self, status: RevisionStatus, description: impl Into<String>) {
        self.status = status;
        self.description = description.into();
        self.updated_at = Utc::now();
    }
}

/// Payload of a single apply attempt.
///
/// `attempt_id` and `applied_at` are fresh for every attempt. Some backends
/// skip reapplication when an atomic attempt carries no changed field; the
/// stamp guarantees there is always one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplyPayload {
    pub release: ReleaseId,
    pub revision: u64,
    pub chart_ref: String,
    pub values: BTreeMap<String, String>,
    pub attempt_id: Uuid,
    pub applied_at: DateTime<Utc>,
}

impl ApplyPayload {
    /// Build a payload for `spec` at `revision` with a fresh volatile stamp.
    pub fn stamped(spec: &ReleaseSpec, revision: u64) -> Self {
        Self {
            release: spec.id(),
            revision,
            chart_ref: spec.chart_ref.clone(),
            values: spec.values.clone(),
            attempt_id: Uuid::new_v4(),
            applied_at: Utc::now(),
        }
    }
}

/// A single resource write performed by the backend during an apply.
///
/// `previous` is the content before the write (`None` if the resource did not
/// exist). Restoring `previous` for every change, newest first, undoes the
/// attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceChange {
    pub key: String,
    pub previous: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(values: &[(&str, &str)]) -> ReleaseSpec {
        ReleaseSpec {
            name: "prometheus-adapter".to_string(),
            chart_ref: "prometheus-community/prometheus-adapter".to_string(),
            namespace: "prometheus".to_string(),
            values: values
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            atomic: true,
            max_history: 50,
            namespace_labels: BTreeMap::new(),
            description: None,
        }
    }

    #[test]
    fn release_id_displays_namespace_first() {
        let id = ReleaseId::new("prometheus-adapter", "prometheus");
        assert_eq!(id.to_string(), "prometheus/prometheus-adapter");
    }

    #[test]
    fn digest_ignores_policy_flags() {
        let a = spec(&[("metricsRelistInterval", "30s")]);
        let mut b = a.clone();
        b.atomic = false;
        b.max_history = 3;
        assert_eq!(a.digest(), b.digest());
        assert!(a.same_content(&b));
    }

    #[test]
    fn digest_changes_with_values() {
        let a = spec(&[("metricsRelistInterval", "30s")]);
        let b = spec(&[("metricsRelistInterval", "1m")]);
        assert_ne!(a.digest(), b.digest());
        assert_eq!(a.digest().as_str().len(), 64);
        assert_eq!(a.digest().short().len(), 12);
    }

    #[test]
    fn revision_status_serializes_kebab_case() {
        let json = serde_json::to_string(&RevisionStatus::RolledBack).expect("serialize");
        assert_eq!(json, "\"rolled-back\"");
        assert_eq!(RevisionStatus::RolledBack.to_string(), "rolled-back");
    }

    #[test]
    fn stamped_payloads_are_always_distinct() {
        let s = spec(&[("replicas", "1")]);
        let first = ApplyPayload::stamped(&s, 1);
        let second = ApplyPayload::stamped(&s, 1);
        assert_eq!(first.values, second.values);
        assert_ne!(first.attempt_id, second.attempt_id);
    }

    #[test]
    fn transition_updates_status_and_description() {
        let s = spec(&[]);
        let payload = ApplyPayload::stamped(&s, 1);
        let mut rev = ReleaseRevision::pending(1, s, &payload);
        assert_eq!(rev.status, RevisionStatus::Pending);
        rev.transition(RevisionStatus::Deployed, "Install complete");
        assert_eq!(rev.status, RevisionStatus::Deployed);
        assert_eq!(rev.description, "Install complete");
        assert_eq!(rev.attempt_id, payload.attempt_id);
    }
}
