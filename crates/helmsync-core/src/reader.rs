//! Cluster state reader.
//!
//! Reads a release's revision history from the backend and picks the most
//! recently deployed revision. "Never installed" is an empty result, not an
//! error; every other backend failure is a `ClusterUnreachableError`.

use helmsync_state::{ReleaseBackend, ReleaseId, ReleaseRevision, RevisionStatus};

use crate::domain::ClusterUnreachableError;

/// Full history of a release, oldest first. Empty if never installed.
pub async fn history(
    backend: &dyn ReleaseBackend,
    id: &ReleaseId,
) -> Result<Vec<ReleaseRevision>, ClusterUnreachableError> {
    match backend.history(id).await {
        Ok(revisions) => Ok(revisions),
        Err(e) if e.is_not_found() => Ok(Vec::new()),
        Err(e) => Err(ClusterUnreachableError {
            release: id.to_string(),
            reason: e.to_string(),
        }),
    }
}

/// Highest revision number ever recorded, pruned revisions included.
pub async fn last_revision(
    backend: &dyn ReleaseBackend,
    id: &ReleaseId,
) -> Result<u64, ClusterUnreachableError> {
    backend
        .last_revision(id)
        .await
        .map_err(|e| ClusterUnreachableError {
            release: id.to_string(),
            reason: e.to_string(),
        })
}

/// Most recently deployed revision of a release, if any.
pub async fn fetch(
    backend: &dyn ReleaseBackend,
    id: &ReleaseId,
) -> Result<Option<ReleaseRevision>, ClusterUnreachableError> {
    let revisions = history(backend, id).await?;
    Ok(deployed_of(&revisions).cloned())
}

/// The highest-numbered `deployed` revision in `revisions`.
pub fn deployed_of(revisions: &[ReleaseRevision]) -> Option<&ReleaseRevision> {
    revisions
        .iter()
        .filter(|r| r.status == RevisionStatus::Deployed)
        .max_by_key(|r| r.revision)
}

#[cfg(test)]
mod tests {
    use super::*;
    use helmsync_state::fakes::MemoryReleaseBackend;
    use helmsync_state::{ApplyPayload, ReleaseSpec};
    use std::collections::BTreeMap;

    fn spec() -> ReleaseSpec {
        ReleaseSpec {
            name: "prometheus-adapter".to_string(),
            chart_ref: "prometheus-community/prometheus-adapter".to_string(),
            namespace: "prometheus".to_string(),
            values: BTreeMap::new(),
            atomic: true,
            max_history: 10,
            namespace_labels: BTreeMap::new(),
            description: None,
        }
    }

    fn revision(n: u64, status: RevisionStatus) -> ReleaseRevision {
        let s = spec();
        let payload = ApplyPayload::stamped(&s, n);
        let mut rev = ReleaseRevision::pending(n, s, &payload);
        rev.transition(status, status.as_str());
        rev
    }

    #[tokio::test]
    async fn fetch_not_found_is_none() {
        let backend = MemoryReleaseBackend::new();
        let observed = fetch(&backend, &spec().id()).await.expect("fetch");
        assert!(observed.is_none());
    }

    #[tokio::test]
    async fn fetch_unreachable_is_error() {
        let backend = MemoryReleaseBackend::new();
        backend.fail_reads(1);
        let err = fetch(&backend, &spec().id()).await.unwrap_err();
        assert_eq!(err.release, "prometheus/prometheus-adapter");
        assert!(err.reason.contains("unreachable"));
    }

    #[tokio::test]
    async fn fetch_skips_failed_latest_revision() {
        let backend = MemoryReleaseBackend::new();
        let id = spec().id();
        backend
            .put_revision(&id, &revision(1, RevisionStatus::Superseded))
            .await
            .unwrap();
        backend
            .put_revision(&id, &revision(2, RevisionStatus::Deployed))
            .await
            .unwrap();
        backend
            .put_revision(&id, &revision(3, RevisionStatus::Failed))
            .await
            .unwrap();

        let observed = fetch(&backend, &id).await.expect("fetch").expect("deployed");
        assert_eq!(observed.revision, 2);
    }

    #[test]
    fn deployed_of_empty_is_none() {
        assert!(deployed_of(&[]).is_none());
        assert!(deployed_of(&[revision(1, RevisionStatus::Failed)]).is_none());
    }
}
