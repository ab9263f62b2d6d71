//! Backend trait definitions for helmsync
//!
//! `ReleaseBackend` is the downstream cluster/chart-execution backend. It
//! exposes install/upgrade (`apply`), history and compensation primitives keyed
//! by release identity. The reconciler never mutates cluster resources any
//! other way.
//!
//! The trait is async and backend-agnostic. An in-memory fake with fault
//! injection lives in the `fakes` module; `FsReleaseBackend` persists to JSON
//! files.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::BackendError;
use crate::schema::{ApplyPayload, LiveState, ReleaseId, ReleaseRevision, ResourceChange};

/// Result type for backend operations
pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Cluster/chart-execution backend.
///
/// Guarantees:
/// - `history` is ordered by ascending revision number.
/// - `history` fails with `BackendError::ReleaseNotFound` when nothing was
///   ever recorded for the release; transport failures use `Unreachable`.
/// - `apply` either returns every change it made, or fails with
///   `BackendError::ApplyFailed` listing the changes that landed before the
///   failure.
/// - `revert` restores each change's `previous` content, newest first.
#[async_trait]
pub trait ReleaseBackend: Send + Sync {
    /// Full revision history of a release, oldest first.
    async fn history(&self, id: &ReleaseId) -> BackendResult<Vec<ReleaseRevision>>;

    /// Insert or replace a revision record.
    async fn put_revision(&self, id: &ReleaseId, revision: &ReleaseRevision) -> BackendResult<()>;

    /// Highest revision number ever recorded for the release, pruned
    /// revisions included. `0` when nothing was recorded. Deleting revisions
    /// never lowers it.
    async fn last_revision(&self, id: &ReleaseId) -> BackendResult<u64>;

    /// Delete a revision record. Fails with `RevisionNotFound` if absent.
    async fn delete_revision(&self, id: &ReleaseId, revision: u64) -> BackendResult<()>;

    /// Create the namespace if missing and merge `labels` into it.
    async fn ensure_namespace(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> BackendResult<()>;

    /// Apply a payload to the cluster, returning the resource writes made.
    async fn apply(&self, payload: &ApplyPayload) -> BackendResult<Vec<ResourceChange>>;

    /// Undo the given changes, newest first.
    async fn revert(&self, id: &ReleaseId, changes: &[ResourceChange]) -> BackendResult<()>;

    /// Current live resources of a release (empty if none).
    async fn live_state(&self, id: &ReleaseId) -> BackendResult<LiveState>;
}
