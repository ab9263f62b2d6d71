//! In-memory fake for the backend trait (testing only)
//!
//! `MemoryReleaseBackend` satisfies the `ReleaseBackend` contract without any
//! external dependencies and adds fault injection: transient unreachability,
//! mid-apply failures, rollback residue and an artificial apply delay for
//! concurrency tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::backend::{BackendResult, ReleaseBackend};
use crate::error::BackendError;
use crate::materialize::{materialize, plan_writes, revert_changes, write_resource};
use crate::schema::{ApplyPayload, LiveState, ReleaseId, ReleaseRevision, ResourceChange};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct ReleaseState {
    revisions: BTreeMap<u64, ReleaseRevision>,
    last_revision: u64,
    live: LiveState,
}

#[derive(Debug, Default)]
struct Faults {
    /// Number of upcoming `history` calls that fail as unreachable.
    unreachable_reads: u32,
    /// Fail the next apply after this many resource writes.
    fail_apply_after: Option<usize>,
    /// Skip the oldest change on the next revert, leaving residue.
    leave_residue: bool,
}

#[derive(Debug, Default)]
struct ApplyTracking {
    in_flight: HashMap<ReleaseId, usize>,
    max_in_flight: HashMap<ReleaseId, usize>,
    calls: HashMap<ReleaseId, usize>,
}

/// In-memory release backend backed by a `HashMap<ReleaseId, ReleaseState>`.
#[derive(Debug, Default)]
pub struct MemoryReleaseBackend {
    releases: Mutex<HashMap<ReleaseId, ReleaseState>>,
    namespaces: Mutex<BTreeMap<String, BTreeMap<String, String>>>,
    faults: Mutex<Faults>,
    apply_delay: Mutex<Option<Duration>>,
    tracking: Mutex<ApplyTracking>,
    history_reads: Mutex<u64>,
}

impl MemoryReleaseBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` history reads fail as unreachable.
    pub fn fail_reads(&self, count: u32) {
        lock(&self.faults).unreachable_reads = count;
    }

    /// Make the next apply fail after `writes` resource writes.
    pub fn fail_next_apply_after(&self, writes: usize) {
        lock(&self.faults).fail_apply_after = Some(writes);
    }

    /// Make the next revert skip one change so residue remains.
    pub fn leave_residue_on_next_revert(&self) {
        lock(&self.faults).leave_residue = true;
    }

    /// Delay every apply by `delay` (simulates slow rollouts).
    pub fn set_apply_delay(&self, delay: Duration) {
        *lock(&self.apply_delay) = Some(delay);
    }

    /// Highest number of concurrent applies observed for a release.
    pub fn max_concurrent_applies(&self, id: &ReleaseId) -> usize {
        lock(&self.tracking)
            .max_in_flight
            .get(id)
            .copied()
            .unwrap_or(0)
    }

    /// Number of apply calls received for a release.
    pub fn apply_calls(&self, id: &ReleaseId) -> usize {
        lock(&self.tracking).calls.get(id).copied().unwrap_or(0)
    }

    /// Number of history reads attempted, including failed ones.
    pub fn history_reads(&self) -> u64 {
        *lock(&self.history_reads)
    }

    /// Labels of a namespace, if it was ensured.
    pub fn namespace_labels(&self, namespace: &str) -> Option<BTreeMap<String, String>> {
        lock(&self.namespaces).get(namespace).cloned()
    }

    fn enter_apply(&self, id: &ReleaseId) {
        let mut tracking = lock(&self.tracking);
        *tracking.calls.entry(id.clone()).or_default() += 1;
        let current = {
            let slot = tracking.in_flight.entry(id.clone()).or_default();
            *slot += 1;
            *slot
        };
        let max = tracking.max_in_flight.entry(id.clone()).or_default();
        *max = (*max).max(current);
    }

    fn leave_apply(&self, id: &ReleaseId) {
        let mut tracking = lock(&self.tracking);
        if let Some(slot) = tracking.in_flight.get_mut(id) {
            *slot = slot.saturating_sub(1);
        }
    }

    fn apply_now(&self, payload: &ApplyPayload) -> BackendResult<Vec<ResourceChange>> {
        let fail_after = lock(&self.faults).fail_apply_after.take();
        let mut releases = lock(&self.releases);
        let state = releases.entry(payload.release.clone()).or_default();

        let desired = materialize(payload);
        let mut applied = Vec::new();
        for write in plan_writes(&state.live, &desired) {
            if fail_after == Some(applied.len()) {
                return Err(BackendError::ApplyFailed {
                    applied,
                    reason: format!("injected failure writing {}", write.key),
                });
            }
            applied.push(write_resource(&mut state.live, &write));
        }
        Ok(applied)
    }
}

#[async_trait]
impl ReleaseBackend for MemoryReleaseBackend {
    async fn history(&self, id: &ReleaseId) -> BackendResult<Vec<ReleaseRevision>> {
        *lock(&self.history_reads) += 1;
        {
            let mut faults = lock(&self.faults);
            if faults.unreachable_reads > 0 {
                faults.unreachable_reads -= 1;
                return Err(BackendError::Unreachable {
                    reason: "injected: connection refused".to_string(),
                });
            }
        }
        let releases = lock(&self.releases);
        let state = releases
            .get(id)
            .filter(|s| !s.revisions.is_empty())
            .ok_or_else(|| BackendError::ReleaseNotFound {
                release: id.to_string(),
            })?;
        Ok(state.revisions.values().cloned().collect())
    }

    async fn put_revision(&self, id: &ReleaseId, revision: &ReleaseRevision) -> BackendResult<()> {
        let mut releases = lock(&self.releases);
        let state = releases.entry(id.clone()).or_default();
        state.last_revision = state.last_revision.max(revision.revision);
        state.revisions.insert(revision.revision, revision.clone());
        Ok(())
    }

    async fn last_revision(&self, id: &ReleaseId) -> BackendResult<u64> {
        let releases = lock(&self.releases);
        Ok(releases.get(id).map(|s| s.last_revision).unwrap_or(0))
    }

    async fn delete_revision(&self, id: &ReleaseId, revision: u64) -> BackendResult<()> {
        let mut releases = lock(&self.releases);
        releases
            .get_mut(id)
            .and_then(|s| s.revisions.remove(&revision))
            .map(|_| ())
            .ok_or_else(|| BackendError::RevisionNotFound {
                release: id.to_string(),
                revision,
            })
    }

    async fn ensure_namespace(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> BackendResult<()> {
        let mut namespaces = lock(&self.namespaces);
        namespaces
            .entry(namespace.to_string())
            .or_default()
            .extend(labels.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    }

    async fn apply(&self, payload: &ApplyPayload) -> BackendResult<Vec<ResourceChange>> {
        self.enter_apply(&payload.release);
        let delay = *lock(&self.apply_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let result = self.apply_now(payload);
        self.leave_apply(&payload.release);
        result
    }

    async fn revert(&self, id: &ReleaseId, changes: &[ResourceChange]) -> BackendResult<()> {
        let leave_residue = std::mem::take(&mut lock(&self.faults).leave_residue);
        let changes = if leave_residue && !changes.is_empty() {
            &changes[1..]
        } else {
            changes
        };
        let mut releases = lock(&self.releases);
        let state = releases.entry(id.clone()).or_default();
        revert_changes(&mut state.live, changes);
        Ok(())
    }

    async fn live_state(&self, id: &ReleaseId) -> BackendResult<LiveState> {
        let releases = lock(&self.releases);
        Ok(releases.get(id).map(|s| s.live.clone()).unwrap_or_default())
    }
}
