//! Release applier: turns a decided action into a new revision.
//!
//! One attempt goes through these steps:
//! 1. record the next revision number as `pending`; numbering continues
//!    from the highest number ever recorded, so pruning never causes reuse
//! 2. make sure the namespace exists with the spec's labels
//! 3. for atomic releases, snapshot the live resources
//! 4. hand a freshly stamped payload to the backend
//! 5. finalize: `deployed` (previous deployed becomes `superseded`) or
//!    `failed`, reverting the attempt first when atomic
//! 6. prune history down to `max_history`
//!
//! Callers hold the release's lock for the whole attempt.

use helmsync_state::{
    ApplyPayload, BackendError, BackendResult, LiveState, ReleaseBackend, ReleaseId, ReleaseRevision,
    ReleaseSpec, ResourceChange, RevisionStatus,
};
use tracing::{debug, warn};

use crate::diff::DiffAction;
use crate::domain::{ApplyError, ReconcileError, Result, ValidationError};
use crate::metrics::METRICS;
use crate::obs;
use crate::reader;
use crate::retention::plan_prune;

/// What kind of attempt is being made.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttemptKind {
    Install,
    Upgrade,
    Rollback { target: u64 },
}

impl AttemptKind {
    fn success_description(&self) -> String {
        match self {
            AttemptKind::Install => "Install complete".to_string(),
            AttemptKind::Upgrade => "Upgrade complete".to_string(),
            AttemptKind::Rollback { target } => format!("Rollback to {} complete", target),
        }
    }

    /// Status given to the revision this attempt replaces.
    fn replaced_status(&self) -> RevisionStatus {
        match self {
            AttemptKind::Rollback { .. } => RevisionStatus::RolledBack,
            _ => RevisionStatus::Superseded,
        }
    }
}

/// Applies specs to a backend and keeps the revision history consistent.
pub struct ReleaseApplier<'a> {
    backend: &'a dyn ReleaseBackend,
}

impl<'a> ReleaseApplier<'a> {
    pub fn new(backend: &'a dyn ReleaseBackend) -> Self {
        Self { backend }
    }

    /// Apply `spec` as a new revision.
    ///
    /// `action` only affects bookkeeping: a `Noop` is applied like an
    /// upgrade, the volatile stamp keeps the backend from skipping it.
    pub async fn apply(&self, spec: &ReleaseSpec, action: DiffAction) -> Result<ReleaseRevision> {
        let kind = match action {
            DiffAction::Install => AttemptKind::Install,
            DiffAction::Noop | DiffAction::Upgrade => AttemptKind::Upgrade,
        };
        self.attempt(spec, kind).await
    }

    /// Re-apply the spec snapshot of an earlier revision as a new revision.
    ///
    /// Without `to`, the target is the newest `superseded` revision older than
    /// the deployed one. On success the replaced revision is `rolled-back`.
    pub async fn rollback(&self, id: &ReleaseId, to: Option<u64>) -> Result<ReleaseRevision> {
        let history = self.read_history(id).await?;
        let target = select_rollback_target(id, &history, to)?;
        debug!(release = %id, target = target.revision, "rollback target selected");
        let spec = target.spec.clone();
        self.attempt(
            &spec,
            AttemptKind::Rollback {
                target: target.revision,
            },
        )
        .await
    }

    async fn attempt(&self, spec: &ReleaseSpec, kind: AttemptKind) -> Result<ReleaseRevision> {
        let id = spec.id();
        let history = self.read_history(&id).await?;
        let previous = reader::deployed_of(&history).cloned();
        let number = self.next_revision(&id, &history).await?;

        let payload = ApplyPayload::stamped(spec, number);
        let mut revision = ReleaseRevision::pending(number, spec.clone(), &payload);
        self.backend
            .put_revision(&id, &revision)
            .await
            .map_err(|e| apply_error(&id, number, format!("recording revision: {}", e), false))?;

        let snapshot = match self.prepare(spec).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                let reason = e.to_string();
                return Err(self.fail(&mut revision, spec, reason, false).await);
            }
        };

        obs::emit_apply_started(&id.to_string(), number, &payload.attempt_id.to_string());
        METRICS.inc_applies();

        match self.backend.apply(&payload).await {
            Ok(changes) => {
                debug!(release = %id, revision = number, changes = changes.len(), "apply succeeded");
                self.finalize_deployed(&id, &mut revision, previous, kind).await?;
                self.prune(&id, spec.max_history).await;
                self.verify_deployed(&id, number).await?;
                obs::emit_apply_finished(&id.to_string(), number, RevisionStatus::Deployed.as_str());
                Ok(revision)
            }
            Err(e) => {
                METRICS.inc_apply_failures();
                let (changes, reason) = match e {
                    BackendError::ApplyFailed { applied, reason } => (applied, reason),
                    other => (Vec::new(), other.to_string()),
                };
                match snapshot {
                    Some(before) => {
                        if let Err(fatal) = self.revert(&id, number, &changes, &before).await {
                            revision.transition(
                                RevisionStatus::Failed,
                                format!("Apply failed: {}; rollback incomplete", reason),
                            );
                            self.record(&id, &revision).await;
                            self.prune(&id, spec.max_history).await;
                            return Err(fatal);
                        }
                        Err(self.fail(&mut revision, spec, reason, true).await)
                    }
                    None => Err(self.fail(&mut revision, spec, reason, false).await),
                }
            }
        }
    }

    /// Namespace setup, plus the pre-apply snapshot for atomic releases.
    async fn prepare(&self, spec: &ReleaseSpec) -> BackendResult<Option<LiveState>> {
        self.backend
            .ensure_namespace(&spec.namespace, &spec.namespace_labels)
            .await?;
        if spec.atomic {
            Ok(Some(self.backend.live_state(&spec.id()).await?))
        } else {
            Ok(None)
        }
    }

    async fn finalize_deployed(
        &self,
        id: &ReleaseId,
        revision: &mut ReleaseRevision,
        previous: Option<ReleaseRevision>,
        kind: AttemptKind,
    ) -> Result<()> {
        revision.transition(RevisionStatus::Deployed, kind.success_description());
        self.backend
            .put_revision(id, revision)
            .await
            .map_err(|e| {
                apply_error(id, revision.revision, format!("recording revision: {}", e), false)
            })?;

        if let Some(mut previous) = previous {
            let status = kind.replaced_status();
            previous.transition(status, format!("Replaced by revision {}", revision.revision));
            self.backend.put_revision(id, &previous).await.map_err(|e| {
                apply_error(
                    id,
                    revision.revision,
                    format!("marking revision {} {}: {}", previous.revision, status, e),
                    false,
                )
            })?;
        }
        Ok(())
    }

    /// Undo `changes` and check the live state matches `before` exactly.
    async fn revert(
        &self,
        id: &ReleaseId,
        number: u64,
        changes: &[ResourceChange],
        before: &LiveState,
    ) -> Result<()> {
        if let Err(e) = self.backend.revert(id, changes).await {
            warn!(release = %id, revision = number, error = %e, "revert call failed");
        }
        let residue = match self.backend.live_state(id).await {
            Ok(after) => residue(before, &after),
            Err(e) => {
                warn!(release = %id, revision = number, error = %e, "live state unreadable after revert");
                let mut keys: Vec<String> = changes.iter().map(|c| c.key.clone()).collect();
                keys.sort();
                keys.dedup();
                keys
            }
        };
        if residue.is_empty() {
            obs::emit_rolled_back(&id.to_string(), number, changes.len());
            Ok(())
        } else {
            Err(ReconcileError::FatalInconsistency {
                release: id.clone(),
                revision: number,
                residue,
            })
        }
    }

    /// Mark `revision` failed, prune, and build the error to return.
    async fn fail(
        &self,
        revision: &mut ReleaseRevision,
        spec: &ReleaseSpec,
        reason: String,
        rolled_back: bool,
    ) -> ReconcileError {
        let id = spec.id();
        let description = if rolled_back {
            format!("Apply failed and was rolled back: {}", reason)
        } else {
            format!("Apply failed: {}", reason)
        };
        revision.transition(RevisionStatus::Failed, description);
        self.record(&id, revision).await;
        self.prune(&id, spec.max_history).await;
        obs::emit_apply_finished(&id.to_string(), revision.revision, RevisionStatus::Failed.as_str());
        apply_error(&id, revision.revision, reason, rolled_back)
    }

    /// Best-effort status write on a path that is already failing.
    async fn record(&self, id: &ReleaseId, revision: &ReleaseRevision) {
        if let Err(e) = self.backend.put_revision(id, revision).await {
            warn!(release = %id, revision = revision.revision, error = %e, "failed to record revision status");
        }
    }

    async fn prune(&self, id: &ReleaseId, max_history: u32) {
        let history = match reader::history(self.backend, id).await {
            Ok(history) => history,
            Err(e) => {
                warn!(release = %id, error = %e, "skipping history pruning");
                return;
            }
        };
        let plan = plan_prune(&history, max_history);
        let mut evicted = Vec::with_capacity(plan.evict.len());
        for number in plan.evict {
            match self.backend.delete_revision(id, number).await {
                Ok(()) => evicted.push(number),
                Err(e) => warn!(release = %id, revision = number, error = %e, "failed to prune revision"),
            }
        }
        if !evicted.is_empty() {
            METRICS.add_revisions_pruned(evicted.len() as u64);
            obs::emit_pruned(&id.to_string(), &evicted);
        }
    }

    /// Post-apply status check: the backend must report `number` as deployed.
    async fn verify_deployed(&self, id: &ReleaseId, number: u64) -> Result<()> {
        let history = self.read_history(id).await?;
        match reader::deployed_of(&history) {
            Some(rev) if rev.revision == number => Ok(()),
            Some(rev) => Err(apply_error(
                id,
                number,
                format!("post-apply check: revision {} is deployed instead", rev.revision),
                false,
            )),
            None => Err(apply_error(
                id,
                number,
                "post-apply check: no deployed revision".to_string(),
                false,
            )),
        }
    }

    async fn next_revision(&self, id: &ReleaseId, history: &[ReleaseRevision]) -> Result<u64> {
        let last = reader::last_revision(self.backend, id)
            .await
            .map_err(|last| ReconcileError::ClusterUnreachable { attempts: 1, last })?;
        let recorded = history.iter().map(|r| r.revision).max().unwrap_or(0);
        Ok(last.max(recorded) + 1)
    }

    async fn read_history(&self, id: &ReleaseId) -> Result<Vec<ReleaseRevision>> {
        reader::history(self.backend, id)
            .await
            .map_err(|last| ReconcileError::ClusterUnreachable { attempts: 1, last })
    }
}

fn apply_error(id: &ReleaseId, revision: u64, reason: String, rolled_back: bool) -> ReconcileError {
    ReconcileError::Apply(ApplyError {
        release: id.clone(),
        revision,
        reason,
        rolled_back,
    })
}

/// Keys whose content differs between two live states.
pub fn residue(before: &LiveState, after: &LiveState) -> Vec<String> {
    let mut keys: Vec<String> = before
        .iter()
        .filter(|(k, v)| after.get(*k) != Some(*v))
        .map(|(k, _)| k.clone())
        .collect();
    keys.extend(after.keys().filter(|k| !before.contains_key(*k)).cloned());
    keys.sort();
    keys
}

fn select_rollback_target<'h>(
    id: &ReleaseId,
    history: &'h [ReleaseRevision],
    to: Option<u64>,
) -> std::result::Result<&'h ReleaseRevision, ValidationError> {
    let deployed = reader::deployed_of(history).map(|r| r.revision);
    match to {
        Some(number) => {
            let invalid = |reason: &str| ValidationError::InvalidRollbackTarget {
                release: id.to_string(),
                revision: number,
                reason: reason.to_string(),
            };
            let target = history
                .iter()
                .find(|r| r.revision == number)
                .ok_or_else(|| invalid("does not exist"))?;
            if Some(number) == deployed {
                return Err(invalid("is already deployed"));
            }
            match target.status {
                RevisionStatus::Superseded | RevisionStatus::RolledBack => Ok(target),
                _ => Err(invalid("was never deployed")),
            }
        }
        None => history
            .iter()
            .filter(|r| r.status == RevisionStatus::Superseded)
            .filter(|r| deployed.map_or(true, |d| r.revision < d))
            .max_by_key(|r| r.revision)
            .ok_or_else(|| ValidationError::NoRollbackTarget {
                release: id.to_string(),
            }),
    }
}
