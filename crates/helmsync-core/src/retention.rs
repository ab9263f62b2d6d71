//! Revision history retention.

use helmsync_state::{ReleaseRevision, RevisionStatus};
use serde::{Deserialize, Serialize};

/// Result of a pruning pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrunePlan {
    /// Revision numbers to delete, oldest first.
    pub evict: Vec<u64>,
    pub remaining_count: usize,
}

/// Plan which revisions to evict so at most `max_history` remain.
///
/// `max_history == 0` keeps everything. The `deployed` revision is never
/// evicted; the rest go oldest first (by apply stamp), ties broken by the
/// lowest revision number.
pub fn plan_prune(history: &[ReleaseRevision], max_history: u32) -> PrunePlan {
    let cap = max_history as usize;
    if cap == 0 || history.len() <= cap {
        return PrunePlan {
            evict: Vec::new(),
            remaining_count: history.len(),
        };
    }

    let mut candidates: Vec<&ReleaseRevision> = history
        .iter()
        .filter(|r| r.status != RevisionStatus::Deployed)
        .collect();
    candidates.sort_by(|a, b| {
        a.applied_at
            .cmp(&b.applied_at)
            .then_with(|| a.revision.cmp(&b.revision))
    });

    let excess = history.len() - cap;
    let evict: Vec<u64> = candidates
        .into_iter()
        .take(excess)
        .map(|r| r.revision)
        .collect();

    PrunePlan {
        remaining_count: history.len() - evict.len(),
        evict,
    }
}
