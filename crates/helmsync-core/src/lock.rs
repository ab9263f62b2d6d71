//! Per-release mutual exclusion.
//!
//! Each `ReleaseId` maps to its own tokio mutex. Reconciliations of the same
//! release queue behind each other; distinct releases never contend.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use helmsync_state::ReleaseId;
use tokio::sync::OwnedMutexGuard;

/// Held for the duration of one read-diff-apply pass. Released on drop.
#[derive(Debug)]
pub struct ReleaseGuard {
    release: ReleaseId,
    _guard: OwnedMutexGuard<()>,
}

impl ReleaseGuard {
    pub fn release(&self) -> &ReleaseId {
        &self.release
    }
}

/// Registry of per-release locks.
#[derive(Debug, Default)]
pub struct LockRegistry {
    locks: Mutex<HashMap<ReleaseId, Arc<tokio::sync::Mutex<()>>>>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `release`.
    pub async fn acquire(&self, release: &ReleaseId) -> ReleaseGuard {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            // Entries nobody holds or waits on can go.
            locks.retain(|id, l| id == release || Arc::strong_count(l) > 1);
            locks.entry(release.clone()).or_default().clone()
        };
        ReleaseGuard {
            release: release.clone(),
            _guard: lock.lock_owned().await,
        }
    }

    /// Number of releases with a live lock entry.
    pub fn tracked(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
