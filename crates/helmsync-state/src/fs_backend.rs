//! Filesystem-backed release backend.
//!
//! Layout:
//! - `<root>/releases/<namespace>/<name>.json`: revision history + live resources
//! - `<root>/namespaces.json`: namespace labels
//!
//! Writes go to a temp file in the target directory and are renamed into
//! place, so a crashed write never leaves a torn document. An in-process lock
//! serializes read-modify-write cycles.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tokio::sync::Mutex;
use tracing::debug;

use crate::backend::{BackendResult, ReleaseBackend};
use crate::error::BackendError;
use crate::materialize::{materialize, plan_writes, revert_changes, write_resource};
use crate::schema::{ApplyPayload, LiveState, ReleaseId, ReleaseRevision, ResourceChange};

#[derive(Debug, Default, Serialize, Deserialize)]
struct ReleaseDocument {
    revisions: Vec<ReleaseRevision>,
    /// High-water mark of revision numbers; survives pruning.
    #[serde(default)]
    last_revision: u64,
    live: LiveState,
}

impl ReleaseDocument {
    fn last_revision(&self) -> u64 {
        self.revisions
            .iter()
            .map(|r| r.revision)
            .fold(self.last_revision, u64::max)
    }
}

/// Release backend persisting one JSON document per release.
#[derive(Debug)]
pub struct FsReleaseBackend {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl FsReleaseBackend {
    /// Create a backend rooted at `root`. Creates `root/releases/` if needed.
    pub fn new(root: impl AsRef<Path>) -> BackendResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join("releases"))?;
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn release_path(&self, id: &ReleaseId) -> PathBuf {
        self.root
            .join("releases")
            .join(&id.namespace)
            .join(format!("{}.json", id.name))
    }

    fn namespaces_path(&self) -> PathBuf {
        self.root.join("namespaces.json")
    }

    fn load(&self, id: &ReleaseId) -> BackendResult<Option<ReleaseDocument>> {
        read_json(&self.release_path(id))
    }

    fn store(&self, id: &ReleaseId, doc: &ReleaseDocument) -> BackendResult<()> {
        write_json(&self.release_path(id), doc)
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> BackendResult<Option<T>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> BackendResult<()> {
    let dir = path.parent().ok_or_else(|| {
        BackendError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("path has no parent: {}", path.display()),
        ))
    })?;
    fs::create_dir_all(dir)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(&serde_json::to_vec_pretty(value)?)?;
    tmp.persist(path).map_err(|e| e.error)?;
    debug!(path = %path.display(), "state document written");
    Ok(())
}

#[async_trait]
impl ReleaseBackend for FsReleaseBackend {
    async fn history(&self, id: &ReleaseId) -> BackendResult<Vec<ReleaseRevision>> {
        let doc = self
            .load(id)?
            .filter(|d| !d.revisions.is_empty())
            .ok_or_else(|| BackendError::ReleaseNotFound {
                release: id.to_string(),
            })?;
        let mut revisions = doc.revisions;
        revisions.sort_by_key(|r| r.revision);
        Ok(revisions)
    }

    async fn put_revision(&self, id: &ReleaseId, revision: &ReleaseRevision) -> BackendResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut doc = self.load(id)?.unwrap_or_default();
        match doc
            .revisions
            .iter_mut()
            .find(|r| r.revision == revision.revision)
        {
            Some(existing) => *existing = revision.clone(),
            None => doc.revisions.push(revision.clone()),
        }
        doc.last_revision = doc.last_revision();
        self.store(id, &doc)
    }

    async fn last_revision(&self, id: &ReleaseId) -> BackendResult<u64> {
        Ok(self.load(id)?.map(|d| d.last_revision()).unwrap_or(0))
    }

    async fn delete_revision(&self, id: &ReleaseId, revision: u64) -> BackendResult<()> {
        let _guard = self.write_lock.lock().await;
        let not_found = || BackendError::RevisionNotFound {
            release: id.to_string(),
            revision,
        };
        let mut doc = self.load(id)?.ok_or_else(not_found)?;
        let before = doc.revisions.len();
        doc.revisions.retain(|r| r.revision != revision);
        if doc.revisions.len() == before {
            return Err(not_found());
        }
        self.store(id, &doc)
    }

    async fn ensure_namespace(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> BackendResult<()> {
        let _guard = self.write_lock.lock().await;
        let path = self.namespaces_path();
        let mut namespaces: BTreeMap<String, BTreeMap<String, String>> =
            read_json(&path)?.unwrap_or_default();
        namespaces
            .entry(namespace.to_string())
            .or_default()
            .extend(labels.iter().map(|(k, v)| (k.clone(), v.clone())));
        write_json(&path, &namespaces)
    }

    async fn apply(&self, payload: &ApplyPayload) -> BackendResult<Vec<ResourceChange>> {
        let _guard = self.write_lock.lock().await;
        let mut doc = self.load(&payload.release)?.unwrap_or_default();
        let desired = materialize(payload);
        let changes: Vec<ResourceChange> = plan_writes(&doc.live, &desired)
            .iter()
            .map(|w| write_resource(&mut doc.live, w))
            .collect();

        // One document write: either every change lands or none does.
        self.store(&payload.release, &doc)
            .map_err(|e| BackendError::ApplyFailed {
                applied: Vec::new(),
                reason: e.to_string(),
            })?;
        Ok(changes)
    }

    async fn revert(&self, id: &ReleaseId, changes: &[ResourceChange]) -> BackendResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut doc = self.load(id)?.unwrap_or_default();
        revert_changes(&mut doc.live, changes);
        self.store(id, &doc)
    }

    async fn live_state(&self, id: &ReleaseId) -> BackendResult<LiveState> {
        Ok(self.load(id)?.map(|d| d.live).unwrap_or_default())
    }
}
