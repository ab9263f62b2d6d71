//! Resource materialization shared by the bundled backends.
//!
//! A payload becomes one `release/<name>` resource carrying the chart
//! reference, revision and volatile stamp, plus one `value/<key>` resource per
//! flattened value. This is not chart rendering; it is the minimal resource
//! model the bundled backends track so that partial applies and rollbacks are
//! observable.

use crate::schema::{ApplyPayload, LiveState, ResourceChange};

/// Prefix of the per-release resource.
pub const RELEASE_RESOURCE_PREFIX: &str = "release/";
/// Prefix of per-value resources.
pub const VALUE_RESOURCE_PREFIX: &str = "value/";

/// Desired resources for a payload.
pub fn materialize(payload: &ApplyPayload) -> LiveState {
    let mut resources = LiveState::new();
    resources.insert(
        format!("{}{}", RELEASE_RESOURCE_PREFIX, payload.release.name),
        format!(
            "chart={} revision={} attempt={} applied_at={}",
            payload.chart_ref,
            payload.revision,
            payload.attempt_id,
            payload.applied_at.to_rfc3339()
        ),
    );
    for (key, value) in &payload.values {
        resources.insert(format!("{}{}", VALUE_RESOURCE_PREFIX, key), value.clone());
    }
    resources
}

/// A planned write: `content = None` deletes the resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedWrite {
    pub key: String,
    pub content: Option<String>,
}

/// Plan the writes that turn `live` into `desired`.
///
/// Order: the release resource first, then value upserts in key order, then
/// deletions of resources no longer desired.
pub fn plan_writes(live: &LiveState, desired: &LiveState) -> Vec<PlannedWrite> {
    let mut writes: Vec<PlannedWrite> = desired
        .iter()
        .filter(|(key, content)| live.get(*key) != Some(*content))
        .map(|(key, content)| PlannedWrite {
            key: key.clone(),
            content: Some(content.clone()),
        })
        .collect();
    writes.sort_by_key(|w| !w.key.starts_with(RELEASE_RESOURCE_PREFIX));

    writes.extend(
        live.keys()
            .filter(|key| !desired.contains_key(*key))
            .map(|key| PlannedWrite {
                key: key.clone(),
                content: None,
            }),
    );
    writes
}

/// Perform one planned write against `live`, returning the inverse change.
pub fn write_resource(live: &mut LiveState, write: &PlannedWrite) -> ResourceChange {
    let previous = match &write.content {
        Some(content) => live.insert(write.key.clone(), content.clone()),
        None => live.remove(&write.key),
    };
    ResourceChange {
        key: write.key.clone(),
        previous,
    }
}

/// Undo `changes` against `live`, newest first.
pub fn revert_changes(live: &mut LiveState, changes: &[ResourceChange]) {
    for change in changes.iter().rev() {
        match &change.previous {
            Some(content) => {
                live.insert(change.key.clone(), content.clone());
            }
            None => {
                live.remove(&change.key);
            }
        }
    }
}
