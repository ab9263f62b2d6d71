//! Diff engine: desired spec vs. observed revision.
//!
//! Pure and deterministic. Only applied content (chart reference and
//! flattened values) is compared; policy flags such as `atomic` or
//! `max_history` never trigger an upgrade on their own.

use std::collections::BTreeSet;

use helmsync_state::{ReleaseRevision, ReleaseSpec};
use serde::{Deserialize, Serialize};

/// What the applier needs to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiffAction {
    Noop,
    Install,
    Upgrade,
}

/// Result of comparing desired and observed state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffResult {
    pub action: DiffAction,
    /// Keys added, removed or changed. On install, every desired key.
    pub changed_keys: BTreeSet<String>,
    pub chart_changed: bool,
}

impl DiffResult {
    pub fn is_noop(&self) -> bool {
        self.action == DiffAction::Noop
    }
}

/// Compare `desired` with the observed deployed revision.
///
/// - no observed revision: install
/// - same chart reference and flattened values: noop
/// - otherwise: upgrade, with the symmetric difference of key sets plus keys
///   whose values differ
pub fn compute(desired: &ReleaseSpec, observed: Option<&ReleaseRevision>) -> DiffResult {
    let observed = match observed {
        Some(rev) => &rev.spec,
        None => {
            return DiffResult {
                action: DiffAction::Install,
                changed_keys: desired.values.keys().cloned().collect(),
                chart_changed: true,
            }
        }
    };

    let chart_changed = desired.chart_ref != observed.chart_ref;

    let mut changed_keys: BTreeSet<String> = desired
        .values
        .iter()
        .filter(|(key, value)| observed.values.get(*key) != Some(*value))
        .map(|(key, _)| key.clone())
        .collect();
    changed_keys.extend(
        observed
            .values
            .keys()
            .filter(|key| !desired.values.contains_key(*key))
            .cloned(),
    );

    let action = if chart_changed || !changed_keys.is_empty() {
        DiffAction::Upgrade
    } else {
        DiffAction::Noop
    };

    DiffResult {
        action,
        changed_keys,
        chart_changed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use helmsync_state::{ApplyPayload, RevisionStatus};
    use std::collections::BTreeMap;

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
            max_history: 10,
            namespace_labels: BTreeMap::new(),
            description: None,
        }
    }

    fn deployed(spec: &ReleaseSpec) -> ReleaseRevision {
        let payload = ApplyPayload::stamped(spec, 1);
        let mut rev = ReleaseRevision::pending(1, spec.clone(), &payload);
        rev.transition(RevisionStatus::Deployed, "Install complete");
        rev
    }

    fn keys(result: &DiffResult) -> Vec<&str> {
        result.changed_keys.iter().map(String::as_str).collect()
    }

    #[test]
    fn no_observed_is_install() {
        let desired = spec(&[("metricsRelistInterval", "30s")]);
        let result = compute(&desired, None);
        assert_eq!(result.action, DiffAction::Install);
        assert_eq!(keys(&result), vec!["metricsRelistInterval"]);
    }

    #[test]
    fn identical_is_noop() {
        let desired = spec(&[("metricsRelistInterval", "30s"), ("replicas", "1")]);
        let observed = deployed(&desired);
        let result = compute(&desired, Some(&observed));
        assert!(result.is_noop());
        assert!(result.changed_keys.is_empty());
        assert!(!result.chart_changed);
    }

    #[test]
    fn policy_flags_alone_are_noop() {
        let observed = deployed(&spec(&[("a", "1")]));
        let mut desired = spec(&[("a", "1")]);
        desired.atomic = false;
        desired.max_history = 2;
        assert!(compute(&desired, Some(&observed)).is_noop());
    }

    #[test]
    fn single_value_change_reports_only_that_key() {
        let observed = deployed(&spec(&[("a", "1"), ("b", "2"), ("c", "3")]));
        let desired = spec(&[("a", "1"), ("b", "20"), ("c", "3")]);
        let result = compute(&desired, Some(&observed));
        assert_eq!(result.action, DiffAction::Upgrade);
        assert_eq!(keys(&result), vec!["b"]);
    }

    #[test]
    fn added_and_removed_keys_are_reported() {
        let observed = deployed(&spec(&[("a", "1"), ("gone", "x")]));
        let desired = spec(&[("a", "1"), ("new", "y")]);
        let result = compute(&desired, Some(&observed));
        assert_eq!(keys(&result), vec!["gone", "new"]);
    }

    #[test]
    fn chart_only_change_is_upgrade() {
        let observed = deployed(&spec(&[("a", "1")]));
        let mut desired = spec(&[("a", "1")]);
        desired.chart_ref = "prometheus-community/prometheus-adapter:4.10.0".to_string();
        let result = compute(&desired, Some(&observed));
        assert_eq!(result.action, DiffAction::Upgrade);
        assert!(result.chart_changed);
        assert!(result.changed_keys.is_empty());
    }

    #[test]
    fn compute_is_idempotent() {
        let observed = deployed(&spec(&[("a", "1")]));
        let desired = spec(&[("a", "2"), ("b", "3")]);
        assert_eq!(
            compute(&desired, Some(&observed)),
            compute(&desired, Some(&observed))
        );
    }
}
