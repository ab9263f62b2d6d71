//! Desired state descriptor: raw release configuration -> `ReleaseSpec`.
//!
//! `RawReleaseConfig` is what an external configuration source hands us
//! (a file, an API call). `build` validates it and flattens nested values into
//! dotted-path keys. Construction is pure.

use std::collections::BTreeMap;

use helmsync_state::{ReleaseId, ReleaseSpec};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::ValidationError;

/// Namespace used when the config does not name one.
pub const DEFAULT_NAMESPACE: &str = "default";
/// Default revision history cap.
pub const DEFAULT_MAX_HISTORY: i64 = 10;
/// Helm limits release names to 53 characters.
pub const MAX_RELEASE_NAME_LEN: usize = 53;
/// Kubernetes limits namespace names to 63 characters.
pub const MAX_NAMESPACE_LEN: usize = 63;
/// Namespace label carrying the resource expiration.
pub const TTL_LABEL: &str = "ttl";

/// One explicit `name = value` override, applied after `values`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SetEntry {
    pub name: String,
    pub value: Value,
}

impl SetEntry {
    pub fn new(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

fn default_max_history() -> i64 {
    DEFAULT_MAX_HISTORY
}

/// Unvalidated release configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawReleaseConfig {
    pub name: String,
    #[serde(alias = "chart_ref")]
    pub chart: String,
    #[serde(default)]
    pub namespace: Option<String>,
    /// Nested values tree in declaration order, flattened to dotted keys.
    #[serde(default)]
    pub values: IndexMap<String, Value>,
    /// Explicit overrides in declaration order; later entries win.
    #[serde(default)]
    pub set: Vec<SetEntry>,
    #[serde(default)]
    pub atomic: bool,
    #[serde(default = "default_max_history")]
    pub max_history: i64,
    #[serde(default)]
    pub namespace_labels: BTreeMap<String, String>,
    /// Adds a `ttl` label to the namespace.
    #[serde(default)]
    pub ttl_seconds: Option<u64>,
    #[serde(default)]
    pub description: Option<String>,
}

impl RawReleaseConfig {
    /// Minimal config for `name` from `chart`; every other field defaulted.
    pub fn new(name: impl Into<String>, chart: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            chart: chart.into(),
            namespace: None,
            values: IndexMap::new(),
            set: Vec::new(),
            atomic: false,
            max_history: DEFAULT_MAX_HISTORY,
            namespace_labels: BTreeMap::new(),
            ttl_seconds: None,
            description: None,
        }
    }

    /// `namespace/name` as declared, before validation.
    pub fn display_id(&self) -> String {
        format!(
            "{}/{}",
            self.namespace.as_deref().unwrap_or(DEFAULT_NAMESPACE),
            self.name
        )
    }
}

/// Build a validated `ReleaseSpec`.
///
/// Checks (in order):
/// 1. `name` is a non-empty DNS-1123 label of at most 53 chars.
/// 2. `chart` is non-empty.
/// 3. `namespace` (default `"default"`) is a DNS-1123 label of at most 63 chars.
/// 4. `max_history` is non-negative.
/// 5. Values flatten without empty keys or nulls. `values` is flattened
///    in declaration order, then `set` entries in order; when two paths
///    flatten to the same dotted key the later-declared one wins.
/// 6. Namespace labels have non-empty keys and values.
pub fn build(raw: RawReleaseConfig) -> Result<ReleaseSpec, ValidationError> {
    check_name(&raw.name)?;

    let chart_ref = raw.chart.trim().to_string();
    if chart_ref.is_empty() {
        return Err(ValidationError::EmptyChartRef);
    }

    let namespace = raw
        .namespace
        .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());
    check_namespace(&namespace)?;

    let max_history = u32::try_from(raw.max_history).map_err(|_| {
        ValidationError::NegativeMaxHistory {
            value: raw.max_history,
        }
    })?;

    let mut values = BTreeMap::new();
    for (key, value) in &raw.values {
        flatten_into(&mut values, "", key, value)?;
    }
    for entry in &raw.set {
        flatten_into(&mut values, "", &entry.name, &entry.value)?;
    }

    let mut namespace_labels = raw.namespace_labels;
    if let Some(ttl) = raw.ttl_seconds {
        namespace_labels.insert(TTL_LABEL.to_string(), ttl.to_string());
    }
    for (key, value) in &namespace_labels {
        if key.is_empty() {
            return Err(ValidationError::InvalidLabel {
                key: key.clone(),
                reason: "key is empty".to_string(),
            });
        }
        if value.is_empty() {
            return Err(ValidationError::InvalidLabel {
                key: key.clone(),
                reason: "value is empty".to_string(),
            });
        }
    }

    Ok(ReleaseSpec {
        name: raw.name,
        chart_ref,
        namespace,
        values,
        atomic: raw.atomic,
        max_history,
        namespace_labels,
        description: raw.description,
    })
}

/// Flatten `value` under `parent.key` into `out`, overwriting existing keys.
fn flatten_into(
    out: &mut BTreeMap<String, String>,
    parent: &str,
    key: &str,
    value: &Value,
) -> Result<(), ValidationError> {
    if key.is_empty() {
        return Err(ValidationError::EmptyValueKey {
            parent: parent.to_string(),
        });
    }
    let path = if parent.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", parent, key)
    };
    flatten_at(out, path, value)
}

fn flatten_at(
    out: &mut BTreeMap<String, String>,
    path: String,
    value: &Value,
) -> Result<(), ValidationError> {
    match value {
        Value::Null => Err(ValidationError::NullValue { key: path }),
        Value::Bool(b) => {
            out.insert(path, b.to_string());
            Ok(())
        }
        Value::Number(n) => {
            out.insert(path, n.to_string());
            Ok(())
        }
        Value::String(s) => {
            out.insert(path, s.clone());
            Ok(())
        }
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                flatten_at(out, format!("{}[{}]", path, i), item)?;
            }
            Ok(())
        }
        Value::Object(map) => {
            for (child, item) in map {
                flatten_into(out, &path, child, item)?;
            }
            Ok(())
        }
    }
}

/// Validate the identity of an existing release addressed by name, as the
/// rollback, status and history operations do.
pub fn release_id(name: &str, namespace: Option<&str>) -> Result<ReleaseId, ValidationError> {
    check_name(name)?;
    let namespace = namespace.unwrap_or(DEFAULT_NAMESPACE);
    check_namespace(namespace)?;
    Ok(ReleaseId::new(name, namespace))
}

fn check_name(name: &str) -> Result<(), ValidationError> {
    if name.is_empty() {
        return Err(ValidationError::EmptyName);
    }
    check_dns_label(name, MAX_RELEASE_NAME_LEN).map_err(|reason| ValidationError::InvalidName {
        name: name.to_string(),
        reason,
    })
}

fn check_namespace(namespace: &str) -> Result<(), ValidationError> {
    check_dns_label(namespace, MAX_NAMESPACE_LEN).map_err(|reason| {
        ValidationError::InvalidNamespace {
            namespace: namespace.to_string(),
            reason,
        }
    })
}

/// RFC 1123 label: lowercase alphanumerics and '-', alphanumeric at both ends.
fn check_dns_label(s: &str, max_len: usize) -> Result<(), String> {
    if s.is_empty() {
        return Err("must not be empty".to_string());
    }
    if s.len() > max_len {
        return Err(format!("must be at most {} characters", max_len));
    }
    if !s
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err("may only contain lowercase alphanumerics and '-'".to_string());
    }
    if s.starts_with('-') || s.ends_with('-') {
        return Err("must start and end with an alphanumeric character".to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw() -> RawReleaseConfig {
        RawReleaseConfig::new(
            "prometheus-adapter",
            "prometheus-community/prometheus-adapter",
        )
    }

    #[test]
    fn test_defaults_namespace_and_history() {
        let spec = build(raw()).expect("build");
        assert_eq!(spec.namespace, "default");
        assert_eq!(spec.max_history, 10);
        assert!(!spec.atomic);
        assert!(spec.values.is_empty());
    }

    #[test]
    fn test_flattens_nested_values() {
        let mut cfg = raw();
        cfg.values.insert(
            "resources".to_string(),
            json!({"limits": {"cpu": "100m", "memory": "128Mi"}}),
        );
        cfg.values
            .insert("podDisruptionBudget".to_string(), json!({"enabled": true}));
        cfg.values.insert("replicas".to_string(), json!(2));

        let spec = build(cfg).expect("build");
        let keys: Vec<&str> = spec.values.keys().map(String::as_str).collect();
        assert_eq!(
            keys,
            vec![
                "podDisruptionBudget.enabled",
                "replicas",
                "resources.limits.cpu",
                "resources.limits.memory",
            ]
        );
        assert_eq!(spec.values["podDisruptionBudget.enabled"], "true");
        assert_eq!(spec.values["replicas"], "2");
    }

    #[test]
    fn test_flattens_sequences_with_indices() {
        let mut cfg = raw();
        cfg.values.insert(
            "rules".to_string(),
            json!([{"seriesQuery": "up"}, "plain", [1, 2]]),
        );
        let spec = build(cfg).expect("build");
        assert_eq!(spec.values["rules[0].seriesQuery"], "up");
        assert_eq!(spec.values["rules[1]"], "plain");
        assert_eq!(spec.values["rules[2][0]"], "1");
        assert_eq!(spec.values["rules[2][1]"], "2");
    }

    #[test]
    fn test_last_set_wins() {
        let mut cfg = raw();
        cfg.values
            .insert("metricsRelistInterval".to_string(), json!("1m"));
        cfg.set.push(SetEntry::new("metricsRelistInterval", "30s"));
        cfg.set.push(SetEntry::new("prometheus.port", 9090));
        cfg.set.push(SetEntry::new("prometheus.port", 9091));

        let spec = build(cfg).expect("build");
        assert_eq!(spec.values["metricsRelistInterval"], "30s");
        assert_eq!(spec.values["prometheus.port"], "9091");
        assert_eq!(spec.values.len(), 2);
    }

    #[test]
    fn test_dotted_literal_key_collides_with_nested_path() {
        let mut cfg = raw();
        cfg.values
            .insert("prometheus".to_string(), json!({"url": "http://a"}));
        cfg.values
            .insert("prometheus.url".to_string(), json!("http://b"));
        let spec = build(cfg).expect("build");
        assert_eq!(spec.values.len(), 1);
        assert_eq!(spec.values["prometheus.url"], "http://b");
    }

    #[test]
    fn test_later_declared_path_wins_over_earlier_literal() {
        let cfg: RawReleaseConfig = serde_json::from_str(
            r#"{
                "name": "prometheus-adapter",
                "chart": "prometheus-community/prometheus-adapter",
                "values": {
                    "prometheus.url": "http://declared-first",
                    "prometheus": {"url": "http://declared-last"}
                }
            }"#,
        )
        .expect("parse");
        let spec = build(cfg).expect("build");
        assert_eq!(spec.values.len(), 1);
        assert_eq!(spec.values["prometheus.url"], "http://declared-last");
    }

    #[test]
    fn test_nested_object_keys_keep_declaration_order() {
        let cfg: RawReleaseConfig = serde_json::from_str(
            r#"{
                "name": "web",
                "chart": "bitnami/nginx",
                "values": {
                    "service": {"port.http": 8080, "port": {"http": 80}}
                }
            }"#,
        )
        .expect("parse");
        let spec = build(cfg).expect("build");
        assert_eq!(spec.values.len(), 1);
        assert_eq!(spec.values["service.port.http"], "80");
    }

    #[test]
    fn test_release_id_validates_name_and_namespace() {
        let id = release_id("prometheus-adapter", Some("prometheus")).expect("valid");
        assert_eq!(id.to_string(), "prometheus/prometheus-adapter");
        assert_eq!(
            release_id("web", None).expect("valid").namespace,
            DEFAULT_NAMESPACE
        );

        assert!(matches!(
            release_id("../../etc", None).unwrap_err(),
            ValidationError::InvalidName { .. }
        ));
        assert!(matches!(
            release_id("web", Some("..")).unwrap_err(),
            ValidationError::InvalidNamespace { .. }
        ));
        assert_eq!(release_id("", None).unwrap_err(), ValidationError::EmptyName);
    }

    #[test]
    fn test_rejects_empty_name() {
        let mut cfg = raw();
        cfg.name = String::new();
        assert_eq!(build(cfg).unwrap_err(), ValidationError::EmptyName);
    }

    #[test]
    fn test_rejects_long_or_uppercase_name() {
        let mut cfg = raw();
        cfg.name = "a".repeat(54);
        assert!(matches!(
            build(cfg).unwrap_err(),
            ValidationError::InvalidName { .. }
        ));

        let mut cfg = raw();
        cfg.name = "Prometheus".to_string();
        assert!(matches!(
            build(cfg).unwrap_err(),
            ValidationError::InvalidName { .. }
        ));
    }

    #[test]
    fn test_rejects_unresolvable_namespace() {
        let mut cfg = raw();
        cfg.namespace = Some("-bad-".to_string());
        assert!(matches!(
            build(cfg).unwrap_err(),
            ValidationError::InvalidNamespace { .. }
        ));

        let mut cfg = raw();
        cfg.namespace = Some(String::new());
        assert!(matches!(
            build(cfg).unwrap_err(),
            ValidationError::InvalidNamespace { .. }
        ));
    }

    #[test]
    fn test_rejects_empty_chart() {
        let mut cfg = raw();
        cfg.chart = "   ".to_string();
        assert_eq!(build(cfg).unwrap_err(), ValidationError::EmptyChartRef);
    }

    #[test]
    fn test_rejects_negative_max_history() {
        let mut cfg = raw();
        cfg.max_history = -1;
        assert_eq!(
            build(cfg).unwrap_err(),
            ValidationError::NegativeMaxHistory { value: -1 }
        );

        let mut cfg = raw();
        cfg.max_history = 0;
        assert_eq!(build(cfg).expect("zero is allowed").max_history, 0);
    }

    #[test]
    fn test_rejects_null_value() {
        let mut cfg = raw();
        cfg.values
            .insert("image".to_string(), json!({"tag": null}));
        assert_eq!(
            build(cfg).unwrap_err(),
            ValidationError::NullValue {
                key: "image.tag".to_string()
            }
        );
    }

    #[test]
    fn test_rejects_empty_set_name() {
        let mut cfg = raw();
        cfg.set.push(SetEntry::new("", "x"));
        assert!(matches!(
            build(cfg).unwrap_err(),
            ValidationError::EmptyValueKey { .. }
        ));
    }

    #[test]
    fn test_ttl_becomes_namespace_label() {
        let mut cfg = raw();
        cfg.ttl_seconds = Some(3600);
        cfg.namespace_labels
            .insert("team".to_string(), "observability".to_string());
        let spec = build(cfg).expect("build");
        assert_eq!(spec.namespace_labels["ttl"], "3600");
        assert_eq!(spec.namespace_labels["team"], "observability");
    }

    #[test]
    fn test_rejects_empty_label_value() {
        let mut cfg = raw();
        cfg.namespace_labels
            .insert("team".to_string(), String::new());
        assert!(matches!(
            build(cfg).unwrap_err(),
            ValidationError::InvalidLabel { .. }
        ));
    }

    #[test]
    fn test_build_is_pure() {
        let mut cfg = raw();
        cfg.values.insert("a".to_string(), json!({"b": 1}));
        assert_eq!(build(cfg.clone()).unwrap(), build(cfg).unwrap());
    }
}
