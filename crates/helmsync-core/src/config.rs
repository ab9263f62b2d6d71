//! Reconciler settings and release config file loading.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::{RawReleaseConfig, ValidationError};
use crate::retry::RetryPolicy;

/// Settings shared by every reconciliation a `Reconciler` runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    pub retry: RetryPolicy,
    /// Deadline for the pre-apply phase (lock wait + fetch retries).
    /// `None` waits indefinitely.
    pub pre_apply_timeout_ms: Option<u64>,
}

impl ReconcilerConfig {
    pub fn pre_apply_timeout(&self) -> Option<Duration> {
        self.pre_apply_timeout_ms.map(Duration::from_millis)
    }
}

/// Supported release config formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Toml,
}

impl ConfigFormat {
    /// Pick the format from a file extension (`.json`, `.toml`).
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            "json" => Some(ConfigFormat::Json),
            "toml" => Some(ConfigFormat::Toml),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigFormat::Json => "json",
            ConfigFormat::Toml => "toml",
        }
    }
}

/// Parse a release config from a string.
pub fn parse_release_config(
    input: &str,
    format: ConfigFormat,
) -> Result<RawReleaseConfig, ValidationError> {
    let malformed = |reason: String| ValidationError::MalformedConfig {
        format: format.as_str(),
        reason,
    };
    match format {
        ConfigFormat::Json => serde_json::from_str(input).map_err(|e| malformed(e.to_string())),
        ConfigFormat::Toml => toml::from_str(input).map_err(|e| malformed(e.to_string())),
    }
}

/// Read and parse a release config file. Any failure is a validation error.
pub fn load_release_config(path: &Path) -> Result<RawReleaseConfig, ValidationError> {
    let unreadable = |reason: String| ValidationError::UnreadableConfig {
        path: path.display().to_string(),
        reason,
    };
    let format = ConfigFormat::from_path(path)
        .ok_or_else(|| unreadable("expected a .json or .toml file".to_string()))?;
    let input = std::fs::read_to_string(path).map_err(|e| unreadable(e.to_string()))?;
    let raw = parse_release_config(&input, format).map_err(|e| unreadable(e.to_string()))?;
    tracing::debug!(path = %path.display(), release = %raw.display_id(), "loaded release config");
    Ok(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let cfg = ReconcilerConfig::default();
        assert_eq!(cfg.retry, RetryPolicy::default());
        assert!(cfg.pre_apply_timeout().is_none());
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(
            ConfigFormat::from_path(Path::new("a/release.json")),
            Some(ConfigFormat::Json)
        );
        assert_eq!(
            ConfigFormat::from_path(Path::new("release.toml")),
            Some(ConfigFormat::Toml)
        );
        assert_eq!(ConfigFormat::from_path(Path::new("release.yaml")), None);
        assert_eq!(ConfigFormat::from_path(Path::new("release")), None);
    }

    #[test]
    fn test_parse_json() {
        let raw = parse_release_config(
            r#"{
                "name": "prometheus-adapter",
                "chart": "prometheus-community/prometheus-adapter",
                "namespace": "prometheus",
                "atomic": true,
                "max_history": 50,
                "set": [{"name": "metricsRelistInterval", "value": "30s"}]
            }"#,
            ConfigFormat::Json,
        )
        .expect("parse");
        assert_eq!(raw.namespace.as_deref(), Some("prometheus"));
        assert_eq!(raw.max_history, 50);
        assert_eq!(raw.set[0].value, json!("30s"));
    }

    #[test]
    fn test_parse_toml_nested_values() {
        let raw = parse_release_config(
            r#"
name = "web"
chart = "bitnami/nginx"

[values.service]
type = "ClusterIP"
port = 80
"#,
            ConfigFormat::Toml,
        )
        .expect("parse");
        assert!(raw.namespace.is_none());
        assert_eq!(raw.values["service"]["port"], json!(80));
        assert_eq!(raw.max_history, 10);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = parse_release_config(
            r#"{"name": "a", "chart": "b", "replicas": 3}"#,
            ConfigFormat::Json,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ValidationError::MalformedConfig { format: "json", .. }
        ));
        assert!(err.to_string().contains("replicas"));
    }

    #[test]
    fn test_malformed_toml_names_its_format() {
        let err = parse_release_config("name = ", ConfigFormat::Toml).unwrap_err();
        match err {
            ValidationError::MalformedConfig { format, reason } => {
                assert_eq!(format, "toml");
                assert!(!reason.is_empty());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_load_missing_file_is_validation_error() {
        let err = load_release_config(Path::new("/nonexistent/release.json")).unwrap_err();
        assert!(matches!(err, ValidationError::UnreadableConfig { .. }));
    }
}
