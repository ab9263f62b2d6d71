//! Loading release configs from JSON and TOML files.

use std::io::Write;
use std::sync::Arc;

use helmsync_core::{load_release_config, ErrorKind, ReconcileAction, Reconciler, ValidationError};
use helmsync_state::fakes::MemoryReleaseBackend;
use tempfile::TempDir;

fn write(dir: &TempDir, name: &str, contents: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    let mut file = std::fs::File::create(&path).expect("create");
    file.write_all(contents.as_bytes()).expect("write");
    path
}

const ADAPTER_JSON: &str = r#"{
    "name": "prometheus-adapter",
    "chart": "prometheus-community/prometheus-adapter",
    "namespace": "prometheus",
    "atomic": true,
    "max_history": 50,
    "values": {
        "prometheus": {"url": "http://prometheus-operated.prometheus.svc", "port": 9090},
        "resources": {"limits": {"cpu": "100m", "memory": "128Mi"}}
    },
    "set": [
        {"name": "metricsRelistInterval", "value": "30s"},
        {"name": "podDisruptionBudget.enabled", "value": true}
    ]
}"#;

const ADAPTER_TOML: &str = r#"
name = "prometheus-adapter"
chart = "prometheus-community/prometheus-adapter"
namespace = "prometheus"
atomic = true
max_history = 50

[values.prometheus]
url = "http://prometheus-operated.prometheus.svc"
port = 9090

[values.resources.limits]
cpu = "100m"
memory = "128Mi"

[[set]]
name = "metricsRelistInterval"
value = "30s"

[[set]]
name = "podDisruptionBudget.enabled"
value = true
"#;

#[test]
fn test_json_and_toml_build_the_same_spec() {
    let dir = TempDir::new().expect("tempdir");
    let from_json = load_release_config(&write(&dir, "adapter.json", ADAPTER_JSON)).expect("json");
    let from_toml = load_release_config(&write(&dir, "adapter.toml", ADAPTER_TOML)).expect("toml");

    let a = helmsync_core::build(from_json).expect("build json");
    let b = helmsync_core::build(from_toml).expect("build toml");
    assert_eq!(a, b);
    assert_eq!(a.values["prometheus.port"], "9090");
    assert_eq!(a.values["podDisruptionBudget.enabled"], "true");
    assert_eq!(a.digest(), b.digest());
}

#[tokio::test]
async fn test_loaded_config_reconciles() {
    let dir = TempDir::new().expect("tempdir");
    let raw = load_release_config(&write(&dir, "adapter.toml", ADAPTER_TOML)).expect("toml");
    let reconciler = Reconciler::new(Arc::new(MemoryReleaseBackend::new()));

    let report = reconciler.reconcile(raw).await;
    assert_eq!(report.action, Some(ReconcileAction::Install));
    assert_eq!(report.exit_code(), 0);
}

#[test]
fn test_malformed_file_is_validation_error() {
    let dir = TempDir::new().expect("tempdir");
    let path = write(&dir, "broken.json", "{ not json");
    let err = load_release_config(&path).unwrap_err();
    match err {
        ValidationError::UnreadableConfig { path: p, reason } => {
            assert!(p.ends_with("broken.json"));
            assert!(reason.contains("malformed json"));
        }
        other => panic!("unexpected error: {other}"),
    }
    let reconcile_err: helmsync_core::ReconcileError =
        ValidationError::EmptyChartRef.into();
    assert_eq!(reconcile_err.kind(), ErrorKind::Validation);
}

#[test]
fn test_unsupported_extension_is_rejected() {
    let dir = TempDir::new().expect("tempdir");
    let path = write(&dir, "adapter.yaml", "name: x");
    let err = load_release_config(&path).unwrap_err();
    assert!(err.to_string().contains(".json or .toml"));
}
