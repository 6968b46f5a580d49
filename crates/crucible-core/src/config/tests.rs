//! Configuration loading and validation tests.

use std::io::Write;

use tempfile::NamedTempFile;

use crate::config::{load_config, ConfigLoader, CrucibleConfig, SandboxBackend};
use crate::errors::EvalError;

#[test]
fn empty_document_is_a_working_local_config() {
    let config = ConfigLoader::from_yaml("{}").unwrap();
    assert_eq!(config.backend, SandboxBackend::Local);
    assert_eq!(config.concurrency, None);
    assert_eq!(config.local.interpreter, "python3");
    assert_eq!(config.local.timeout_secs, 10.0);
    assert_eq!(config.local.timing_trials, 3);
    assert_eq!(config.remote.log_poll_interval_secs, 5.0);
    assert_eq!(config.remote.fetch_ceiling_secs, 600.0);
    assert_eq!(config.remote.dispatch_spacing_secs, 2.0);
}

#[test]
fn partial_yaml_overrides_defaults() {
    let yaml = r#"
backend: local
concurrency: 4
local:
  interpreter: python3.11
  timeout_secs: 2.5
  evaluate_run_time: true
"#;
    let config = ConfigLoader::from_yaml(yaml).unwrap();
    assert_eq!(config.concurrency, Some(4));
    assert_eq!(config.local.interpreter, "python3.11");
    assert_eq!(config.local.timeout_secs, 2.5);
    assert!(config.local.evaluate_run_time);
    // Untouched fields keep their defaults.
    assert_eq!(config.local.timing_trials, 3);
}

#[test]
fn remote_backend_requires_endpoints() {
    let err = ConfigLoader::from_yaml("backend: remote").unwrap_err();
    match err {
        EvalError::Config(message) => assert!(message.contains("runner_url")),
        other => panic!("expected config error, got {:?}", other),
    }
}

#[test]
fn remote_backend_with_endpoints_validates() {
    let yaml = r#"
backend: remote
remote:
  runner_url: http://127.0.0.1:8080
  logs_url: http://127.0.0.1:8081
  project: code-eval
"#;
    let config = ConfigLoader::from_yaml(yaml).unwrap();
    assert_eq!(config.backend, SandboxBackend::Remote);
    assert_eq!(config.remote.project, "code-eval");
    // Defaults from the production setup.
    assert_eq!(config.remote.location, "us-central1");
    assert_eq!(config.remote.job, "safe-eval");
}

#[test]
fn bad_values_are_rejected() {
    for yaml in [
        "concurrency: 0",
        "local:\n  timeout_secs: 0",
        "local:\n  timeout_secs: -3",
        "local:\n  interpreter: \"\"",
        "local:\n  timing_trials: 0",
        "backend: remote\nremote:\n  runner_url: \"not a url\"\n  logs_url: http://x\n  project: p",
    ] {
        assert!(
            matches!(ConfigLoader::from_yaml(yaml), Err(EvalError::Config(_))),
            "accepted bad config: {}",
            yaml
        );
    }
}

#[test]
fn unparseable_yaml_is_a_config_error() {
    assert!(matches!(
        ConfigLoader::from_yaml(": not yaml :"),
        Err(EvalError::Config(_))
    ));
}

#[tokio::test]
async fn config_loads_from_file() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "concurrency: 2").unwrap();
    let config = load_config(file.path()).await.unwrap();
    assert_eq!(config.concurrency, Some(2));
}

#[tokio::test]
async fn missing_file_is_a_config_error() {
    let err = load_config("/nonexistent/crucible.yaml").await.unwrap_err();
    assert!(matches!(err, EvalError::Config(_)));
}

#[test]
fn config_round_trips_through_yaml() {
    let config = CrucibleConfig::default();
    let yaml = serde_yaml::to_string(&config).unwrap();
    let back = ConfigLoader::from_yaml(&yaml).unwrap();
    assert_eq!(back.backend, config.backend);
    assert_eq!(back.local.timeout_secs, config.local.timeout_secs);
    assert_eq!(back.remote.job, config.remote.job);
}
