//! Configuration file loading tests.

use std::io::Write;

use query_optimizer::config::{ConfigError, OptimizerConfig};

fn write_config(text: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(text.as_bytes()).unwrap();
    file
}

#[test]
fn test_load_partial_file_keeps_defaults() {
    let file = write_config(
        r#"
[planner]
max_parallelism = 8

[prober]
enabled = true
fast_chain = ["amazon.nova-micro-v1:0"]

[gateway]
base_url = "http://gateway.internal:9000"
"#,
    );
    let config = OptimizerConfig::load(file.path()).unwrap();
    assert_eq!(config.planner.max_parallelism, 8);
    assert!(config.prober.enabled);
    assert_eq!(config.prober.fast_chain, vec!["amazon.nova-micro-v1:0"]);
    assert_eq!(config.gateway.base_url, "http://gateway.internal:9000");

    let defaults = OptimizerConfig::default();
    assert_eq!(config.cache, defaults.cache);
    assert_eq!(config.prober.reasoning_chain, defaults.prober.reasoning_chain);
}

#[test]
fn test_invalid_value_is_rejected() {
    let file = write_config("[planner]\nmax_parallelism = 0\n");
    let err = OptimizerConfig::load(file.path()).unwrap_err();
    match err {
        ConfigError::Invalid { field, .. } => assert_eq!(field, "planner.max_parallelism"),
        other => panic!("expected Invalid, got {other:?}"),
    }
}

#[test]
fn test_malformed_toml_reports_path() {
    let file = write_config("[cache\noperation_timeout_ms = ");
    let err = OptimizerConfig::load(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }));
    assert!(err.to_string().contains(&file.path().display().to_string()));
}

#[test]
fn test_missing_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = OptimizerConfig::load(&dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, ConfigError::Io { .. }));
}

#[test]
fn test_env_overrides_apply_after_file() {
    let file = write_config("[planner]\nmax_parallelism = 8\n");
    let text = std::fs::read_to_string(file.path()).unwrap();
    let mut config = OptimizerConfig::from_toml_str(&text).unwrap();
    config.apply_env_with(|key| match key {
        "OPTIMIZER_MAX_PARALLELISM" => Some("2".to_string()),
        "PROBER_MODEL_OVERRIDE" => Some("pinned.model-v1".to_string()),
        _ => None,
    });
    assert_eq!(config.planner.max_parallelism, 2);
    assert_eq!(config.prober.override_model.as_deref(), Some("pinned.model-v1"));
    assert!(config.validate().is_ok());
}
