//! 配置与可观测性集成测试

use rule_shared::config::{AppConfig, ObservabilityConfig};
use rule_shared::observability;
use std::fs;
use std::path::PathBuf;

fn config_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("rule-shared-{name}-{}", std::process::id()));
    fs::create_dir_all(&dir).unwrap();
    dir
}

#[test]
fn test_service_file_overrides_default_file() {
    let dir = config_dir("layered");
    fs::write(
        dir.join("default.toml"),
        r#"
[script]
timeout_ms = 500
max_idle = 4

[chain]
default_action = "review"
"#,
    )
    .unwrap();
    fs::write(
        dir.join("rule-engine.toml"),
        r#"
[script]
timeout_ms = 250

[observability]
json_logs = true
"#,
    )
    .unwrap();

    let config = AppConfig::load_from("rule-engine", dir.to_str().unwrap()).unwrap();
    assert_eq!(config.script.timeout_ms, 250);
    assert_eq!(config.script.max_idle, 4);
    // 未配置的字段保持默认值
    assert_eq!(config.script.max_call_levels, 32);
    assert_eq!(config.chain.default_action, "review");
    assert!(config.chain.record_executions);
    assert!(config.observability.json_logs);
}

#[test]
fn test_malformed_file_is_an_error() {
    let dir = config_dir("malformed");
    fs::write(dir.join("default.toml"), "[script\ntimeout_ms = ").unwrap();
    assert!(AppConfig::load_from("rule-engine", dir.to_str().unwrap()).is_err());
}

#[test]
fn test_init_twice_reports_error() {
    let config = ObservabilityConfig::default();
    observability::init("rule-engine-test", &config).unwrap();
    assert!(observability::init("rule-engine-test", &config).is_err());
}
