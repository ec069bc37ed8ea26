//! Orchestrator integration tests.
//!
//! Tests the flow: config -> backend wiring -> role selection -> start -> shutdown.

use std::path::Path;
use std::time::Duration;

use logsentinel_core::config::LogSentinelConfig;
use logsentinel_daemon::cli::Role;
use logsentinel_daemon::orchestrator::Orchestrator;

/// Memory backends, watched file under `dir`, API on an ephemeral port.
fn test_config(dir: &Path) -> LogSentinelConfig {
    let toml_str = format!(
        r#"
[general]
log_level = "info"
pid_file = ""

[tail]
path = "{}"
poll_interval_ms = 10

[broker]
backend = "memory"

[storage]
backend = "memory"

[api]
listen_addr = "127.0.0.1:0"
"#,
        dir.join("app.log").display()
    );
    LogSentinelConfig::parse(&toml_str).expect("failed to parse test config")
}

#[tokio::test]
async fn test_role_all_registers_every_enabled_module() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = Orchestrator::build_from_config(test_config(dir.path()), Role::All)
        .await
        .unwrap();
    assert_eq!(orchestrator.module_names(), vec!["ingest", "detection", "api"]);
}

#[tokio::test]
async fn test_generator_registers_before_ingest() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.generator.enabled = true;

    let orchestrator = Orchestrator::build_from_config(config, Role::All).await.unwrap();
    assert_eq!(
        orchestrator.module_names(),
        vec!["generator", "ingest", "detection", "api"]
    );
}

#[tokio::test]
async fn test_roles_split_modules() {
    let dir = tempfile::tempdir().unwrap();
    let cases = [
        (Role::Producer, vec!["ingest"]),
        (Role::Consumer, vec!["detection"]),
        (Role::Dashboard, vec!["api"]),
    ];

    for (role, expected) in cases {
        let orchestrator = Orchestrator::build_from_config(test_config(dir.path()), role)
            .await
            .unwrap();
        assert_eq!(orchestrator.module_names(), expected, "role {role}");
    }
}

#[tokio::test]
async fn test_invalid_config_fails() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.api.recent_limit = 0;

    let result = Orchestrator::build_from_config(config, Role::All).await;
    assert!(result.is_err());
}

#[cfg(not(feature = "kafka"))]
#[tokio::test]
async fn test_kafka_backend_requires_feature() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.broker.backend = "kafka".to_string();

    let err = Orchestrator::build_from_config(config, Role::All)
        .await
        .err()
        .expect("kafka should be rejected without the feature");
    assert!(err.to_string().contains("kafka"));
}

#[tokio::test]
async fn test_load_from_nonexistent_file_fails() {
    let result = Orchestrator::build(Path::new("/nonexistent/logsentinel.toml"), Role::All).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_health_before_start_is_unhealthy() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = Orchestrator::build_from_config(test_config(dir.path()), Role::Consumer)
        .await
        .unwrap();

    let health = orchestrator.health().await;
    assert!(health.status.is_unhealthy());
    assert_eq!(health.modules.len(), 1);
}

#[tokio::test]
async fn test_run_until_manages_pid_file() {
    let dir = tempfile::tempdir().unwrap();
    let pid_path = dir.path().join("run").join("logsentinel.pid");
    let mut config = test_config(dir.path());
    config.general.pid_file = pid_path.display().to_string();

    let mut orchestrator = Orchestrator::build_from_config(config, Role::All).await.unwrap();

    let observed = pid_path.clone();
    orchestrator
        .run_until(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let content = std::fs::read_to_string(&observed).expect("PID file during run");
            assert_eq!(content.trim(), std::process::id().to_string());
        })
        .await
        .unwrap();

    assert!(!pid_path.exists(), "PID file should be removed on shutdown");
}

#[tokio::test]
async fn test_existing_pid_file_blocks_start() {
    let dir = tempfile::tempdir().unwrap();
    let pid_path = dir.path().join("logsentinel.pid");
    std::fs::write(&pid_path, "4242").unwrap();

    let mut config = test_config(dir.path());
    config.general.pid_file = pid_path.display().to_string();
    let mut orchestrator = Orchestrator::build_from_config(config, Role::Dashboard)
        .await
        .unwrap();

    let err = orchestrator.run_until(async {}).await.unwrap_err();
    assert!(err.to_string().contains("4242"));
    assert_eq!(std::fs::read_to_string(&pid_path).unwrap(), "4242");
}

#[tokio::test]
async fn test_startup_failure_rolls_back_and_removes_pid_file() {
    let dir = tempfile::tempdir().unwrap();
    // the watched path sits under a regular file, so ingest cannot open it
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, "x").unwrap();
    let pid_path = dir.path().join("logsentinel.pid");

    let mut config = test_config(dir.path());
    config.tail.path = blocker.join("app.log").display().to_string();
    config.general.pid_file = pid_path.display().to_string();

    let mut orchestrator = Orchestrator::build_from_config(config, Role::Producer)
        .await
        .unwrap();
    let err = orchestrator.run_until(std::future::pending()).await.unwrap_err();

    assert!(err.to_string().contains("ingest"), "got: {err}");
    assert!(!pid_path.exists());
}
