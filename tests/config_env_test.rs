//! Configuration loading through the real environment.

use std::env;
use std::fs;
use std::sync::Mutex;

use sync_relay::{LivenessPolicy, RelayConfig};
use tempfile::TempDir;

// Global lock to prevent env var pollution between tests
static ENV_LOCK: Mutex<()> = Mutex::new(());

const OVERRIDES: [&str; 4] = [
    "SYNC_RELAY_PORT",
    "SYNC_RELAY_LIVENESS_SECS",
    "SYNC_RELAY_LIVENESS_POLICY",
    "SYNC_RELAY_DRAIN_MS",
];

fn setup_test_env() -> (TempDir, std::sync::MutexGuard<'static, ()>) {
    let guard = ENV_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    let temp_dir = TempDir::new().unwrap();
    for key in OVERRIDES {
        env::remove_var(key);
    }
    env::set_var("SYNC_RELAY_CONFIG_DIR", temp_dir.path());
    (temp_dir, guard)
}

#[test]
fn test_load_reads_config_dir() {
    let (dir, _guard) = setup_test_env();
    fs::write(
        dir.path().join("config.json"),
        r#"{"port": 4242, "liveness_policy": "readiness_probe"}"#,
    )
    .unwrap();

    let config = RelayConfig::load().unwrap();
    assert_eq!(config.port, 4242);
    assert_eq!(config.liveness_policy, LivenessPolicy::ReadinessProbe);
}

#[test]
fn test_env_beats_file() {
    let (dir, _guard) = setup_test_env();
    fs::write(dir.path().join("config.json"), r#"{"port": 4242}"#).unwrap();
    env::set_var("SYNC_RELAY_PORT", "5151");
    env::set_var("SYNC_RELAY_DRAIN_MS", "not-a-number");

    let config = RelayConfig::load().unwrap();
    assert_eq!(config.port, 5151);
    assert_eq!(config.drain_interval_ms, 50);

    env::remove_var("SYNC_RELAY_PORT");
    env::remove_var("SYNC_RELAY_DRAIN_MS");
}

#[test]
fn test_save_writes_into_config_dir() {
    let (dir, _guard) = setup_test_env();
    let config = RelayConfig {
        port: 6000,
        ..RelayConfig::default()
    };
    config.save().unwrap();

    assert!(dir.path().join("config.json").exists());
    assert_eq!(RelayConfig::load().unwrap(), config);
}
