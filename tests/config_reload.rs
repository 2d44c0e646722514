// tests/config_reload.rs
//
// Hot reload of the TOML configuration and env overrides. Env-mutating tests
// are serialized.

mod common;

use std::{env, fs, thread, time::Duration};

use topic_radar::config::{AppConfig, ConfigHandle, ENV_BUDGET, ENV_CONFIG_PATH, ENV_CYCLE_SECS};
use topic_radar::error::ConfigError;

// mtime resolution is one second on some filesystems
fn wait_for_new_mtime() {
    thread::sleep(Duration::from_millis(1100));
}

#[serial_test::serial]
#[test]
fn edited_file_is_picked_up_and_broken_edit_keeps_previous() {
    env::remove_var(ENV_BUDGET);
    env::remove_var(ENV_CYCLE_SECS);
    let dir = common::unique_tmp_dir("radar_reload");
    let path = dir.join("radar.toml");
    fs::write(&path, common::PIPELINE_TOML).unwrap();

    let handle = ConfigHandle::load(&path).unwrap();
    assert_eq!(handle.current().allocator.budget, 12.0);
    assert_eq!(handle.path(), Some(path.as_path()));

    wait_for_new_mtime();
    fs::write(
        &path,
        common::PIPELINE_TOML.replace("budget = 12.0", "budget = 30.0"),
    )
    .unwrap();
    assert_eq!(handle.current().allocator.budget, 30.0);

    wait_for_new_mtime();
    // duplicate source id across topics
    fs::write(
        &path,
        common::PIPELINE_TOML.replace("wasm-search", "rust-blog"),
    )
    .unwrap();
    let cfg = handle.current();
    assert_eq!(cfg.allocator.budget, 30.0, "previous config stays active");
    assert!(cfg.topic("wasm").unwrap().sources[0].id == "wasm-search");
    assert!(matches!(handle.reload_now(), Err(ConfigError::Invalid(_))));

    // a deleted file keeps the last good config
    fs::remove_file(&path).unwrap();
    assert_eq!(handle.current().allocator.budget, 30.0);

    let _ = fs::remove_dir_all(&dir);
}

#[serial_test::serial]
#[test]
fn env_overrides_apply_on_every_load() {
    let dir = common::unique_tmp_dir("radar_env");
    let path = dir.join("radar.toml");
    fs::write(&path, common::PIPELINE_TOML).unwrap();

    env::set_var(ENV_BUDGET, "75");
    env::set_var(ENV_CYCLE_SECS, "15");
    let cfg = AppConfig::load(&path).unwrap();
    assert_eq!(cfg.allocator.budget, 75.0);
    assert_eq!(cfg.cycle_secs, 15);

    // garbage is ignored rather than fatal
    env::set_var(ENV_BUDGET, "lots");
    env::set_var(ENV_CYCLE_SECS, "0");
    let cfg = AppConfig::load(&path).unwrap();
    assert_eq!(cfg.allocator.budget, 12.0);
    assert_eq!(cfg.cycle_secs, 60);

    env::remove_var(ENV_BUDGET);
    env::remove_var(ENV_CYCLE_SECS);
    let _ = fs::remove_dir_all(&dir);
}

#[serial_test::serial]
#[test]
fn from_env_uses_config_path_variable() {
    env::remove_var(ENV_BUDGET);
    let dir = common::unique_tmp_dir("radar_from_env");
    let path = dir.join("custom.toml");
    fs::write(&path, common::PIPELINE_TOML).unwrap();

    env::set_var(ENV_CONFIG_PATH, &path);
    let (cfg, used) = AppConfig::from_env().unwrap();
    assert_eq!(used, path);
    assert_eq!(cfg.topics.len(), 2);

    env::set_var(ENV_CONFIG_PATH, dir.join("missing.toml"));
    let err = AppConfig::from_env().unwrap_err();
    assert!(format!("{err:#}").contains("missing.toml"));

    env::remove_var(ENV_CONFIG_PATH);
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn shipped_sample_config_is_valid() {
    let raw = fs::read_to_string(concat!(env!("CARGO_MANIFEST_DIR"), "/config/radar.toml"))
        .expect("config/radar.toml");
    let cfg = AppConfig::from_toml_str(&raw).unwrap();
    assert_eq!(cfg.allocator.trend_window, "short");
    assert_eq!(cfg.topics.len(), 2);
    assert!(cfg.sources().count() >= 5);
    assert_eq!(cfg.scoring.strategy.name(), "source_aware");
}

#[test]
fn unknown_trend_window_for_allocator_is_rejected() {
    let bad = format!(
        "{}\n",
        common::PIPELINE_TOML.replace("budget = 12.0", "budget = 12.0\ntrend_window = \"hourly\"")
    );
    assert!(matches!(
        AppConfig::from_toml_str(&bad),
        Err(ConfigError::Invalid(_))
    ));
}

#[test]
fn out_of_range_retry_and_span_settings_are_rejected() {
    let many_attempts = common::PIPELINE_TOML.replace("max_attempts = 2", "max_attempts = 25");
    assert!(matches!(
        AppConfig::from_toml_str(&many_attempts),
        Err(ConfigError::Invalid(_))
    ));

    let huge_tolerance = common::PIPELINE_TOML
        .replace("tolerance_secs = 300", "tolerance_secs = 10000000000000");
    assert!(matches!(
        AppConfig::from_toml_str(&huge_tolerance),
        Err(ConfigError::Invalid(_))
    ));
}
