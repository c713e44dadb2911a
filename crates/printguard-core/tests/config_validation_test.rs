//! Configuration loading and validation tests.

use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;

use printguard_core::config::{env_vars, PrintGuardConfig};
use printguard_core::Error;

#[test]
fn test_parse_full_toml() {
    let config = PrintGuardConfig::from_toml_str(
        r#"
        [storage]
        path = "/var/lib/printguard/db.redb"
        create_dirs = false

        [history]
        enabled = true

        [telemetry]
        ttl_secs = 60
        max_devices = 500

        [events]
        capacity = 64
        "#,
    )
    .unwrap();

    assert_eq!(config.storage.path, PathBuf::from("/var/lib/printguard/db.redb"));
    assert!(!config.storage.create_dirs);
    assert!(config.history.enabled);
    assert_eq!(config.telemetry.ttl_secs, 60);
    assert_eq!(config.telemetry.max_devices, 500);
    assert_eq!(config.events.capacity, 64);
}

#[test]
fn test_partial_toml_keeps_defaults() {
    let config = PrintGuardConfig::from_toml_str("[history]\nenabled = true\n").unwrap();
    let defaults = PrintGuardConfig::default();

    assert!(config.history.enabled);
    assert_eq!(config.storage, defaults.storage);
    assert_eq!(config.telemetry, defaults.telemetry);
}

#[test]
fn test_invalid_toml_is_configuration_error() {
    let result = PrintGuardConfig::from_toml_str("[storage\npath = 1");
    assert!(matches!(result, Err(Error::Configuration(_))));
}

#[test]
fn test_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[telemetry]\nttl_secs = 42").unwrap();

    let config = PrintGuardConfig::from_file(file.path()).unwrap();
    assert_eq!(config.telemetry.ttl_secs, 42);
}

#[test]
fn test_load_explicit_path_validates() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[events]\ncapacity = 0").unwrap();

    let result = PrintGuardConfig::load(Some(file.path()));
    assert!(matches!(result, Err(Error::Configuration(_))));
}

#[test]
fn test_missing_file_is_configuration_error() {
    let result = PrintGuardConfig::from_file("/definitely/not/here.toml");
    assert!(matches!(result, Err(Error::Configuration(_))));
}

#[test]
fn test_env_overrides() {
    let env: HashMap<&str, &str> = [
        (env_vars::DATA_PATH, "/tmp/override.redb"),
        (env_vars::ENABLE_HISTORY, "True"),
        (env_vars::TELEMETRY_TTL_SECS, "15"),
    ]
    .into_iter()
    .collect();

    let mut config = PrintGuardConfig::default();
    config
        .apply_env_overrides(|key| env.get(key).map(|v| v.to_string()))
        .unwrap();

    assert_eq!(config.storage.path, PathBuf::from("/tmp/override.redb"));
    assert!(config.history.enabled);
    assert_eq!(config.telemetry.ttl_secs, 15);
}

#[test]
fn test_bad_env_override() {
    let mut config = PrintGuardConfig::default();
    let result = config.apply_env_overrides(|key| {
        (key == env_vars::ENABLE_HISTORY).then(|| "sometimes".to_string())
    });
    assert!(matches!(result, Err(Error::Configuration(_))));
}

#[test]
fn test_zero_ttl_rejected() {
    let mut config = PrintGuardConfig::default();
    config.telemetry.ttl_secs = 0;
    assert!(config.validate().is_err());
}
