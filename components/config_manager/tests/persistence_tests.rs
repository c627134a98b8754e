//! Disk round-trips of the configuration manager

use config_manager::{
    Configuration, ConfigurationManager, FeatureOverride, Profile, CONFIG_FILE_NAME,
    DEFAULT_PROFILE,
};
use serde_json::Value;
use std::fs;

#[test]
fn test_changes_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
        let manager = ConfigurationManager::open(dir.path());
        manager.update_global_settings(|g| g.memory_limit = 2 * 1024 * 1024 * 1024);
        manager.set_feature_enabled("leakDetector", true);
        manager
            .create_profile(Profile::new("night", "Quiet hours").with_feature(
                "performanceCollector",
                FeatureOverride {
                    enabled: Some(true),
                    ..Default::default()
                },
            ))
            .unwrap();
        manager.set_active_profile("night").unwrap();
    }

    let reopened = ConfigurationManager::open(dir.path());
    assert_eq!(reopened.active_profile(), "night");
    assert_eq!(reopened.global_settings().memory_limit, 2 * 1024 * 1024 * 1024);
    assert!(reopened.is_feature_enabled("leakDetector"));
    assert!(reopened.is_feature_enabled("performanceCollector"));
}

#[test]
fn test_corrupt_file_is_replaced_with_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(CONFIG_FILE_NAME);
    fs::write(&path, "{ this is not json").unwrap();

    let manager = ConfigurationManager::open(dir.path());
    assert_eq!(manager.configuration(), Configuration::default());

    // the file on disk was healed
    let stored: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(stored["activeProfile"], DEFAULT_PROFILE);
}

#[test]
fn test_partial_file_is_completed() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join(CONFIG_FILE_NAME),
        r#"{ "globalSettings": { "debugMode": true, "customFlag": 7 },
             "features": { "smartCleanup": { "enabled": false } } }"#,
    )
    .unwrap();

    let manager = ConfigurationManager::open(dir.path());
    let config = manager.configuration();
    let defaults = Configuration::default();

    assert!(config.global_settings.debug_mode);
    assert_eq!(config.global_settings.extra["customFlag"], 7);
    assert_eq!(
        config.global_settings.warning_threshold,
        defaults.global_settings.warning_threshold
    );
    assert!(!manager.is_feature_enabled("smartCleanup"));
    assert!(manager.is_feature_enabled("monitoring"));

    // every default key is still present after the merge
    let merged = serde_json::to_value(&config).unwrap();
    let expected = serde_json::to_value(&defaults).unwrap();
    assert_keys_present(&expected, &merged, "");
}

fn assert_keys_present(defaults: &Value, merged: &Value, path: &str) {
    if let Value::Object(map) = defaults {
        for (key, value) in map {
            let child = format!("{}/{}", path, key);
            let merged_value = merged
                .get(key)
                .unwrap_or_else(|| panic!("missing key {}", child));
            assert_keys_present(value, merged_value, &child);
        }
    }
}

#[test]
fn test_save_failure_keeps_memory_state() {
    let dir = tempfile::tempdir().unwrap();
    // a directory where the file should be makes every write fail
    let blocked = dir.path().join("blocked");
    fs::create_dir_all(blocked.join(CONFIG_FILE_NAME)).unwrap();

    let manager = ConfigurationManager::open(&blocked);
    manager.update_global_settings(|g| g.debug_mode = true);
    assert!(!manager.save_configuration());
    assert!(manager.global_settings().debug_mode);
}
