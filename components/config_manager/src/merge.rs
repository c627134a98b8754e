//! Recursive defaults merge for loaded configuration files

use crate::configuration::{Configuration, DEFAULT_PROFILE};
use pressure_types::{MemoryError, Result};
use serde_json::Value;
use tracing::warn;

/// Deep-merge `overlay` onto `base`
///
/// Objects merge key by key; any other value in `overlay` replaces the one in
/// `base`. Keys only present in `overlay` are kept.
pub fn merge_values(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Complete a possibly partial configuration document with the defaults
///
/// Every key present in the defaults is present in the result, and every value
/// present in `loaded` wins over the default.
pub fn merge_with_defaults(loaded: Value) -> Result<Configuration> {
    if !loaded.is_object() {
        return Err(MemoryError::InvalidConfiguration(
            "configuration root must be an object".to_string(),
        ));
    }

    let mut merged = serde_json::to_value(Configuration::default())?;
    merge_values(&mut merged, loaded);

    let mut config: Configuration = serde_json::from_value(merged)
        .map_err(|e| MemoryError::InvalidConfiguration(e.to_string()))?;
    normalize(&mut config);
    Ok(config)
}

/// Repair values that deserialize fine but break invariants
fn normalize(config: &mut Configuration) {
    for feature in config.features.values_mut() {
        feature.priority = feature.priority.min(100);
    }
    for (key, profile) in config.profiles.iter_mut() {
        if profile.name.is_empty() {
            profile.name = key.clone();
        }
    }
    if !config.profiles.contains_key(&config.active_profile) {
        warn!(
            profile = %config.active_profile,
            "Active profile missing, falling back to default"
        );
        config.active_profile = DEFAULT_PROFILE.to_string();
    }
}
