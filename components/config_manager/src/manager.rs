//! Configuration manager: persistence, profiles and effective feature settings

use crate::configuration::{
    Configuration, FeatureConfig, GlobalSettings, Profile, TriggerContext, DEFAULT_PROFILE,
};
use crate::merge::merge_with_defaults;
use parking_lot::RwLock;
use pressure_types::{MemoryError, Result};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// File name of the persisted configuration
pub const CONFIG_FILE_NAME: &str = "memory-management.json";

/// Directory the configuration lives in when no path is given
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("memory-pressure")
}

/// Owns the configuration document and keeps it in sync with disk
///
/// Every mutating operation persists immediately. Persistence failures are
/// logged; the in-memory state stays authoritative.
pub struct ConfigurationManager {
    path: PathBuf,
    config: RwLock<Configuration>,
}

impl ConfigurationManager {
    /// Create a manager backed by `path` holding the defaults; nothing is read
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            config: RwLock::new(Configuration::default()),
        }
    }

    /// Create a manager for `dir` and load whatever is stored there
    pub fn open(dir: impl AsRef<Path>) -> Self {
        let manager = Self::new(dir.as_ref().join(CONFIG_FILE_NAME));
        manager.load_configuration();
        manager
    }

    /// Create a manager for the per-user configuration directory
    pub fn open_default() -> Self {
        Self::open(default_config_dir())
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the stored configuration, healing the file if it is unusable
    ///
    /// Returns true when an existing file was loaded.
    pub fn load_configuration(&self) -> bool {
        match self.read_from_disk() {
            Ok(config) => {
                *self.config.write() = config;
                info!(path = %self.path.display(), "Configuration loaded");
                true
            }
            Err(MemoryError::Io(e)) if e.kind() == ErrorKind::NotFound => {
                info!(path = %self.path.display(), "No configuration found, writing defaults");
                *self.config.write() = Configuration::default();
                self.save_configuration();
                false
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Configuration unreadable, restoring defaults");
                *self.config.write() = Configuration::default();
                self.save_configuration();
                false
            }
        }
    }

    fn read_from_disk(&self) -> Result<Configuration> {
        let content = fs::read_to_string(&self.path)?;
        let loaded = serde_json::from_str(&content)?;
        merge_with_defaults(loaded)
    }

    /// Persist the configuration; returns false (after logging) on failure
    pub fn save_configuration(&self) -> bool {
        match self.write_to_disk() {
            Ok(()) => {
                debug!(path = %self.path.display(), "Configuration saved");
                true
            }
            Err(e) => {
                error!(path = %self.path.display(), error = %e, "Failed to save configuration");
                false
            }
        }
    }

    fn write_to_disk(&self) -> Result<()> {
        let json = serde_json::to_string_pretty(&*self.config.read())?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(&self.path, json)?;
        Ok(())
    }

    /// Copy of the whole document
    pub fn configuration(&self) -> Configuration {
        self.config.read().clone()
    }

    /// Copy of the global settings
    pub fn global_settings(&self) -> GlobalSettings {
        self.config.read().global_settings.clone()
    }

    /// Effective settings of a feature: base config overlaid by the active profile
    pub fn get_feature_config(&self, name: &str) -> Option<FeatureConfig> {
        let config = self.config.read();
        let base = config.features.get(name)?;
        let patch = config
            .profiles
            .get(&config.active_profile)
            .and_then(|profile| profile.features.get(name));
        Some(match patch {
            Some(patch) => base.overlay(patch),
            None => base.clone(),
        })
    }

    /// Whether a feature should run; always false when the global switch is off
    pub fn is_feature_enabled(&self, name: &str) -> bool {
        if !self.config.read().global_settings.enabled {
            return false;
        }
        self.get_feature_config(name)
            .map(|c| c.enabled)
            .unwrap_or(false)
    }

    /// Name of the active profile
    pub fn active_profile(&self) -> String {
        self.config.read().active_profile.clone()
    }

    /// Activate a profile
    pub fn set_active_profile(&self, name: &str) -> Result<()> {
        {
            let mut config = self.config.write();
            if !config.profiles.contains_key(name) {
                return Err(MemoryError::ProfileNotFound(name.to_string()));
            }
            config.active_profile = name.to_string();
        }
        info!(profile = name, "Active profile changed");
        self.save_configuration();
        Ok(())
    }

    /// Create or replace a profile
    pub fn create_profile(&self, profile: Profile) -> Result<()> {
        if profile.name.trim().is_empty() {
            return Err(MemoryError::InvalidConfiguration(
                "profile name must not be empty".to_string(),
            ));
        }
        let name = profile.name.clone();
        let replaced = self
            .config
            .write()
            .profiles
            .insert(name.clone(), profile)
            .is_some();
        info!(profile = %name, replaced, "Profile stored");
        self.save_configuration();
        Ok(())
    }

    /// Delete a profile; the active one falls back to `default`
    pub fn delete_profile(&self, name: &str) -> Result<()> {
        if name == DEFAULT_PROFILE {
            return Err(MemoryError::CannotDeleteDefaultProfile);
        }
        {
            let mut config = self.config.write();
            if config.profiles.remove(name).is_none() {
                return Err(MemoryError::ProfileNotFound(name.to_string()));
            }
            if config.active_profile == name {
                config.active_profile = DEFAULT_PROFILE.to_string();
            }
        }
        info!(profile = name, "Profile deleted");
        self.save_configuration();
        Ok(())
    }

    /// All profiles, ordered by name
    pub fn list_profiles(&self) -> Vec<Profile> {
        self.config.read().profiles.values().cloned().collect()
    }

    /// First non-active profile (by name) whose triggers all hold in `context`
    pub fn matching_profile(&self, context: &TriggerContext) -> Option<String> {
        let config = self.config.read();
        config
            .profiles
            .values()
            .filter(|profile| profile.name != config.active_profile)
            .find(|profile| profile.matches(context))
            .map(|profile| profile.name.clone())
    }

    /// Modify the global settings in place and persist them
    pub fn update_global_settings(&self, update: impl FnOnce(&mut GlobalSettings)) {
        update(&mut self.config.write().global_settings);
        self.save_configuration();
    }

    /// Modify a feature's base settings in place, creating the entry if needed
    pub fn update_feature_config(&self, name: &str, update: impl FnOnce(&mut FeatureConfig)) {
        {
            let mut config = self.config.write();
            let feature = config.features.entry(name.to_string()).or_default();
            update(feature);
            feature.priority = feature.priority.min(100);
        }
        self.save_configuration();
    }

    /// Set a feature's base enabled flag
    pub fn set_feature_enabled(&self, name: &str, enabled: bool) {
        self.update_feature_config(name, |feature| feature.enabled = enabled);
    }

    /// Serialize the whole document as pretty JSON
    pub fn export_configuration(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&*self.config.read())?)
    }

    /// Replace the document with `json`, completed with the defaults
    pub fn import_configuration(&self, json: &str) -> Result<()> {
        let loaded = serde_json::from_str(json)
            .map_err(|e| MemoryError::InvalidConfiguration(e.to_string()))?;
        let config = merge_with_defaults(loaded)?;
        *self.config.write() = config;
        info!("Configuration imported");
        self.save_configuration();
        Ok(())
    }

    /// Restore and persist the defaults
    pub fn reset_to_defaults(&self) {
        *self.config.write() = Configuration::default();
        info!("Configuration reset to defaults");
        self.save_configuration();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configuration::{FeatureOverride, ProfileTrigger};

    fn manager() -> (tempfile::TempDir, ConfigurationManager) {
        let dir = tempfile::tempdir().unwrap();
        let manager = ConfigurationManager::open(dir.path());
        (dir, manager)
    }

    #[test]
    fn test_first_open_writes_defaults() {
        let (dir, manager) = manager();
        assert!(dir.path().join(CONFIG_FILE_NAME).exists());
        assert_eq!(manager.configuration(), Configuration::default());
    }

    #[test]
    fn test_profile_overlay() {
        let (_dir, manager) = manager();
        assert!(!manager.is_feature_enabled("autoReload"));

        manager.set_active_profile("performance").unwrap();
        assert!(manager.is_feature_enabled("autoReload"));

        let cleanup = manager.get_feature_config("smartCleanup").unwrap();
        assert_eq!(cleanup.setting_u64("cleanupInterval"), Some(300_000));
    }

    #[test]
    fn test_global_kill_switch() {
        let (_dir, manager) = manager();
        assert!(manager.is_feature_enabled("monitoring"));

        manager.update_global_settings(|g| g.enabled = false);
        assert!(!manager.is_feature_enabled("monitoring"));
        // the stored per-feature flag is untouched
        assert!(manager.get_feature_config("monitoring").unwrap().enabled);
    }

    #[test]
    fn test_unknown_feature() {
        let (_dir, manager) = manager();
        assert!(manager.get_feature_config("nope").is_none());
        assert!(!manager.is_feature_enabled("nope"));
    }

    #[test]
    fn test_set_unknown_profile_fails() {
        let (_dir, manager) = manager();
        let err = manager.set_active_profile("gaming").unwrap_err();
        assert!(matches!(err, MemoryError::ProfileNotFound(_)));
        assert_eq!(manager.active_profile(), DEFAULT_PROFILE);
    }

    #[test]
    fn test_delete_default_profile_fails() {
        let (_dir, manager) = manager();
        assert!(matches!(
            manager.delete_profile(DEFAULT_PROFILE),
            Err(MemoryError::CannotDeleteDefaultProfile)
        ));
        assert!(matches!(
            manager.delete_profile("missing"),
            Err(MemoryError::ProfileNotFound(_))
        ));
    }

    #[test]
    fn test_delete_active_profile_falls_back() {
        let (_dir, manager) = manager();
        manager
            .create_profile(Profile::new("gaming", "").with_feature(
                "autoReload",
                FeatureOverride {
                    enabled: Some(true),
                    ..Default::default()
                },
            ))
            .unwrap();
        manager.set_active_profile("gaming").unwrap();
        assert!(manager.is_feature_enabled("autoReload"));

        manager.delete_profile("gaming").unwrap();
        assert_eq!(manager.active_profile(), DEFAULT_PROFILE);
        assert!(!manager.is_feature_enabled("autoReload"));
    }

    #[test]
    fn test_create_profile_requires_name() {
        let (_dir, manager) = manager();
        assert!(manager.create_profile(Profile::new("  ", "")).is_err());
    }

    #[test]
    fn test_matching_profile() {
        let (_dir, manager) = manager();
        manager
            .create_profile(
                Profile::new("crowded", "")
                    .with_trigger(ProfileTrigger::TargetCountAbove { count: 20 }),
            )
            .unwrap();

        let calm = TriggerContext {
            memory_percent: 40.0,
            hour: 12,
            target_count: 3,
        };
        assert_eq!(manager.matching_profile(&calm), None);

        let crowded = TriggerContext {
            target_count: 30,
            ..calm
        };
        assert_eq!(manager.matching_profile(&crowded).as_deref(), Some("crowded"));

        let pressured = TriggerContext {
            memory_percent: 90.0,
            ..calm
        };
        assert_eq!(
            manager.matching_profile(&pressured).as_deref(),
            Some("performance")
        );

        manager.set_active_profile("performance").unwrap();
        assert_eq!(manager.matching_profile(&pressured), None);
    }

    #[test]
    fn test_export_import() {
        let (_dir, manager) = manager();
        manager.set_feature_enabled("leakDetector", true);
        let exported = manager.export_configuration().unwrap();

        let (_other_dir, other) = self::manager();
        other.import_configuration(&exported).unwrap();
        assert!(other.is_feature_enabled("leakDetector"));
        assert_eq!(other.configuration(), manager.configuration());

        assert!(other.import_configuration("not json").is_err());
        // a failed import leaves the document untouched
        assert!(other.is_feature_enabled("leakDetector"));
    }

    #[test]
    fn test_reset_to_defaults() {
        let (_dir, manager) = manager();
        manager.update_global_settings(|g| g.debug_mode = true);
        manager.set_active_profile("powerSaver").unwrap();

        manager.reset_to_defaults();
        assert_eq!(manager.configuration(), Configuration::default());
    }
}
