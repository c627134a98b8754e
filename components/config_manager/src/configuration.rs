//! Configuration document and built-in defaults

use pressure_types::GB;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

/// Name of the profile that always exists
pub const DEFAULT_PROFILE: &str = "default";

/// Current configuration document version
pub const CONFIG_VERSION: &str = "1.0.0";

/// Feature keys known to the subsystem, in registration order
pub const BUILTIN_FEATURES: [&str; 7] = [
    "monitoring",
    "smartCleanup",
    "autoReload",
    "domOptimization",
    "websocketManager",
    "leakDetector",
    "performanceCollector",
];

/// Persisted configuration document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Configuration {
    pub version: String,
    pub global_settings: GlobalSettings,
    pub features: BTreeMap<String, FeatureConfig>,
    pub profiles: BTreeMap<String, Profile>,
    pub active_profile: String,
}

/// Settings that apply to the whole subsystem
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalSettings {
    /// Global kill switch: when false no feature is considered enabled
    pub enabled: bool,
    pub debug_mode: bool,
    /// Sampling interval of the monitor, in milliseconds
    pub check_interval: u64,
    /// Memory budget in bytes used by risk classification
    pub memory_limit: u64,
    /// Percent of `memory_limit` considered a warning
    pub warning_threshold: f64,
    /// Percent of `memory_limit` considered critical
    pub critical_threshold: f64,
    pub history_size: usize,
    /// How far ahead predictions look, in minutes
    pub prediction_horizon: f64,
    pub show_notifications: bool,
    /// Unknown fields are kept so newer files survive a round trip
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            debug_mode: false,
            check_interval: 30_000,
            memory_limit: 4 * GB,
            warning_threshold: 75.0,
            critical_threshold: 90.0,
            history_size: 100,
            prediction_horizon: 5.0,
            show_notifications: true,
            extra: Map::new(),
        }
    }
}

/// Per-feature settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FeatureConfig {
    pub enabled: bool,
    /// 0-100, higher runs first
    pub priority: u8,
    pub custom_settings: Map<String, Value>,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            priority: 50,
            custom_settings: Map::new(),
        }
    }
}

impl FeatureConfig {
    fn new(enabled: bool, priority: u8, custom_settings: Value) -> Self {
        Self {
            enabled,
            priority,
            custom_settings: match custom_settings {
                Value::Object(map) => map,
                _ => Map::new(),
            },
        }
    }

    /// Read an integer custom setting
    pub fn setting_u64(&self, key: &str) -> Option<u64> {
        self.custom_settings.get(key).and_then(Value::as_u64)
    }

    /// Read a boolean custom setting
    pub fn setting_bool(&self, key: &str) -> Option<bool> {
        self.custom_settings.get(key).and_then(Value::as_bool)
    }

    /// Apply a profile override: scalar fields replace, custom settings merge
    pub fn overlay(&self, patch: &FeatureOverride) -> FeatureConfig {
        let mut merged = self.clone();
        if let Some(enabled) = patch.enabled {
            merged.enabled = enabled;
        }
        if let Some(priority) = patch.priority {
            merged.priority = priority.min(100);
        }
        if let Some(custom) = &patch.custom_settings {
            for (key, value) in custom {
                merged.custom_settings.insert(key.clone(), value.clone());
            }
        }
        merged
    }
}

/// Partial feature settings carried by a profile
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureOverride {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_settings: Option<Map<String, Value>>,
}

/// Named overlay of feature settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Profile {
    pub name: String,
    pub description: String,
    pub features: BTreeMap<String, FeatureOverride>,
    pub triggers: Vec<ProfileTrigger>,
}

impl Profile {
    /// Create an empty profile
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            ..Default::default()
        }
    }

    /// Add a feature override
    pub fn with_feature(mut self, feature: &str, patch: FeatureOverride) -> Self {
        self.features.insert(feature.to_string(), patch);
        self
    }

    /// Add an activation trigger
    pub fn with_trigger(mut self, trigger: ProfileTrigger) -> Self {
        self.triggers.push(trigger);
        self
    }

    /// A profile matches when it has triggers and all of them hold
    pub fn matches(&self, context: &TriggerContext) -> bool {
        !self.triggers.is_empty() && self.triggers.iter().all(|t| t.matches(context))
    }
}

/// Condition under which a profile should become active
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ProfileTrigger {
    /// Memory usage above a percent of the limit
    MemoryAbove { percent: f64 },
    /// Local hour in `[start, end)`, wrapping past midnight when `start > end`
    HourBetween { start: u8, end: u8 },
    /// More targets tracked than `count`
    TargetCountAbove { count: usize },
}

impl ProfileTrigger {
    /// Whether the condition holds in `context`
    pub fn matches(&self, context: &TriggerContext) -> bool {
        match *self {
            Self::MemoryAbove { percent } => context.memory_percent > percent,
            Self::HourBetween { start, end } => {
                if start <= end {
                    context.hour >= start && context.hour < end
                } else {
                    context.hour >= start || context.hour < end
                }
            }
            Self::TargetCountAbove { count } => context.target_count > count,
        }
    }
}

/// Observed conditions that profile triggers are evaluated against
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TriggerContext {
    pub memory_percent: f64,
    pub hour: u8,
    pub target_count: usize,
}

impl Default for Configuration {
    fn default() -> Self {
        let mut features = BTreeMap::new();
        features.insert(
            "monitoring".to_string(),
            FeatureConfig::new(true, 100, json!({ "alertOnHighRisk": true })),
        );
        features.insert(
            "smartCleanup".to_string(),
            FeatureConfig::new(true, 80, json!({ "cleanupInterval": 900_000u64 })),
        );
        features.insert(
            "autoReload".to_string(),
            FeatureConfig::new(false, 60, json!({ "cooldownMinutes": 10 })),
        );
        features.insert(
            "domOptimization".to_string(),
            FeatureConfig::new(false, 40, json!({ "lazyImages": true })),
        );
        features.insert(
            "websocketManager".to_string(),
            FeatureConfig::new(false, 30, json!({ "reconnectOnResume": true })),
        );
        features.insert(
            "leakDetector".to_string(),
            FeatureConfig::new(false, 50, json!({ "scanInterval": 300_000u64 })),
        );
        features.insert(
            "performanceCollector".to_string(),
            FeatureConfig::new(false, 20, json!({ "sampleInterval": 60_000u64 })),
        );

        let mut profiles = BTreeMap::new();
        profiles.insert(
            DEFAULT_PROFILE.to_string(),
            Profile::new(DEFAULT_PROFILE, "Balanced settings"),
        );
        profiles.insert(
            "performance".to_string(),
            Profile::new("performance", "Aggressive cleanup under pressure")
                .with_feature(
                    "smartCleanup",
                    FeatureOverride {
                        enabled: Some(true),
                        priority: None,
                        custom_settings: Some(map(json!({ "cleanupInterval": 300_000u64 }))),
                    },
                )
                .with_feature(
                    "autoReload",
                    FeatureOverride {
                        enabled: Some(true),
                        ..Default::default()
                    },
                )
                .with_trigger(ProfileTrigger::MemoryAbove { percent: 85.0 }),
        );
        profiles.insert(
            "powerSaver".to_string(),
            Profile::new("powerSaver", "Fewer background timers")
                .with_feature(
                    "websocketManager",
                    FeatureOverride {
                        enabled: Some(true),
                        ..Default::default()
                    },
                )
                .with_feature(
                    "performanceCollector",
                    FeatureOverride {
                        enabled: Some(false),
                        ..Default::default()
                    },
                ),
        );

        Self {
            version: CONFIG_VERSION.to_string(),
            global_settings: GlobalSettings::default(),
            features,
            profiles,
            active_profile: DEFAULT_PROFILE.to_string(),
        }
    }
}

fn map(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
