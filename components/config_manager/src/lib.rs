//! Layered configuration for the memory-pressure subsystem
//!
//! A single JSON document holds global settings, per-feature settings and named
//! profiles. Profiles overlay feature settings; the active profile is part of the
//! document. Loading is self-healing: an unreadable file is replaced with the
//! defaults, and a partial file is completed with them.

mod configuration;
mod manager;
mod merge;

pub use configuration::{
    Configuration, FeatureConfig, FeatureOverride, GlobalSettings, Profile, ProfileTrigger,
    TriggerContext, BUILTIN_FEATURES, CONFIG_VERSION, DEFAULT_PROFILE,
};
pub use manager::{default_config_dir, ConfigurationManager, CONFIG_FILE_NAME};
pub use merge::{merge_values, merge_with_defaults};
