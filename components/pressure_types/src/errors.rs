// Error taxonomy shared by every memory-pressure component

use thiserror::Error;

/// Errors raised by the memory-pressure subsystem
///
/// Only `ProfileNotFound`, `CannotDeleteDefaultProfile` and `SessionNotFound` are
/// surfaced to the control surface; everything else is logged and recovered from.
#[derive(Error, Debug)]
pub enum MemoryError {
    /// A configuration profile with this name does not exist
    #[error("Profile not found: {0}")]
    ProfileNotFound(String),

    /// The built-in `default` profile cannot be removed
    #[error("The default profile cannot be deleted")]
    CannotDeleteDefaultProfile,

    /// No active profiling session has this id
    #[error("Profiling session not found: {0}")]
    SessionNotFound(String),

    /// No feature is registered under this name
    #[error("Feature not found: {0}")]
    FeatureNotFound(String),

    /// Configuration content could not be interpreted
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A monitored target rejected a command
    #[error("Target error: {0}")]
    Target(String),

    /// Heap snapshot capture failed
    #[error("Snapshot failed: {0}")]
    Snapshot(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Other errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl MemoryError {
    /// Stable machine-readable code used by the control surface
    pub fn code(&self) -> &'static str {
        match self {
            Self::ProfileNotFound(_) => "PROFILE_NOT_FOUND",
            Self::CannotDeleteDefaultProfile => "DEFAULT_PROFILE_PROTECTED",
            Self::SessionNotFound(_) => "SESSION_NOT_FOUND",
            Self::FeatureNotFound(_) => "FEATURE_NOT_FOUND",
            Self::InvalidConfiguration(_) => "INVALID_CONFIGURATION",
            Self::Target(_) => "TARGET_ERROR",
            Self::Snapshot(_) => "SNAPSHOT_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Other(_) => "INTERNAL_ERROR",
        }
    }
}

/// Result type for memory-pressure operations
pub type Result<T> = std::result::Result<T, MemoryError>;
