//! Control-surface messages

use config_manager::Profile;
use feature_coordinator::MemoryReport;
use features::MemorySnapshot;
use memory_profiler::{MemoryProfile, ProfilingOptions};
use pressure_types::{AggregateMetrics, MemoryError};
use serde::{Deserialize, Serialize};

/// Code returned for messages that cannot be parsed
pub const INVALID_REQUEST: &str = "INVALID_REQUEST";

/// Request sent by the host or UI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Request {
    /// Switch the whole subsystem on or off
    ToggleAll {
        /// Target state
        enabled: bool,
    },
    /// Switch one feature on or off
    ToggleFeature {
        /// Feature name
        name: String,
        /// Target state
        enabled: bool,
    },
    /// Aggregate feature metrics
    GetMetrics,
    /// Take a monitoring pass now
    RequestSnapshot,
    /// Start a profiling session
    StartProfile {
        /// Session options; defaults apply to omitted fields
        #[serde(default)]
        options: ProfilingOptions,
    },
    /// Stop a profiling session and return its report
    StopProfile {
        /// Id returned by `startProfile`
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    /// Feature metrics as CSV
    ExportCsv,
    /// Name of the active configuration profile
    GetActiveProfile,
    /// Activate a configuration profile
    SetActiveProfile {
        /// Profile name
        name: String,
    },
    /// Create or replace a configuration profile
    CreateProfile {
        /// Profile to store
        profile: Profile,
    },
    /// Delete a configuration profile
    DeleteProfile {
        /// Profile name
        name: String,
    },
    /// Every configuration profile
    ListProfiles,
    /// Full subsystem report
    GenerateReport,
}

/// Response returned for every request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Response {
    /// Outcome of a state-changing request; `applied` is false for no-ops
    Ack {
        /// Whether the request changed anything
        applied: bool,
    },
    /// Aggregate feature metrics
    Metrics {
        /// Sums over every feature
        metrics: AggregateMetrics,
    },
    /// Monitoring pass; `None` while monitoring is disabled
    Snapshot {
        /// Snapshot contents
        snapshot: Option<MemorySnapshot>,
    },
    /// A profiling session was started
    ProfileStarted {
        /// Session id for `stopProfile`
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    /// Report of a finished profiling session
    ProfileReport {
        /// Finished session report
        profile: MemoryProfile,
    },
    /// Metrics CSV
    Csv {
        /// CSV text with a header row
        csv: String,
    },
    /// Active configuration profile
    ActiveProfile {
        /// Profile name
        name: String,
    },
    /// Every configuration profile
    Profiles {
        /// Profiles ordered by name
        profiles: Vec<Profile>,
    },
    /// Full subsystem report
    Report {
        /// Report contents
        report: Box<MemoryReport>,
    },
    /// A request that the caller got wrong
    Error {
        /// Stable machine-readable code
        code: String,
        /// Human-readable description
        message: String,
    },
}

impl Response {
    /// Error response for a named error
    pub fn error(err: &MemoryError) -> Self {
        Self::Error {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }

    /// Error response for a message that could not be parsed
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::Error {
            code: INVALID_REQUEST.to_string(),
            message: message.into(),
        }
    }

    /// Whether this is an error response
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }
}
