//! Report and CSV export types

use pressure_types::{AggregateMetrics, FeatureMetrics, Intervention, MemoryError, Result, RiskLevel};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Header of the metrics CSV export
pub const CSV_HEADER: [&str; 4] = ["timestamp", "feature", "metric", "value"];

/// State of one feature inside a report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureReport {
    pub enabled: bool,
    pub metrics: FeatureMetrics,
}

/// One tracked target inside a report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebContentsEntry {
    pub id: u64,
    pub url: String,
    /// Resident memory of the processes rendering this target
    pub memory: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk: Option<RiskLevel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<String>,
}

/// Timestamped snapshot of the whole subsystem
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryReport {
    /// RFC 3339
    pub timestamp: String,
    /// Milliseconds since the coordinator was created
    pub duration: u64,
    pub enabled: bool,
    pub features: BTreeMap<String, FeatureReport>,
    pub metrics: AggregateMetrics,
    pub interventions: Vec<Intervention>,
    pub web_contents: Vec<WebContentsEntry>,
    /// Feature-specific sections such as `leaks` and `performance`
    #[serde(flatten)]
    pub extras: Map<String, Value>,
}

impl MemoryReport {
    pub fn web_contents_for(&self, url: &str) -> Option<&WebContentsEntry> {
        self.web_contents.iter().find(|entry| entry.url == url)
    }
}

/// Write two rows (`activations`, `memorySaved`) per feature
pub fn metrics_csv<'a>(
    timestamp: &str,
    rows: impl IntoIterator<Item = (&'a str, &'a FeatureMetrics)>,
) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    let csv_error = |e: csv::Error| MemoryError::Other(e.into());

    writer.write_record(CSV_HEADER).map_err(csv_error)?;
    for (name, metrics) in rows {
        let activations = metrics.activations.to_string();
        let memory_saved = metrics.memory_saved.to_string();
        writer
            .write_record([timestamp, name, "activations", activations.as_str()])
            .map_err(csv_error)?;
        writer
            .write_record([timestamp, name, "memorySaved", memory_saved.as_str()])
            .map_err(csv_error)?;
    }

    let bytes = writer.into_inner().map_err(|e| MemoryError::Io(e.into_error()))?;
    String::from_utf8(bytes).map_err(|e| MemoryError::Other(e.into()))
}
