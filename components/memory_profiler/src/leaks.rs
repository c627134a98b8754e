//! Threshold-based leak heuristics
//!
//! These are advisory signals, not proofs: each resource class is compared
//! against a fixed count and reported independently of the others.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Script evaluated in a target to collect DOM statistics
///
/// Listener counts are a proxy: only inline handlers for a handful of common
/// events are counted.
pub const DOM_STATS_SCRIPT: &str = r#"(() => {
  const all = document.getElementsByTagName('*');
  const events = ['click', 'scroll', 'resize', 'keydown', 'mousemove', 'input', 'load'];
  let listeners = 0;
  for (const el of all) {
    for (const name of events) {
      if (typeof el['on' + name] === 'function') listeners++;
    }
  }
  return {
    domNodes: all.length,
    detachedNodes: window.__detachedNodeCount || 0,
    eventListeners: listeners
  };
})()"#;

/// Estimated retained bytes per DOM node
const DOM_NODE_BYTES: u64 = 512;
/// Estimated retained bytes per listener closure
const LISTENER_BYTES: u64 = 128;
/// Estimated retained bytes per live timer or handle
const HANDLE_BYTES: u64 = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LeakType {
    #[serde(rename = "DOM")]
    Dom,
    EventListener,
    Timer,
    Promise,
    Closure,
    DetachedNode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeakSeverity {
    Low,
    Medium,
    High,
}

/// One suspected leak
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectedLeak {
    #[serde(rename = "type")]
    pub leak_type: LeakType,
    pub severity: LeakSeverity,
    /// Rough estimate of retained bytes
    pub size_bytes: u64,
    pub count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub recommendation: String,
}

/// Resource counts observed at the end of a session; `None` means unavailable
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LeakSignals {
    pub dom_nodes: Option<u64>,
    pub detached_nodes: Option<u64>,
    pub event_listeners: Option<u64>,
    pub active_handles: Option<u64>,
}

impl LeakSignals {
    /// Merge the result of [`DOM_STATS_SCRIPT`] into these signals
    pub fn with_dom_stats(mut self, stats: &Value) -> Self {
        let read = |key: &str| stats.get(key).and_then(Value::as_u64);
        self.dom_nodes = read("domNodes").or(self.dom_nodes);
        self.detached_nodes = read("detachedNodes").or(self.detached_nodes);
        self.event_listeners = read("eventListeners").or(self.event_listeners);
        self
    }
}

/// Report threshold and high-severity threshold of one resource class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Threshold {
    /// Counts strictly above this are reported
    pub report_above: u64,
    /// Counts strictly above this are high severity
    pub high_above: u64,
}

impl Threshold {
    pub const fn new(report_above: u64, high_above: u64) -> Self {
        Self {
            report_above,
            high_above,
        }
    }

    fn severity(&self, count: u64) -> Option<LeakSeverity> {
        if count > self.high_above {
            Some(LeakSeverity::High)
        } else if count > self.report_above {
            Some(LeakSeverity::Medium)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeakThresholds {
    pub dom_nodes: Threshold,
    pub detached_nodes: Threshold,
    pub event_listeners: Threshold,
    pub active_handles: Threshold,
}

impl Default for LeakThresholds {
    fn default() -> Self {
        Self {
            dom_nodes: Threshold::new(10_000, 50_000),
            detached_nodes: Threshold::new(100, 1_000),
            event_listeners: Threshold::new(1_000, 5_000),
            active_handles: Threshold::new(100, 500),
        }
    }
}

/// Apply every heuristic to `signals`
pub fn detect_leaks(signals: &LeakSignals, thresholds: &LeakThresholds) -> Vec<DetectedLeak> {
    let checks = [
        (
            LeakType::Dom,
            signals.dom_nodes,
            thresholds.dom_nodes,
            DOM_NODE_BYTES,
            "Large DOM tree; virtualize long lists or remove offscreen nodes",
        ),
        (
            LeakType::DetachedNode,
            signals.detached_nodes,
            thresholds.detached_nodes,
            DOM_NODE_BYTES,
            "Detached DOM nodes are still referenced; release references after removing elements",
        ),
        (
            LeakType::EventListener,
            signals.event_listeners,
            thresholds.event_listeners,
            LISTENER_BYTES,
            "Many event listeners; remove listeners when elements are discarded",
        ),
        (
            LeakType::Timer,
            signals.active_handles,
            thresholds.active_handles,
            HANDLE_BYTES,
            "Many active timers or handles; clear intervals and close handles that are no longer used",
        ),
    ];

    checks
        .into_iter()
        .filter_map(|(leak_type, count, threshold, unit, advice)| {
            let count = count?;
            let severity = threshold.severity(count)?;
            Some(DetectedLeak {
                leak_type,
                severity,
                size_bytes: count.saturating_mul(unit),
                count,
                location: None,
                recommendation: advice.to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn detached(count: u64) -> Vec<DetectedLeak> {
        let signals = LeakSignals {
            detached_nodes: Some(count),
            ..Default::default()
        };
        detect_leaks(&signals, &LeakThresholds::default())
    }

    #[test]
    fn test_detached_node_boundaries() {
        assert!(detached(100).is_empty());

        let leaks = detached(101);
        assert_eq!(leaks.len(), 1);
        assert_eq!(leaks[0].leak_type, LeakType::DetachedNode);
        assert_eq!(leaks[0].severity, LeakSeverity::Medium);

        assert_eq!(detached(1_000)[0].severity, LeakSeverity::Medium);
        assert_eq!(detached(1_001)[0].severity, LeakSeverity::High);
    }

    #[test]
    fn test_heuristics_are_independent() {
        let signals = LeakSignals {
            dom_nodes: Some(60_000),
            detached_nodes: Some(50),
            event_listeners: Some(2_000),
            active_handles: Some(501),
        };
        let leaks = detect_leaks(&signals, &LeakThresholds::default());

        let kinds: Vec<_> = leaks.iter().map(|l| (l.leak_type, l.severity)).collect();
        assert_eq!(
            kinds,
            vec![
                (LeakType::Dom, LeakSeverity::High),
                (LeakType::EventListener, LeakSeverity::Medium),
                (LeakType::Timer, LeakSeverity::High),
            ]
        );
    }

    #[test]
    fn test_missing_signals_report_nothing() {
        assert!(detect_leaks(&LeakSignals::default(), &LeakThresholds::default()).is_empty());
    }

    #[test]
    fn test_dom_stats_parsing() {
        let signals = LeakSignals {
            active_handles: Some(3),
            ..Default::default()
        }
        .with_dom_stats(&json!({ "domNodes": 1200, "detachedNodes": 7, "eventListeners": "bad" }));

        assert_eq!(signals.dom_nodes, Some(1200));
        assert_eq!(signals.detached_nodes, Some(7));
        assert_eq!(signals.event_listeners, None);
        assert_eq!(signals.active_handles, Some(3));
    }

    #[test]
    fn test_leak_serialization() {
        let leak = &detached(2_000)[0];
        let json = serde_json::to_value(leak).unwrap();
        assert_eq!(json["type"], "DetachedNode");
        assert_eq!(json["severity"], "high");
        assert_eq!(json["sizeBytes"], 2_000 * DOM_NODE_BYTES);
        assert!(json.get("location").is_none());

        let dom = serde_json::to_value(LeakType::Dom).unwrap();
        assert_eq!(dom, "DOM");
    }
}
