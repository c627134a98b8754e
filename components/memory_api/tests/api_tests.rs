//! Control-surface tests through JSON messages

use memory_api::{MemoryManager, Request, Response};
use pressure_types::mock::{MockProbe, MockTarget};
use pressure_types::{PlatformProbe, GB};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn manager() -> (TempDir, Arc<MockProbe>, MemoryManager) {
    let dir = tempfile::tempdir().unwrap();
    let probe = Arc::new(MockProbe::new());
    let platform: Arc<dyn PlatformProbe> = probe.clone();
    let manager = MemoryManager::open(dir.path(), platform);
    (dir, probe, manager)
}

async fn send(manager: &MemoryManager, message: Value) -> Value {
    let reply = manager.handle_message(&message.to_string()).await;
    serde_json::from_str(&reply).unwrap()
}

#[tokio::test]
async fn test_start_enables_configured_features() {
    let (_dir, _probe, manager) = manager();
    manager.start().await;

    let reply = send(&manager, json!({ "type": "getMetrics" })).await;
    assert_eq!(reply["type"], "metrics");
    // monitoring and smartCleanup are on by default
    assert_eq!(reply["metrics"]["enabledFeatures"], 2);

    manager.shutdown().await;
    let reply = send(&manager, json!({ "type": "getMetrics" })).await;
    assert_eq!(reply["metrics"]["enabledFeatures"], 0);
}

#[tokio::test]
async fn test_malformed_messages_get_error_responses() {
    let (_dir, _probe, manager) = manager();

    let reply: Value = serde_json::from_str(&manager.handle_message("not json").await).unwrap();
    assert_eq!(reply["type"], "error");
    assert_eq!(reply["code"], "INVALID_REQUEST");

    let reply = send(&manager, json!({ "type": "launchRockets" })).await;
    assert_eq!(reply["code"], "INVALID_REQUEST");
}

#[tokio::test]
async fn test_unknown_feature_is_a_noop() {
    let (_dir, _probe, manager) = manager();
    manager.start().await;

    let reply = send(
        &manager,
        json!({ "type": "toggleFeature", "name": "turboMode", "enabled": true }),
    )
    .await;
    assert_eq!(reply, json!({ "type": "ack", "applied": false }));
}

#[tokio::test]
async fn test_profile_requests() {
    let (_dir, _probe, manager) = manager();
    manager.start().await;

    let reply = send(&manager, json!({ "type": "setActiveProfile", "name": "gaming" })).await;
    assert_eq!(reply["code"], "PROFILE_NOT_FOUND");

    let reply = send(&manager, json!({ "type": "deleteProfile", "name": "default" })).await;
    assert_eq!(reply["code"], "DEFAULT_PROFILE_PROTECTED");

    let reply = send(
        &manager,
        json!({
            "type": "createProfile",
            "profile": { "name": "quiet", "description": "night mode" }
        }),
    )
    .await;
    assert_eq!(reply["applied"], true);

    let reply = send(&manager, json!({ "type": "setActiveProfile", "name": "performance" })).await;
    assert_eq!(reply["applied"], true);
    assert!(manager
        .coordinator()
        .feature("autoReload")
        .unwrap()
        .is_enabled());

    let reply = send(&manager, json!({ "type": "getActiveProfile" })).await;
    assert_eq!(reply["name"], "performance");

    let reply = send(&manager, json!({ "type": "listProfiles" })).await;
    assert_eq!(reply["profiles"].as_array().unwrap().len(), 4);

    // deleting the active profile falls back to default and resyncs
    send(&manager, json!({ "type": "deleteProfile", "name": "performance" })).await;
    assert_eq!(manager.config().active_profile(), "default");
    assert!(!manager
        .coordinator()
        .feature("autoReload")
        .unwrap()
        .is_enabled());
}

#[tokio::test(start_paused = true)]
async fn test_profiling_round_trip() {
    let (_dir, _probe, manager) = manager();

    let reply = send(
        &manager,
        json!({ "type": "startProfile", "options": { "durationMs": 60000, "intervalMs": 1000 } }),
    )
    .await;
    assert_eq!(reply["type"], "profileStarted");
    let session_id = reply["sessionId"].as_str().unwrap().to_string();

    tokio::time::sleep(Duration::from_millis(3500)).await;
    let reply = send(&manager, json!({ "type": "stopProfile", "sessionId": session_id })).await;
    assert_eq!(reply["type"], "profileReport");
    assert_eq!(reply["profile"]["sessionId"], session_id);

    let reply = send(&manager, json!({ "type": "stopProfile", "sessionId": session_id })).await;
    assert_eq!(reply["code"], "SESSION_NOT_FOUND");
}

#[tokio::test]
async fn test_toggle_all() {
    let (_dir, _probe, manager) = manager();
    manager.start().await;

    let reply = manager.handle(Request::ToggleAll { enabled: false }).await;
    assert_eq!(reply, Response::Ack { applied: true });
    assert!(!manager.coordinator().is_enabled());
    assert!(!manager.config().global_settings().enabled);

    manager.handle(Request::ToggleAll { enabled: true }).await;
    assert!(manager.coordinator().is_enabled());
    assert_eq!(manager.coordinator().get_metrics().enabled_features, 2);
}

#[tokio::test]
async fn test_snapshot_and_csv() {
    let (_dir, probe, manager) = manager();
    manager.start().await;
    let target = Arc::new(MockTarget::new(1, "https://a.test"));
    manager.register_target(target.clone()).await;
    probe.set_target_memory(1, GB);

    let reply = send(&manager, json!({ "type": "requestSnapshot" })).await;
    assert_eq!(reply["snapshot"]["targets"][0]["targetId"], 1);

    let reply = send(&manager, json!({ "type": "exportCsv" })).await;
    let csv = reply["csv"].as_str().unwrap();
    assert_eq!(csv.lines().count(), 1 + 2 * 2);

    send(&manager, json!({ "type": "toggleFeature", "name": "monitoring", "enabled": false })).await;
    let reply = send(&manager, json!({ "type": "requestSnapshot" })).await;
    assert!(reply["snapshot"].is_null());
}

#[tokio::test]
async fn test_alerts_are_dispatched_in_background() {
    let (_dir, probe, manager) = manager();
    manager.start().await;
    let target = Arc::new(MockTarget::new(9, "https://heavy.test"));
    manager.register_target(target.clone()).await;
    probe.set_target_memory(9, 4 * GB);

    send(&manager, json!({ "type": "requestSnapshot" })).await;

    // the dispatcher runs on its own task
    for _ in 0..50 {
        if target.storage_clear_count() > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(target.storage_clear_count(), 1);
    assert_eq!(manager.coordinator().interventions().len(), 1);
    manager.shutdown().await;
}

#[tokio::test]
async fn test_profile_triggers_switch_profile() {
    let (_dir, probe, manager) = manager();
    manager.start().await;
    let target = Arc::new(MockTarget::new(1, "https://a.test"));
    manager.register_target(target.clone()).await;

    probe.set_target_memory(1, GB);
    assert_eq!(manager.apply_matching_profile().await, None);

    // above the performance profile's 85% trigger
    probe.set_target_memory(1, 4 * GB / 100 * 90);
    assert_eq!(
        manager.apply_matching_profile().await.as_deref(),
        Some("performance")
    );
    assert!(manager
        .coordinator()
        .feature("autoReload")
        .unwrap()
        .is_enabled());

    // the active profile is not matched again
    assert_eq!(manager.apply_matching_profile().await, None);
}
