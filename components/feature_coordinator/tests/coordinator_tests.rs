//! Coordinator tests against the built-in features

use config_manager::ConfigurationManager;
use feature_coordinator::FeatureCoordinator;
use features::MonitorFeature;
use pressure_types::mock::{MockProbe, MockTarget};
use pressure_types::{PlatformProbe, RiskLevel, GB, MB};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

struct Fixture {
    _dir: TempDir,
    probe: Arc<MockProbe>,
    coordinator: FeatureCoordinator,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let config = Arc::new(ConfigurationManager::open(dir.path()));
    let probe = Arc::new(MockProbe::new());
    let platform: Arc<dyn PlatformProbe> = probe.clone();
    Fixture {
        coordinator: FeatureCoordinator::with_default_features(config, platform),
        probe,
        _dir: dir,
    }
}

#[tokio::test]
async fn test_default_features_in_priority_order() {
    let f = fixture();
    assert_eq!(
        f.coordinator.feature_names(),
        vec![
            "monitoring",
            "smartCleanup",
            "autoReload",
            "leakDetector",
            "domOptimization",
            "websocketManager",
            "performanceCollector",
        ]
    );
}

#[tokio::test]
async fn test_sync_follows_configuration_and_profiles() {
    let f = fixture();
    f.coordinator.sync_with_configuration().await;
    // nothing runs while the coordinator is off
    assert_eq!(f.coordinator.get_metrics().enabled_features, 0);

    f.coordinator.enable().await;
    f.coordinator.sync_with_configuration().await;
    assert!(f.coordinator.feature("monitoring").unwrap().is_enabled());
    assert!(f.coordinator.feature("smartCleanup").unwrap().is_enabled());
    assert!(!f.coordinator.feature("autoReload").unwrap().is_enabled());

    f.coordinator.config().set_active_profile("performance").unwrap();
    f.coordinator.sync_with_configuration().await;
    assert!(f.coordinator.feature("autoReload").unwrap().is_enabled());

    f.coordinator.config().update_global_settings(|g| g.enabled = false);
    f.coordinator.sync_with_configuration().await;
    assert_eq!(f.coordinator.get_metrics().enabled_features, 0);
}

#[tokio::test]
async fn test_toggle_persists_choice() {
    let f = fixture();
    f.coordinator.enable().await;
    f.coordinator.toggle_feature("leakDetector", true).await.unwrap();

    let reopened = ConfigurationManager::open(f._dir.path());
    assert!(reopened.is_feature_enabled("leakDetector"));
}

#[tokio::test]
async fn test_csv_has_two_rows_per_enabled_feature() {
    let f = fixture();
    f.coordinator.enable().await;
    f.coordinator.toggle_feature("monitoring", true).await.unwrap();
    f.coordinator.toggle_feature("smartCleanup", true).await.unwrap();
    f.coordinator.toggle_feature("autoReload", true).await.unwrap();

    let csv = f.coordinator.export_csv().unwrap();
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines.len(), 1 + 2 * 3);
    assert_eq!(lines[0], "timestamp,feature,metric,value");
    for line in &lines[1..] {
        assert_eq!(line.split(',').count(), 4);
    }
}

#[tokio::test]
async fn test_report_cross_references_process_metrics() {
    let f = fixture();
    f.coordinator.enable().await;
    f.coordinator.toggle_feature("monitoring", true).await.unwrap();

    let a = Arc::new(MockTarget::new(1, "https://a.test"));
    let b = Arc::new(MockTarget::new(2, "https://b.test"));
    f.coordinator.apply_to_target(a.clone()).await;
    f.coordinator.apply_to_target(b.clone()).await;

    f.probe.set_target_memory(1, 200 * MB);
    f.probe.set_target_memory(2, 4 * GB / 100 * 95);

    let report = f.coordinator.generate_report();
    assert_eq!(report.web_contents.len(), 2);

    let entry_a = report.web_contents_for("https://a.test").unwrap();
    assert_eq!(entry_a.memory, 200 * MB);
    assert_eq!(entry_a.risk, Some(RiskLevel::Low));

    let entry_b = report.web_contents_for("https://b.test").unwrap();
    assert_eq!(entry_b.risk, Some(RiskLevel::Critical));
    assert!(entry_b
        .recommendation
        .as_deref()
        .unwrap()
        .starts_with("Critical"));
}

#[tokio::test]
async fn test_report_sections_from_features() {
    let f = fixture();
    f.coordinator.enable().await;

    let json = serde_json::to_value(f.coordinator.generate_report()).unwrap();
    assert!(json.get("leaks").is_none());
    assert!(json.get("performance").is_none());

    f.coordinator.toggle_feature("leakDetector", true).await.unwrap();
    f.coordinator
        .toggle_feature("performanceCollector", true)
        .await
        .unwrap();
    let json = serde_json::to_value(f.coordinator.generate_report()).unwrap();
    assert!(json["leaks"].is_array());
    assert_eq!(json["performance"]["samples"], 0);
    assert_eq!(json["features"]["leakDetector"]["enabled"], true);
}

#[tokio::test]
async fn test_snapshot_requires_monitoring_and_is_broadcast() {
    let f = fixture();
    f.coordinator.enable().await;
    let target = Arc::new(MockTarget::new(1, "https://a.test"));
    f.coordinator.apply_to_target(target.clone()).await;

    assert!(f.coordinator.request_snapshot().await.is_none());

    f.coordinator.toggle_feature("monitoring", true).await.unwrap();
    f.probe.set_target_memory(1, 100 * MB);
    let snapshot = f.coordinator.request_snapshot().await.unwrap();

    assert_eq!(snapshot.targets.len(), 1);
    assert_eq!(snapshot.features.len(), 7);
    assert!(target
        .evaluated_scripts()
        .iter()
        .any(|script| script.contains("memory-snapshot")));
}

#[tokio::test]
async fn test_alert_dispatch_runs_cleanup_before_reload() {
    let f = fixture();
    f.coordinator.enable().await;
    for name in ["monitoring", "smartCleanup", "autoReload"] {
        f.coordinator.toggle_feature(name, true).await.unwrap();
    }
    let target = Arc::new(MockTarget::new(5, "https://heavy.test"));
    f.coordinator.apply_to_target(target.clone()).await;
    f.probe.set_target_memory(5, 4 * GB);

    let mut alerts = f.coordinator.subscribe_alerts().unwrap();
    f.coordinator.request_snapshot().await.unwrap();
    let alert = alerts.try_recv().unwrap();

    let performed = f.coordinator.dispatch_alert(&alert).await;
    let actions: Vec<&str> = performed.iter().map(|i| i.action.as_str()).collect();
    assert_eq!(actions, vec!["cleanup", "reload"]);
    assert_eq!(target.reload_count(), 1);
    assert_eq!(f.coordinator.generate_report().interventions.len(), 2);
}

#[tokio::test]
async fn test_sleep_and_resume_are_ignored_while_disabled() {
    let f = fixture();
    f.coordinator.handle_system_resume().await;
    assert_eq!(f.coordinator.get_metrics().total_activations, 0);

    f.coordinator.enable().await;
    f.coordinator.toggle_feature("websocketManager", true).await.unwrap();
    f.coordinator.handle_system_sleep().await;
    f.coordinator.handle_system_resume().await;
    assert_eq!(f.coordinator.get_metrics().total_activations, 1);
}

#[tokio::test(start_paused = true)]
async fn test_running_features_follow_profile_and_global_settings() {
    let f = fixture();
    f.coordinator.enable().await;
    f.coordinator.sync_with_configuration().await;
    let target = Arc::new(MockTarget::new(1, "https://tab.test"));
    f.coordinator.apply_to_target(target.clone()).await;

    f.coordinator.config().update_global_settings(|global| {
        global.memory_limit = GB;
        global.check_interval = 5_000;
    });
    f.coordinator.config().set_active_profile("performance").unwrap();
    f.coordinator.sync_with_configuration().await;

    let monitoring = f.coordinator.feature("monitoring").unwrap();
    let monitor = monitoring
        .as_any()
        .downcast_ref::<MonitorFeature>()
        .unwrap();
    let settings = monitor.settings();
    assert_eq!(settings.predictor.memory_limit, GB);
    assert_eq!(settings.check_interval, Duration::from_secs(5));

    // toggling keeps the configured values
    f.coordinator.toggle_feature("monitoring", false).await.unwrap();
    f.coordinator.toggle_feature("monitoring", true).await.unwrap();
    assert_eq!(monitor.settings().predictor.memory_limit, GB);

    f.probe.set_target_memory(1, 950 * MB);
    tokio::time::sleep(Duration::from_millis(5_500)).await;
    assert_eq!(
        monitor.latest_assessment(1).unwrap().risk,
        RiskLevel::Critical
    );

    // the performance profile cleans every five minutes
    tokio::time::sleep(Duration::from_secs(5 * 60)).await;
    assert_eq!(target.storage_clear_count(), 1);
}
