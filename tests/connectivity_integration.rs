//! ---
//! rollcall_section: "15-testing-qa-runbook"
//! rollcall_subsection: "integration-tests"
//! rollcall_type: "source"
//! rollcall_scope: "code"
//! rollcall_description: "Integration tests for endpoint discovery and connection monitoring."
//! rollcall_version: "v0.0.0-prealpha"
//! rollcall_owner: "tbd"
//! ---
use std::fs;
use std::sync::Arc;
use std::time::Duration;

use rollcall_common::config::AppConfig;
use rollcall_metrics::{new_registry, Exporter};
use rollcall_resilience::{
    probe, ConnectionMonitor, DetectionStatus, EndpointResolver, HttpTransport, MonitorSettings,
    ProbeError, ProbeKind, ResilienceMetrics, ResolutionSource, ScriptedResponse,
    ScriptedTransport,
};
use tempfile::tempdir;

const CONFIG: &str = r#"
[[endpoints]]
url = "http://campus-b.local:8000"
label = "campus-b"
priority = 20

[[endpoints]]
url = "http://campus-a.local:8000"
label = "campus-a"
priority = 10

[detection]
ttl = 120
failure_threshold = 2
probe_timeout = 1500
fallback_url = "https://attendance.example.edu"

[monitor]
initial_delay = 1
interval = 60
history_capacity = 3
"#;

fn load_config() -> AppConfig {
    let dir = tempdir().unwrap();
    let path = dir.path().join("rollcall.toml");
    fs::write(&path, CONFIG).unwrap();
    AppConfig::load(&[path]).unwrap()
}

#[tokio::test(start_paused = true)]
async fn config_driven_resolution_falls_through_to_second_candidate() {
    let config = load_config();
    assert_eq!(config.detection.probe_timeout, Duration::from_millis(1500));

    let transport = ScriptedTransport::new();
    transport
        .health("http://campus-a.local:8000", ScriptedResponse::Hang)
        .health("http://campus-b.local:8000", ScriptedResponse::Status(200));
    let resolver = EndpointResolver::from_config(&config, Arc::new(transport.clone()), None);

    let callers = (0..10).map(|_| {
        let resolver = resolver.clone();
        tokio::spawn(async move { resolver.base_url().await })
    });
    for caller in callers.collect::<Vec<_>>() {
        assert_eq!(caller.await.unwrap(), "http://campus-b.local:8000");
    }

    assert_eq!(transport.request_count(), 2);
    assert_eq!(resolver.consecutive_failures(), 0);
    assert_eq!(
        resolver.source(),
        Some(ResolutionSource::Candidate {
            label: "campus-b".into()
        })
    );
    assert_eq!(resolver.settings().failure_threshold, 2);
}

#[tokio::test]
async fn total_outage_resolves_to_configured_fallback() {
    let config = load_config();
    let transport = ScriptedTransport::new();
    let resolver = EndpointResolver::from_config(&config, Arc::new(transport.clone()), None);

    assert_eq!(resolver.base_url().await, "https://attendance.example.edu");
    assert_eq!(resolver.status(), DetectionStatus::Fallback);
    assert!(!resolver.is_detecting());
}

#[tokio::test(start_paused = true)]
async fn monitor_failures_trigger_redetection_and_metrics() {
    let config = load_config();
    let registry = new_registry();
    let metrics = ResilienceMetrics::new(registry.clone()).unwrap();

    let transport = ScriptedTransport::new();
    transport
        .health("http://campus-a.local:8000", ScriptedResponse::Status(200))
        .root("http://campus-a.local:8000", ScriptedResponse::Status(502));
    let resolver =
        EndpointResolver::from_config(&config, Arc::new(transport.clone()), Some(metrics.clone()));
    let monitor = ConnectionMonitor::new(
        resolver.clone(),
        MonitorSettings::from(&config.monitor),
        Some(metrics),
    );
    let handle = monitor.start();

    // Checks at 1s and 61s fail; the threshold of 2 forces a re-probe at 121s.
    tokio::time::sleep(Duration::from_secs(122)).await;
    assert_eq!(transport.health_probes("http://campus-a.local:8000"), 2);

    let history = monitor.history();
    assert_eq!(history.len(), 3);
    assert!(history.iter().all(|attempt| !attempt.success));
    assert!(!monitor.snapshot().is_connected);

    handle.shutdown().await;

    let families = registry.gather();
    let checks = families
        .iter()
        .find(|family| family.get_name() == "rollcall_connection_checks_total")
        .unwrap();
    let disconnected: f64 = checks
        .get_metric()
        .iter()
        .map(|metric| metric.get_counter().get_value())
        .sum();
    assert_eq!(disconnected, 3.0);
}

#[tokio::test]
async fn http_transport_reports_statuses_from_a_live_server() {
    let registry = new_registry();
    let server = Exporter::new(registry)
        .serve("127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    let base = format!("http://{}", server.addr());
    let transport = HttpTransport::new(Duration::from_secs(2)).unwrap();

    let health = probe(&transport, &base, ProbeKind::Health, Duration::from_secs(2)).await;
    assert_eq!(health, Err(ProbeError::Status(404)));

    let metrics_url = format!("{base}/metrics");
    let status = rollcall_resilience::ProbeTransport::get_status(&transport, &metrics_url)
        .await
        .unwrap();
    assert_eq!(status, 200);

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn metrics_endpoint_exposes_resilience_families() {
    let registry = new_registry();
    let metrics = ResilienceMetrics::new(registry.clone()).unwrap();
    metrics.record_probe("campus-a", false);
    metrics.record_detection(&ResolutionSource::Configured);

    let server = Exporter::new(registry)
        .serve("127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    let body = reqwest::get(format!("http://{}/metrics", server.addr()))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(body.contains("rollcall_endpoint_probes_total"));
    assert!(body.contains("source=\"configured\""));

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn exporter_publishes_monitor_snapshots_on_status() {
    let config = load_config();
    let registry = new_registry();
    let metrics = ResilienceMetrics::new(registry.clone()).unwrap();

    let transport = ScriptedTransport::new();
    transport
        .health("http://campus-a.local:8000", ScriptedResponse::Status(200))
        .root("http://campus-a.local:8000", ScriptedResponse::Status(401));
    let resolver =
        EndpointResolver::from_config(&config, Arc::new(transport.clone()), Some(metrics.clone()));
    let monitor = ConnectionMonitor::new(
        resolver,
        MonitorSettings::from(&config.monitor),
        Some(metrics),
    );

    let server = Exporter::new(registry)
        .with_status(monitor.subscribe())
        .serve("127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    let status_url = format!("http://{}/status", server.addr());

    let before: serde_json::Value = reqwest::get(&status_url).await.unwrap().json().await.unwrap();
    assert_eq!(before["is_connected"], false);
    assert!(before["current_url"].is_null());

    let snapshot = monitor.check_now().await;
    assert!(snapshot.is_connected);

    let after: serde_json::Value = reqwest::get(&status_url).await.unwrap().json().await.unwrap();
    assert_eq!(after["is_connected"], true);
    assert_eq!(after["current_url"], "http://campus-a.local:8000");

    let body = reqwest::get(format!("http://{}/metrics", server.addr()))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(body.contains("rollcall_connection_checks_total"));

    server.shutdown().await.unwrap();
}
