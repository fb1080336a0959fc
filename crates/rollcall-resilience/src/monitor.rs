//! ---
//! rollcall_section: "07-resilience-fault-tolerance"
//! rollcall_subsection: "module"
//! rollcall_type: "source"
//! rollcall_scope: "code"
//! rollcall_description: "Periodic connectivity supervision layered on the endpoint resolver."
//! rollcall_version: "v0.0.0-prealpha"
//! rollcall_owner: "tbd"
//! ---
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rollcall_common::config::MonitorConfig;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::metrics::ResilienceMetrics;
use crate::resolver::{DetectionStatus, EndpointResolver};

/// One reachability check against the resolved endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionAttempt {
    pub url: String,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub error: Option<String>,
}

/// Bounded, most-recent-first list of attempts.
#[derive(Debug, Clone)]
pub struct ConnectionHistory {
    capacity: usize,
    attempts: VecDeque<ConnectionAttempt>,
}

impl ConnectionHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            attempts: VecDeque::with_capacity(capacity),
        }
    }

    pub fn record(&mut self, attempt: ConnectionAttempt) {
        self.attempts.push_front(attempt);
        self.attempts.truncate(self.capacity);
    }

    pub fn latest(&self) -> Option<&ConnectionAttempt> {
        self.attempts.front()
    }

    pub fn len(&self) -> usize {
        self.attempts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty()
    }

    pub fn to_vec(&self) -> Vec<ConnectionAttempt> {
        self.attempts.iter().cloned().collect()
    }
}

/// Connectivity state published to the UI.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionSnapshot {
    pub is_connected: bool,
    pub current_url: Option<String>,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub detection_status: DetectionStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorSettings {
    /// Delay before the first scheduled check.
    pub initial_delay: Duration,
    /// Period between scheduled checks.
    pub interval: Duration,
    pub history_capacity: usize,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self::from(&MonitorConfig::default())
    }
}

impl From<&MonitorConfig> for MonitorSettings {
    fn from(config: &MonitorConfig) -> Self {
        Self {
            initial_delay: config.initial_delay,
            interval: config.interval,
            history_capacity: config.history_capacity,
        }
    }
}

struct MonitorInner {
    resolver: EndpointResolver,
    settings: MonitorSettings,
    torn_down: AtomicBool,
    history: Mutex<ConnectionHistory>,
    snapshot: watch::Sender<ConnectionSnapshot>,
    metrics: Option<ResilienceMetrics>,
}

/// Supervises connectivity to the resolved backend.
///
/// `check_now`, `reconnect` and `force_redetection` work whether or not the
/// periodic loop has been started. After [`MonitorHandle::shutdown`] they are
/// no-ops returning the last published snapshot.
#[derive(Clone)]
pub struct ConnectionMonitor {
    inner: Arc<MonitorInner>,
}

impl std::fmt::Debug for ConnectionMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionMonitor")
            .field("settings", &self.inner.settings)
            .field("live", &self.is_live())
            .finish_non_exhaustive()
    }
}

impl ConnectionMonitor {
    pub fn new(
        resolver: EndpointResolver,
        settings: MonitorSettings,
        metrics: Option<ResilienceMetrics>,
    ) -> Self {
        let history = ConnectionHistory::new(settings.history_capacity);
        let (snapshot, _) = watch::channel(ConnectionSnapshot {
            detection_status: resolver.status(),
            current_url: resolver.cached_url(),
            ..ConnectionSnapshot::default()
        });
        Self {
            inner: Arc::new(MonitorInner {
                resolver,
                settings,
                torn_down: AtomicBool::new(false),
                history: Mutex::new(history),
                snapshot,
                metrics,
            }),
        }
    }

    /// Activate the monitor and spawn its supervision loop.
    pub fn start(&self) -> MonitorHandle {
        self.inner.torn_down.store(false, Ordering::SeqCst);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(run_loop(inner, shutdown_rx));
        info!(
            initial_delay_secs = self.inner.settings.initial_delay.as_secs_f64(),
            interval_secs = self.inner.settings.interval.as_secs_f64(),
            "connection monitor started"
        );
        MonitorHandle {
            inner: Arc::clone(&self.inner),
            shutdown: shutdown_tx,
            task: Some(task),
        }
    }

    /// Run one check immediately, even if a detection is in flight.
    pub async fn check_now(&self) -> ConnectionSnapshot {
        self.inner.check().await
    }

    /// Ask the transport to re-establish its connections, then check once.
    pub async fn reconnect(&self) -> ConnectionSnapshot {
        if !self.is_live() {
            return self.snapshot();
        }
        if let Err(err) = self.inner.resolver.transport().reconnect().await {
            warn!(error = %err, "transport reconnect failed");
        }
        self.inner.check().await
    }

    /// Re-run endpoint discovery from scratch, publish the result, then check once.
    pub async fn force_redetection(&self) -> ConnectionSnapshot {
        if !self.is_live() {
            return self.snapshot();
        }
        let url = self.inner.resolver.force_redetect().await;
        if self.is_live() {
            self.inner.snapshot.send_modify(|snapshot| {
                snapshot.current_url = Some(url);
                snapshot.detection_status = self.inner.resolver.status();
            });
        }
        self.inner.check().await
    }

    pub fn snapshot(&self) -> ConnectionSnapshot {
        self.inner.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionSnapshot> {
        self.inner.snapshot.subscribe()
    }

    /// Recent attempts, newest first.
    pub fn history(&self) -> Vec<ConnectionAttempt> {
        self.inner.history.lock().to_vec()
    }

    /// False once the loop started by [`start`](Self::start) has been torn down.
    pub fn is_live(&self) -> bool {
        self.inner.is_live()
    }

    pub fn resolver(&self) -> &EndpointResolver {
        &self.inner.resolver
    }
}

async fn run_loop(inner: Arc<MonitorInner>, mut shutdown: watch::Receiver<bool>) {
    tokio::select! {
        _ = sleep(inner.settings.initial_delay) => {}
        _ = shutdown.changed() => return,
    }

    let period = inner.settings.interval;
    let mut ticker = interval_at(Instant::now(), period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }
        tokio::select! {
            _ = inner.scheduled_check() => {}
            _ = shutdown.changed() => break,
        }
    }
    debug!("connection monitor loop stopped");
}

impl MonitorInner {
    fn is_live(&self) -> bool {
        !self.torn_down.load(Ordering::SeqCst)
    }

    async fn scheduled_check(&self) {
        if self.resolver.is_detecting() {
            debug!("endpoint detection in flight; skipping scheduled check");
            if let Some(metrics) = &self.metrics {
                metrics.record_check("skipped");
            }
            return;
        }
        self.check().await;
    }

    async fn check(&self) -> ConnectionSnapshot {
        if !self.is_live() {
            return self.snapshot.borrow().clone();
        }

        let url = self.resolver.base_url().await;
        let outcome = self.resolver.probe_reachability(&url).await;

        if !self.is_live() {
            debug!(url = %url, "monitor stopped during check; discarding result");
            return self.snapshot.borrow().clone();
        }

        let now = self.resolver.clock().now();
        let success = outcome.is_ok();
        match &outcome {
            Ok(status) => {
                debug!(url = %url, status, "backend reachable");
                self.resolver.report_success();
            }
            Err(err) => {
                warn!(url = %url, error = %err, "backend unreachable");
                self.resolver.report_failure();
            }
        }
        if let Some(metrics) = &self.metrics {
            metrics.record_check(if success { "connected" } else { "disconnected" });
        }

        self.history.lock().record(ConnectionAttempt {
            url: url.clone(),
            timestamp: now,
            success,
            error: outcome.err().map(|err| err.to_string()),
        });

        let snapshot = ConnectionSnapshot {
            is_connected: success,
            current_url: Some(url),
            last_checked_at: Some(now),
            detection_status: self.resolver.status(),
        };
        self.snapshot.send_replace(snapshot.clone());
        snapshot
    }
}

/// Owner of a running monitor loop.
///
/// Dropping the handle marks the monitor non-live and aborts the loop.
pub struct MonitorHandle {
    inner: Arc<MonitorInner>,
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl MonitorHandle {
    /// Stop the loop and wait for it to exit. Results of checks still in
    /// flight are discarded.
    pub async fn shutdown(mut self) {
        self.inner.torn_down.store(true, Ordering::SeqCst);
        let _ = self.shutdown.send(true);
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                if !err.is_cancelled() {
                    warn!(error = %err, "connection monitor task failed");
                }
            }
        }
        info!("connection monitor stopped");
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            self.inner.torn_down.store(true, Ordering::SeqCst);
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::{EndpointCandidate, ResolverSettings};
    use crate::transport::{ScriptedResponse, ScriptedTransport, DEFAULT_PROBE_TIMEOUT};
    use rollcall_common::ManualClock;

    const API: &str = "http://api.local:8000";

    fn settings() -> MonitorSettings {
        MonitorSettings {
            initial_delay: Duration::from_secs(2),
            interval: Duration::from_secs(300),
            history_capacity: 5,
        }
    }

    fn monitor(transport: &ScriptedTransport) -> ConnectionMonitor {
        let resolver = EndpointResolver::builder(
            [EndpointCandidate::new(API, "primary", 1)],
            Arc::new(transport.clone()),
        )
        .settings(ResolverSettings {
            ttl: Duration::from_secs(3600),
            failure_threshold: 3,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            fallback_url: None,
        })
        .clock(Arc::new(ManualClock::default()))
        .build();
        ConnectionMonitor::new(resolver, settings(), None)
    }

    fn healthy() -> ScriptedTransport {
        let transport = ScriptedTransport::new();
        transport
            .health(API, ScriptedResponse::Status(200))
            .root(API, ScriptedResponse::Status(200));
        transport
    }

    fn root_checks(transport: &ScriptedTransport) -> usize {
        transport.requests_to(&format!("{API}/"))
    }

    #[test]
    fn history_keeps_newest_first_within_capacity() {
        let mut history = ConnectionHistory::new(2);
        for n in 0..3 {
            history.record(ConnectionAttempt {
                url: format!("http://{n}"),
                timestamp: Utc::now(),
                success: true,
                error: None,
            });
        }
        let urls: Vec<String> = history.to_vec().into_iter().map(|a| a.url).collect();
        assert_eq!(urls, vec!["http://2", "http://1"]);
        assert_eq!(history.latest().map(|a| a.url.as_str()), Some("http://2"));
    }

    #[tokio::test(start_paused = true)]
    async fn first_check_waits_for_initial_delay() {
        let transport = healthy();
        let monitor = monitor(&transport);
        let handle = monitor.start();

        sleep(Duration::from_secs(1)).await;
        assert_eq!(root_checks(&transport), 0);
        assert!(!monitor.snapshot().is_connected);

        sleep(Duration::from_secs(2)).await;
        assert_eq!(root_checks(&transport), 1);
        let snapshot = monitor.snapshot();
        assert!(snapshot.is_connected);
        assert_eq!(snapshot.current_url.as_deref(), Some(API));
        assert_eq!(snapshot.detection_status, DetectionStatus::Resolved);
        assert!(snapshot.last_checked_at.is_some());

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_checks_fill_bounded_history() {
        let transport = healthy();
        let monitor = monitor(&transport);
        let handle = monitor.start();

        sleep(Duration::from_secs(2 + 300 * 6) + Duration::from_millis(10)).await;
        assert_eq!(root_checks(&transport), 7);
        let history = monitor.history();
        assert_eq!(history.len(), 5);
        assert!(history.iter().all(|attempt| attempt.success));

        handle.shutdown().await;
        assert!(!monitor.is_live());
    }

    #[tokio::test]
    async fn unauthorized_root_counts_as_connected() {
        let transport = ScriptedTransport::new();
        transport
            .health(API, ScriptedResponse::Status(200))
            .root(API, ScriptedResponse::Status(401));
        let monitor = monitor(&transport);
        let handle = monitor.start();

        let snapshot = monitor.check_now().await;
        assert!(snapshot.is_connected);
        assert_eq!(monitor.resolver().consecutive_failures(), 0);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn failed_checks_are_reported_to_the_resolver() {
        let transport = ScriptedTransport::new();
        transport
            .health(API, ScriptedResponse::Status(200))
            .root(API, ScriptedResponse::Status(503));
        let monitor = monitor(&transport);
        let handle = monitor.start();

        let snapshot = monitor.check_now().await;
        assert!(!snapshot.is_connected);
        assert_eq!(monitor.resolver().consecutive_failures(), 1);
        let latest = &monitor.history()[0];
        assert!(!latest.success);
        assert_eq!(latest.error.as_deref(), Some("unexpected http status 503"));

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn scheduled_check_is_skipped_while_detecting() {
        let transport = ScriptedTransport::new();
        transport
            .health(API, ScriptedResponse::Delayed(Duration::from_secs(10), 200))
            .root(API, ScriptedResponse::Status(200));
        let monitor = monitor(&transport);
        let detecting = tokio::spawn({
            let resolver = monitor.resolver().clone();
            async move { resolver.base_url().await }
        });
        let handle = monitor.start();

        sleep(Duration::from_secs(3)).await;
        assert!(monitor.resolver().is_detecting());
        assert_eq!(root_checks(&transport), 0);
        assert!(monitor.history().is_empty());

        detecting.await.unwrap();
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn result_arriving_after_shutdown_is_discarded() {
        let transport = ScriptedTransport::new();
        transport
            .health(API, ScriptedResponse::Status(200))
            .root(API, ScriptedResponse::Delayed(Duration::from_secs(1), 200));
        let monitor = monitor(&transport);
        let handle = monitor.start();

        let pending = tokio::spawn({
            let monitor = monitor.clone();
            async move { monitor.check_now().await }
        });
        sleep(Duration::from_millis(100)).await;
        handle.shutdown().await;

        let snapshot = pending.await.unwrap();
        assert!(!snapshot.is_connected);
        assert!(monitor.history().is_empty());
        assert!(monitor.snapshot().last_checked_at.is_none());
    }

    #[tokio::test]
    async fn force_redetection_reprobes_and_checks() {
        let transport = healthy();
        let monitor = monitor(&transport);
        let handle = monitor.start();

        monitor.check_now().await;
        assert_eq!(transport.health_probes(API), 1);

        let snapshot = monitor.force_redetection().await;
        assert_eq!(transport.health_probes(API), 2);
        assert!(snapshot.is_connected);
        assert_eq!(monitor.history().len(), 2);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn reconnect_resets_transport_then_checks() {
        let transport = healthy();
        let monitor = monitor(&transport);
        let handle = monitor.start();

        let snapshot = monitor.reconnect().await;
        assert_eq!(transport.reconnect_count(), 1);
        assert!(snapshot.is_connected);

        handle.shutdown().await;
        monitor.reconnect().await;
        monitor.force_redetection().await;
        assert_eq!(transport.reconnect_count(), 1);
        assert_eq!(transport.health_probes(API), 1);
    }

    #[tokio::test]
    async fn actions_work_before_the_loop_is_started() {
        let transport = healthy();
        let monitor = monitor(&transport);
        assert!(monitor.is_live());

        let snapshot = monitor.force_redetection().await;
        assert!(snapshot.is_connected);
        assert_eq!(transport.health_probes(API), 1);

        monitor.reconnect().await;
        assert_eq!(transport.reconnect_count(), 1);
        assert_eq!(monitor.check_now().await.current_url.as_deref(), Some(API));
        assert_eq!(monitor.history().len(), 3);
    }

    #[tokio::test]
    async fn subscribers_observe_published_snapshots() {
        let transport = healthy();
        let monitor = monitor(&transport);
        let mut updates = monitor.subscribe();
        let handle = monitor.start();

        monitor.check_now().await;
        assert!(updates.has_changed().unwrap());
        assert!(updates.borrow_and_update().is_connected);

        handle.shutdown().await;
    }
}
