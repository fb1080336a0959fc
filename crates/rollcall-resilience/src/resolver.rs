//! ---
//! rollcall_section: "07-resilience-fault-tolerance"
//! rollcall_subsection: "module"
//! rollcall_type: "source"
//! rollcall_scope: "code"
//! rollcall_description: "Backend endpoint discovery with TTL caching and single-flight probing."
//! rollcall_version: "v0.0.0-prealpha"
//! rollcall_owner: "tbd"
//! ---
//! Locates the reachable backend base URL.
//!
//! Candidates are probed one at a time in ascending priority order. The
//! winning URL is cached for a TTL. Unreachable candidates and caller reports
//! both add to the failure count, and reaching the threshold forces detection
//! before the TTL expires. Concurrent lookups share a single in-flight
//! detection sequence.

use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use rollcall_common::config::{AppConfig, DetectionConfig, EndpointConfig, DEFAULT_BASE_URL};
use rollcall_common::{Clock, SystemClock};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::metrics::ResilienceMetrics;
use crate::transport::{probe, ProbeError, ProbeKind, ProbeTransport, DEFAULT_PROBE_TIMEOUT};

/// Candidate backend base address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EndpointCandidate {
    pub url: String,
    pub label: String,
    /// Lower values are probed first.
    pub priority: i32,
}

impl EndpointCandidate {
    pub fn new(url: impl Into<String>, label: impl Into<String>, priority: i32) -> Self {
        Self {
            url: url.into(),
            label: label.into(),
            priority,
        }
    }
}

impl From<EndpointConfig> for EndpointCandidate {
    fn from(config: EndpointConfig) -> Self {
        Self::new(config.url, config.label, config.priority)
    }
}

/// Tunables of an [`EndpointResolver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolverSettings {
    /// How long a resolved URL stays fresh.
    pub ttl: Duration,
    /// Reported failures that force the next lookup to re-probe.
    pub failure_threshold: u32,
    /// Bound on each individual probe.
    pub probe_timeout: Duration,
    /// Externally configured URL used when no candidate answers.
    pub fallback_url: Option<String>,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self::from(&DetectionConfig::default())
    }
}

impl From<&DetectionConfig> for ResolverSettings {
    fn from(config: &DetectionConfig) -> Self {
        Self {
            ttl: config.ttl,
            failure_threshold: config.failure_threshold.max(1),
            probe_timeout: if config.probe_timeout.is_zero() {
                DEFAULT_PROBE_TIMEOUT
            } else {
                config.probe_timeout
            },
            fallback_url: config.fallback_url.clone(),
        }
    }
}

/// Runtime adjustment accepted by [`EndpointResolver::configure`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolverTuning {
    pub ttl: Option<Duration>,
    pub failure_threshold: Option<u32>,
}

/// Where the current base URL came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResolutionSource {
    /// A probed candidate answered its health check.
    Candidate { label: String },
    /// No candidate answered; the configured fallback URL is in use.
    Configured,
    /// No candidate answered and nothing was configured.
    BuiltIn,
}

impl ResolutionSource {
    pub fn kind(&self) -> &'static str {
        match self {
            ResolutionSource::Candidate { .. } => "candidate",
            ResolutionSource::Configured => "configured",
            ResolutionSource::BuiltIn => "built_in",
        }
    }
}

/// Coarse resolver state published to the UI.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionStatus {
    /// Nothing resolved yet.
    #[default]
    Idle,
    /// A detection sequence is running.
    Detecting,
    /// A candidate answered its health probe.
    Resolved,
    /// Resolution fell back to a configured or built-in URL.
    Fallback,
}

type SharedDetection = Shared<BoxFuture<'static, String>>;

struct InFlight {
    generation: u64,
    result: SharedDetection,
}

enum Freshness {
    Fresh(String),
    Cold,
    Expired,
    FailureThreshold,
}

struct DetectionState {
    resolved_url: Option<String>,
    source: Option<ResolutionSource>,
    last_detection_at: Option<DateTime<Utc>>,
    in_flight: Option<InFlight>,
    generation: u64,
    consecutive_failures: u32,
    ttl: Duration,
    failure_threshold: u32,
}

impl DetectionState {
    fn freshness(&self, now: DateTime<Utc>) -> Freshness {
        let (Some(url), Some(at)) = (&self.resolved_url, self.last_detection_at) else {
            return Freshness::Cold;
        };
        if self.consecutive_failures >= self.failure_threshold {
            return Freshness::FailureThreshold;
        }
        // A clock that moved backwards counts as zero age.
        let age = (now - at).to_std().unwrap_or(Duration::ZERO);
        if age < self.ttl {
            Freshness::Fresh(url.clone())
        } else {
            Freshness::Expired
        }
    }

    fn status(&self) -> DetectionStatus {
        if self.in_flight.is_some() {
            return DetectionStatus::Detecting;
        }
        match &self.source {
            None => DetectionStatus::Idle,
            Some(ResolutionSource::Candidate { .. }) => DetectionStatus::Resolved,
            Some(_) => DetectionStatus::Fallback,
        }
    }
}

struct DetectionOutcome {
    url: String,
    source: ResolutionSource,
    failed_probes: usize,
}

struct ResolverInner {
    candidates: Vec<EndpointCandidate>,
    fallback_url: Option<String>,
    probe_timeout: Duration,
    transport: Arc<dyn ProbeTransport>,
    clock: Arc<dyn Clock>,
    metrics: Option<ResilienceMetrics>,
    state: Mutex<DetectionState>,
}

/// Builder for [`EndpointResolver`].
pub struct ResolverBuilder {
    candidates: Vec<EndpointCandidate>,
    settings: ResolverSettings,
    transport: Arc<dyn ProbeTransport>,
    clock: Arc<dyn Clock>,
    metrics: Option<ResilienceMetrics>,
}

impl ResolverBuilder {
    pub fn settings(mut self, settings: ResolverSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn metrics(mut self, metrics: Option<ResilienceMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn build(self) -> EndpointResolver {
        let mut candidates = self.candidates;
        candidates.sort_by_key(|candidate| candidate.priority);
        let settings = self.settings;
        EndpointResolver {
            inner: Arc::new(ResolverInner {
                candidates,
                fallback_url: settings.fallback_url,
                probe_timeout: settings.probe_timeout,
                transport: self.transport,
                clock: self.clock,
                metrics: self.metrics,
                state: Mutex::new(DetectionState {
                    resolved_url: None,
                    source: None,
                    last_detection_at: None,
                    in_flight: None,
                    generation: 0,
                    consecutive_failures: 0,
                    ttl: settings.ttl,
                    failure_threshold: settings.failure_threshold.max(1),
                }),
            }),
        }
    }
}

/// Shared handle to the endpoint discovery state. Cloning is cheap; all
/// clones observe the same cache.
#[derive(Clone)]
pub struct EndpointResolver {
    inner: Arc<ResolverInner>,
}

impl std::fmt::Debug for EndpointResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointResolver")
            .field("candidates", &self.inner.candidates)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl EndpointResolver {
    /// Start building a resolver over `candidates` using `transport` for probes.
    pub fn builder(
        candidates: impl IntoIterator<Item = EndpointCandidate>,
        transport: Arc<dyn ProbeTransport>,
    ) -> ResolverBuilder {
        ResolverBuilder {
            candidates: candidates.into_iter().collect(),
            settings: ResolverSettings::default(),
            transport,
            clock: Arc::new(SystemClock),
            metrics: None,
        }
    }

    /// Resolver configured from the `[[endpoints]]` and `[detection]` sections.
    pub fn from_config(
        config: &AppConfig,
        transport: Arc<dyn ProbeTransport>,
        metrics: Option<ResilienceMetrics>,
    ) -> Self {
        Self::builder(
            config
                .endpoints
                .iter()
                .cloned()
                .map(EndpointCandidate::from),
            transport,
        )
        .settings(ResolverSettings::from(&config.detection))
        .metrics(metrics)
        .build()
    }

    /// Current backend base URL. Never fails.
    ///
    /// Returns the cached URL while it is fresh; otherwise joins the running
    /// detection sequence or starts one.
    pub async fn base_url(&self) -> String {
        let pending = {
            let mut state = self.inner.state.lock();
            match state.freshness(self.inner.clock.now()) {
                Freshness::Fresh(url) => return url,
                Freshness::Cold => debug!("no endpoint resolved yet"),
                Freshness::Expired => debug!("resolved endpoint expired"),
                Freshness::FailureThreshold => debug!(
                    failures = state.consecutive_failures,
                    "failure threshold reached; re-probing endpoints"
                ),
            }
            match &state.in_flight {
                Some(in_flight) => in_flight.result.clone(),
                None => self.start_detection(&mut state),
            }
        };
        pending.await
    }

    /// Discard every cached fact and run a fresh detection sequence.
    pub async fn force_redetect(&self) -> String {
        let pending = {
            let mut state = self.inner.state.lock();
            info!(
                previous = ?state.resolved_url,
                "forcing endpoint re-detection"
            );
            state.resolved_url = None;
            state.source = None;
            state.last_detection_at = None;
            state.in_flight = None;
            state.consecutive_failures = 0;
            if let Some(metrics) = &self.inner.metrics {
                metrics.set_consecutive_failures(0);
            }
            self.start_detection(&mut state)
        };
        pending.await
    }

    /// Record a failed request against the resolved URL.
    pub fn report_failure(&self) {
        let mut state = self.inner.state.lock();
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        if state.consecutive_failures == state.failure_threshold {
            warn!(
                url = ?state.resolved_url,
                failures = state.consecutive_failures,
                "endpoint failure threshold reached"
            );
        }
        if let Some(metrics) = &self.inner.metrics {
            metrics.set_consecutive_failures(state.consecutive_failures);
        }
    }

    /// Record a successful request against the resolved URL.
    pub fn report_success(&self) {
        let mut state = self.inner.state.lock();
        if state.consecutive_failures > 0 {
            debug!(
                failures = state.consecutive_failures,
                "endpoint recovered; clearing failure count"
            );
        }
        state.consecutive_failures = 0;
        if let Some(metrics) = &self.inner.metrics {
            metrics.set_consecutive_failures(0);
        }
    }

    /// Adjust TTL and failure threshold. Does not trigger detection.
    pub fn configure(&self, tuning: ResolverTuning) {
        let mut state = self.inner.state.lock();
        if let Some(ttl) = tuning.ttl {
            state.ttl = ttl;
        }
        if let Some(threshold) = tuning.failure_threshold {
            if threshold == 0 {
                warn!("failure threshold of zero requested; clamping to 1");
            }
            state.failure_threshold = threshold.max(1);
        }
        info!(
            ttl_secs = state.ttl.as_secs_f64(),
            failure_threshold = state.failure_threshold,
            "endpoint resolver reconfigured"
        );
    }

    /// General reachability probe against `base_url` (2xx or 401 counts as up).
    pub async fn probe_reachability(&self, base_url: &str) -> Result<u16, ProbeError> {
        probe(
            self.inner.transport.as_ref(),
            base_url,
            ProbeKind::Reachability,
            self.inner.probe_timeout,
        )
        .await
    }

    /// Last resolved URL, regardless of freshness.
    pub fn cached_url(&self) -> Option<String> {
        self.inner.state.lock().resolved_url.clone()
    }

    pub fn source(&self) -> Option<ResolutionSource> {
        self.inner.state.lock().source.clone()
    }

    pub fn is_detecting(&self) -> bool {
        self.inner.state.lock().in_flight.is_some()
    }

    pub fn status(&self) -> DetectionStatus {
        self.inner.state.lock().status()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.inner.state.lock().consecutive_failures
    }

    pub fn last_detection_at(&self) -> Option<DateTime<Utc>> {
        self.inner.state.lock().last_detection_at
    }

    /// Current effective settings.
    pub fn settings(&self) -> ResolverSettings {
        let state = self.inner.state.lock();
        ResolverSettings {
            ttl: state.ttl,
            failure_threshold: state.failure_threshold,
            probe_timeout: self.inner.probe_timeout,
            fallback_url: self.inner.fallback_url.clone(),
        }
    }

    /// Candidates in probe order.
    pub fn candidates(&self) -> &[EndpointCandidate] {
        &self.inner.candidates
    }

    pub fn transport(&self) -> Arc<dyn ProbeTransport> {
        Arc::clone(&self.inner.transport)
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.inner.clock)
    }

    /// Spawn a detection sequence and register it as in flight.
    ///
    /// Must be called with the state lock held so that only one sequence can
    /// be registered per generation.
    fn start_detection(&self, state: &mut DetectionState) -> SharedDetection {
        state.generation += 1;
        let generation = state.generation;

        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            let outcome = inner.run_detection().await;
            inner.settle(generation, outcome)
        });

        let weak: Weak<ResolverInner> = Arc::downgrade(&self.inner);
        let result = async move {
            match task.await {
                Ok(url) => url,
                Err(err) => {
                    error!(error = %err, "endpoint detection task did not complete");
                    match weak.upgrade() {
                        Some(inner) => inner.abandon(generation),
                        None => DEFAULT_BASE_URL.to_owned(),
                    }
                }
            }
        }
        .boxed()
        .shared();

        state.in_flight = Some(InFlight {
            generation,
            result: result.clone(),
        });
        result
    }
}

impl ResolverInner {
    async fn run_detection(&self) -> DetectionOutcome {
        let mut failed_probes = 0;
        for candidate in &self.candidates {
            let outcome = probe(
                self.transport.as_ref(),
                &candidate.url,
                ProbeKind::Health,
                self.probe_timeout,
            )
            .await;
            if let Some(metrics) = &self.metrics {
                metrics.record_probe(&candidate.label, outcome.is_ok());
            }
            match outcome {
                Ok(status) => {
                    info!(
                        label = %candidate.label,
                        url = %candidate.url,
                        status,
                        "endpoint candidate reachable"
                    );
                    return DetectionOutcome {
                        url: candidate.url.clone(),
                        source: ResolutionSource::Candidate {
                            label: candidate.label.clone(),
                        },
                        failed_probes,
                    };
                }
                Err(err) => {
                    failed_probes += 1;
                    debug!(
                        label = %candidate.label,
                        url = %candidate.url,
                        error = %err,
                        "endpoint candidate unreachable"
                    );
                }
            }
        }

        match &self.fallback_url {
            Some(url) => {
                warn!(url = %url, failed_probes, "no endpoint candidate reachable; using configured fallback");
                DetectionOutcome {
                    url: url.clone(),
                    source: ResolutionSource::Configured,
                    failed_probes,
                }
            }
            None => {
                warn!(url = DEFAULT_BASE_URL, failed_probes, "no endpoint candidate reachable; using built-in default");
                DetectionOutcome {
                    url: DEFAULT_BASE_URL.to_owned(),
                    source: ResolutionSource::BuiltIn,
                    failed_probes,
                }
            }
        }
    }

    /// Apply a finished sequence unless a forced re-detection superseded it.
    fn settle(&self, generation: u64, outcome: DetectionOutcome) -> String {
        let mut state = self.state.lock();
        if state.generation != generation {
            debug!(
                generation,
                current = state.generation,
                "discarding superseded detection result"
            );
            return outcome.url;
        }
        state.in_flight = None;
        state.resolved_url = Some(outcome.url.clone());
        state.source = Some(outcome.source.clone());
        state.last_detection_at = Some(self.clock.now());
        // Only a reachable candidate clears the count.
        state.consecutive_failures = match &outcome.source {
            ResolutionSource::Candidate { .. } => 0,
            _ => {
                let failed = u32::try_from(outcome.failed_probes).unwrap_or(u32::MAX);
                state.consecutive_failures.saturating_add(failed)
            }
        };
        if let Some(metrics) = &self.metrics {
            metrics.record_detection(&outcome.source);
            metrics.set_consecutive_failures(state.consecutive_failures);
        }
        debug!(
            url = %outcome.url,
            source = outcome.source.kind(),
            failed_probes = outcome.failed_probes,
            failures = state.consecutive_failures,
            "endpoint detection settled"
        );
        outcome.url
    }

    /// Release the in-flight slot of a sequence that never settled.
    fn abandon(&self, generation: u64) -> String {
        let mut state = self.state.lock();
        if state
            .in_flight
            .as_ref()
            .is_some_and(|in_flight| in_flight.generation == generation)
        {
            state.in_flight = None;
        }
        state
            .resolved_url
            .clone()
            .or_else(|| self.fallback_url.clone())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_owned())
    }
}
