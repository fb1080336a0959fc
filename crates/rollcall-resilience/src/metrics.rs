//! ---
//! rollcall_section: "07-resilience-fault-tolerance"
//! rollcall_subsection: "module"
//! rollcall_type: "source"
//! rollcall_scope: "code"
//! rollcall_description: "Prometheus instrumentation for endpoint discovery and monitoring."
//! rollcall_version: "v0.0.0-prealpha"
//! rollcall_owner: "tbd"
//! ---
use anyhow::Result;
use prometheus::{IntCounterVec, IntGauge, Opts};
use rollcall_metrics::SharedRegistry;

use crate::resolver::ResolutionSource;

/// Metrics published by the connectivity layer.
#[derive(Clone)]
pub struct ResilienceMetrics {
    registry: SharedRegistry,
    probes_total: IntCounterVec,
    detections_total: IntCounterVec,
    consecutive_failures: IntGauge,
    connection_checks_total: IntCounterVec,
}

impl ResilienceMetrics {
    /// Register the metric family against the provided registry.
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let probes_total = IntCounterVec::new(
            Opts::new(
                "rollcall_endpoint_probes_total",
                "Health probes issued against endpoint candidates",
            ),
            &["label", "outcome"],
        )?;
        registry.register(Box::new(probes_total.clone()))?;

        let detections_total = IntCounterVec::new(
            Opts::new(
                "rollcall_endpoint_detections_total",
                "Completed detection sequences by resolution source",
            ),
            &["source"],
        )?;
        registry.register(Box::new(detections_total.clone()))?;

        let consecutive_failures = IntGauge::with_opts(Opts::new(
            "rollcall_endpoint_consecutive_failures",
            "Failures reported against the resolved endpoint since the last success",
        ))?;
        registry.register(Box::new(consecutive_failures.clone()))?;

        let connection_checks_total = IntCounterVec::new(
            Opts::new(
                "rollcall_connection_checks_total",
                "Connection monitor checks by outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(connection_checks_total.clone()))?;

        Ok(Self {
            registry,
            probes_total,
            detections_total,
            consecutive_failures,
            connection_checks_total,
        })
    }

    /// Expose the underlying shared registry for convenience.
    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn record_probe(&self, label: &str, reachable: bool) {
        let outcome = if reachable { "reachable" } else { "unreachable" };
        self.probes_total.with_label_values(&[label, outcome]).inc();
    }

    pub fn record_detection(&self, source: &ResolutionSource) {
        self.detections_total
            .with_label_values(&[source.kind()])
            .inc();
    }

    pub fn set_consecutive_failures(&self, failures: u32) {
        self.consecutive_failures.set(i64::from(failures));
    }

    /// `outcome` is one of `connected`, `disconnected`, `skipped`.
    pub fn record_check(&self, outcome: &str) {
        self.connection_checks_total
            .with_label_values(&[outcome])
            .inc();
    }
}

impl std::fmt::Debug for ResilienceMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilienceMetrics").finish_non_exhaustive()
    }
}
