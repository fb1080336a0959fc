//! ---
//! rollcall_section: "07-resilience-fault-tolerance"
//! rollcall_subsection: "module"
//! rollcall_type: "source"
//! rollcall_scope: "code"
//! rollcall_description: "Backend endpoint discovery and connection supervision."
//! rollcall_version: "v0.0.0-prealpha"
//! rollcall_owner: "tbd"
//! ---

pub mod metrics;
pub mod monitor;
pub mod resolver;
pub mod transport;

pub use metrics::ResilienceMetrics;
pub use monitor::{
    ConnectionAttempt, ConnectionHistory, ConnectionMonitor, ConnectionSnapshot, MonitorHandle,
    MonitorSettings,
};
pub use resolver::{
    DetectionStatus, EndpointCandidate, EndpointResolver, ResolutionSource, ResolverBuilder,
    ResolverSettings, ResolverTuning,
};
pub use transport::{
    probe, HttpTransport, ProbeError, ProbeKind, ProbeTransport, ScriptedResponse,
    ScriptedTransport,
};

/// Crate prelude collecting the most commonly used types.
pub mod prelude {
    pub use super::metrics::ResilienceMetrics;
    pub use super::monitor::{ConnectionMonitor, ConnectionSnapshot, MonitorHandle, MonitorSettings};
    pub use super::resolver::{EndpointCandidate, EndpointResolver, ResolverSettings};
    pub use super::transport::{HttpTransport, ProbeTransport};
}
