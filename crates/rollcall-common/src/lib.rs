//! ---
//! rollcall_section: "01-core-functionality"
//! rollcall_subsection: "module"
//! rollcall_type: "source"
//! rollcall_scope: "code"
//! rollcall_description: "Shared primitives and utilities for the core runtime."
//! rollcall_version: "v0.0.0-prealpha"
//! rollcall_owner: "tbd"
//! ---
//! Core shared primitives for the rollcall workspace.
//! This crate exposes configuration loading, logging bootstrap, and the
//! clock abstraction consumed by the connectivity layer.

pub mod clock;
pub mod config;
pub mod logging;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    AppConfig, DetectionConfig, EndpointConfig, LoggingConfig, MetricsConfig, MonitorConfig,
};
pub use logging::{init_console, init_tracing, LogFormat};
