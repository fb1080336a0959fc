//! ---
//! rollcall_section: "07-resilience-fault-tolerance"
//! rollcall_subsection: "binary"
//! rollcall_type: "source"
//! rollcall_scope: "code"
//! rollcall_description: "Endpoint resolution and monitoring subcommands for rollcallctl."
//! rollcall_version: "v0.0.0-prealpha"
//! rollcall_owner: "tbd"
//! ---
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use rollcall_common::config::AppConfig;
use rollcall_metrics::{new_registry, Exporter, SharedRegistry};
use rollcall_resilience::{
    ConnectionMonitor, ConnectionSnapshot, EndpointResolver, HttpTransport, MonitorSettings,
    ResilienceMetrics,
};
use tokio::runtime::Runtime;
use tokio::signal;
use tracing::{info, warn};

/// Options for `rollcallctl resolve`.
#[derive(Debug, Args)]
pub struct ResolveOptions {
    /// Ignore any cached state and probe every candidate again.
    #[arg(long)]
    pub force: bool,
}

/// Options for `rollcallctl monitor`.
#[derive(Debug, Args)]
pub struct MonitorOptions {
    /// Run a single check and exit.
    #[arg(long)]
    pub once: bool,
}

fn build_resolver(config: &AppConfig, metrics: Option<ResilienceMetrics>) -> Result<EndpointResolver> {
    let transport = HttpTransport::new(config.detection.probe_timeout)
        .context("failed to build http transport")?;
    Ok(EndpointResolver::from_config(config, Arc::new(transport), metrics))
}

pub fn resolve(config: &AppConfig, options: ResolveOptions) -> Result<()> {
    let runtime = Runtime::new()?;
    runtime.block_on(async {
        let resolver = build_resolver(config, None)?;
        let url = if options.force {
            resolver.force_redetect().await
        } else {
            resolver.base_url().await
        };
        let source = resolver
            .source()
            .map(|source| match source {
                rollcall_resilience::ResolutionSource::Candidate { label } => {
                    format!("candidate '{label}'")
                }
                other => other.kind().replace('_', "-"),
            })
            .unwrap_or_else(|| "unknown".to_owned());
        println!("{url} ({source})");
        Ok::<(), anyhow::Error>(())
    })
}

pub fn monitor(config: &AppConfig, options: MonitorOptions) -> Result<()> {
    let runtime = Runtime::new()?;
    runtime.block_on(run_monitor(config, options))
}

async fn run_monitor(config: &AppConfig, options: MonitorOptions) -> Result<()> {
    let (metrics, registry) = if config.metrics.enabled {
        let registry: SharedRegistry = new_registry();
        (Some(ResilienceMetrics::new(registry.clone())?), Some(registry))
    } else {
        (None, None)
    };

    let resolver = build_resolver(config, metrics.clone())?;
    let monitor = ConnectionMonitor::new(resolver, MonitorSettings::from(&config.monitor), metrics);
    let exporter = match registry {
        Some(registry) => Some(
            Exporter::new(registry)
                .with_status(monitor.subscribe())
                .serve(config.metrics.listen)
                .await?,
        ),
        None => None,
    };
    let handle = monitor.start();

    if options.once {
        print_snapshot(&monitor.check_now().await)?;
    } else {
        let mut updates = monitor.subscribe();
        loop {
            tokio::select! {
                changed = updates.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let snapshot = updates.borrow_and_update().clone();
                    print_snapshot(&snapshot)?;
                }
                result = signal::ctrl_c() => {
                    if let Err(err) = result {
                        warn!(error = %err, "failed to listen for ctrl-c");
                    }
                    info!("interrupt received; stopping monitor");
                    break;
                }
            }
        }
    }

    handle.shutdown().await;
    if let Some(exporter) = exporter {
        exporter.shutdown().await?;
    }
    Ok(())
}

fn print_snapshot(snapshot: &ConnectionSnapshot) -> Result<()> {
    let rendered = serde_json::to_string(snapshot).context("failed to render snapshot")?;
    println!("{rendered}");
    Ok(())
}
