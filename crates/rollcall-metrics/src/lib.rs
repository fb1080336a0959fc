//! ---
//! rollcall_section: "03-observability"
//! rollcall_subsection: "module"
//! rollcall_type: "source"
//! rollcall_scope: "code"
//! rollcall_description: "Prometheus registry plus the HTTP exporter for rollcall status and metrics."
//! rollcall_version: "v0.0.0-prealpha"
//! rollcall_owner: "tbd"
//! ---
//! The exporter serves three routes:
//!
//! * `/metrics`: text exposition of the shared registry.
//! * `/healthz`: plain `ok` while the exporter task is running.
//! * `/status`: the latest value of a watched status, as JSON. This route is
//!   mounted only when a status source is attached with
//!   [`Exporter::with_status`].
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use prometheus::{Registry, TextEncoder};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

pub use prometheus;

pub type SharedRegistry = Arc<Registry>;

const EXPOSITION_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

/// Registry with the `rollcall` prefix left to the individual families.
pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Renders every family gathered from `registry` in the text exposition format.
pub fn render(registry: &Registry) -> Result<String> {
    TextEncoder::new()
        .encode_to_string(&registry.gather())
        .context("failed to encode metric families")
}

/// Builder for the HTTP exporter. `S` is the status type served on `/status`.
pub struct Exporter<S = ()> {
    registry: SharedRegistry,
    status: Option<watch::Receiver<S>>,
}

impl Exporter<()> {
    pub fn new(registry: SharedRegistry) -> Self {
        Self {
            registry,
            status: None,
        }
    }
}

impl<S> Exporter<S>
where
    S: Serialize + Clone + Send + Sync + 'static,
{
    /// Serves the latest value of `status` on `/status`.
    pub fn with_status<T>(self, status: watch::Receiver<T>) -> Exporter<T> {
        Exporter {
            registry: self.registry,
            status: Some(status),
        }
    }

    pub fn router(self) -> Router {
        let with_status = self.status.is_some();
        let state = ExporterState {
            registry: self.registry,
            status: self.status,
        };
        let router = Router::new()
            .route("/metrics", get(metrics_handler::<S>))
            .route("/healthz", get(|| async { "ok" }));
        let router = if with_status {
            router.route("/status", get(status_handler::<S>))
        } else {
            router
        };
        router.with_state(state)
    }

    /// Binds `addr` and serves until [`ExporterHandle::shutdown`] is called.
    pub async fn serve(self, addr: SocketAddr) -> Result<ExporterHandle> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind exporter on {addr}"))?;
        let local = listener
            .local_addr()
            .context("failed to read exporter address")?;
        let app = self.router();
        let (stop, mut stopped) = watch::channel(false);
        let task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    // Only `true` is ever sent; a dropped sender stops too.
                    let _ = stopped.changed().await;
                })
                .await
                .context("exporter terminated")
        });
        info!(addr = %local, "metrics exporter listening");
        Ok(ExporterHandle {
            addr: local,
            stop,
            task,
        })
    }
}

#[derive(Clone)]
struct ExporterState<S> {
    registry: SharedRegistry,
    status: Option<watch::Receiver<S>>,
}

async fn metrics_handler<S>(State(state): State<ExporterState<S>>) -> Response {
    match render(&state.registry) {
        Ok(body) => (
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static(EXPOSITION_CONTENT_TYPE),
            )],
            body,
        )
            .into_response(),
        Err(err) => {
            debug!(error = %err, "metrics render failed");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
        }
    }
}

async fn status_handler<S>(State(state): State<ExporterState<S>>) -> Response
where
    S: Serialize + Clone,
{
    match &state.status {
        Some(status) => {
            let current = S::clone(&status.borrow());
            Json(current).into_response()
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Running exporter. Dropping the handle also begins a graceful stop.
pub struct ExporterHandle {
    addr: SocketAddr,
    stop: watch::Sender<bool>,
    task: JoinHandle<Result<()>>,
}

impl ExporterHandle {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn shutdown(self) -> Result<()> {
        let _ = self.stop.send(true);
        self.task.await.context("exporter task panicked")?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::IntCounter;

    #[derive(Debug, Clone, Serialize)]
    struct Status {
        connected: bool,
        checks: u32,
    }

    fn any_port() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[test]
    fn render_lists_registered_families() {
        let registry = new_registry();
        let counter = IntCounter::new("rollcall_render_total", "render counter").unwrap();
        registry.register(Box::new(counter.clone())).unwrap();
        counter.inc_by(3);

        let text = render(&registry).unwrap();
        assert!(text.contains("# TYPE rollcall_render_total counter"));
        assert!(text.contains("rollcall_render_total 3"));
    }

    #[tokio::test]
    async fn exporter_serves_metrics_and_health() {
        let registry = new_registry();
        let counter = IntCounter::new("rollcall_test_total", "test counter").unwrap();
        registry.register(Box::new(counter.clone())).unwrap();
        counter.inc();

        let exporter = Exporter::new(registry).serve(any_port()).await.unwrap();
        let base = format!("http://{}", exporter.addr());

        let body = reqwest::get(format!("{base}/metrics"))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert!(body.contains("rollcall_test_total 1"));

        let health = reqwest::get(format!("{base}/healthz")).await.unwrap();
        assert_eq!(health.status(), reqwest::StatusCode::OK);
        assert_eq!(health.text().await.unwrap(), "ok");

        let status = reqwest::get(format!("{base}/status")).await.unwrap();
        assert_eq!(status.status(), reqwest::StatusCode::NOT_FOUND);

        exporter.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn status_route_follows_the_watched_value() {
        let (tx, rx) = watch::channel(Status {
            connected: false,
            checks: 0,
        });
        let exporter = Exporter::new(new_registry())
            .with_status(rx)
            .serve(any_port())
            .await
            .unwrap();
        let url = format!("http://{}/status", exporter.addr());

        let first: serde_json::Value = reqwest::get(&url).await.unwrap().json().await.unwrap();
        assert_eq!(first["connected"], false);
        assert_eq!(first["checks"], 0);

        tx.send_replace(Status {
            connected: true,
            checks: 4,
        });
        let second: serde_json::Value = reqwest::get(&url).await.unwrap().json().await.unwrap();
        assert_eq!(second["connected"], true);
        assert_eq!(second["checks"], 4);

        exporter.shutdown().await.unwrap();
    }
}
