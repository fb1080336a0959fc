//! ---
//! rollcall_section: "07-resilience-fault-tolerance"
//! rollcall_subsection: "module"
//! rollcall_type: "source"
//! rollcall_scope: "code"
//! rollcall_description: "Reachability probes and the transports that carry them."
//! rollcall_version: "v0.0.0-prealpha"
//! rollcall_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use reqwest::Client;
use thiserror::Error;
use tokio::time::{sleep, timeout};
use tracing::{debug, info};

/// Health endpoint probed during detection.
pub const HEALTH_PATH: &str = "/system/health";

/// Default bound on a single probe.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_millis(5000);

/// Failure of a single reachability probe.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeError {
    /// No response within the probe timeout.
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
    /// The service answered with a status the probe does not accept.
    #[error("unexpected http status {0}")]
    Status(u16),
    /// The request could not be carried out.
    #[error("transport error: {0}")]
    Transport(String),
}

/// Which liveness contract a probe checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeKind {
    /// `GET {base}/system/health`; only 2xx counts.
    Health,
    /// `GET {base}/`; 2xx or 401 counts, since 401 means the service is up.
    Reachability,
}

impl ProbeKind {
    pub fn path(&self) -> &'static str {
        match self {
            ProbeKind::Health => HEALTH_PATH,
            ProbeKind::Reachability => "/",
        }
    }

    pub fn url_for(&self, base_url: &str) -> String {
        format!("{}{}", base_url.trim_end_matches('/'), self.path())
    }

    pub fn accepts(&self, status: u16) -> bool {
        let success = (200..300).contains(&status);
        match self {
            ProbeKind::Health => success,
            ProbeKind::Reachability => success || status == 401,
        }
    }
}

/// Carrier for probe requests. Swappable so tests can script responses.
#[async_trait]
pub trait ProbeTransport: Send + Sync + 'static {
    /// Issue a GET against `url` and return the response status code.
    async fn get_status(&self, url: &str) -> Result<u16, ProbeError>;

    /// Drop pooled connections and start afresh.
    async fn reconnect(&self) -> Result<(), ProbeError> {
        Ok(())
    }
}

/// Probe `base_url` with the contract of `kind`, bounded by `limit`.
pub async fn probe(
    transport: &dyn ProbeTransport,
    base_url: &str,
    kind: ProbeKind,
    limit: Duration,
) -> Result<u16, ProbeError> {
    let url = kind.url_for(base_url);
    match timeout(limit, transport.get_status(&url)).await {
        Ok(Ok(status)) if kind.accepts(status) => Ok(status),
        Ok(Ok(status)) => Err(ProbeError::Status(status)),
        Ok(Err(err)) => Err(err),
        Err(_) => Err(ProbeError::Timeout(limit)),
    }
}

/// HTTP transport backed by a pooled `reqwest` client.
#[derive(Debug)]
pub struct HttpTransport {
    client: RwLock<Client>,
    request_timeout: Duration,
}

impl HttpTransport {
    pub fn new(request_timeout: Duration) -> Result<Self, ProbeError> {
        Ok(Self {
            client: RwLock::new(build_client(request_timeout)?),
            request_timeout,
        })
    }
}

fn build_client(request_timeout: Duration) -> Result<Client, ProbeError> {
    Client::builder()
        .timeout(request_timeout)
        .build()
        .map_err(|err| ProbeError::Transport(err.to_string()))
}

#[async_trait]
impl ProbeTransport for HttpTransport {
    async fn get_status(&self, url: &str) -> Result<u16, ProbeError> {
        let client = self.client.read().clone();
        match client.get(url).send().await {
            Ok(response) => Ok(response.status().as_u16()),
            Err(err) if err.is_timeout() => Err(ProbeError::Timeout(self.request_timeout)),
            Err(err) => {
                debug!(url, error = %err, "probe request failed");
                Err(ProbeError::Transport(err.to_string()))
            }
        }
    }

    async fn reconnect(&self) -> Result<(), ProbeError> {
        let fresh = build_client(self.request_timeout)?;
        *self.client.write() = fresh;
        info!("http transport rebuilt");
        Ok(())
    }
}

/// Canned response for [`ScriptedTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedResponse {
    /// Answer immediately with this status.
    Status(u16),
    /// Answer with `status` after `delay`.
    Delayed(Duration, u16),
    /// Fail immediately with a transport error.
    Refused,
    /// Never answer.
    Hang,
}

/// In-memory transport answering from a per-URL script and counting requests.
///
/// URLs without a script are refused.
#[derive(Debug, Default, Clone)]
pub struct ScriptedTransport {
    scripts: Arc<RwLock<HashMap<String, ScriptedResponse>>>,
    requests: Arc<Mutex<Vec<String>>>,
    reconnects: Arc<AtomicUsize>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the response for an exact request URL.
    pub fn respond(&self, url: impl Into<String>, response: ScriptedResponse) -> &Self {
        self.scripts.write().insert(url.into(), response);
        self
    }

    /// Script the health endpoint of `base_url`.
    pub fn health(&self, base_url: &str, response: ScriptedResponse) -> &Self {
        self.respond(ProbeKind::Health.url_for(base_url), response)
    }

    /// Script the root endpoint of `base_url`.
    pub fn root(&self, base_url: &str, response: ScriptedResponse) -> &Self {
        self.respond(ProbeKind::Reachability.url_for(base_url), response)
    }

    /// Total number of requests issued.
    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    /// Number of requests issued against `url`.
    pub fn requests_to(&self, url: &str) -> usize {
        self.requests.lock().iter().filter(|seen| *seen == url).count()
    }

    /// Number of health probes issued against `base_url`.
    pub fn health_probes(&self, base_url: &str) -> usize {
        self.requests_to(&ProbeKind::Health.url_for(base_url))
    }

    /// Requests in issue order.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().clone()
    }

    pub fn reconnect_count(&self) -> usize {
        self.reconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProbeTransport for ScriptedTransport {
    async fn get_status(&self, url: &str) -> Result<u16, ProbeError> {
        self.requests.lock().push(url.to_owned());
        let script = self.scripts.read().get(url).cloned();
        match script {
            Some(ScriptedResponse::Status(status)) => Ok(status),
            Some(ScriptedResponse::Delayed(delay, status)) => {
                sleep(delay).await;
                Ok(status)
            }
            Some(ScriptedResponse::Hang) => {
                std::future::pending::<Result<u16, ProbeError>>().await
            }
            Some(ScriptedResponse::Refused) | None => {
                Err(ProbeError::Transport(format!("connection refused: {url}")))
            }
        }
    }

    async fn reconnect(&self) -> Result<(), ProbeError> {
        self.reconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
