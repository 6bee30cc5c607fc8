//! Backend Health Probe
//!
//! Plain HTTP reachability check against `GET {api_base}/test`. Surfaces use
//! it to show the connection indicator and to hold off until the backend is
//! up. It is independent of the session controller: a reachable backend
//! does not open a session, and an unreachable one does not close it.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Default interval between probes while waiting
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;

/// Default per-request timeout
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5_000;

/// Reachability of the diagnostic backend
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackendStatus {
    /// No answer yet
    #[default]
    Checking,
    /// The backend answered with a success status
    Connected {
        /// Greeting returned by the backend, if any
        message: Option<String>,
    },
    /// The request failed or returned an error status
    Disconnected,
}

impl BackendStatus {
    /// Indicator text for surfaces
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Checking => "System Checking",
            Self::Connected { .. } => "System Connected",
            Self::Disconnected => "Can't connect to backend",
        }
    }

    /// Whether the backend is reachable
    #[must_use]
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }
}

impl fmt::Display for BackendStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Deserialize)]
struct TestResponse {
    #[serde(default)]
    message: Option<String>,
}

/// Polls the backend's test endpoint
pub struct HealthProbe {
    url: String,
    http_client: reqwest::Client,
    poll_interval: Duration,
    request_timeout: Duration,
    status_tx: watch::Sender<BackendStatus>,
}

impl HealthProbe {
    /// Create a probe for the backend at `api_base`
    #[must_use]
    pub fn new(api_base: &str) -> Self {
        let (status_tx, _) = watch::channel(BackendStatus::Checking);
        Self {
            url: format!("{}/test", api_base.trim().trim_end_matches('/')),
            http_client: reqwest::Client::new(),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            status_tx,
        }
    }

    /// Set the interval between probes in [`HealthProbe::wait_until_reachable`]
    ///
    /// Clamped to at least one millisecond.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Set the per-request timeout
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// URL being probed
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Most recently observed status
    #[must_use]
    pub fn status(&self) -> BackendStatus {
        self.status_tx.borrow().clone()
    }

    /// Watch status changes
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<BackendStatus> {
        self.status_tx.subscribe()
    }

    /// Probe once and publish the result
    pub async fn check(&self) -> BackendStatus {
        let status = match self
            .http_client
            .get(&self.url)
            .timeout(self.request_timeout)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => {
                let message = response
                    .json::<TestResponse>()
                    .await
                    .ok()
                    .and_then(|body| body.message);
                BackendStatus::Connected { message }
            }
            Ok(response) => {
                tracing::debug!(url = %self.url, status = %response.status(), "Backend answered with an error");
                BackendStatus::Disconnected
            }
            Err(e) => {
                tracing::debug!(url = %self.url, error = %e, "Backend unreachable");
                BackendStatus::Disconnected
            }
        };

        self.status_tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status.clone();
                true
            }
        });
        status
    }

    /// Probe until the backend answers
    ///
    /// Returns the first `Connected` status. Cancel by dropping the future.
    pub async fn wait_until_reachable(&self) -> BackendStatus {
        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut announced = false;
        loop {
            interval.tick().await;
            let status = self.check().await;
            if status.is_connected() {
                tracing::info!(url = %self.url, "Backend reachable");
                return status;
            }
            if !announced {
                tracing::warn!(
                    url = %self.url,
                    retry_ms = u64::try_from(self.poll_interval.as_millis()).unwrap_or(u64::MAX),
                    "Backend not reachable yet, retrying"
                );
                announced = true;
            }
        }
    }
}
