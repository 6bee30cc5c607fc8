//! Transport Configuration
//!
//! Where the session endpoint lives and how long an open attempt may take.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

/// Path of the session endpoint on the backend
pub const DEFAULT_SESSION_PATH: &str = "/issue/create";

/// Default open timeout in milliseconds
pub const DEFAULT_OPEN_TIMEOUT_MS: u64 = 10_000;

/// WebSocket address of the session endpoint
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    url: String,
}

impl Endpoint {
    /// Derive the session endpoint from the backend's HTTP base address
    ///
    /// `http://host:port` becomes `ws://host:port/issue/create`, and
    /// `https` becomes `wss`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if `api_base` is not an
    /// `http://` or `https://` address.
    pub fn from_api_base(api_base: &str) -> Result<Self, ConfigError> {
        Self::with_path(api_base, DEFAULT_SESSION_PATH)
    }

    /// Derive an endpoint with a custom session path
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if `api_base` is not an
    /// `http://` or `https://` address.
    pub fn with_path(api_base: &str, path: &str) -> Result<Self, ConfigError> {
        let base = api_base.trim().trim_end_matches('/');

        let url = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            return Err(ConfigError::ValidationError(format!(
                "api base must start with http:// or https://, got {api_base:?}"
            )));
        };

        if url.ends_with("://") {
            return Err(ConfigError::ValidationError(format!(
                "api base has no host: {api_base:?}"
            )));
        }

        let path = path.trim();
        let url = if path.starts_with('/') {
            format!("{url}{path}")
        } else {
            format!("{url}/{path}")
        };

        Ok(Self { url })
    }

    /// The full WebSocket URL
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}

/// Transport configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Session endpoint
    pub endpoint: Endpoint,

    /// Open timeout in milliseconds (0 = wait indefinitely)
    ///
    /// An attempt that has not completed its handshake by then is abandoned
    /// and the session returns to `Closed`.
    pub open_timeout_ms: u64,
}

impl TransportConfig {
    /// Configuration for an endpoint with default timeouts
    #[must_use]
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            open_timeout_ms: DEFAULT_OPEN_TIMEOUT_MS,
        }
    }

    /// Configuration derived from the backend's HTTP base address
    ///
    /// # Errors
    ///
    /// Returns an error if `api_base` is not an http(s) address.
    pub fn from_api_base(api_base: &str) -> Result<Self, ConfigError> {
        Ok(Self::new(Endpoint::from_api_base(api_base)?))
    }

    /// Set the open timeout
    ///
    /// `None` and `Some(Duration::ZERO)` both mean "wait indefinitely".
    /// Any other timeout shorter than a millisecond is rounded up to one.
    #[must_use]
    pub fn with_open_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.open_timeout_ms = match timeout {
            None => 0,
            Some(t) if t.is_zero() => 0,
            Some(t) => u64::try_from(t.as_millis()).unwrap_or(u64::MAX).max(1),
        };
        self
    }

    /// The open timeout, if one is configured
    #[must_use]
    pub fn open_timeout(&self) -> Option<Duration> {
        (self.open_timeout_ms > 0).then(|| Duration::from_millis(self.open_timeout_ms))
    }
}
