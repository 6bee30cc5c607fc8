//! TOML Configuration File Support
//!
//! Centralized configuration loading for diagnostic client surfaces,
//! supporting a TOML configuration file at
//! `~/.config/diagnostic-client/client.toml`.
//!
//! # Configuration Priority
//!
//! Configuration values are loaded with the following priority (highest first):
//! 1. CLI arguments (applied by the caller through [`ConfigOverrides`])
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! # XDG Base Directory Compliance
//!
//! The configuration file follows XDG Base Directory specification:
//! - `$XDG_CONFIG_HOME/diagnostic-client/client.toml`
//!
//! # Example Configuration
//!
//! ```toml
//! [backend]
//! api_base = "http://127.0.0.1:8000"
//! session_path = "/issue/create"
//!
//! [session]
//! open_timeout_ms = 10000
//!
//! [health]
//! poll_interval_ms = 2000
//! request_timeout_ms = 5000
//!
//! [voice]
//! max_duration_secs = 5
//! transcribe_command = ["diag-record"]
//! speak_command = ["espeak"]
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::health::{HealthProbe, DEFAULT_POLL_INTERVAL_MS, DEFAULT_REQUEST_TIMEOUT_MS};
use crate::transport::config::{
    Endpoint, TransportConfig, DEFAULT_OPEN_TIMEOUT_MS, DEFAULT_SESSION_PATH,
};

/// Backend address used when nothing else is configured
pub const DEFAULT_API_BASE: &str = "http://127.0.0.1:8000";

/// Default maximum recording length for voice input
pub const DEFAULT_VOICE_MAX_SECS: u64 = 5;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where a configuration value came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// Backend section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendToml {
    /// HTTP base address of the diagnostic backend
    pub api_base: Option<String>,

    /// Path of the session WebSocket endpoint
    pub session_path: Option<String>,
}

/// Session section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionToml {
    /// Open timeout in milliseconds (0 = no timeout)
    pub open_timeout_ms: Option<u64>,
}

/// Health probe section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthToml {
    /// Interval between probes in milliseconds
    pub poll_interval_ms: Option<u64>,

    /// Per-request timeout in milliseconds
    pub request_timeout_ms: Option<u64>,
}

/// Voice section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceToml {
    /// Maximum recording length in seconds
    pub max_duration_secs: Option<u64>,

    /// Recorder/transcriber program and leading arguments
    pub transcribe_command: Option<Vec<String>>,

    /// Text-to-speech program and leading arguments
    pub speak_command: Option<Vec<String>>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientToml {
    /// Backend configuration section
    pub backend: BackendToml,

    /// Session configuration section
    pub session: SessionToml,

    /// Health probe configuration section
    pub health: HealthToml,

    /// Voice configuration section
    pub voice: VoiceToml,
}

// =============================================================================
// Main Configuration Struct
// =============================================================================

/// Voice capability settings
///
/// An empty command disables that capability.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VoiceConfig {
    /// Maximum recording length
    pub max_duration: Duration,

    /// Recorder/transcriber program and leading arguments
    pub transcribe_command: Vec<String>,

    /// Text-to-speech program and leading arguments
    pub speak_command: Vec<String>,
}

/// Centralized configuration for client surfaces
///
/// Use [`load_config`] to load configuration with proper priority handling.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// HTTP base address of the diagnostic backend
    pub api_base: String,

    /// Path of the session WebSocket endpoint
    pub session_path: String,

    /// Open timeout in milliseconds (0 = no timeout)
    pub open_timeout_ms: u64,

    /// Interval between health probes
    pub health_poll_interval: Duration,

    /// Per-request timeout of the health probe
    pub health_request_timeout: Duration,

    /// Voice settings
    pub voice: VoiceConfig,

    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,

    /// Source of configuration values
    source: ConfigSource,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            session_path: DEFAULT_SESSION_PATH.to_string(),
            open_timeout_ms: DEFAULT_OPEN_TIMEOUT_MS,
            health_poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            health_request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            voice: VoiceConfig {
                max_duration: Duration::from_secs(DEFAULT_VOICE_MAX_SECS),
                transcribe_command: Vec::new(),
                speak_command: Vec::new(),
            },
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl ClientConfig {
    /// Create a new configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the highest-priority source that contributed a value
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Session endpoint derived from the backend address
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if `api_base` is not an
    /// http(s) address.
    pub fn endpoint(&self) -> Result<Endpoint, ConfigError> {
        Endpoint::with_path(&self.api_base, &self.session_path)
    }

    /// Transport configuration for the session controller
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint cannot be derived.
    pub fn transport_config(&self) -> Result<TransportConfig, ConfigError> {
        let mut transport = TransportConfig::new(self.endpoint()?);
        transport.open_timeout_ms = self.open_timeout_ms;
        Ok(transport)
    }

    /// Health probe for the configured backend
    #[must_use]
    pub fn health_probe(&self) -> HealthProbe {
        HealthProbe::new(&self.api_base)
            .with_poll_interval(self.health_poll_interval)
            .with_request_timeout(self.health_request_timeout)
    }

    /// Check values that cannot be represented in the types alone
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` describing the first problem.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.endpoint()?;
        if self.health_poll_interval.is_zero() {
            return Err(ConfigError::ValidationError(
                "health poll interval must be greater than zero".to_string(),
            ));
        }
        if self.voice.max_duration.is_zero() {
            return Err(ConfigError::ValidationError(
                "voice max duration must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/diagnostic-client/client.toml` or
/// `~/.config/diagnostic-client/client.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("diagnostic-client").join("client.toml"))
}

/// Load configuration from all sources with proper priority
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed.
/// A missing config file is not an error (defaults are used).
pub fn load_config() -> Result<ClientConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path
///
/// # Arguments
///
/// * `path` - Optional path to the configuration file. If `None`, only defaults
///   and environment variables are used.
///
/// # Errors
///
/// Returns an error if the specified config file exists but cannot be read or
/// parsed.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<ClientConfig, ConfigError> {
    load_config_with_env(path, |key| std::env::var(key).ok())
}

/// Load configuration reading environment variables through `env`
fn load_config_with_env(
    path: Option<PathBuf>,
    env: impl Fn(&str) -> Option<String>,
) -> Result<ClientConfig, ConfigError> {
    // Start with defaults
    let mut config = ClientConfig::default();

    // Try to load from file
    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: ClientToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config);
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    // Apply environment variables (overrides file values)
    apply_env_config(&mut config, env);

    Ok(config)
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut ClientConfig, toml: &ClientToml) {
    // Backend settings
    if let Some(ref api_base) = toml.backend.api_base {
        config.api_base = api_base.clone();
    }
    if let Some(ref path) = toml.backend.session_path {
        config.session_path = path.clone();
    }

    // Session settings
    if let Some(timeout) = toml.session.open_timeout_ms {
        config.open_timeout_ms = timeout;
    }

    // Health settings
    if let Some(interval) = toml.health.poll_interval_ms {
        config.health_poll_interval = Duration::from_millis(interval);
    }
    if let Some(timeout) = toml.health.request_timeout_ms {
        config.health_request_timeout = Duration::from_millis(timeout);
    }

    // Voice settings
    if let Some(secs) = toml.voice.max_duration_secs {
        config.voice.max_duration = Duration::from_secs(secs);
    }
    if let Some(ref command) = toml.voice.transcribe_command {
        config.voice.transcribe_command = command.clone();
    }
    if let Some(ref command) = toml.voice.speak_command {
        config.voice.speak_command = command.clone();
    }
}

/// Apply environment variable overrides to the config
fn apply_env_config(config: &mut ClientConfig, env: impl Fn(&str) -> Option<String>) {
    if let Some(api_base) = env("DIAG_API_BASE").filter(|v| !v.trim().is_empty()) {
        config.api_base = api_base;
        config.source = ConfigSource::Env;
    }
    if let Some(timeout) = env("DIAG_OPEN_TIMEOUT_MS") {
        if let Ok(ms) = timeout.trim().parse::<u64>() {
            config.open_timeout_ms = ms;
            config.source = ConfigSource::Env;
        }
    }
    if let Some(interval) = env("DIAG_HEALTH_INTERVAL_MS") {
        if let Ok(ms) = interval.trim().parse::<u64>() {
            config.health_poll_interval = Duration::from_millis(ms);
            config.source = ConfigSource::Env;
        }
    }
    if let Some(secs) = env("DIAG_VOICE_MAX_SECS") {
        if let Ok(s) = secs.trim().parse::<u64>() {
            config.voice.max_duration = Duration::from_secs(s);
            config.source = ConfigSource::Env;
        }
    }
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Builder for applying CLI overrides to configuration
///
/// Use this after [`load_config`] to apply command-line argument overrides.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Backend address override
    pub api_base: Option<String>,

    /// Open timeout override (milliseconds)
    pub open_timeout_ms: Option<u64>,

    /// Health poll interval override (milliseconds)
    pub health_poll_interval_ms: Option<u64>,

    /// Voice max duration override (seconds)
    pub voice_max_secs: Option<u64>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set backend address override
    #[must_use]
    pub fn with_api_base(mut self, api_base: String) -> Self {
        self.api_base = Some(api_base);
        self
    }

    /// Set open timeout override
    #[must_use]
    pub fn with_open_timeout_ms(mut self, ms: u64) -> Self {
        self.open_timeout_ms = Some(ms);
        self
    }

    /// Set health poll interval override
    #[must_use]
    pub fn with_health_poll_interval_ms(mut self, ms: u64) -> Self {
        self.health_poll_interval_ms = Some(ms);
        self
    }

    /// Set voice max duration override
    #[must_use]
    pub fn with_voice_max_secs(mut self, secs: u64) -> Self {
        self.voice_max_secs = Some(secs);
        self
    }

    /// Apply overrides to a configuration
    pub fn apply(&self, config: &mut ClientConfig) {
        if self.api_base.is_some()
            || self.open_timeout_ms.is_some()
            || self.health_poll_interval_ms.is_some()
            || self.voice_max_secs.is_some()
        {
            config.source = ConfigSource::Cli;
        }

        if let Some(ref api_base) = self.api_base {
            config.api_base = api_base.clone();
        }

        if let Some(timeout) = self.open_timeout_ms {
            config.open_timeout_ms = timeout;
        }

        if let Some(interval) = self.health_poll_interval_ms {
            config.health_poll_interval = Duration::from_millis(interval);
        }

        if let Some(secs) = self.voice_max_secs {
            config.voice.max_duration = Duration::from_secs(secs);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
