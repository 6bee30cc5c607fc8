//! Diagnostic Core - Session and protocol client for the diagnostic assistant
//!
//! This crate owns everything between a user gesture and the diagnostic
//! backend: the persistent connection, the session life-cycle, the typed
//! command set, and the demultiplexing of server-pushed events into state a
//! surface can render.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  commands  ┌───────────────────┐  JSON frames  ┌─────────────┐
//! │   Surface    ├───────────►│ SessionController ├──────────────►│  Diagnostic │
//! │ (CLI, GUI)   │            │   (single-flight  │               │   Backend   │
//! │              │◄───────────┤    open + outbox) │◄──────────────┤             │
//! └──────────────┘  snapshot  └─────────┬─────────┘    events     └─────────────┘
//!                                       │
//!                                       ▼
//!                              DiagnosticState::apply
//!                          (log | thinking | busy flag)
//! ```
//!
//! # Quick Start
//!
//! ```ignore
//! use diagnostic_core::{SessionController, TransportConfig, WebSocketConnector};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = TransportConfig::from_api_base("http://127.0.0.1:8000")?;
//!     let session = SessionController::new(WebSocketConnector::new(), config);
//!
//!     session.begin_issue("brake noise when stopping").await;
//!
//!     let mut updates = session.subscribe_updates();
//!     while updates.changed().await.is_ok() {
//!         let state = session.snapshot();
//!         // Render state.log(), state.thinking(), state.is_busy()
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`commands`]: Commands sent from the client to the backend
//! - [`events`]: Events pushed by the backend, parsed into a closed set
//! - [`prompt`]: Test prompts and answer coercion
//! - [`state`]: The demultiplexer and the state it maintains
//! - [`session`]: The session controller and its state machine
//! - [`transport`]: Connection abstraction (WebSocket, in-process)
//! - [`health`]: HTTP reachability probe for the backend
//! - [`config`]: TOML/env configuration loading
//! - [`voice`]: Speech capability boundary (transcribe, speak)

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod commands;
pub mod config;
pub mod events;
pub mod health;
pub mod prompt;
pub mod session;
pub mod state;
pub mod transport;
pub mod voice;

// Re-exports for convenience
pub use commands::{ClientCommand, IssueDescription};
pub use config::{
    default_config_path, load_config, load_config_from_path, ClientConfig, ClientToml,
    ConfigError, ConfigOverrides, ConfigSource, VoiceConfig,
};
pub use events::{InboundMessage, ServerEvent};
pub use health::{BackendStatus, HealthProbe};
pub use prompt::{coerce_answer, AnswerField, FieldKind, TestPrompt};
pub use session::{OpenError, SessionController, SessionId, SessionState};
pub use state::{DiagnosticState, LogEntry, Routed};
pub use transport::{
    Connector, Endpoint, InProcessBackend, InProcessConnector, PeerConnection, PendingConnection,
    TransportConfig, TransportError, TransportEvent, TransportLink, TransportSender,
};
pub use voice::{CommandSpeaker, CommandTranscriber, SpeechEvent, Speaker, Transcriber, VoiceError};

#[cfg(feature = "websocket")]
pub use transport::WebSocketConnector;
