//! Transport Layer for Client-Backend Communication
//!
//! Provides abstraction over different transport mechanisms:
//! - `WebSocket`: Remote connection to the diagnostic backend
//! - `InProcess`: Channel-backed connection (tests and embedded backends)
//!
//! # Design Philosophy
//!
//! The transport layer separates the communication mechanism from the
//! session logic. A [`Connector`] knows how to open a connection; the
//! session controller decides when. Every open yields a fresh
//! [`TransportLink`], so a dead connection is never reused.

pub mod config;
pub mod in_process;
pub mod traits;
#[cfg(feature = "websocket")]
pub mod websocket;

// Re-exports for convenience
pub use config::{Endpoint, TransportConfig};
pub use in_process::{InProcessBackend, InProcessConnector, PeerConnection, PendingConnection};
pub use traits::{
    Connector, OutboundFrame, TransportError, TransportEvent, TransportLink, TransportSender,
};

#[cfg(feature = "websocket")]
pub use websocket::WebSocketConnector;
