//! Transport Traits
//!
//! A [`Connector`] opens connections to the backend. Each successful open
//! yields a [`TransportLink`]: a cloneable [`TransportSender`] for outbound
//! frames and an ordered receiver of [`TransportEvent`]s.
//!
//! Sending is synchronous (frames go into an unbounded channel drained by
//! the connection's writer task), so a caller holding a lock can send a run
//! of commands without yielding and without any other sender interleaving.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::commands::ClientCommand;

use super::config::Endpoint;

/// Errors that can occur during transport operations
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection to the backend failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Connection was closed
    #[error("Connection closed")]
    ConnectionClosed,

    /// Failed to send a frame
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Frame serialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Transport not in expected state
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

/// Something that happened on an open connection
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    /// A text frame from the backend
    Message(String),
    /// A non-fatal error was observed; `Closed` follows if the link died
    Error(String),
    /// The connection is gone; no further events follow
    Closed {
        /// Close reason given by the peer, if any
        reason: Option<String>,
    },
}

/// A frame queued for the writer task
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OutboundFrame {
    /// A text frame
    Text(String),
    /// Close the connection
    Close,
}

/// Outbound half of an open connection
#[derive(Clone, Debug)]
pub struct TransportSender {
    tx: mpsc::UnboundedSender<OutboundFrame>,
    open: Arc<AtomicBool>,
}

impl TransportSender {
    /// Wrap the writer channel of a connection
    ///
    /// `open` is shared with the connection's tasks, which clear it when the
    /// connection dies.
    #[must_use]
    pub fn new(tx: mpsc::UnboundedSender<OutboundFrame>, open: Arc<AtomicBool>) -> Self {
        Self { tx, open }
    }

    /// Queue a command
    ///
    /// # Errors
    ///
    /// Fails when the command cannot be encoded or the connection is closed.
    pub fn send(&self, command: &ClientCommand) -> Result<(), TransportError> {
        let json = command.to_json()?;
        self.send_text(json)
    }

    /// Queue a raw text frame
    ///
    /// # Errors
    ///
    /// Fails when the connection is closed.
    pub fn send_text(&self, text: String) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::InvalidState("Not connected".to_string()));
        }
        self.tx
            .send(OutboundFrame::Text(text))
            .map_err(|_| TransportError::SendFailed("Channel closed".to_string()))
    }

    /// Close the connection; further sends fail
    pub fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            let _ = self.tx.send(OutboundFrame::Close);
        }
    }

    /// Whether the connection is still usable
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) && !self.tx.is_closed()
    }
}

/// An open connection
#[derive(Debug)]
pub struct TransportLink {
    /// Outbound half
    pub sender: TransportSender,
    /// Inbound events, in the order the backend sent them
    pub events: mpsc::Receiver<TransportEvent>,
}

/// Opens connections to the diagnostic backend
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open one connection and wait for the handshake to complete
    async fn connect(&self, endpoint: &Endpoint) -> Result<TransportLink, TransportError>;
}
