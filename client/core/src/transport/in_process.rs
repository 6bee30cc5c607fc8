//! In-Process Transport
//!
//! Channel-backed connections for tests and for embedding a backend in the
//! same process. The connector side hands out ordinary [`TransportLink`]s;
//! the backend side sees each connection attempt as a [`PendingConnection`]
//! it can accept or reject.
//!
//! # Usage
//!
//! ```ignore
//! let (connector, mut backend) = InProcessConnector::new_pair();
//! let session = SessionController::new(connector, config);
//!
//! tokio::spawn(async move { session.start_diagnostics().await });
//!
//! let mut peer = backend.accept_next().await.unwrap();
//! assert_eq!(peer.recv_text().await.unwrap(), r#"{"type":"diagnostics.start"}"#);
//! peer.push(r#"{"type":"communications.talk","payload":{"message":"Hi"}}"#).await?;
//! ```

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use super::config::Endpoint;
use super::traits::{
    Connector, OutboundFrame, TransportError, TransportEvent, TransportLink, TransportSender,
};

/// Default capacity of the backend-to-client channel
const DEFAULT_CAPACITY: usize = 100;

/// Connector that hands connection attempts to an [`InProcessBackend`]
pub struct InProcessConnector {
    requests: mpsc::UnboundedSender<PendingConnection>,
    attempts: Arc<AtomicUsize>,
    capacity: usize,
}

/// Backend side of an [`InProcessConnector`]
pub struct InProcessBackend {
    requests: mpsc::UnboundedReceiver<PendingConnection>,
    attempts: Arc<AtomicUsize>,
}

impl InProcessConnector {
    /// Create a connected connector/backend pair
    ///
    /// Returns:
    /// - `InProcessConnector`: give this to the session controller
    /// - `InProcessBackend`: accept or reject connection attempts here
    #[must_use]
    pub fn new_pair() -> (Self, InProcessBackend) {
        Self::new_pair_with_capacity(DEFAULT_CAPACITY)
    }

    /// Create with custom channel capacity
    #[must_use]
    pub fn new_pair_with_capacity(capacity: usize) -> (Self, InProcessBackend) {
        let (requests_tx, requests_rx) = mpsc::unbounded_channel();
        let attempts = Arc::new(AtomicUsize::new(0));

        let connector = Self {
            requests: requests_tx,
            attempts: Arc::clone(&attempts),
            capacity: capacity.max(1),
        };
        let backend = InProcessBackend {
            requests: requests_rx,
            attempts,
        };

        (connector, backend)
    }
}

#[async_trait]
impl Connector for InProcessConnector {
    async fn connect(&self, endpoint: &Endpoint) -> Result<TransportLink, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let (reply_tx, reply_rx) = oneshot::channel();
        let pending = PendingConnection {
            endpoint: endpoint.clone(),
            capacity: self.capacity,
            reply: reply_tx,
        };

        self.requests
            .send(pending)
            .map_err(|_| TransportError::ConnectionFailed("Backend is gone".to_string()))?;

        match reply_rx.await {
            Ok(Ok(link)) => Ok(link),
            Ok(Err(reason)) => Err(TransportError::ConnectionFailed(reason)),
            Err(_) => Err(TransportError::ConnectionFailed(
                "Connection attempt dropped".to_string(),
            )),
        }
    }
}

impl InProcessBackend {
    /// Wait for the next connection attempt
    ///
    /// Returns `None` once the connector has been dropped.
    pub async fn next_request(&mut self) -> Option<PendingConnection> {
        self.requests.recv().await
    }

    /// Take a connection attempt that is already waiting, if any
    pub fn try_next_request(&mut self) -> Option<PendingConnection> {
        self.requests.try_recv().ok()
    }

    /// Wait for the next connection attempt and accept it
    pub async fn accept_next(&mut self) -> Option<PeerConnection> {
        Some(self.next_request().await?.accept())
    }

    /// Number of connection attempts made so far
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

/// A connection attempt waiting for the backend's answer
///
/// Dropping it without answering fails the attempt.
pub struct PendingConnection {
    endpoint: Endpoint,
    capacity: usize,
    reply: oneshot::Sender<Result<TransportLink, String>>,
}

impl PendingConnection {
    /// Endpoint the client asked for
    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Complete the handshake
    #[must_use]
    pub fn accept(self) -> PeerConnection {
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::channel(self.capacity);
        let open = Arc::new(AtomicBool::new(true));

        let link = TransportLink {
            sender: TransportSender::new(frames_tx, Arc::clone(&open)),
            events: events_rx,
        };

        // A client that gave up still gets a (dead) peer back
        let _ = self.reply.send(Ok(link));

        PeerConnection {
            frames: frames_rx,
            events: events_tx,
            open,
        }
    }

    /// Refuse the handshake
    pub fn reject(self, reason: impl Into<String>) {
        let _ = self.reply.send(Err(reason.into()));
    }
}

/// Backend end of an accepted in-process connection
pub struct PeerConnection {
    frames: mpsc::UnboundedReceiver<OutboundFrame>,
    events: mpsc::Sender<TransportEvent>,
    open: Arc<AtomicBool>,
}

impl PeerConnection {
    /// Push a text frame to the client
    ///
    /// # Errors
    ///
    /// Fails when the client side has gone away.
    pub async fn push(&self, text: impl Into<String>) -> Result<(), TransportError> {
        self.events
            .send(TransportEvent::Message(text.into()))
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }

    /// Report a transport error to the client without closing
    ///
    /// # Errors
    ///
    /// Fails when the client side has gone away.
    pub async fn push_error(&self, error: impl Into<String>) -> Result<(), TransportError> {
        self.events
            .send(TransportEvent::Error(error.into()))
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }

    /// Next text frame from the client
    ///
    /// Returns `None` when the client closed the connection or dropped its
    /// sender.
    pub async fn recv_text(&mut self) -> Option<String> {
        match self.frames.recv().await? {
            OutboundFrame::Text(text) => Some(text),
            OutboundFrame::Close => {
                self.open.store(false, Ordering::SeqCst);
                None
            }
        }
    }

    /// Next text frame if one is already queued
    pub fn try_recv_text(&mut self) -> Option<String> {
        match self.frames.try_recv().ok()? {
            OutboundFrame::Text(text) => Some(text),
            OutboundFrame::Close => {
                self.open.store(false, Ordering::SeqCst);
                None
            }
        }
    }

    /// Whether the client still considers the connection open
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Close from the backend side, optionally with a reason
    pub async fn close(self, reason: Option<String>) {
        self.open.store(false, Ordering::SeqCst);
        let _ = self.events.send(TransportEvent::Closed { reason }).await;
    }
}
