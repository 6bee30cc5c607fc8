//! WebSocket Transport
//!
//! Connects to the diagnostic backend over WebSocket. After the handshake
//! the stream is split into a reader task and a writer task:
//!
//! ```text
//! TransportSender ──► writer task ──► ws sink
//! ws stream ──► reader task ──► TransportEvent channel
//! ```
//!
//! Text frames are forwarded as-is; binary frames are decoded as lossy
//! UTF-8. Ping/pong is handled by tungstenite. The reader always finishes
//! with exactly one [`TransportEvent::Closed`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use super::config::Endpoint;
use super::traits::{
    Connector, OutboundFrame, TransportError, TransportEvent, TransportLink, TransportSender,
};

/// Opens WebSocket connections to the backend
#[derive(Clone, Debug)]
pub struct WebSocketConnector {
    inbound_capacity: usize,
}

impl Default for WebSocketConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl WebSocketConnector {
    /// Create a connector with the default inbound capacity
    #[must_use]
    pub fn new() -> Self {
        Self {
            inbound_capacity: 100,
        }
    }

    /// Create a connector with a custom inbound channel capacity
    #[must_use]
    pub fn with_capacity(inbound_capacity: usize) -> Self {
        Self {
            inbound_capacity: inbound_capacity.max(1),
        }
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, endpoint: &Endpoint) -> Result<TransportLink, TransportError> {
        let (stream, _response) = tokio_tungstenite::connect_async(endpoint.url())
            .await
            .map_err(|e| {
                TransportError::ConnectionFailed(format!("Failed to connect to {endpoint}: {e}"))
            })?;

        let (mut write, mut read) = stream.split();

        let (frames_tx, mut frames_rx) = mpsc::unbounded_channel::<OutboundFrame>();
        let (events_tx, events_rx) = mpsc::channel::<TransportEvent>(self.inbound_capacity);
        let open = Arc::new(AtomicBool::new(true));

        // Write task: frames_rx -> ws sink
        let open_write = Arc::clone(&open);
        tokio::spawn(async move {
            while let Some(frame) = frames_rx.recv().await {
                match frame {
                    OutboundFrame::Text(text) => {
                        if let Err(e) = write.send(Message::Text(text)).await {
                            tracing::warn!(error = %e, "WebSocket write error");
                            break;
                        }
                    }
                    OutboundFrame::Close => {
                        if let Err(e) = write.close().await {
                            tracing::debug!(error = %e, "WebSocket close error");
                        }
                        break;
                    }
                }
            }
            open_write.store(false, Ordering::SeqCst);
        });

        // Read task: ws stream -> events_tx
        let open_read = Arc::clone(&open);
        tokio::spawn(async move {
            let mut reason = None;

            while let Some(result) = read.next().await {
                let text = match result {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Binary(bytes)) => String::from_utf8_lossy(&bytes).into_owned(),
                    Ok(Message::Close(frame)) => {
                        reason = frame
                            .map(|f| f.reason.into_owned())
                            .filter(|r| !r.is_empty());
                        break;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        tracing::warn!(error = %e, "WebSocket read error");
                        let _ = events_tx.send(TransportEvent::Error(e.to_string())).await;
                        break;
                    }
                };

                if events_tx.send(TransportEvent::Message(text)).await.is_err() {
                    tracing::debug!("Event receiver dropped");
                    break;
                }
            }

            open_read.store(false, Ordering::SeqCst);
            let _ = events_tx.send(TransportEvent::Closed { reason }).await;
            tracing::debug!("WebSocket reader finished");
        });

        tracing::info!(url = %endpoint, "Connected to diagnostic backend");

        Ok(TransportLink {
            sender: TransportSender::new(frames_tx, open),
            events: events_rx,
        })
    }
}
