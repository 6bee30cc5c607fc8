//! Session Controller
//!
//! Owns zero-or-one live connection to the diagnostic backend, opens one
//! lazily when a command needs it, and feeds every inbound frame through
//! [`DiagnosticState::apply`].
//!
//! # State Machine
//!
//! ```text
//! Uninitialized ──► Opening ──► Open ──► Closed
//!                      │                   │
//!                      └──────► Closed ◄───┘
//!                                  │
//!                                  └──► Opening (next command)
//! ```
//!
//! There is no automatic reconnection: the next command after a close opens
//! a fresh connection.
//!
//! # Single-flight open
//!
//! The open is driven by one spawned task whose outcome is shared by every
//! caller through a [`Shared`] future. Commands issued while the open is in
//! flight go into an outbox owned by the pending session; the outbox is
//! flushed in call order, under the session lock, before the session is
//! published as open. Send order therefore always equals call order.
//!
//! # Generations
//!
//! Each open gets a fresh generation number. Frames and close notifications
//! from a connection whose generation is no longer current are ignored, so
//! a late close from an old connection never tears down a newer one.
//!
//! Locks are never held across `.await`. When both are needed, the slot lock
//! is always taken before the state lock.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::AbortHandle;
use uuid::Uuid;

use crate::commands::{ClientCommand, IssueDescription};
use crate::prompt::TestPrompt;
use crate::state::DiagnosticState;
use crate::transport::{
    Connector, TransportConfig, TransportError, TransportEvent, TransportLink, TransportSender,
};

/// Outcome of an open attempt, shared by every waiter
type PendingOpen = Shared<BoxFuture<'static, Result<TransportSender, OpenError>>>;

/// Session identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    /// Generate a new unique session ID
    #[must_use]
    pub fn new() -> Self {
        Self(format!("session_{}", Uuid::new_v4().simple()))
    }

    /// The identifier as a string
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Session state
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// No connection has been attempted yet
    #[default]
    Uninitialized,
    /// A connection is being established
    Opening,
    /// The connection completed its handshake
    Open,
    /// The last connection closed or failed to open
    Closed,
}

impl SessionState {
    /// Short lowercase label
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Opening => "opening",
            Self::Open => "open",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Why a session could not be opened
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum OpenError {
    /// The connector reported an error
    #[error("Failed to open session: {0}")]
    Failed(String),

    /// The handshake did not complete in time
    #[error("Timed out opening session after {0:?}")]
    TimedOut(Duration),

    /// The attempt was abandoned by `close()`
    #[error("Session open was cancelled")]
    Cancelled,
}

impl From<TransportError> for OpenError {
    fn from(e: TransportError) -> Self {
        Self::Failed(e.to_string())
    }
}

/// What the controller currently holds
enum Slot {
    Idle,
    Opening {
        generation: u64,
        session_id: SessionId,
        outbox: Vec<ClientCommand>,
        pending: PendingOpen,
        abort: AbortHandle,
    },
    Open {
        generation: u64,
        session_id: SessionId,
        sender: TransportSender,
    },
}

struct Inner {
    connector: Arc<dyn Connector>,
    config: TransportConfig,
    slot: Mutex<Slot>,
    generation: AtomicU64,
    state_tx: watch::Sender<SessionState>,
    view: Mutex<DiagnosticState>,
    revision: watch::Sender<u64>,
}

/// Drives the session with the diagnostic backend
///
/// Cheap to clone; all clones share one session.
#[derive(Clone)]
pub struct SessionController {
    inner: Arc<Inner>,
}

impl fmt::Debug for SessionController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionController")
            .field("endpoint", &self.inner.config.endpoint)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl SessionController {
    /// Create a controller; no connection is opened until a command needs one
    pub fn new(connector: impl Connector, config: TransportConfig) -> Self {
        Self::with_connector(Arc::new(connector), config)
    }

    /// Create a controller sharing an existing connector
    #[must_use]
    pub fn with_connector(connector: Arc<dyn Connector>, config: TransportConfig) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Uninitialized);
        let (revision, _) = watch::channel(0);

        Self {
            inner: Arc::new(Inner {
                connector,
                config,
                slot: Mutex::new(Slot::Idle),
                generation: AtomicU64::new(0),
                state_tx,
                view: Mutex::new(DiagnosticState::new()),
                revision,
            }),
        }
    }

    /// Describe the user's issue
    ///
    /// Blank descriptions are ignored. When the description goes out on a
    /// newly opened connection that has no `diagnostics.start` queued,
    /// `diagnostics.start` is sent first. The description is sent as given,
    /// without trimming.
    pub async fn begin_issue(&self, description: &str) {
        if description.trim().is_empty() {
            tracing::debug!("Ignoring blank issue description");
            return;
        }

        let description = description.to_string();
        let pending = self.inner.dispatch(move |fresh| {
            let begin = ClientCommand::BeginIssue(IssueDescription::from_user(description));
            if fresh {
                vec![ClientCommand::StartDiagnostics, begin]
            } else {
                vec![begin]
            }
        });
        settle(pending).await;
    }

    /// Start (or restart) a diagnostic run
    pub async fn start_diagnostics(&self) {
        let pending = self
            .inner
            .dispatch(|_| vec![ClientCommand::StartDiagnostics]);
        settle(pending).await;
    }

    /// Send the answer to a test prompt
    ///
    /// A blank `test_id` is ignored.
    pub async fn submit_test_result(&self, test_id: &str, result: Value) {
        if test_id.trim().is_empty() {
            tracing::debug!("Ignoring test result without a test id");
            return;
        }

        let test_id = test_id.to_string();
        let pending = self
            .inner
            .dispatch(move |_| vec![ClientCommand::TestResult { test_id, result }]);
        settle(pending).await;
    }

    /// Coerce a raw form value for `prompt` and submit it
    pub async fn submit_answer(&self, prompt: &TestPrompt, raw: &str) {
        self.submit_test_result(&prompt.test_id, prompt.coerce(raw))
            .await;
    }

    /// Make sure a connection is open, opening one if needed
    ///
    /// Concurrent callers share a single attempt and all receive its
    /// outcome.
    ///
    /// # Errors
    ///
    /// Returns the shared [`OpenError`] when the attempt fails, times out, or
    /// is cancelled by [`SessionController::close`].
    pub async fn ensure_open(&self) -> Result<TransportSender, OpenError> {
        let pending = {
            let mut slot = self.inner.slot.lock();
            match &*slot {
                Slot::Open { sender, .. } if sender.is_open() => return Ok(sender.clone()),
                Slot::Opening { pending, .. } => pending.clone(),
                _ => self.inner.begin_opening(&mut slot, Vec::new()),
            }
        };
        pending.await
    }

    /// Close the session
    ///
    /// Safe in any state. An open in flight is abandoned and its queued
    /// commands are dropped.
    pub fn close(&self) {
        let mut slot = self.inner.slot.lock();
        match std::mem::replace(&mut *slot, Slot::Idle) {
            Slot::Idle => {
                tracing::debug!("Close requested with no session");
                return;
            }
            Slot::Opening {
                generation,
                session_id,
                outbox,
                abort,
                ..
            } => {
                abort.abort();
                if !outbox.is_empty() {
                    tracing::warn!(
                        session_id = %session_id,
                        dropped = outbox.len(),
                        "Dropping commands queued for a cancelled session"
                    );
                }
                tracing::info!(session_id = %session_id, generation, "Cancelled session open");
            }
            Slot::Open {
                generation,
                session_id,
                sender,
            } => {
                sender.close();
                tracing::info!(session_id = %session_id, generation, "Closed session");
            }
        }

        self.inner.view.lock().clear_busy();
        self.inner.state_tx.send_replace(SessionState::Closed);
        drop(slot);
        self.inner.bump();
    }

    /// Current session state
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.inner.state_tx.borrow()
    }

    /// Whether a connection is open and usable
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(&*self.inner.slot.lock(), Slot::Open { sender, .. } if sender.is_open())
    }

    /// Identifier of the session being opened or open, if any
    #[must_use]
    pub fn session_id(&self) -> Option<SessionId> {
        match &*self.inner.slot.lock() {
            Slot::Idle => None,
            Slot::Opening { session_id, .. } | Slot::Open { session_id, .. } => {
                Some(session_id.clone())
            }
        }
    }

    /// A copy of the diagnostic state
    #[must_use]
    pub fn snapshot(&self) -> DiagnosticState {
        self.inner.view.lock().clone()
    }

    /// Read the diagnostic state without copying it
    pub fn with_state<R>(&self, f: impl FnOnce(&DiagnosticState) -> R) -> R {
        f(&self.inner.view.lock())
    }

    /// Watch session state transitions
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.inner.state_tx.subscribe()
    }

    /// Watch a revision counter bumped whenever the diagnostic state changes
    #[must_use]
    pub fn subscribe_updates(&self) -> watch::Receiver<u64> {
        self.inner.revision.subscribe()
    }
}

/// Wait for the open a command was queued behind, if any
async fn settle(pending: Option<PendingOpen>) {
    if let Some(pending) = pending {
        if let Err(e) = pending.await {
            tracing::debug!(error = %e, "Queued commands were not delivered");
        }
    }
}

impl Inner {
    /// Send, queue, or open-then-send the commands built by `build`
    ///
    /// `build` receives `true` when the commands will be the first on a new
    /// connection that has no `diagnostics.start` queued yet.
    fn dispatch(
        self: &Arc<Self>,
        build: impl FnOnce(bool) -> Vec<ClientCommand>,
    ) -> Option<PendingOpen> {
        let mut slot = self.slot.lock();
        match &mut *slot {
            Slot::Open {
                sender, session_id, ..
            } if sender.is_open() => {
                let commands = build(false);
                self.note_dispatched(&commands);
                for command in &commands {
                    match sender.send(command) {
                        Ok(()) => {
                            tracing::debug!(session_id = %session_id, command = command.kind(), "Sent command");
                        }
                        Err(e) => {
                            tracing::warn!(
                                session_id = %session_id,
                                command = command.kind(),
                                error = %e,
                                "Failed to send command"
                            );
                        }
                    }
                }
                None
            }
            Slot::Opening {
                outbox, pending, ..
            } => {
                // The new connection has not been greeted yet
                let fresh = !outbox
                    .iter()
                    .any(|command| matches!(command, ClientCommand::StartDiagnostics));
                let commands = build(fresh);
                self.note_dispatched(&commands);
                outbox.extend(commands);
                Some(pending.clone())
            }
            _ => {
                let commands = build(true);
                self.note_dispatched(&commands);
                Some(self.begin_opening(&mut slot, commands))
            }
        }
    }

    /// Local state effects of commands leaving the client
    fn note_dispatched(&self, commands: &[ClientCommand]) {
        let mut changed = false;
        {
            let mut view = self.view.lock();
            for command in commands {
                match command {
                    ClientCommand::StartDiagnostics => {
                        view.reset_thinking();
                        changed = true;
                    }
                    ClientCommand::TestResult { test_id, .. } => {
                        view.mark_answered(test_id);
                        changed = true;
                    }
                    ClientCommand::BeginIssue(_) => {}
                }
            }
        }
        if changed {
            self.bump();
        }
    }

    /// Start a new open attempt with `outbox` queued behind it
    ///
    /// Must be called with the slot lock held.
    fn begin_opening(self: &Arc<Self>, slot: &mut Slot, outbox: Vec<ClientCommand>) -> PendingOpen {
        if let Slot::Open { sender, .. } = &*slot {
            sender.close();
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let session_id = SessionId::new();

        let (done_tx, done_rx) = oneshot::channel();
        let task = tokio::spawn(run_open(Arc::clone(self), generation, done_tx));

        let pending: PendingOpen = done_rx
            .map(|outcome| outcome.unwrap_or(Err(OpenError::Cancelled)))
            .boxed()
            .shared();

        tracing::info!(
            session_id = %session_id,
            generation,
            url = %self.config.endpoint,
            queued = outbox.len(),
            "Opening session"
        );

        *slot = Slot::Opening {
            generation,
            session_id,
            outbox,
            pending: pending.clone(),
            abort: task.abort_handle(),
        };
        self.state_tx.send_replace(SessionState::Opening);

        pending
    }

    /// Publish a freshly opened link, flushing the outbox first
    fn install(
        self: &Arc<Self>,
        generation: u64,
        link: TransportLink,
    ) -> Result<TransportSender, OpenError> {
        let TransportLink { sender, events } = link;
        let mut slot = self.slot.lock();

        let (session_id, outbox) = match std::mem::replace(&mut *slot, Slot::Idle) {
            Slot::Opening {
                generation: current,
                session_id,
                outbox,
                ..
            } if current == generation => (session_id, outbox),
            other => {
                *slot = other;
                drop(slot);
                sender.close();
                tracing::debug!(generation, "Discarding connection for a superseded open");
                return Err(OpenError::Cancelled);
            }
        };

        for command in &outbox {
            if let Err(e) = sender.send(command) {
                tracing::warn!(
                    session_id = %session_id,
                    command = command.kind(),
                    error = %e,
                    "Failed to flush queued command"
                );
            }
        }

        tracing::info!(
            session_id = %session_id,
            generation,
            flushed = outbox.len(),
            "Session open"
        );

        *slot = Slot::Open {
            generation,
            session_id,
            sender: sender.clone(),
        };
        self.state_tx.send_replace(SessionState::Open);
        drop(slot);

        tokio::spawn(read_loop(Arc::clone(self), generation, events));
        Ok(sender)
    }

    /// Give up on a failed open
    fn abandon(&self, generation: u64, error: &OpenError) {
        let mut slot = self.slot.lock();
        match &*slot {
            Slot::Opening {
                generation: current,
                session_id,
                outbox,
                ..
            } if *current == generation => {
                tracing::warn!(
                    session_id = %session_id,
                    generation,
                    dropped = outbox.len(),
                    error = %error,
                    "Failed to open session"
                );
                *slot = Slot::Idle;
                self.state_tx.send_replace(SessionState::Closed);
            }
            _ => {
                tracing::debug!(generation, error = %error, "Superseded open failed");
            }
        }
    }

    /// Apply one inbound frame if its connection is still current
    fn deliver(&self, generation: u64, text: &str) -> bool {
        let slot = self.slot.lock();
        if !is_current(&slot, generation) {
            return false;
        }
        let routed = self.view.lock().apply(text);
        drop(slot);

        tracing::debug!(generation, ?routed, "Routed inbound frame");
        self.bump();
        true
    }

    /// The connection with this generation is gone
    fn handle_closed(&self, generation: u64, reason: Option<&str>) {
        let mut slot = self.slot.lock();
        if !is_current(&slot, generation) {
            tracing::debug!(generation, "Ignoring close of a superseded connection");
            return;
        }

        *slot = Slot::Idle;
        self.view.lock().clear_busy();
        self.state_tx.send_replace(SessionState::Closed);
        drop(slot);

        tracing::info!(generation, reason = ?reason, "Session closed by transport");
        self.bump();
    }

    fn bump(&self) {
        self.revision.send_modify(|revision| *revision += 1);
    }
}

fn is_current(slot: &Slot, generation: u64) -> bool {
    matches!(slot, Slot::Open { generation: current, .. } if *current == generation)
}

/// Drive one open attempt to completion
async fn run_open(
    inner: Arc<Inner>,
    generation: u64,
    done: oneshot::Sender<Result<TransportSender, OpenError>>,
) {
    let endpoint = inner.config.endpoint.clone();
    let connect = inner.connector.connect(&endpoint);

    let result = match inner.config.open_timeout() {
        Some(limit) => match tokio::time::timeout(limit, connect).await {
            Ok(result) => result.map_err(OpenError::from),
            Err(_) => Err(OpenError::TimedOut(limit)),
        },
        None => connect.await.map_err(OpenError::from),
    };

    let outcome = match result {
        Ok(link) => inner.install(generation, link),
        Err(e) => {
            inner.abandon(generation, &e);
            Err(e)
        }
    };

    let _ = done.send(outcome);
}

/// Feed a connection's events to the demultiplexer, in order, until it closes
async fn read_loop(
    inner: Arc<Inner>,
    generation: u64,
    mut events: mpsc::Receiver<TransportEvent>,
) {
    let mut reason = None;

    while let Some(event) = events.recv().await {
        match event {
            TransportEvent::Message(text) => {
                if !inner.deliver(generation, &text) {
                    tracing::debug!(generation, "Dropping frame from a superseded connection");
                    break;
                }
            }
            TransportEvent::Error(e) => {
                tracing::warn!(generation, error = %e, "Transport error");
            }
            TransportEvent::Closed { reason: why } => {
                reason = why;
                break;
            }
        }
    }

    inner.handle_closed(generation, reason.as_deref());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ServerEvent;
    use crate::transport::{InProcessBackend, InProcessConnector, PeerConnection};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn controller() -> (SessionController, InProcessBackend) {
        let (connector, backend) = InProcessConnector::new_pair();
        let config = TransportConfig::from_api_base("http://127.0.0.1:8000").unwrap();
        (SessionController::new(connector, config), backend)
    }

    fn command(frame: &str) -> ClientCommand {
        serde_json::from_str(frame).unwrap()
    }

    async fn wait_for_state(session: &SessionController, expected: SessionState) {
        let mut rx = session.subscribe_state();
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| *s == expected))
            .await
            .expect("timed out waiting for session state")
            .unwrap();
    }

    async fn open(session: &SessionController, backend: &mut InProcessBackend) -> PeerConnection {
        let waiter = {
            let session = session.clone();
            tokio::spawn(async move { session.ensure_open().await })
        };
        let peer = backend.accept_next().await.unwrap();
        waiter.await.unwrap().unwrap();
        peer
    }

    #[tokio::test]
    async fn test_concurrent_ensure_open_creates_one_transport() {
        let (session, mut backend) = controller();

        let a = tokio::spawn({
            let session = session.clone();
            async move { session.ensure_open().await }
        });
        let b = tokio::spawn({
            let session = session.clone();
            async move { session.ensure_open().await }
        });

        let _peer = backend.accept_next().await.unwrap();

        assert!(a.await.unwrap().is_ok());
        assert!(b.await.unwrap().is_ok());
        assert_eq!(backend.attempts(), 1);
        assert_eq!(session.state(), SessionState::Open);
        assert!(session.is_active());
    }

    #[tokio::test]
    async fn test_blank_issue_sends_nothing() {
        let (session, mut backend) = controller();

        session.begin_issue("").await;
        session.begin_issue("   ").await;

        assert_eq!(backend.attempts(), 0);
        assert!(backend.try_next_request().is_none());
        assert_eq!(session.state(), SessionState::Uninitialized);
    }

    #[tokio::test]
    async fn test_begin_issue_on_fresh_session_starts_diagnostics_first() {
        let (session, mut backend) = controller();

        let task = tokio::spawn({
            let session = session.clone();
            async move { session.begin_issue("brake noise").await }
        });

        let mut peer = backend.accept_next().await.unwrap();
        task.await.unwrap();

        assert_eq!(
            command(&peer.recv_text().await.unwrap()),
            ClientCommand::StartDiagnostics
        );
        assert_eq!(
            command(&peer.recv_text().await.unwrap()),
            ClientCommand::BeginIssue(IssueDescription::from_user("brake noise"))
        );
        assert!(peer.try_recv_text().is_none());
    }

    #[tokio::test]
    async fn test_begin_issue_joining_an_open_in_flight_starts_diagnostics() {
        let (session, mut backend) = controller();

        let mut opening = tokio_test::task::spawn(session.ensure_open());
        tokio_test::assert_pending!(opening.poll());
        assert_eq!(session.state(), SessionState::Opening);

        let task = tokio::spawn({
            let session = session.clone();
            async move { session.begin_issue("brake noise").await }
        });

        let mut peer = backend.accept_next().await.unwrap();
        task.await.unwrap();
        assert!(opening.await.is_ok());

        assert_eq!(
            command(&peer.recv_text().await.unwrap()),
            ClientCommand::StartDiagnostics
        );
        assert_eq!(
            command(&peer.recv_text().await.unwrap()),
            ClientCommand::BeginIssue(IssueDescription::from_user("brake noise"))
        );
        assert!(peer.try_recv_text().is_none());
        assert_eq!(backend.attempts(), 1);
    }

    #[tokio::test]
    async fn test_begin_issue_on_open_session_sends_only_issue() {
        let (session, mut backend) = controller();
        let mut peer = open(&session, &mut backend).await;

        session.begin_issue("  squeal  ").await;

        assert_eq!(
            command(&peer.recv_text().await.unwrap()),
            ClientCommand::BeginIssue(IssueDescription::from_user("  squeal  "))
        );
        assert_eq!(backend.attempts(), 1);
    }

    #[tokio::test]
    async fn test_commands_while_opening_keep_call_order() {
        let (session, mut backend) = controller();

        // Each call queues on its first poll
        assert!(session.start_diagnostics().now_or_never().is_none());
        assert!(session
            .submit_test_result("t1", json!(1.5))
            .now_or_never()
            .is_none());
        assert!(session.begin_issue("rattle").now_or_never().is_none());
        assert_eq!(session.state(), SessionState::Opening);

        let mut peer = backend.accept_next().await.unwrap();
        wait_for_state(&session, SessionState::Open).await;
        session.start_diagnostics().await;

        let sent: Vec<ClientCommand> = [
            peer.recv_text().await,
            peer.recv_text().await,
            peer.recv_text().await,
            peer.recv_text().await,
        ]
        .into_iter()
        .map(|frame| command(&frame.unwrap()))
        .collect();

        assert_eq!(
            sent,
            vec![
                ClientCommand::StartDiagnostics,
                ClientCommand::TestResult {
                    test_id: "t1".to_string(),
                    result: json!(1.5)
                },
                ClientCommand::BeginIssue(IssueDescription::from_user("rattle")),
                ClientCommand::StartDiagnostics,
            ]
        );
        assert_eq!(backend.attempts(), 1);
    }

    #[tokio::test]
    async fn test_close_while_opening_then_reopen() {
        let (session, mut backend) = controller();

        let mut waiter = tokio_test::task::spawn(session.ensure_open());
        tokio_test::assert_pending!(waiter.poll());
        assert!(session.submit_test_result("t1", json!("x")).now_or_never().is_none());

        let stale = backend.next_request().await.unwrap();
        session.close();

        assert_eq!(session.state(), SessionState::Closed);
        assert!(matches!(waiter.await, Err(OpenError::Cancelled)));

        // The abandoned handshake completing late changes nothing
        let _stale_peer = stale.accept();
        assert_eq!(session.state(), SessionState::Closed);

        let task = tokio::spawn({
            let session = session.clone();
            async move { session.start_diagnostics().await }
        });
        let mut peer = backend.accept_next().await.unwrap();
        task.await.unwrap();

        assert_eq!(
            command(&peer.recv_text().await.unwrap()),
            ClientCommand::StartDiagnostics
        );
        assert!(peer.try_recv_text().is_none());
        assert_eq!(backend.attempts(), 2);
        assert_eq!(session.state(), SessionState::Open);
    }

    #[tokio::test]
    async fn test_open_timeout_closes_session() {
        let (connector, _backend) = InProcessConnector::new_pair();
        let config = TransportConfig::from_api_base("http://127.0.0.1:8000")
            .unwrap()
            .with_open_timeout(Some(Duration::from_millis(50)));
        let session = SessionController::new(connector, config);

        let result = session.ensure_open().await;

        assert!(matches!(result, Err(OpenError::TimedOut(d)) if d == Duration::from_millis(50)));
        assert_eq!(session.state(), SessionState::Closed);
        assert!(!session.is_active());
    }

    #[tokio::test]
    async fn test_failed_open_is_shared_and_leaves_session_closed() {
        let (session, mut backend) = controller();

        let a = tokio::spawn({
            let session = session.clone();
            async move { session.ensure_open().await }
        });
        let b = tokio::spawn({
            let session = session.clone();
            async move { session.ensure_open().await }
        });

        backend.next_request().await.unwrap().reject("refused");

        let a = a.await.unwrap();
        let b = b.await.unwrap();
        assert!(matches!(a, Err(OpenError::Failed(_))));
        assert!(matches!(b, Err(OpenError::Failed(_))));
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(backend.attempts(), 1);
    }

    #[tokio::test]
    async fn test_inbound_frames_are_demultiplexed() {
        let (session, mut backend) = controller();
        let peer = open(&session, &mut backend).await;
        let mut updates = session.subscribe_updates();

        peer.push(r#"{"type":"diagnostics.loading","payload":{"status":"started"}}"#)
            .await
            .unwrap();
        peer.push(r#"{"type":"llm.thinking","payload":{"text":"He"}}"#)
            .await
            .unwrap();
        peer.push(r#"{"type":"llm.thinking","payload":{"text":"llo"}}"#)
            .await
            .unwrap();
        peer.push(r#"{"type":"communications.talk","payload":{"message":"Hi"}}"#)
            .await
            .unwrap();

        tokio::time::timeout(
            Duration::from_secs(5),
            updates.wait_for(|_| session.with_state(|s| s.log().len() == 1)),
        )
        .await
        .unwrap()
        .unwrap();

        let state = session.snapshot();
        assert!(state.is_busy());
        assert_eq!(state.thinking(), "Hello");
        assert_eq!(state.log()[0].event.event_type(), "communications.talk");
    }

    #[tokio::test]
    async fn test_peer_close_clears_busy_and_keeps_log() {
        let (session, mut backend) = controller();
        let peer = open(&session, &mut backend).await;

        peer.push(r#"{"type":"diagnostics.loading","payload":{"status":"started"}}"#)
            .await
            .unwrap();
        peer.push("plain text").await.unwrap();
        peer.close(Some("done".to_string())).await;

        wait_for_state(&session, SessionState::Closed).await;

        let state = session.snapshot();
        assert!(!state.is_busy());
        assert_eq!(state.log().len(), 1);
        assert!(!session.is_active());
        assert_eq!(session.session_id(), None);
    }

    #[tokio::test]
    async fn test_transport_error_does_not_end_the_session() {
        let (session, mut backend) = controller();
        let peer = open(&session, &mut backend).await;

        peer.push(r#"{"type":"diagnostics.loading","payload":{"status":"started"}}"#)
            .await
            .unwrap();
        peer.push(r#"{"type":"communications.talk","payload":{"message":"Hi"}}"#)
            .await
            .unwrap();
        peer.push_error("corrupt frame").await.unwrap();
        peer.push(r#"{"type":"communications.talk","payload":{"message":"Still here"}}"#)
            .await
            .unwrap();

        let mut updates = session.subscribe_updates();
        tokio::time::timeout(
            Duration::from_secs(5),
            updates.wait_for(|_| session.with_state(|s| s.log().len() == 2)),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(session.state(), SessionState::Open);

        peer.close(None).await;
        wait_for_state(&session, SessionState::Closed).await;

        let state = session.snapshot();
        assert!(!state.is_busy());
        assert_eq!(state.log().len(), 2);
        assert_eq!(
            state.log()[1].event,
            ServerEvent::Talk {
                message: "Still here".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_command_after_peer_close_opens_fresh_session() {
        let (session, mut backend) = controller();
        let first = open(&session, &mut backend).await;
        let first_id = session.session_id().unwrap();

        first.close(None).await;
        wait_for_state(&session, SessionState::Closed).await;

        let task = tokio::spawn({
            let session = session.clone();
            async move { session.begin_issue("engine light").await }
        });
        let mut second = backend.accept_next().await.unwrap();
        task.await.unwrap();

        assert_eq!(
            command(&second.recv_text().await.unwrap()),
            ClientCommand::StartDiagnostics
        );
        assert_ne!(session.session_id().unwrap(), first_id);
        assert_eq!(backend.attempts(), 2);
    }

    #[tokio::test]
    async fn test_superseded_connection_cannot_touch_new_session() {
        let (session, mut backend) = controller();
        let first = open(&session, &mut backend).await;

        session.close();
        let second = open(&session, &mut backend).await;

        // Late traffic from the first connection is ignored
        let _ = first
            .push(r#"{"type":"communications.talk","payload":{"message":"old"}}"#)
            .await;
        first.close(None).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(session.state(), SessionState::Open);
        assert!(session.snapshot().log().is_empty());

        second
            .push(r#"{"type":"communications.talk","payload":{"message":"new"}}"#)
            .await
            .unwrap();
        let mut updates = session.subscribe_updates();
        tokio::time::timeout(
            Duration::from_secs(5),
            updates.wait_for(|_| session.with_state(|s| !s.log().is_empty())),
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(
            session.snapshot().log()[0].event,
            ServerEvent::Talk {
                message: "new".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_start_resets_thinking_and_answer_clears_prompt() {
        let (session, mut backend) = controller();
        let mut peer = open(&session, &mut backend).await;

        peer.push(r#"{"type":"llm.thinking","payload":{"text":"old run"}}"#)
            .await
            .unwrap();
        peer.push(r#"{"type":"diagnostics.test","payload":{"test_id":"tp","test_text":"Pressure?","test_result_field_type":"number"}}"#)
            .await
            .unwrap();
        let mut updates = session.subscribe_updates();
        tokio::time::timeout(
            Duration::from_secs(5),
            updates.wait_for(|_| session.with_state(|s| s.pending_test().is_some())),
        )
        .await
        .unwrap()
        .unwrap();

        let prompt = session.snapshot().pending_test().cloned().unwrap();
        session.submit_answer(&prompt, "32").await;
        assert!(session.snapshot().pending_test().is_none());
        assert_eq!(
            command(&peer.recv_text().await.unwrap()),
            ClientCommand::TestResult {
                test_id: "tp".to_string(),
                result: json!(32.0)
            }
        );

        session.start_diagnostics().await;
        assert_eq!(session.snapshot().thinking(), "");
    }

    #[tokio::test]
    async fn test_blank_test_id_is_ignored() {
        let (session, backend) = controller();
        session.submit_test_result("  ", json!(true)).await;
        assert_eq!(backend.attempts(), 0);
    }

    #[tokio::test]
    async fn test_close_is_safe_in_any_state() {
        let (session, mut backend) = controller();

        session.close();
        assert_eq!(session.state(), SessionState::Uninitialized);

        let mut peer = open(&session, &mut backend).await;
        session.close();
        session.close();

        assert_eq!(session.state(), SessionState::Closed);
        assert!(peer.recv_text().await.is_none());
    }

    #[test]
    fn test_session_ids_are_unique() {
        let a = SessionId::new();
        let b = SessionId::new();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("session_"));
    }
}
