//! Diagnostic State
//!
//! The demultiplexer and the state it maintains. Each inbound frame is
//! applied exactly once, in arrival order, and lands in exactly one sink:
//!
//! | Event                 | Sink                         |
//! |-----------------------|------------------------------|
//! | `diagnostics.loading` | busy flag                    |
//! | `llm.thinking`        | thinking accumulator         |
//! | everything else       | log (append-only)            |
//!
//! Surfaces only ever see this state through clones handed out by the
//! session controller; the controller's reader task is the only writer.

use chrono::{DateTime, Utc};

use crate::events::{InboundMessage, ServerEvent};
use crate::prompt::TestPrompt;

/// One entry of the conversation log
#[derive(Clone, Debug, PartialEq)]
pub struct LogEntry {
    /// Position in the log, starting at 0
    pub seq: u64,
    /// When the frame was applied
    pub received_at: DateTime<Utc>,
    /// Issue the backend attached to the envelope, if any
    pub issue_id: Option<String>,
    /// The event as parsed
    pub event: ServerEvent,
}

/// Where an applied frame went
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Routed {
    /// Appended to the log at this position
    Logged {
        /// Position of the new entry
        seq: u64,
    },
    /// Appended to the thinking accumulator
    Thinking,
    /// Updated the busy flag to this value
    Busy(bool),
}

/// Application state derived from the backend's event stream
#[derive(Clone, Debug, Default)]
pub struct DiagnosticState {
    log: Vec<LogEntry>,
    thinking: String,
    busy: bool,
    pending_test: Option<TestPrompt>,
    issue_id: Option<String>,
}

impl DiagnosticState {
    /// Create empty state
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Demultiplex one raw inbound frame
    pub fn apply(&mut self, raw: &str) -> Routed {
        let InboundMessage { event, issue_id } = InboundMessage::parse(raw);

        match event {
            ServerEvent::Loading { status } => {
                self.busy = status == "started";
                Routed::Busy(self.busy)
            }
            ServerEvent::Thinking { text } => {
                self.thinking.push_str(&text);
                Routed::Thinking
            }
            event => {
                match &event {
                    ServerEvent::IssueCreated { issue_id, .. } => {
                        self.issue_id = Some(issue_id.clone());
                    }
                    ServerEvent::Test(prompt) => {
                        self.pending_test = Some(prompt.clone());
                    }
                    _ => {}
                }
                Routed::Logged {
                    seq: self.append(event, issue_id),
                }
            }
        }
    }

    fn append(&mut self, event: ServerEvent, issue_id: Option<String>) -> u64 {
        let seq = self.log.len() as u64;
        self.log.push(LogEntry {
            seq,
            received_at: Utc::now(),
            issue_id,
            event,
        });
        seq
    }

    /// The full conversation log, oldest first
    #[must_use]
    pub fn log(&self) -> &[LogEntry] {
        &self.log
    }

    /// Log entries at or after `seq`
    #[must_use]
    pub fn entries_since(&self, seq: u64) -> &[LogEntry] {
        let start = usize::try_from(seq).map_or(self.log.len(), |s| s.min(self.log.len()));
        &self.log[start..]
    }

    /// Reasoning text accumulated since the last diagnostic run started
    #[must_use]
    pub fn thinking(&self) -> &str {
        &self.thinking
    }

    /// Whether the backend reported it is computing
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.busy
    }

    /// The most recent unanswered test prompt
    #[must_use]
    pub fn pending_test(&self) -> Option<&TestPrompt> {
        self.pending_test.as_ref()
    }

    /// Issue opened by the backend, if any
    #[must_use]
    pub fn current_issue(&self) -> Option<&str> {
        self.issue_id.as_deref()
    }

    /// Clear the thinking accumulator for a new diagnostic run
    pub fn reset_thinking(&mut self) {
        self.thinking.clear();
    }

    /// Drop the busy flag; no stop event can arrive once the transport is gone
    pub(crate) fn clear_busy(&mut self) {
        self.busy = false;
    }

    /// Forget the pending prompt once it has been answered
    pub(crate) fn mark_answered(&mut self, test_id: &str) {
        if self
            .pending_test
            .as_ref()
            .is_some_and(|prompt| prompt.test_id == test_id)
        {
            self.pending_test = None;
        }
    }
}
