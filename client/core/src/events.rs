//! Server Events
//!
//! Events pushed from the diagnostic backend to the client. Every inbound
//! frame is parsed into exactly one [`ServerEvent`]; nothing is ever dropped.
//!
//! # Envelope
//!
//! The backend wraps events as
//!
//! ```json
//! {"type": "communications.talk", "v": 1, "issue_id": "...", "payload": {...}, "meta": {...}}
//! ```
//!
//! Only `type` is required. Older backend paths put the fields at the top
//! level instead of inside `payload` (for example `issue.create_rejected`
//! carries `reason` directly); when `payload` is absent the remaining
//! top-level fields are treated as the payload.
//!
//! Frames that are not a JSON object with a string `type` become
//! [`ServerEvent::Raw`]. Frames with an unknown type, or a known type whose
//! payload does not have the expected shape, become [`ServerEvent::Other`]
//! with the original type and payload kept verbatim.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::prompt::TestPrompt;

/// Envelope fields that are never part of the payload
const ENVELOPE_KEYS: &[&str] = &["v", "meta", "id", "ts", "source"];

/// Events from backend to client
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ServerEvent {
    /// A message to show (and optionally speak) to the user
    Talk {
        /// The message text
        message: String,
    },

    /// A new diagnostic case was opened
    IssueCreated {
        /// Backend identifier of the issue
        issue_id: String,
        /// Confirmation text
        message: String,
    },

    /// The backend refused to open a case (one is already active)
    IssueCreateRejected {
        /// Machine-readable reason, e.g. `active_issue_exists`
        reason: String,
    },

    /// Backend started or stopped computing
    Loading {
        /// `"started"` while busy, anything else when done
        status: String,
    },

    /// An incremental fragment of the model's reasoning
    Thinking {
        /// The fragment; may be empty
        text: String,
    },

    /// A test the user is asked to run
    Test(TestPrompt),

    /// A well-formed envelope the client has no typed form for
    Other {
        /// The `type` tag as received
        event_type: String,
        /// The payload as received
        payload: Value,
    },

    /// A frame that was not a valid envelope, kept verbatim
    Raw(String),
}

impl ServerEvent {
    /// Wire name of this event
    ///
    /// [`ServerEvent::Raw`] reports `"raw"`; [`ServerEvent::Other`] reports
    /// the type it arrived with.
    #[must_use]
    pub fn event_type(&self) -> &str {
        match self {
            Self::Talk { .. } => "communications.talk",
            Self::IssueCreated { .. } => "issue.created",
            Self::IssueCreateRejected { .. } => "issue.create_rejected",
            Self::Loading { .. } => "diagnostics.loading",
            Self::Thinking { .. } => "llm.thinking",
            Self::Test(_) => "diagnostics.test",
            Self::Other { event_type, .. } => event_type,
            Self::Raw(_) => "raw",
        }
    }

    /// Whether the event only drives transient UI state
    ///
    /// Transient events update the busy flag or the thinking buffer and are
    /// never appended to the log.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Loading { .. } | Self::Thinking { .. })
    }
}

/// A parsed inbound frame
#[derive(Clone, Debug, PartialEq)]
pub struct InboundMessage {
    /// The event
    pub event: ServerEvent,
    /// Issue the backend attached to the envelope, if any
    pub issue_id: Option<String>,
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    payload: Option<Value>,
    #[serde(default)]
    issue_id: Option<Value>,
    #[serde(flatten)]
    rest: Map<String, Value>,
}

#[derive(Deserialize)]
struct TalkPayload {
    message: String,
}

#[derive(Deserialize)]
struct IssueCreatedPayload {
    issue_id: String,
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct RejectedPayload {
    #[serde(default)]
    reason: String,
}

impl InboundMessage {
    /// Parse one inbound frame
    ///
    /// Never fails: anything that is not an envelope becomes
    /// [`ServerEvent::Raw`].
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let Ok(envelope) = serde_json::from_str::<Envelope>(raw) else {
            return Self {
                event: ServerEvent::Raw(raw.to_string()),
                issue_id: None,
            };
        };

        let issue_id = envelope
            .issue_id
            .as_ref()
            .and_then(Value::as_str)
            .map(str::to_string);

        let payload = envelope.payload.unwrap_or_else(|| {
            let mut rest = envelope.rest;
            rest.retain(|key, _| !ENVELOPE_KEYS.contains(&key.as_str()));
            if rest.is_empty() {
                Value::Null
            } else {
                Value::Object(rest)
            }
        });

        let event = typed_event(&envelope.event_type, &payload).unwrap_or(ServerEvent::Other {
            event_type: envelope.event_type,
            payload,
        });

        Self { event, issue_id }
    }
}

/// Build the typed variant for a known event type
fn typed_event(event_type: &str, payload: &Value) -> Option<ServerEvent> {
    match event_type {
        "communications.talk" => TalkPayload::deserialize(payload)
            .ok()
            .map(|p| ServerEvent::Talk { message: p.message }),
        "issue.created" => IssueCreatedPayload::deserialize(payload)
            .ok()
            .map(|p| ServerEvent::IssueCreated {
                issue_id: p.issue_id,
                message: p.message,
            }),
        "issue.create_rejected" => RejectedPayload::deserialize(payload)
            .ok()
            .map(|p| ServerEvent::IssueCreateRejected { reason: p.reason }),
        "diagnostics.loading" => Some(ServerEvent::Loading {
            status: string_field(payload, "status"),
        }),
        "llm.thinking" => Some(ServerEvent::Thinking {
            text: string_field(payload, "text"),
        }),
        "diagnostics.test" => TestPrompt::from_payload(payload).map(ServerEvent::Test),
        _ => None,
    }
}

/// A string field of the payload, empty when absent or not a string
fn string_field(payload: &Value, key: &str) -> String {
    payload
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}
