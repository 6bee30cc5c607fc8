//! Client Commands
//!
//! Commands sent from the client to the diagnostic backend. Every command is
//! one JSON text frame of the form `{"type": "...", "payload": {...}}`;
//! commands without a payload omit the field entirely.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Commands from client to backend
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ClientCommand {
    /// Start (or restart) a diagnostic run; the backend greets the user
    #[serde(rename = "diagnostics.start")]
    StartDiagnostics,

    /// Describe the issue the user is having
    #[serde(rename = "issue.begin")]
    BeginIssue(IssueDescription),

    /// Answer to a `diagnostics.test` prompt
    #[serde(rename = "diagnostics.test_result")]
    TestResult {
        /// Identifier of the test being answered
        test_id: String,
        /// Coerced answer value
        result: Value,
    },
}

impl ClientCommand {
    /// Wire name of this command
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::StartDiagnostics => "diagnostics.start",
            Self::BeginIssue(_) => "issue.begin",
            Self::TestResult { .. } => "diagnostics.test_result",
        }
    }

    /// Encode as a JSON text frame
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be serialized.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// The fixed envelope the backend expects for a user's issue description
///
/// It mirrors the shape of a diagnostic test record so the backend can treat
/// the description as the first "test result" of the run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IssueDescription {
    /// Always `issue_description`
    pub id: String,
    /// Always `Issue Description`
    pub name: String,
    /// Fixed human-readable description of the record
    pub description: String,
    /// Always empty
    pub rationale: String,
    /// Always an empty object
    pub outcomes: Map<String, Value>,
    /// The user's own words
    pub result: String,
}

impl IssueDescription {
    /// Wrap the user's description in the fixed envelope
    pub fn from_user(description: impl Into<String>) -> Self {
        Self {
            id: "issue_description".to_string(),
            name: "Issue Description".to_string(),
            description: "Initial description provided by the user".to_string(),
            rationale: String::new(),
            outcomes: Map::new(),
            result: description.into(),
        }
    }
}
