//! Test Prompts
//!
//! A `diagnostics.test` event asks the user to perform a check on the vehicle
//! (or just answer a question) and report a typed result. This module turns
//! the loosely-shaped payload into a [`TestPrompt`] and coerces the raw form
//! value back into the type the prompt declared.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Label used when the backend does not supply one
const DEFAULT_FIELD_LABEL: &str = "Result";

/// Kind of answer field a prompt asks for
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    /// Free text
    #[default]
    Text,
    /// Floating-point number
    Number,
    /// Yes/no
    Boolean,
    /// One choice from an ordered list of options
    Enumerated,
}

impl FieldKind {
    /// Map the backend's field type name onto a kind
    ///
    /// Unknown names fall back to [`FieldKind::Text`] so the user can still
    /// answer.
    #[must_use]
    pub fn from_wire(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "number" => Self::Number,
            "boolean" | "bool" => Self::Boolean,
            "array" | "enumerated" => Self::Enumerated,
            _ => Self::Text,
        }
    }
}

/// Shape of the field the answer is typed into
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerField {
    /// Label shown next to the field
    pub label: String,
    /// How the raw value is coerced before sending
    pub kind: FieldKind,
    /// Choices for [`FieldKind::Enumerated`], in display order
    pub options: Vec<String>,
}

/// A single instruction step
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstructionStep {
    /// What the user should do
    pub step_text: String,
}

/// A test the backend wants the user to run
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestPrompt {
    /// Identifier echoed back in `diagnostics.test_result`
    pub test_id: String,
    /// Opening message for the test
    pub text: String,
    /// Why the test matters, if given
    pub rationale: Option<String>,
    /// Ordered steps to perform
    pub instructions: Vec<InstructionStep>,
    /// Safety notes to show before the steps
    pub safety_and_warnings: Vec<String>,
    /// Where the answer goes
    pub field: AnswerField,
}

/// Payload shape of `diagnostics.test` as sent by the backend
#[derive(Deserialize)]
struct TestPayload {
    test_id: String,
    #[serde(default)]
    test_text: String,
    #[serde(default)]
    test_rationale: Option<String>,
    #[serde(default)]
    test_instructions: Vec<InstructionStep>,
    #[serde(default)]
    test_result_field_label: Option<String>,
    #[serde(default)]
    test_result_field_type: Option<String>,
    #[serde(default)]
    test_result_field_options: Vec<String>,
    #[serde(default)]
    safety_and_warnings: Vec<String>,
}

impl TestPrompt {
    /// Build a prompt from a `diagnostics.test` payload
    ///
    /// Returns `None` when the payload lacks a string `test_id` or a field
    /// has the wrong JSON type.
    #[must_use]
    pub fn from_payload(payload: &Value) -> Option<Self> {
        let raw = TestPayload::deserialize(payload).ok()?;

        let label = raw
            .test_result_field_label
            .filter(|l| !l.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_FIELD_LABEL.to_string());
        let kind = raw
            .test_result_field_type
            .as_deref()
            .map(FieldKind::from_wire)
            .unwrap_or_default();

        Some(Self {
            test_id: raw.test_id,
            text: raw.test_text,
            rationale: raw.test_rationale.filter(|r| !r.is_empty()),
            instructions: raw.test_instructions,
            safety_and_warnings: raw.safety_and_warnings,
            field: AnswerField {
                label,
                kind,
                options: raw.test_result_field_options,
            },
        })
    }

    /// Coerce a raw form value for this prompt
    #[must_use]
    pub fn coerce(&self, raw: &str) -> Value {
        coerce_answer(self.field.kind, raw)
    }
}

/// Coerce a raw form value according to the declared field kind
///
/// - `Number` parses to `f64`; anything unparseable or non-finite becomes
///   `null`.
/// - `Boolean` is `true` only for the exact string `"true"`.
/// - `Text` and `Enumerated` pass the string through unchanged.
#[must_use]
pub fn coerce_answer(kind: FieldKind, raw: &str) -> Value {
    match kind {
        FieldKind::Number => raw
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map_or(Value::Null, Value::Number),
        FieldKind::Boolean => Value::Bool(raw == "true"),
        FieldKind::Text | FieldKind::Enumerated => Value::String(raw.to_string()),
    }
}
