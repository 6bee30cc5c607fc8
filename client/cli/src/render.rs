//! Text rendering of the diagnostic state
//!
//! Turns log entries and test prompts into wrapped lines for a terminal.
//! The render loop prints only what changed since the last update.

use diagnostic_core::{FieldKind, LogEntry, ServerEvent, TestPrompt};

/// Default wrap width
pub const WIDTH: usize = 80;

fn wrap(text: &str, width: usize, indent: &str) -> Vec<String> {
    let options = textwrap::Options::new(width)
        .initial_indent(indent)
        .subsequent_indent(indent);
    textwrap::wrap(text, options)
        .into_iter()
        .map(|line| line.into_owned())
        .collect()
}

fn kind_name(kind: FieldKind) -> &'static str {
    match kind {
        FieldKind::Text => "text",
        FieldKind::Number => "number",
        FieldKind::Boolean => "yes/no",
        FieldKind::Enumerated => "choice",
    }
}

/// Human text for a rejection reason
fn rejection_text(reason: &str) -> String {
    match reason {
        "active_issue_exists" => {
            "A diagnostic session is already active. Finish it before starting another."
                .to_string()
        }
        "" => "The backend refused to open a new diagnostic session.".to_string(),
        other => format!("The backend refused to open a new diagnostic session ({other})."),
    }
}

/// Lines for a test prompt
#[must_use]
pub fn render_prompt(prompt: &TestPrompt, width: usize) -> Vec<String> {
    let mut lines = wrap(&format!("TEST {}: {}", prompt.test_id, prompt.text), width, "");

    if let Some(ref rationale) = prompt.rationale {
        lines.extend(wrap(&format!("why: {rationale}"), width, "  "));
    }
    for warning in &prompt.safety_and_warnings {
        lines.extend(wrap(&format!("! {warning}"), width, "  "));
    }
    for (i, step) in prompt.instructions.iter().enumerate() {
        lines.extend(wrap(&format!("{}. {}", i + 1, step.step_text), width, "  "));
    }
    if prompt.field.kind == FieldKind::Enumerated && !prompt.field.options.is_empty() {
        let options = prompt
            .field
            .options
            .iter()
            .enumerate()
            .map(|(i, option)| format!("{}) {option}", i + 1))
            .collect::<Vec<_>>()
            .join("  ");
        lines.extend(wrap(&format!("options: {options}"), width, "  "));
    }
    lines.push(format!(
        "  answer with /answer <{}> ({})",
        prompt.field.label,
        kind_name(prompt.field.kind)
    ));
    lines
}

/// Lines for one log entry
#[must_use]
pub fn render_entry(entry: &LogEntry, width: usize) -> Vec<String> {
    match &entry.event {
        ServerEvent::Talk { message } => wrap(&format!("assistant: {message}"), width, ""),
        ServerEvent::IssueCreated { issue_id, message } => {
            let text = if message.is_empty() {
                format!("[issue {issue_id}] opened")
            } else {
                format!("[issue {issue_id}] {message}")
            };
            wrap(&text, width, "")
        }
        ServerEvent::IssueCreateRejected { reason } => {
            wrap(&format!("[rejected] {}", rejection_text(reason)), width, "")
        }
        ServerEvent::Test(prompt) => render_prompt(prompt, width),
        ServerEvent::Other {
            event_type,
            payload,
        } => wrap(&format!("[{event_type}] {payload}"), width, ""),
        ServerEvent::Raw(text) => wrap(&format!("[raw] {text}"), width, ""),
        ServerEvent::Loading { status } => vec![format!("[loading] {status}")],
        ServerEvent::Thinking { text } => wrap(&format!("[thinking] {text}"), width, ""),
    }
}

/// Tracks what has already been printed
#[derive(Debug, Default)]
pub struct Cursor {
    next_seq: u64,
    thinking_len: usize,
    busy: bool,
}

impl Cursor {
    /// Lines describing everything new in `state`
    pub fn advance(&mut self, state: &diagnostic_core::DiagnosticState, width: usize) -> Vec<String> {
        let mut lines = Vec::new();

        // A reset shrinks the buffer
        let thinking = state.thinking();
        if thinking.len() < self.thinking_len {
            self.thinking_len = 0;
        }
        if thinking.len() > self.thinking_len {
            let fresh = thinking.get(self.thinking_len..).unwrap_or_default().trim();
            if !fresh.is_empty() {
                lines.extend(wrap(&format!("… {fresh}"), width, ""));
            }
            self.thinking_len = thinking.len();
        }

        for entry in state.entries_since(self.next_seq) {
            lines.extend(render_entry(entry, width));
            self.next_seq = entry.seq + 1;
        }

        if state.is_busy() != self.busy {
            self.busy = state.is_busy();
            lines.push(if self.busy { "[working]" } else { "[ready]" }.to_string());
        }

        lines
    }
}
