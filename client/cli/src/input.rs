//! Line commands typed by the user
//!
//! Plain text describes the issue. Lines starting with `/` are commands.

use diagnostic_core::{FieldKind, TestPrompt};

/// One parsed input line
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Input {
    /// Blank line
    Empty,
    /// Describe the issue
    Describe(String),
    /// `/start`: start a new diagnostic run
    Start,
    /// `/answer <value>`: answer the pending test
    Answer(String),
    /// `/voice`: record the issue description
    Voice,
    /// `/status`: show session and backend state
    Status,
    /// `/help`
    Help,
    /// `/quit` or `/exit`
    Quit,
    /// An unrecognized `/command`
    Unknown(String),
}

impl Input {
    /// Parse a line read from stdin
    #[must_use]
    pub fn parse(line: &str) -> Self {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Self::Empty;
        }

        let Some(command) = trimmed.strip_prefix('/') else {
            // Sent as typed, surrounding whitespace included
            return Self::Describe(line.trim_end_matches(['\r', '\n']).to_string());
        };

        let (name, rest) = command
            .split_once(char::is_whitespace)
            .map_or((command, ""), |(name, rest)| (name, rest.trim()));

        match name.to_ascii_lowercase().as_str() {
            "start" => Self::Start,
            "answer" | "a" => Self::Answer(rest.to_string()),
            "voice" | "v" => Self::Voice,
            "status" => Self::Status,
            "help" | "?" => Self::Help,
            "quit" | "exit" | "q" => Self::Quit,
            other => Self::Unknown(other.to_string()),
        }
    }
}

/// Help text for the interactive loop
pub const HELP: &str = "\
Type a description of the problem to start a diagnosis.
  /start           start a new diagnostic run
  /answer <value>  answer the pending test (a number picks an option)
  /voice           describe the problem by voice
  /status          show connection state
  /quit            leave";

/// Turn what the user typed into the raw form value for `prompt`
///
/// For enumerated fields a 1-based option number selects that option;
/// anything else is passed through for coercion.
#[must_use]
pub fn resolve_answer(prompt: &TestPrompt, typed: &str) -> String {
    if prompt.field.kind == FieldKind::Enumerated {
        if let Ok(n) = typed.trim().parse::<usize>() {
            if let Some(option) = n.checked_sub(1).and_then(|i| prompt.field.options.get(i)) {
                return option.clone();
            }
        }
    }
    if prompt.field.kind == FieldKind::Boolean {
        return match typed.trim().to_ascii_lowercase().as_str() {
            "y" | "yes" | "true" => "true".to_string(),
            _ => "false".to_string(),
        };
    }
    typed.to_string()
}
