//! Voice Capability Boundary
//!
//! Speech input and output are external programs. The client only needs
//! two capabilities: turn a short recording into text, and speak a
//! message. Both are traits so surfaces can plug in their own pipelines.
//!
//! The process-backed implementations run the configured command through
//! `tokio::process` and never block the runtime.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tokio::sync::mpsc;

use crate::config::VoiceConfig;

/// Extra time a recorder gets beyond the requested duration
const RECORDER_GRACE: Duration = Duration::from_secs(10);

/// Errors from the voice capabilities
#[derive(Debug, Error)]
pub enum VoiceError {
    /// The program could not be started
    #[error("Failed to start {program}: {source}")]
    Spawn {
        /// The program that was attempted
        program: String,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// The program ran but did not produce a usable result
    #[error("Voice command failed: {0}")]
    Failed(String),
}

/// Progress of one utterance
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SpeechEvent {
    /// Playback started
    Started,
    /// Playback finished normally
    Finished,
    /// Playback could not complete
    Failed(String),
}

/// Records speech and returns the transcript
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Record for at most `max_duration` and return the recognized text
    async fn transcribe(&self, max_duration: Duration) -> Result<String, VoiceError>;
}

/// Speaks text aloud
pub trait Speaker: Send + Sync {
    /// Start speaking `text`; progress arrives on the returned channel
    fn speak(&self, text: &str) -> mpsc::Receiver<SpeechEvent>;
}

/// Split a configured command into program and leading arguments
fn split_command(command: &[String]) -> Option<(String, Vec<String>)> {
    let (program, args) = command.split_first()?;
    if program.trim().is_empty() {
        return None;
    }
    Some((program.clone(), args.to_vec()))
}

/// Runs a recorder program that prints the transcript on stdout
///
/// The program is invoked as `<program> <args...> --duration <secs>`.
#[derive(Clone, Debug)]
pub struct CommandTranscriber {
    program: String,
    args: Vec<String>,
}

impl CommandTranscriber {
    /// Create from a command line; `None` when the command is empty
    #[must_use]
    pub fn new(command: &[String]) -> Option<Self> {
        let (program, args) = split_command(command)?;
        Some(Self { program, args })
    }

    /// Create from voice settings; `None` when transcription is disabled
    #[must_use]
    pub fn from_config(config: &VoiceConfig) -> Option<Self> {
        Self::new(&config.transcribe_command)
    }
}

#[async_trait]
impl Transcriber for CommandTranscriber {
    async fn transcribe(&self, max_duration: Duration) -> Result<String, VoiceError> {
        let secs = max_duration.as_secs().max(1);
        tracing::debug!(program = %self.program, secs, "Starting recorder");

        let child = Command::new(&self.program)
            .args(&self.args)
            .arg("--duration")
            .arg(secs.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| VoiceError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let output = tokio::time::timeout(max_duration + RECORDER_GRACE, child.wait_with_output())
            .await
            .map_err(|_| VoiceError::Failed(format!("{} did not finish in time", self.program)))?
            .map_err(|e| VoiceError::Failed(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(VoiceError::Failed(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

/// Runs a text-to-speech program with the text as its final argument
#[derive(Clone, Debug)]
pub struct CommandSpeaker {
    program: String,
    args: Vec<String>,
}

impl CommandSpeaker {
    /// Create from a command line; `None` when the command is empty
    #[must_use]
    pub fn new(command: &[String]) -> Option<Self> {
        let (program, args) = split_command(command)?;
        Some(Self { program, args })
    }

    /// Create from voice settings; `None` when speech is disabled
    #[must_use]
    pub fn from_config(config: &VoiceConfig) -> Option<Self> {
        Self::new(&config.speak_command)
    }
}

impl Speaker for CommandSpeaker {
    fn speak(&self, text: &str) -> mpsc::Receiver<SpeechEvent> {
        let (tx, rx) = mpsc::channel(4);
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg(text)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let program = self.program.clone();

        tokio::spawn(async move {
            let child = match command.spawn() {
                Ok(child) => child,
                Err(e) => {
                    tracing::warn!(program = %program, error = %e, "Failed to start speaker");
                    let _ = tx.send(SpeechEvent::Failed(e.to_string())).await;
                    return;
                }
            };
            let _ = tx.send(SpeechEvent::Started).await;

            let event = match child.wait_with_output().await {
                Ok(output) if output.status.success() => SpeechEvent::Finished,
                Ok(output) => SpeechEvent::Failed(format!(
                    "{program} exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                )),
                Err(e) => SpeechEvent::Failed(e.to_string()),
            };
            let _ = tx.send(event).await;
        });

        rx
    }
}
