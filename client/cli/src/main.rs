//! Diagnostic CLI - Line-oriented surface for the diagnostic assistant
//!
//! Reads the user's description of a vehicle problem from stdin, drives a
//! diagnostic session with the backend, and prints the conversation as it
//! streams in.
//!
//! # Usage
//!
//! ```bash
//! # Start with defaults (http://127.0.0.1:8000)
//! diagnostic-cli
//!
//! # Custom backend
//! diagnostic-cli --api-base https://diag.example.com
//!
//! # With config file
//! diagnostic-cli --config ~/.config/diagnostic-client/client.toml
//!
//! # Verbose logging
//! RUST_LOG=debug diagnostic-cli
//! ```
//!
//! Logs go to stderr; the conversation goes to stdout.

mod input;
mod render;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::oneshot;
use tracing::{info, warn};

use diagnostic_core::{
    load_config, load_config_from_path, BackendStatus, ClientConfig, CommandSpeaker,
    CommandTranscriber, ConfigOverrides, ServerEvent, SessionController, Speaker, SpeechEvent,
    Transcriber, WebSocketConnector,
};

use input::{resolve_answer, Input, HELP};
use render::{Cursor, WIDTH};

/// Diagnostic CLI - talk to the vehicle diagnostic assistant
#[derive(Parser, Debug)]
#[command(name = "diagnostic-cli")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// HTTP base address of the diagnostic backend (overrides DIAG_API_BASE)
    #[arg(short = 'b', long, value_name = "URL")]
    api_base: Option<String>,

    /// Configuration file path
    #[arg(short = 'c', long, env = "DIAG_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Session open timeout in milliseconds (0 = wait indefinitely)
    #[arg(long, value_name = "MS")]
    open_timeout_ms: Option<u64>,

    /// Delay between backend health checks in milliseconds
    #[arg(long, value_name = "MS")]
    health_interval_ms: Option<u64>,

    /// Maximum voice recording length in seconds
    #[arg(long, value_name = "SECS")]
    voice_max_secs: Option<u64>,

    /// Speak assistant messages with the configured speech command
    #[arg(long)]
    speak: bool,

    /// Do not wait for the backend health check before starting
    #[arg(long)]
    no_wait: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "DIAG_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        let mut overrides = ConfigOverrides::new();
        if let Some(ref api_base) = self.api_base {
            overrides = overrides.with_api_base(api_base.clone());
        }
        if let Some(ms) = self.open_timeout_ms {
            overrides = overrides.with_open_timeout_ms(ms);
        }
        if let Some(ms) = self.health_interval_ms {
            overrides = overrides.with_health_poll_interval_ms(ms);
        }
        if let Some(secs) = self.voice_max_secs {
            overrides = overrides.with_voice_max_secs(secs);
        }
        overrides
    }
}

/// Initialize logging with the specified level
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!(
            "diagnostic_cli={level},diagnostic_core={level}"
        ))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

/// Resolve configuration from file, environment and CLI flags
fn resolve_config(args: &Args) -> Result<ClientConfig> {
    let mut config = match args.config {
        Some(ref path) => load_config_from_path(Some(path.clone())),
        None => load_config(),
    }
    .context("Failed to load configuration")?;

    args.overrides().apply(&mut config);
    config.validate().context("Invalid configuration")?;

    info!(
        api_base = %config.api_base,
        source = %config.source(),
        "Configuration resolved"
    );
    Ok(config)
}

/// Print everything new in the diagnostic state whenever it changes
///
/// Returns after a final pass once `shutdown` fires.
async fn render_loop(
    session: SessionController,
    speaker: Option<CommandSpeaker>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut updates = session.subscribe_updates();
    let mut finishing = false;
    let mut cursor = Cursor::default();
    let mut spoken = 0u64;

    loop {
        let (lines, to_speak) = session.with_state(|state| {
            let lines = cursor.advance(state, WIDTH);
            let to_speak: Vec<String> = state
                .entries_since(spoken)
                .iter()
                .filter_map(|entry| match entry.event {
                    ServerEvent::Talk { ref message } => Some(message.clone()),
                    _ => None,
                })
                .collect();
            spoken = state.log().len() as u64;
            (lines, to_speak)
        });

        for line in lines {
            println!("{line}");
        }

        if let Some(ref speaker) = speaker {
            for message in to_speak {
                let mut events = speaker.speak(&message);
                tokio::spawn(async move {
                    while let Some(event) = events.recv().await {
                        if let SpeechEvent::Failed(e) = event {
                            warn!(error = %e, "Speech failed");
                        }
                    }
                });
            }
        }

        if finishing {
            break;
        }
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = &mut shutdown, if !finishing => finishing = true,
        }
    }
}

/// Record a description and send it as the issue
async fn describe_by_voice(
    session: SessionController,
    transcriber: Option<CommandTranscriber>,
    max_duration: Duration,
) {
    let Some(transcriber) = transcriber else {
        println!("Voice input is not configured (set voice.transcribe_command).");
        return;
    };

    println!("Listening for up to {}s...", max_duration.as_secs());
    match transcriber.transcribe(max_duration).await {
        Ok(text) if text.is_empty() => println!("Didn't catch that."),
        Ok(text) => {
            println!("you: {text}");
            session.begin_issue(&text).await;
        }
        Err(e) => {
            warn!(error = %e, "Transcription failed");
            println!("Voice input failed: {e}");
        }
    }
}

/// What the input loop does after one line
enum Action {
    /// Nothing left to wait for
    Done,
    /// A command that may still be waiting for the session to open
    Run(BoxFuture<'static, ()>),
    /// The user wants to leave
    Quit,
}

/// Handle one input line without waiting on the session
fn handle_input(
    input: Input,
    session: &SessionController,
    config: &ClientConfig,
    transcriber: Option<&CommandTranscriber>,
) -> Action {
    let session = session.clone();
    match input {
        Input::Empty => {}
        Input::Describe(text) => {
            return Action::Run(async move { session.begin_issue(&text).await }.boxed())
        }
        Input::Start => {
            return Action::Run(async move { session.start_diagnostics().await }.boxed())
        }
        Input::Answer(typed) => {
            let prompt = session.with_state(|state| state.pending_test().cloned());
            match prompt {
                Some(_) if typed.trim().is_empty() => println!("Usage: /answer <value>"),
                Some(prompt) => {
                    let raw = resolve_answer(&prompt, &typed);
                    return Action::Run(
                        async move { session.submit_answer(&prompt, &raw).await }.boxed(),
                    );
                }
                None => println!("There is no test waiting for an answer."),
            }
        }
        Input::Voice => {
            return Action::Run(
                describe_by_voice(session, transcriber.cloned(), config.voice.max_duration)
                    .boxed(),
            );
        }
        Input::Status => {
            let issue = session.with_state(|state| state.current_issue().map(str::to_string));
            println!(
                "session: {}{}",
                session.state(),
                session
                    .session_id()
                    .map(|id| format!(" ({id})"))
                    .unwrap_or_default()
            );
            if let Some(issue) = issue {
                println!("issue: {issue}");
            }
        }
        Input::Help => println!("{HELP}"),
        Input::Quit => return Action::Quit,
        Input::Unknown(name) => println!("Unknown command /{name}. Type /help for commands."),
    }
    Action::Done
}

/// Start `command`, keeping it in `in_flight` if it has to wait
///
/// The first poll queues the command on the session, so commands reach the
/// backend in the order they were typed even while an open is pending.
fn launch(
    mut command: BoxFuture<'static, ()>,
    in_flight: &mut FuturesUnordered<BoxFuture<'static, ()>>,
) {
    if (&mut command).now_or_never().is_none() {
        in_flight.push(command);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging first
    init_logging(&args.log_level);
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = resolve_config(&args)?;

    if !args.no_wait {
        let probe = config.health_probe();
        println!("{}", BackendStatus::Checking);
        tokio::select! {
            status = probe.wait_until_reachable() => {
                match status {
                    BackendStatus::Connected { message: Some(ref greeting) } => {
                        println!("{status}: {greeting}");
                    }
                    _ => println!("{status}"),
                }
            }
            _ = tokio::signal::ctrl_c() => return Ok(()),
        }
    }

    let transport = config
        .transport_config()
        .context("Failed to derive session endpoint")?;
    let session = SessionController::new(WebSocketConnector::new(), transport);

    let transcriber = CommandTranscriber::from_config(&config.voice);
    let speaker = if args.speak {
        let speaker = CommandSpeaker::from_config(&config.voice);
        if speaker.is_none() {
            warn!("--speak given but voice.speak_command is not configured");
        }
        speaker
    } else {
        None
    };

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let renderer = tokio::spawn(render_loop(session.clone(), speaker, shutdown_rx));

    println!("{HELP}");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut in_flight = FuturesUnordered::new();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    break;
                };
                match handle_input(Input::parse(&line), &session, &config, transcriber.as_ref()) {
                    Action::Done => {}
                    Action::Run(command) => launch(command, &mut in_flight),
                    Action::Quit => break,
                }
            }
            Some(()) = in_flight.next(), if !in_flight.is_empty() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    session.close();
    let _ = shutdown_tx.send(());
    if let Err(e) = renderer.await {
        warn!(error = %e, "Renderer task failed");
    }

    Ok(())
}
