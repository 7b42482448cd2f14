//! Main entrypoint for the Atlas voice client.
//!
//! Loads configuration, opens the default microphone and speaker, connects to
//! Gemini Live and prints the conversation until Ctrl+C or the session ends.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use atlas_core::{ConnectionState, VoiceAgent};
use atlas_native_audio::CpalBackend;
use atlas_voice_agent::{
    config::Config,
    console::{status_label, transcript_line},
    prompts::{load_prompts, system_instruction},
};
use clap::Parser;
use gemini_realtime::GeminiLiveTransport;
use tokio::sync::mpsc;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(version, about = "Talk to the Atlas support agent over Gemini Live")]
struct Cli {
    /// Prebuilt voice for the agent (overrides GEMINI_VOICE).
    #[arg(long)]
    voice: Option<String>,

    /// Live model name (overrides GEMINI_LIVE_MODEL).
    #[arg(long)]
    model: Option<String>,

    /// Directory holding system_prompt.md (overrides PROMPTS_PATH).
    #[arg(long)]
    prompts: Option<PathBuf>,

    /// Input device name; the system default when omitted.
    #[arg(long)]
    input_device: Option<String>,

    /// Output device name; the system default when omitted.
    #[arg(long)]
    output_device: Option<String>,
}

/// Listens for the `Ctrl+C` signal.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to install Ctrl+C handler");
        return;
    }
    info!("Received shutdown signal. Disconnecting...");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // --- 1. Load Configuration ---
    let mut config = Config::from_env().context("Failed to load configuration")?;
    if let Some(voice) = cli.voice {
        config.voice = voice;
    }
    if let Some(model) = cli.model {
        config.live_model = model;
    }
    if let Some(prompts) = cli.prompts {
        config.prompts_path = prompts;
    }

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded.");

    // --- 3. Build the Session ---
    let prompts = load_prompts(&config.prompts_path)?;
    let session_config = config.session_config(system_instruction(&prompts));

    let transport = GeminiLiveTransport::new(config.gemini_api_key.clone())
        .with_endpoint(config.endpoint.clone())
        .with_handshake_timeout(config.handshake_timeout);

    let mut backend = CpalBackend::new();
    if let Some(name) = cli.input_device {
        backend = backend.with_input_device(name);
    }
    if let Some(name) = cli.output_device {
        backend = backend.with_output_device(name);
    }

    let (status_tx, mut status_rx) = mpsc::unbounded_channel();
    let agent = VoiceAgent::new(
        Arc::new(backend),
        Arc::new(transport),
        session_config,
        |event| println!("{}", transcript_line(&event)),
        move |state| {
            info!(status = status_label(state), "Connection status changed");
            let _ = status_tx.send(state);
        },
    );

    // --- 4. Converse ---
    info!(
        model = %config.live_model,
        voice = %config.voice,
        "Connecting to Gemini Live..."
    );
    agent.connect().await;
    if agent.state() == ConnectionState::Disconnected {
        bail!("Could not start the voice session; see the log above for the cause");
    }
    println!("Connected. Start talking; press Ctrl+C to hang up.");

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            status = status_rx.recv() => match status {
                Some(ConnectionState::Disconnected) | None => {
                    info!("The session ended.");
                    break;
                }
                Some(_) => {}
            },
        }
    }

    agent.disconnect();
    info!("Voice client has shut down.");
    Ok(())
}
