//! interview-daemon: voice turn arbitration and timing for a timed interview
//!
//! The daemon sits between a UI client and a remote interview service and
//! provides:
//! - Session state machine (Intro, Interview, Summary) with a per-question
//!   countdown that fires its timeout exactly once
//! - Half-duplex voice channel: never speaking and listening at once
//! - IPC server for UI commands, status snapshots and event notifications

mod config;
mod error;
mod events;
mod ipc;
mod lifecycle;
mod service;
mod session;
mod voice;

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::events::{Event, StateEvent};
use crate::ipc::Server;
use crate::lifecycle::ShutdownSignal;
use crate::service::HttpInterviewService;
use crate::session::SessionController;
use crate::voice::{CaptureEngine, CommandCapture, CommandSpeech, SpeechEngine, Unavailable};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "interview-daemon starting");

    // Load configuration
    let config = Config::load()?;
    config.ensure_dirs()?;
    info!(
        ?config.socket_path,
        service = %config.service_url,
        "configuration loaded"
    );

    // Create shutdown signal handler
    let mut shutdown = ShutdownSignal::new()?;

    let service = HttpInterviewService::new(&config.service_url, config.request_timeout)?;
    match service.health().await {
        Ok(health) => info!(status = ?health.status, "interview service reachable"),
        Err(e) => warn!(error = %e, "interview service not reachable yet"),
    }

    let speech: Box<dyn SpeechEngine> = match &config.speech_command {
        Some(command) => Box::new(CommandSpeech::probe(command, &config.voice.language).await),
        None => {
            info!("speech playback disabled");
            Box::new(Unavailable)
        }
    };
    let capture: Box<dyn CaptureEngine> = match config.capture_command.as_deref().and_then(CommandCapture::new) {
        Some(capture) => Box::new(capture),
        None => {
            info!("no capture command configured, answers must be typed");
            Box::new(Unavailable)
        }
    };

    // Create channels for inter-component communication
    // Engines, timers, service tasks and IPC -> session controller
    let (event_tx, event_rx) = mpsc::unbounded_channel::<Event>();
    // Session controller -> IPC subscribers
    let (notify_tx, _notify_rx) = broadcast::channel::<StateEvent>(256);

    let mut controller = SessionController::new(
        Arc::new(service),
        capture,
        speech,
        config.voice.clone(),
        event_tx.clone(),
        notify_tx.clone(),
    );

    // Create IPC server
    let server = Server::new(
        &config.socket_path,
        event_tx,
        controller.snapshots(),
        notify_tx.clone(),
    )?;

    // Log session events as they happen
    let mut log_rx = notify_tx.subscribe();

    info!("daemon initialized, entering main loop");

    // Main event loop
    tokio::select! {
        // Run the session controller (processes every inbound event)
        _ = controller.run(event_rx) => {
            info!("session controller exited");
        }

        // Run the IPC server (accepts client connections)
        result = server.run() => {
            if let Err(e) = result {
                error!(?e, "IPC server error");
            }
        }

        _ = async {
            loop {
                match log_rx.recv().await {
                    Ok(event) => info!(%event, "session event"),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "session event logger lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        } => {
            info!("session event logger exited");
        }

        // Wait for shutdown signal
        _ = shutdown.wait() => {
            info!("shutdown signal received");
        }
    }

    // Cleanup
    info!("shutting down...");

    server.shutdown().await;

    info!("interview-daemon stopped");

    Ok(())
}
