//! Error types for the interview daemon

use thiserror::Error;

/// Failures talking to the remote interview service
///
/// `Transport` and `Status` are transport failures; `Application` is a 2xx
/// reply that carried an `error` field.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("{0}")]
    Application(String),

    #[error("malformed reply: {0}")]
    Malformed(String),
}

/// Failures reported by a capture or playback engine
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("engine unavailable")]
    Unavailable,

    #[error("engine busy")]
    Busy,

    #[error("failed to launch engine process: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("device error: {0}")]
    Device(String),
}
