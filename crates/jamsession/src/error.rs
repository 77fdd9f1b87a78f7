//! Error types for the session runner.
//!
//! Only [`ControllerError`] leaves a run. The rest are contained by the loop
//! that hit them and logged.

use std::path::PathBuf;
use thiserror::Error;

/// Could not establish a session.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("No API key configured (set GOOGLE_API_KEY)")]
    MissingApiKey,

    #[error("Failed to connect to {endpoint}: {message}")]
    Connect { endpoint: String, message: String },

    #[error("Session setup failed: {0}")]
    Handshake(String),

    #[error("Timed out after {0:?} waiting for setup acknowledgement")]
    SetupTimeout(std::time::Duration),
}

/// A call on a live session failed.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The session is gone. Nothing more can be sent.
    #[error("Session closed")]
    Closed,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl SessionError {
    pub fn is_closed(&self) -> bool {
        matches!(self, SessionError::Closed)
    }
}

/// Audio output device errors.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Audio output not available (compile with --features pipewire)")]
    NotAvailable,

    #[error("Failed to open audio output: {0}")]
    Open(String),

    #[error("Audio write failed: {0}")]
    Write(String),
}

/// Writing the captured PCM to disk failed.
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("Failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write WAV {path}: {source}")]
    Wav { path: PathBuf, source: hound::Error },
}

/// Fatal errors from a controller run.
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error(transparent)]
    Connect(#[from] ConnectionError),

    /// Pushing the initial config, prompts or play command failed.
    #[error("Session startup failed: {0}")]
    Startup(#[source] SessionError),

    #[error(transparent)]
    Artifact(#[from] ArtifactError),
}
