//! The session contract the controller drives.
//!
//! A [`Connector`] opens a duplex session and hands back a control handle
//! plus the stream of server messages. The handle is shared by the send loop,
//! the auto-stop timer and the shutdown path, so every method takes `&self`
//! and must tolerate being called while the stream is being read.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::{ConnectionError, SessionError};
use crate::types::{GenerationConfig, ServerMessage, WeightedPrompt};

/// Server messages for one session. Consumed once.
pub type MessageStream = BoxStream<'static, Result<ServerMessage, SessionError>>;

/// An established session.
pub struct Connection {
    pub session: Arc<dyn MusicSession>,
    pub messages: MessageStream,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection").finish_non_exhaustive()
    }
}

#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a session against `model` and complete the setup handshake.
    async fn connect(&self, model: &str) -> Result<Connection, ConnectionError>;
}

/// Control half of a live session.
#[async_trait]
pub trait MusicSession: Send + Sync {
    async fn set_config(&self, config: &GenerationConfig) -> Result<(), SessionError>;

    /// Replace the whole prompt set.
    async fn set_prompts(&self, prompts: &[WeightedPrompt]) -> Result<(), SessionError>;

    async fn play(&self) -> Result<(), SessionError>;

    async fn pause(&self) -> Result<(), SessionError>;

    async fn stop(&self) -> Result<(), SessionError>;

    /// Drop accumulated generation state so a new config takes effect cleanly.
    async fn reset_context(&self) -> Result<(), SessionError>;

    /// Close the transport. Calls after the first are no-ops.
    async fn close(&self) -> Result<(), SessionError>;
}
