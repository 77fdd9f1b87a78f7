//! WebSocket client for the BidiGenerateMusic realtime protocol.
//!
//! Wire format (JSON text frames, the server may also send JSON in binary frames):
//!
//! ```text
//! client → {"setup":{"model":"models/lyria-realtime-exp"}}
//! server → {"setupComplete":{}}
//! client → {"clientContent":{"weightedPrompts":[{"text":"piano","weight":1.0}]}}
//! client → {"musicGenerationConfig":{"bpm":120,"scale":"C_MAJOR_A_MINOR"}}
//! client → {"playbackControl":"PLAY"}          PLAY | PAUSE | STOP | RESET_CONTEXT
//! server → {"serverContent":{"audioChunks":[{"data":"<base64 pcm>","mimeType":"..."}]}}
//! server → {"filteredPrompt":{"text":"...","filteredReason":"..."}}
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use futures::stream::{self, SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{ConnectionError, SessionError};
use crate::protocol::{Connection, Connector, MessageStream, MusicSession};
use crate::types::{GenerationConfig, ServerMessage, WeightedPrompt};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Playback control verbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlaybackControl {
    Play,
    Pause,
    Stop,
    ResetContext,
}

/// Connects to the realtime music endpoint.
#[derive(Clone)]
pub struct LyriaConnector {
    endpoint: String,
    api_key: Option<String>,
    setup_timeout: Duration,
}

impl std::fmt::Debug for LyriaConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LyriaConnector")
            .field("endpoint", &self.endpoint)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("setup_timeout", &self.setup_timeout)
            .finish()
    }
}

impl LyriaConnector {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key,
            setup_timeout: Duration::from_secs(10),
        }
    }

    pub fn from_config(config: &jamconf::SessionConfig) -> Self {
        Self::new(config.endpoint.clone(), config.api_key.clone())
            .with_setup_timeout(config.setup_timeout())
    }

    pub fn with_setup_timeout(mut self, timeout: Duration) -> Self {
        self.setup_timeout = timeout;
        self
    }

    async fn await_setup(read: &mut SplitStream<WsStream>) -> Result<(), ConnectionError> {
        while let Some(frame) = read.next().await {
            let frame = frame.map_err(|e| ConnectionError::Handshake(e.to_string()))?;
            match frame_text(frame) {
                FrameText::Json(text) => {
                    let parsed: ServerFrame = serde_json::from_str(&text)
                        .map_err(|e| ConnectionError::Handshake(format!("bad setup reply: {}", e)))?;
                    if parsed.setup_complete.is_some() {
                        return Ok(());
                    }
                    debug!("ignoring pre-setup frame");
                }
                FrameText::Closed(reason) => {
                    return Err(ConnectionError::Handshake(format!(
                        "server closed during setup: {}",
                        reason
                    )));
                }
                FrameText::Skip => {}
            }
        }
        Err(ConnectionError::Handshake(
            "connection ended before setup completed".to_string(),
        ))
    }
}

#[async_trait]
impl Connector for LyriaConnector {
    async fn connect(&self, model: &str) -> Result<Connection, ConnectionError> {
        let api_key = self
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or(ConnectionError::MissingApiKey)?;

        let url = format!("{}?key={}", self.endpoint, api_key);
        let (ws, _response) =
            tokio_tungstenite::connect_async(url)
                .await
                .map_err(|e| ConnectionError::Connect {
                    endpoint: self.endpoint.clone(),
                    message: e.to_string(),
                })?;

        let (mut write, mut read) = ws.split();

        write
            .send(Message::Text(encode_setup(model)))
            .await
            .map_err(|e| ConnectionError::Handshake(e.to_string()))?;

        tokio::time::timeout(self.setup_timeout, Self::await_setup(&mut read))
            .await
            .map_err(|_| ConnectionError::SetupTimeout(self.setup_timeout))??;

        let session = LyriaSession {
            id: Uuid::new_v4(),
            write: Mutex::new(write),
            closed: AtomicBool::new(false),
        };
        info!(session.id = %session.id, model, "music session established");

        Ok(Connection {
            session: Arc::new(session),
            messages: message_stream(read),
        })
    }
}

/// Control handle over the write half of the socket.
pub struct LyriaSession {
    id: Uuid,
    write: Mutex<SplitSink<WsStream, Message>>,
    closed: AtomicBool,
}

impl LyriaSession {
    async fn send(&self, text: String) -> Result<(), SessionError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SessionError::Closed);
        }
        let mut write = self.write.lock().await;
        write.send(Message::Text(text)).await.map_err(map_ws_error)
    }

    async fn control(&self, control: PlaybackControl) -> Result<(), SessionError> {
        debug!(session.id = %self.id, ?control, "playback control");
        self.send(encode_playback(control)).await
    }
}

#[async_trait]
impl MusicSession for LyriaSession {
    async fn set_config(&self, config: &GenerationConfig) -> Result<(), SessionError> {
        debug!(session.id = %self.id, bpm = ?config.bpm, scale = ?config.scale, "set config");
        self.send(encode_config(config)).await
    }

    async fn set_prompts(&self, prompts: &[WeightedPrompt]) -> Result<(), SessionError> {
        debug!(session.id = %self.id, count = prompts.len(), "set prompts");
        self.send(encode_prompts(prompts)).await
    }

    async fn play(&self) -> Result<(), SessionError> {
        self.control(PlaybackControl::Play).await
    }

    async fn pause(&self) -> Result<(), SessionError> {
        self.control(PlaybackControl::Pause).await
    }

    async fn stop(&self) -> Result<(), SessionError> {
        self.control(PlaybackControl::Stop).await
    }

    async fn reset_context(&self) -> Result<(), SessionError> {
        self.control(PlaybackControl::ResetContext).await
    }

    async fn close(&self) -> Result<(), SessionError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut write = self.write.lock().await;
        let result = write.close().await;
        info!(session.id = %self.id, "music session closed");
        match result {
            Ok(()) => Ok(()),
            Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => Ok(()),
            Err(e) => Err(SessionError::Transport(e.to_string())),
        }
    }
}

fn map_ws_error(e: tungstenite::Error) -> SessionError {
    match e {
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
            SessionError::Closed
        }
        other => SessionError::Transport(other.to_string()),
    }
}

/// Turn the read half into a stream of decoded server messages.
///
/// Ends on a close frame, and right after yielding a transport error.
fn message_stream(read: SplitStream<WsStream>) -> MessageStream {
    stream::unfold(Some(read), |state| async move {
        let mut read = state?;
        loop {
            match read.next().await {
                None => return None,
                Some(Err(e)) => return Some((vec![Err(map_ws_error(e))], None)),
                Some(Ok(frame)) => match frame_text(frame) {
                    FrameText::Json(text) => match decode_server_frame(&text) {
                        Ok(messages) if messages.is_empty() => continue,
                        Ok(messages) => {
                            return Some((messages.into_iter().map(Ok).collect(), Some(read)))
                        }
                        Err(e) => return Some((vec![Err(e)], Some(read))),
                    },
                    FrameText::Closed(reason) => {
                        debug!(reason = %reason, "server closed stream");
                        return None;
                    }
                    FrameText::Skip => continue,
                },
            }
        }
    })
    .flat_map(stream::iter)
    .boxed()
}

enum FrameText {
    Json(String),
    Closed(String),
    Skip,
}

fn frame_text(frame: Message) -> FrameText {
    match frame {
        Message::Text(text) => FrameText::Json(text),
        Message::Binary(data) => match String::from_utf8(data) {
            Ok(text) => FrameText::Json(text),
            Err(_) => {
                warn!("dropping non-UTF-8 binary frame");
                FrameText::Skip
            }
        },
        Message::Close(frame) => FrameText::Closed(
            frame
                .map(|f| format!("{} {}", f.code, f.reason))
                .unwrap_or_else(|| "no reason".to_string()),
        ),
        Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => FrameText::Skip,
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerFrame {
    setup_complete: Option<serde_json::Value>,
    server_content: Option<ServerContent>,
    filtered_prompt: Option<FilteredPromptFrame>,
    warning: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerContent {
    #[serde(default)]
    audio_chunks: Vec<AudioChunkFrame>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AudioChunkFrame {
    data: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FilteredPromptFrame {
    #[serde(default)]
    text: String,
    #[serde(default)]
    filtered_reason: Option<String>,
}

/// Decode one JSON frame into zero or more messages.
///
/// Setup acknowledgements and warnings never reach the controller.
pub(crate) fn decode_server_frame(text: &str) -> Result<Vec<ServerMessage>, SessionError> {
    let frame: ServerFrame =
        serde_json::from_str(text).map_err(|e| SessionError::Protocol(e.to_string()))?;

    let mut messages = Vec::new();

    if let Some(content) = frame.server_content {
        for chunk in content.audio_chunks {
            let pcm = base64::engine::general_purpose::STANDARD
                .decode(chunk.data.as_bytes())
                .map_err(|e| SessionError::Protocol(format!("bad audio chunk: {}", e)))?;
            messages.push(ServerMessage::AudioChunk(Bytes::from(pcm)));
        }
    }

    if let Some(filtered) = frame.filtered_prompt {
        let notice = match filtered.filtered_reason {
            Some(reason) if !reason.is_empty() => format!("{} ({})", filtered.text, reason),
            _ => filtered.text,
        };
        messages.push(ServerMessage::FilteredPrompt(notice));
    }

    if let Some(warning) = frame.warning {
        warn!(warning = %warning, "server warning");
    }

    Ok(messages)
}

pub(crate) fn encode_setup(model: &str) -> String {
    json!({ "setup": { "model": model } }).to_string()
}

pub(crate) fn encode_prompts(prompts: &[WeightedPrompt]) -> String {
    json!({ "clientContent": { "weightedPrompts": prompts } }).to_string()
}

pub(crate) fn encode_config(config: &GenerationConfig) -> String {
    let mut body = serde_json::Map::new();
    if let Some(bpm) = config.bpm {
        body.insert("bpm".to_string(), json!(bpm));
    }
    if let Some(scale) = config.scale {
        body.insert("scale".to_string(), json!(scale.name()));
    }
    json!({ "musicGenerationConfig": body }).to_string()
}

pub(crate) fn encode_playback(control: PlaybackControl) -> String {
    json!({ "playbackControl": control }).to_string()
}
