//! Common test utilities for controller tests
//!
//! A recording session, a connector that hands it out with a channel-fed
//! message stream, and an audio output that records what was played.
//! Timestamps use tokio's clock so tests can run with paused time.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_stream::wrappers::UnboundedReceiverStream;

use jamsession::{
    AudioFormat, AudioOutput, AudioSink, ChannelLines, Connection, ConnectionError, Connector,
    ControllerSettings, EventSink, GenerationConfig, MusicSession, ServerMessage, SessionController,
    SessionError, SessionEvent, SinkError, WeightedPrompt,
};

pub const CHUNK_LEN: usize = 4800;

/// One call made on the session.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    SetConfig(GenerationConfig),
    SetPrompts(Vec<WeightedPrompt>),
    Play,
    Pause,
    Stop,
    ResetContext,
    Close,
}

/// Records every call with the (tokio) time it was made.
#[derive(Default)]
pub struct RecordingSession {
    calls: Mutex<Vec<(Instant, Call)>>,
    closed: AtomicBool,
    fail_play: AtomicBool,
    fail_next_config: AtomicBool,
    failures: AtomicUsize,
}

impl RecordingSession {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().iter().map(|(_, c)| c.clone()).collect()
    }

    pub fn timed_calls(&self) -> Vec<(Instant, Call)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, call: &Call) -> usize {
        self.calls().iter().filter(|c| *c == call).count()
    }

    pub fn fail_play(&self) {
        self.fail_play.store(true, Ordering::SeqCst);
    }

    /// The next `set_config` fails with a transport error, once.
    pub fn fail_next_config(&self) {
        self.fail_next_config.store(true, Ordering::SeqCst);
    }

    /// Calls that were attempted and failed on purpose.
    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }

    /// Behave as if the server closed the connection: everything but
    /// `close` now fails with [`SessionError::Closed`].
    pub fn close_underneath(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn record(&self, call: Call) -> Result<(), SessionError> {
        let is_close = call == Call::Close;
        if self.closed.load(Ordering::SeqCst) && !is_close {
            return Err(SessionError::Closed);
        }
        self.calls.lock().unwrap().push((Instant::now(), call));
        if is_close {
            self.closed.store(true, Ordering::SeqCst);
        }
        Ok(())
    }
}

#[async_trait]
impl MusicSession for RecordingSession {
    async fn set_config(&self, config: &GenerationConfig) -> Result<(), SessionError> {
        if self.fail_next_config.swap(false, Ordering::SeqCst) {
            self.failures.fetch_add(1, Ordering::SeqCst);
            return Err(SessionError::Transport("connection reset".to_string()));
        }
        self.record(Call::SetConfig(*config))
    }

    async fn set_prompts(&self, prompts: &[WeightedPrompt]) -> Result<(), SessionError> {
        self.record(Call::SetPrompts(prompts.to_vec()))
    }

    async fn play(&self) -> Result<(), SessionError> {
        if self.fail_play.load(Ordering::SeqCst) {
            return Err(SessionError::Transport("play rejected".to_string()));
        }
        self.record(Call::Play)
    }

    async fn pause(&self) -> Result<(), SessionError> {
        self.record(Call::Pause)
    }

    async fn stop(&self) -> Result<(), SessionError> {
        self.record(Call::Stop)
    }

    async fn reset_context(&self) -> Result<(), SessionError> {
        self.record(Call::ResetContext)
    }

    async fn close(&self) -> Result<(), SessionError> {
        self.record(Call::Close)
    }
}

type ServerTx = mpsc::UnboundedSender<Result<ServerMessage, SessionError>>;

/// Hands out one [`RecordingSession`] whose messages come from a channel.
pub struct MockConnector {
    pub session: Arc<RecordingSession>,
    messages: Mutex<Option<mpsc::UnboundedReceiver<Result<ServerMessage, SessionError>>>>,
    refuse: bool,
    pub connects: AtomicUsize,
}

impl MockConnector {
    pub fn new() -> (Arc<Self>, ServerTx) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            session: Arc::new(RecordingSession::default()),
            messages: Mutex::new(Some(rx)),
            refuse: false,
            connects: AtomicUsize::new(0),
        });
        (connector, tx)
    }

    pub fn refusing() -> Arc<Self> {
        Arc::new(Self {
            session: Arc::new(RecordingSession::default()),
            messages: Mutex::new(None),
            refuse: true,
            connects: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, _model: &str) -> Result<Connection, ConnectionError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.refuse {
            return Err(ConnectionError::Connect {
                endpoint: "mock".to_string(),
                message: "connection refused".to_string(),
            });
        }
        let rx = self
            .messages
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| ConnectionError::Handshake("already connected".to_string()))?;
        Ok(Connection {
            session: self.session.clone(),
            messages: UnboundedReceiverStream::new(rx).boxed(),
        })
    }
}

/// Records writes and closes across every sink it opens.
#[derive(Default)]
pub struct RecordingOutput {
    pub writes: Arc<Mutex<Vec<(Instant, usize)>>>,
    pub closes: Arc<AtomicUsize>,
}

impl RecordingOutput {
    pub fn bytes_written(&self) -> usize {
        self.writes.lock().unwrap().iter().map(|(_, n)| n).sum()
    }

    pub fn first_write(&self) -> Option<Instant> {
        self.writes.lock().unwrap().first().map(|(t, _)| *t)
    }
}

impl AudioOutput for RecordingOutput {
    fn open(&self, _format: AudioFormat) -> Result<Box<dyn AudioSink>, SinkError> {
        Ok(Box::new(RecordingSink {
            writes: self.writes.clone(),
            closes: self.closes.clone(),
        }))
    }
}

struct RecordingSink {
    writes: Arc<Mutex<Vec<(Instant, usize)>>>,
    closes: Arc<AtomicUsize>,
}

impl AudioSink for RecordingSink {
    fn write(&mut self, pcm: &[u8]) -> Result<(), SinkError> {
        self.writes.lock().unwrap().push((Instant::now(), pcm.len()));
        Ok(())
    }

    fn close(&mut self) -> Result<(), SinkError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn chunk() -> ServerMessage {
    ServerMessage::AudioChunk(Bytes::from(vec![0x11u8; CHUNK_LEN]))
}

/// Send one audio chunk every `every`, forever or until the receiver is gone.
pub fn spawn_audio_feed(tx: ServerTx, every: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(every).await;
            if tx.send(Ok(chunk())).is_err() {
                break;
            }
        }
    })
}

/// Feed input lines at fixed offsets from now.
pub fn spawn_lines_at(
    tx: mpsc::Sender<String>,
    script: Vec<(Duration, &'static str)>,
) -> tokio::task::JoinHandle<mpsc::Sender<String>> {
    tokio::spawn(async move {
        let start = Instant::now();
        for (at, line) in script {
            tokio::time::sleep_until(start + at).await;
            let _ = tx.send(line.to_string()).await;
        }
        // Handed back so the input stays open
        tx
    })
}

/// Controller wired to a mock connector and a recording output.
pub struct Harness {
    pub connector: Arc<MockConnector>,
    pub server: ServerTx,
    pub output: Arc<RecordingOutput>,
    pub controller: SessionController,
    pub events: mpsc::UnboundedReceiver<SessionEvent>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(ControllerSettings::default())
    }

    pub fn with_settings(settings: ControllerSettings) -> Self {
        let (connector, server) = MockConnector::new();
        let output = Arc::new(RecordingOutput::default());
        let (events, rx) = EventSink::channel();
        let controller = SessionController::new(connector.clone(), output.clone(), settings)
            .with_events(events);
        Self {
            connector,
            server,
            output,
            controller,
            events: rx,
        }
    }

    pub fn session(&self) -> &RecordingSession {
        &self.connector.session
    }

    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

/// A line source plus the sender feeding it.
pub fn lines() -> (mpsc::Sender<String>, Box<ChannelLines>) {
    let (tx, source) = ChannelLines::pair(16);
    (tx, Box::new(source))
}
