//! The session controller.
//!
//! ```text
//!   Idle ──connect──► Connected ──config, prompts, play──► Playing ⇄ Paused
//!                                                              │
//!                               quit / auto-stop / EOF / stream end
//!                                                              ▼
//!                                      Finalized ◄──finalize── Stopped
//! ```
//!
//! A run fans out into a receive loop (server audio → sink + PCM buffer) and
//! a send loop (input lines → session calls), plus the auto-stop timer owned
//! by the send loop. Whichever loop settles first wins; the other is cancelled
//! and joined before the session is closed, so nothing is left running when
//! [`SessionController::run`] returns its [`Capture`].

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::artifact::{write_wav, PcmBuffer};
use crate::command::{parse_command, Command, CommandSet};
use crate::error::{ArtifactError, ControllerError, SessionError};
use crate::events::{EventSink, StateCell};
use crate::input::LineSource;
use crate::protocol::{Connection, Connector, MessageStream, MusicSession};
use crate::sink::{AudioOutput, SinkGuard};
use crate::timer::TimerSlot;
use crate::types::{
    AudioFormat, GenerationConfig, ServerMessage, SessionEvent, SessionState, StopReason,
    WeightedPrompt,
};

/// Timing and format knobs for a run.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerSettings {
    pub model: String,
    /// Wait before writing the first audio chunk.
    pub buffer_delay: Duration,
    /// Wait before the first input line is read.
    pub warmup: Duration,
    /// Playback cap per play period.
    pub max_play: Duration,
    pub format: AudioFormat,
    pub commands: CommandSet,
}

impl ControllerSettings {
    pub fn from_config(config: &jamconf::JamConfig, commands: CommandSet) -> Self {
        Self {
            model: config.session.model.clone(),
            buffer_delay: config.session.buffer_delay(),
            warmup: config.session.warmup_delay(),
            max_play: config.session.max_play(),
            format: AudioFormat::from(&config.audio),
            commands,
        }
    }
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self::from_config(&jamconf::JamConfig::default(), CommandSet::Interactive)
    }
}

/// What to start playing.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRequest {
    pub config: GenerationConfig,
    pub prompts: Vec<WeightedPrompt>,
}

impl SessionRequest {
    pub fn new(config: GenerationConfig, prompts: Vec<WeightedPrompt>) -> Self {
        Self { config, prompts }
    }

    /// One prompt at weight 1.0.
    pub fn single(config: GenerationConfig, prompt: impl Into<String>) -> Self {
        Self::new(config, vec![WeightedPrompt::new(prompt, 1.0)])
    }
}

/// Drives one generation session from connect to capture.
pub struct SessionController {
    connector: Arc<dyn Connector>,
    output: Arc<dyn AudioOutput>,
    settings: ControllerSettings,
    events: EventSink,
    state: StateCell,
    shutdown: CancellationToken,
}

impl SessionController {
    pub fn new(
        connector: Arc<dyn Connector>,
        output: Arc<dyn AudioOutput>,
        settings: ControllerSettings,
    ) -> Self {
        Self {
            connector,
            output,
            settings,
            events: EventSink::disabled(),
            state: StateCell::new(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    pub fn settings(&self) -> &ControllerSettings {
        &self.settings
    }

    /// Observe state transitions.
    pub fn state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Cancelling this stops a running session as if the user had quit.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run a session to completion.
    ///
    /// Only connection and startup failures are returned as errors. Every
    /// other problem is logged by the loop that hit it and ends, at worst,
    /// in an early stop.
    pub async fn run(
        &self,
        request: SessionRequest,
        input: Box<dyn LineSource>,
    ) -> Result<Capture, ControllerError> {
        let run_id = Uuid::new_v4();
        let span = info_span!("session", session.id = %run_id);
        self.run_inner(request, input).instrument(span).await
    }

    async fn run_inner(
        &self,
        request: SessionRequest,
        input: Box<dyn LineSource>,
    ) -> Result<Capture, ControllerError> {
        let settings = &self.settings;
        self.state.set(SessionState::Idle);

        let Connection { session, messages } = self.connector.connect(&settings.model).await?;
        self.state.set(SessionState::Connected);
        let guard = SessionGuard::new(Arc::clone(&session));

        if let Err(e) = start_playback(session.as_ref(), &request).await {
            error!(error = %e, "session startup failed");
            guard.release().await;
            self.state.set(SessionState::Stopped);
            return Err(ControllerError::Startup(e));
        }
        self.state.set(SessionState::Playing);
        self.events.emit(SessionEvent::Started);
        info!(
            bpm = ?request.config.bpm,
            scale = ?request.config.scale,
            prompts = request.prompts.len(),
            "playback started"
        );

        let recv_token = CancellationToken::new();
        let send_token = CancellationToken::new();

        let mut timers = TimerSlot::new(
            settings.max_play,
            Arc::clone(&session),
            send_token.clone(),
            self.events.clone(),
        );
        timers.replace();

        let receiver = ReceiveLoop {
            messages,
            output: Arc::clone(&self.output),
            format: settings.format,
            buffer_delay: settings.buffer_delay,
            token: recv_token.clone(),
            events: self.events.clone(),
        };
        let sender = SendLoop {
            session: Arc::clone(&session),
            input,
            commands: settings.commands,
            warmup: settings.warmup,
            config: request.config,
            timers,
            token: send_token.clone(),
            events: self.events.clone(),
            state: self.state.clone(),
        };

        let mut recv_task = tokio::spawn(receiver.run().in_current_span());
        let mut send_task = tokio::spawn(sender.run().in_current_span());

        let first = tokio::select! {
            received = &mut recv_task => First::Receive(received),
            sent = &mut send_task => First::Send(sent),
            _ = self.shutdown.cancelled() => First::Shutdown,
        };

        let (received, sent, reason) = match first {
            First::Receive(received) => {
                debug!("receive loop settled first, cancelling send loop");
                send_token.cancel();
                (received, send_task.await, StopReason::StreamEnded)
            }
            First::Send(sent) => {
                debug!("send loop settled first, cancelling receive loop");
                recv_token.cancel();
                let reason = sent
                    .as_ref()
                    .ok()
                    .and_then(|outcome| outcome.reason)
                    .unwrap_or(StopReason::StreamEnded);
                (recv_task.await, sent, reason)
            }
            First::Shutdown => {
                info!("shutdown requested");
                if let Err(e) = session.stop().await {
                    warn!(error = %e, "stop on shutdown failed");
                }
                send_token.cancel();
                recv_token.cancel();
                (recv_task.await, send_task.await, StopReason::UserQuit)
            }
        };

        let received = received.unwrap_or_else(|e| {
            error!(error = %e, "receive loop did not settle cleanly");
            ReceiveOutcome::default()
        });
        let (save_requested, config, input) = match sent {
            Ok(outcome) => (outcome.save_requested, outcome.config, Some(outcome.input)),
            Err(e) => {
                error!(error = %e, "send loop did not settle cleanly");
                (false, request.config, None)
            }
        };

        guard.release().await;
        self.state.set(SessionState::Stopped);
        self.events.emit(SessionEvent::Stopped(reason));
        info!(
            %reason,
            chunks = received.chunks,
            bytes = received.pcm.len(),
            "session stopped"
        );

        Ok(Capture {
            pcm: received.pcm,
            chunks: received.chunks,
            reason,
            save_requested,
            config,
            format: settings.format,
            input,
            state: self.state.clone(),
            events: self.events.clone(),
        })
    }
}

enum First {
    Receive(Result<ReceiveOutcome, tokio::task::JoinError>),
    Send(Result<SendOutcome, tokio::task::JoinError>),
    Shutdown,
}

/// Initial config, prompts, then play. All three must succeed.
async fn start_playback(
    session: &dyn MusicSession,
    request: &SessionRequest,
) -> Result<(), SessionError> {
    session.set_config(&request.config).await?;
    session.set_prompts(&request.prompts).await?;
    session.play().await
}

/// Closes the session exactly once: explicitly via `release`, or from `Drop`.
struct SessionGuard {
    session: Option<Arc<dyn MusicSession>>,
}

impl SessionGuard {
    fn new(session: Arc<dyn MusicSession>) -> Self {
        Self {
            session: Some(session),
        }
    }

    async fn release(mut self) {
        if let Some(session) = self.session.take() {
            if let Err(e) = session.close().await {
                warn!(error = %e, "failed to close session");
            }
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = session.close().await {
                        warn!(error = %e, "deferred session close failed");
                    }
                });
            }
            Err(_) => warn!("session dropped outside a runtime, not closed"),
        }
    }
}

#[derive(Debug, Default)]
struct ReceiveOutcome {
    pcm: PcmBuffer,
    chunks: usize,
}

struct ReceiveLoop {
    messages: MessageStream,
    output: Arc<dyn AudioOutput>,
    format: AudioFormat,
    buffer_delay: Duration,
    token: CancellationToken,
    events: EventSink,
}

impl ReceiveLoop {
    async fn run(mut self) -> ReceiveOutcome {
        let mut outcome = ReceiveOutcome::default();

        let mut sink = match self.output.open(self.format) {
            Ok(sink) => Some(SinkGuard::new(sink)),
            Err(e) => {
                warn!(error = %e, "audio output unavailable, capturing without playback");
                None
            }
        };
        let mut buffered = false;

        loop {
            let message = tokio::select! {
                biased;
                _ = self.token.cancelled() => {
                    debug!("receive loop cancelled");
                    break;
                }
                message = self.messages.next() => message,
            };

            match message {
                None => {
                    info!("server stream ended");
                    break;
                }
                Some(Err(SessionError::Protocol(message))) => {
                    warn!(error = %message, "skipping undecodable server frame");
                }
                Some(Err(e)) => {
                    warn!(error = %e, "server stream failed");
                    break;
                }
                Some(Ok(ServerMessage::FilteredPrompt(text))) => {
                    warn!(prompt = %text, "prompt filtered by the server");
                    self.events.emit(SessionEvent::PromptFiltered(text));
                }
                Some(Ok(ServerMessage::AudioChunk(data))) => {
                    if !buffered {
                        debug!(delay = ?self.buffer_delay, "buffering before first write");
                        tokio::select! {
                            biased;
                            _ = self.token.cancelled() => break,
                            _ = tokio::time::sleep(self.buffer_delay) => {}
                        }
                        buffered = true;
                    }

                    let write_error = sink.as_mut().and_then(|guard| guard.write(&data).err());
                    if let Some(e) = write_error {
                        warn!(error = %e, "audio write failed, continuing without playback");
                        if let Some(guard) = sink.take() {
                            guard.close();
                        }
                    }
                    outcome.pcm.append(&data);
                    outcome.chunks += 1;
                }
            }
        }

        if let Some(guard) = sink {
            guard.close();
        }
        debug!(
            chunks = outcome.chunks,
            bytes = outcome.pcm.len(),
            "receive loop finished"
        );
        outcome
    }
}

struct SendOutcome {
    /// `None` when the loop was cancelled by the supervisor.
    reason: Option<StopReason>,
    save_requested: bool,
    config: GenerationConfig,
    input: Box<dyn LineSource>,
}

enum Flow {
    Continue,
    Stop(StopReason),
}

struct SendLoop {
    session: Arc<dyn MusicSession>,
    input: Box<dyn LineSource>,
    commands: CommandSet,
    warmup: Duration,
    config: GenerationConfig,
    timers: TimerSlot,
    token: CancellationToken,
    events: EventSink,
    state: StateCell,
}

impl SendLoop {
    async fn run(mut self) -> SendOutcome {
        let mut save_requested = false;
        let reason = self
            .drive(&mut save_requested)
            .await
            .or_else(|| self.timers.fired().then_some(StopReason::AutoStop));
        self.timers.cancel();

        SendOutcome {
            reason,
            save_requested,
            config: self.config,
            input: self.input,
        }
    }

    async fn drive(&mut self, save_requested: &mut bool) -> Option<StopReason> {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => return None,
            _ = tokio::time::sleep(self.warmup) => {}
        }
        self.events.emit(SessionEvent::AcceptingInput);

        loop {
            let line = tokio::select! {
                biased;
                _ = self.token.cancelled() => return None,
                line = self.input.next_line() => line,
            };

            let Some(line) = line else {
                info!("input closed, stopping");
                self.quit().await;
                return Some(StopReason::InputClosed);
            };

            let Some(command) = parse_command(&line, self.commands) else {
                continue;
            };

            match self.dispatch(command, save_requested).await {
                Ok(Flow::Continue) => {}
                Ok(Flow::Stop(reason)) => return Some(reason),
                Err(e) if e.is_closed() => {
                    warn!("session closed, send loop ending");
                    return Some(StopReason::StreamEnded);
                }
                Err(e) => warn!(error = %e, "command failed"),
            }
        }
    }

    async fn dispatch(
        &mut self,
        command: Command,
        save_requested: &mut bool,
    ) -> Result<Flow, SessionError> {
        match command {
            Command::Quit => {
                info!("quit requested");
                self.quit().await;
                return Ok(Flow::Stop(StopReason::UserQuit));
            }
            Command::Play => {
                self.session.play().await?;
                let timer = self.timers.replace();
                debug!(timer.id = timer, "playing");
                self.state.set(SessionState::Playing);
                self.events.emit(SessionEvent::Playing);
            }
            Command::Pause => {
                self.session.pause().await?;
                self.timers.cancel();
                self.state.set(SessionState::Paused);
                self.events.emit(SessionEvent::Paused);
            }
            Command::Save => {
                *save_requested = true;
                self.events.emit(SessionEvent::SaveRequested);
            }
            Command::SetTempo(bpm) => {
                self.config.bpm = bpm;
                self.push_config().await?;
            }
            Command::SetScale(scale) => {
                self.config.scale = scale;
                self.push_config().await?;
            }
            Command::SetPrompts(prompts) => {
                self.session.set_prompts(&prompts).await?;
                debug!(count = prompts.len(), "prompts replaced");
                self.events.emit(SessionEvent::PromptsChanged(prompts));
            }
            Command::Invalid(hint) => {
                warn!(hint = %hint, "rejected command");
                self.events.emit(SessionEvent::Hint(hint));
            }
        }
        Ok(Flow::Continue)
    }

    async fn push_config(&mut self) -> Result<(), SessionError> {
        self.session.set_config(&self.config).await?;
        self.session.reset_context().await?;
        info!(bpm = ?self.config.bpm, scale = ?self.config.scale, "config updated");
        self.events.emit(SessionEvent::ConfigChanged(self.config));
        Ok(())
    }

    async fn quit(&mut self) {
        if let Err(e) = self.session.stop().await {
            warn!(error = %e, "stop failed");
        }
        self.timers.cancel();
    }
}

/// How a run was finalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Finalized {
    Saved { path: PathBuf, bytes: usize },
    /// No audio arrived. No file is written.
    NothingCaptured,
    /// Audio arrived but the caller chose not to keep it.
    Discarded { bytes: usize },
}

/// Everything a stopped run produced.
pub struct Capture {
    pcm: PcmBuffer,
    chunks: usize,
    reason: StopReason,
    save_requested: bool,
    config: GenerationConfig,
    format: AudioFormat,
    input: Option<Box<dyn LineSource>>,
    state: StateCell,
    events: EventSink,
}

impl std::fmt::Debug for Capture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capture")
            .field("bytes", &self.pcm.len())
            .field("chunks", &self.chunks)
            .field("reason", &self.reason)
            .field("save_requested", &self.save_requested)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Capture {
    pub fn pcm(&self) -> &PcmBuffer {
        &self.pcm
    }

    pub fn is_empty(&self) -> bool {
        self.pcm.is_empty()
    }

    pub fn chunks(&self) -> usize {
        self.chunks
    }

    pub fn reason(&self) -> StopReason {
        self.reason
    }

    /// Whether `save` was typed during the run.
    pub fn save_requested(&self) -> bool {
        self.save_requested
    }

    /// Generation config as last pushed by the send loop.
    pub fn final_config(&self) -> GenerationConfig {
        self.config
    }

    pub fn duration(&self) -> Duration {
        self.pcm.duration(&self.format)
    }

    /// Hand the input source back, for questions asked after the run.
    pub fn take_input(&mut self) -> Option<Box<dyn LineSource>> {
        self.input.take()
    }

    /// Write the capture to `destination`, or discard it when `None`.
    pub fn finalize(self, destination: Option<&Path>) -> Result<Finalized, ArtifactError> {
        let outcome = if self.pcm.is_empty() {
            info!("nothing captured, no artifact written");
            self.events.emit(SessionEvent::NothingCaptured);
            Finalized::NothingCaptured
        } else {
            match destination {
                Some(path) => {
                    let bytes = write_wav(path, &self.pcm, &self.format)?;
                    self.events.emit(SessionEvent::Saved(path.to_path_buf()));
                    Finalized::Saved {
                        path: path.to_path_buf(),
                        bytes,
                    }
                }
                None => {
                    debug!(bytes = self.pcm.len(), "capture discarded");
                    Finalized::Discarded {
                        bytes: self.pcm.len(),
                    }
                }
            }
        };
        self.state.set(SessionState::Finalized);
        Ok(outcome)
    }
}
