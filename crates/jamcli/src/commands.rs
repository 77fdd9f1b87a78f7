//! Subcommand implementations.

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use jamconf::{ConfigSources, JamConfig};
use jamsession::{
    default_output, timestamped_file_name, ArtifactId, Capture, CommandSet, ConnectionError,
    ControllerSettings, EventSink, Finalized, GenerationConfig, LineSource, LyriaConnector, NoInput,
    Scale, SeparationHandoff, SessionController, SessionEvent, SessionRequest, StdinLines,
    StemStatus,
};
use owo_colors::OwoColorize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::prompts;
use crate::render;

/// A controller wired to the real service, plus its event stream.
struct Session {
    controller: SessionController,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    cap: Duration,
}

impl Session {
    fn connect(config: &JamConfig, commands: CommandSet) -> Result<Self> {
        if config.session.api_key.is_none() {
            return Err(ConnectionError::MissingApiKey)
                .context("Set GOOGLE_API_KEY or session.api_key in the config file");
        }

        let connector = Arc::new(LyriaConnector::from_config(&config.session));
        let output = default_output(&config.audio);
        let (events, rx) = EventSink::channel();
        let settings = ControllerSettings::from_config(config, commands);
        let cap = settings.max_play;
        let controller = SessionController::new(connector, output, settings).with_events(events);

        Ok(Self {
            controller,
            events: rx,
            cap,
        })
    }

    /// Run to completion, printing events as they arrive. Ctrl-C quits the
    /// session; once the session is over it exits the process.
    async fn run(
        &mut self,
        request: SessionRequest,
        input: Box<dyn LineSource>,
    ) -> Result<Capture> {
        let shutdown = self.controller.shutdown_token();
        let finished = CancellationToken::new();
        // Stays alive past the run: SIGINT is ours from here on.
        tokio::spawn(watch_interrupts(shutdown, finished.clone()));

        let result = {
            let run = self.controller.run(request, input);
            tokio::pin!(run);
            loop {
                tokio::select! {
                    result = &mut run => break result,
                    Some(event) = self.events.recv() => render::event(&event, self.cap),
                }
            }
        };
        finished.cancel();
        self.flush();

        Ok(result.context("Session failed")?)
    }

    fn flush(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            render::event(&event, self.cap);
        }
    }

    fn finalize(&mut self, capture: Capture, destination: Option<&Path>) -> Result<Finalized> {
        let finalized = capture
            .finalize(destination)
            .context("Failed to write artifact")?;
        self.flush();
        Ok(finalized)
    }
}

/// What a Ctrl-C means at this point of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interrupt {
    StopSession,
    AlreadyStopping,
    Exit,
}

fn interrupt(shutdown: &CancellationToken, finished: &CancellationToken) -> Interrupt {
    if finished.is_cancelled() {
        Interrupt::Exit
    } else if shutdown.is_cancelled() {
        Interrupt::AlreadyStopping
    } else {
        shutdown.cancel();
        Interrupt::StopSession
    }
}

async fn watch_interrupts(shutdown: CancellationToken, finished: CancellationToken) {
    while tokio::signal::ctrl_c().await.is_ok() {
        match interrupt(&shutdown, &finished) {
            Interrupt::StopSession => info!("interrupted, stopping session"),
            Interrupt::AlreadyStopping => {}
            Interrupt::Exit => {
                println!();
                std::process::exit(130);
            }
        }
    }
}

pub async fn play(config: &JamConfig) -> Result<ExitCode> {
    let mut input = StdinLines::spawn().context("Failed to read stdin")?;
    let mut session = Session::connect(config, CommandSet::Interactive)?;

    let setup = prompts::ask_session_setup(&mut input).await;
    let request = SessionRequest::single(
        GenerationConfig::new(Some(setup.bpm), Some(setup.scale)),
        setup.prompt,
    );

    let mut capture = session.run(request, Box::new(input)).await?;

    let keep = if capture.is_empty() {
        false
    } else if capture.save_requested() {
        true
    } else {
        match capture.take_input() {
            Some(mut input) => {
                prompts::confirm(input.as_mut(), "Save this performance to disk? [y/n]").await
            }
            None => false,
        }
    };

    let destination = keep.then(|| {
        config
            .paths
            .download_dir
            .join(timestamped_file_name(chrono::Local::now()))
    });

    match session.finalize(capture, destination.as_deref())? {
        Finalized::Saved { .. } => Ok(ExitCode::SUCCESS),
        Finalized::Discarded { bytes } => {
            println!("Discarded {} bytes of audio", bytes);
            Ok(ExitCode::FAILURE)
        }
        Finalized::NothingCaptured => Ok(ExitCode::FAILURE),
    }
}

pub struct GenerateArgs {
    pub bpm: Option<u16>,
    pub scale: Option<String>,
    pub prompt: String,
    pub conversation: String,
    pub message: String,
    pub no_input: bool,
}

pub async fn generate(config: &JamConfig, args: GenerateArgs) -> Result<ExitCode> {
    let scale = args
        .scale
        .as_deref()
        .map(|name| {
            Scale::lookup(name).with_context(|| format!("Unknown scale '{}', see `jam scales`", name))
        })
        .transpose()?;

    let input: Box<dyn LineSource> = if args.no_input {
        Box::new(NoInput)
    } else {
        Box::new(StdinLines::spawn().context("Failed to read stdin")?)
    };

    let mut session = Session::connect(config, CommandSet::Server)?;
    let request = SessionRequest::single(GenerationConfig::new(args.bpm, scale), args.prompt);
    let capture = session.run(request, input).await?;

    let id = ArtifactId::new(args.conversation, args.message);
    let destination = config.paths.download_dir.join(id.file_name());

    match session.finalize(capture, Some(&destination))? {
        Finalized::Saved { path, bytes } => {
            info!(path = %path.display(), bytes, "artifact ready for separation");
            if config.separation.enabled {
                let handoff = SeparationHandoff::from_config(config);
                match handoff.dispatch(&path) {
                    Some(pid) => println!("{} (pid {})", "Stem separation started".bright_cyan(), pid),
                    None => println!("{}", "Stem separation could not be started".yellow()),
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        _ => Ok(ExitCode::FAILURE),
    }
}

pub async fn stems(
    config: &JamConfig,
    conversation: &str,
    message: &str,
    wait: Option<u64>,
) -> Result<ExitCode> {
    let input = config
        .paths
        .download_dir
        .join(ArtifactId::new(conversation, message).file_name());
    let layout = SeparationHandoff::from_config(config).layout_for(&input);

    let status = match wait {
        Some(secs) => {
            layout
                .wait_for_stems(Duration::from_secs(1), Duration::from_secs(secs))
                .await
        }
        None => layout.status(),
    };

    println!("{} {}", "Stems:".bold(), layout.dir().display());
    for path in layout.stem_paths() {
        if path.is_file() {
            println!("  {} {}", "✓".green(), path.display());
        } else {
            println!("  {} {}", "·".dimmed(), path.display());
        }
    }

    match status {
        StemStatus::Complete => {
            println!("{}", "complete".bright_green());
            Ok(ExitCode::SUCCESS)
        }
        StemStatus::Partial(n) => {
            println!("{}", format!("{} of {} ready", n, jamsession::STEMS.len()).yellow());
            Ok(ExitCode::FAILURE)
        }
        StemStatus::Pending => {
            println!("{}", "pending".yellow());
            Ok(ExitCode::FAILURE)
        }
    }
}

pub fn show_config(config: &JamConfig, sources: &ConfigSources) {
    if sources.files.is_empty() {
        println!("# Loaded from: defaults only");
    } else {
        for path in &sources.files {
            println!("# Loaded from: {}", path.display());
        }
    }
    for var in &sources.env_overrides {
        println!("# Env override: {}", var);
    }
    println!();
    print!("{}", config.to_toml());
}

pub fn list_scales() {
    for scale in Scale::ALL {
        println!("{}", scale.name());
    }
}
