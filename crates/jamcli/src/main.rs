//! jam - realtime generative music from the terminal
//!
//! Subcommands:
//! - `jam play` - Ask for tempo, scale and prompt, jam, then offer to save
//! - `jam generate` - Jam for a chat message, save, and split into stems
//! - `jam stems` - Report stem separation progress for a saved take
//! - `jam config` - Print the effective configuration
//! - `jam scales` - List the scales the model understands

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

mod commands;
mod prompts;
mod render;

#[derive(Parser)]
#[command(name = "jam")]
#[command(about = "Realtime generative music sessions")]
#[command(version)]
struct Cli {
    /// Config file to load instead of ./jamsession.toml
    #[arg(long, global = true, env = "JAMSESSION_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive session: pick tempo, scale and prompt, then steer live
    Play,
    /// Session tied to a chat message; always saved, then separated
    Generate {
        /// Tempo in BPM; omit to let the model choose
        #[arg(long)]
        bpm: Option<u16>,
        /// Scale name (see `jam scales`); omit to let the model choose
        #[arg(long)]
        scale: Option<String>,
        /// Initial prompt
        #[arg(long, default_value = "Piano")]
        prompt: String,
        /// Conversation id used in the artifact name
        #[arg(long)]
        conversation: String,
        /// Message id used in the artifact name
        #[arg(long)]
        message: String,
        /// Ignore stdin and let the playback cap end the session
        #[arg(long)]
        no_input: bool,
    },
    /// Show stem separation status for a generated take
    Stems {
        #[arg(long)]
        conversation: String,
        #[arg(long)]
        message: String,
        /// Keep polling up to this many seconds for the stems to appear
        #[arg(long)]
        wait: Option<u64>,
    },
    /// Print the effective configuration and where it came from
    Config,
    /// List scale names
    Scales,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let (config, sources) = jamconf::JamConfig::load_with_sources_from(cli.config.as_deref())
        .context("Failed to load configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_new(&config.telemetry.log_level)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Play => commands::play(&config).await,
        Commands::Generate {
            bpm,
            scale,
            prompt,
            conversation,
            message,
            no_input,
        } => {
            let args = commands::GenerateArgs {
                bpm,
                scale,
                prompt,
                conversation,
                message,
                no_input,
            };
            commands::generate(&config, args).await
        }
        Commands::Stems {
            conversation,
            message,
            wait,
        } => commands::stems(&config, &conversation, &message, wait).await,
        Commands::Config => {
            commands::show_config(&config, &sources);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Scales => {
            commands::list_scales();
            Ok(ExitCode::SUCCESS)
        }
    }
}
