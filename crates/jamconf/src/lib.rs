//! Minimal configuration loading for jamsession.
//!
//! # Where config comes from
//!
//! Each source overrides the ones before it:
//! 1. `/etc/jamsession/config.toml` (system)
//! 2. `~/.config/jamsession/config.toml` (user)
//! 3. `./jamsession.toml` (local override, or the `--config` path)
//! 4. Environment variables (`JAMSESSION_*`, `GOOGLE_API_KEY`, `USEVENV`, `RUST_LOG`)
//!
//! # Example Config
//!
//! ```toml
//! [paths]
//! download_dir = "~/Music/jam"
//! separated_dir = "~/Music/jam/stems"
//!
//! [session]
//! model = "models/lyria-realtime-exp"
//! max_play_secs = 30
//!
//! [audio]
//! sample_rate = 48000
//! channels = 2
//!
//! [separation]
//! interpreter = "/opt/anaconda3/envs/demucs-env/bin/python"
//! script = "separator.py"
//! model = "htdemucs_ft"
//!
//! [telemetry]
//! log_level = "info"
//! ```

pub mod infra;
pub mod loader;
pub mod session;

pub use infra::{AudioConfig, PathsConfig, TelemetryConfig};
pub use loader::{discover_config_files_with_override, expand_path, ConfigSources};
pub use session::{SeparationConfig, SessionConfig, DEFAULT_ENDPOINT, DEFAULT_MODEL};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Why a config file could not be used.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// Complete jamsession configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct JamConfig {
    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub audio: AudioConfig,

    #[serde(default)]
    pub separation: SeparationConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl JamConfig {
    /// Effective config from files and environment.
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load configuration with an optional explicit file that replaces `./jamsession.toml`.
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Like [`JamConfig::load_from`], also reporting which files and variables applied.
    pub fn load_with_sources_from(
        config_path: Option<&Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut config = JamConfig::default();

        for path in loader::discover_config_files_with_override(config_path) {
            loader::load_file_into(&mut config, &path)?;
            sources.files.push(path);
        }

        loader::apply_env_overrides(&mut config, &mut sources);

        Ok((config, sources))
    }

    /// Serialize config to TOML string. The API key is never written.
    pub fn to_toml(&self) -> String {
        let mut output = String::new();

        output.push_str("# jamsession configuration\n\n");

        output.push_str("[paths]\n");
        output.push_str(&format!(
            "download_dir = \"{}\"\n",
            self.paths.download_dir.display()
        ));
        output.push_str(&format!(
            "separated_dir = \"{}\"\n",
            self.paths.separated_dir.display()
        ));

        output.push_str("\n[session]\n");
        output.push_str(&format!("endpoint = \"{}\"\n", self.session.endpoint));
        output.push_str(&format!("model = \"{}\"\n", self.session.model));
        output.push_str(&format!("buffer_ms = {}\n", self.session.buffer_ms));
        output.push_str(&format!("warmup_ms = {}\n", self.session.warmup_ms));
        output.push_str(&format!("max_play_secs = {}\n", self.session.max_play_secs));
        output.push_str(&format!(
            "setup_timeout_ms = {}\n",
            self.session.setup_timeout_ms
        ));

        output.push_str("\n[audio]\n");
        output.push_str(&format!("sample_rate = {}\n", self.audio.sample_rate));
        output.push_str(&format!("channels = {}\n", self.audio.channels));
        output.push_str(&format!("frame_size = {}\n", self.audio.frame_size));
        output.push_str(&format!("playback = {}\n", self.audio.playback));

        output.push_str("\n[separation]\n");
        output.push_str(&format!("enabled = {}\n", self.separation.enabled));
        output.push_str(&format!(
            "interpreter = \"{}\"\n",
            self.separation.interpreter.display()
        ));
        output.push_str(&format!(
            "script = \"{}\"\n",
            self.separation.script.display()
        ));
        output.push_str(&format!("model = \"{}\"\n", self.separation.model));

        output.push_str("\n[telemetry]\n");
        output.push_str(&format!("log_level = \"{}\"\n", self.telemetry.log_level));

        output
    }
}
