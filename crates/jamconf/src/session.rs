//! Session and separation settings - the knobs of a generation run.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default realtime music model.
pub const DEFAULT_MODEL: &str = "models/lyria-realtime-exp";

/// Default BidiGenerateMusic WebSocket endpoint (api key appended at connect).
pub const DEFAULT_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1alpha.GenerativeService.BidiGenerateMusic";

/// Streaming session settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// API key. Usually supplied through `GOOGLE_API_KEY`, never written by `to_toml`.
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,

    #[serde(default = "SessionConfig::default_endpoint")]
    pub endpoint: String,

    #[serde(default = "SessionConfig::default_model")]
    pub model: String,

    /// Jitter margin before the first audio chunk is played.
    /// Default: 1000
    #[serde(default = "SessionConfig::default_buffer_ms")]
    pub buffer_ms: u64,

    /// Delay before the first user command is accepted.
    /// Default: 5000
    #[serde(default = "SessionConfig::default_warmup_ms")]
    pub warmup_ms: u64,

    /// Hard cap on continuous playback per play period.
    /// Default: 30
    #[serde(default = "SessionConfig::default_max_play_secs")]
    pub max_play_secs: u64,

    /// How long to wait for the server's setup acknowledgement.
    /// Default: 10000
    #[serde(default = "SessionConfig::default_setup_timeout_ms")]
    pub setup_timeout_ms: u64,
}

impl SessionConfig {
    fn default_endpoint() -> String {
        DEFAULT_ENDPOINT.to_string()
    }

    fn default_model() -> String {
        DEFAULT_MODEL.to_string()
    }

    fn default_buffer_ms() -> u64 {
        1000
    }

    fn default_warmup_ms() -> u64 {
        5000
    }

    fn default_max_play_secs() -> u64 {
        30
    }

    fn default_setup_timeout_ms() -> u64 {
        10_000
    }

    pub fn buffer_delay(&self) -> Duration {
        Duration::from_millis(self.buffer_ms)
    }

    pub fn warmup_delay(&self) -> Duration {
        Duration::from_millis(self.warmup_ms)
    }

    pub fn max_play(&self) -> Duration {
        Duration::from_secs(self.max_play_secs)
    }

    pub fn setup_timeout(&self) -> Duration {
        Duration::from_millis(self.setup_timeout_ms)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            endpoint: Self::default_endpoint(),
            model: Self::default_model(),
            buffer_ms: Self::default_buffer_ms(),
            warmup_ms: Self::default_warmup_ms(),
            max_play_secs: Self::default_max_play_secs(),
            setup_timeout_ms: Self::default_setup_timeout_ms(),
        }
    }
}

/// Stem separation handoff settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeparationConfig {
    /// Skip the handoff entirely when false.
    #[serde(default = "SeparationConfig::default_enabled")]
    pub enabled: bool,

    /// Python interpreter inside the environment that has the separator installed.
    /// Default: /opt/anaconda3/envs/demucs-env/bin/python
    #[serde(default = "SeparationConfig::default_interpreter")]
    pub interpreter: PathBuf,

    /// Separator script, invoked as `<interpreter> <script> <input> <output_dir>`.
    /// Default: ./separator.py
    #[serde(default = "SeparationConfig::default_script")]
    pub script: PathBuf,

    /// Model name; the separator writes into `<output_dir>/<model>/...`.
    /// Default: htdemucs_ft
    #[serde(default = "SeparationConfig::default_model")]
    pub model: String,
}

impl SeparationConfig {
    fn default_enabled() -> bool {
        true
    }

    pub(crate) fn default_interpreter() -> PathBuf {
        PathBuf::from("/opt/anaconda3/envs/demucs-env/bin/python")
    }

    /// Interpreter inside a project-local `./venv`.
    pub(crate) fn venv_interpreter() -> PathBuf {
        PathBuf::from("venv/bin/python")
    }

    fn default_script() -> PathBuf {
        PathBuf::from("separator.py")
    }

    fn default_model() -> String {
        "htdemucs_ft".to_string()
    }
}

impl Default for SeparationConfig {
    fn default() -> Self {
        Self {
            enabled: Self::default_enabled(),
            interpreter: Self::default_interpreter(),
            script: Self::default_script(),
            model: Self::default_model(),
        }
    }
}
