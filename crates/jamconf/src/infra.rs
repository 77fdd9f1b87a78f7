//! Infrastructure configuration - paths, audio device format, telemetry.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Filesystem locations for artifacts and separated stems.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Where captured WAV artifacts are written.
    /// Default: ./MusicDownloadFiles
    #[serde(default = "PathsConfig::default_download_dir")]
    pub download_dir: PathBuf,

    /// Root directory the separation tool writes stems into.
    /// Default: ./separated_music
    #[serde(default = "PathsConfig::default_separated_dir")]
    pub separated_dir: PathBuf,
}

impl PathsConfig {
    fn default_download_dir() -> PathBuf {
        PathBuf::from("MusicDownloadFiles")
    }

    fn default_separated_dir() -> PathBuf {
        PathBuf::from("separated_music")
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            download_dir: Self::default_download_dir(),
            separated_dir: Self::default_separated_dir(),
        }
    }
}

/// Output device format. The generation service streams 16-bit PCM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Default: 48000
    #[serde(default = "AudioConfig::default_sample_rate")]
    pub sample_rate: u32,

    /// Default: 2
    #[serde(default = "AudioConfig::default_channels")]
    pub channels: u16,

    /// Frames per device buffer.
    /// Default: 4200
    #[serde(default = "AudioConfig::default_frame_size")]
    pub frame_size: u32,

    /// Use the PipeWire output when the binary was built with it.
    /// Default: true
    #[serde(default = "AudioConfig::default_playback")]
    pub playback: bool,
}

impl AudioConfig {
    fn default_sample_rate() -> u32 {
        48_000
    }

    fn default_channels() -> u16 {
        2
    }

    fn default_frame_size() -> u32 {
        4200
    }

    fn default_playback() -> bool {
        true
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: Self::default_sample_rate(),
            channels: Self::default_channels(),
            frame_size: Self::default_frame_size(),
            playback: Self::default_playback(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level or EnvFilter directive (trace, debug, info, warn, error).
    /// Default: warn
    #[serde(default = "TelemetryConfig::default_log_level")]
    pub log_level: String,
}

impl TelemetryConfig {
    fn default_log_level() -> String {
        "warn".to_string()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
        }
    }
}
