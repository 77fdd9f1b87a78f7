//! Core value types shared by the parser, the protocol client and the controller.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Musical scale, as a major key paired with its relative minor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Scale {
    CMajorAMinor,
    DFlatMajorBFlatMinor,
    DMajorBMinor,
    EFlatMajorCMinor,
    EMajorDFlatMinor,
    FMajorDMinor,
    GFlatMajorEFlatMinor,
    GMajorEMinor,
    AFlatMajorFMinor,
    AMajorGFlatMinor,
    BFlatMajorGMinor,
    BMajorAFlatMinor,
}

impl Scale {
    /// Every scale, in menu order.
    pub const ALL: [Scale; 12] = [
        Scale::CMajorAMinor,
        Scale::DFlatMajorBFlatMinor,
        Scale::DMajorBMinor,
        Scale::EFlatMajorCMinor,
        Scale::EMajorDFlatMinor,
        Scale::FMajorDMinor,
        Scale::GFlatMajorEFlatMinor,
        Scale::GMajorEMinor,
        Scale::AFlatMajorFMinor,
        Scale::AMajorGFlatMinor,
        Scale::BFlatMajorGMinor,
        Scale::BMajorAFlatMinor,
    ];

    /// Wire name, e.g. `C_MAJOR_A_MINOR`.
    pub fn name(self) -> &'static str {
        match self {
            Scale::CMajorAMinor => "C_MAJOR_A_MINOR",
            Scale::DFlatMajorBFlatMinor => "D_FLAT_MAJOR_B_FLAT_MINOR",
            Scale::DMajorBMinor => "D_MAJOR_B_MINOR",
            Scale::EFlatMajorCMinor => "E_FLAT_MAJOR_C_MINOR",
            Scale::EMajorDFlatMinor => "E_MAJOR_D_FLAT_MINOR",
            Scale::FMajorDMinor => "F_MAJOR_D_MINOR",
            Scale::GFlatMajorEFlatMinor => "G_FLAT_MAJOR_E_FLAT_MINOR",
            Scale::GMajorEMinor => "G_MAJOR_E_MINOR",
            Scale::AFlatMajorFMinor => "A_FLAT_MAJOR_F_MINOR",
            Scale::AMajorGFlatMinor => "A_MAJOR_G_FLAT_MINOR",
            Scale::BFlatMajorGMinor => "B_FLAT_MAJOR_G_MINOR",
            Scale::BMajorAFlatMinor => "B_MAJOR_A_FLAT_MINOR",
        }
    }

    /// The `X_MAJOR` and `Y_MINOR` halves of the pair name.
    fn halves(self) -> (&'static str, &'static str) {
        let name = self.name();
        // Every name is `<major>_MAJOR_<minor>_MINOR`
        let split = name.find("_MAJOR").map(|i| i + "_MAJOR".len()).unwrap_or(0);
        (&name[..split], name[split..].trim_start_matches('_'))
    }

    /// Look up a scale by name, ignoring case and surrounding whitespace.
    ///
    /// Either half of a pair selects it: `c_major` and `A_MINOR` both give
    /// [`Scale::CMajorAMinor`].
    pub fn lookup(name: &str) -> Option<Scale> {
        let wanted = name.trim().to_uppercase();
        if wanted.is_empty() {
            return None;
        }
        Scale::ALL.into_iter().find(|scale| {
            let (major, minor) = scale.halves();
            scale.name() == wanted || major == wanted || minor == wanted
        })
    }
}

impl fmt::Display for Scale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Tempo and scale steering. `None` leaves the choice to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub bpm: Option<u16>,
    pub scale: Option<Scale>,
}

impl GenerationConfig {
    pub fn new(bpm: Option<u16>, scale: Option<Scale>) -> Self {
        Self { bpm, scale }
    }
}

/// One text prompt with its relative weight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightedPrompt {
    pub text: String,
    pub weight: f32,
}

impl WeightedPrompt {
    pub fn new(text: impl Into<String>, weight: f32) -> Self {
        Self {
            text: text.into(),
            weight,
        }
    }
}

/// What the generation service can send us once the session is up.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    /// Raw 16-bit little-endian interleaved PCM.
    AudioChunk(Bytes),
    /// A prompt was rejected by content moderation. Generation continues.
    FilteredPrompt(String),
}

/// Lifecycle of one controller run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connected,
    Playing,
    Paused,
    Stopped,
    Finalized,
}

/// Why a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The user typed `q`.
    UserQuit,
    /// The playback cap elapsed.
    AutoStop,
    /// The input source reached end of file.
    InputClosed,
    /// The server closed the stream or it failed.
    StreamEnded,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StopReason::UserQuit => "user quit",
            StopReason::AutoStop => "auto-stop",
            StopReason::InputClosed => "input closed",
            StopReason::StreamEnded => "stream ended",
        };
        f.write_str(s)
    }
}

/// PCM layout of the stream and of the saved artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
    /// Frames per device buffer.
    pub frame_size: u32,
}

impl AudioFormat {
    pub const BITS_PER_SAMPLE: u16 = 16;

    pub fn bytes_per_frame(&self) -> usize {
        self.channels as usize * (Self::BITS_PER_SAMPLE as usize / 8)
    }

    /// Interleaved samples (all channels) covering `span`.
    pub fn samples_for(&self, span: Duration) -> usize {
        let frames = (self.sample_rate as u128 * span.as_millis()) / 1000;
        frames as usize * self.channels as usize
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            channels: 2,
            frame_size: 4200,
        }
    }
}

impl From<&jamconf::AudioConfig> for AudioFormat {
    fn from(config: &jamconf::AudioConfig) -> Self {
        Self {
            sample_rate: config.sample_rate,
            channels: config.channels,
            frame_size: config.frame_size,
        }
    }
}

/// User-facing notices emitted while a session runs.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Loops are running; commands are accepted after the warm-up.
    Started,
    /// Warm-up finished, the send loop is reading input.
    AcceptingInput,
    /// A command was rejected; the text is a one-line correction.
    Hint(String),
    PromptFiltered(String),
    ConfigChanged(GenerationConfig),
    PromptsChanged(Vec<WeightedPrompt>),
    Playing,
    Paused,
    /// The user asked to keep the performance.
    SaveRequested,
    AutoStopped,
    Stopped(StopReason),
    Saved(PathBuf),
    NothingCaptured,
}
