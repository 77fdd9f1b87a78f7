//! Captured audio and the WAV files made from it.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Local};
use tracing::{debug, info};

use crate::error::ArtifactError;
use crate::types::AudioFormat;

/// Append-only PCM captured by the receive loop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PcmBuffer {
    bytes: Vec<u8>,
}

impl PcmBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, chunk: &[u8]) {
        self.bytes.extend_from_slice(chunk);
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Playback length at `format`, ignoring any partial frame.
    pub fn duration(&self, format: &AudioFormat) -> Duration {
        let frames = self.bytes.len() / format.bytes_per_frame().max(1);
        Duration::from_secs_f64(frames as f64 / format.sample_rate.max(1) as f64)
    }
}

/// Names an artifact after the chat message that requested it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactId {
    pub conversation_id: String,
    pub message_id: String,
}

impl ArtifactId {
    pub fn new(conversation_id: impl Into<String>, message_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            message_id: message_id.into(),
        }
    }

    /// `lyria_<conversation>_<message>.wav`
    pub fn file_name(&self) -> String {
        format!("lyria_{}_{}.wav", self.conversation_id, self.message_id)
    }
}

/// `lyria_YYYYmmdd-HHMMSS.wav`, for runs not tied to a conversation.
pub fn timestamped_file_name(at: DateTime<Local>) -> String {
    format!("lyria_{}.wav", at.format("%Y%m%d-%H%M%S"))
}

/// Write PCM as a 16-bit integer WAV, creating the parent directory.
///
/// A trailing partial frame is dropped. Returns the number of PCM bytes written.
pub fn write_wav(path: &Path, pcm: &PcmBuffer, format: &AudioFormat) -> Result<usize, ArtifactError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| ArtifactError::CreateDir {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }

    let spec = hound::WavSpec {
        channels: format.channels,
        sample_rate: format.sample_rate,
        bits_per_sample: AudioFormat::BITS_PER_SAMPLE,
        sample_format: hound::SampleFormat::Int,
    };

    let wav_err = |e| ArtifactError::Wav {
        path: path.to_path_buf(),
        source: e,
    };

    let mut writer = hound::WavWriter::create(path, spec).map_err(wav_err)?;
    let frames = pcm.as_bytes().chunks_exact(format.bytes_per_frame().max(2));
    let written = frames.len() * format.bytes_per_frame().max(2);
    for frame in frames {
        for pair in frame.chunks_exact(2) {
            writer
                .write_sample(i16::from_le_bytes([pair[0], pair[1]]))
                .map_err(wav_err)?;
        }
    }
    writer.finalize().map_err(wav_err)?;

    if written < pcm.len() {
        debug!(dropped = pcm.len() - written, "dropped trailing partial frame");
    }
    info!(path = %path.display(), bytes = written, "wrote WAV artifact");
    Ok(written)
}
