//! Local audio output.
//!
//! The receive loop opens one sink per run, writes every audio chunk to it,
//! and closes it through a [`SinkGuard`] so the device is released on every
//! exit path, including cancellation.

#[cfg(feature = "pipewire")]
mod pipewire_output;

#[cfg(feature = "pipewire")]
pub use self::pipewire_output::{PipeWireOutput, PipeWireSink, StreamStats};

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::SinkError;
use crate::types::AudioFormat;

/// Opens playback streams.
pub trait AudioOutput: Send + Sync {
    fn open(&self, format: AudioFormat) -> Result<Box<dyn AudioSink>, SinkError>;
}

/// One open playback stream. Writes must not block on the device.
pub trait AudioSink: Send {
    /// Queue 16-bit little-endian interleaved PCM for playback.
    fn write(&mut self, pcm: &[u8]) -> Result<(), SinkError>;

    fn close(&mut self) -> Result<(), SinkError>;
}

/// Discards everything. Used for headless runs and builds without PipeWire.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullOutput;

impl AudioOutput for NullOutput {
    fn open(&self, format: AudioFormat) -> Result<Box<dyn AudioSink>, SinkError> {
        debug!(?format, "opening null audio sink");
        Ok(Box::new(NullSink))
    }
}

#[derive(Debug)]
struct NullSink;

impl AudioSink for NullSink {
    fn write(&mut self, _pcm: &[u8]) -> Result<(), SinkError> {
        Ok(())
    }

    fn close(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Pick the output for this build and config.
pub fn default_output(config: &jamconf::AudioConfig) -> Arc<dyn AudioOutput> {
    if !config.playback {
        return Arc::new(NullOutput);
    }

    #[cfg(feature = "pipewire")]
    {
        Arc::new(PipeWireOutput::new("jamsession", config.frame_size))
    }

    #[cfg(not(feature = "pipewire"))]
    {
        warn!("{}; playing silently", SinkError::NotAvailable);
        Arc::new(NullOutput)
    }
}

/// Closes the wrapped sink exactly once, on `close()` or on drop.
pub struct SinkGuard {
    sink: Option<Box<dyn AudioSink>>,
}

impl SinkGuard {
    pub fn new(sink: Box<dyn AudioSink>) -> Self {
        Self { sink: Some(sink) }
    }

    pub fn write(&mut self, pcm: &[u8]) -> Result<(), SinkError> {
        match self.sink.as_mut() {
            Some(sink) => sink.write(pcm),
            None => Err(SinkError::Write("sink already closed".to_string())),
        }
    }

    /// Close now. Errors are logged, never returned.
    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(mut sink) = self.sink.take() {
            if let Err(e) = sink.close() {
                warn!(error = %e, "failed to close audio sink");
            } else {
                debug!("audio sink closed");
            }
        }
    }
}

impl Drop for SinkGuard {
    fn drop(&mut self) {
        self.release();
    }
}
