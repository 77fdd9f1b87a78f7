//! jamsession: realtime generative music sessions
//!
//! Drives a duplex music-generation session: user commands go up, PCM audio
//! comes down, a playback cap stops runaway sessions, and the captured audio
//! is saved as WAV and handed to a stem separator.
//!
//! Core concepts:
//! - [`Connector`] / [`MusicSession`]: the session contract, implemented over
//!   WebSocket by [`LyriaConnector`]
//! - [`SessionController`]: runs the send and receive loops and returns a [`Capture`]
//! - [`TimerSlot`]: the auto-stop timer, re-armed on every `play`
//! - [`AudioOutput`]: local playback (PipeWire with the `pipewire` feature)
//! - [`SeparationHandoff`]: fire-and-forget stem separation

pub mod artifact;
pub mod command;
pub mod controller;
pub mod error;
pub mod events;
pub mod input;
pub mod lyria;
pub mod protocol;
pub mod separation;
pub mod sink;
pub mod timer;
pub mod types;

pub use artifact::{timestamped_file_name, write_wav, ArtifactId, PcmBuffer};
pub use command::{parse_command, Command, CommandSet};
pub use controller::{Capture, ControllerSettings, Finalized, SessionController, SessionRequest};
pub use error::{ArtifactError, ConnectionError, ControllerError, SessionError, SinkError};
pub use events::{EventSink, StateCell};
pub use input::{ChannelLines, LineSource, NoInput, ScriptedLines, StdinLines};
pub use lyria::LyriaConnector;
pub use protocol::{Connection, Connector, MessageStream, MusicSession};
pub use separation::{SeparationHandoff, StemLayout, StemStatus, STEMS};
pub use sink::{default_output, AudioOutput, AudioSink, NullOutput, SinkGuard};
pub use timer::TimerSlot;
pub use types::{
    AudioFormat, GenerationConfig, Scale, ServerMessage, SessionEvent, SessionState, StopReason,
    WeightedPrompt,
};
