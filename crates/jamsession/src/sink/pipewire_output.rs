//! PipeWire playback stream.
//!
//! `write` converts 16-bit PCM to f32 and pushes it into an rtrb ring. A
//! dedicated thread runs the PipeWire main loop, whose realtime process
//! callback drains the ring into the stream's buffers and pads with silence
//! when the ring runs dry.
//!
//! Writes never block. The ring holds [`RING_SPAN`] of audio, more than the
//! server runs ahead of real time after the first buffering delay; if it
//! still fills, the excess is dropped from playback and counted as an
//! overrun. The captured PCM is unaffected.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use rtrb::{Consumer, Producer, RingBuffer};
use tracing::{debug, error, info, warn};

use super::{AudioOutput, AudioSink};
use crate::error::SinkError;
use crate::types::AudioFormat;

/// Audio the ring can hold ahead of the playback cursor.
pub const RING_SPAN: Duration = Duration::from_secs(8);

/// Opens PipeWire playback streams on the default sink.
#[derive(Debug, Clone)]
pub struct PipeWireOutput {
    name: String,
    /// Maximum frames per callback. PipeWire typically asks for 128-256.
    latency_frames: u32,
}

impl PipeWireOutput {
    pub fn new(name: impl Into<String>, latency_frames: u32) -> Self {
        Self {
            name: name.into(),
            latency_frames,
        }
    }
}

impl AudioOutput for PipeWireOutput {
    fn open(&self, format: AudioFormat) -> Result<Box<dyn AudioSink>, SinkError> {
        let sink = PipeWireSink::start(&self.name, format, self.latency_frames)?;
        Ok(Box::new(sink))
    }
}

/// Counters updated from the process callback.
#[derive(Debug, Default)]
pub struct StreamStats {
    pub callbacks: AtomicU64,
    pub samples_played: AtomicU64,
    pub underruns: AtomicU64,
    pub overruns: AtomicU64,
    /// Set once audio has flowed; underruns before that are expected.
    pub warmed_up: AtomicBool,
}

/// A running playback stream. Dropping it stops the PipeWire thread.
pub struct PipeWireSink {
    producer: Producer<f32>,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
    stats: Arc<StreamStats>,
    /// Low byte of a sample split across two writes.
    carry: Option<u8>,
}

impl PipeWireSink {
    pub fn start(name: &str, format: AudioFormat, latency_frames: u32) -> Result<Self, SinkError> {
        pipewire::init();

        let (producer, consumer) = RingBuffer::<f32>::new(format.samples_for(RING_SPAN));

        let running = Arc::new(AtomicBool::new(true));
        let stats = Arc::new(StreamStats::default());

        let running_for_thread = Arc::clone(&running);
        let stats_for_thread = Arc::clone(&stats);
        let name_for_thread = name.to_string();

        let thread_handle = thread::Builder::new()
            .name("jam-playback".to_string())
            .spawn(move || {
                if let Err(e) = run_pipewire_loop(
                    &name_for_thread,
                    format,
                    latency_frames,
                    consumer,
                    Arc::clone(&running_for_thread),
                    stats_for_thread,
                ) {
                    error!(error = %e, "playback thread exited");
                    running_for_thread.store(false, Ordering::Release);
                }
            })
            .map_err(|e| SinkError::Open(e.to_string()))?;

        info!(
            stream = name,
            sample_rate = format.sample_rate,
            channels = format.channels,
            "playback stream opened"
        );

        Ok(Self {
            producer,
            running,
            thread_handle: Some(thread_handle),
            stats,
            carry: None,
        })
    }

    pub fn stats(&self) -> &Arc<StreamStats> {
        &self.stats
    }

    fn push_sample(&mut self, lo: u8, hi: u8) -> bool {
        let sample = i16::from_le_bytes([lo, hi]) as f32 / 32768.0;
        self.producer.push(sample).is_ok()
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.thread_handle.take() {
            debug!("joining playback thread");
            let _ = handle.join();
            info!(
                callbacks = self.stats.callbacks.load(Ordering::Relaxed),
                underruns = self.stats.underruns.load(Ordering::Relaxed),
                overruns = self.stats.overruns.load(Ordering::Relaxed),
                "playback stream closed"
            );
        }
    }
}

impl AudioSink for PipeWireSink {
    fn write(&mut self, pcm: &[u8]) -> Result<(), SinkError> {
        if !self.running.load(Ordering::Acquire) {
            return Err(SinkError::Write("PipeWire stream is not running".to_string()));
        }

        let mut bytes = pcm;
        if let Some(lo) = self.carry.take() {
            match bytes.split_first() {
                Some((&hi, rest)) => {
                    if !self.push_sample(lo, hi) {
                        self.stats.overruns.fetch_add(1, Ordering::Relaxed);
                    }
                    bytes = rest;
                }
                None => {
                    self.carry = Some(lo);
                    return Ok(());
                }
            }
        }

        let mut dropped = 0u64;
        let mut pairs = bytes.chunks_exact(2);
        for pair in &mut pairs {
            if !self.push_sample(pair[0], pair[1]) {
                dropped += 1;
            }
        }
        self.carry = pairs.remainder().first().copied();

        if dropped > 0 {
            self.stats.overruns.fetch_add(dropped, Ordering::Relaxed);
            warn!(dropped, "PipeWire ring full, dropping samples");
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), SinkError> {
        self.stop();
        Ok(())
    }
}

impl Drop for PipeWireSink {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Body of the playback thread. Returns when `running` is cleared.
fn run_pipewire_loop(
    name: &str,
    format: AudioFormat,
    latency_frames: u32,
    consumer: Consumer<f32>,
    running: Arc<AtomicBool>,
    stats: Arc<StreamStats>,
) -> Result<(), SinkError> {
    use pipewire as pw;
    use pw::spa::pod::Pod;
    use pw::{properties::properties, spa};

    let mainloop = pw::main_loop::MainLoopRc::new(None)
        .map_err(|e| SinkError::Open(format!("Failed to create main loop: {}", e)))?;

    let context = pw::context::ContextRc::new(&mainloop, None)
        .map_err(|e| SinkError::Open(format!("Failed to create context: {}", e)))?;

    let core = context
        .connect_rc(None)
        .map_err(|e| SinkError::Open(format!("Failed to connect to PipeWire: {}", e)))?;

    let mut props = properties! {
        *pw::keys::MEDIA_TYPE => "Audio",
        *pw::keys::MEDIA_ROLE => "Music",
        *pw::keys::MEDIA_CATEGORY => "Playback",
        *pw::keys::AUDIO_CHANNELS => format.channels.to_string(),
    };

    if latency_frames > 0 {
        let latency = format!("{}/{}", latency_frames, format.sample_rate);
        props.insert("node.latency", latency.as_str());
        debug!(latency = %latency, "requesting node latency");
    }

    let stream = pw::stream::StreamBox::new(&core, name, props)
        .map_err(|e| SinkError::Open(format!("Failed to create stream: {}", e)))?;

    let channels = format.channels as usize;
    let sample_size = std::mem::size_of::<f32>();
    let stride = sample_size * channels;
    let target_frames = latency_frames as usize;

    let _listener = stream
        .add_local_listener_with_user_data((stats, consumer))
        .process(move |stream, (stats, consumer)| {
            stats.callbacks.fetch_add(1, Ordering::Relaxed);

            let Some(mut buffer) = stream.dequeue_buffer() else {
                return;
            };

            let requested = buffer.requested() as usize;
            let datas = buffer.datas_mut();
            let Some(data) = datas.first_mut() else {
                return;
            };
            let Some(slice) = data.data() else {
                return;
            };

            let max_frames = slice.len() / stride;
            let n_frames = if requested > 0 {
                target_frames.min(requested).min(max_frames)
            } else {
                target_frames.min(max_frames)
            };

            let mut played = 0u64;
            for i in 0..n_frames * channels {
                let sample = match consumer.pop() {
                    Ok(sample) => {
                        played += 1;
                        sample
                    }
                    Err(_) => 0.0,
                };
                let start = i * sample_size;
                slice[start..start + sample_size].copy_from_slice(&sample.to_le_bytes());
            }

            if played > 0 {
                stats.warmed_up.store(true, Ordering::Relaxed);
                stats.samples_played.fetch_add(played, Ordering::Relaxed);
            }
            if played < (n_frames * channels) as u64 && stats.warmed_up.load(Ordering::Relaxed) {
                stats.underruns.fetch_add(1, Ordering::Relaxed);
            }

            let chunk = data.chunk_mut();
            *chunk.offset_mut() = 0;
            *chunk.stride_mut() = stride as i32;
            *chunk.size_mut() = (stride * n_frames) as u32;
        })
        .register()
        .map_err(|e| SinkError::Open(format!("Failed to register listener: {}", e)))?;

    let mut audio_info = spa::param::audio::AudioInfoRaw::new();
    audio_info.set_format(spa::param::audio::AudioFormat::F32LE);
    audio_info.set_rate(format.sample_rate);
    audio_info.set_channels(format.channels as u32);

    let mut position = [0u32; spa::param::audio::MAX_CHANNELS];
    if format.channels >= 1 {
        position[0] = pw::spa::sys::SPA_AUDIO_CHANNEL_FL;
    }
    if format.channels >= 2 {
        position[1] = pw::spa::sys::SPA_AUDIO_CHANNEL_FR;
    }
    audio_info.set_position(position);

    let values: Vec<u8> = pw::spa::pod::serialize::PodSerializer::serialize(
        std::io::Cursor::new(Vec::new()),
        &pw::spa::pod::Value::Object(pw::spa::pod::Object {
            type_: pw::spa::sys::SPA_TYPE_OBJECT_Format,
            id: pw::spa::sys::SPA_PARAM_EnumFormat,
            properties: audio_info.into(),
        }),
    )
    .map_err(|e| SinkError::Open(format!("Failed to serialize format: {}", e)))?
    .0
    .into_inner();

    let mut params = [Pod::from_bytes(&values)
        .ok_or_else(|| SinkError::Open("Failed to create Pod from bytes".to_string()))?];

    stream
        .connect(
            spa::utils::Direction::Output,
            None,
            pw::stream::StreamFlags::AUTOCONNECT
                | pw::stream::StreamFlags::MAP_BUFFERS
                | pw::stream::StreamFlags::RT_PROCESS,
            &mut params,
        )
        .map_err(|e| SinkError::Open(format!("Failed to connect stream: {}", e)))?;

    debug!("stream connected");

    // Poll the running flag so close() can stop the loop
    let mainloop_weak = mainloop.downgrade();
    let timer = mainloop.loop_().add_timer(move |_| {
        if !running.load(Ordering::Acquire) {
            if let Some(ml) = mainloop_weak.upgrade() {
                ml.quit();
            }
        }
    });

    timer
        .update_timer(
            Some(Duration::from_millis(100)),
            Some(Duration::from_millis(100)),
        )
        .into_result()
        .map_err(|e| SinkError::Open(format!("Failed to set timer: {}", e)))?;

    mainloop.run();

    debug!("playback main loop finished");
    Ok(())
}
