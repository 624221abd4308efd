//! Microphone capture via `cpal`.
//!
//! [`AudioSource`] is the capture seam used by the pipeline orchestrator:
//! `start` acquires the device, `stop` releases it and hands back every chunk
//! captured in between, in arrival order.
//!
//! [`CpalSource`] is the hardware implementation.  The cpal stream lives on a
//! dedicated `audio-capture` thread which owns it for its whole life, so the
//! device is released whenever that thread returns, whatever the reason.
//!
//! ```text
//! cpal callback ──Vec<f32>──▶ bounded channel ──▶ capture thread
//!                                                   │ ChunkAssembler
//!                                                   ▼
//!                          stop() ◀── join ── Vec<Chunk> (streaming WAV)
//! ```
//!
//! [`ScriptedSource`] replays a fixed chunk sequence without any hardware.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SampleFormat;
use crossbeam_channel::{bounded, select, Receiver, Sender};
use thiserror::Error;
use tokio::sync::oneshot;

use crate::config::CaptureConfig;

use super::wav::streaming_f32_header;

/// One block of encoded container bytes, as delivered by an [`AudioSource`].
pub type Chunk = Vec<u8>;

// ---------------------------------------------------------------------------
// CaptureError
// ---------------------------------------------------------------------------

/// Errors that can occur while acquiring or running the capture device.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("a recording is already in progress")]
    AlreadyRecording,

    #[error("no input device found on the default audio host")]
    NoDevice,

    #[error("input device '{0}' not found")]
    DeviceNotFound(String),

    #[error("failed to enumerate input devices: {0}")]
    Devices(#[from] cpal::DevicesError),

    #[error("failed to query default input config: {0}")]
    DefaultConfig(#[from] cpal::DefaultStreamConfigError),

    #[error("failed to query supported input configs: {0}")]
    SupportedConfigs(#[from] cpal::SupportedStreamConfigsError),

    #[error("failed to build input stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("failed to start audio stream: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),

    #[error("unsupported device sample format: {0}")]
    UnsupportedFormat(String),

    #[error("failed to spawn capture thread: {0}")]
    Thread(#[source] std::io::Error),

    #[error("capture thread exited unexpectedly")]
    Disconnected,
}

// ---------------------------------------------------------------------------
// AudioSource trait
// ---------------------------------------------------------------------------

/// A capture device producing encoded chunks while recording.
///
/// # Contract
///
/// - `start` fails with [`CaptureError::AlreadyRecording`] when already
///   active, leaving the running capture untouched.
/// - `stop` when idle is a no-op returning an empty sequence.
/// - `stop` releases the device before returning, on success or failure.
/// - `abort` is the synchronous path for `Drop`: it signals the device to
///   close without waiting and discards anything captured.
#[async_trait]
pub trait AudioSource: Send {
    /// Acquire the device and begin queueing chunks.
    async fn start(&mut self) -> Result<(), CaptureError>;

    /// Halt capture, release the device and return the chunks in arrival
    /// order.
    async fn stop(&mut self) -> Result<Vec<Chunk>, CaptureError>;

    /// Release the device without waiting for it; captured audio is lost.
    fn abort(&mut self);

    fn is_recording(&self) -> bool;
}

// ---------------------------------------------------------------------------
// StreamFormat
// ---------------------------------------------------------------------------

/// Native format of an open capture stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

// ---------------------------------------------------------------------------
// ChunkAssembler
// ---------------------------------------------------------------------------

/// Groups raw callback blocks into container chunks of bounded duration.
///
/// The first chunk opens with a streaming IEEE-float WAV header; the header
/// is only written once real audio arrives, so a capture that saw no audio
/// yields no chunks at all.  Frames past `max_frames` are discarded.
pub struct ChunkAssembler {
    format: StreamFormat,
    chunk_bytes: usize,
    max_frames: u64,
    frames: u64,
    pending: Vec<u8>,
    chunks: Vec<Chunk>,
    truncated: bool,
}

impl ChunkAssembler {
    pub fn new(format: StreamFormat, chunk_ms: u64, max_recording_secs: f32) -> Self {
        let channels = format.channels.max(1) as usize;
        let frames_per_chunk = ((format.sample_rate as u64 * chunk_ms) / 1_000).max(1) as usize;
        let max_frames = (max_recording_secs.max(0.0) as f64 * format.sample_rate as f64) as u64;

        Self {
            format,
            chunk_bytes: frames_per_chunk * channels * 4,
            max_frames,
            frames: 0,
            pending: Vec::new(),
            chunks: Vec::new(),
            truncated: false,
        }
    }

    /// Append interleaved samples from one callback.
    pub fn push(&mut self, samples: &[f32]) {
        let channels = self.format.channels.max(1) as usize;
        let room = self.max_frames.saturating_sub(self.frames) as usize;
        let take = (samples.len() / channels).min(room);

        if take < samples.len() / channels && !self.truncated {
            log::warn!(
                "capture: maximum recording length reached; dropping further audio"
            );
            self.truncated = true;
        }
        if take == 0 {
            return;
        }

        if self.frames == 0 {
            self.pending
                .extend_from_slice(&streaming_f32_header(self.format.sample_rate, self.format.channels));
        }
        for s in &samples[..take * channels] {
            self.pending.extend_from_slice(&s.to_le_bytes());
        }
        self.frames += take as u64;

        if self.pending.len() >= self.chunk_bytes {
            self.chunks.push(std::mem::take(&mut self.pending));
        }
    }

    /// Frames accepted so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Flush the partial chunk and return the full sequence.
    pub fn finish(mut self) -> Vec<Chunk> {
        if !self.pending.is_empty() {
            self.chunks.push(std::mem::take(&mut self.pending));
        }
        self.chunks
    }
}

// ---------------------------------------------------------------------------
// Device helpers
// ---------------------------------------------------------------------------

/// Names of all input devices on the default host.
pub fn list_input_devices() -> Result<Vec<String>, CaptureError> {
    let host = cpal::default_host();
    let names = host
        .input_devices()?
        .filter_map(|d| d.name().ok())
        .collect();
    Ok(names)
}

fn select_device(host: &cpal::Host, name: Option<&str>) -> Result<cpal::Device, CaptureError> {
    match name {
        Some(name) => host
            .input_devices()?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| CaptureError::DeviceNotFound(name.to_string())),
        None => host.default_input_device().ok_or(CaptureError::NoDevice),
    }
}

fn is_convertible(format: SampleFormat) -> bool {
    matches!(format, SampleFormat::F32 | SampleFormat::I16 | SampleFormat::U16)
}

/// Pick the stream configuration: the device default, or a mono variant at
/// the same rate when `prefer_mono` is set and the device offers one.
fn choose_config(
    device: &cpal::Device,
    prefer_mono: bool,
) -> Result<cpal::SupportedStreamConfig, CaptureError> {
    let default = device.default_input_config()?;
    if !prefer_mono || default.channels() == 1 {
        return Ok(default);
    }

    let rate = default.sample_rate();
    let mono = device.supported_input_configs()?.find(|range| {
        range.channels() == 1
            && is_convertible(range.sample_format())
            && range.min_sample_rate() <= rate
            && rate <= range.max_sample_rate()
    });

    Ok(match mono {
        Some(range) => range.with_sample_rate(rate),
        None => {
            log::debug!("capture: no mono config at {} Hz; using device default", rate.0);
            default
        }
    })
}

fn build_stream<T, F>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    tx: Sender<Vec<f32>>,
    overruns: Arc<AtomicUsize>,
    convert: F,
) -> Result<cpal::Stream, CaptureError>
where
    T: cpal::SizedSample,
    F: Fn(T) -> f32 + Send + 'static,
{
    let stream = device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            let block: Vec<f32> = data.iter().map(|&s| convert(s)).collect();
            if tx.try_send(block).is_err() {
                overruns.fetch_add(1, Ordering::Relaxed);
            }
        },
        |err: cpal::StreamError| {
            log::error!("cpal stream error: {err}");
        },
        None,
    )?;
    Ok(stream)
}

fn open_stream(
    config: &CaptureConfig,
    tx: Sender<Vec<f32>>,
    overruns: Arc<AtomicUsize>,
) -> Result<(cpal::Stream, StreamFormat), CaptureError> {
    let host = cpal::default_host();
    let device = select_device(&host, config.device.as_deref())?;
    let supported = choose_config(&device, config.prefer_mono)?;
    let sample_format = supported.sample_format();
    let stream_config: cpal::StreamConfig = supported.into();

    let format = StreamFormat {
        sample_rate: stream_config.sample_rate.0,
        channels: stream_config.channels,
    };

    let stream = match sample_format {
        SampleFormat::F32 => build_stream(&device, &stream_config, tx, overruns, |s: f32| s)?,
        SampleFormat::I16 => build_stream(&device, &stream_config, tx, overruns, |s: i16| {
            s as f32 / 32_768.0
        })?,
        SampleFormat::U16 => build_stream(&device, &stream_config, tx, overruns, |s: u16| {
            (s as f32 - 32_768.0) / 32_768.0
        })?,
        other => return Err(CaptureError::UnsupportedFormat(format!("{other:?}"))),
    };

    stream.play()?;

    log::info!(
        "capture: '{}' opened ({} Hz, {} ch, {:?})",
        device.name().unwrap_or_else(|_| "unknown device".into()),
        format.sample_rate,
        format.channels,
        sample_format
    );
    Ok((stream, format))
}

/// Body of the `audio-capture` thread.  Owns the cpal stream; the stream is
/// dropped (device released) before this function returns.
fn run_capture(
    config: CaptureConfig,
    ready: oneshot::Sender<Result<StreamFormat, CaptureError>>,
    stop_rx: Receiver<()>,
) -> Vec<Chunk> {
    let (block_tx, block_rx) = bounded::<Vec<f32>>(config.queue_capacity.max(1));
    let overruns = Arc::new(AtomicUsize::new(0));

    let (stream, format) = match open_stream(&config, block_tx, Arc::clone(&overruns)) {
        Ok(opened) => opened,
        Err(e) => {
            let _ = ready.send(Err(e));
            return Vec::new();
        }
    };
    if ready.send(Ok(format)).is_err() {
        // start() was cancelled before the device came up.
        return Vec::new();
    }

    let mut assembler = ChunkAssembler::new(format, config.chunk_ms, config.max_recording_secs);

    loop {
        select! {
            recv(block_rx) -> block => match block {
                Ok(samples) => assembler.push(&samples),
                Err(_) => break,
            },
            // Explicit stop, or the owning CpalSource was dropped.
            recv(stop_rx) -> _ => break,
        }
    }

    drop(stream);
    for samples in block_rx.try_iter() {
        assembler.push(&samples);
    }

    let dropped = overruns.load(Ordering::Relaxed);
    if dropped > 0 {
        log::warn!("capture: {dropped} callback blocks dropped (queue full)");
    }
    log::debug!("capture: {} frames captured", assembler.frames());

    assembler.finish()
}

// ---------------------------------------------------------------------------
// CpalSource
// ---------------------------------------------------------------------------

struct ActiveCapture {
    stop_tx: Sender<()>,
    thread: JoinHandle<Vec<Chunk>>,
    format: StreamFormat,
}

/// [`AudioSource`] backed by a cpal input stream.
///
/// cpal exposes no echo-cancellation or noise-suppression switches; when the
/// config requests them they are left to the OS / device processing chain.
pub struct CpalSource {
    config: CaptureConfig,
    active: Option<ActiveCapture>,
}

impl CpalSource {
    pub fn new(config: CaptureConfig) -> Self {
        if config.echo_cancellation || config.noise_suppression {
            log::debug!(
                "capture: echo cancellation / noise suppression delegated to the input device"
            );
        }
        Self {
            config,
            active: None,
        }
    }

    /// Format of the running capture, if any.
    pub fn format(&self) -> Option<StreamFormat> {
        self.active.as_ref().map(|a| a.format)
    }
}

#[async_trait]
impl AudioSource for CpalSource {
    async fn start(&mut self) -> Result<(), CaptureError> {
        if self.active.is_some() {
            return Err(CaptureError::AlreadyRecording);
        }

        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let config = self.config.clone();

        let thread = std::thread::Builder::new()
            .name("audio-capture".into())
            .spawn(move || run_capture(config, ready_tx, stop_rx))
            .map_err(CaptureError::Thread)?;

        match ready_rx.await {
            Ok(Ok(format)) => {
                self.active = Some(ActiveCapture {
                    stop_tx,
                    thread,
                    format,
                });
                Ok(())
            }
            // The thread has already released the device and is returning.
            Ok(Err(e)) => {
                drop(thread);
                Err(e)
            }
            Err(_) => {
                drop(thread);
                Err(CaptureError::Disconnected)
            }
        }
    }

    async fn stop(&mut self) -> Result<Vec<Chunk>, CaptureError> {
        let Some(active) = self.active.take() else {
            return Ok(Vec::new());
        };

        let _ = active.stop_tx.send(());
        let joined = tokio::task::spawn_blocking(move || active.thread.join())
            .await
            .map_err(|_| CaptureError::Disconnected)?;
        joined.map_err(|_| CaptureError::Disconnected)
    }

    fn abort(&mut self) {
        if let Some(active) = self.active.take() {
            log::debug!("capture: aborting, audio discarded");
            let _ = active.stop_tx.send(());
        }
    }

    fn is_recording(&self) -> bool {
        self.active.is_some()
    }
}

impl Drop for CpalSource {
    fn drop(&mut self) {
        self.abort();
    }
}

// ---------------------------------------------------------------------------
// ScriptedSource
// ---------------------------------------------------------------------------

/// Observes whether a [`ScriptedSource`] currently holds its "device".
#[derive(Debug, Clone, Default)]
pub struct DeviceProbe {
    held: Arc<AtomicBool>,
    acquisitions: Arc<AtomicUsize>,
}

impl DeviceProbe {
    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::SeqCst)
    }

    /// How many times the device was successfully acquired.
    pub fn acquisitions(&self) -> usize {
        self.acquisitions.load(Ordering::SeqCst)
    }
}

/// [`AudioSource`] that replays a fixed chunk sequence on every recording.
///
/// Used to drive the pipeline without hardware, e.g. from a file already
/// on disk or from synthesized test audio.
pub struct ScriptedSource {
    chunks: Vec<Chunk>,
    available: bool,
    recording: bool,
    probe: DeviceProbe,
}

impl ScriptedSource {
    pub fn new(chunks: Vec<Chunk>) -> Self {
        Self {
            chunks,
            available: true,
            recording: false,
            probe: DeviceProbe::default(),
        }
    }

    /// A source whose device can never be acquired.
    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::new(Vec::new())
        }
    }

    /// Handle for checking device ownership from outside.
    pub fn probe(&self) -> DeviceProbe {
        self.probe.clone()
    }
}

#[async_trait]
impl AudioSource for ScriptedSource {
    async fn start(&mut self) -> Result<(), CaptureError> {
        if self.recording {
            return Err(CaptureError::AlreadyRecording);
        }
        if !self.available {
            return Err(CaptureError::NoDevice);
        }
        self.recording = true;
        self.probe.held.store(true, Ordering::SeqCst);
        self.probe.acquisitions.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&mut self) -> Result<Vec<Chunk>, CaptureError> {
        if !self.recording {
            return Ok(Vec::new());
        }
        self.recording = false;
        self.probe.held.store(false, Ordering::SeqCst);
        Ok(self.chunks.clone())
    }

    fn abort(&mut self) {
        self.recording = false;
        self.probe.held.store(false, Ordering::SeqCst);
    }

    fn is_recording(&self) -> bool {
        self.recording
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::wav::STREAMING_LEN;

    const MONO_48K: StreamFormat = StreamFormat {
        sample_rate: 48_000,
        channels: 1,
    };

    #[test]
    fn chunk_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<Chunk>();
        assert_send::<CpalSource>();
    }

    #[test]
    fn assembler_without_audio_yields_nothing() {
        let asm = ChunkAssembler::new(MONO_48K, 100, 60.0);
        assert!(asm.finish().is_empty());
    }

    #[test]
    fn assembler_first_chunk_carries_streaming_header() {
        let mut asm = ChunkAssembler::new(MONO_48K, 100, 60.0);
        asm.push(&[0.5; 480]);
        let chunks = asm.finish();
        assert_eq!(chunks.len(), 1);
        let first = &chunks[0];
        assert_eq!(&first[0..4], b"RIFF");
        assert_eq!(u32::from_le_bytes(first[4..8].try_into().unwrap()), STREAMING_LEN);
        assert_eq!(first.len(), 46 + 480 * 4);
        assert_eq!(&first[46..50], &0.5f32.to_le_bytes());
    }

    #[test]
    fn assembler_splits_at_chunk_duration() {
        // 100 ms @ 48 kHz mono = 4800 frames = 19 200 bytes per chunk.
        let mut asm = ChunkAssembler::new(MONO_48K, 100, 60.0);
        for _ in 0..25 {
            asm.push(&[0.0; 480]); // 10 ms callbacks
        }
        let chunks = asm.finish();
        // 250 ms → two full chunks + one partial.
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[1].len(), 4_800 * 4);
        assert_eq!(chunks[2].len(), 2_400 * 4);
        let payload: usize = chunks.iter().map(Vec::len).sum::<usize>() - 46;
        assert_eq!(payload, 12_000 * 4);
    }

    #[test]
    fn assembler_preserves_arrival_order() {
        let fmt = StreamFormat {
            sample_rate: 1_000,
            channels: 2,
        };
        let mut asm = ChunkAssembler::new(fmt, 10, 60.0);
        let mut expected = Vec::new();
        for i in 0..50 {
            let block = [i as f32 / 100.0, -(i as f32) / 100.0];
            expected.extend_from_slice(&block);
            asm.push(&block);
        }
        let bytes: Vec<u8> = asm.finish().concat();
        let samples: Vec<f32> = bytes[46..]
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes(b.try_into().unwrap()))
            .collect();
        assert_eq!(samples, expected);
    }

    #[test]
    fn assembler_caps_recording_length() {
        let fmt = StreamFormat {
            sample_rate: 1_000,
            channels: 1,
        };
        let mut asm = ChunkAssembler::new(fmt, 100, 0.5);
        for _ in 0..10 {
            asm.push(&[0.1; 100]);
        }
        assert_eq!(asm.frames(), 500);
        let total: usize = asm.finish().iter().map(Vec::len).sum();
        assert_eq!(total, 46 + 500 * 4);
    }

    #[tokio::test]
    async fn scripted_source_lifecycle() {
        let mut src = ScriptedSource::new(vec![vec![1, 2], vec![3]]);
        let probe = src.probe();

        assert!(src.stop().await.unwrap().is_empty(), "stop when idle is a no-op");

        src.start().await.unwrap();
        assert!(src.is_recording());
        assert!(probe.is_held());
        assert!(matches!(src.start().await, Err(CaptureError::AlreadyRecording)));
        assert!(src.is_recording(), "failed start must not change state");

        let chunks = src.stop().await.unwrap();
        assert_eq!(chunks, vec![vec![1, 2], vec![3]]);
        assert!(!probe.is_held());
        assert_eq!(probe.acquisitions(), 1);
    }

    #[tokio::test]
    async fn abort_releases_without_returning_audio() {
        let mut src = ScriptedSource::new(vec![vec![9]]);
        let probe = src.probe();

        src.start().await.unwrap();
        src.abort();
        assert!(!src.is_recording());
        assert!(!probe.is_held());
        assert!(src.stop().await.unwrap().is_empty(), "aborted audio is gone");

        src.start().await.unwrap();
        assert_eq!(probe.acquisitions(), 2);
    }

    #[tokio::test]
    async fn unavailable_source_reports_no_device() {
        let mut src = ScriptedSource::unavailable();
        assert!(matches!(src.start().await, Err(CaptureError::NoDevice)));
        assert!(!src.is_recording());
        assert!(!src.probe().is_held());
    }

    #[tokio::test]
    async fn cpal_source_stop_when_idle_is_empty() {
        let mut src = CpalSource::new(CaptureConfig::default());
        assert!(!src.is_recording());
        assert!(src.stop().await.unwrap().is_empty());
        src.abort();
        assert!(src.format().is_none());
    }
}
