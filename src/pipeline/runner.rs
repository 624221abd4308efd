//! Pipeline orchestrator: drives one capture → decode → merge → resample →
//! encode run.
//!
//! [`PipelineOrchestrator`] owns the [`AudioSource`] and [`ContainerDecoder`]
//! and publishes every [`PipelineState`] change on a `tokio::sync::watch`
//! channel.
//!
//! # Pipeline flow
//!
//! ```text
//! record_and_transcode(stop)
//!   └─▶ CaptureGuard::acquire (source.start)          [Recording]
//!         └─▶ stop.await → guard.release (source.stop)
//!               ├─ no chunks → NoAudioCaptured         [Idle]
//!               └─▶ spawn_blocking(decoder.decode)     [Decoding]
//!                     ├─ zero frames → Decode(Empty)   [Failed]
//!                     └─▶ merge_channels                [Merging]
//!                           └─▶ resample(rate)          [Resampling]
//!                                 └─▶ encode_wav        [Encoding]
//!                                       └─▶ WavBytes    [Completed]
//! ```
//!
//! Decoding is pushed onto `tokio::task::spawn_blocking` so the async
//! runtime never stalls on a long recording. A run dropped at any await
//! point publishes `Idle`.

use std::future::Future;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::watch;

use crate::audio::{
    encode_wav, merge_channels, AudioSource, CaptureError, Chunk, ContainerDecoder, DecodeError,
    Resampler, WavBytes,
};
use crate::config::AudioConfig;

use super::session::CaptureSession;
use super::state::PipelineState;

// ---------------------------------------------------------------------------
// PipelineError
// ---------------------------------------------------------------------------

/// Errors surfaced by [`PipelineOrchestrator::record_and_transcode`].
#[derive(Debug, Error)]
pub enum PipelineError {
    /// No capture device could be acquired, or it failed mid-recording.
    #[error("capture device unavailable: {0}")]
    DeviceUnavailable(String),

    /// `start` was called while the source was already recording.
    #[error("a recording is already in progress")]
    AlreadyRecording,

    /// Recording stopped before any audio arrived.
    #[error("no audio captured; try recording again")]
    NoAudioCaptured,

    /// The captured container could not be decoded.
    #[error("decode failed: {0}")]
    Decode(#[from] DecodeError),

    /// Internal / unexpected error (e.g. blocking task join failure).
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<CaptureError> for PipelineError {
    fn from(err: CaptureError) -> Self {
        match err {
            CaptureError::AlreadyRecording => PipelineError::AlreadyRecording,
            other => PipelineError::DeviceUnavailable(other.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// CaptureGuard
// ---------------------------------------------------------------------------

/// Holds the capture device for the lifetime of one recording.
///
/// Dropping the guard before [`release`](Self::release) completes (an error
/// or a cancelled future) aborts the source and resets the published state
/// to `Idle`.
struct CaptureGuard<'a> {
    source: &'a mut dyn AudioSource,
    state_tx: &'a watch::Sender<PipelineState>,
    released: bool,
}

impl<'a> CaptureGuard<'a> {
    async fn acquire(
        source: &'a mut dyn AudioSource,
        state_tx: &'a watch::Sender<PipelineState>,
    ) -> Result<Self, CaptureError> {
        source.start().await?;
        Ok(Self {
            source,
            state_tx,
            released: false,
        })
    }

    async fn release(mut self) -> Result<Vec<Chunk>, CaptureError> {
        let captured = self.source.stop().await;
        self.released = true;
        captured
    }
}

impl Drop for CaptureGuard<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        log::debug!("pipeline: recording abandoned, releasing capture device");
        if self.source.is_recording() {
            self.source.abort();
        }
        self.state_tx.send_replace(PipelineState::Idle);
    }
}

// ---------------------------------------------------------------------------
// StageGuard
// ---------------------------------------------------------------------------

/// Publishes stage transitions for one post-capture run.
///
/// Dropped without [`settle`](Self::settle) (the caller's future was
/// cancelled mid-stage), it publishes `Idle`.
struct StageGuard<'a, P: Fn(PipelineState)> {
    publish: &'a P,
    settled: bool,
}

impl<'a, P: Fn(PipelineState)> StageGuard<'a, P> {
    fn new(publish: &'a P) -> Self {
        Self {
            publish,
            settled: false,
        }
    }

    fn enter(&self, state: PipelineState) {
        (self.publish)(state);
    }

    /// Publish the run's final state.
    fn settle(&mut self, state: PipelineState) {
        self.settled = true;
        (self.publish)(state);
    }
}

impl<P: Fn(PipelineState)> Drop for StageGuard<'_, P> {
    fn drop(&mut self) {
        if !self.settled {
            log::debug!("pipeline: run abandoned mid-stage");
            (self.publish)(PipelineState::Idle);
        }
    }
}

// ---------------------------------------------------------------------------
// PipelineOrchestrator
// ---------------------------------------------------------------------------

/// Drives complete record-and-transcode runs.
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use pitchcap::audio::{CpalSource, SymphoniaDecoder};
/// use pitchcap::config::AppConfig;
/// use pitchcap::pipeline::PipelineOrchestrator;
///
/// # async fn example() -> Result<(), pitchcap::pipeline::PipelineError> {
/// let config = AppConfig::default();
/// let mut orchestrator = PipelineOrchestrator::new(
///     Box::new(CpalSource::new(config.capture.clone())),
///     Arc::new(SymphoniaDecoder::new()),
///     config.audio.clone(),
/// );
///
/// let stop = tokio::time::sleep(std::time::Duration::from_secs(5));
/// let wav = orchestrator.record_and_transcode(stop).await?;
/// std::fs::write("out.wav", wav.as_bytes()).unwrap();
/// # Ok(())
/// # }
/// ```
pub struct PipelineOrchestrator {
    source: Box<dyn AudioSource>,
    decoder: Arc<dyn ContainerDecoder>,
    audio: AudioConfig,
    state_tx: watch::Sender<PipelineState>,
}

impl PipelineOrchestrator {
    /// Create a new orchestrator.
    ///
    /// # Arguments
    ///
    /// * `source`: capture device (e.g. `CpalSource`).
    /// * `decoder`: container decoder (e.g. `SymphoniaDecoder`).
    /// * `audio`: target rate and resampler used by
    ///   [`record_and_transcode`](Self::record_and_transcode).
    pub fn new(
        source: Box<dyn AudioSource>,
        decoder: Arc<dyn ContainerDecoder>,
        audio: AudioConfig,
    ) -> Self {
        let (state_tx, _) = watch::channel(PipelineState::Idle);
        Self {
            source,
            decoder,
            audio,
            state_tx,
        }
    }

    /// Receiver that observes every state change.
    pub fn subscribe(&self) -> watch::Receiver<PipelineState> {
        self.state_tx.subscribe()
    }

    /// Current pipeline state.
    pub fn state(&self) -> PipelineState {
        *self.state_tx.borrow()
    }

    /// Record until `stop` resolves, then transcode to the configured rate.
    pub async fn record_and_transcode<F>(&mut self, stop: F) -> Result<WavBytes, PipelineError>
    where
        F: Future<Output = ()>,
    {
        let rate = self.audio.target_sample_rate;
        self.record_and_transcode_at(rate, stop).await
    }

    /// Record until `stop` resolves, then transcode to `rate` Hz.
    ///
    /// The capture device is released on every exit path, including when
    /// the returned future is dropped before completion.
    pub async fn record_and_transcode_at<F>(
        &mut self,
        rate: u32,
        stop: F,
    ) -> Result<WavBytes, PipelineError>
    where
        F: Future<Output = ()>,
    {
        if self.source.is_recording() {
            return Err(PipelineError::AlreadyRecording);
        }

        let mut session = CaptureSession::new();

        // ── 1. Capture (device held only inside this block) ──────────────
        let captured = {
            let guard = match CaptureGuard::acquire(&mut *self.source, &self.state_tx).await {
                Ok(guard) => guard,
                Err(CaptureError::AlreadyRecording) => {
                    return Err(PipelineError::AlreadyRecording);
                }
                Err(e) => {
                    session.fail();
                    self.state_tx.send_replace(PipelineState::Failed);
                    log::error!("pipeline error: {e}");
                    return Err(e.into());
                }
            };
            session.start();
            self.state_tx.send_replace(PipelineState::Recording);
            log::debug!("pipeline: capture started, waiting for stop signal");

            stop.await;
            guard.release().await
        };

        let chunks = match captured {
            Ok(chunks) => chunks,
            Err(e) => {
                session.fail();
                self.state_tx.send_replace(PipelineState::Failed);
                log::error!("pipeline error: {e}");
                return Err(e.into());
            }
        };

        session.extend(chunks);
        session.stop();
        log::debug!(
            "pipeline: capture stopped, {} chunk(s) / {} bytes",
            session.chunks().len(),
            session.chunk_bytes()
        );

        // ── 2. Post-capture stages ───────────────────────────────────────
        let state_tx = &self.state_tx;
        run_stages(
            Arc::clone(&self.decoder),
            session,
            rate,
            self.audio.resampler,
            |state| {
                state_tx.send_replace(state);
            },
        )
        .await
    }
}

// ---------------------------------------------------------------------------
// Stages
// ---------------------------------------------------------------------------

/// Decode, merge, resample and encode an already-collected chunk sequence.
///
/// Used for files on disk and anywhere the chunks did not come from an
/// orchestrator-owned source. Zero chunks yield
/// [`PipelineError::NoAudioCaptured`]; a container with zero frames is
/// [`DecodeError::Empty`].
pub async fn transcode_chunks(
    decoder: Arc<dyn ContainerDecoder>,
    chunks: Vec<Chunk>,
    rate: u32,
    resampler: Resampler,
) -> Result<WavBytes, PipelineError> {
    let mut session = CaptureSession::new();
    session.start();
    session.extend(chunks);
    session.stop();
    run_stages(decoder, session, rate, resampler, |state| {
        log::debug!("pipeline: {}", state.label());
    })
    .await
}

async fn run_stages(
    decoder: Arc<dyn ContainerDecoder>,
    session: CaptureSession,
    rate: u32,
    resampler: Resampler,
    publish: impl Fn(PipelineState),
) -> Result<WavBytes, PipelineError> {
    let mut stages = StageGuard::new(&publish);

    if session.chunks().is_empty() {
        log::warn!("pipeline: stopped with no captured audio");
        stages.settle(PipelineState::Idle);
        return Err(PipelineError::NoAudioCaptured);
    }

    // ── Decode (blocking → thread pool) ──────────────────────────────────
    stages.enter(PipelineState::Decoding);
    let joined = tokio::task::spawn_blocking(move || {
        let decoded = decoder.decode(session.chunks());
        (session, decoded)
    })
    .await;

    let (mut session, decoded) = match joined {
        Ok(pair) => pair,
        Err(e) => {
            stages.settle(PipelineState::Failed);
            log::error!("pipeline error: decode task failed: {e}");
            return Err(PipelineError::Internal(e.to_string()));
        }
    };

    let pcm = match decoded {
        Ok(pcm) if pcm.is_empty() => {
            session.fail();
            stages.settle(PipelineState::Failed);
            log::error!("pipeline error: container decoded to zero frames");
            return Err(DecodeError::Empty.into());
        }
        Ok(pcm) => pcm,
        Err(e) => {
            session.fail();
            stages.settle(PipelineState::Failed);
            log::error!("pipeline error: {e}");
            return Err(e.into());
        }
    };

    session.record_format(pcm.sample_rate(), pcm.channels());
    log::debug!(
        "pipeline: decoded {} frame(s) @ {} Hz x{}",
        pcm.frames(),
        pcm.sample_rate(),
        pcm.channels()
    );

    // ── Merge → resample → encode ────────────────────────────────────────
    stages.enter(PipelineState::Merging);
    let mono = merge_channels(pcm);

    stages.enter(PipelineState::Resampling);
    let mono = resampler.resample(mono, rate);

    stages.enter(PipelineState::Encoding);
    let wav = encode_wav(&mono);

    session.complete();
    stages.settle(PipelineState::Completed);
    log::debug!(
        "pipeline: encoded {} sample(s) @ {rate} Hz ({} bytes)",
        mono.len(),
        wav.len()
    );
    Ok(wav)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{PcmBuffer, ScriptedSource, SymphoniaDecoder, WavHeader};
    use std::io::Cursor;
    use std::time::Duration;

    // -----------------------------------------------------------------------
    // Test doubles
    // -----------------------------------------------------------------------

    /// Decoder that always rejects its input.
    struct FailingDecoder;

    impl ContainerDecoder for FailingDecoder {
        fn decode(&self, _chunks: &[Chunk]) -> Result<PcmBuffer, DecodeError> {
            Err(DecodeError::Malformed("truncated".into()))
        }
    }

    /// Decoder that yields a valid but frameless buffer.
    struct SilentDecoder;

    impl ContainerDecoder for SilentDecoder {
        fn decode(&self, _chunks: &[Chunk]) -> Result<PcmBuffer, DecodeError> {
            Ok(PcmBuffer::new(Vec::new(), 48_000, 1)?)
        }
    }

    /// Decoder that holds its blocking thread before failing.
    struct SlowDecoder(Duration);

    impl ContainerDecoder for SlowDecoder {
        fn decode(&self, _chunks: &[Chunk]) -> Result<PcmBuffer, DecodeError> {
            std::thread::sleep(self.0);
            Err(DecodeError::Malformed("late".into()))
        }
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    /// One second of a 440 Hz sine at 44.1 kHz as a 16-bit WAV with every
    /// channel identical, split into ~100 ms chunks.
    fn sine_chunks(channels: u16) -> Vec<Chunk> {
        let spec = hound::WavSpec {
            channels,
            sample_rate: 44_100,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for i in 0..44_100 {
                let t = i as f32 / 44_100.0;
                let s = ((2.0 * std::f32::consts::PI * 440.0 * t).sin() * 16_000.0) as i16;
                for _ in 0..channels {
                    writer.write_sample(s).unwrap();
                }
            }
            writer.finalize().unwrap();
        }
        cursor
            .into_inner()
            .chunks(8_820 * channels as usize)
            .map(<[u8]>::to_vec)
            .collect()
    }

    fn stereo_sine_chunks() -> Vec<Chunk> {
        sine_chunks(2)
    }

    fn orchestrator(
        source: ScriptedSource,
        decoder: Arc<dyn ContainerDecoder>,
    ) -> PipelineOrchestrator {
        PipelineOrchestrator::new(Box::new(source), decoder, AudioConfig::default())
    }

    // -----------------------------------------------------------------------
    // Tests
    // -----------------------------------------------------------------------

    /// 1 s of 44.1 kHz stereo becomes 16 000 mono samples = 32 000 bytes.
    #[tokio::test]
    async fn stereo_44k_becomes_canonical_wav() {
        let source = ScriptedSource::new(stereo_sine_chunks());
        let probe = source.probe();
        let mut orc = orchestrator(source, Arc::new(SymphoniaDecoder::new()));
        let rx = orc.subscribe();

        let wav = orc.record_and_transcode(async {}).await.expect("pipeline");

        assert_eq!(wav.len(), 44 + 32_000);
        assert_eq!(wav.payload().len(), 32_000);
        let header = WavHeader::parse(wav.as_bytes()).expect("header");
        assert_eq!(header.sample_rate, 16_000);
        assert_eq!(header.channels, 1);
        assert_eq!(header.data_len, 32_000);

        assert_eq!(*rx.borrow(), PipelineState::Completed);
        assert!(!probe.is_held());
        assert_eq!(probe.acquisitions(), 1);
    }

    /// With identical channels the merge is exact, so stereo and mono
    /// recordings of the same signal encode to the same bytes.
    #[tokio::test]
    async fn identical_channels_merge_to_the_mono_result() {
        let mut orc = orchestrator(
            ScriptedSource::new(stereo_sine_chunks()),
            Arc::new(SymphoniaDecoder::new()),
        );
        let from_stereo = orc.record_and_transcode(async {}).await.unwrap();

        let from_mono = transcode_chunks(
            Arc::new(SymphoniaDecoder::new()),
            sine_chunks(1),
            16_000,
            Resampler::Linear,
        )
        .await
        .unwrap();

        assert_eq!(from_stereo.len(), 44 + 32_000);
        assert_eq!(from_stereo.as_bytes(), from_mono.as_bytes());
    }

    #[tokio::test]
    async fn output_is_accepted_by_transcriber() {
        use crate::stt::{MockTranscriber, Transcriber};

        let mut orc = orchestrator(
            ScriptedSource::new(stereo_sine_chunks()),
            Arc::new(SymphoniaDecoder::new()),
        );
        let stt: Arc<dyn Transcriber> = Arc::new(MockTranscriber::ok("four forty"));

        let wav = orc.record_and_transcode(async {}).await.unwrap();
        assert_eq!(stt.transcribe(&wav).await.unwrap(), "four forty");

        let off_rate = orc
            .record_and_transcode_at(22_050, async {})
            .await
            .unwrap();
        assert!(stt.transcribe(&off_rate).await.is_err());
    }

    #[tokio::test]
    async fn identical_input_gives_identical_bytes() {
        let chunks = stereo_sine_chunks();
        let mut orc = orchestrator(
            ScriptedSource::new(chunks.clone()),
            Arc::new(SymphoniaDecoder::new()),
        );

        let first = orc.record_and_transcode(async {}).await.unwrap();
        let second = orc.record_and_transcode(async {}).await.unwrap();
        let offline = transcode_chunks(
            Arc::new(SymphoniaDecoder::new()),
            chunks,
            16_000,
            Resampler::Linear,
        )
        .await
        .unwrap();

        assert_eq!(first.as_bytes(), second.as_bytes());
        assert_eq!(first.as_bytes(), offline.as_bytes());
    }

    #[tokio::test]
    async fn explicit_rate_is_honoured() {
        let mut orc = orchestrator(
            ScriptedSource::new(stereo_sine_chunks()),
            Arc::new(SymphoniaDecoder::new()),
        );

        let wav = orc
            .record_and_transcode_at(8_000, async {})
            .await
            .unwrap();

        let header = WavHeader::parse(wav.as_bytes()).unwrap();
        assert_eq!(header.sample_rate, 8_000);
        assert_eq!(wav.payload().len(), 16_000);
    }

    /// Stopping before any audio arrives is `NoAudioCaptured`, not a crash.
    #[tokio::test]
    async fn immediate_stop_is_no_audio_captured() {
        let source = ScriptedSource::new(Vec::new());
        let probe = source.probe();
        let mut orc = orchestrator(source, Arc::new(SymphoniaDecoder::new()));

        let err = orc.record_and_transcode(async {}).await.unwrap_err();

        assert!(matches!(err, PipelineError::NoAudioCaptured));
        assert_eq!(orc.state(), PipelineState::Idle);
        assert!(!probe.is_held());
    }

    #[tokio::test]
    async fn zero_decoded_frames_is_decode_error() {
        let source = ScriptedSource::new(vec![vec![0u8; 8]]);
        let probe = source.probe();
        let mut orc = orchestrator(source, Arc::new(SilentDecoder));

        let err = orc.record_and_transcode(async {}).await.unwrap_err();

        assert!(matches!(err, PipelineError::Decode(DecodeError::Empty)));
        assert_eq!(orc.state(), PipelineState::Failed);
        assert!(!probe.is_held());
    }

    #[tokio::test]
    async fn header_only_container_is_decode_error() {
        let empty = encode_wav(&crate::audio::MonoPcmBuffer::new(Vec::new(), 44_100));
        let mut orc = orchestrator(
            ScriptedSource::new(vec![empty.into_vec()]),
            Arc::new(SymphoniaDecoder::new()),
        );

        let err = orc.record_and_transcode(async {}).await.unwrap_err();

        assert!(matches!(err, PipelineError::Decode(DecodeError::Empty)));
        assert_eq!(orc.state(), PipelineState::Failed);
    }

    #[tokio::test]
    async fn missing_device_is_device_unavailable() {
        let mut orc = orchestrator(ScriptedSource::unavailable(), Arc::new(SymphoniaDecoder::new()));

        let err = orc.record_and_transcode(async {}).await.unwrap_err();

        assert!(matches!(err, PipelineError::DeviceUnavailable(_)));
        assert_eq!(orc.state(), PipelineState::Failed);
    }

    #[tokio::test]
    async fn decode_failure_sets_failed_and_releases_device() {
        let source = ScriptedSource::new(vec![b"not audio".to_vec()]);
        let probe = source.probe();
        let mut orc = orchestrator(source, Arc::new(FailingDecoder));

        let err = orc.record_and_transcode(async {}).await.unwrap_err();

        assert!(matches!(err, PipelineError::Decode(DecodeError::Malformed(_))));
        assert_eq!(orc.state(), PipelineState::Failed);
        assert!(!probe.is_held());
    }

    #[tokio::test]
    async fn garbage_container_is_decode_error() {
        let mut orc = orchestrator(
            ScriptedSource::new(vec![vec![0xAB; 512]]),
            Arc::new(SymphoniaDecoder::new()),
        );

        let err = orc.record_and_transcode(async {}).await.unwrap_err();
        assert!(matches!(err, PipelineError::Decode(_)));
    }

    /// Dropping the run while it waits for the stop signal releases the device.
    #[tokio::test]
    async fn cancelled_run_releases_device() {
        let source = ScriptedSource::new(stereo_sine_chunks());
        let probe = source.probe();
        let mut orc = orchestrator(source, Arc::new(SymphoniaDecoder::new()));
        let rx = orc.subscribe();

        let run = orc.record_and_transcode(std::future::pending::<()>());
        let outcome = tokio::time::timeout(Duration::from_millis(20), run).await;

        assert!(outcome.is_err(), "run should still be waiting for stop");
        assert_eq!(*rx.borrow(), PipelineState::Idle);
        assert!(!probe.is_held());
        assert_eq!(probe.acquisitions(), 1);
    }

    /// Dropping the run while decode is still on the blocking pool resets
    /// the published state.
    #[tokio::test]
    async fn cancelled_decode_resets_to_idle() {
        let source = ScriptedSource::new(vec![vec![1u8; 16]]);
        let probe = source.probe();
        let mut orc = orchestrator(source, Arc::new(SlowDecoder(Duration::from_millis(300))));
        let mut rx = orc.subscribe();

        let run = orc.record_and_transcode(async {});
        let outcome = tokio::time::timeout(Duration::from_millis(50), run).await;

        assert!(outcome.is_err(), "decode should still be running");
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), PipelineState::Idle);
        assert!(!probe.is_held());
    }

    #[tokio::test]
    async fn transcode_chunks_without_chunks_is_no_audio() {
        let err = transcode_chunks(
            Arc::new(SymphoniaDecoder::new()),
            Vec::new(),
            16_000,
            Resampler::Linear,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, PipelineError::NoAudioCaptured));
    }

    #[test]
    fn capture_errors_map_to_pipeline_errors() {
        assert!(matches!(
            PipelineError::from(CaptureError::AlreadyRecording),
            PipelineError::AlreadyRecording
        ));
        assert!(matches!(
            PipelineError::from(CaptureError::NoDevice),
            PipelineError::DeviceUnavailable(_)
        ));
    }
}
