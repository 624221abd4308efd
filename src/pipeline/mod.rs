//! Pipeline orchestrator module.
//!
//! This module wires capture, decode, merge, resample and encode into one
//! scoped operation and exposes the state observers watch.
//!
//! # Architecture
//!
//! ```text
//! PipelineOrchestrator::record_and_transcode(stop)   ← async
//!        │
//!        ├─ AudioSource::start            → Recording
//!        ├─ stop.await, AudioSource::stop
//!        ├─ spawn_blocking(decode)        → Decoding
//!        ├─ merge_channels                → Merging
//!        ├─ Resampler::resample           → Resampling
//!        └─ encode_wav                    → Encoding → Completed
//!
//! watch::Receiver<PipelineState> ←─── PipelineOrchestrator::subscribe()
//! ```
//!
//! # Quick start
//!
//! ```rust
//! use std::sync::Arc;
//! use pitchcap::audio::{ScriptedSource, SymphoniaDecoder};
//! use pitchcap::config::AudioConfig;
//! use pitchcap::pipeline::{PipelineError, PipelineOrchestrator};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let mut orchestrator = PipelineOrchestrator::new(
//!     Box::new(ScriptedSource::new(Vec::new())),
//!     Arc::new(SymphoniaDecoder::new()),
//!     AudioConfig::default(),
//! );
//!
//! // Stop immediately: nothing was recorded.
//! let result = orchestrator.record_and_transcode(async {}).await;
//! assert!(matches!(result, Err(PipelineError::NoAudioCaptured)));
//! # }
//! ```

pub mod runner;
pub mod session;
pub mod state;

// ---------------------------------------------------------------------------
// Public re-exports
// ---------------------------------------------------------------------------

pub use runner::{transcode_chunks, PipelineError, PipelineOrchestrator};
pub use session::CaptureSession;
pub use state::{PipelineState, SessionState};
