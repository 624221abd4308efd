//! Speech-to-text client module.
//!
//! The pipeline's output is consumed by a transcription backend that accepts
//! exactly the canonical WAV layout produced by
//! [`encode_wav`](crate::audio::encode_wav).
//!
//! # Quick start
//!
//! ```rust,no_run
//! use pitchcap::config::TranscribeConfig;
//! use pitchcap::stt::{HttpTranscriber, Transcriber};
//! # async fn example(wav: pitchcap::audio::WavBytes) {
//!
//! let stt = HttpTranscriber::from_config(&TranscribeConfig::default());
//! let text = stt.transcribe(&wav).await.unwrap();
//! println!("{text}");
//! # }
//! ```

pub mod client;

// ── Public re-exports ──────────────────────────────────────────────────────

pub use client::{parse_transcript, HttpTranscriber, TranscribeError, Transcriber, AUDIO_FIELD};

#[cfg(test)]
pub use client::MockTranscriber;
