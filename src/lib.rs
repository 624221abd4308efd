//! pitchcap: microphone capture to canonical 16 kHz mono WAV.
//!
//! A recording is captured as an encoded container, decoded to float PCM,
//! averaged to mono, linearly resampled to the target rate and serialised as
//! a 44-byte-header 16-bit PCM WAV that a speech-to-text backend accepts.
//!
//! - [`audio`]: capture, decode, merge, resample and encode stages
//! - [`pipeline`]: the orchestrator that runs them as one scoped operation
//! - [`config`]: TOML settings
//! - [`stt`]: client for the downstream transcription service

pub mod audio;
pub mod config;
pub mod pipeline;
pub mod stt;
