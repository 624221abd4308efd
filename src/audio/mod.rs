//! Audio pipeline stages: capture → decode → merge → resample → encode.
//!
//! # Pipeline
//!
//! ```text
//! AudioSource::start/stop ─▶ Vec<Chunk> ─▶ ContainerDecoder::decode ─▶ PcmBuffer
//!   ─▶ merge_channels ─▶ MonoPcmBuffer ─▶ resample_linear(16 kHz) ─▶ encode_wav ─▶ WavBytes
//! ```
//!
//! # Quick Start
//!
//! ```rust
//! use pitchcap::audio::{encode_wav, merge_channels, resample_linear, PcmBuffer};
//!
//! // 10 ms of stereo silence at 48 kHz
//! let pcm = PcmBuffer::new(vec![0.0; 960], 48_000, 2).unwrap();
//! let mono = merge_channels(pcm);
//! let mono_16k = resample_linear(mono, 16_000);
//! let wav = encode_wav(&mono_16k);
//! assert_eq!(wav.payload().len(), 160 * 2);
//! ```

pub mod capture;
pub mod decode;
pub mod pcm;
pub mod resample;
pub mod wav;

pub use capture::{
    list_input_devices, AudioSource, CaptureError, Chunk, ChunkAssembler, CpalSource, DeviceProbe,
    ScriptedSource, StreamFormat,
};
pub use decode::{ContainerDecoder, DecodeError, SymphoniaDecoder};
pub use pcm::{MonoPcmBuffer, PcmBuffer, PcmError};
pub use resample::{merge_channels, resample_linear, Resampler};
pub use wav::{encode_wav, quantize_sample, WavBytes, WavHeader};

/// Sample rate expected by the transcription service.
pub const CANONICAL_RATE: u32 = 16_000;
