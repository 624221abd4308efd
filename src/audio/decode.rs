//! Container decoding: captured chunks → interleaved float PCM.
//!
//! [`ContainerDecoder`] is the seam between capture and the numeric stages.
//! [`SymphoniaDecoder`] is the production implementation; it concatenates
//! the chunk sequence into one in-memory container and decodes it fully
//! (never incrementally) with `symphonia`.
//!
//! Supported containers: WAV (integer PCM and IEEE float, including the
//! streaming form written by [`CpalSource`](crate::audio::CpalSource)), Ogg
//! Vorbis, FLAC and Matroska/WebM with one of those codecs.  Anything else is
//! a [`DecodeError::Unsupported`].

use std::io::Cursor;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use thiserror::Error;

use super::capture::Chunk;
use super::pcm::{PcmBuffer, PcmError};
use super::wav::STREAMING_LEN;

// ---------------------------------------------------------------------------
// DecodeError
// ---------------------------------------------------------------------------

/// Why a captured container could not be turned into PCM.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DecodeError {
    /// No bytes, or a well-formed container with zero audio frames.
    #[error("container holds no audio")]
    Empty,

    #[error("unrecognised container format: {0}")]
    Probe(String),

    #[error("container has no decodable audio track")]
    NoTrack,

    #[error("unsupported codec or layout: {0}")]
    Unsupported(String),

    #[error("malformed container: {0}")]
    Malformed(String),

    #[error("decoded audio is invalid: {0}")]
    InvalidPcm(#[from] PcmError),
}

// ---------------------------------------------------------------------------
// ContainerDecoder trait
// ---------------------------------------------------------------------------

/// Decodes a complete, ordered chunk sequence into a [`PcmBuffer`].
///
/// Implementations must be deterministic: identical bytes always produce
/// identical samples.  They must also reject non-finite samples, so that the
/// merge / resample / encode stages never see NaN.
pub trait ContainerDecoder: Send + Sync {
    fn decode(&self, chunks: &[Chunk]) -> Result<PcmBuffer, DecodeError>;
}

// Compile-time assertion: Box<dyn ContainerDecoder> must be constructible.
const _: fn() = || {
    fn _assert_object_safe(_: Box<dyn ContainerDecoder>) {}
};

// ---------------------------------------------------------------------------
// SymphoniaDecoder
// ---------------------------------------------------------------------------

/// Production decoder built on `symphonia`'s probe and codec registries.
#[derive(Debug, Clone, Copy, Default)]
pub struct SymphoniaDecoder;

impl SymphoniaDecoder {
    pub fn new() -> Self {
        Self
    }

    /// Decode one contiguous container held in memory.
    pub fn decode_bytes(&self, mut data: Vec<u8>) -> Result<PcmBuffer, DecodeError> {
        if data.is_empty() {
            return Err(DecodeError::Empty);
        }
        seal_streaming_riff(&mut data);

        let mss = MediaSourceStream::new(Box::new(Cursor::new(data)), Default::default());
        let probed = symphonia::default::get_probe()
            .format(
                &Hint::new(),
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| DecodeError::Probe(e.to_string()))?;

        let mut format = probed.format;
        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or(DecodeError::NoTrack)?;

        let track_id = track.id;
        let mut sample_rate = track.codec_params.sample_rate;
        let mut channels = track.codec_params.channels.map(|c| c.count() as u16);
        check_channels(channels)?;

        let mut decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| match e {
                SymphoniaError::Unsupported(what) => DecodeError::Unsupported(what.to_string()),
                other => DecodeError::Malformed(other.to_string()),
            })?;

        let mut samples: Vec<f32> = Vec::new();
        let mut packets = 0usize;

        loop {
            let packet = match format.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break;
                }
                Err(SymphoniaError::ResetRequired) => break,
                Err(e) => return Err(DecodeError::Malformed(e.to_string())),
            };

            if packet.track_id() != track_id {
                continue;
            }

            let decoded = decoder
                .decode(&packet)
                .map_err(|e| DecodeError::Malformed(e.to_string()))?;

            let spec = *decoded.spec();
            sample_rate.get_or_insert(spec.rate);
            channels.get_or_insert(spec.channels.count() as u16);

            let mut sample_buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
            sample_buf.copy_interleaved_ref(decoded);
            samples.extend_from_slice(sample_buf.samples());
            packets += 1;
        }

        if samples.is_empty() {
            return Err(DecodeError::Empty);
        }

        let sample_rate =
            sample_rate.ok_or_else(|| DecodeError::Malformed("no sample rate".into()))?;
        check_channels(channels)?;
        let channels = channels.unwrap_or(1);

        // Codec overshoot can land a hair outside full scale; NaN survives
        // the clamp and is rejected by PcmBuffer::new.
        for s in &mut samples {
            *s = s.clamp(-1.0, 1.0);
        }

        log::debug!(
            "decode: {packets} packets → {} samples @ {sample_rate} Hz, {channels} ch",
            samples.len()
        );

        Ok(PcmBuffer::new(samples, sample_rate, channels)?)
    }
}

fn check_channels(channels: Option<u16>) -> Result<(), DecodeError> {
    match channels {
        Some(n) if n > super::pcm::MAX_CHANNELS => {
            Err(DecodeError::Unsupported(format!("{n} channels")))
        }
        _ => Ok(()),
    }
}

impl ContainerDecoder for SymphoniaDecoder {
    fn decode(&self, chunks: &[Chunk]) -> Result<PcmBuffer, DecodeError> {
        let total: usize = chunks.iter().map(Vec::len).sum();
        let mut data = Vec::with_capacity(total);
        for chunk in chunks {
            data.extend_from_slice(chunk);
        }
        self.decode_bytes(data)
    }
}

// ---------------------------------------------------------------------------
// Streaming RIFF sealing
// ---------------------------------------------------------------------------

/// Replace [`STREAMING_LEN`] placeholders in a RIFF/WAVE container with the
/// real sizes.  Containers that are not RIFF/WAVE, or whose sizes are already
/// final, are left untouched.
pub fn seal_streaming_riff(data: &mut [u8]) {
    if data.len() < 12 || &data[0..4] != b"RIFF" || &data[8..12] != b"WAVE" {
        return;
    }

    let read_u32 = |d: &[u8], i: usize| u32::from_le_bytes([d[i], d[i + 1], d[i + 2], d[i + 3]]);
    let total = data.len();

    if read_u32(data, 4) == STREAMING_LEN {
        let riff_len = (total - 8) as u32;
        data[4..8].copy_from_slice(&riff_len.to_le_bytes());
    }

    let mut offset = 12;
    while offset + 8 <= total {
        let size = read_u32(data, offset + 4);
        if &data[offset..offset + 4] == b"data" {
            if size == STREAMING_LEN {
                let data_len = (total - offset - 8) as u32;
                data[offset + 4..offset + 8].copy_from_slice(&data_len.to_le_bytes());
            }
            return;
        }
        // Chunks are word aligned.
        let skip = size as usize + (size as usize & 1);
        offset = match offset.checked_add(8 + skip) {
            Some(next) => next,
            None => return,
        };
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
