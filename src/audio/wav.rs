//! Canonical WAV serialisation: mono, 16-bit signed little-endian PCM.
//!
//! [`encode_wav`] emits a 44-byte RIFF/WAVE header followed by the payload:
//!
//! ```text
//! Offset  Size  Field            Value
//! 0       4     ChunkID          "RIFF"
//! 4       4     ChunkSize        36 + dataBytes
//! 8       4     Format           "WAVE"
//! 12      4     Subchunk1ID      "fmt "
//! 16      4     Subchunk1Size    16
//! 20      2     AudioFormat      1 (PCM)
//! 22      2     NumChannels      1
//! 24      4     SampleRate       e.g. 16000
//! 28      4     ByteRate         SampleRate * BlockAlign
//! 32      2     BlockAlign       NumChannels * 2
//! 34      2     BitsPerSample    16
//! 36      4     Subchunk2ID      "data"
//! 40      4     Subchunk2Size    dataBytes
//! 44      N     samples
//! ```

use super::pcm::MonoPcmBuffer;

/// Size of the canonical header in bytes.
pub const HEADER_LEN: usize = 44;

/// Size-field placeholder used while the final length is still unknown.
pub const STREAMING_LEN: u32 = 0xFFFF_FFFF;

const FORMAT_PCM: u16 = 1;
const FORMAT_IEEE_FLOAT: u16 = 3;
const BITS_PER_SAMPLE: u16 = 16;

/// Header opening a live capture stream of interleaved `f32` frames.
///
/// Both size fields carry [`STREAMING_LEN`]; the decoder seals them once
/// the whole recording is available.  The `fmt ` chunk is the 18-byte
/// `WAVEFORMATEX` form (`cbSize = 0`) required for non-PCM tags.
pub fn streaming_f32_header(sample_rate: u32, channels: u16) -> Vec<u8> {
    let block_align = channels * 4;
    let mut out = Vec::with_capacity(46);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&STREAMING_LEN.to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&18u32.to_le_bytes());
    out.extend_from_slice(&FORMAT_IEEE_FLOAT.to_le_bytes());
    out.extend_from_slice(&channels.to_le_bytes());
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&(sample_rate * block_align as u32).to_le_bytes());
    out.extend_from_slice(&block_align.to_le_bytes());
    out.extend_from_slice(&32u16.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&STREAMING_LEN.to_le_bytes());
    out
}

// ---------------------------------------------------------------------------
// WavHeader
// ---------------------------------------------------------------------------

/// The fields of a canonical 44-byte PCM WAV header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavHeader {
    pub channels: u16,
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    /// Payload length in bytes (`Subchunk2Size`).
    pub data_len: u32,
}

impl WavHeader {
    /// Header for `sample_count` mono 16-bit samples at `sample_rate`.
    pub fn mono_pcm16(sample_rate: u32, sample_count: usize) -> Self {
        Self {
            channels: 1,
            sample_rate,
            bits_per_sample: BITS_PER_SAMPLE,
            data_len: (sample_count * 2) as u32,
        }
    }

    pub fn block_align(&self) -> u16 {
        self.channels * (self.bits_per_sample / 8)
    }

    pub fn byte_rate(&self) -> u32 {
        self.sample_rate * self.block_align() as u32
    }

    /// `ChunkSize` field: everything after the first 8 bytes.
    pub fn riff_len(&self) -> u32 {
        36 + self.data_len
    }

    /// Serialise the header into its 44-byte wire form.
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0..4].copy_from_slice(b"RIFF");
        out[4..8].copy_from_slice(&self.riff_len().to_le_bytes());
        out[8..12].copy_from_slice(b"WAVE");
        out[12..16].copy_from_slice(b"fmt ");
        out[16..20].copy_from_slice(&16u32.to_le_bytes());
        out[20..22].copy_from_slice(&FORMAT_PCM.to_le_bytes());
        out[22..24].copy_from_slice(&self.channels.to_le_bytes());
        out[24..28].copy_from_slice(&self.sample_rate.to_le_bytes());
        out[28..32].copy_from_slice(&self.byte_rate().to_le_bytes());
        out[32..34].copy_from_slice(&self.block_align().to_le_bytes());
        out[34..36].copy_from_slice(&self.bits_per_sample.to_le_bytes());
        out[36..40].copy_from_slice(b"data");
        out[40..44].copy_from_slice(&self.data_len.to_le_bytes());
        out
    }

    /// Parse a canonical 44-byte PCM header from the start of `bytes`.
    ///
    /// Returns `None` when the magic numbers, `fmt ` size or format tag do
    /// not match the canonical layout.  Headers with extra chunks are not
    /// recognised.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < HEADER_LEN
            || &bytes[0..4] != b"RIFF"
            || &bytes[8..12] != b"WAVE"
            || &bytes[12..16] != b"fmt "
            || &bytes[36..40] != b"data"
        {
            return None;
        }

        let u16_at = |i: usize| u16::from_le_bytes([bytes[i], bytes[i + 1]]);
        let u32_at =
            |i: usize| u32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);

        if u32_at(16) != 16 || u16_at(20) != FORMAT_PCM {
            return None;
        }

        Some(Self {
            channels: u16_at(22),
            sample_rate: u32_at(24),
            bits_per_sample: u16_at(34),
            data_len: u32_at(40),
        })
    }
}

// ---------------------------------------------------------------------------
// WavBytes
// ---------------------------------------------------------------------------

/// A complete, self-contained WAV file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WavBytes(Vec<u8>);

impl WavBytes {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always `false`: even an empty recording carries a header.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The PCM payload following the header.
    pub fn payload(&self) -> &[u8] {
        &self.0[HEADER_LEN..]
    }

    pub fn header(&self) -> WavHeader {
        // Only `encode_wav` constructs WavBytes, so the header is canonical.
        WavHeader::parse(&self.0).unwrap_or(WavHeader::mono_pcm16(0, 0))
    }

    /// Duration in seconds.
    pub fn duration_secs(&self) -> f64 {
        let header = self.header();
        if header.byte_rate() == 0 {
            return 0.0;
        }
        header.data_len as f64 / header.byte_rate() as f64
    }
}

impl AsRef<[u8]> for WavBytes {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Quantise one float sample to signed 16-bit.
///
/// The sample is clamped to `[-1, 1]`; positive values scale by `32767`,
/// negative values by `32768`, so both ends of the range map onto the full
/// `i16` range.
pub fn quantize_sample(sample: f32) -> i16 {
    let s = sample.clamp(-1.0, 1.0);
    if s >= 0.0 {
        (s * 32_767.0).round() as i16
    } else {
        (s * 32_768.0).round() as i16
    }
}

/// Serialise `buf` as a mono 16-bit PCM WAV file at `buf.sample_rate()`.
///
/// # Example
///
/// ```rust
/// use pitchcap::audio::{encode_wav, MonoPcmBuffer};
///
/// let wav = encode_wav(&MonoPcmBuffer::new(vec![0.0; 16_000], 16_000));
/// assert_eq!(wav.len(), 44 + 32_000);
/// assert_eq!(&wav.as_bytes()[0..4], b"RIFF");
/// ```
pub fn encode_wav(buf: &MonoPcmBuffer) -> WavBytes {
    let header = WavHeader::mono_pcm16(buf.sample_rate(), buf.len());

    let mut out = Vec::with_capacity(HEADER_LEN + buf.len() * 2);
    out.extend_from_slice(&header.to_bytes());
    for &sample in buf.samples() {
        out.extend_from_slice(&quantize_sample(sample).to_le_bytes());
    }

    WavBytes(out)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
