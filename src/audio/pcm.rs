//! Floating-point PCM buffers passed between pipeline stages.
//!
//! [`PcmBuffer`] is what the container decoder produces: interleaved `f32`
//! samples tagged with their sample rate and channel count.  The channel
//! merger turns it into a [`MonoPcmBuffer`], which the resampler and the WAV
//! encoder consume.
//!
//! Every stage takes its input **by value** and returns a new buffer, so no
//! two stages ever alias the same storage.

use thiserror::Error;

/// Highest channel count the pipeline accepts (mono or stereo).
pub const MAX_CHANNELS: u16 = 2;

// ---------------------------------------------------------------------------
// PcmError
// ---------------------------------------------------------------------------

/// Reasons a set of samples cannot form a valid [`PcmBuffer`].
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PcmError {
    #[error("sample rate must be non-zero")]
    ZeroSampleRate,

    #[error("unsupported channel count {0} (expected 1..={MAX_CHANNELS})")]
    UnsupportedChannels(u16),

    #[error("{len} samples do not divide into whole frames of {channels} channels")]
    PartialFrame { len: usize, channels: u16 },

    #[error("non-finite sample at index {index}")]
    NonFinite { index: usize },
}

// ---------------------------------------------------------------------------
// PcmBuffer
// ---------------------------------------------------------------------------

/// Interleaved PCM audio with 1 or 2 channels.
///
/// Invariant: `samples.len() == frames() * channels()`, every sample is
/// finite.
#[derive(Debug, Clone, PartialEq)]
pub struct PcmBuffer {
    samples: Vec<f32>,
    sample_rate: u32,
    channels: u16,
}

impl PcmBuffer {
    /// Build a buffer, checking the frame invariant and sample validity.
    ///
    /// # Errors
    ///
    /// Returns a [`PcmError`] when the rate is zero, the channel count is
    /// outside `1..=2`, the sample count is not a whole number of frames, or
    /// a sample is NaN / infinite.
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Result<Self, PcmError> {
        if sample_rate == 0 {
            return Err(PcmError::ZeroSampleRate);
        }
        if channels == 0 || channels > MAX_CHANNELS {
            return Err(PcmError::UnsupportedChannels(channels));
        }
        if samples.len() % channels as usize != 0 {
            return Err(PcmError::PartialFrame {
                len: samples.len(),
                channels,
            });
        }
        if let Some(index) = samples.iter().position(|s| !s.is_finite()) {
            return Err(PcmError::NonFinite { index });
        }

        Ok(Self {
            samples,
            sample_rate,
            channels,
        })
    }

    /// Interleaved samples.
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Number of frames (samples per channel).
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Duration in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Consume the buffer, returning `(samples, sample_rate, channels)`.
    pub fn into_parts(self) -> (Vec<f32>, u32, u16) {
        (self.samples, self.sample_rate, self.channels)
    }
}

// ---------------------------------------------------------------------------
// MonoPcmBuffer
// ---------------------------------------------------------------------------

/// Single-channel PCM audio.
#[derive(Debug, Clone, PartialEq)]
pub struct MonoPcmBuffer {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl MonoPcmBuffer {
    /// Wrap mono samples recorded at `sample_rate` Hz.
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Duration in seconds; `0.0` for a zero sample rate.
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stereo_buffer_reports_frames() {
        let buf = PcmBuffer::new(vec![0.1, 0.2, 0.3, 0.4], 48_000, 2).unwrap();
        assert_eq!(buf.frames(), 2);
        assert_eq!(buf.channels(), 2);
        assert_eq!(buf.sample_rate(), 48_000);
    }

    #[test]
    fn partial_frame_rejected() {
        let err = PcmBuffer::new(vec![0.1, 0.2, 0.3], 48_000, 2).unwrap_err();
        assert_eq!(err, PcmError::PartialFrame { len: 3, channels: 2 });
    }

    #[test]
    fn zero_rate_rejected() {
        assert_eq!(
            PcmBuffer::new(vec![0.0], 0, 1).unwrap_err(),
            PcmError::ZeroSampleRate
        );
    }

    #[test]
    fn more_than_two_channels_rejected() {
        let err = PcmBuffer::new(vec![0.0; 6], 48_000, 3).unwrap_err();
        assert_eq!(err, PcmError::UnsupportedChannels(3));
        let err = PcmBuffer::new(Vec::new(), 48_000, 0).unwrap_err();
        assert_eq!(err, PcmError::UnsupportedChannels(0));
    }

    #[test]
    fn nan_sample_rejected() {
        let err = PcmBuffer::new(vec![0.0, f32::NAN], 16_000, 1).unwrap_err();
        assert_eq!(err, PcmError::NonFinite { index: 1 });
    }

    #[test]
    fn empty_buffer_is_valid() {
        let buf = PcmBuffer::new(Vec::new(), 44_100, 2).unwrap();
        assert!(buf.is_empty());
        assert_eq!(buf.frames(), 0);
    }

    #[test]
    fn mono_duration() {
        let mono = MonoPcmBuffer::new(vec![0.0; 8_000], 16_000);
        assert!((mono.duration_secs() - 0.5).abs() < 1e-9);
    }
}
