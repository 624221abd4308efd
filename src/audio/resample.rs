//! Channel merging and sample-rate conversion.
//!
//! The transcription service requires **16 kHz mono** audio.  This module
//! provides the two conversion steps between the decoder and the encoder:
//!
//! 1. [`merge_channels`]: average interleaved channels down to mono.
//! 2. [`resample_linear`]: convert any source rate to the target rate.
//!
//! ## Quality note
//!
//! [`resample_linear`] interpolates between the two bracketing source samples
//! and applies no anti-aliasing filter, so downsampling from 44.1/48 kHz can
//! fold content above 8 kHz back into the passband.  It is the default because
//! its output is fully determined by the input samples and the rate pair, so
//! identical input always yields identical bytes on every platform.  Builds with the `high-quality-resample` feature can select
//! [`Resampler::Sinc`] instead (band-limited, via `rubato`).

use serde::{Deserialize, Serialize};

use super::pcm::{MonoPcmBuffer, PcmBuffer};

// ---------------------------------------------------------------------------
// merge_channels
// ---------------------------------------------------------------------------

/// Collapse `buf` to mono by averaging every frame across its channels.
///
/// A mono buffer passes through without copying.  No normalisation or
/// clipping is applied: the mean of samples in `[-1, 1]` stays in `[-1, 1]`.
///
/// # Example
///
/// ```rust
/// use pitchcap::audio::{merge_channels, PcmBuffer};
///
/// let stereo = PcmBuffer::new(vec![0.5_f32, -0.5, 0.2, 0.4], 48_000, 2).unwrap();
/// let mono = merge_channels(stereo);
/// assert_eq!(mono.len(), 2);
/// assert!((mono.samples()[0] - 0.0).abs() < 1e-6);
/// assert!((mono.samples()[1] - 0.3).abs() < 1e-6);
/// ```
pub fn merge_channels(buf: PcmBuffer) -> MonoPcmBuffer {
    let (samples, sample_rate, channels) = buf.into_parts();

    if channels <= 1 {
        return MonoPcmBuffer::new(samples, sample_rate);
    }

    let n = channels as usize;
    let mono = samples
        .chunks_exact(n)
        .map(|frame| frame.iter().sum::<f32>() / n as f32)
        .collect();

    MonoPcmBuffer::new(mono, sample_rate)
}

// ---------------------------------------------------------------------------
// resample_linear
// ---------------------------------------------------------------------------

/// Resample `buf` to `target_rate` Hz using linear interpolation.
///
/// * Equal rates return the input untouched.
/// * An empty input returns an empty buffer tagged with `target_rate`.
///
/// Output length is `round(n / ratio)` with `ratio = source / target`.  Output
/// sample `i` reads the source at fractional position `i * ratio`, blending
/// the samples at `floor` and `min(floor + 1, n - 1)`.
///
/// # Example
///
/// ```rust
/// use pitchcap::audio::{resample_linear, MonoPcmBuffer};
///
/// let hi = MonoPcmBuffer::new(vec![0.5_f32; 480], 48_000);
/// let lo = resample_linear(hi, 16_000);
/// assert_eq!(lo.len(), 160);
/// assert_eq!(lo.sample_rate(), 16_000);
/// ```
pub fn resample_linear(buf: MonoPcmBuffer, target_rate: u32) -> MonoPcmBuffer {
    let source_rate = buf.sample_rate();

    if source_rate == target_rate {
        return buf;
    }

    let input = buf.into_samples();
    if input.is_empty() || source_rate == 0 || target_rate == 0 {
        return MonoPcmBuffer::new(Vec::new(), target_rate);
    }

    let ratio = source_rate as f64 / target_rate as f64;
    let output_len = (input.len() as f64 / ratio).round() as usize;
    let last = input.len() - 1;

    let output = (0..output_len)
        .map(|i| {
            let pos = i as f64 * ratio;
            let floor = (pos.floor() as usize).min(last);
            let ceil = (floor + 1).min(last);
            let frac = (pos - floor as f64) as f32;
            input[floor] * (1.0 - frac) + input[ceil] * frac
        })
        .collect();

    MonoPcmBuffer::new(output, target_rate)
}

// ---------------------------------------------------------------------------
// Resampler selection
// ---------------------------------------------------------------------------

/// Resampling algorithm used by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resampler {
    /// Linear interpolation, no filtering (bit-compatible default).
    #[default]
    Linear,
    /// Windowed-sinc band-limited resampling.  Requires the
    /// `high-quality-resample` feature; otherwise behaves like `Linear`.
    Sinc,
}

impl Resampler {
    /// Convert `buf` to `target_rate` with the selected algorithm.
    pub fn resample(self, buf: MonoPcmBuffer, target_rate: u32) -> MonoPcmBuffer {
        match self {
            Resampler::Linear => resample_linear(buf, target_rate),
            Resampler::Sinc => resample_sinc(buf, target_rate),
        }
    }
}

#[cfg(not(feature = "high-quality-resample"))]
fn resample_sinc(buf: MonoPcmBuffer, target_rate: u32) -> MonoPcmBuffer {
    log::warn!("sinc resampler not compiled in (enable `high-quality-resample`); using linear");
    resample_linear(buf, target_rate)
}

#[cfg(feature = "high-quality-resample")]
fn resample_sinc(buf: MonoPcmBuffer, target_rate: u32) -> MonoPcmBuffer {
    if buf.sample_rate() == target_rate {
        return buf;
    }
    if buf.is_empty() || buf.sample_rate() == 0 || target_rate == 0 {
        return MonoPcmBuffer::new(Vec::new(), target_rate);
    }

    match sinc::process(buf.samples(), buf.sample_rate(), target_rate) {
        Ok(output) => MonoPcmBuffer::new(output, target_rate),
        Err(e) => {
            log::warn!("sinc resampler failed ({e}); falling back to linear");
            resample_linear(buf, target_rate)
        }
    }
}

#[cfg(feature = "high-quality-resample")]
mod sinc {
    use rubato::{
        Resampler as _, SincFixedIn, SincInterpolationParameters, SincInterpolationType,
        WindowFunction,
    };

    const CHUNK: usize = 1024;

    pub(super) fn process(
        input: &[f32],
        source_rate: u32,
        target_rate: u32,
    ) -> Result<Vec<f32>, String> {
        let ratio = target_rate as f64 / source_rate as f64;
        let params = SincInterpolationParameters {
            sinc_len: 128,
            f_cutoff: 0.95,
            interpolation: SincInterpolationType::Cubic,
            oversampling_factor: 256,
            window: WindowFunction::BlackmanHarris2,
        };

        let mut rs = SincFixedIn::<f32>::new(ratio, 1.0, params, CHUNK, 1)
            .map_err(|e| format!("construct: {e}"))?;

        let expected = (input.len() as f64 * ratio).round() as usize;
        let mut out = Vec::with_capacity(expected + CHUNK);

        let mut chunks = input.chunks_exact(CHUNK);
        for chunk in &mut chunks {
            let produced = rs
                .process(&[chunk], None)
                .map_err(|e| format!("process: {e}"))?;
            out.extend_from_slice(&produced[0]);
        }
        let tail = chunks.remainder();
        if !tail.is_empty() {
            let produced = rs
                .process_partial(Some(&[tail][..]), None)
                .map_err(|e| format!("process tail: {e}"))?;
            out.extend_from_slice(&produced[0]);
        }
        // Flush the filter delay line.
        let produced = rs
            .process_partial::<&[f32]>(None, None)
            .map_err(|e| format!("flush: {e}"))?;
        out.extend_from_slice(&produced[0]);

        // Drop the leading filter delay so output aligns with the input.
        let delay = rs.output_delay().min(out.len());
        out.drain(..delay);
        out.resize(expected, 0.0);
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn mono(samples: Vec<f32>, rate: u32) -> MonoPcmBuffer {
        MonoPcmBuffer::new(samples, rate)
    }

    // ---- merge_channels ----------------------------------------------------

    #[test]
    fn merge_mono_passes_through() {
        let input = vec![0.1_f32, 0.2, 0.3];
        let buf = PcmBuffer::new(input.clone(), 22_050, 1).unwrap();
        let out = merge_channels(buf);
        assert_eq!(out.samples(), input.as_slice());
        assert_eq!(out.sample_rate(), 22_050);
    }

    #[test]
    fn merge_stereo_averages_frames() {
        let buf = PcmBuffer::new(vec![1.0_f32, -1.0, 0.5, 0.5], 48_000, 2).unwrap();
        let out = merge_channels(buf);
        assert_eq!(out.len(), 2);
        assert!((out.samples()[0] - 0.0).abs() < 1e-6);
        assert!((out.samples()[1] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn merge_stays_within_unit_range() {
        // Extreme and mixed-sign stereo frames.
        let frames: Vec<f32> = (0..2_000)
            .flat_map(|i| {
                let l = ((i as f32) * 0.37).sin();
                let r = if i % 3 == 0 { 1.0 } else { -((i as f32) * 0.11).cos() };
                [l, r]
            })
            .collect();
        let out = merge_channels(PcmBuffer::new(frames, 44_100, 2).unwrap());
        assert!(out.samples().iter().all(|s| (-1.0..=1.0).contains(s)));
    }

    #[test]
    fn merge_identical_channels_is_lossless() {
        let ch: Vec<f32> = (0..64).map(|i| (i as f32 / 64.0) - 0.5).collect();
        let interleaved: Vec<f32> = ch.iter().flat_map(|&s| [s, s]).collect();
        let out = merge_channels(PcmBuffer::new(interleaved, 44_100, 2).unwrap());
        assert_eq!(out.samples(), ch.as_slice());
    }

    // ---- resample_linear ---------------------------------------------------

    #[test]
    fn equal_rate_is_bit_identical() {
        let input: Vec<f32> = (0..160).map(|i| (i as f32 * 0.173).sin()).collect();
        let out = resample_linear(mono(input.clone(), 16_000), 16_000);
        assert_eq!(out.samples(), input.as_slice());
        assert_eq!(out.sample_rate(), 16_000);
    }

    #[test]
    fn empty_input_returns_empty() {
        let out = resample_linear(mono(Vec::new(), 48_000), 16_000);
        assert!(out.is_empty());
        assert_eq!(out.sample_rate(), 16_000);
    }

    #[test]
    fn single_sample_input() {
        let out = resample_linear(mono(vec![0.25], 8_000), 16_000);
        assert_eq!(out.len(), 2);
        assert!(out.samples().iter().all(|&s| (s - 0.25).abs() < 1e-6));
    }

    #[test]
    fn output_length_matches_rate_ratio() {
        for &(n, from) in &[(480usize, 48_000u32), (44_100, 44_100), (80, 8_000), (22_050, 22_050), (1_234, 44_100)] {
            let out = resample_linear(mono(vec![0.0; n], from), 16_000);
            let expected = (n as f64 * 16_000.0 / from as f64).round() as usize;
            assert!(
                out.len().abs_diff(expected) <= 1,
                "{n} @ {from}: expected ~{expected}, got {}",
                out.len()
            );
        }
    }

    #[test]
    fn one_second_at_44100_becomes_16000_samples() {
        let out = resample_linear(mono(vec![0.0; 44_100], 44_100), 16_000);
        assert_eq!(out.len(), 16_000);
    }

    #[test]
    fn constant_signal_preserves_amplitude() {
        let out = resample_linear(mono(vec![0.5; 441], 44_100), 16_000);
        for &s in out.samples() {
            assert!((s - 0.5).abs() < 1e-6, "amplitude drift: {s}");
        }
    }

    #[test]
    fn upsampling_interpolates_midpoints() {
        // 8 kHz → 16 kHz: ratio 0.5, odd outputs sit halfway between inputs.
        let out = resample_linear(mono(vec![0.0, 1.0, 0.0], 8_000), 16_000);
        assert_eq!(out.len(), 6);
        let expected = [0.0, 0.5, 1.0, 0.5, 0.0, 0.0];
        for (got, want) in out.samples().iter().zip(expected) {
            assert!((got - want).abs() < 1e-6, "{got} vs {want}");
        }
    }

    #[test]
    fn downsampling_picks_fractional_positions() {
        // 48 kHz → 16 kHz: ratio 3, output i reads input[3i] exactly.
        let input: Vec<f32> = (0..9).map(|i| i as f32 / 10.0).collect();
        let out = resample_linear(mono(input, 48_000), 16_000);
        assert_eq!(out.len(), 3);
        for (i, &s) in out.samples().iter().enumerate() {
            assert!((s - (3 * i) as f32 / 10.0).abs() < 1e-6);
        }
    }

    // ---- Resampler ---------------------------------------------------------

    #[test]
    fn default_resampler_is_linear() {
        assert_eq!(Resampler::default(), Resampler::Linear);
    }

    #[test]
    fn resampler_linear_matches_free_function() {
        let input: Vec<f32> = (0..441).map(|i| (i as f32 * 0.05).sin() * 0.8).collect();
        let a = Resampler::Linear.resample(mono(input.clone(), 44_100), 16_000);
        let b = resample_linear(mono(input, 44_100), 16_000);
        assert_eq!(a, b);
    }

    #[test]
    fn sinc_output_length_matches_linear() {
        let input = vec![0.1_f32; 4_800];
        let out = Resampler::Sinc.resample(mono(input, 48_000), 16_000);
        assert_eq!(out.len(), 1_600);
        assert_eq!(out.sample_rate(), 16_000);
    }
}
