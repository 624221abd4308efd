//! Application settings structs, defaults and TOML persistence.
//!
//! All structs implement `Serialize`, `Deserialize`, `Default` and `Clone`
//! so they can be round-tripped through TOML files and shared across threads.
//! Every section is `#[serde(default)]`, so a partial `settings.toml` only
//! overrides the keys it names.

use std::path::Path;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use super::AppPaths;
use crate::audio::{Resampler, CANONICAL_RATE};

// ---------------------------------------------------------------------------
// AudioConfig
// ---------------------------------------------------------------------------

/// Output format of the transcode stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Sample rate of the encoded WAV in Hz (the service requires 16 000).
    pub target_sample_rate: u32,
    /// Resampling algorithm.
    pub resampler: Resampler,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            target_sample_rate: CANONICAL_RATE,
            resampler: Resampler::Linear,
        }
    }
}

// ---------------------------------------------------------------------------
// CaptureConfig
// ---------------------------------------------------------------------------

/// Microphone capture settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Input device name; `None` means the system default.
    pub device: Option<String>,
    /// Ask the device for a 1-channel stream when it offers one.
    pub prefer_mono: bool,
    /// Request echo cancellation from the capture chain.
    pub echo_cancellation: bool,
    /// Request noise suppression from the capture chain.
    pub noise_suppression: bool,
    /// Upper bound on the audio duration held in one chunk, in milliseconds.
    pub chunk_ms: u64,
    /// Audio beyond this many seconds is discarded.
    pub max_recording_secs: f32,
    /// Capacity of the callback → capture-thread queue, in callback blocks.
    pub queue_capacity: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device: None,
            prefer_mono: true,
            echo_cancellation: true,
            noise_suppression: true,
            chunk_ms: 100,
            max_recording_secs: 300.0,
            queue_capacity: 64,
        }
    }
}

// ---------------------------------------------------------------------------
// TranscribeConfig
// ---------------------------------------------------------------------------

/// Settings for the downstream speech-to-text endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscribeConfig {
    /// Post recordings for transcription after encoding.
    pub enabled: bool,
    /// Full URL accepting a multipart `audio` upload.
    pub endpoint: String,
    /// Maximum seconds to wait for a transcript.
    pub timeout_secs: u64,
}

impl Default for TranscribeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: "http://localhost:8000/elevenlabs/stt".into(),
            timeout_secs: 60,
        }
    }
}

// ---------------------------------------------------------------------------
// AppConfig  (top-level)
// ---------------------------------------------------------------------------

/// Top-level application configuration, serialised as `settings.toml`.
///
/// # Persistence
///
/// ```rust,no_run
/// use pitchcap::config::AppConfig;
///
/// // Load (returns Default when file is missing)
/// let config = AppConfig::load().unwrap();
/// assert_eq!(config.audio.target_sample_rate, 16_000);
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub audio: AudioConfig,
    pub capture: CaptureConfig,
    pub transcribe: TranscribeConfig,
}

impl AppConfig {
    /// Load configuration from the platform-appropriate `settings.toml`.
    ///
    /// Returns `Ok(AppConfig::default())` when the file does not exist yet.
    pub fn load() -> Result<Self> {
        Self::load_from(&AppPaths::new().settings_file)
    }

    /// Load from an explicit path and validate it.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the platform-appropriate `settings.toml`.
    pub fn save(&self) -> Result<()> {
        self.save_to(&AppPaths::new().settings_file)
    }

    /// Save to an explicit path, creating parent directories as needed.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.audio.target_sample_rate == 0 {
            bail!("audio.target_sample_rate must be non-zero");
        }
        if self.capture.chunk_ms == 0 {
            bail!("capture.chunk_ms must be non-zero");
        }
        if !(self.capture.max_recording_secs > 0.0) {
            bail!("capture.max_recording_secs must be positive");
        }
        if self.audio.target_sample_rate != CANONICAL_RATE {
            log::warn!(
                "audio.target_sample_rate = {} differs from the {CANONICAL_RATE} Hz the \
                 transcription service expects",
                self.audio.target_sample_rate
            );
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
