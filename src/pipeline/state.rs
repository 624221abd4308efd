//! Pipeline and capture-session state machines.
//!
//! [`PipelineState`] drives the orchestrator and is published to observers
//! through a `tokio::sync::watch` channel. [`SessionState`] tracks the
//! lifecycle of a single [`CaptureSession`](super::CaptureSession).

// ---------------------------------------------------------------------------
// PipelineState
// ---------------------------------------------------------------------------

/// States of the record-and-transcode pipeline.
///
/// The state machine transitions are:
///
/// ```text
/// Idle ──start──▶ Recording ──stop──▶ Decoding ──▶ Merging ──▶ Resampling
///      ──▶ Encoding ──▶ Completed
/// Recording / Decoding ──device or decode failure──▶ Failed
/// Recording ──stop with no audio──▶ Idle
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PipelineState {
    /// No recording in progress.
    #[default]
    Idle,

    /// The capture device is held and chunks are being collected.
    Recording,

    /// Collected chunks are being decoded on the blocking pool.
    Decoding,

    /// Decoded PCM is being reduced to mono.
    Merging,

    /// Mono PCM is being converted to the target rate.
    Resampling,

    /// Canonical WAV bytes are being produced.
    Encoding,

    /// The last run produced a WAV file.
    Completed,

    /// The last run failed with a device or decode error.
    Failed,
}

impl PipelineState {
    /// Returns `true` while a run is in progress.
    ///
    /// ```
    /// use pitchcap::pipeline::PipelineState;
    ///
    /// assert!(!PipelineState::Idle.is_busy());
    /// assert!(PipelineState::Recording.is_busy());
    /// assert!(PipelineState::Resampling.is_busy());
    /// assert!(!PipelineState::Completed.is_busy());
    /// assert!(!PipelineState::Failed.is_busy());
    /// ```
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            PipelineState::Recording
                | PipelineState::Decoding
                | PipelineState::Merging
                | PipelineState::Resampling
                | PipelineState::Encoding
        )
    }

    /// A short human-readable label suitable for a status line.
    pub fn label(&self) -> &'static str {
        match self {
            PipelineState::Idle => "Idle",
            PipelineState::Recording => "Recording",
            PipelineState::Decoding => "Decoding",
            PipelineState::Merging => "Merging",
            PipelineState::Resampling => "Resampling",
            PipelineState::Encoding => "Encoding",
            PipelineState::Completed => "Done",
            PipelineState::Failed => "Failed",
        }
    }
}

// ---------------------------------------------------------------------------
// SessionState
// ---------------------------------------------------------------------------

/// Lifecycle of one capture session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Recording,
    Stopping,
    Completed,
    Failed,
}

impl SessionState {
    /// `true` once the session can no longer change.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Failed)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
