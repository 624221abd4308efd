//! One recording lifecycle.
//!
//! A [`CaptureSession`] is created per `record_and_transcode` call, owned by
//! the orchestrator, and consumed when the run finishes. Chunks are appended
//! only while the session is recording and are never removed or reordered.

use crate::audio::Chunk;

use super::state::SessionState;

/// State and collected audio of a single recording.
#[derive(Debug, Default)]
pub struct CaptureSession {
    state: SessionState,
    chunks: Vec<Chunk>,
    source_sample_rate: Option<u32>,
    channel_count: Option<u16>,
}

impl CaptureSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Move from `Idle` to `Recording`. Returns `false` for any other state.
    pub fn start(&mut self) -> bool {
        if self.state != SessionState::Idle {
            return false;
        }
        self.state = SessionState::Recording;
        true
    }

    /// Append a chunk. Ignored (returns `false`) unless recording.
    pub fn append(&mut self, chunk: Chunk) -> bool {
        if self.state != SessionState::Recording {
            log::debug!("session: dropping chunk outside Recording ({:?})", self.state);
            return false;
        }
        self.chunks.push(chunk);
        true
    }

    /// Append every chunk of `chunks` in order.
    pub fn extend(&mut self, chunks: Vec<Chunk>) {
        for chunk in chunks {
            if !self.append(chunk) {
                break;
            }
        }
    }

    /// Freeze the chunk sequence.
    pub fn stop(&mut self) {
        if self.state == SessionState::Recording {
            self.state = SessionState::Stopping;
        }
    }

    /// Record the format discovered by the decoder.
    pub fn record_format(&mut self, sample_rate: u32, channels: u16) {
        self.source_sample_rate = Some(sample_rate);
        self.channel_count = Some(channels);
    }

    pub fn complete(&mut self) {
        self.state = SessionState::Completed;
    }

    pub fn fail(&mut self) {
        self.state = SessionState::Failed;
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn chunk_bytes(&self) -> usize {
        self.chunks.iter().map(Vec::len).sum()
    }

    /// Known after decode.
    pub fn source_sample_rate(&self) -> Option<u32> {
        self.source_sample_rate
    }

    /// Known after decode.
    pub fn channel_count(&self) -> Option<u16> {
        self.channel_count
    }
}
