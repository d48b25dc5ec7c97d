//! Microphone capability used for barge-in detection.

use crate::error::TurnError;
use async_trait::async_trait;

/// An open microphone stream that can be sampled on demand.
pub trait AudioFrameSource: Send {
    /// Copy the most recent time-domain window into `frame`.
    ///
    /// Samples are normalised to `[-1.0, 1.0]`; the window length is
    /// `frame.len()`.
    fn read_frame(&mut self, frame: &mut [f32]) -> Result<(), TurnError>;

    /// Release the underlying stream. Must tolerate repeated calls.
    fn close(&mut self);
}

/// Platform microphone access.
#[async_trait]
pub trait Microphone: Send + Sync {
    /// Acquire a microphone stream. Fails with [`TurnError::Capture`] when the
    /// device is missing or access is denied.
    async fn open(&self) -> Result<Box<dyn AudioFrameSource>, TurnError>;
}
