use crate::capture::AudioFrameSource;
use crate::error::Result;

/// Root-mean-square level of a time-domain frame.
pub fn rms(frame: &[f32]) -> f32 {
    if frame.is_empty() {
        return 0.0;
    }
    let sum: f32 = frame.iter().map(|s| s * s).sum();
    (sum / frame.len() as f32).sqrt()
}

/// Fixed-threshold energy detector over a fixed-size frame buffer.
pub struct EnergyDetector {
    threshold: f32,
    buffer: Vec<f32>,
}

impl EnergyDetector {
    pub fn new(threshold: f32, frame_size: usize) -> Self {
        Self {
            threshold,
            buffer: vec![0.0; frame_size],
        }
    }

    /// Sample the source once and return the frame's RMS level.
    pub fn measure(&mut self, source: &mut dyn AudioFrameSource) -> Result<f32> {
        source.read_frame(&mut self.buffer)?;
        Ok(rms(&self.buffer))
    }

    pub fn is_voice(&self, level: f32) -> bool {
        level > self.threshold
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }
}
