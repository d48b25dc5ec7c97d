//! Voice Activity Detection (VAD) Module
//!
//! Samples the microphone while a voice session is on and reports a barge-in
//! when the user is loud enough while the assistant is speaking.

use crate::capture::AudioFrameSource;
use crate::tts::SpeechSynthesizer;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

pub mod energy;
pub use energy::{rms, EnergyDetector};

/// Configuration for energy-based barge-in detection
#[derive(Debug, Clone)]
pub struct VadConfig {
    /// RMS level above which the user counts as speaking (0.0-1.0)
    pub threshold: f32,
    /// Samples per analysed frame
    pub frame_size: usize,
    /// Sampling cadence, roughly one display frame
    pub sample_interval: Duration,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            threshold: 0.06,
            frame_size: 1024,
            sample_interval: Duration::from_millis(16),
        }
    }
}

pub type BargeInCallback = Box<dyn Fn(f32) + Send + Sync>;

/// Background sampling loop that fires `on_barge_in` with the measured level.
///
/// It fires at most once per stretch of assistant speech and never while the
/// assistant is silent.
pub struct BargeInMonitor {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl BargeInMonitor {
    pub fn spawn(
        mut source: Box<dyn AudioFrameSource>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        config: VadConfig,
        cancel: CancellationToken,
        on_barge_in: BargeInCallback,
    ) -> Self {
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            let mut detector = EnergyDetector::new(config.threshold, config.frame_size);
            let mut ticker = tokio::time::interval(config.sample_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut armed = true;

            log::info!(
                "🎙️ Barge-in monitor running (threshold: {:.3})",
                detector.threshold()
            );

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let level = match detector.measure(source.as_mut()) {
                    Ok(level) => level,
                    Err(e) => {
                        log::warn!("🎙️ Microphone sampling failed, barge-in disabled: {}", e);
                        break;
                    }
                };

                if !synthesizer.is_speaking() {
                    armed = true;
                    continue;
                }

                if armed && detector.is_voice(level) {
                    armed = false;
                    log::info!("🗣️ User speech over assistant (rms: {:.3})", level);
                    on_barge_in(level);
                }
            }

            source.close();
            log::debug!("🎙️ Barge-in monitor stopped");
        });

        Self { cancel, handle }
    }

    /// Halt sampling and release the microphone stream.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for BargeInMonitor {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
