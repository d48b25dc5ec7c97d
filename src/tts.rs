use crate::error::TurnError;
use std::sync::Arc;
use tokio::sync::broadcast;

pub type UtteranceId = u64;

pub const MIN_SPEECH_RATE: f32 = 0.1;
pub const MAX_SPEECH_RATE: f32 = 10.0;

#[derive(Debug, Clone)]
pub struct SpeechConfig {
    /// Speak replies aloud
    pub enabled: bool,
    /// Playback rate applied to each utterance (1.0 = normal)
    pub rate: f32,
    /// BCP 47 language tag used for voice selection
    pub language: String,
    /// Name fragment of the preferred voice
    pub preferred_voice: String,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            rate: 1.0,
            language: "en-US".to_string(),
            preferred_voice: "emily".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceInfo {
    pub name: String,
    pub language: String,
}

impl VoiceInfo {
    pub fn new(name: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            language: language.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    pub id: UtteranceId,
    pub text: String,
    pub voice: Option<VoiceInfo>,
    pub rate: f32,
    pub language: String,
}

/// Lifecycle events reported by a synthesizer.
#[derive(Debug, Clone, PartialEq)]
pub enum SynthesisEvent {
    Started(UtteranceId),
    Ended(UtteranceId),
    /// Playback failed or was cut short by `cancel`
    Failed { id: UtteranceId, reason: String },
    /// The set of installed voices changed
    VoicesChanged,
}

/// Platform speech synthesis capability.
pub trait SpeechSynthesizer: Send + Sync {
    fn voices(&self) -> Vec<VoiceInfo>;

    /// Queue an utterance. Lifecycle events arrive on [`subscribe`](Self::subscribe).
    fn speak(&self, utterance: Utterance) -> Result<(), TurnError>;

    /// Stop playback and drop anything queued. Must be a no-op when idle.
    fn cancel(&self);

    fn is_speaking(&self) -> bool;

    fn subscribe(&self) -> broadcast::Receiver<SynthesisEvent>;
}

/// Pick the voice used for replies.
///
/// Order of preference: a voice whose name contains `preferred`, then a
/// neural-quality voice, then a voice for the configured language, then
/// whatever comes first.
pub fn select_voice(voices: &[VoiceInfo], preferred: &str, language: &str) -> Option<VoiceInfo> {
    let preferred = preferred.to_lowercase();
    let primary = language
        .split(['-', '_'])
        .next()
        .unwrap_or(language)
        .to_lowercase();

    let name_contains = |voice: &&VoiceInfo, needle: &str| {
        !needle.is_empty() && voice.name.to_lowercase().contains(needle)
    };

    voices
        .iter()
        .find(|v| name_contains(v, preferred.as_str()))
        .or_else(|| voices.iter().find(|v| name_contains(v, "neural")))
        .or_else(|| {
            voices.iter().find(|v| {
                v.language
                    .split(['-', '_'])
                    .next()
                    .is_some_and(|p| p.eq_ignore_ascii_case(&primary))
            })
        })
        .or_else(|| voices.first())
        .cloned()
}

/// Speech output controller: turns reply text into utterances and exposes
/// cancel and the "is speaking" query to the turn controller.
pub struct SpeechOutput {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    config: SpeechConfig,
    voice: Option<VoiceInfo>,
    next_id: UtteranceId,
}

impl SpeechOutput {
    pub fn new(synthesizer: Arc<dyn SpeechSynthesizer>, config: SpeechConfig) -> Self {
        let mut output = Self {
            synthesizer,
            config,
            voice: None,
            next_id: 1,
        };
        output.refresh_voice();
        output
    }

    /// Recompute the voice after the installed voice set changed
    pub fn refresh_voice(&mut self) {
        let voices = self.synthesizer.voices();
        self.voice = select_voice(&voices, &self.config.preferred_voice, &self.config.language);
        match &self.voice {
            Some(voice) => log::info!("🔊 Using voice '{}' ({})", voice.name, voice.language),
            None => log::debug!("🔊 No voices available yet"),
        }
    }

    /// Start speaking `text`. Returns `None` when there is nothing to say.
    pub fn speak(&mut self, text: &str) -> Result<Option<UtteranceId>, TurnError> {
        if text.trim().is_empty() {
            return Ok(None);
        }

        let id = self.next_id;
        self.next_id += 1;

        let utterance = Utterance {
            id,
            text: text.to_string(),
            voice: self.voice.clone(),
            rate: self.config.rate,
            language: self.config.language.clone(),
        };

        log::debug!("🔊 Speaking utterance {} at rate {:.2}", id, utterance.rate);
        self.synthesizer.speak(utterance)?;
        Ok(Some(id))
    }

    /// Stop playback if anything is playing. Returns whether speech was cut.
    pub fn cancel(&self) -> bool {
        if self.synthesizer.is_speaking() {
            self.synthesizer.cancel();
            true
        } else {
            false
        }
    }

    pub fn is_speaking(&self) -> bool {
        self.synthesizer.is_speaking()
    }

    pub fn set_rate(&mut self, rate: f32) {
        self.config.rate = rate.clamp(MIN_SPEECH_RATE, MAX_SPEECH_RATE);
    }

    pub fn rate(&self) -> f32 {
        self.config.rate
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.config.enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn voice(&self) -> Option<&VoiceInfo> {
        self.voice.as_ref()
    }

    pub fn synthesizer(&self) -> Arc<dyn SpeechSynthesizer> {
        Arc::clone(&self.synthesizer)
    }
}
