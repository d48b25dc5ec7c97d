use super::state::TurnState;
use crate::chat::ConversationHistory;
use crate::gate::SendGate;
use crate::stt::SpeechInput;
use crate::tts::{SpeechOutput, UtteranceId};
use crate::vad::BargeInMonitor;

/// State of an active voice session. Created by "start voice", dropped by
/// "stop voice", which also releases the microphone.
pub struct VoiceSession {
    enabled: bool,
    last_final_transcript: Option<String>,
    monitor: Option<BargeInMonitor>,
}

impl VoiceSession {
    pub fn new() -> Self {
        Self {
            enabled: true,
            last_final_transcript: None,
            monitor: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Filter a finalized transcript.
    ///
    /// Returns the trimmed transcript when it should be sent, or `None` when it
    /// is empty or repeats the previous accepted transcript.
    pub fn accept_transcript(&mut self, raw: &str) -> Option<String> {
        let transcript = raw.trim();
        if transcript.is_empty() {
            return None;
        }
        if self.last_final_transcript.as_deref() == Some(transcript) {
            return None;
        }
        self.last_final_transcript = Some(transcript.to_string());
        Some(transcript.to_string())
    }

    pub fn last_final_transcript(&self) -> Option<&str> {
        self.last_final_transcript.as_deref()
    }

    pub fn attach_monitor(&mut self, monitor: BargeInMonitor) {
        self.monitor = Some(monitor);
    }

    pub fn has_monitor(&self) -> bool {
        self.monitor.is_some()
    }

    /// Disable the session and stop barge-in sampling.
    pub fn close(&mut self) {
        self.enabled = false;
        if let Some(monitor) = self.monitor.take() {
            monitor.stop();
        }
    }
}

impl Default for VoiceSession {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything a conversation owns. Held only by the turn controller task, so
/// nothing in here needs a lock.
pub struct SessionContext {
    pub(crate) state: TurnState,
    pub(crate) history: ConversationHistory,
    pub(crate) gate: SendGate,
    pub(crate) speech: SpeechOutput,
    pub(crate) input: SpeechInput,
    pub(crate) voice: Option<VoiceSession>,
    /// Utterance whose end moves the conversation on. Cleared on interrupt, so
    /// events from a cancelled utterance are ignored.
    pub(crate) active_utterance: Option<UtteranceId>,
}

impl SessionContext {
    pub fn new(gate: SendGate, speech: SpeechOutput, input: SpeechInput) -> Self {
        Self {
            state: TurnState::Idle,
            history: ConversationHistory::new(),
            gate,
            speech,
            input,
            voice: None,
            active_utterance: None,
        }
    }

    pub fn voice_enabled(&self) -> bool {
        self.voice.as_ref().is_some_and(VoiceSession::is_enabled)
    }
}
