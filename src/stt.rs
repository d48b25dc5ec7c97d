use crate::error::TurnError;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Identifies one recognition session. Ids start at 1 and only grow.
pub type SessionId = u64;

/// Events from a single-utterance recognition session.
#[derive(Debug, Clone, PartialEq)]
pub enum RecognitionEvent {
    /// A finalized transcript. Interim results are never reported.
    Final { session: SessionId, text: String },
    /// The session ended, with or without a result. May arrive well after `stop`.
    Ended(SessionId),
    /// Platform-reported recognition problem, usually followed by `Ended`
    Error(String),
}

/// Platform speech-to-text capability.
///
/// Each `start` captures one utterance and then ends on its own; it is not a
/// continuous free-running capture.
pub trait SpeechRecognizer: Send + Sync {
    fn is_supported(&self) -> bool;

    /// Begin session `session`. Its events must carry that id.
    fn start(&self, session: SessionId, language: &str) -> Result<(), TurnError>;

    /// Stop the current session. Must tolerate an already stopped session.
    fn stop(&self);

    fn subscribe(&self) -> broadcast::Receiver<RecognitionEvent>;
}

/// Speech input controller: starts and stops recognition sessions and keeps
/// track of whether one is active.
pub struct SpeechInput {
    recognizer: Arc<dyn SpeechRecognizer>,
    language: String,
    last_session: SessionId,
    current: Option<SessionId>,
}

impl SpeechInput {
    pub fn new(recognizer: Arc<dyn SpeechRecognizer>, language: impl Into<String>) -> Self {
        Self {
            recognizer,
            language: language.into(),
            last_session: 0,
            current: None,
        }
    }

    /// Begin capturing one utterance.
    pub fn start(&mut self) -> Result<(), TurnError> {
        if !self.recognizer.is_supported() {
            return Err(TurnError::Unsupported(
                "speech recognition is not available on this platform".to_string(),
            ));
        }

        let session = self.last_session + 1;
        self.recognizer.start(session, &self.language)?;
        self.last_session = session;
        self.current = Some(session);
        log::debug!("🎤 Recognition session {} started ({})", session, self.language);
        Ok(())
    }

    /// Best-effort stop of the active session
    pub fn stop(&mut self) {
        if let Some(session) = self.current.take() {
            self.recognizer.stop();
            log::debug!("🎤 Recognition session {} stopped", session);
        }
    }

    /// Record that the platform ended `session`.
    ///
    /// Returns `false` for a session that was already stopped or replaced.
    pub fn mark_ended(&mut self, session: SessionId) -> bool {
        if self.current == Some(session) {
            self.current = None;
            true
        } else {
            log::debug!("🎤 Ignoring end of stale session {}", session);
            false
        }
    }

    /// Whether `session` is the one currently capturing.
    pub fn is_current(&self, session: SessionId) -> bool {
        self.current == Some(session)
    }

    pub fn is_active(&self) -> bool {
        self.current.is_some()
    }

    pub fn is_supported(&self) -> bool {
        self.recognizer.is_supported()
    }
}
