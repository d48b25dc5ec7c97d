//! Messages flowing into and out of the turn controller.

use super::state::TurnState;
use crate::chat::{ChatError, Message};
use tokio::sync::oneshot;

/// What observers of a session are told.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionUpdate {
    StateChanged { from: TurnState, to: TurnState },
    /// A message was appended to the history
    Message(Message),
    /// A failed assistant turn. Shown to the user, never stored in history.
    Error(String),
    /// Something the user should know about that did not fail a turn
    Notice(String),
    VoiceToggled(bool),
}

/// Requests from the outside world, sent through a `TurnHandle`.
#[derive(Debug)]
pub enum TurnCommand {
    /// Typed message from the text input
    Submit(String),
    /// The text input gained focus
    FocusInput,
    StartVoice,
    StopVoice,
    ToggleVoice,
    SetSpeechEnabled(bool),
    SetSpeechRate(f32),
    History(oneshot::Sender<Vec<Message>>),
    Shutdown,
}

/// Events the controller raises for itself from timers and background tasks.
#[derive(Debug)]
pub(crate) enum TurnEvent {
    /// The post-recognition safety delay elapsed for this transcript
    TranscriptReady(String),
    ReplyFinished(Result<String, ChatError>),
    RestartRecognition,
    ClearanceElapsed,
    QuietPeriodElapsed,
    BargeIn { rms: f32 },
}
