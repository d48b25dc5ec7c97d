use strum::Display;

/// Where the conversation currently is. Exactly one value is live at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display)]
pub enum TurnState {
    /// Rest state, nothing in progress
    #[default]
    Idle,
    /// A recognition session is capturing the user's utterance
    Listening,
    /// A generation request is outstanding
    Thinking,
    /// The assistant's reply is playing
    Speaking,
    /// Quiet period after the assistant finished speaking
    Waiting,
    /// The user cut the assistant off
    Interrupted,
}

impl TurnState {
    /// Transitions the controller is expected to make.
    pub fn can_transition_to(self, next: TurnState) -> bool {
        use TurnState::*;
        matches!(
            (self, next),
            (Idle, Listening | Thinking)
                | (Listening, Thinking | Idle)
                | (Thinking, Speaking | Idle | Listening)
                | (Speaking, Waiting | Interrupted | Idle)
                | (Waiting, Listening | Idle | Thinking)
                | (Interrupted, Listening | Thinking | Idle)
        )
    }

    /// States from which a voice session may (re)open listening.
    pub fn can_start_listening(self) -> bool {
        matches!(
            self,
            TurnState::Idle | TurnState::Waiting | TurnState::Interrupted
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_idle() {
        assert_eq!(TurnState::default(), TurnState::Idle);
    }

    #[test]
    fn test_barge_in_paths() {
        assert!(TurnState::Speaking.can_transition_to(TurnState::Interrupted));
        assert!(TurnState::Interrupted.can_transition_to(TurnState::Listening));
        assert!(!TurnState::Interrupted.can_transition_to(TurnState::Speaking));
        assert!(!TurnState::Listening.can_transition_to(TurnState::Interrupted));
    }

    #[test]
    fn test_speaking_never_skips_to_listening() {
        assert!(!TurnState::Speaking.can_transition_to(TurnState::Listening));
        assert!(!TurnState::Speaking.can_transition_to(TurnState::Thinking));
    }

    #[test]
    fn test_no_state_is_terminal() {
        use TurnState::*;
        for state in [Idle, Listening, Thinking, Speaking, Waiting, Interrupted] {
            assert!(
                [Idle, Listening, Thinking, Speaking, Waiting, Interrupted]
                    .iter()
                    .any(|next| state.can_transition_to(*next)),
                "{} has no way out",
                state
            );
        }
    }

    #[test]
    fn test_display() {
        assert_eq!(TurnState::Interrupted.to_string(), "Interrupted");
    }
}
