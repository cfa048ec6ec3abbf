use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Live state of a session.
///
/// ```text
/// connecting -> greeting -> listening <-> thinking -> speaking -> listening
///                              \            |           /
///                               +------- paused -------+
/// ```
/// `paused` returns to the state it was entered from. Every non-terminal
/// state can move to `ended`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Connecting,
    Greeting,
    Listening,
    /// Waiting on the client's reply.
    Thinking,
    /// Playing the client's reply.
    Speaking,
    Paused,
    Ended,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Connecting => "connecting",
            SessionState::Greeting => "greeting",
            SessionState::Listening => "listening",
            SessionState::Thinking => "thinking",
            SessionState::Speaking => "speaking",
            SessionState::Paused => "paused",
            SessionState::Ended => "ended",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Ended)
    }

    pub fn can_pause(&self) -> bool {
        matches!(
            self,
            SessionState::Listening | SessionState::Thinking | SessionState::Speaking
        )
    }

    pub fn can_transition_to(&self, to: SessionState) -> bool {
        use SessionState::*;

        match (*self, to) {
            (Ended, _) => false,
            (_, Ended) => true,
            (Connecting, Greeting) => true,
            (Greeting, Listening | Speaking) => true,
            (Listening, Thinking) => true,
            (Thinking, Listening | Speaking) => true,
            (Speaking, Listening) => true,
            (from, Paused) => from.can_pause(),
            (Paused, to) => to.can_pause(),
            _ => false,
        }
    }

    /// Validate a transition, returning the target state.
    pub fn transition(self, to: SessionState) -> Result<SessionState, ValidationError> {
        if self.can_transition_to(to) {
            Ok(to)
        } else {
            Err(ValidationError::InvalidTransition {
                from: self.to_string(),
                to: to.to_string(),
            })
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
