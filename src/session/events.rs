use serde::Serialize;

use super::metrics::MetricSnapshot;
use super::state::SessionState;
use crate::storage::{Evaluation, Turn};

/// Lifecycle events published to UI subscribers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    StateChanged {
        from: SessionState,
        to: SessionState,
    },
    TurnAppended {
        turn: Turn,
    },
    MetricsUpdated {
        snapshot: MetricSnapshot,
    },
    /// Partial speech-to-text output, still changing.
    InterimTranscript {
        text: String,
    },
    Warning {
        warning: SessionWarning,
    },
    EvaluationReady {
        evaluation: Evaluation,
    },
}

/// Conditions that change what the user should do next.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionWarning {
    /// The client did not answer; the user can say it again.
    ReplyFailed { message: String },
    /// Audio could not be played; the conversation continues in silence.
    PlaybackFailed { message: String },
    /// The microphone is off until the user retries.
    CaptureHalted { message: String },
    /// The evaluation was built from local metrics.
    EvaluationDegraded { message: String },
}

impl SessionWarning {
    pub fn message(&self) -> &str {
        match self {
            SessionWarning::ReplyFailed { message }
            | SessionWarning::PlaybackFailed { message }
            | SessionWarning::CaptureHalted { message }
            | SessionWarning::EvaluationDegraded { message } => message,
        }
    }
}

impl std::fmt::Display for SessionWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}
