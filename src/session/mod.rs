//! Live training session pipeline.
//!
//! A [`SessionOrchestrator`] owns one training attempt end to end: the
//! transcript, live metrics, active-time accounting, speech I/O and the
//! state machine that sequences them. One orchestrator is created per
//! attempt; nothing is shared between sessions.

mod clock;
mod events;
mod metrics;
mod orchestrator;
mod persistence;
mod state;
mod transcript;

pub use clock::{whole_secs, ActiveTimer, Clock, ManualClock, SystemClock};
pub use events::{SessionEvent, SessionWarning};
pub use metrics::{composite, MetricSnapshot, MetricsEngine, Trend};
pub use orchestrator::{SessionDeps, SessionOrchestrator};
pub use persistence::Persistence;
pub use state::SessionState;
pub use transcript::TranscriptStore;

use serde::{Deserialize, Serialize};

use crate::storage::{ClientPersona, Evaluation, InteractionMode, Scenario, Session, Turn};

/// Immutable setup for one training attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub user_id: String,
    pub scenario: Scenario,
    pub mode: InteractionMode,
    pub persona: ClientPersona,
}

/// What happened to a user submission.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    /// Blank after trimming. Nothing changed.
    Ignored,
    /// Not listening; the submission was dropped.
    Busy { state: SessionState },
    Replied { agent: Turn },
    /// The reply failed or timed out. The user turn stands, no agent turn was
    /// added and the session is listening again.
    ReplyFailed { message: String },
    /// The reply arrived while paused. It is in the transcript and will be
    /// spoken, if at all, on resume.
    Deferred { agent: Turn },
    /// The session ended while the reply was outstanding; it was discarded.
    Cancelled,
}

/// Result of ending a session.
#[derive(Debug, Clone, PartialEq)]
pub enum EndOutcome {
    /// Too few turns for an evaluation. No evaluation was produced.
    TooShort { turns: usize },
    Evaluated { evaluation: Evaluation },
    AlreadyEnded { evaluation: Option<Evaluation> },
}

/// Read-only view of a session for UI binding.
#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub state: SessionState,
    pub paused_from: Option<SessionState>,
    pub session: Session,
    pub turns: Vec<Turn>,
    pub metrics: Option<MetricSnapshot>,
    pub active_secs: f64,
    /// True when the session is running without durable storage.
    pub unpersisted: bool,
    pub evaluation: Option<Evaluation>,
}
