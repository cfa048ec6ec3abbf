//! Storage layer for training session persistence.
//!
//! This module provides the domain records written during a live session
//! (sessions, turns, metric samples, evaluations) and the [`Storage`] trait
//! the session pipeline writes through. [`SqliteStorage`] is the bundled
//! implementation.

mod sqlite;


pub use sqlite::SqliteStorage;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{StorageResult, ValidationError};

/// How the trainee talks to the simulated client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionMode {
    /// Typed conversation, no audio.
    #[default]
    Chat,
    /// Spoken conversation with speech capture and synthesized replies.
    Call,
}

impl InteractionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            InteractionMode::Chat => "chat",
            InteractionMode::Call => "call",
        }
    }

    pub fn is_voice(&self) -> bool {
        matches!(self, InteractionMode::Call)
    }
}

impl std::fmt::Display for InteractionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for InteractionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "chat" => Ok(InteractionMode::Chat),
            "call" => Ok(InteractionMode::Call),
            _ => Err(format!("Unknown interaction mode: {}", s)),
        }
    }
}

/// Persisted lifecycle status of a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Pending,
    Active,
    Paused,
    Completed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Active => "active",
            SessionStatus::Paused => "paused",
            SessionStatus::Completed => "completed",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(SessionStatus::Pending),
            "active" => Ok(SessionStatus::Active),
            "paused" => Ok(SessionStatus::Paused),
            "completed" => Ok(SessionStatus::Completed),
            _ => Err(format!("Unknown session status: {}", s)),
        }
    }
}

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sender {
    /// The trainee.
    User,
    /// The simulated client.
    Agent,
}

impl Sender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sender::User => "user",
            Sender::Agent => "agent",
        }
    }

    /// Label used when rendering a transcript as plain text.
    pub fn label(&self) -> &'static str {
        match self {
            Sender::User => "Seller",
            Sender::Agent => "Client",
        }
    }
}

impl std::fmt::Display for Sender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Sender {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" => Ok(Sender::User),
            "agent" => Ok(Sender::Agent),
            _ => Err(ValidationError::InvalidSender {
                value: s.to_string(),
            }),
        }
    }
}

/// The practice scenario a session runs against.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub id: String,
    pub title: String,
    pub description: String,
    /// Behavioral instructions for the simulated client.
    pub instructions: String,
}

/// How the simulated client behaves and sounds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientPersona {
    /// Emotional stance (e.g. "skeptical", "friendly", "angry").
    pub emotion: String,
    /// Voice identity used for synthesis in call mode.
    pub voice_id: Option<String>,
}

/// One training attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub scenario: Scenario,
    pub mode: InteractionMode,
    pub persona: ClientPersona,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Active seconds, paused intervals excluded.
    pub active_duration_secs: u64,
    pub message_count: u32,
    pub user_word_count: u32,
    pub agent_word_count: u32,
    /// Overall evaluation score, set when the session ends with an evaluation.
    pub final_score: Option<u8>,
}

impl Session {
    /// Create a pending session with a fresh id.
    pub fn new(
        user_id: impl Into<String>,
        scenario: Scenario,
        mode: InteractionMode,
        persona: ClientPersona,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            scenario,
            mode,
            persona,
            status: SessionStatus::Pending,
            created_at: Utc::now(),
            completed_at: None,
            active_duration_secs: 0,
            message_count: 0,
            user_word_count: 0,
            agent_word_count: 0,
            final_score: None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == SessionStatus::Completed
    }
}

/// Count whitespace-separated, non-empty tokens.
pub fn word_count(text: &str) -> u32 {
    text.split_whitespace().count() as u32
}

/// One utterance. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub id: String,
    pub session_id: String,
    pub sender: Sender,
    pub text: String,
    /// Seconds since session start, paused time excluded.
    pub offset_secs: f64,
    pub created_at: DateTime<Utc>,
}

impl Turn {
    pub fn new(
        session_id: impl Into<String>,
        sender: Sender,
        text: impl Into<String>,
        offset_secs: f64,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            sender,
            text: text.into(),
            offset_secs,
            created_at: Utc::now(),
        }
    }

    pub fn word_count(&self) -> u32 {
        word_count(&self.text)
    }
}

/// Metric dimensions tracked during a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricName {
    Rapport,
    Clarity,
    Empathy,
    Accuracy,
    Overall,
}

impl MetricName {
    pub const ALL: [MetricName; 5] = [
        MetricName::Rapport,
        MetricName::Clarity,
        MetricName::Empathy,
        MetricName::Accuracy,
        MetricName::Overall,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::Rapport => "rapport",
            MetricName::Clarity => "clarity",
            MetricName::Empathy => "empathy",
            MetricName::Accuracy => "accuracy",
            MetricName::Overall => "overall",
        }
    }
}

impl std::fmt::Display for MetricName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for MetricName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "rapport" => Ok(MetricName::Rapport),
            "clarity" => Ok(MetricName::Clarity),
            "empathy" => Ok(MetricName::Empathy),
            "accuracy" => Ok(MetricName::Accuracy),
            "overall" => Ok(MetricName::Overall),
            _ => Err(format!("Unknown metric: {}", s)),
        }
    }
}

/// A single named metric value. Write-once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    pub id: String,
    pub session_id: String,
    pub name: MetricName,
    pub value: u8,
    pub recorded_at: DateTime<Utc>,
}

impl MetricRecord {
    pub fn new(session_id: impl Into<String>, name: MetricName, value: u8) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            name,
            value: value.min(100),
            recorded_at: Utc::now(),
        }
    }
}

/// Where the numbers of an evaluation came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationSource {
    /// Scored by the remote evaluator.
    #[default]
    Remote,
    /// Synthesized from the last local metrics after the evaluator failed.
    Local,
}

impl EvaluationSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvaluationSource::Remote => "remote",
            EvaluationSource::Local => "local",
        }
    }
}

impl std::str::FromStr for EvaluationSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "remote" => Ok(EvaluationSource::Remote),
            "local" => Ok(EvaluationSource::Local),
            _ => Err(format!("Unknown evaluation source: {}", s)),
        }
    }
}

/// Final scoring record for a completed session, keyed by session id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub session_id: String,
    pub rapport: u8,
    pub clarity: u8,
    pub empathy: u8,
    pub accuracy: u8,
    pub overall: u8,
    pub strengths: Vec<String>,
    pub improvements: Vec<String>,
    pub feedback: String,
    /// Structured analysis passed through from the evaluator, if any.
    pub analysis: Option<serde_json::Value>,
    pub source: EvaluationSource,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Evaluation {
    pub fn is_fallback(&self) -> bool {
        self.source == EvaluationSource::Local
    }
}

/// Storage trait for the session pipeline.
///
/// Every method is keyed by session id. Implementations must make
/// [`Storage::append_turn`] bump the session's message and word counters in
/// the same write, and [`Storage::upsert_evaluation`] must keep at most one
/// evaluation per session.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn create_session(&self, session: &Session) -> StorageResult<()>;

    async fn get_session(&self, id: &str) -> StorageResult<Option<Session>>;

    /// Record a pause/resume status change and the active time so far.
    async fn update_status(
        &self,
        session_id: &str,
        status: SessionStatus,
        active_duration_secs: u64,
    ) -> StorageResult<()>;

    /// Mark the session completed, freezing duration and final score.
    /// Message and word counters are left to `append_turn`, so they always
    /// match the stored turns, including a turn written after the end.
    async fn end_session(&self, session: &Session, final_score: Option<u8>) -> StorageResult<()>;

    async fn append_turn(&self, turn: &Turn) -> StorageResult<()>;

    async fn get_session_turns(&self, session_id: &str) -> StorageResult<Vec<Turn>>;

    async fn record_metric(&self, metric: &MetricRecord) -> StorageResult<()>;

    async fn get_session_metrics(&self, session_id: &str) -> StorageResult<Vec<MetricRecord>>;

    async fn upsert_evaluation(&self, evaluation: &Evaluation) -> StorageResult<()>;

    async fn get_evaluation(&self, session_id: &str) -> StorageResult<Option<Evaluation>>;
}
