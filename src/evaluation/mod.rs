//! Final scoring of a finished session.
//!
//! [`EvaluationFinalizer::finalize`] always produces an [`Evaluation`]: the
//! remote scorer's numbers are normalized field by field against the last
//! local metrics, and when the scorer fails outright the whole evaluation is
//! synthesized from those metrics instead.

use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::ai::{RemoteScores, ScenarioContext, TranscriptScorer};
use crate::error::{LangbaseError, LangbaseResult};
use crate::session::{MetricSnapshot, Persistence};
use crate::storage::{Evaluation, EvaluationSource, Session, Turn};

const FALLBACK_FEEDBACK: &str = "Detailed feedback is not available right now. \
     These scores come from the live metrics recorded during your session; \
     review the transcript and try the scenario again.";

/// Render a transcript as one `Label: text` line per turn.
pub fn render_transcript(turns: &[Turn]) -> String {
    turns
        .iter()
        .map(|turn| format!("{}: {}", turn.sender.label(), turn.text))
        .collect::<Vec<_>>()
        .join("\n")
}

/// `clamp(round(value ?? fallback), 0, 100)`. Numeric strings are accepted;
/// anything else non-numeric scores 0.
pub fn normalize_score(value: Option<&Value>, fallback: u8) -> u8 {
    let number = match value {
        None | Some(Value::Null) => return fallback.min(100),
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        Some(_) => None,
    };

    match number {
        Some(n) if n.is_finite() => n.round().clamp(0.0, 100.0) as u8,
        _ => 0,
    }
}

fn clean_list(items: Vec<String>) -> Vec<String> {
    items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Result of a finalization.
#[derive(Debug, Clone)]
pub struct Finalized {
    pub evaluation: Evaluation,
    /// Why the remote scorer was not used, when it was not.
    pub degraded_reason: Option<String>,
    pub persisted: bool,
}

/// Scores a finished session and persists the result.
pub struct EvaluationFinalizer {
    scorer: Arc<dyn TranscriptScorer>,
    persistence: Persistence,
    timeout: Duration,
}

impl EvaluationFinalizer {
    pub fn new(
        scorer: Arc<dyn TranscriptScorer>,
        persistence: Persistence,
        timeout: Duration,
    ) -> Self {
        Self {
            scorer,
            persistence,
            timeout,
        }
    }

    /// Score `transcript` and upsert the evaluation under the session id.
    /// Safe to call again for the same session.
    pub async fn finalize(
        &self,
        session: &Session,
        transcript: &[Turn],
        local: &MetricSnapshot,
    ) -> Finalized {
        let rendered = render_transcript(transcript);
        let scenario = ScenarioContext::from(session);

        let (evaluation, degraded_reason) = match self
            .score(&rendered, &scenario, session.active_duration_secs)
            .await
        {
            Ok(scores) => (from_remote(&session.id, scores, local), None),
            Err(e) => {
                warn!(
                    session_id = %session.id,
                    error = %e,
                    "Remote evaluation failed, using local metrics"
                );
                (from_local(&session.id, local), Some(e.to_string()))
            }
        };

        let persisted = self.persistence.upsert_evaluation(&evaluation).await;
        info!(
            session_id = %session.id,
            overall = evaluation.overall,
            source = evaluation.source.as_str(),
            persisted,
            "Session evaluated"
        );

        Finalized {
            evaluation,
            degraded_reason,
            persisted,
        }
    }

    async fn score(
        &self,
        transcript: &str,
        scenario: &ScenarioContext,
        duration_secs: u64,
    ) -> LangbaseResult<RemoteScores> {
        tokio::time::timeout(
            self.timeout,
            self.scorer
                .score_transcript(transcript, scenario, duration_secs),
        )
        .await
        .map_err(|_| LangbaseError::Timeout {
            timeout_ms: self.timeout.as_millis() as u64,
        })?
    }
}

fn from_remote(session_id: &str, scores: RemoteScores, local: &MetricSnapshot) -> Evaluation {
    let now = Utc::now();
    let feedback = scores
        .feedback
        .map(|f| f.trim().to_string())
        .filter(|f| !f.is_empty())
        .unwrap_or_else(|| "No detailed feedback was provided.".to_string());

    Evaluation {
        session_id: session_id.to_string(),
        rapport: normalize_score(scores.rapport_score.as_ref(), local.rapport),
        clarity: normalize_score(scores.clarity_score.as_ref(), local.clarity),
        empathy: normalize_score(scores.empathy_score.as_ref(), local.empathy),
        accuracy: normalize_score(scores.accuracy_score.as_ref(), local.accuracy),
        overall: normalize_score(scores.overall_score.as_ref(), local.overall),
        strengths: clean_list(scores.strengths),
        improvements: clean_list(scores.improvements),
        feedback,
        analysis: scores.analysis,
        source: EvaluationSource::Remote,
        created_at: now,
        updated_at: now,
    }
}

fn from_local(session_id: &str, local: &MetricSnapshot) -> Evaluation {
    let now = Utc::now();
    Evaluation {
        session_id: session_id.to_string(),
        rapport: local.rapport.min(100),
        clarity: local.clarity.min(100),
        empathy: local.empathy.min(100),
        accuracy: local.accuracy.min(100),
        overall: local.overall.min(100),
        strengths: Vec::new(),
        improvements: Vec::new(),
        feedback: FALLBACK_FEEDBACK.to_string(),
        analysis: None,
        source: EvaluationSource::Local,
        created_at: now,
        updated_at: now,
    }
}
