//! Conversational-AI collaborators.
//!
//! The session pipeline depends on two request/response seams:
//! - [`ReplyGenerator`]: produce the simulated client's next line
//! - [`TranscriptScorer`]: score a finished transcript
//!
//! [`PipeConversation`] implements both on top of Langbase pipes.

mod pipes;

pub use pipes::*;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{LangbaseError, LangbaseResult};
use crate::storage::{Session, Turn};

/// Scenario and persona details every AI request is framed with.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScenarioContext {
    pub title: String,
    pub description: String,
    pub instructions: String,
    pub emotion: String,
}

impl From<&Session> for ScenarioContext {
    fn from(session: &Session) -> Self {
        Self {
            title: session.scenario.title.clone(),
            description: session.scenario.description.clone(),
            instructions: session.scenario.instructions.clone(),
            emotion: session.persona.emotion.clone(),
        }
    }
}

/// Generates the simulated client's next reply.
#[async_trait]
pub trait ReplyGenerator: Send + Sync {
    /// `history` is the recent window of the transcript in order. An empty
    /// history asks for the opening line.
    async fn generate_reply(
        &self,
        history: &[Turn],
        scenario: &ScenarioContext,
    ) -> LangbaseResult<String>;
}

/// Scores a finished transcript.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TranscriptScorer: Send + Sync {
    async fn score_transcript(
        &self,
        transcript: &str,
        scenario: &ScenarioContext,
        duration_secs: u64,
    ) -> LangbaseResult<RemoteScores>;
}

/// Raw evaluator output. Scores stay untyped JSON until normalization, so a
/// string, a float or an out-of-range number can be handled per field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteScores {
    #[serde(default, alias = "rapport")]
    pub rapport_score: Option<serde_json::Value>,
    #[serde(default, alias = "clarity")]
    pub clarity_score: Option<serde_json::Value>,
    #[serde(default, alias = "empathy")]
    pub empathy_score: Option<serde_json::Value>,
    #[serde(default, alias = "accuracy")]
    pub accuracy_score: Option<serde_json::Value>,
    #[serde(default, alias = "overall")]
    pub overall_score: Option<serde_json::Value>,
    #[serde(default, deserialize_with = "lenient_strings")]
    pub strengths: Vec<String>,
    #[serde(default, deserialize_with = "lenient_strings")]
    pub improvements: Vec<String>,
    #[serde(default)]
    pub feedback: Option<String>,
    #[serde(default)]
    pub analysis: Option<serde_json::Value>,
}

impl RemoteScores {
    /// Parse evaluator output, accepting raw JSON or a fenced code block.
    pub fn from_completion(completion: &str) -> LangbaseResult<Self> {
        let json = extract_json_from_completion(completion)
            .map_err(|message| LangbaseError::InvalidResponse { message })?;

        let value: serde_json::Value =
            serde_json::from_str(json).map_err(|e| LangbaseError::InvalidResponse {
                message: format!("Evaluator returned malformed JSON: {}", e),
            })?;

        if !value.is_object() {
            return Err(LangbaseError::InvalidResponse {
                message: "Evaluator response is not a JSON object".to_string(),
            });
        }

        serde_json::from_value(value).map_err(|e| LangbaseError::InvalidResponse {
            message: format!("Evaluator response has unexpected shape: {}", e),
        })
    }
}

/// Null becomes empty, a lone string becomes one item, and non-string
/// items are dropped.
fn lenient_strings<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    let strings = match value {
        Some(serde_json::Value::Array(items)) => items
            .into_iter()
            .filter_map(|item| match item {
                serde_json::Value::String(s) if !s.trim().is_empty() => Some(s),
                _ => None,
            })
            .collect(),
        Some(serde_json::Value::String(s)) if !s.trim().is_empty() => vec![s],
        _ => Vec::new(),
    };
    Ok(strings)
}

/// Extract JSON from a completion string, handling markdown code blocks.
///
/// Attempts extraction in this order:
/// 1. Raw JSON (fast path)
/// 2. A ```json ... ``` block
/// 3. A bare ``` ... ``` block
pub(crate) fn extract_json_from_completion(completion: &str) -> Result<&str, String> {
    let trimmed = completion.trim();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        return Ok(trimmed);
    }

    if let Some(rest) = completion.split("```json").nth(1) {
        return rest
            .split("```")
            .next()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| "Found ```json block but content was empty".to_string());
    }

    if let Some(block) = completion.split("```").nth(1) {
        let block = block.trim();
        if !block.is_empty() {
            return Ok(block);
        }
    }

    Err(format!(
        "No JSON found in response. First 100 chars: '{}'",
        completion.chars().take(100).collect::<String>()
    ))
}
