use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{RemoteScores, ReplyGenerator, ScenarioContext, TranscriptScorer};
use crate::config::PipeConfig;
use crate::error::{LangbaseError, LangbaseResult};
use crate::langbase::{CreatePipeRequest, LangbaseClient, Message, PipeRequest};
use crate::prompts::{
    client_context, evaluation_request, CLIENT_PERSONA_PROMPT, EVALUATOR_PROMPT,
    SESSION_START_SENTINEL,
};
use crate::storage::{Sender, Turn};

/// Langbase-backed client persona and evaluator.
#[derive(Clone)]
pub struct PipeConversation {
    langbase: LangbaseClient,
    client_pipe: String,
    evaluator_pipe: String,
}

impl PipeConversation {
    pub fn new(langbase: LangbaseClient, pipes: &PipeConfig) -> Self {
        Self {
            langbase,
            client_pipe: pipes.client.clone(),
            evaluator_pipe: pipes.evaluator.clone(),
        }
    }

    /// Create (or upsert) both pipes with their system prompts.
    pub async fn ensure_pipes(&self) -> LangbaseResult<()> {
        let client = CreatePipeRequest::new(&self.client_pipe)
            .with_description("Simulated client for sales training sessions")
            .with_model("openai:gpt-4o-mini")
            .with_upsert(true)
            .with_temperature(0.8)
            .with_max_tokens(300)
            .with_messages(vec![Message::system(CLIENT_PERSONA_PROMPT)]);
        self.langbase.ensure_pipe(&client).await?;

        let evaluator = CreatePipeRequest::new(&self.evaluator_pipe)
            .with_description("Scores sales training transcripts")
            .with_model("openai:gpt-4o-mini")
            .with_upsert(true)
            .with_json_output(true)
            .with_temperature(0.2)
            .with_max_tokens(1500)
            .with_messages(vec![Message::system(EVALUATOR_PROMPT)]);
        self.langbase.ensure_pipe(&evaluator).await
    }

    /// Build the client pipe messages: persona prompt, scenario block, then
    /// the conversation as user/assistant turns. The conversation always
    /// starts on a user message, so the sentinel leads when the window opens
    /// on a client line.
    pub fn build_reply_messages(history: &[Turn], scenario: &ScenarioContext) -> Vec<Message> {
        let mut messages = vec![
            Message::system(CLIENT_PERSONA_PROMPT),
            Message::system(client_context(
                &scenario.title,
                &scenario.description,
                &scenario.instructions,
                &scenario.emotion,
            )),
        ];

        if history.first().map_or(true, |t| t.sender == Sender::Agent) {
            messages.push(Message::user(SESSION_START_SENTINEL));
        }

        messages.extend(history.iter().map(|turn| match turn.sender {
            Sender::User => Message::user(turn.text.clone()),
            Sender::Agent => Message::assistant(turn.text.clone()),
        }));

        messages
    }
}

/// Strip wrapping quotes and speaker labels some models add anyway.
fn clean_reply(completion: &str) -> String {
    let mut text = completion.trim();
    for label in ["Client:", "Cliente:", "CLIENT:"] {
        if let Some(rest) = text.strip_prefix(label) {
            text = rest.trim_start();
        }
    }
    text.trim_matches('"').trim().to_string()
}

#[async_trait]
impl ReplyGenerator for PipeConversation {
    async fn generate_reply(
        &self,
        history: &[Turn],
        scenario: &ScenarioContext,
    ) -> LangbaseResult<String> {
        let messages = Self::build_reply_messages(history, scenario);
        debug!(
            pipe = %self.client_pipe,
            history = history.len(),
            "Requesting client reply"
        );

        let response = self
            .langbase
            .call_pipe(PipeRequest::new(&self.client_pipe, messages))
            .await?;

        let reply = clean_reply(&response.completion);
        if reply.is_empty() {
            warn!(pipe = %self.client_pipe, "Client pipe returned an empty completion");
            return Err(LangbaseError::InvalidResponse {
                message: "Empty reply from client pipe".to_string(),
            });
        }

        Ok(reply)
    }
}

#[async_trait]
impl TranscriptScorer for PipeConversation {
    async fn score_transcript(
        &self,
        transcript: &str,
        scenario: &ScenarioContext,
        duration_secs: u64,
    ) -> LangbaseResult<RemoteScores> {
        let messages = vec![
            Message::system(EVALUATOR_PROMPT),
            Message::user(evaluation_request(
                &scenario.title,
                &scenario.description,
                duration_secs,
                transcript,
            )),
        ];

        let response = self
            .langbase
            .call_pipe(PipeRequest::new(&self.evaluator_pipe, messages))
            .await?;

        let scores = RemoteScores::from_completion(&response.completion)?;
        info!(pipe = %self.evaluator_pipe, "Transcript scored");
        Ok(scores)
    }
}
