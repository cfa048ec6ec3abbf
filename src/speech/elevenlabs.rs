use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

use super::SpeechSynthesizer;
use crate::config::{RequestConfig, SpeechConfig};
use crate::error::{SpeechError, SpeechResult};

/// Voice used when a persona does not name one.
pub const DEFAULT_VOICE_ID: &str = "21m00Tcm4TlvDq8ikWAM";

#[derive(Debug, Serialize)]
struct SynthesisRequest<'a> {
    text: &'a str,
    model_id: &'a str,
    voice_settings: VoiceSettings,
}

#[derive(Debug, Serialize)]
struct VoiceSettings {
    stability: f32,
    similarity_boost: f32,
}

/// ElevenLabs text-to-speech client.
#[derive(Clone)]
pub struct ElevenLabsSynthesizer {
    client: Client,
    base_url: String,
    api_key: String,
    model_id: String,
}

impl ElevenLabsSynthesizer {
    /// Returns `None` when no API key is configured.
    pub fn from_config(
        config: &SpeechConfig,
        request_config: &RequestConfig,
    ) -> SpeechResult<Option<Self>> {
        let Some(api_key) = config.api_key.clone() else {
            return Ok(None);
        };

        let client = Client::builder()
            .timeout(Duration::from_millis(request_config.timeout_ms))
            .build()?;

        Ok(Some(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            model_id: config.model_id.clone(),
        }))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl SpeechSynthesizer for ElevenLabsSynthesizer {
    async fn synthesize(&self, text: &str, voice_id: &str) -> SpeechResult<Vec<u8>> {
        let url = format!("{}/v1/text-to-speech/{}", self.base_url, voice_id);
        let body = SynthesisRequest {
            text,
            model_id: &self.model_id,
            voice_settings: VoiceSettings {
                stability: 0.5,
                similarity_boost: 0.75,
            },
        };

        debug!(voice_id, chars = text.len(), "Requesting speech synthesis");
        let start = Instant::now();

        let response = self
            .client
            .post(&url)
            .header("xi-api-key", &self.api_key)
            .header("Accept", "audio/mpeg")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            error!(status = status.as_u16(), voice_id, "Speech synthesis rejected");
            return Err(SpeechError::Synthesis {
                message: format!("{} - {}", status.as_u16(), error_body),
            });
        }

        let audio = response.bytes().await?;
        if audio.is_empty() {
            return Err(SpeechError::Synthesis {
                message: "Empty audio response".to_string(),
            });
        }

        info!(
            voice_id,
            bytes = audio.len(),
            latency_ms = start.elapsed().as_millis(),
            "Speech synthesized"
        );
        Ok(audio.to_vec())
    }
}
