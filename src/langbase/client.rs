use reqwest::{Client, RequestBuilder};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::types::{CreatePipeRequest, CreatePipeResponse, PipeRequest, PipeResponse};
use crate::config::{LangbaseConfig, RequestConfig, RetryPolicy};
use crate::error::{LangbaseError, LangbaseResult};

/// Client for interacting with Langbase Pipes API
#[derive(Clone)]
pub struct LangbaseClient {
    client: Client,
    base_url: String,
    api_key: String,
    timeout_ms: u64,
    retry: RetryPolicy,
}

impl LangbaseClient {
    /// Create a new Langbase client
    pub fn new(config: &LangbaseConfig, request_config: RequestConfig) -> LangbaseResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(request_config.timeout_ms))
            .build()
            .map_err(LangbaseError::Http)?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            timeout_ms: request_config.timeout_ms,
            retry: request_config.retry_policy(),
        })
    }

    /// Get the base URL (for testing)
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn post(&self, url: &str) -> RequestBuilder {
        self.client
            .post(url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
    }

    /// Run a pipe, retrying transport and API failures with exponential backoff.
    pub async fn call_pipe(&self, request: PipeRequest) -> LangbaseResult<PipeResponse> {
        let url = format!("{}/v1/pipes/run", self.base_url);
        let mut last_error = None;

        for attempt in 0..=self.retry.max_retries {
            if attempt > 0 {
                let delay = self.retry.backoff(attempt);
                warn!(
                    pipe = %request.name,
                    retry = attempt,
                    delay_ms = delay.as_millis(),
                    "Retrying Langbase request"
                );
                tokio::time::sleep(delay).await;
            }

            let start = Instant::now();
            match self.run_once(&url, &request).await {
                Ok(response) => {
                    info!(
                        pipe = %request.name,
                        latency_ms = start.elapsed().as_millis(),
                        tokens = ?response.total_tokens(),
                        "Langbase pipe call succeeded"
                    );
                    return Ok(response);
                }
                Err(e) => {
                    error!(
                        pipe = %request.name,
                        error = %e,
                        latency_ms = start.elapsed().as_millis(),
                        retry = attempt,
                        "Langbase pipe call failed"
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(LangbaseError::Unavailable {
            message: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "Unknown error".to_string()),
            retries: self.retry.max_retries,
        })
    }

    async fn run_once(&self, url: &str, request: &PipeRequest) -> LangbaseResult<PipeResponse> {
        debug!(
            pipe = %request.name,
            messages = request.messages.len(),
            "Calling Langbase pipe"
        );

        let response = self.post(url).json(request).send().await.map_err(|e| {
            if e.is_timeout() {
                LangbaseError::Timeout {
                    timeout_ms: self.timeout_ms,
                }
            } else {
                LangbaseError::Http(e)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(LangbaseError::Api {
                status: status.as_u16(),
                message: error_body,
            });
        }

        response
            .json::<PipeResponse>()
            .await
            .map_err(|e| LangbaseError::InvalidResponse {
                message: format!("Failed to parse response: {}", e),
            })
    }

    /// Create a pipe. Fails with `Api { status: 409 }` when it already exists
    /// and upsert was not requested.
    pub async fn create_pipe(
        &self,
        request: &CreatePipeRequest,
    ) -> LangbaseResult<CreatePipeResponse> {
        let url = format!("{}/v1/pipes", self.base_url);

        info!(pipe = %request.name, "Creating Langbase pipe");

        let response = self
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(LangbaseError::Http)?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(LangbaseError::Api {
                status: status.as_u16(),
                message: error_body,
            });
        }

        response
            .json::<CreatePipeResponse>()
            .await
            .map_err(|e| LangbaseError::InvalidResponse {
                message: format!("Failed to parse create pipe response: {}", e),
            })
    }

    /// Make sure a pipe exists, treating "already exists" as success.
    pub async fn ensure_pipe(&self, request: &CreatePipeRequest) -> LangbaseResult<()> {
        match self.create_pipe(request).await {
            Ok(created) => {
                info!(pipe = %created.name, url = %created.url, "Pipe ready");
                Ok(())
            }
            Err(LangbaseError::Api { status: 409, .. }) => {
                info!(pipe = %request.name, "Pipe already exists");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
