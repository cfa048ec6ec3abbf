use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::AppError;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub langbase: LangbaseConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub request: RequestConfig,
    pub pipes: PipeConfig,
    pub speech: SpeechConfig,
    pub session: SessionTuning,
}

/// Langbase API configuration
#[derive(Debug, Clone)]
pub struct LangbaseConfig {
    pub api_key: String,
    pub base_url: String,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub max_connections: u32,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// HTTP request configuration
#[derive(Debug, Clone)]
pub struct RequestConfig {
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

/// Langbase pipe name configuration
#[derive(Debug, Clone)]
pub struct PipeConfig {
    /// Pipe that role-plays the simulated client.
    pub client: String,
    /// Pipe that scores a finished transcript.
    pub evaluator: String,
}

/// Text-to-speech provider configuration. Voice synthesis is disabled when
/// no API key is set.
#[derive(Debug, Clone)]
pub struct SpeechConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model_id: String,
}

/// Knobs for the live session pipeline.
#[derive(Debug, Clone)]
pub struct SessionTuning {
    /// Caller-side timeout on reply generation.
    pub reply_timeout_ms: u64,
    /// Caller-side timeout on remote scoring.
    pub evaluation_timeout_ms: u64,
    /// Number of most recent turns sent with each reply request.
    pub history_window: usize,
    /// Turns needed (with both senders present) before remote evaluation runs.
    pub min_turns_for_evaluation: usize,
    pub persist_max_retries: u32,
    pub persist_retry_delay_ms: u64,
    /// Seed for the accuracy jitter. `None` draws from entropy.
    pub metrics_seed: Option<u64>,
    /// Half-width of the accuracy jitter range.
    pub metrics_jitter: u8,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, AppError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let langbase = LangbaseConfig {
            api_key: env::var("LANGBASE_API_KEY").map_err(|_| AppError::Config {
                message: "LANGBASE_API_KEY is required".to_string(),
            })?,
            base_url: env::var("LANGBASE_BASE_URL")
                .unwrap_or_else(|_| "https://api.langbase.com".to_string()),
        };

        let database = DatabaseConfig {
            path: PathBuf::from(
                env::var("DATABASE_PATH").unwrap_or_else(|_| "./data/training.db".to_string()),
            ),
            max_connections: parse_var("DATABASE_MAX_CONNECTIONS").unwrap_or(5),
        };

        let logging = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "pretty".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        };

        let request = RequestConfig {
            timeout_ms: parse_var("REQUEST_TIMEOUT_MS").unwrap_or(30000),
            max_retries: parse_var("MAX_RETRIES").unwrap_or(3),
            retry_delay_ms: parse_var("RETRY_DELAY_MS").unwrap_or(1000),
        };

        let pipes = PipeConfig {
            client: env::var("PIPE_CLIENT").unwrap_or_else(|_| "sales-client-v1".to_string()),
            evaluator: env::var("PIPE_EVALUATOR")
                .unwrap_or_else(|_| "sales-evaluator-v1".to_string()),
        };

        let speech = SpeechConfig {
            api_key: env::var("ELEVENLABS_API_KEY")
                .ok()
                .filter(|k| !k.trim().is_empty()),
            base_url: env::var("ELEVENLABS_BASE_URL")
                .unwrap_or_else(|_| "https://api.elevenlabs.io".to_string()),
            model_id: env::var("ELEVENLABS_MODEL_ID")
                .unwrap_or_else(|_| "eleven_multilingual_v2".to_string()),
        };

        let defaults = SessionTuning::default();
        let session = SessionTuning {
            reply_timeout_ms: parse_var("REPLY_TIMEOUT_MS").unwrap_or(defaults.reply_timeout_ms),
            evaluation_timeout_ms: parse_var("EVALUATION_TIMEOUT_MS")
                .unwrap_or(defaults.evaluation_timeout_ms),
            history_window: parse_var("HISTORY_WINDOW").unwrap_or(defaults.history_window),
            min_turns_for_evaluation: parse_var("MIN_TURNS_FOR_EVALUATION")
                .unwrap_or(defaults.min_turns_for_evaluation),
            persist_max_retries: parse_var("PERSIST_MAX_RETRIES")
                .unwrap_or(defaults.persist_max_retries),
            persist_retry_delay_ms: parse_var("PERSIST_RETRY_DELAY_MS")
                .unwrap_or(defaults.persist_retry_delay_ms),
            metrics_seed: parse_var("METRICS_SEED"),
            metrics_jitter: parse_var("METRICS_JITTER").unwrap_or(defaults.metrics_jitter),
        };

        Ok(Config {
            langbase,
            database,
            logging,
            request,
            pipes,
            speech,
            session,
        })
    }
}

/// Bounded retry with exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
}

impl RetryPolicy {
    /// Delay before the given retry (1-based): `base * 2^(retry - 1)`.
    pub fn backoff(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(16);
        Duration::from_millis(self.base_delay_ms.saturating_mul(2_u64.pow(exponent)))
    }
}

impl RequestConfig {
    /// Retry policy for HTTP calls.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay_ms: self.retry_delay_ms,
        }
    }
}

impl SessionTuning {
    /// Retry policy for best-effort persistence writes.
    pub fn persist_retry(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.persist_max_retries,
            base_delay_ms: self.persist_retry_delay_ms,
        }
    }
}

fn parse_var<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30000,
            max_retries: 3,
            retry_delay_ms: 1000,
        }
    }
}

impl Default for SessionTuning {
    fn default() -> Self {
        Self {
            reply_timeout_ms: 20000,
            evaluation_timeout_ms: 30000,
            history_window: 12,
            min_turns_for_evaluation: 2,
            persist_max_retries: 3,
            persist_retry_delay_ms: 200,
            metrics_seed: None,
            metrics_jitter: 8,
        }
    }
}
