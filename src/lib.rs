//! # Sales Roleplay
//!
//! Real-time orchestration and scoring for sales-training conversations.
//! A trainee talks (by text or voice) to a simulated client driven by
//! Langbase pipes; the session is scored live and evaluated at the end.
//!
//! ## Architecture
//!
//! ```text
//! user input ──► SessionOrchestrator ──► ReplyGenerator (Langbase pipe)
//!                   │     │      │
//!                   │     │      └──► SpeechAdapter (capture / TTS / playback)
//!                   │     └──► TranscriptStore + MetricsEngine
//!                   └──► EvaluationFinalizer ──► TranscriptScorer
//!                              │
//!                        SQLite (sessions, turns, metrics, evaluations)
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use sales_roleplay::ai::PipeConversation;
//! use sales_roleplay::langbase::LangbaseClient;
//! use sales_roleplay::session::{SessionConfig, SessionDeps, SessionOrchestrator, SystemClock};
//! use sales_roleplay::speech::SpeechAdapter;
//! use sales_roleplay::storage::SqliteStorage;
//! use sales_roleplay::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let storage = Arc::new(SqliteStorage::new(&config.database).await?);
//!     let langbase = LangbaseClient::new(&config.langbase, config.request.clone())?;
//!     let pipes = Arc::new(PipeConversation::new(langbase, &config.pipes));
//!
//!     let session = SessionOrchestrator::new(
//!         session_config,
//!         config.session.clone(),
//!         SessionDeps {
//!             replies: pipes.clone(),
//!             scorer: pipes,
//!             storage,
//!             speech: Arc::new(SpeechAdapter::silent()),
//!             clock: Arc::new(SystemClock),
//!         },
//!     );
//!     session.start().await;
//!     session.handle_user_turn("Hola, quiero información").await;
//!     let outcome = session.end().await;
//!     Ok(())
//! }
//! ```

/// Conversational-AI collaborators: reply generation and transcript scoring.
pub mod ai;
/// Configuration loaded from the environment.
pub mod config;
/// Error types and result aliases.
pub mod error;
/// End-of-session evaluation.
pub mod evaluation;
/// Langbase API client and wire types.
pub mod langbase;
/// System prompts for the Langbase pipes.
pub mod prompts;
/// Live session pipeline: transcript, metrics, state machine.
pub mod session;
/// Speech capture, synthesis and playback.
pub mod speech;
/// Persistence trait, records and the SQLite implementation.
pub mod storage;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use session::{EndOutcome, SessionConfig, SessionOrchestrator, TurnOutcome};
