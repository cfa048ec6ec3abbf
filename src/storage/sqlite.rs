use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use tracing::{info, warn};

use super::{
    ClientPersona, Evaluation, EvaluationSource, InteractionMode, MetricName, MetricRecord,
    Scenario, Sender, Session, SessionStatus, Storage, Turn,
};
use crate::config::DatabaseConfig;
use crate::error::{StorageError, StorageResult};

/// Static migrator that embeds migrations at compile time
static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// SQLite-backed storage implementation
#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Create a new SQLite storage instance
    pub async fn new(config: &DatabaseConfig) -> StorageResult<Self> {
        if let Some(parent) = config.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::Connection {
                message: format!("Failed to create database directory: {}", e),
            })?;
        }

        let database_url = format!("sqlite://{}?mode=rwc", config.path.display());

        let options = SqliteConnectOptions::from_str(&database_url)
            .map_err(|e| StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            })?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to connect to database: {}", e),
            })?;

        let storage = Self { pool };
        storage.run_migrations().await?;

        Ok(storage)
    }

    /// Create a private in-memory database. Used by tests.
    ///
    /// Each SQLite memory connection is its own database, so the pool is
    /// pinned to a single connection that never expires.
    pub async fn new_in_memory() -> StorageResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            })?
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to open in-memory database: {}", e),
            })?;

        let storage = Self { pool };
        storage.run_migrations().await?;

        Ok(storage)
    }

    /// Run database migrations using embedded sqlx migrations
    async fn run_migrations(&self) -> StorageResult<()> {
        info!("Running database migrations...");

        MIGRATOR.run(&self.pool).await.map_err(|e| StorageError::Migration {
            message: format!("Failed to run migrations: {}", e),
        })?;

        info!("Database migrations completed successfully");
        Ok(())
    }

    /// Get the underlying pool for advanced queries
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn create_session(&self, session: &Session) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO sessions (
                id, user_id, scenario_id, scenario_title, scenario_description,
                scenario_instructions, mode, persona_emotion, voice_id, status,
                created_at, completed_at, active_duration_secs, message_count,
                user_word_count, agent_word_count, final_score
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&session.id)
        .bind(&session.user_id)
        .bind(&session.scenario.id)
        .bind(&session.scenario.title)
        .bind(&session.scenario.description)
        .bind(&session.scenario.instructions)
        .bind(session.mode.as_str())
        .bind(&session.persona.emotion)
        .bind(&session.persona.voice_id)
        .bind(session.status.as_str())
        .bind(session.created_at.to_rfc3339())
        .bind(session.completed_at.map(|t| t.to_rfc3339()))
        .bind(session.active_duration_secs as i64)
        .bind(session.message_count as i64)
        .bind(session.user_word_count as i64)
        .bind(session.agent_word_count as i64)
        .bind(session.final_score.map(i64::from))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_session(&self, id: &str) -> StorageResult<Option<Session>> {
        let row: Option<SessionRow> = sqlx::query_as(
            r#"
            SELECT id, user_id, scenario_id, scenario_title, scenario_description,
                   scenario_instructions, mode, persona_emotion, voice_id, status,
                   created_at, completed_at, active_duration_secs, message_count,
                   user_word_count, agent_word_count, final_score
            FROM sessions
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn update_status(
        &self,
        session_id: &str,
        status: SessionStatus,
        active_duration_secs: u64,
    ) -> StorageResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE sessions
            SET status = ?, active_duration_secs = ?
            WHERE id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(active_duration_secs as i64)
        .bind(session_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::SessionNotFound {
                session_id: session_id.to_string(),
            });
        }

        Ok(())
    }

    async fn end_session(&self, session: &Session, final_score: Option<u8>) -> StorageResult<()> {
        let completed_at = session.completed_at.unwrap_or_else(Utc::now);

        let result = sqlx::query(
            r#"
            UPDATE sessions
            SET status = ?, completed_at = ?, active_duration_secs = ?, final_score = ?
            WHERE id = ?
            "#,
        )
        .bind(SessionStatus::Completed.as_str())
        .bind(completed_at.to_rfc3339())
        .bind(session.active_duration_secs as i64)
        .bind(final_score.map(i64::from))
        .bind(&session.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::SessionNotFound {
                session_id: session.id.clone(),
            });
        }

        Ok(())
    }

    async fn append_turn(&self, turn: &Turn) -> StorageResult<()> {
        let words = turn.word_count() as i64;
        let (user_words, agent_words) = match turn.sender {
            Sender::User => (words, 0),
            Sender::Agent => (0, words),
        };

        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE sessions
            SET message_count = message_count + 1,
                user_word_count = user_word_count + ?,
                agent_word_count = agent_word_count + ?
            WHERE id = ?
            "#,
        )
        .bind(user_words)
        .bind(agent_words)
        .bind(&turn.session_id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::SessionNotFound {
                session_id: turn.session_id.clone(),
            });
        }

        sqlx::query(
            r#"
            INSERT INTO turns (id, session_id, sender, text, offset_secs, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&turn.id)
        .bind(&turn.session_id)
        .bind(turn.sender.as_str())
        .bind(&turn.text)
        .bind(turn.offset_secs)
        .bind(turn.created_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn get_session_turns(&self, session_id: &str) -> StorageResult<Vec<Turn>> {
        let rows: Vec<TurnRow> = sqlx::query_as(
            r#"
            SELECT id, session_id, sender, text, offset_secs, created_at
            FROM turns
            WHERE session_id = ?
            ORDER BY rowid ASC
            "#,
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Turn::try_from).collect()
    }

    async fn record_metric(&self, metric: &MetricRecord) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO metrics (id, session_id, name, value, recorded_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&metric.id)
        .bind(&metric.session_id)
        .bind(metric.name.as_str())
        .bind(i64::from(metric.value))
        .bind(metric.recorded_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_session_metrics(&self, session_id: &str) -> StorageResult<Vec<MetricRecord>> {
        let rows: Vec<MetricRow> = sqlx::query_as(
            r#"
            SELECT id, session_id, name, value, recorded_at
            FROM metrics
            WHERE session_id = ?
            ORDER BY rowid ASC
            "#,
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(MetricRecord::try_from).collect()
    }

    async fn upsert_evaluation(&self, evaluation: &Evaluation) -> StorageResult<()> {
        let strengths = serde_json::to_string(&evaluation.strengths).unwrap_or_default();
        let improvements = serde_json::to_string(&evaluation.improvements).unwrap_or_default();
        let analysis = evaluation
            .analysis
            .as_ref()
            .map(|a| serde_json::to_string(a).unwrap_or_default());

        sqlx::query(
            r#"
            INSERT INTO evaluations (
                session_id, rapport, clarity, empathy, accuracy, overall,
                strengths, improvements, feedback, analysis, source,
                created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(session_id) DO UPDATE SET
                rapport = excluded.rapport,
                clarity = excluded.clarity,
                empathy = excluded.empathy,
                accuracy = excluded.accuracy,
                overall = excluded.overall,
                strengths = excluded.strengths,
                improvements = excluded.improvements,
                feedback = excluded.feedback,
                analysis = excluded.analysis,
                source = excluded.source,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&evaluation.session_id)
        .bind(i64::from(evaluation.rapport))
        .bind(i64::from(evaluation.clarity))
        .bind(i64::from(evaluation.empathy))
        .bind(i64::from(evaluation.accuracy))
        .bind(i64::from(evaluation.overall))
        .bind(&strengths)
        .bind(&improvements)
        .bind(&evaluation.feedback)
        .bind(&analysis)
        .bind(evaluation.source.as_str())
        .bind(evaluation.created_at.to_rfc3339())
        .bind(evaluation.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_evaluation(&self, session_id: &str) -> StorageResult<Option<Evaluation>> {
        let row: Option<EvaluationRow> = sqlx::query_as(
            r#"
            SELECT session_id, rapport, clarity, empathy, accuracy, overall,
                   strengths, improvements, feedback, analysis, source,
                   created_at, updated_at
            FROM evaluations
            WHERE session_id = ?
            "#,
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }
}

fn parse_timestamp(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn score_from_column(value: i64) -> u8 {
    value.clamp(0, 100) as u8
}

fn count_from_column(value: i64) -> u32 {
    value.max(0) as u32
}

// Internal row types for SQLx mapping
#[derive(sqlx::FromRow)]
struct SessionRow {
    id: String,
    user_id: String,
    scenario_id: String,
    scenario_title: String,
    scenario_description: String,
    scenario_instructions: String,
    mode: String,
    persona_emotion: String,
    voice_id: Option<String>,
    status: String,
    created_at: String,
    completed_at: Option<String>,
    active_duration_secs: i64,
    message_count: i64,
    user_word_count: i64,
    agent_word_count: i64,
    final_score: Option<i64>,
}

impl From<SessionRow> for Session {
    fn from(row: SessionRow) -> Self {
        let mode = row.mode.parse().unwrap_or_else(|e| {
            warn!(session_id = %row.id, error = %e, "Unknown mode in storage, using chat");
            InteractionMode::Chat
        });
        let status = row.status.parse().unwrap_or_else(|e| {
            warn!(session_id = %row.id, error = %e, "Unknown status in storage, using pending");
            SessionStatus::Pending
        });

        Self {
            id: row.id,
            user_id: row.user_id,
            scenario: Scenario {
                id: row.scenario_id,
                title: row.scenario_title,
                description: row.scenario_description,
                instructions: row.scenario_instructions,
            },
            mode,
            persona: ClientPersona {
                emotion: row.persona_emotion,
                voice_id: row.voice_id,
            },
            status,
            created_at: parse_timestamp(&row.created_at),
            completed_at: row.completed_at.as_deref().map(parse_timestamp),
            active_duration_secs: row.active_duration_secs.max(0) as u64,
            message_count: count_from_column(row.message_count),
            user_word_count: count_from_column(row.user_word_count),
            agent_word_count: count_from_column(row.agent_word_count),
            final_score: row.final_score.map(score_from_column),
        }
    }
}

#[derive(sqlx::FromRow)]
struct TurnRow {
    id: String,
    session_id: String,
    sender: String,
    text: String,
    offset_secs: f64,
    created_at: String,
}

impl TryFrom<TurnRow> for Turn {
    type Error = StorageError;

    fn try_from(row: TurnRow) -> Result<Self, Self::Error> {
        let sender = row.sender.parse::<Sender>().map_err(|e| StorageError::Query {
            message: e.to_string(),
        })?;

        Ok(Self {
            id: row.id,
            session_id: row.session_id,
            sender,
            text: row.text,
            offset_secs: row.offset_secs,
            created_at: parse_timestamp(&row.created_at),
        })
    }
}

#[derive(sqlx::FromRow)]
struct MetricRow {
    id: String,
    session_id: String,
    name: String,
    value: i64,
    recorded_at: String,
}

impl TryFrom<MetricRow> for MetricRecord {
    type Error = StorageError;

    fn try_from(row: MetricRow) -> Result<Self, Self::Error> {
        let name = row
            .name
            .parse::<MetricName>()
            .map_err(|message| StorageError::Query { message })?;

        Ok(Self {
            id: row.id,
            session_id: row.session_id,
            name,
            value: score_from_column(row.value),
            recorded_at: parse_timestamp(&row.recorded_at),
        })
    }
}

#[derive(sqlx::FromRow)]
struct EvaluationRow {
    session_id: String,
    rapport: i64,
    clarity: i64,
    empathy: i64,
    accuracy: i64,
    overall: i64,
    strengths: String,
    improvements: String,
    feedback: String,
    analysis: Option<String>,
    source: String,
    created_at: String,
    updated_at: String,
}

impl From<EvaluationRow> for Evaluation {
    fn from(row: EvaluationRow) -> Self {
        Self {
            session_id: row.session_id,
            rapport: score_from_column(row.rapport),
            clarity: score_from_column(row.clarity),
            empathy: score_from_column(row.empathy),
            accuracy: score_from_column(row.accuracy),
            overall: score_from_column(row.overall),
            strengths: serde_json::from_str(&row.strengths).unwrap_or_default(),
            improvements: serde_json::from_str(&row.improvements).unwrap_or_default(),
            feedback: row.feedback,
            analysis: row.analysis.and_then(|s| serde_json::from_str(&s).ok()),
            source: row.source.parse().unwrap_or(EvaluationSource::Local),
            created_at: parse_timestamp(&row.created_at),
            updated_at: parse_timestamp(&row.updated_at),
        }
    }
}
