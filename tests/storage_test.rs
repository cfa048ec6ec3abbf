//! Integration tests for SQLite storage layer
//!
//! Tests database operations using an in-memory SQLite database.

use chrono::Utc;
use pretty_assertions::assert_eq;
use sales_roleplay::config::DatabaseConfig;
use sales_roleplay::error::StorageError;
use sales_roleplay::storage::{
    ClientPersona, Evaluation, EvaluationSource, InteractionMode, MetricName, MetricRecord,
    Scenario, Sender, Session, SessionStatus, SqliteStorage, Storage, Turn,
};

/// Helper to create a test storage instance
async fn create_test_storage() -> SqliteStorage {
    SqliteStorage::new_in_memory()
        .await
        .expect("Failed to create test storage")
}

fn test_session() -> Session {
    Session::new(
        "trainee-1",
        Scenario {
            id: "cold-call".to_string(),
            title: "Cold call".to_string(),
            description: "Bakery owner".to_string(),
            instructions: "Be busy".to_string(),
        },
        InteractionMode::Chat,
        ClientPersona {
            emotion: "skeptical".to_string(),
            voice_id: None,
        },
    )
}

async fn stored_session(storage: &SqliteStorage) -> Session {
    let session = test_session();
    storage.create_session(&session).await.unwrap();
    session
}

fn test_evaluation(session_id: &str, overall: u8) -> Evaluation {
    let now = Utc::now();
    Evaluation {
        session_id: session_id.to_string(),
        rapport: 70,
        clarity: 65,
        empathy: 60,
        accuracy: 75,
        overall,
        strengths: vec!["Warm opening".to_string()],
        improvements: vec!["Ask about budget".to_string()],
        feedback: "Solid first attempt.".to_string(),
        analysis: None,
        source: EvaluationSource::Remote,
        created_at: now,
        updated_at: now,
    }
}

#[cfg(test)]
mod session_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_create_and_get_session() {
        let storage = create_test_storage().await;
        let session = stored_session(&storage).await;

        let loaded = storage.get_session(&session.id).await.unwrap().unwrap();
        assert_eq!(loaded.id, session.id);
        assert_eq!(loaded.user_id, "trainee-1");
        assert_eq!(loaded.scenario, session.scenario);
        assert_eq!(loaded.mode, InteractionMode::Chat);
        assert_eq!(loaded.persona, session.persona);
        assert_eq!(loaded.status, SessionStatus::Pending);
        assert_eq!(loaded.message_count, 0);
        assert!(loaded.completed_at.is_none());
        assert!(loaded.final_score.is_none());
    }

    #[tokio::test]
    async fn test_get_missing_session() {
        let storage = create_test_storage().await;
        let loaded = storage.get_session("does-not-exist").await.unwrap();
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn test_update_status_records_duration() {
        let storage = create_test_storage().await;
        let session = stored_session(&storage).await;

        storage
            .update_status(&session.id, SessionStatus::Paused, 42)
            .await
            .unwrap();

        let loaded = storage.get_session(&session.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, SessionStatus::Paused);
        assert_eq!(loaded.active_duration_secs, 42);
    }

    #[tokio::test]
    async fn test_update_status_unknown_session() {
        let storage = create_test_storage().await;
        let err = storage
            .update_status("missing", SessionStatus::Active, 0)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::SessionNotFound { .. }));
    }

    #[tokio::test]
    async fn test_end_session_freezes_fields() {
        let storage = create_test_storage().await;
        let mut session = stored_session(&storage).await;
        storage
            .append_turn(&Turn::new(&session.id, Sender::Agent, "¿Diga?", 0.0))
            .await
            .unwrap();
        storage
            .append_turn(&Turn::new(&session.id, Sender::User, "Buenos días, señora", 2.0))
            .await
            .unwrap();

        session.status = SessionStatus::Completed;
        session.completed_at = Some(Utc::now());
        session.active_duration_secs = 95;
        // In-memory counters never override the ones kept by append_turn.
        session.message_count = 40;
        session.user_word_count = 300;

        storage.end_session(&session, Some(81)).await.unwrap();

        let loaded = storage.get_session(&session.id).await.unwrap().unwrap();
        assert!(loaded.is_completed());
        assert!(loaded.completed_at.is_some());
        assert_eq!(loaded.active_duration_secs, 95);
        assert_eq!(loaded.message_count, 2);
        assert_eq!(loaded.user_word_count, 3);
        assert_eq!(loaded.agent_word_count, 1);
        assert_eq!(loaded.final_score, Some(81));
    }

    #[tokio::test]
    async fn test_turn_written_after_end_counted_once() {
        let storage = create_test_storage().await;
        let mut session = stored_session(&storage).await;
        let turn = Turn::new(&session.id, Sender::User, "Le llamo por su pedido", 1.0);

        // The session already counts the turn when it ends; the write lands later.
        session.message_count = 1;
        session.user_word_count = turn.word_count();
        storage.end_session(&session, None).await.unwrap();
        storage.append_turn(&turn).await.unwrap();

        let loaded = storage.get_session(&session.id).await.unwrap().unwrap();
        let turns = storage.get_session_turns(&session.id).await.unwrap();
        assert_eq!(turns.len(), 1);
        assert_eq!(loaded.message_count, 1);
        assert_eq!(loaded.user_word_count, 5);
    }

    #[tokio::test]
    async fn test_end_session_twice_overwrites_score() {
        let storage = create_test_storage().await;
        let session = stored_session(&storage).await;

        storage.end_session(&session, None).await.unwrap();
        storage.end_session(&session, Some(64)).await.unwrap();

        let loaded = storage.get_session(&session.id).await.unwrap().unwrap();
        assert_eq!(loaded.final_score, Some(64));
    }

    #[tokio::test]
    async fn test_on_disk_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let config = DatabaseConfig {
            path: dir.path().join("nested").join("training.db"),
            max_connections: 2,
        };

        let session = test_session();
        {
            let storage = SqliteStorage::new(&config).await.unwrap();
            storage.create_session(&session).await.unwrap();
        }

        let reopened = SqliteStorage::new(&config).await.unwrap();
        let loaded = reopened.get_session(&session.id).await.unwrap();
        assert!(loaded.is_some());
    }
}

#[cfg(test)]
mod turn_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_append_turn_bumps_counters() {
        let storage = create_test_storage().await;
        let session = stored_session(&storage).await;

        storage
            .append_turn(&Turn::new(&session.id, Sender::Agent, "¿Sí? ¿Quién es?", 0.0))
            .await
            .unwrap();
        storage
            .append_turn(&Turn::new(
                &session.id,
                Sender::User,
                "Hola, le llamo de parte de Panadería Sol",
                3.5,
            ))
            .await
            .unwrap();

        let loaded = storage.get_session(&session.id).await.unwrap().unwrap();
        assert_eq!(loaded.message_count, 2);
        assert_eq!(loaded.agent_word_count, 3);
        assert_eq!(loaded.user_word_count, 7);
    }

    #[tokio::test]
    async fn test_turns_returned_in_append_order() {
        let storage = create_test_storage().await;
        let session = stored_session(&storage).await;

        for (i, text) in ["uno", "dos", "tres"].iter().enumerate() {
            let sender = if i % 2 == 0 { Sender::Agent } else { Sender::User };
            storage
                .append_turn(&Turn::new(&session.id, sender, *text, i as f64))
                .await
                .unwrap();
        }

        let turns = storage.get_session_turns(&session.id).await.unwrap();
        let texts: Vec<&str> = turns.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["uno", "dos", "tres"]);
        assert_eq!(turns[1].sender, Sender::User);
        assert_eq!(turns[2].offset_secs, 2.0);
    }

    #[tokio::test]
    async fn test_append_turn_unknown_session() {
        let storage = create_test_storage().await;
        let err = storage
            .append_turn(&Turn::new("missing", Sender::User, "Hola", 0.0))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::SessionNotFound { .. }));

        let turns = storage.get_session_turns("missing").await.unwrap();
        assert!(turns.is_empty());
    }
}

#[cfg(test)]
mod metric_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_record_and_get_metrics() {
        let storage = create_test_storage().await;
        let session = stored_session(&storage).await;

        storage
            .record_metric(&MetricRecord::new(&session.id, MetricName::Rapport, 62))
            .await
            .unwrap();
        storage
            .record_metric(&MetricRecord::new(&session.id, MetricName::Overall, 58))
            .await
            .unwrap();

        let metrics = storage.get_session_metrics(&session.id).await.unwrap();
        assert_eq!(metrics.len(), 2);
        assert_eq!(metrics[0].name, MetricName::Rapport);
        assert_eq!(metrics[0].value, 62);
        assert_eq!(metrics[1].name, MetricName::Overall);
        assert_eq!(metrics[1].value, 58);
    }

    #[tokio::test]
    async fn test_metric_value_is_capped() {
        let record = MetricRecord::new("s", MetricName::Clarity, 250);
        assert_eq!(record.value, 100);
    }
}

#[cfg(test)]
mod evaluation_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_get_missing_evaluation() {
        let storage = create_test_storage().await;
        assert!(storage.get_evaluation("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_evaluation_round_trip() {
        let storage = create_test_storage().await;
        let session = stored_session(&storage).await;

        let mut evaluation = test_evaluation(&session.id, 72);
        evaluation.analysis = Some(serde_json::json!({"objections_handled": 2}));
        storage.upsert_evaluation(&evaluation).await.unwrap();

        let loaded = storage.get_evaluation(&session.id).await.unwrap().unwrap();
        assert_eq!(loaded.overall, 72);
        assert_eq!(loaded.strengths, evaluation.strengths);
        assert_eq!(loaded.improvements, evaluation.improvements);
        assert_eq!(loaded.feedback, "Solid first attempt.");
        assert_eq!(loaded.analysis, evaluation.analysis);
        assert_eq!(loaded.source, EvaluationSource::Remote);
    }

    #[tokio::test]
    async fn test_upsert_keeps_one_row_and_created_at() {
        let storage = create_test_storage().await;
        let session = stored_session(&storage).await;

        let first = test_evaluation(&session.id, 40);
        storage.upsert_evaluation(&first).await.unwrap();

        let mut second = test_evaluation(&session.id, 88);
        second.source = EvaluationSource::Local;
        second.created_at = first.created_at + chrono::Duration::seconds(30);
        second.updated_at = second.created_at;
        storage.upsert_evaluation(&second).await.unwrap();

        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM evaluations WHERE session_id = ?")
                .bind(&session.id)
                .fetch_one(storage.pool())
                .await
                .unwrap();
        assert_eq!(count, 1);

        let loaded = storage.get_evaluation(&session.id).await.unwrap().unwrap();
        assert_eq!(loaded.overall, 88);
        assert_eq!(loaded.source, EvaluationSource::Local);
        assert_eq!(
            loaded.created_at.timestamp(),
            first.created_at.timestamp()
        );
        assert_eq!(
            loaded.updated_at.timestamp(),
            second.updated_at.timestamp()
        );
    }
}
