//! Config environment variable tests
//!
//! These tests verify that Config::from_env() correctly reads and applies
//! environment variable overrides.
//!
//! Tests use #[serial] to prevent race conditions with shared env vars.

use sales_roleplay::config::{Config, LogFormat};
use serial_test::serial;
use std::env;

fn with_api_key() {
    env::set_var("LANGBASE_API_KEY", "test-key");
}

#[test]
#[serial]
fn test_config_requires_api_key() {
    env::remove_var("LANGBASE_API_KEY");

    let err = Config::from_env().unwrap_err();
    assert!(err.to_string().contains("LANGBASE_API_KEY"));
}

#[test]
#[serial]
fn test_config_defaults() {
    with_api_key();

    let config = Config::from_env().unwrap();
    assert_eq!(config.langbase.api_key, "test-key");
    assert_eq!(config.pipes.client, "sales-client-v1");
    assert_eq!(config.pipes.evaluator, "sales-evaluator-v1");
    assert_eq!(config.session.reply_timeout_ms, 20000);
    assert_eq!(config.session.evaluation_timeout_ms, 30000);
    assert_eq!(config.session.history_window, 12);
    assert!(config.speech.api_key.is_none());
}

#[test]
#[serial]
fn test_config_from_env_custom_database() {
    with_api_key();
    env::set_var("DATABASE_PATH", "/custom/training.db");
    env::set_var("DATABASE_MAX_CONNECTIONS", "10");

    let config = Config::from_env().unwrap();
    assert_eq!(config.database.path.to_str().unwrap(), "/custom/training.db");
    assert_eq!(config.database.max_connections, 10);

    env::remove_var("DATABASE_PATH");
    env::remove_var("DATABASE_MAX_CONNECTIONS");
}

#[test]
#[serial]
fn test_config_from_env_json_log_format() {
    with_api_key();
    env::set_var("LOG_FORMAT", "JSON");

    let config = Config::from_env().unwrap();
    assert_eq!(config.logging.format, LogFormat::Json);

    env::remove_var("LOG_FORMAT");
}

#[test]
#[serial]
fn test_config_from_env_custom_pipes() {
    with_api_key();
    env::set_var("PIPE_CLIENT", "client-v2");
    env::set_var("PIPE_EVALUATOR", "evaluator-v2");

    let config = Config::from_env().unwrap();
    assert_eq!(config.pipes.client, "client-v2");
    assert_eq!(config.pipes.evaluator, "evaluator-v2");

    env::remove_var("PIPE_CLIENT");
    env::remove_var("PIPE_EVALUATOR");
}

#[test]
#[serial]
fn test_config_from_env_session_tuning() {
    with_api_key();
    env::set_var("REPLY_TIMEOUT_MS", "15000");
    env::set_var("HISTORY_WINDOW", "6");
    env::set_var("MIN_TURNS_FOR_EVALUATION", "4");
    env::set_var("PERSIST_MAX_RETRIES", "1");
    env::set_var("METRICS_SEED", "1234");
    env::set_var("METRICS_JITTER", "0");

    let config = Config::from_env().unwrap();
    assert_eq!(config.session.reply_timeout_ms, 15000);
    assert_eq!(config.session.history_window, 6);
    assert_eq!(config.session.min_turns_for_evaluation, 4);
    assert_eq!(config.session.persist_retry().max_retries, 1);
    assert_eq!(config.session.metrics_seed, Some(1234));
    assert_eq!(config.session.metrics_jitter, 0);

    for key in [
        "REPLY_TIMEOUT_MS",
        "HISTORY_WINDOW",
        "MIN_TURNS_FOR_EVALUATION",
        "PERSIST_MAX_RETRIES",
        "METRICS_SEED",
        "METRICS_JITTER",
    ] {
        env::remove_var(key);
    }
}

#[test]
#[serial]
fn test_config_blank_speech_key_disables_voice() {
    with_api_key();
    env::set_var("ELEVENLABS_API_KEY", "   ");

    let config = Config::from_env().unwrap();
    assert!(config.speech.api_key.is_none());

    env::set_var("ELEVENLABS_API_KEY", "xi-key");
    let config = Config::from_env().unwrap();
    assert_eq!(config.speech.api_key.as_deref(), Some("xi-key"));

    env::remove_var("ELEVENLABS_API_KEY");
}

#[test]
#[serial]
fn test_config_invalid_number_uses_default() {
    with_api_key();
    env::set_var("DATABASE_MAX_CONNECTIONS", "not-a-number");
    env::set_var("REPLY_TIMEOUT_MS", "-5");

    let config = Config::from_env().unwrap();
    assert_eq!(config.database.max_connections, 5);
    assert_eq!(config.session.reply_timeout_ms, 20000);

    env::remove_var("DATABASE_MAX_CONNECTIONS");
    env::remove_var("REPLY_TIMEOUT_MS");
}
