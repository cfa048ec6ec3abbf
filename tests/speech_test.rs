//! Integration tests for speech synthesis and the voice adapter
//!
//! The ElevenLabs client is exercised against a wiremock server; the adapter
//! is wired to it with a file sink so a full speak call can be observed.

use std::sync::Arc;
use wiremock::{
    matchers::{body_partial_json, header, method, path},
    Mock, MockServer, ResponseTemplate,
};

use sales_roleplay::config::{RequestConfig, SpeechConfig};
use sales_roleplay::error::SpeechError;
use sales_roleplay::speech::{
    ChannelCapture, ElevenLabsSynthesizer, FileSink, PlaybackOutcome, SpeechAdapter,
    SpeechSynthesizer,
};

fn synthesizer(base_url: &str) -> ElevenLabsSynthesizer {
    let config = SpeechConfig {
        api_key: Some("xi-test-key".to_string()),
        base_url: base_url.to_string(),
        model_id: "eleven_multilingual_v2".to_string(),
    };
    let request = RequestConfig {
        timeout_ms: 5000,
        max_retries: 0,
        retry_delay_ms: 10,
    };
    ElevenLabsSynthesizer::from_config(&config, &request)
        .expect("client builds")
        .expect("api key set")
}

#[tokio::test]
async fn test_synthesize_returns_audio_bytes() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/text-to-speech/voice-123"))
        .and(header("xi-api-key", "xi-test-key"))
        .and(body_partial_json(serde_json::json!({
            "text": "Buenas tardes",
            "model_id": "eleven_multilingual_v2"
        })))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Type", "audio/mpeg")
                .set_body_bytes(vec![0xFF, 0xFB, 0x90, 0x00]),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let audio = synthesizer(&mock_server.uri())
        .synthesize("Buenas tardes", "voice-123")
        .await
        .unwrap();
    assert_eq!(audio, vec![0xFF, 0xFB, 0x90, 0x00]);
}

#[tokio::test]
async fn test_synthesize_rejection_is_synthesis_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/text-to-speech/voice-123"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
        .mount(&mock_server)
        .await;

    let err = synthesizer(&mock_server.uri())
        .synthesize("Hola", "voice-123")
        .await
        .unwrap_err();

    match err {
        SpeechError::Synthesis { message } => {
            assert!(message.contains("401"));
            assert!(message.contains("invalid api key"));
        }
        other => panic!("expected synthesis error, got {}", other),
    }
}

#[tokio::test]
async fn test_empty_audio_is_an_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/text-to-speech/voice-123"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;

    let result = synthesizer(&mock_server.uri())
        .synthesize("Hola", "voice-123")
        .await;
    assert!(matches!(result, Err(SpeechError::Synthesis { .. })));
}

#[tokio::test]
async fn test_adapter_speaks_through_file_sink() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/text-to-speech/voice-123"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1, 2, 3]))
        .mount(&mock_server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let adapter = SpeechAdapter::voice(
        Arc::new(ChannelCapture::new()),
        Arc::new(synthesizer(&mock_server.uri())),
        Arc::new(FileSink::new(dir.path())),
    );

    let outcome = adapter.speak("Dígame", "voice-123").await;
    assert_eq!(outcome, PlaybackOutcome::Completed);

    let written = std::fs::read(dir.path().join("utterance-001.mp3")).unwrap();
    assert_eq!(written, vec![1, 2, 3]);
}

#[tokio::test]
async fn test_adapter_reports_synthesis_failure() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/text-to-speech/voice-123"))
        .respond_with(ResponseTemplate::new(429).set_body_string("quota exceeded"))
        .mount(&mock_server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let adapter = SpeechAdapter::voice(
        Arc::new(ChannelCapture::new()),
        Arc::new(synthesizer(&mock_server.uri())),
        Arc::new(FileSink::new(dir.path())),
    );

    match adapter.speak("Dígame", "voice-123").await {
        PlaybackOutcome::Failed(message) => assert!(message.contains("quota exceeded")),
        other => panic!("expected failure, got {:?}", other),
    }
    assert!(!adapter.is_playing());
}
