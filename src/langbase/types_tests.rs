//! Unit tests for Langbase wire types.

use super::*;

#[test]
fn test_message_constructors() {
    assert_eq!(Message::system("brief").role, MessageRole::System);
    assert_eq!(Message::user("hola").role, MessageRole::User);

    let msg = Message::assistant("buenas tardes");
    assert_eq!(msg.role, MessageRole::Assistant);
    assert_eq!(msg.content, "buenas tardes");
}

#[test]
fn test_message_role_serializes_lowercase() {
    let json = serde_json::to_value(Message::assistant("ok")).unwrap();
    assert_eq!(json["role"], "assistant");
}

#[test]
fn test_pipe_request_defaults_to_non_streaming() {
    let req = PipeRequest::new("sales-client-v1", vec![Message::user("hola")]);
    assert_eq!(req.name, "sales-client-v1");
    assert!(!req.stream);

    let json = serde_json::to_value(&req).unwrap();
    assert_eq!(json["stream"], false);
    assert_eq!(json["messages"][0]["role"], "user");
}

#[test]
fn test_pipe_response_deserializes_without_raw() {
    let json = r#"{"success": true, "completion": "Hola, ¿en qué le ayudo?", "threadId": null}"#;
    let resp: PipeResponse = serde_json::from_str(json).unwrap();
    assert!(resp.success);
    assert!(resp.raw.is_none());
    assert!(resp.thread_id.is_none());
}

#[test]
fn test_create_pipe_request_skips_unset_fields() {
    let req = CreatePipeRequest::new("sales-evaluator-v1")
        .with_json_output(true)
        .with_temperature(0.2);
    let json = serde_json::to_value(&req).unwrap();

    assert_eq!(json["name"], "sales-evaluator-v1");
    assert_eq!(json["json"], true);
    assert!(json.get("model").is_none());
    assert!(json.get("messages").is_none());
}
