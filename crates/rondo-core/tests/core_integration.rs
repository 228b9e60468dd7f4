#![allow(clippy::unwrap_used, clippy::expect_used)]

use rondo_core::*;
use serde_json::json;

// ---------------------------------------------------------------------------
// 1. Message serialization roundtrip
// ---------------------------------------------------------------------------

#[test]
fn message_serialization_roundtrip() {
    let msg = Message::assistant_with_calls(
        Some("checking".into()),
        vec![ToolCall {
            id: "call_abc123".into(),
            name: "web_search".into(),
            arguments: json!({"query": "Rust async"}),
        }],
    );

    let serialized = serde_json::to_string(&msg).unwrap();
    let deserialized: Message = serde_json::from_str(&serialized).unwrap();

    assert_eq!(deserialized.id, msg.id);
    assert_eq!(deserialized.role, Role::Assistant);
    assert_eq!(deserialized.timestamp, msg.timestamp);
    assert_eq!(deserialized.text(), "checking");
    assert_eq!(deserialized.tool_calls().len(), 1);
    assert_eq!(deserialized.tool_calls()[0].name, "web_search");
}

// ---------------------------------------------------------------------------
// 2. ToolCall -> ToolResult flow (success and error variants)
// ---------------------------------------------------------------------------

#[test]
fn tool_call_to_tool_result_flow() {
    let tool_call = ToolCall {
        id: "call_abc123".to_string(),
        name: "web_search".to_string(),
        arguments: json!({"query": "Rust async"}),
    };

    let success_result = ToolResult::success(&tool_call.id, "Found 42 results");
    assert_eq!(success_result.call_id, tool_call.id);
    assert_eq!(success_result.content, "Found 42 results");
    assert!(!success_result.is_error);

    let error_result = ToolResult::error(&tool_call.id, "Network timeout");
    assert_eq!(error_result.call_id, tool_call.id);
    assert!(error_result.is_error);

    let serialized = serde_json::to_string(&tool_call).unwrap();
    let deserialized: ToolCall = serde_json::from_str(&serialized).unwrap();
    assert_eq!(deserialized.id, "call_abc123");
    assert_eq!(deserialized.arguments, json!({"query": "Rust async"}));
}

// ---------------------------------------------------------------------------
// 3. Error classification across the taxonomy
// ---------------------------------------------------------------------------

#[test]
fn error_classification_and_display() {
    let rate = EngineError::RateLimited {
        message: "429 too many requests".into(),
        retry_after: Some(std::time::Duration::from_secs(30)),
    };
    assert_eq!(rate.class(), ErrorClass::RateLimited);
    assert_eq!(
        rate.retry_after(),
        Some(std::time::Duration::from_secs(30))
    );

    let transient = EngineError::Transient("503 upstream".into());
    assert_eq!(transient.class(), ErrorClass::Transient);
    assert_eq!(transient.retry_after(), None);

    assert_eq!(
        EngineError::Fatal("401 unauthorized".into()).class(),
        ErrorClass::Fatal
    );
    assert_eq!(
        EngineError::UnsupportedCapability("images".into()).class(),
        ErrorClass::Fatal
    );
    assert_eq!(
        EngineError::RoundLimitExceeded { rounds: 200 }.class(),
        ErrorClass::Fatal
    );

    let bad_json = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
    let engine_err: EngineError = bad_json.into();
    assert_eq!(engine_err.class(), ErrorClass::Fatal);
}

// ---------------------------------------------------------------------------
// 4. RoundFailure carries stage and retry context
// ---------------------------------------------------------------------------

#[test]
fn round_failure_display() {
    let plain = RoundFailure::new(
        FailureStage::Translate,
        EngineError::UnsupportedCapability("images".into()),
    );
    assert!(!plain.retries_exhausted);
    assert!(plain.to_string().starts_with("translate stage failed:"));

    let spent = RoundFailure::exhausted(
        FailureStage::Network,
        EngineError::RateLimited {
            message: "429".into(),
            retry_after: None,
        },
    );
    assert!(spent.retries_exhausted);
    assert!(spent.to_string().contains("(retries exhausted)"));
}

// ---------------------------------------------------------------------------
// 5. Conversation is append-only and seeds from memory
// ---------------------------------------------------------------------------

struct FixedMemory;

impl MemoryInjector for FixedMemory {
    fn initial_messages(&self) -> Vec<Message> {
        vec![
            Message::system("you are terse"),
            Message::system("answer in English"),
        ]
    }
}

#[test]
fn conversation_seeds_from_memory_and_joins_system_text() {
    let mut conversation = Conversation::with_memory(&FixedMemory);
    assert_eq!(conversation.len(), 2);

    conversation.push(Message::user("hello"));
    assert_eq!(conversation.len(), 3);
    assert_eq!(
        conversation.system_text(),
        "you are terse\nanswer in English"
    );
    assert_eq!(conversation.messages()[2].role, Role::User);
}

// ---------------------------------------------------------------------------
// 6. Role serialization matches the canonical lowercase names
// ---------------------------------------------------------------------------

#[test]
fn role_serialization() {
    assert_eq!(serde_json::to_string(&Role::User).unwrap(), "\"user\"");
    assert_eq!(
        serde_json::to_string(&Role::Assistant).unwrap(),
        "\"assistant\""
    );
    assert_eq!(serde_json::to_string(&Role::System).unwrap(), "\"system\"");
    assert_eq!(serde_json::to_string(&Role::Tool).unwrap(), "\"tool\"");

    let tool: Role = serde_json::from_str("\"tool\"").unwrap();
    assert_eq!(tool, Role::Tool);

    let bad: Result<Role, _> = serde_json::from_str("\"unknown\"");
    assert!(bad.is_err());
}
