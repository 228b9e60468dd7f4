use super::{ensure_vision_supported, AdapterResponse, ProviderAdapter};
use crate::cache::CacheHandle;
use crate::config::ProviderConfig;
use crate::transport::VendorRequest;
use rondo_core::{
    ContentPart, Conversation, EngineError, EngineResult, Message, Role, ToolCall, ToolDescriptor,
};
use serde_json::{json, Value};

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic Messages API wire format.
///
/// The endpoint requires strict user/assistant alternation, so
/// consecutive same-role messages are merged into one entry with
/// multiple content blocks, and tool results ride inside user
/// messages. System messages move to the top-level `system` field and
/// get an ephemeral `cache_control` marker, as does the first user
/// text block, so the static prefix is cached between rounds.
pub struct ClaudeAdapter {
    config: ProviderConfig,
}

impl ClaudeAdapter {
    /// Creates an adapter for the given session config.
    pub fn new(config: ProviderConfig) -> Self {
        Self { config }
    }
}

/// Content blocks for one canonical message, minus system handling.
fn blocks_for(message: &Message) -> Vec<Value> {
    message
        .content
        .iter()
        .filter_map(|part| match part {
            ContentPart::Text { text } if !text.is_empty() => {
                Some(json!({ "type": "text", "text": text }))
            }
            ContentPart::Text { .. } => None,
            ContentPart::Image { url } => Some(json!({
                "type": "image",
                "source": { "type": "url", "url": url },
            })),
            ContentPart::ToolUse(call) => Some(json!({
                "type": "tool_use",
                "id": call.id,
                "name": call.name,
                "input": call.arguments,
            })),
            ContentPart::ToolResult(result) => {
                let mut block = json!({
                    "type": "tool_result",
                    "tool_use_id": result.call_id,
                    "content": result.content,
                });
                if result.is_error {
                    block["is_error"] = json!(true);
                }
                Some(block)
            }
        })
        .collect()
}

/// Merges canonical history into alternating user/assistant entries.
fn merged_messages(conversation: &Conversation) -> Vec<Value> {
    let mut out: Vec<Value> = Vec::new();
    for message in conversation.messages() {
        let role = match message.role {
            Role::System => continue,
            Role::Assistant => "assistant",
            // Tool results are user-authored turns on this wire.
            Role::User | Role::Tool => "user",
        };
        let blocks = blocks_for(message);
        if blocks.is_empty() {
            continue;
        }
        match out.last_mut() {
            Some(last) if last["role"] == role => {
                if let Some(content) = last["content"].as_array_mut() {
                    content.extend(blocks);
                }
            }
            _ => out.push(json!({ "role": role, "content": blocks })),
        }
    }
    out
}

/// Marks the first text block of the first user entry as cacheable.
fn mark_first_user_text(messages: &mut [Value]) {
    for entry in messages.iter_mut() {
        if entry["role"] != "user" {
            continue;
        }
        if let Some(blocks) = entry["content"].as_array_mut() {
            for block in blocks {
                if block["type"] == "text" {
                    block["cache_control"] = json!({ "type": "ephemeral" });
                    return;
                }
            }
        }
        return;
    }
}

fn tool_specs(tools: &[ToolDescriptor]) -> Value {
    Value::Array(
        tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.parameters_schema,
                })
            })
            .collect(),
    )
}

impl ProviderAdapter for ClaudeAdapter {
    fn translate_request(
        &self,
        conversation: &Conversation,
        tools: &[ToolDescriptor],
        _cache: Option<&CacheHandle>,
    ) -> EngineResult<VendorRequest> {
        ensure_vision_supported(self.supports_vision(), conversation, "claude")?;

        let mut messages = merged_messages(conversation);
        mark_first_user_text(&mut messages);

        let mut body = json!({
            "model": self.config.model,
            "max_tokens": self.config.max_tokens,
            "messages": messages,
        });

        let system = conversation.system_text();
        if !system.trim().is_empty() {
            body["system"] = json!([{
                "type": "text",
                "text": system.trim(),
                "cache_control": { "type": "ephemeral" },
            }]);
        }
        if !tools.is_empty() {
            body["tools"] = tool_specs(tools);
        }

        Ok(VendorRequest {
            url: format!(
                "{}/v1/messages",
                self.config.base_url().trim_end_matches('/')
            ),
            headers: vec![
                ("x-api-key".to_string(), self.config.api_key.clone()),
                ("anthropic-version".to_string(), ANTHROPIC_VERSION.into()),
            ],
            body,
        })
    }

    fn translate_response(&self, body: &Value) -> EngineResult<AdapterResponse> {
        let content = body
            .get("content")
            .and_then(Value::as_array)
            .ok_or_else(|| EngineError::Fatal("response has no content blocks".into()))?;

        let mut text = String::new();
        let mut tool_calls = Vec::new();

        for block in content {
            match block.get("type").and_then(Value::as_str) {
                Some("text") => {
                    if let Some(t) = block.get("text").and_then(Value::as_str) {
                        text.push_str(t);
                    }
                }
                Some("tool_use") => {
                    let id = block
                        .get("id")
                        .and_then(Value::as_str)
                        .ok_or_else(|| EngineError::Fatal("tool_use block missing id".into()))?;
                    let name = block
                        .get("name")
                        .and_then(Value::as_str)
                        .ok_or_else(|| EngineError::Fatal("tool_use block missing name".into()))?;
                    tool_calls.push(ToolCall {
                        id: id.to_string(),
                        name: name.to_string(),
                        arguments: block.get("input").cloned().unwrap_or_else(|| json!({})),
                    });
                }
                _ => {}
            }
        }

        Ok(AdapterResponse {
            text: (!text.is_empty()).then_some(text),
            tool_calls,
        })
    }

    fn supports_vision(&self) -> bool {
        true
    }
}
