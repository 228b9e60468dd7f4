use super::{ensure_vision_supported, parse_tool_arguments, AdapterResponse, ProviderAdapter};
use crate::cache::CacheHandle;
use crate::config::{ProviderConfig, ProviderKind};
use crate::transport::VendorRequest;
use rondo_core::{
    ContentPart, Conversation, EngineError, EngineResult, Message, Role, ToolCall, ToolDescriptor,
};
use serde_json::{json, Value};

/// OpenAI Chat Completions wire format.
///
/// Also serves Azure OpenAI deployments and the OpenAI-compatible
/// endpoints of OpenRouter, Grok and Nvidia; only the URL shape and
/// auth header differ per flavor.
pub struct OpenAiAdapter {
    config: ProviderConfig,
}

impl OpenAiAdapter {
    /// Creates an adapter for the given session config.
    pub fn new(config: ProviderConfig) -> Self {
        Self { config }
    }

    fn url(&self) -> String {
        let base = self.config.base_url();
        match self.config.provider {
            ProviderKind::Azure => format!(
                "{}/openai/deployments/{}/chat/completions?api-version={}",
                base.trim_end_matches('/'),
                self.config.model,
                self.config.api_version.as_deref().unwrap_or_default(),
            ),
            _ => format!("{}/chat/completions", base.trim_end_matches('/')),
        }
    }

    fn headers(&self) -> Vec<(String, String)> {
        let mut headers = match self.config.provider {
            ProviderKind::Azure => {
                vec![("api-key".to_string(), self.config.api_key.clone())]
            }
            _ => vec![(
                "authorization".to_string(),
                format!("Bearer {}", self.config.api_key),
            )],
        };
        if self.config.provider == ProviderKind::OpenRouter {
            headers.push(("http-referer".to_string(), "https://localhost/agent".into()));
            headers.push(("x-title".to_string(), "rondo".into()));
        }
        headers
    }

    fn wire_message(&self, message: &Message) -> Option<Value> {
        match message.role {
            Role::System => Some(json!({ "role": "system", "content": message.text() })),
            Role::User => Some(json!({ "role": "user", "content": user_content(message) })),
            Role::Assistant => {
                let mut out = json!({ "role": "assistant", "content": message.text() });
                let calls = message.tool_calls();
                if !calls.is_empty() {
                    out["tool_calls"] = Value::Array(
                        calls
                            .iter()
                            .map(|c| {
                                json!({
                                    "id": c.id,
                                    "type": "function",
                                    "function": {
                                        "name": c.name,
                                        "arguments": c.arguments.to_string(),
                                    },
                                })
                            })
                            .collect(),
                    );
                }
                Some(out)
            }
            Role::Tool => message.as_tool_result().map(|result| {
                json!({
                    "role": "tool",
                    "tool_call_id": result.call_id,
                    "content": result.content,
                })
            }),
        }
    }
}

/// User content: a plain string when text-only, a parts array when the
/// message carries images.
fn user_content(message: &Message) -> Value {
    if !message.has_images() {
        return Value::String(message.text());
    }
    Value::Array(
        message
            .content
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text { text } => Some(json!({ "type": "text", "text": text })),
                ContentPart::Image { url } => {
                    Some(json!({ "type": "image_url", "image_url": { "url": url } }))
                }
                _ => None,
            })
            .collect(),
    )
}

fn chat_tool_specs(tools: &[ToolDescriptor]) -> Value {
    Value::Array(
        tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters_schema,
                    },
                })
            })
            .collect(),
    )
}

impl ProviderAdapter for OpenAiAdapter {
    fn translate_request(
        &self,
        conversation: &Conversation,
        tools: &[ToolDescriptor],
        _cache: Option<&CacheHandle>,
    ) -> EngineResult<VendorRequest> {
        ensure_vision_supported(
            self.supports_vision(),
            conversation,
            &self.config.provider.to_string(),
        )?;

        let messages: Vec<Value> = conversation
            .messages()
            .iter()
            .filter_map(|m| self.wire_message(m))
            .collect();

        let mut body = json!({
            "model": self.config.model,
            "messages": messages,
        });
        if !tools.is_empty() {
            body["tools"] = chat_tool_specs(tools);
            body["tool_choice"] = json!("auto");
        }
        // OpenRouter routes "openrouter/auto" through the configured
        // fallback chain when one is given.
        if self.config.provider == ProviderKind::OpenRouter
            && self.config.model == "openrouter/auto"
            && !self.config.fallback_models.is_empty()
        {
            body["models"] = json!(self.config.fallback_models);
        }

        Ok(VendorRequest {
            url: self.url(),
            headers: self.headers(),
            body,
        })
    }

    fn translate_response(&self, body: &Value) -> EngineResult<AdapterResponse> {
        let message = body
            .pointer("/choices/0/message")
            .ok_or_else(|| EngineError::Fatal("response has no choices[0].message".into()))?;

        let text = message
            .get("content")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(String::from);

        let mut tool_calls = Vec::new();
        if let Some(calls) = message.get("tool_calls").and_then(Value::as_array) {
            for call in calls {
                let id = call
                    .get("id")
                    .and_then(Value::as_str)
                    .ok_or_else(|| EngineError::Fatal("tool call missing id".into()))?;
                let name = call
                    .pointer("/function/name")
                    .and_then(Value::as_str)
                    .ok_or_else(|| EngineError::Fatal("tool call missing function.name".into()))?;
                let raw_args = call
                    .pointer("/function/arguments")
                    .and_then(Value::as_str)
                    .unwrap_or("{}");
                tool_calls.push(ToolCall {
                    id: id.to_string(),
                    name: name.to_string(),
                    arguments: parse_tool_arguments(raw_args),
                });
            }
        }

        Ok(AdapterResponse { text, tool_calls })
    }

    fn supports_vision(&self) -> bool {
        !matches!(
            self.config.provider,
            ProviderKind::Grok | ProviderKind::Nvidia
        )
    }
}
