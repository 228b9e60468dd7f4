use super::{
    ensure_vision_supported, parse_tool_arguments, tool_name_index, AdapterResponse,
    ProviderAdapter,
};
use crate::cache::CacheHandle;
use crate::config::{ProviderConfig, ProviderKind};
use crate::transport::VendorRequest;
use rondo_core::{
    ContentPart, Conversation, EngineError, EngineResult, Message, Role, ToolCall, ToolDescriptor,
};
use serde_json::{json, Value};

/// Guideline prepended to every `instructions` string. Some endpoints
/// otherwise emit `function_call` with empty `{}` arguments for tools
/// that declare required parameters.
const TOOL_CALLING_RULES: &str = "[Tool calling rules]\n\
- When calling a tool/function, you MUST provide function_call.arguments as a JSON object.\n\
- The JSON object MUST include all required parameters defined in the tool schema.\n\
- Never call a tool with an empty object {} unless the tool has no required parameters.\n\
- If you do not have a required parameter, ask the user for it instead of guessing.\n";

/// OpenAI Responses API wire format.
///
/// The Responses API has no tool role and no assistant `tool_calls`
/// field in its input list, so history is rewritten: system messages
/// and executed-tool summaries move into `instructions`, and tool
/// results become user items with a provenance prefix.
pub struct ResponsesAdapter {
    config: ProviderConfig,
}

impl ResponsesAdapter {
    /// Creates an adapter for the given session config.
    pub fn new(config: ProviderConfig) -> Self {
        Self { config }
    }

    fn url(&self) -> String {
        let base = self.config.base_url();
        match self.config.provider {
            ProviderKind::Azure => format!(
                "{}/openai/v1/responses?api-version={}",
                base.trim_end_matches('/'),
                self.config.api_version.as_deref().unwrap_or_default(),
            ),
            _ => format!("{}/responses", base.trim_end_matches('/')),
        }
    }

    fn headers(&self) -> Vec<(String, String)> {
        match self.config.provider {
            ProviderKind::Azure => vec![("api-key".to_string(), self.config.api_key.clone())],
            _ => vec![(
                "authorization".to_string(),
                format!("Bearer {}", self.config.api_key),
            )],
        }
    }
}

/// Content items for one input entry. Users get `input_text` and
/// `input_image`; assistant history gets `output_text`.
fn content_items(message: &Message, as_role: Role) -> Vec<Value> {
    let text_type = if as_role == Role::Assistant {
        "output_text"
    } else {
        "input_text"
    };
    let mut items: Vec<Value> = message
        .content
        .iter()
        .filter_map(|part| match part {
            ContentPart::Text { text } => Some(json!({ "type": text_type, "text": text })),
            ContentPart::Image { url } if as_role != Role::Assistant => {
                Some(json!({ "type": "input_image", "image_url": { "url": url } }))
            }
            _ => None,
        })
        .collect();
    if items.is_empty() {
        items.push(json!({ "type": text_type, "text": "" }));
    }
    items
}

fn flat_tool_specs(tools: &[ToolDescriptor]) -> Value {
    Value::Array(
        tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.parameters_schema,
                })
            })
            .collect(),
    )
}

impl ProviderAdapter for ResponsesAdapter {
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

        let names = tool_name_index(conversation);
        let mut instructions: Vec<String> = vec![TOOL_CALLING_RULES.to_string()];
        let mut input: Vec<Value> = Vec::new();

        for message in conversation.messages() {
            match message.role {
                Role::System => instructions.push(message.text()),
                Role::Assistant => {
                    let calls = message.tool_calls();
                    if !calls.is_empty() {
                        let summary: Vec<String> = calls
                            .iter()
                            .map(|c| format!("{}({})", c.name, c.arguments))
                            .collect();
                        instructions.push(format!(
                            "[System: The assistant previously executed tools: {}]",
                            summary.join(", ")
                        ));
                    }
                    input.push(json!({
                        "role": "assistant",
                        "content": content_items(message, Role::Assistant),
                    }));
                }
                Role::User => input.push(json!({
                    "role": "user",
                    "content": content_items(message, Role::User),
                })),
                Role::Tool => {
                    if let Some(result) = message.as_tool_result() {
                        let name = names
                            .get(&result.call_id)
                            .map(String::as_str)
                            .unwrap_or("unknown");
                        let text =
                            format!("[System: Tool '{name}' returned result]\n{}", result.content);
                        input.push(json!({
                            "role": "user",
                            "content": [{ "type": "input_text", "text": text }],
                        }));
                    }
                }
            }
        }

        let mut body = json!({
            "model": self.config.model,
            "input": input,
        });
        let joined = instructions.join("\n");
        if !joined.trim().is_empty() {
            body["instructions"] = json!(joined);
        }
        if !tools.is_empty() {
            body["tools"] = flat_tool_specs(tools);
            body["tool_choice"] = json!("auto");
        }

        Ok(VendorRequest {
            url: self.url(),
            headers: self.headers(),
            body,
        })
    }

    fn translate_response(&self, body: &Value) -> EngineResult<AdapterResponse> {
        let output = body
            .get("output")
            .and_then(Value::as_array)
            .ok_or_else(|| EngineError::Fatal("response has no output list".into()))?;

        let mut text = String::new();
        let mut tool_calls = Vec::new();

        for item in output {
            match item.get("type").and_then(Value::as_str) {
                Some("message") => {
                    for c in item.get("content").and_then(Value::as_array).into_iter().flatten() {
                        if matches!(
                            c.get("type").and_then(Value::as_str),
                            Some("output_text") | Some("text")
                        ) {
                            if let Some(t) = c.get("text").and_then(Value::as_str) {
                                text.push_str(t);
                            }
                        }
                    }
                }
                Some("function_call") => {
                    let name = item
                        .get("name")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown");
                    // Some deployments return arguments as an object,
                    // others as a JSON string.
                    let arguments = match item.get("arguments") {
                        Some(Value::String(s)) => parse_tool_arguments(s),
                        Some(value @ Value::Object(_)) => value.clone(),
                        _ => json!({}),
                    };
                    let id = item
                        .get("call_id")
                        .or_else(|| item.get("id"))
                        .and_then(Value::as_str)
                        .map(String::from)
                        .unwrap_or_else(|| format!("call_{}", tool_calls.len() + 1));
                    tool_calls.push(ToolCall {
                        id,
                        name: name.to_string(),
                        arguments,
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

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use rondo_core::ToolResult;

    fn adapter() -> ResponsesAdapter {
        let mut config = ProviderConfig::new(ProviderKind::OpenAi, "gpt-5.2", "sk-test");
        config.use_responses_api = true;
        ResponsesAdapter::new(config)
    }

    fn descriptor() -> ToolDescriptor {
        ToolDescriptor {
            name: "read_file".into(),
            description: "Reads a file".into(),
            parameters_schema: json!({ "type": "object", "properties": {} }),
        }
    }

    #[test]
    fn system_messages_fold_into_instructions() {
        let mut conversation = Conversation::new();
        conversation.push(Message::system("be brief"));
        conversation.push(Message::user("hello"));

        let request = adapter()
            .translate_request(&conversation, &[], None)
            .unwrap();

        assert_eq!(request.url, "https://api.openai.com/v1/responses");
        let instructions = request.body["instructions"].as_str().unwrap();
        assert!(instructions.starts_with("[Tool calling rules]"));
        assert!(instructions.contains("be brief"));
        // System messages never appear in the input list.
        assert_eq!(request.body["input"].as_array().unwrap().len(), 1);
        assert_eq!(request.body["input"][0]["role"], "user");
    }

    #[test]
    fn tool_history_rewritten_into_user_items() {
        let mut conversation = Conversation::new();
        conversation.push(Message::user("read a.txt"));
        conversation.push(Message::assistant_with_calls(
            None,
            vec![ToolCall {
                id: "call_1".into(),
                name: "read_file".into(),
                arguments: json!({"path": "a.txt"}),
            }],
        ));
        conversation.push(Message::tool_result(ToolResult::success(
            "call_1",
            "contents",
        )));

        let request = adapter()
            .translate_request(&conversation, &[], None)
            .unwrap();

        let instructions = request.body["instructions"].as_str().unwrap();
        assert!(instructions.contains(
            "[System: The assistant previously executed tools: read_file({\"path\":\"a.txt\"})]"
        ));

        let input = request.body["input"].as_array().unwrap();
        assert_eq!(input.len(), 3);
        assert_eq!(input[2]["role"], "user");
        assert_eq!(
            input[2]["content"][0]["text"],
            "[System: Tool 'read_file' returned result]\ncontents"
        );
        // No tool role and no tool_calls field survive the rewrite.
        assert!(request.body.to_string().find("\"role\":\"tool\"").is_none());
        assert!(input[1].get("tool_calls").is_none());
    }

    #[test]
    fn tools_sent_as_flat_specs() {
        let mut conversation = Conversation::new();
        conversation.push(Message::user("hi"));
        let request = adapter()
            .translate_request(&conversation, &[descriptor()], None)
            .unwrap();

        assert_eq!(
            request.body["tools"][0],
            json!({
                "type": "function",
                "name": "read_file",
                "description": "Reads a file",
                "parameters": { "type": "object", "properties": {} },
            })
        );
        assert_eq!(request.body["tool_choice"], "auto");
    }

    #[test]
    fn optional_fields_omitted_when_empty() {
        let mut conversation = Conversation::new();
        conversation.push(Message::user("hi"));
        let request = adapter()
            .translate_request(&conversation, &[], None)
            .unwrap();
        assert!(request.body.get("tools").is_none());
        assert!(request.body.get("tool_choice").is_none());
    }

    #[test]
    fn user_images_become_input_image_items() {
        let mut conversation = Conversation::new();
        let mut message = Message::user("what is this");
        message.content.push(ContentPart::Image {
            url: "https://example.com/x.png".into(),
        });
        conversation.push(message);

        let request = adapter()
            .translate_request(&conversation, &[], None)
            .unwrap();
        assert_eq!(
            request.body["input"][0]["content"],
            json!([
                { "type": "input_text", "text": "what is this" },
                { "type": "input_image", "image_url": { "url": "https://example.com/x.png" } },
            ])
        );
    }

    #[test]
    fn azure_uses_versioned_responses_url() {
        let mut config = ProviderConfig::new(ProviderKind::Azure, "gpt-5.2", "k");
        config.base_url = Some("https://acme.openai.azure.com".into());
        config.api_version = Some("preview".into());
        config.use_responses_api = true;
        let adapter = ResponsesAdapter::new(config);

        let mut conversation = Conversation::new();
        conversation.push(Message::user("hi"));
        let request = adapter.translate_request(&conversation, &[], None).unwrap();
        assert_eq!(
            request.url,
            "https://acme.openai.azure.com/openai/v1/responses?api-version=preview"
        );
        assert!(request.headers.contains(&("api-key".into(), "k".into())));
    }

    #[test]
    fn parses_message_and_function_call_output() {
        let body = json!({
            "output": [
                {
                    "type": "message",
                    "content": [
                        { "type": "output_text", "text": "Reading " },
                        { "type": "output_text", "text": "now." },
                    ],
                },
                {
                    "type": "function_call",
                    "call_id": "call_7",
                    "name": "read_file",
                    "arguments": "{\"path\": \"a.txt\"}",
                },
            ]
        });
        let reply = adapter().translate_response(&body).unwrap();
        assert_eq!(reply.text.as_deref(), Some("Reading now."));
        assert_eq!(reply.tool_calls.len(), 1);
        assert_eq!(reply.tool_calls[0].id, "call_7");
        assert_eq!(reply.tool_calls[0].arguments, json!({"path": "a.txt"}));
    }

    #[test]
    fn object_arguments_accepted_directly() {
        let body = json!({
            "output": [{
                "type": "function_call",
                "id": "fc_1",
                "name": "read_file",
                "arguments": { "path": "a.txt" },
            }]
        });
        let reply = adapter().translate_response(&body).unwrap();
        assert_eq!(reply.tool_calls[0].id, "fc_1");
        assert_eq!(reply.tool_calls[0].arguments, json!({"path": "a.txt"}));
    }

    #[test]
    fn missing_output_is_fatal() {
        let err = adapter().translate_response(&json!({})).unwrap_err();
        assert!(matches!(err, EngineError::Fatal(_)));
    }
}
