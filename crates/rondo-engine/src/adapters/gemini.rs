use super::{ensure_vision_supported, tool_name_index, AdapterResponse, ProviderAdapter};
use crate::cache::{CacheBackend, CacheHandle, CachePayload};
use crate::config::ProviderConfig;
use crate::transport::VendorRequest;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rondo_core::{
    ContentPart, Conversation, EngineError, EngineResult, Role, ToolCall, ToolDescriptor,
};
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::debug;

/// Gemini `generateContent` wire format.
///
/// Gemini has no tool-call ids: calls go out as `functionCall` parts
/// and results come back as `functionResponse` parts keyed by function
/// name, so synthetic `gemini_fc_N` ids are minted on parse and the
/// name is recovered from history when sending results. Tool parameter
/// schemas are rewritten into the Gemini subset before sending.
pub struct GeminiAdapter {
    config: ProviderConfig,
}

impl GeminiAdapter {
    /// Creates an adapter for the given session config.
    pub fn new(config: ProviderConfig) -> Self {
        Self { config }
    }

    fn url(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.config.base_url().trim_end_matches('/'),
            self.config.model,
        )
    }
}

fn map_type(t: &str) -> &'static str {
    match t.trim().to_ascii_lowercase().as_str() {
        "string" => "STRING",
        "number" => "NUMBER",
        "integer" => "INTEGER",
        "boolean" => "BOOLEAN",
        "array" => "ARRAY",
        "object" => "OBJECT",
        "null" => "NULL",
        "type_unspecified" => "TYPE_UNSPECIFIED",
        _ => "TYPE_UNSPECIFIED",
    }
}

fn is_null_schema(schema: &Value) -> bool {
    let Some(map) = schema.as_object() else {
        return false;
    };
    match map.get("type") {
        Some(Value::String(t)) => t.eq_ignore_ascii_case("null"),
        Some(Value::Array(types)) => types
            .iter()
            .any(|t| t.as_str().is_some_and(|s| s.eq_ignore_ascii_case("null"))),
        _ => false,
    }
}

/// Folds `["string", "null"]` type lists and single-variant
/// `anyOf`/`oneOf` null unions into `nullable: true`.
fn collapse_nullable_union(mut out: Map<String, Value>) -> (Map<String, Value>, bool) {
    let mut nullable = false;

    if let Some(Value::Array(types)) = out.get("type").cloned() {
        let names: Vec<String> = types
            .iter()
            .filter_map(|t| t.as_str().map(str::to_string))
            .collect();
        let has_null = names.iter().any(|t| t.eq_ignore_ascii_case("null"));
        if has_null {
            nullable = true;
            let first_non_null = names
                .iter()
                .find(|t| !t.eq_ignore_ascii_case("null"))
                .cloned()
                .unwrap_or_else(|| "null".to_string());
            out.insert("type".into(), Value::String(first_non_null));
        }
    }

    for key in ["anyOf", "oneOf"] {
        let Some(Value::Array(variants)) = out.get(key) else {
            continue;
        };
        if variants.is_empty() {
            continue;
        }
        let non_null: Vec<Value> = variants
            .iter()
            .filter(|v| !is_null_schema(v))
            .cloned()
            .collect();
        let has_null = non_null.len() != variants.len();
        if has_null && non_null.len() == 1 {
            if let Some(base) = non_null[0].as_object() {
                nullable = true;
                let mut base = base.clone();
                for carry in ["description", "enum", "format"] {
                    if let Some(v) = out.get(carry) {
                        base.entry(carry.to_string()).or_insert_with(|| v.clone());
                    }
                }
                out.remove(key);
                for (k, v) in base {
                    out.insert(k, v);
                }
                break;
            }
        }
    }

    (out, nullable)
}

fn sanitize_node(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let src: Map<String, Value> = map
                .iter()
                .filter(|(k, _)| {
                    !k.starts_with('$')
                        && k.as_str() != "additionalProperties"
                        && k.as_str() != "additional_properties"
                })
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            let (src, nullable_from_union) = collapse_nullable_union(src);

            let mut dst = Map::new();
            let mapped = match src.get("type") {
                Some(Value::String(t)) => map_type(t),
                None if src.contains_key("properties") => "OBJECT",
                None if src.contains_key("items") => "ARRAY",
                _ => "TYPE_UNSPECIFIED",
            };
            dst.insert("type".into(), Value::String(mapped.into()));

            if src.get("nullable") == Some(&Value::Bool(true)) || nullable_from_union {
                dst.insert("nullable".into(), Value::Bool(true));
            }
            for key in ["description", "format"] {
                if let Some(Value::String(s)) = src.get(key) {
                    if !s.is_empty() {
                        dst.insert(key.into(), Value::String(s.clone()));
                    }
                }
            }
            if let Some(Value::Array(variants)) = src.get("enum") {
                if !variants.is_empty() {
                    dst.insert("enum".into(), Value::Array(variants.clone()));
                }
            }
            if let Some(Value::Array(required)) = src.get("required") {
                let names: Vec<Value> = required.iter().filter(|v| v.is_string()).cloned().collect();
                if !names.is_empty() {
                    dst.insert("required".into(), Value::Array(names));
                }
            }
            if let Some(Value::Object(props)) = src.get("properties") {
                let mut sanitized = Map::new();
                for (name, schema) in props {
                    if !name.is_empty() {
                        sanitized.insert(name.clone(), sanitize_node(schema));
                    }
                }
                dst.insert("properties".into(), Value::Object(sanitized));
            }
            match src.get("items") {
                Some(items @ Value::Object(_)) => {
                    dst.insert("items".into(), sanitize_node(items));
                }
                Some(Value::Array(list)) => {
                    let item = list
                        .first()
                        .map(sanitize_node)
                        .unwrap_or_else(|| json!({ "type": "STRING" }));
                    dst.insert("items".into(), item);
                }
                _ => {}
            }

            Value::Object(dst)
        }
        Value::Array(list) => Value::Array(list.iter().map(sanitize_node).collect()),
        other => other.clone(),
    }
}

/// Rewrites a JSON-Schema tool parameter object into the subset the
/// Gemini `FunctionDeclaration` accepts. Anything unusable collapses
/// to an empty object schema rather than failing the request.
pub(crate) fn sanitize_parameters(params: &Value) -> Value {
    let empty = || json!({ "type": "OBJECT", "properties": {} });
    match params.as_object() {
        None => return empty(),
        Some(map) if map.is_empty() => return empty(),
        Some(_) => {}
    }
    let mut out = match sanitize_node(params) {
        Value::Object(map) => map,
        _ => return empty(),
    };
    if out.get("type") != Some(&Value::String("OBJECT".into())) {
        return empty();
    }
    if !out.get("properties").is_some_and(Value::is_object) {
        out.insert("properties".into(), json!({}));
    }
    Value::Object(out)
}

fn function_declarations(tools: &[ToolDescriptor]) -> Value {
    Value::Array(
        tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "parameters": sanitize_parameters(&t.parameters_schema),
                })
            })
            .collect(),
    )
}

/// Wraps tool output for a `functionResponse` part: JSON objects pass
/// through, everything else is wrapped under `content`.
fn function_response_payload(content: &str) -> Value {
    match serde_json::from_str::<Value>(content) {
        Ok(value @ Value::Object(_)) => value,
        _ => json!({ "content": content }),
    }
}

fn append_part(contents: &mut Vec<Value>, role: &str, part: Value) {
    match contents.last_mut() {
        Some(last) if last["role"] == role => {
            if let Some(parts) = last["parts"].as_array_mut() {
                parts.push(part);
            }
        }
        _ => contents.push(json!({ "role": role, "parts": [part] })),
    }
}

impl ProviderAdapter for GeminiAdapter {
    fn translate_request(
        &self,
        conversation: &Conversation,
        tools: &[ToolDescriptor],
        cache: Option<&CacheHandle>,
    ) -> EngineResult<VendorRequest> {
        ensure_vision_supported(self.supports_vision(), conversation, "gemini")?;

        let names = tool_name_index(conversation);
        let mut contents: Vec<Value> = Vec::new();

        for message in conversation.messages() {
            match message.role {
                Role::System => {}
                Role::User => {
                    for part in &message.content {
                        match part {
                            ContentPart::Text { text } if !text.trim().is_empty() => {
                                append_part(&mut contents, "user", json!({ "text": text }));
                            }
                            ContentPart::Image { url } => append_part(
                                &mut contents,
                                "user",
                                json!({ "fileData": { "fileUri": url } }),
                            ),
                            _ => {}
                        }
                    }
                }
                Role::Assistant => {
                    let text = message.text();
                    if !text.trim().is_empty() {
                        append_part(&mut contents, "model", json!({ "text": text }));
                    }
                    for call in message.tool_calls() {
                        let args = if call.arguments.is_object() {
                            call.arguments.clone()
                        } else {
                            json!({})
                        };
                        append_part(
                            &mut contents,
                            "model",
                            json!({ "functionCall": { "name": call.name, "args": args } }),
                        );
                    }
                }
                Role::Tool => {
                    if let Some(result) = message.as_tool_result() {
                        let name = names
                            .get(&result.call_id)
                            .map(String::as_str)
                            .unwrap_or("tool");
                        append_part(
                            &mut contents,
                            "tool",
                            json!({
                                "functionResponse": {
                                    "name": name,
                                    "response": function_response_payload(&result.content),
                                },
                            }),
                        );
                    }
                }
            }
        }

        if contents.is_empty() && cache.is_none() {
            contents.push(json!({ "role": "user", "parts": [{ "text": "" }] }));
        }

        let mut body = json!({ "contents": contents });
        if let Some(handle) = cache {
            // The cache already holds the system prompt and tool
            // declarations; repeating them is a vendor error.
            body["cachedContent"] = json!(handle.name);
        } else {
            if !tools.is_empty() {
                body["tools"] = json!([{ "functionDeclarations": function_declarations(tools) }]);
            }
            let system = conversation.system_text();
            if !system.trim().is_empty() {
                body["systemInstruction"] = json!({ "parts": [{ "text": system }] });
            }
        }

        Ok(VendorRequest {
            url: self.url(),
            headers: vec![("x-goog-api-key".to_string(), self.config.api_key.clone())],
            body,
        })
    }

    fn translate_response(&self, body: &Value) -> EngineResult<AdapterResponse> {
        let parts = body.pointer("/candidates/0/content/parts");
        let Some(parts) = parts.and_then(Value::as_array) else {
            // A candidate with no parts is a legal empty reply.
            return Ok(AdapterResponse {
                text: None,
                tool_calls: Vec::new(),
            });
        };

        let mut text = String::new();
        let mut tool_calls = Vec::new();

        for part in parts {
            if let Some(call) = part.get("functionCall") {
                let Some(name) = call.get("name").and_then(Value::as_str) else {
                    continue;
                };
                let arguments = match call.get("args") {
                    Some(value @ Value::Object(_)) => value.clone(),
                    Some(Value::String(s)) => match serde_json::from_str::<Value>(s) {
                        Ok(value @ Value::Object(_)) => value,
                        _ => json!({ "_raw": s }),
                    },
                    _ => json!({}),
                };
                tool_calls.push(ToolCall {
                    id: format!("gemini_fc_{}", tool_calls.len() + 1),
                    name: name.to_string(),
                    arguments,
                });
            }
            if let Some(t) = part.get("text").and_then(Value::as_str) {
                text.push_str(t);
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

    fn cache_capable(&self) -> bool {
        true
    }
}

/// Gemini `cachedContents` REST backend for the context cache manager.
pub struct GeminiCacheBackend {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl GeminiCacheBackend {
    /// Creates a backend sharing the session's base URL and API key.
    pub fn new(config: &ProviderConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.base_url().trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        }
    }
}

#[async_trait]
impl CacheBackend for GeminiCacheBackend {
    async fn create(&self, payload: &CachePayload, ttl: Duration) -> EngineResult<CacheHandle> {
        let mut body = json!({
            "model": format!("models/{}", payload.model),
            "ttl": format!("{}s", ttl.as_secs()),
        });
        if !payload.system_instruction.trim().is_empty() {
            body["systemInstruction"] =
                json!({ "parts": [{ "text": payload.system_instruction }] });
        }
        if !payload.tool_schemas.is_empty() {
            body["tools"] =
                json!([{ "functionDeclarations": function_declarations(&payload.tool_schemas) }]);
        }

        let url = format!("{}/v1beta/cachedContents", self.base_url);
        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| EngineError::Transient(format!("cache create request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(EngineError::Transient(format!(
                "cache create returned {status}: {}",
                text.chars().take(200).collect::<String>()
            )));
        }

        let value: Value = response
            .json()
            .await
            .map_err(|e| EngineError::Transient(format!("cache create body unreadable: {e}")))?;
        let name = value
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| EngineError::Fatal("cache create response missing name".into()))?;
        let expires_at: DateTime<Utc> = value
            .get("expireTime")
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|| {
                Utc::now()
                    + ChronoDuration::from_std(ttl).unwrap_or_else(|_| ChronoDuration::seconds(3600))
            });

        debug!(cache = name, "created Gemini cached content");
        Ok(CacheHandle {
            name: name.to_string(),
            key: payload.key(),
            expires_at,
        })
    }

    async fn delete(&self, name: &str) -> EngineResult<()> {
        let url = format!("{}/v1beta/{}", self.base_url, name);
        self.http
            .delete(&url)
            .header("x-goog-api-key", &self.api_key)
            .send()
            .await
            .map_err(|e| EngineError::Transient(format!("cache delete request failed: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::ProviderKind;
    use rondo_core::{Message, ToolResult};

    fn adapter() -> GeminiAdapter {
        GeminiAdapter::new(ProviderConfig::new(
            ProviderKind::Gemini,
            "gemini-2.5-flash",
            "g-key",
        ))
    }

    fn descriptor(schema: Value) -> ToolDescriptor {
        ToolDescriptor {
            name: "read_file".into(),
            description: "Reads a file".into(),
            parameters_schema: schema,
        }
    }

    #[test]
    fn builds_generate_content_request() {
        let mut conversation = Conversation::new();
        conversation.push(Message::system("be brief"));
        conversation.push(Message::user("read a.txt"));

        let schema = json!({
            "type": "object",
            "properties": { "path": { "type": "string" } },
            "required": ["path"],
        });
        let request = adapter()
            .translate_request(&conversation, &[descriptor(schema)], None)
            .unwrap();

        assert_eq!(
            request.url,
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-flash:generateContent"
        );
        assert!(request
            .headers
            .contains(&("x-goog-api-key".into(), "g-key".into())));
        assert_eq!(
            request.body["systemInstruction"],
            json!({ "parts": [{ "text": "be brief" }] })
        );
        assert_eq!(
            request.body["tools"][0]["functionDeclarations"][0]["parameters"],
            json!({
                "type": "OBJECT",
                "properties": { "path": { "type": "STRING" } },
                "required": ["path"],
            })
        );
        assert_eq!(
            request.body["contents"],
            json!([{ "role": "user", "parts": [{ "text": "read a.txt" }] }])
        );
    }

    #[test]
    fn cached_content_replaces_tools_and_system() {
        let mut conversation = Conversation::new();
        conversation.push(Message::system("be brief"));
        conversation.push(Message::user("hello"));

        let handle = CacheHandle {
            name: "cachedContents/abc".into(),
            key: "k".into(),
            expires_at: Utc::now() + ChronoDuration::hours(1),
        };
        let schema = json!({ "type": "object", "properties": {} });
        let request = adapter()
            .translate_request(&conversation, &[descriptor(schema)], Some(&handle))
            .unwrap();

        assert_eq!(request.body["cachedContent"], "cachedContents/abc");
        assert!(request.body.get("tools").is_none());
        assert!(request.body.get("systemInstruction").is_none());
    }

    #[test]
    fn tool_results_keyed_by_recovered_name() {
        let mut conversation = Conversation::new();
        conversation.push(Message::user("read a.txt"));
        conversation.push(Message::assistant_with_calls(
            None,
            vec![ToolCall {
                id: "gemini_fc_1".into(),
                name: "read_file".into(),
                arguments: json!({"path": "a.txt"}),
            }],
        ));
        conversation.push(Message::tool_result(ToolResult::success(
            "gemini_fc_1",
            "{\"size\": 10}",
        )));
        conversation.push(Message::tool_result(ToolResult::success(
            "unknown_id",
            "plain text",
        )));

        let request = adapter().translate_request(&conversation, &[], None).unwrap();
        let contents = request.body["contents"].as_array().unwrap();

        assert_eq!(contents[1]["role"], "model");
        assert_eq!(
            contents[1]["parts"][0]["functionCall"],
            json!({ "name": "read_file", "args": { "path": "a.txt" } })
        );
        // Both results merge into one tool-role content entry.
        assert_eq!(contents[2]["role"], "tool");
        assert_eq!(
            contents[2]["parts"][0]["functionResponse"],
            json!({ "name": "read_file", "response": { "size": 10 } })
        );
        assert_eq!(
            contents[2]["parts"][1]["functionResponse"],
            json!({ "name": "tool", "response": { "content": "plain text" } })
        );
    }

    #[test]
    fn parses_function_calls_with_synthetic_ids() {
        let body = json!({
            "candidates": [{
                "content": {
                    "role": "model",
                    "parts": [
                        { "text": "Checking " },
                        { "functionCall": { "name": "read_file", "args": { "path": "a.txt" } } },
                        { "functionCall": { "name": "list_dir", "args": {} } },
                        { "text": "both." },
                    ],
                },
            }]
        });
        let reply = adapter().translate_response(&body).unwrap();
        assert_eq!(reply.text.as_deref(), Some("Checking both."));
        assert_eq!(reply.tool_calls.len(), 2);
        assert_eq!(reply.tool_calls[0].id, "gemini_fc_1");
        assert_eq!(reply.tool_calls[1].id, "gemini_fc_2");
        assert_eq!(reply.tool_calls[0].arguments, json!({"path": "a.txt"}));
    }

    #[test]
    fn empty_candidates_is_a_legal_empty_reply() {
        let reply = adapter()
            .translate_response(&json!({ "candidates": [] }))
            .unwrap();
        assert_eq!(reply.text, None);
        assert!(reply.tool_calls.is_empty());
    }

    #[test]
    fn sanitizer_uppercases_types_recursively() {
        let schema = json!({
            "type": "object",
            "properties": {
                "names": { "type": "array", "items": { "type": "string" } },
                "count": { "type": "integer", "description": "how many" },
            },
        });
        assert_eq!(
            sanitize_parameters(&schema),
            json!({
                "type": "OBJECT",
                "properties": {
                    "names": { "type": "ARRAY", "items": { "type": "STRING" } },
                    "count": { "type": "INTEGER", "description": "how many" },
                },
            })
        );
    }

    #[test]
    fn sanitizer_collapses_null_type_lists() {
        let schema = json!({
            "type": "object",
            "properties": {
                "limit": { "type": ["integer", "null"], "description": "cap" },
            },
        });
        assert_eq!(
            sanitize_parameters(&schema)["properties"]["limit"],
            json!({ "type": "INTEGER", "nullable": true, "description": "cap" })
        );
    }

    #[test]
    fn sanitizer_collapses_anyof_null_unions() {
        let schema = json!({
            "type": "object",
            "properties": {
                "mode": {
                    "description": "outer",
                    "anyOf": [
                        { "type": "string", "enum": ["fast", "slow"] },
                        { "type": "null" },
                    ],
                },
            },
        });
        assert_eq!(
            sanitize_parameters(&schema)["properties"]["mode"],
            json!({
                "type": "STRING",
                "nullable": true,
                "description": "outer",
                "enum": ["fast", "slow"],
            })
        );
    }

    #[test]
    fn sanitizer_strips_dollar_keys_and_additional_properties() {
        let schema = json!({
            "$schema": "https://json-schema.org/draft/2020-12/schema",
            "type": "object",
            "additionalProperties": false,
            "properties": {
                "path": { "type": "string", "$comment": "x" },
            },
        });
        assert_eq!(
            sanitize_parameters(&schema),
            json!({
                "type": "OBJECT",
                "properties": { "path": { "type": "STRING" } },
            })
        );
    }

    #[test]
    fn sanitizer_rejects_non_object_top_level() {
        assert_eq!(
            sanitize_parameters(&json!({ "type": "string" })),
            json!({ "type": "OBJECT", "properties": {} })
        );
        assert_eq!(
            sanitize_parameters(&json!(null)),
            json!({ "type": "OBJECT", "properties": {} })
        );
        assert_eq!(
            sanitize_parameters(&json!({})),
            json!({ "type": "OBJECT", "properties": {} })
        );
    }

    #[test]
    fn sanitizer_infers_missing_type_from_shape() {
        let schema = json!({
            "properties": {
                "tags": { "items": { "type": "string" } },
            },
        });
        let out = sanitize_parameters(&schema);
        assert_eq!(out["type"], "OBJECT");
        assert_eq!(out["properties"]["tags"]["type"], "ARRAY");
    }
}
