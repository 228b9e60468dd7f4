//! Vendor wire-format adapters.
//!
//! Each adapter is a pure translator: canonical history in, vendor
//! request out, and vendor response body back into canonical text and
//! tool calls. No adapter performs I/O; the [`crate::transport`] layer
//! owns the network. This keeps every wire schema testable against
//! literal JSON fixtures.

mod claude;
mod gemini;
mod openai;
mod responses;

pub use claude::ClaudeAdapter;
pub use gemini::{GeminiAdapter, GeminiCacheBackend};
pub use openai::OpenAiAdapter;
pub use responses::ResponsesAdapter;

use crate::cache::CacheHandle;
use crate::config::{ProviderConfig, ProviderKind};
use crate::transport::VendorRequest;
use rondo_core::{Conversation, EngineError, EngineResult, Message, ToolCall, ToolDescriptor};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Canonical view of one model reply, before it becomes a [`Message`].
#[derive(Debug, Clone, PartialEq)]
pub struct AdapterResponse {
    /// Assistant text, if any.
    pub text: Option<String>,
    /// Requested tool calls, in vendor emission order.
    pub tool_calls: Vec<ToolCall>,
}

impl AdapterResponse {
    /// Converts the reply into an assistant history message.
    pub fn into_message(self) -> Message {
        Message::assistant_with_calls(self.text, self.tool_calls)
    }
}

/// Translates between canonical history and one vendor's wire schema.
pub trait ProviderAdapter: Send + Sync {
    /// Builds the vendor request for the current history and tool set.
    /// Must fail before any network activity when the history contains
    /// content the vendor cannot accept.
    fn translate_request(
        &self,
        conversation: &Conversation,
        tools: &[ToolDescriptor],
        cache: Option<&CacheHandle>,
    ) -> EngineResult<VendorRequest>;

    /// Parses a successful vendor response body.
    fn translate_response(&self, body: &Value) -> EngineResult<AdapterResponse>;

    /// Whether the vendor endpoint accepts image content.
    fn supports_vision(&self) -> bool;

    /// Whether the vendor endpoint accepts tool schemas.
    fn supports_tool_calls(&self) -> bool {
        true
    }

    /// Whether the vendor supports explicit server-side context caches.
    fn cache_capable(&self) -> bool {
        false
    }
}

/// Selects the adapter for a session. Called once at session start;
/// every later round goes through the returned trait object.
pub fn adapter_for(config: &ProviderConfig) -> Arc<dyn ProviderAdapter> {
    match config.provider {
        ProviderKind::Claude => Arc::new(ClaudeAdapter::new(config.clone())),
        ProviderKind::Gemini => Arc::new(GeminiAdapter::new(config.clone())),
        ProviderKind::OpenAi | ProviderKind::Azure if config.use_responses_api => {
            Arc::new(ResponsesAdapter::new(config.clone()))
        }
        _ => Arc::new(OpenAiAdapter::new(config.clone())),
    }
}

/// Pre-flight check shared by all adapters: image content against a
/// non-vision endpoint is a caller error, caught before any request
/// is built.
pub(crate) fn ensure_vision_supported(
    supports_vision: bool,
    conversation: &Conversation,
    provider: &str,
) -> EngineResult<()> {
    if supports_vision {
        return Ok(());
    }
    if conversation.messages().iter().any(Message::has_images) {
        return Err(EngineError::UnsupportedCapability(format!(
            "provider '{provider}' does not accept image content"
        )));
    }
    Ok(())
}

/// Maps tool-call ids to tool names by walking assistant history.
/// Vendors that key tool results by name rather than id need this to
/// reconstruct the name from a [`rondo_core::ToolResult`].
pub(crate) fn tool_name_index(conversation: &Conversation) -> HashMap<String, String> {
    let mut index = HashMap::new();
    for message in conversation.messages() {
        for call in message.tool_calls() {
            index.insert(call.id.clone(), call.name.clone());
        }
    }
    index
}

/// Parses a stringified tool-argument payload. Malformed JSON is
/// preserved under `_raw` so the tool (and the history) still see what
/// the model actually produced.
pub(crate) fn parse_tool_arguments(raw: &str) -> Value {
    match serde_json::from_str::<Value>(raw) {
        Ok(value @ Value::Object(_)) => value,
        Ok(other) => serde_json::json!({ "_raw": other }),
        Err(_) => serde_json::json!({ "_raw": raw }),
    }
}
