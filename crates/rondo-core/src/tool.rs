use crate::error::ToolError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// A request from the model to invoke a specific tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Identifier assigned by the vendor, unique within one assistant turn.
    pub id: String,
    /// Name of the tool to invoke.
    pub name: String,
    /// JSON arguments to pass to the tool.
    pub arguments: serde_json::Value,
}

/// The result returned after executing a [`ToolCall`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// The ID of the [`ToolCall`] this result answers.
    pub call_id: String,
    /// The output produced by the tool.
    pub content: String,
    /// Whether the tool execution ended in an error.
    pub is_error: bool,
}

impl ToolResult {
    /// Creates a successful tool result.
    pub fn success(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            content: content.into(),
            is_error: false,
        }
    }

    /// Creates an error tool result.
    pub fn error(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            content: content.into(),
            is_error: true,
        }
    }
}

/// Metadata describing a tool's interface, advertised to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Tool name, unique within a registry.
    pub name: String,
    /// What the tool does, for the model.
    pub description: String,
    /// JSON Schema of the accepted arguments object.
    pub parameters_schema: serde_json::Value,
}

/// The invocation contract all tools implement.
///
/// The orchestrator knows nothing about tool internals; it resolves a
/// [`ToolCall`] name through the registry and calls `invoke`.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The tool's advertised interface.
    fn descriptor(&self) -> &ToolDescriptor;

    /// Runs the tool. Output is text or serialized JSON.
    async fn invoke(&self, arguments: serde_json::Value) -> Result<String, ToolError>;
}

/// Resolves tool names to implementations and dispatches calls.
///
/// Dispatch never fails the caller: unknown tools, invocation errors,
/// and timeouts all surface as `is_error` results fed back to the
/// model, which may recover by trying a different approach.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Registers a tool under its descriptor name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.descriptor().name.clone();
        info!(tool = %name, "registered tool");
        self.tools.insert(name, tool);
    }

    /// Looks up a tool by name.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    /// Descriptors of all registered tools, sorted by name so schema
    /// payloads (and cache keys derived from them) are deterministic.
    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        let mut out: Vec<ToolDescriptor> =
            self.tools.values().map(|t| t.descriptor().clone()).collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Executes a tool call with a timeout, capturing any failure as an
    /// error result.
    pub async fn dispatch(&self, call: &ToolCall, timeout: Duration) -> ToolResult {
        let Some(tool) = self.tools.get(&call.name) else {
            warn!(tool = %call.name, call_id = %call.id, "unknown tool requested");
            return ToolResult::error(&call.id, format!("unknown tool: {}", call.name));
        };

        if !call.arguments.is_object() {
            return ToolResult::error(
                &call.id,
                format!(
                    "invalid arguments for '{}': expected a JSON object, got {}",
                    call.name, call.arguments
                ),
            );
        }

        info!(tool = %call.name, call_id = %call.id, "executing tool call");

        match tokio::time::timeout(timeout, tool.invoke(call.arguments.clone())).await {
            Ok(Ok(content)) => ToolResult::success(&call.id, content),
            Ok(Err(e)) => {
                warn!(tool = %call.name, call_id = %call.id, error = %e, "tool call failed");
                ToolResult::error(&call.id, e.to_string())
            }
            Err(_) => {
                warn!(tool = %call.name, call_id = %call.id, timeout_ms = timeout.as_millis() as u64, "tool call timed out");
                ToolResult::error(
                    &call.id,
                    format!(
                        "tool '{}' timed out after {}ms",
                        call.name,
                        timeout.as_millis()
                    ),
                )
            }
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
