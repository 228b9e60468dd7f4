use crate::tool::{ToolCall, ToolResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The role of the participant that authored a [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// A system-level instruction or prompt.
    System,
    /// A human end-user.
    User,
    /// The model.
    Assistant,
    /// Output produced by a tool invocation.
    Tool,
}

/// One typed part of a message body.
///
/// A message carries an ordered sequence of parts; provider adapters
/// translate each part into the nearest vendor construct (content
/// blocks, `tool_calls` arrays, function-response parts, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// Plain text.
    Text {
        /// The text content.
        text: String,
    },
    /// Reference to an image, by URL or data URI.
    Image {
        /// Image location.
        url: String,
    },
    /// A model-issued request to run a tool.
    ToolUse(ToolCall),
    /// The output of a completed tool call.
    ToolResult(ToolResult),
}

/// A single immutable message within a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique identifier for this message.
    pub id: Uuid,
    /// The role of the message author.
    pub role: Role,
    /// Ordered typed content parts.
    pub content: Vec<ContentPart>,
    /// UTC timestamp of when the message was created.
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Creates a message from a role and parts.
    pub fn new(role: Role, content: Vec<ContentPart>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content,
            timestamp: Utc::now(),
        }
    }

    /// Creates a text-only message with [`Role::System`].
    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, vec![ContentPart::Text { text: text.into() }])
    }

    /// Creates a text-only message with [`Role::User`].
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, vec![ContentPart::Text { text: text.into() }])
    }

    /// Creates a text-only message with [`Role::Assistant`].
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(
            Role::Assistant,
            vec![ContentPart::Text { text: text.into() }],
        )
    }

    /// Creates an assistant message carrying optional text plus tool calls.
    pub fn assistant_with_calls(text: Option<String>, calls: Vec<ToolCall>) -> Self {
        let mut content = Vec::with_capacity(calls.len() + 1);
        if let Some(text) = text {
            if !text.is_empty() {
                content.push(ContentPart::Text { text });
            }
        }
        content.extend(calls.into_iter().map(ContentPart::ToolUse));
        Self::new(Role::Assistant, content)
    }

    /// Creates a [`Role::Tool`] message wrapping a single tool result.
    pub fn tool_result(result: ToolResult) -> Self {
        Self::new(Role::Tool, vec![ContentPart::ToolResult(result)])
    }

    /// Concatenated text parts, joined with newlines.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|p| match p {
                ContentPart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Tool calls carried by this message, in order.
    pub fn tool_calls(&self) -> Vec<&ToolCall> {
        self.content
            .iter()
            .filter_map(|p| match p {
                ContentPart::ToolUse(call) => Some(call),
                _ => None,
            })
            .collect()
    }

    /// The tool result carried by this message, if it is one.
    pub fn as_tool_result(&self) -> Option<&ToolResult> {
        self.content.iter().find_map(|p| match p {
            ContentPart::ToolResult(result) => Some(result),
            _ => None,
        })
    }

    /// Whether any part is an image reference.
    pub fn has_images(&self) -> bool {
        self.content
            .iter()
            .any(|p| matches!(p, ContentPart::Image { .. }))
    }
}

/// Supplies ready-made system messages at session start.
///
/// Implemented by the external long-term-memory collaborator. The
/// orchestrator consults it exactly once, when the conversation is
/// created, and never again mid-session.
pub trait MemoryInjector: Send + Sync {
    /// System messages to prepend to a fresh conversation.
    fn initial_messages(&self) -> Vec<Message>;
}

/// Append-only conversation history for one session.
///
/// Messages can be pushed and read but never mutated or removed; the
/// provider selected at session start replays the whole sequence every
/// round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    session_id: Uuid,
    messages: Vec<Message>,
}

impl Conversation {
    /// Creates an empty conversation with a fresh session id.
    pub fn new() -> Self {
        Self {
            session_id: Uuid::new_v4(),
            messages: Vec::new(),
        }
    }

    /// Creates a conversation seeded with the memory injector's system
    /// messages.
    pub fn with_memory(injector: &dyn MemoryInjector) -> Self {
        let mut conversation = Self::new();
        for msg in injector.initial_messages() {
            conversation.push(msg);
        }
        conversation
    }

    /// The session this conversation belongs to.
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Appends a message to the history.
    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// The full history, oldest first.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Number of messages in the history.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the history is empty.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// All system-message text, joined with newlines. Adapters use this
    /// for vendors that take the system prompt out-of-band.
    pub fn system_text(&self) -> String {
        self.messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(Message::text)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}
