use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, VeyraError};

/// Stable identifier for one ongoing multi-turn conversation.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct ThreadId(pub String);

impl ThreadId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Default for ThreadId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ThreadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Role tag on a turn message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A single message in the conversation history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: text.into(),
            timestamp: Some(Utc::now()),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: text.into(),
            timestamp: Some(Utc::now()),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: text.into(),
            timestamp: Some(Utc::now()),
        }
    }

    pub fn tool(text: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: text.into(),
            timestamp: Some(Utc::now()),
        }
    }
}

/// The full per-thread conversation state the dispatcher routes over.
///
/// Persisted as a checkpoint snapshot after every node execution.
/// `current_agent` is set only by the dispatcher, never by a node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationState {
    pub thread_id: ThreadId,
    pub user_id: String,
    pub correlation_id: String,
    /// Ordered turn messages, append-only within a turn.
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub current_intent: Option<String>,
    #[serde(default)]
    pub current_agent: Option<String>,
    #[serde(default)]
    pub need_reroute: bool,
    /// The user text that was last routed to `current_agent`.
    /// Classification is skipped only when the incoming text matches.
    #[serde(default)]
    pub last_routed_message: Option<String>,
    /// Free-form auxiliary context (prior-history summary, profile text).
    #[serde(default)]
    pub aux_context: HashMap<String, String>,
    /// Named variables for edge conditions, refreshed by the dispatcher
    /// before each routing decision.
    #[serde(default)]
    pub variables: HashMap<String, serde_json::Value>,
}

impl ConversationState {
    /// Empty state for a thread's first turn.
    pub fn new(thread_id: ThreadId, user_id: impl Into<String>) -> Self {
        Self {
            thread_id,
            user_id: user_id.into(),
            correlation_id: String::new(),
            messages: Vec::new(),
            current_intent: None,
            current_agent: None,
            need_reroute: false,
            last_routed_message: None,
            aux_context: HashMap::new(),
            variables: HashMap::new(),
        }
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    pub fn last_role(&self) -> Option<Role> {
        self.messages.last().map(|m| m.role)
    }

    /// The text of the most recent user message, if any.
    pub fn latest_user_text(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
    }
}

/// Reserved intent value for unclassifiable input.
pub const INTENT_UNCLEAR: &str = "unclear";

/// Outcome of intent classification.
///
/// Construction validates the confidence range; fields are read-only
/// after that.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct IntentResult {
    intent_type: String,
    confidence: f64,
    entities: HashMap<String, String>,
    needs_clarification: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    reasoning: Option<String>,
}

impl IntentResult {
    /// Build a result, rejecting confidence outside [0, 1].
    pub fn new(
        intent_type: impl Into<String>,
        confidence: f64,
        entities: HashMap<String, String>,
        needs_clarification: bool,
        reasoning: Option<String>,
    ) -> Result<Self> {
        if !(0.0..=1.0).contains(&confidence) || confidence.is_nan() {
            return Err(VeyraError::InvalidConfidence(confidence));
        }
        Ok(Self {
            intent_type: intent_type.into(),
            confidence,
            entities,
            needs_clarification,
            reasoning,
        })
    }

    /// The degraded result used when classification fails or times out.
    pub fn unclear() -> Self {
        Self {
            intent_type: INTENT_UNCLEAR.to_string(),
            confidence: 0.0,
            entities: HashMap::new(),
            needs_clarification: true,
            reasoning: None,
        }
    }

    pub fn intent_type(&self) -> &str {
        &self.intent_type
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn entities(&self) -> &HashMap<String, String> {
        &self.entities
    }

    pub fn needs_clarification(&self) -> bool {
        self.needs_clarification
    }

    pub fn reasoning(&self) -> Option<&str> {
        self.reasoning.as_deref()
    }

    pub fn is_unclear(&self) -> bool {
        self.intent_type == INTENT_UNCLEAR
    }
}

/// Per-request identity bundle injected into tool calls.
///
/// Valid only for the lifetime of one turn's execution; never persisted
/// as part of ConversationState.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCallContext {
    pub correlation_id: String,
    pub user_id: String,
    pub session_id: String,
}

/// Tool definition for sending to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// Result of a tool execution.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    pub content: String,
    pub is_error: bool,
}

impl ToolResult {
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
        }
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// Token usage reported by the model.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// A complete (non-streaming) model response.
#[derive(Debug, Clone, Default)]
pub struct ModelResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCallRequest>,
    pub usage: Usage,
}
