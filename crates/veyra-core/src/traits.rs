use futures::future::BoxFuture;

use crate::config::ModelConfig;
use crate::error::Result;
use crate::types::*;

/// Model-call collaborator: one request, one complete response.
pub trait ModelClient: Send + Sync + 'static {
    fn invoke(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
        tools: &[ToolDefinition],
    ) -> BoxFuture<'_, Result<ModelResponse>>;
}

/// A side-effecting business operation callable by an agent.
///
/// Identity fields arrive inside the argument map, merged there by the
/// invocation wrapper before `execute` runs.
pub trait Tool: Send + Sync + 'static {
    /// Tool name (used in model tool calls).
    fn name(&self) -> &str;

    /// Human-readable description.
    fn description(&self) -> &str;

    /// JSON Schema for tool input.
    fn input_schema(&self) -> serde_json::Value;

    /// Execute the tool with the merged argument map.
    fn execute(&self, input: serde_json::Value) -> BoxFuture<'_, Result<ToolResult>>;

    /// Timeout in seconds for this tool.
    fn timeout_secs(&self) -> u64 {
        30
    }
}

/// Intent-classification collaborator. Opaque; may fail or time out.
pub trait IntentClassifier: Send + Sync + 'static {
    fn classify(&self, messages: &[ChatMessage]) -> BoxFuture<'_, Result<IntentResult>>;
}

/// Conversation state store with head + parent-chain semantics.
///
/// `save` appends a new checkpoint whose parent is the previous head and
/// returns the new checkpoint id. `load` returns the head of the
/// thread's history chain, or `None` for an unknown thread.
pub trait StateStore: Send + Sync + 'static {
    fn save(
        &self,
        thread_id: &ThreadId,
        state: &ConversationState,
    ) -> BoxFuture<'_, Result<String>>;

    fn load(&self, thread_id: &ThreadId) -> BoxFuture<'_, Result<Option<ConversationState>>>;
}
