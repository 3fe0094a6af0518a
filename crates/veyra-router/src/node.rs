use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use veyra_core::config::ModelConfig;
use veyra_core::traits::ModelClient;
use veyra_core::types::*;
use veyra_tools::IdentityWrapper;

const FALLBACK_REPLY: &str =
    "I'm sorry, I ran into a problem handling that. Could you try again in a moment?";

/// A long-lived specialist agent node.
///
/// Built once at startup by the registry: a model configuration, a
/// fixed tool subset, and a prompt template whose per-turn placeholders
/// are resolved at execution time. Immutable and safe for concurrent
/// reads across turns.
#[derive(Clone)]
pub struct AgentNode {
    pub key: String,
    pub node_name: String,
    pub intent_type: String,
    prompt_template: String,
    tool_defs: Vec<ToolDefinition>,
    model_config: ModelConfig,
    max_turns: usize,
}

/// Result of executing one node within a turn.
#[derive(Debug, Clone)]
pub struct NodeOutcome {
    pub reply: String,
    pub succeeded: bool,
    pub tool_calls_made: usize,
    pub elapsed_ms: u64,
}

impl AgentNode {
    pub fn new(
        key: impl Into<String>,
        node_name: impl Into<String>,
        intent_type: impl Into<String>,
        prompt_template: impl Into<String>,
        tool_defs: Vec<ToolDefinition>,
        model_config: ModelConfig,
        max_turns: usize,
    ) -> Self {
        Self {
            key: key.into(),
            node_name: node_name.into(),
            intent_type: intent_type.into(),
            prompt_template: prompt_template.into(),
            tool_defs,
            model_config,
            max_turns,
        }
    }

    /// Resolve per-turn placeholders in the prompt template.
    ///
    /// Supported: `{user_id}`, `{user_profile}`, `{history_summary}`.
    /// Unresolved placeholders are replaced with an empty string.
    fn render_prompt(&self, state: &ConversationState) -> String {
        let profile = state
            .aux_context
            .get("user_profile")
            .map(String::as_str)
            .unwrap_or("");
        let summary = state
            .aux_context
            .get("history_summary")
            .map(String::as_str)
            .unwrap_or("");
        self.prompt_template
            .replace("{user_id}", &state.user_id)
            .replace("{user_profile}", profile)
            .replace("{history_summary}", summary)
    }

    /// Execute this node for the current turn.
    ///
    /// Runs a bounded model→tool loop. Appends assistant and tool
    /// messages to the state; never touches `current_agent`, since
    /// routing fields belong to the dispatcher. Model and tool failures degrade
    /// into a reply; this method itself never fails.
    pub async fn execute(
        &self,
        state: &mut ConversationState,
        model: &Arc<dyn ModelClient>,
        wrapper: &IdentityWrapper,
    ) -> NodeOutcome {
        let start = Instant::now();

        // Explicit channel: identity is read from the state at node
        // entry and threaded into every call from here.
        let ctx = ToolCallContext {
            correlation_id: state.correlation_id.clone(),
            user_id: state.user_id.clone(),
            session_id: state.thread_id.to_string(),
        };

        info!(
            node = %self.node_name,
            correlation_id = %ctx.correlation_id,
            "Executing agent node"
        );

        let mut messages = vec![ChatMessage::system(self.render_prompt(state))];
        messages.extend(state.messages.iter().cloned());

        let mut tool_calls_made = 0usize;
        let timeout = Duration::from_secs(self.model_config.timeout_secs);

        for round in 0..self.max_turns {
            debug!(node = %self.node_name, round, "Model round");

            let response = match tokio::time::timeout(
                timeout,
                model.invoke(&self.model_config, messages.clone(), &self.tool_defs),
            )
            .await
            {
                Ok(Ok(response)) => response,
                Ok(Err(e)) => {
                    error!(
                        node = %self.node_name,
                        correlation_id = %ctx.correlation_id,
                        error = %e,
                        "Model call failed"
                    );
                    state.push(ChatMessage::assistant(FALLBACK_REPLY));
                    return self.outcome(FALLBACK_REPLY, false, tool_calls_made, start);
                }
                Err(_) => {
                    error!(
                        node = %self.node_name,
                        correlation_id = %ctx.correlation_id,
                        timeout_secs = self.model_config.timeout_secs,
                        "Model call timed out"
                    );
                    state.push(ChatMessage::assistant(FALLBACK_REPLY));
                    return self.outcome(FALLBACK_REPLY, false, tool_calls_made, start);
                }
            };

            if response.tool_calls.is_empty() {
                let reply = if response.content.trim().is_empty() {
                    FALLBACK_REPLY.to_string()
                } else {
                    response.content
                };
                state.push(ChatMessage::assistant(reply.clone()));
                return self.outcome(&reply, true, tool_calls_made, start);
            }

            if !response.content.trim().is_empty() {
                let msg = ChatMessage::assistant(response.content.clone());
                state.push(msg.clone());
                messages.push(msg);
            }

            for call in &response.tool_calls {
                tool_calls_made += 1;
                let outcome = wrapper
                    .invoke(&call.name, call.arguments.clone(), Some(&ctx))
                    .await;

                let label = if outcome.result.is_error {
                    format!("{} failed: {}", call.name, outcome.result.content)
                } else {
                    format!("{}: {}", call.name, outcome.result.content)
                };
                let msg = ChatMessage::tool(label);
                state.push(msg.clone());
                messages.push(msg);
            }
        }

        warn!(
            node = %self.node_name,
            max_turns = self.max_turns,
            "Node exhausted its model rounds without a final reply"
        );
        state.push(ChatMessage::assistant(FALLBACK_REPLY));
        self.outcome(FALLBACK_REPLY, false, tool_calls_made, start)
    }

    fn outcome(
        &self,
        reply: &str,
        succeeded: bool,
        tool_calls_made: usize,
        start: Instant,
    ) -> NodeOutcome {
        NodeOutcome {
            reply: reply.to_string(),
            succeeded,
            tool_calls_made,
            elapsed_ms: start.elapsed().as_millis() as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedModel, Turn};
    use std::sync::Arc;
    use veyra_tools::{IdentityWrapper, ToolCatalog};

    fn node(max_turns: usize) -> AgentNode {
        AgentNode::new(
            "bp_agent",
            "blood_pressure_node",
            "blood_pressure",
            "You help {user_id} track blood pressure. Profile: {user_profile}",
            vec![],
            crate::testing::model_config(),
            max_turns,
        )
    }

    fn empty_wrapper() -> IdentityWrapper {
        IdentityWrapper::new(Arc::new(ToolCatalog::new()))
    }

    fn state() -> ConversationState {
        let mut s = ConversationState::new(ThreadId::from_string("t1"), "u1");
        s.correlation_id = "corr-1".into();
        s.aux_context
            .insert("user_profile".into(), "runner".into());
        s.push(ChatMessage::user("hello"));
        s
    }

    #[test]
    fn test_render_prompt_substitutes_placeholders() {
        let n = node(4);
        let rendered = n.render_prompt(&state());
        assert!(rendered.contains("help u1"));
        assert!(rendered.contains("Profile: runner"));
    }

    #[tokio::test]
    async fn test_plain_reply() {
        let model: Arc<dyn ModelClient> =
            Arc::new(ScriptedModel::new(vec![Turn::reply("Hi, how can I help?")]));
        let mut s = state();
        let outcome = node(4).execute(&mut s, &model, &empty_wrapper()).await;
        assert!(outcome.succeeded);
        assert_eq!(outcome.reply, "Hi, how can I help?");
        assert_eq!(s.last_role(), Some(Role::Assistant));
    }

    #[tokio::test]
    async fn test_model_failure_degrades_to_fallback_reply() {
        let model: Arc<dyn ModelClient> = Arc::new(ScriptedModel::failing());
        let mut s = state();
        let outcome = node(4).execute(&mut s, &model, &empty_wrapper()).await;
        assert!(!outcome.succeeded);
        assert_eq!(s.last_role(), Some(Role::Assistant));
        assert!(!outcome.reply.is_empty());
    }

    #[tokio::test]
    async fn test_exhausted_rounds_degrades_to_fallback_reply() {
        // A model that keeps asking for tools forever
        let model: Arc<dyn ModelClient> = Arc::new(ScriptedModel::new(vec![
            Turn::tool_call("missing_tool", serde_json::json!({})),
            Turn::tool_call("missing_tool", serde_json::json!({})),
        ]));
        let mut s = state();
        let outcome = node(2).execute(&mut s, &model, &empty_wrapper()).await;
        assert!(!outcome.succeeded);
        assert_eq!(outcome.tool_calls_made, 2);
        assert_eq!(s.last_role(), Some(Role::Assistant));
    }
}
