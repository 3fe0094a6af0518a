//! The route dispatcher state machine.
//!
//! One turn = one logical task. The dispatcher walks states
//! (`entry`/`classify`, `clarify`, one per agent node, `terminal`),
//! persisting a checkpoint after every completed node execution.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use veyra_core::config::{Edge, RouterConfig};
use veyra_core::error::{Result, VeyraError};
use veyra_core::scope::{with_scope, TurnScope};
use veyra_core::traits::{IntentClassifier, ModelClient, StateStore};
use veyra_core::types::{
    ChatMessage, ConversationState, IntentResult, Role, ThreadId,
};
use veyra_tools::IdentityWrapper;

use crate::condition;
use crate::node::NodeOutcome;
use crate::registry::AgentRegistry;

pub const STATE_ENTRY: &str = "entry";
pub const STATE_CLASSIFY: &str = "classify";
pub const STATE_CLARIFY: &str = "clarify";
pub const STATE_TERMINAL: &str = "terminal";

/// Reply produced when the hop guard trips.
const HOP_GUARD_REPLY: &str =
    "Sorry, I wasn't able to finish handling that. Could you rephrase your request?";

/// One inbound turn from the surrounding transport.
#[derive(Debug, Clone, Deserialize)]
pub struct TurnRequest {
    pub message: String,
    pub thread_id: String,
    pub user_id: String,
    #[serde(default)]
    pub correlation_id: Option<String>,
    /// Optional seed history, applied only when the thread is new.
    #[serde(default)]
    pub prior_turns: Vec<ChatMessage>,
    /// Free-form context merged into the state's auxiliary context.
    #[serde(default)]
    pub context: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TurnResponse {
    pub reply: String,
    pub thread_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_intent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_agent: Option<String>,
}

pub struct RouteDispatcher {
    registry: Arc<AgentRegistry>,
    classifier: Arc<dyn IntentClassifier>,
    model: Arc<dyn ModelClient>,
    wrapper: IdentityWrapper,
    store: Arc<dyn StateStore>,
    config: RouterConfig,
    edges: Vec<Edge>,
}

impl std::fmt::Debug for RouteDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteDispatcher").finish_non_exhaustive()
    }
}

impl RouteDispatcher {
    /// Build the dispatcher, validating edges against known states.
    /// Edge errors are fatal here and never reachable at request time.
    pub fn new(
        registry: Arc<AgentRegistry>,
        classifier: Arc<dyn IntentClassifier>,
        model: Arc<dyn ModelClient>,
        wrapper: IdentityWrapper,
        store: Arc<dyn StateStore>,
        config: RouterConfig,
        edges: Vec<Edge>,
    ) -> Result<Self> {
        for edge in &edges {
            if !registry.is_known_state(&edge.source_node) {
                return Err(VeyraError::Config(format!(
                    "Edge references unknown source node '{}'",
                    edge.source_node
                )));
            }
            if !registry.is_known_state(&edge.target_node) {
                return Err(VeyraError::Config(format!(
                    "Edge references unknown target node '{}'",
                    edge.target_node
                )));
            }
        }
        Ok(Self {
            registry,
            classifier,
            model,
            wrapper,
            store,
            config,
            edges,
        })
    }

    /// Handle one turn end to end: load or create the thread state,
    /// append the user message, drive the state machine inside a fresh
    /// turn scope, and return the latest assistant reply.
    pub async fn run_turn(&self, request: TurnRequest) -> Result<TurnResponse> {
        let thread_id = ThreadId::from_string(&request.thread_id);

        let mut state = match self.store.load(&thread_id).await? {
            Some(state) => state,
            None => {
                let mut state = ConversationState::new(thread_id.clone(), &request.user_id);
                state.messages = request.prior_turns.clone();
                state
            }
        };

        state.correlation_id = request
            .correlation_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        state.user_id = request.user_id.clone();
        state.aux_context.extend(request.context.clone());
        state.push(ChatMessage::user(&request.message));

        // Implicit channel, set once for the whole turn. Collaborators
        // with direct state access never rely on it.
        let scope = TurnScope::new(
            state.correlation_id.clone(),
            state.user_id.clone(),
            thread_id.to_string(),
        );

        info!(
            thread_id = %thread_id,
            correlation_id = %state.correlation_id,
            "Turn started"
        );

        let reply = with_scope(scope, self.drive(&mut state)).await?;

        Ok(TurnResponse {
            reply,
            thread_id: request.thread_id,
            resolved_intent: state.current_intent.clone(),
            resolved_agent: state.current_agent.clone(),
        })
    }

    /// Walk the state machine for one turn, persisting after every
    /// completed node. Returns the user-visible reply.
    pub async fn drive(&self, state: &mut ConversationState) -> Result<String> {
        let mut current = STATE_CLASSIFY.to_string();
        let mut hops = 0usize;
        let mut last_outcome: Option<NodeOutcome> = None;

        loop {
            if current == STATE_TERMINAL {
                break;
            }
            hops += 1;
            if hops > self.config.max_hops_per_turn {
                warn!(
                    thread_id = %state.thread_id,
                    max_hops = self.config.max_hops_per_turn,
                    "Hop guard tripped, degrading turn"
                );
                state.push(ChatMessage::assistant(HOP_GUARD_REPLY));
                self.checkpoint(state).await?;
                break;
            }

            match current.as_str() {
                STATE_ENTRY | STATE_CLASSIFY => {
                    // A trailing assistant reply with no newer user
                    // input means this turn is already answered.
                    if state.last_role() == Some(Role::Assistant) {
                        current = STATE_TERMINAL.to_string();
                        continue;
                    }
                    current = self.route(state).await;
                }
                STATE_CLARIFY => {
                    state.push(ChatMessage::assistant(&self.config.clarify_prompt));
                    state.need_reroute = true;
                    self.checkpoint(state).await?;
                    self.refresh_variables(state, hops, last_outcome.as_ref());
                    current = self.next_state(STATE_CLARIFY, state);
                }
                node_name => {
                    let node = self
                        .registry
                        .node(node_name)
                        .ok_or_else(|| VeyraError::UnknownNode(node_name.to_string()))?;
                    let outcome = node.execute(state, &self.model, &self.wrapper).await;
                    self.checkpoint(state).await?;
                    debug!(
                        node = node_name,
                        succeeded = outcome.succeeded,
                        tool_calls = outcome.tool_calls_made,
                        elapsed_ms = outcome.elapsed_ms,
                        "Node completed"
                    );
                    self.refresh_variables(state, hops, Some(&outcome));
                    last_outcome = Some(outcome);
                    current = self.next_state(node_name, state);
                }
            }
        }

        let reply = state
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant)
            .map(|m| m.content.clone())
            .unwrap_or_default();
        Ok(reply)
    }

    /// One routing decision: continuation short-circuit, then
    /// classification, then the intent→agent index.
    async fn route(&self, state: &mut ConversationState) -> String {
        let incoming = state.latest_user_text().unwrap_or_default().to_string();

        // Same agent already handling this exact input: skip the
        // classifier entirely.
        if !state.need_reroute {
            if let Some(agent_key) = &state.current_agent {
                if state.last_routed_message.as_deref() == Some(incoming.as_str()) {
                    if let Some(node) = self.registry.node_by_key(agent_key) {
                        debug!(agent = %agent_key, "Continuation, skipping classification");
                        return node.node_name.clone();
                    }
                }
            }
        }

        let result = self.classify(state).await;
        state.current_intent = Some(result.intent_type().to_string());

        if result.is_unclear()
            || result.needs_clarification()
            || result.confidence() < self.config.confidence_threshold
        {
            debug!(
                intent = result.intent_type(),
                confidence = result.confidence(),
                "Routing to clarify"
            );
            return STATE_CLARIFY.to_string();
        }

        match self.registry.node_for_intent(result.intent_type()) {
            Some(node) => {
                state.current_agent = Some(node.key.clone());
                state.need_reroute = false;
                state.last_routed_message = Some(incoming);
                info!(
                    intent = result.intent_type(),
                    agent = %node.key,
                    "Routed to agent"
                );
                node.node_name.clone()
            }
            None => {
                warn!(
                    intent = result.intent_type(),
                    "No agent registered for intent, routing to clarify"
                );
                STATE_CLARIFY.to_string()
            }
        }
    }

    /// Classification never aborts the turn: errors and timeouts
    /// degrade to the unclear intent.
    async fn classify(&self, state: &ConversationState) -> IntentResult {
        let timeout = Duration::from_secs(self.config.classify_timeout_secs);
        match tokio::time::timeout(timeout, self.classifier.classify(&state.messages)).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                warn!(error = %e, "Classification failed, treating as unclear");
                IntentResult::unclear()
            }
            Err(_) => {
                warn!(
                    timeout_secs = self.config.classify_timeout_secs,
                    "Classification timed out, treating as unclear"
                );
                IntentResult::unclear()
            }
        }
    }

    /// Fail-closed: a save error aborts the turn with nothing faked.
    async fn checkpoint(&self, state: &ConversationState) -> Result<()> {
        let checkpoint_id = self.store.save(&state.thread_id, state).await?;
        debug!(
            thread_id = %state.thread_id,
            checkpoint_id = %checkpoint_id,
            "Checkpoint saved"
        );
        Ok(())
    }

    /// Refresh the condition-evaluator variables before a routing
    /// decision over the outgoing edges.
    fn refresh_variables(
        &self,
        state: &mut ConversationState,
        hops: usize,
        outcome: Option<&NodeOutcome>,
    ) {
        let vars = &mut state.variables;
        vars.insert(
            "need_reroute".into(),
            serde_json::Value::Bool(state.need_reroute),
        );
        vars.insert(
            "current_intent".into(),
            match &state.current_intent {
                Some(i) => serde_json::Value::String(i.clone()),
                None => serde_json::Value::Null,
            },
        );
        vars.insert(
            "current_agent".into(),
            match &state.current_agent {
                Some(a) => serde_json::Value::String(a.clone()),
                None => serde_json::Value::Null,
            },
        );
        vars.insert("hops".into(), serde_json::Value::from(hops));
        vars.insert(
            "message_count".into(),
            serde_json::Value::from(state.messages.len()),
        );
        if let Some(outcome) = outcome {
            vars.insert(
                "last_node_succeeded".into(),
                serde_json::Value::Bool(outcome.succeeded),
            );
            vars.insert(
                "tool_calls_made".into(),
                serde_json::Value::from(outcome.tool_calls_made),
            );
        }
    }

    /// First declared edge whose condition holds wins. No matching
    /// edge means the turn is terminal for that node.
    fn next_state(&self, source: &str, state: &ConversationState) -> String {
        for edge in self.edges.iter().filter(|e| e.source_node == source) {
            if condition::evaluate(&edge.condition, &state.variables) {
                debug!(
                    source = source,
                    target = %edge.target_node,
                    condition = %edge.condition,
                    "Edge taken"
                );
                return match edge.target_node.as_str() {
                    STATE_ENTRY => STATE_CLASSIFY.to_string(),
                    other => other.to_string(),
                };
            }
        }
        STATE_TERMINAL.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::LlmClassifier;
    use crate::registry::AgentRegistry;
    use crate::testing::{model_config, ScriptedClassifier, ScriptedModel, Turn};
    use std::collections::HashMap;
    use veyra_core::config::AgentDefinition;
    use veyra_store::SqliteStateStore;
    use veyra_tools::ToolCatalog;

    fn definition(key: &str, node: &str, intent: &str) -> AgentDefinition {
        AgentDefinition {
            key: key.into(),
            node_name: node.into(),
            routing_intent_type: intent.into(),
            prompt: "You are a specialist.".into(),
            tool_names: vec![],
            model: None,
        }
    }

    fn router_config() -> RouterConfig {
        RouterConfig {
            confidence_threshold: 0.6,
            max_hops_per_turn: 8,
            classify_timeout_secs: 5,
            node_max_turns: 4,
            clarify_prompt: "Could you tell me a bit more about what you need?".into(),
        }
    }

    fn dispatcher(
        model: ScriptedModel,
        classifier: ScriptedClassifier,
        edges: Vec<Edge>,
        config: RouterConfig,
    ) -> RouteDispatcher {
        let catalog = Arc::new(ToolCatalog::new());
        let defs = vec![definition("bp_agent", "bp_node", "blood_pressure")];
        let registry =
            Arc::new(AgentRegistry::build(&defs, &catalog, &model_config(), 4).unwrap());
        RouteDispatcher::new(
            registry,
            Arc::new(classifier),
            Arc::new(model),
            IdentityWrapper::new(catalog),
            Arc::new(SqliteStateStore::open_in_memory().unwrap()),
            config,
            edges,
        )
        .unwrap()
    }

    fn intent(intent_type: &str, confidence: f64) -> IntentResult {
        IntentResult::new(intent_type, confidence, HashMap::new(), false, None).unwrap()
    }

    fn request(message: &str) -> TurnRequest {
        TurnRequest {
            message: message.into(),
            thread_id: "t1".into(),
            user_id: "u1".into(),
            correlation_id: None,
            prior_turns: vec![],
            context: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn test_routes_confident_intent_to_agent() {
        let d = dispatcher(
            ScriptedModel::new(vec![Turn::reply("Noted, 120 over 80.")]),
            ScriptedClassifier::new(vec![intent("blood_pressure", 0.9)]),
            vec![],
            router_config(),
        );
        let response = d.run_turn(request("my bp was 120/80")).await.unwrap();
        assert_eq!(response.reply, "Noted, 120 over 80.");
        assert_eq!(response.resolved_agent.as_deref(), Some("bp_agent"));
        assert_eq!(response.resolved_intent.as_deref(), Some("blood_pressure"));
    }

    #[tokio::test]
    async fn test_low_confidence_routes_to_clarify() {
        let d = dispatcher(
            ScriptedModel::new(vec![]),
            ScriptedClassifier::new(vec![intent("blood_pressure", 0.3)]),
            vec![],
            router_config(),
        );
        let response = d.run_turn(request("hm")).await.unwrap();
        assert_eq!(
            response.reply,
            "Could you tell me a bit more about what you need?"
        );
        assert!(response.resolved_agent.is_none());
    }

    #[tokio::test]
    async fn test_classifier_error_degrades_to_clarify() {
        let d = dispatcher(
            ScriptedModel::new(vec![]),
            ScriptedClassifier::failing(),
            vec![],
            router_config(),
        );
        let response = d.run_turn(request("hello")).await.unwrap();
        assert_eq!(response.resolved_intent.as_deref(), Some("unclear"));
        assert!(!response.reply.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_classifier_timeout_degrades_to_clarify() {
        let d = dispatcher(
            ScriptedModel::new(vec![]),
            ScriptedClassifier::hanging(),
            vec![],
            router_config(),
        );
        let response = d.run_turn(request("hello")).await.unwrap();
        assert_eq!(response.resolved_intent.as_deref(), Some("unclear"));
    }

    #[tokio::test]
    async fn test_unmapped_intent_routes_to_clarify() {
        let d = dispatcher(
            ScriptedModel::new(vec![]),
            ScriptedClassifier::new(vec![intent("weather", 0.95)]),
            vec![],
            router_config(),
        );
        let response = d.run_turn(request("will it rain")).await.unwrap();
        assert!(response.resolved_agent.is_none());
        assert_eq!(
            response.reply,
            "Could you tell me a bit more about what you need?"
        );
    }

    #[tokio::test]
    async fn test_drive_terminates_without_classifier_on_trailing_assistant() {
        let classifier = ScriptedClassifier::new(vec![intent("blood_pressure", 0.9)]);
        let calls = classifier.calls.clone();
        let d = dispatcher(
            ScriptedModel::new(vec![]),
            classifier,
            vec![],
            router_config(),
        );
        let mut state = ConversationState::new(ThreadId::from_string("t1"), "u1");
        state.push(ChatMessage::user("my bp was 120/80"));
        state.push(ChatMessage::assistant("Noted."));
        let reply = d.drive(&mut state).await.unwrap();
        assert_eq!(reply, "Noted.");
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_hop_guard_degrades_turn() {
        // bp_node loops back into itself forever.
        let edges = vec![Edge {
            source_node: "bp_node".into(),
            target_node: "bp_node".into(),
            condition: "always".into(),
        }];
        let mut config = router_config();
        config.max_hops_per_turn = 3;
        let model = ScriptedModel::new(vec![Turn::reply("Still working on it.")]);
        let d = dispatcher(
            model,
            ScriptedClassifier::new(vec![intent("blood_pressure", 0.9)]),
            edges,
            config,
        );
        let response = d.run_turn(request("my bp was 120/80")).await.unwrap();
        assert_eq!(response.reply, HOP_GUARD_REPLY);
    }

    #[tokio::test]
    async fn test_edge_to_unknown_node_is_fatal_at_build() {
        let catalog = Arc::new(ToolCatalog::new());
        let defs = vec![definition("bp_agent", "bp_node", "blood_pressure")];
        let registry =
            Arc::new(AgentRegistry::build(&defs, &catalog, &model_config(), 4).unwrap());
        let edges = vec![Edge {
            source_node: "bp_node".into(),
            target_node: "missing_node".into(),
            condition: "always".into(),
        }];
        let err = RouteDispatcher::new(
            registry,
            Arc::new(ScriptedClassifier::new(vec![])),
            Arc::new(ScriptedModel::new(vec![])),
            IdentityWrapper::new(catalog),
            Arc::new(SqliteStateStore::open_in_memory().unwrap()),
            router_config(),
            edges,
        )
        .unwrap_err();
        assert!(matches!(err, VeyraError::Config(_)));
    }

    #[tokio::test]
    async fn test_conditional_edge_reroutes_on_failed_node() {
        // A failed node execution falls through to clarify.
        let edges = vec![Edge {
            source_node: "bp_node".into(),
            target_node: "clarify".into(),
            condition: "last_node_succeeded == false".into(),
        }];
        let d = dispatcher(
            ScriptedModel::failing(),
            ScriptedClassifier::new(vec![intent("blood_pressure", 0.9)]),
            edges,
            router_config(),
        );
        let response = d.run_turn(request("my bp was 120/80")).await.unwrap();
        // Node degraded to its fallback, then the edge sent the turn
        // through clarify for a follow-up question next turn.
        assert_eq!(
            response.reply,
            "Could you tell me a bit more about what you need?"
        );
    }

    // Ensures the LlmClassifier plugs into the dispatcher through the
    // same trait object as the scripted one.
    #[tokio::test]
    async fn test_llm_classifier_integrates() {
        let catalog = Arc::new(ToolCatalog::new());
        let defs = vec![definition("bp_agent", "bp_node", "blood_pressure")];
        let registry =
            Arc::new(AgentRegistry::build(&defs, &catalog, &model_config(), 4).unwrap());
        let classify_model = ScriptedModel::new(vec![Turn::reply(
            r#"{"intent_type": "blood_pressure", "confidence": 0.9}"#,
        )]);
        let classifier = LlmClassifier::new(
            Arc::new(classify_model),
            model_config(),
            vec!["blood_pressure".into()],
        );
        let d = RouteDispatcher::new(
            registry,
            Arc::new(classifier),
            Arc::new(ScriptedModel::new(vec![Turn::reply("Recorded.")])),
            IdentityWrapper::new(catalog),
            Arc::new(SqliteStateStore::open_in_memory().unwrap()),
            router_config(),
            vec![],
        )
        .unwrap();
        let response = d.run_turn(request("bp 120/80")).await.unwrap();
        assert_eq!(response.reply, "Recorded.");
        assert_eq!(response.resolved_agent.as_deref(), Some("bp_agent"));
    }
}
