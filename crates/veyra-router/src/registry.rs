use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use veyra_core::config::{AgentDefinition, ModelConfig};
use veyra_core::error::{Result, VeyraError};
use veyra_tools::ToolCatalog;

use crate::node::AgentNode;

/// Dispatcher state names that agent nodes may not shadow.
pub const RESERVED_NODES: [&str; 4] = ["entry", "classify", "clarify", "terminal"];

/// Immutable registry of agent nodes, built once at startup.
///
/// All definition errors are fatal here, at build time; request-time
/// lookups cannot fail for configuration reasons. Safe for
/// unsynchronized concurrent reads across turns.
pub struct AgentRegistry {
    by_node_name: HashMap<String, Arc<AgentNode>>,
    by_key: HashMap<String, Arc<AgentNode>>,
    by_intent: HashMap<String, Arc<AgentNode>>,
}

impl std::fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRegistry").finish_non_exhaustive()
    }
}

impl AgentRegistry {
    /// Validate the definitions and build one long-lived node each.
    pub fn build(
        definitions: &[AgentDefinition],
        catalog: &ToolCatalog,
        default_model: &ModelConfig,
        node_max_turns: usize,
    ) -> Result<Self> {
        let mut by_node_name = HashMap::new();
        let mut by_key = HashMap::new();
        let mut by_intent = HashMap::new();

        for def in definitions {
            if def.prompt.trim().is_empty() {
                return Err(VeyraError::Config(format!(
                    "Agent '{}' has no prompt",
                    def.key
                )));
            }
            if RESERVED_NODES.contains(&def.node_name.as_str()) {
                return Err(VeyraError::Config(format!(
                    "Agent '{}' uses reserved node name '{}'",
                    def.key, def.node_name
                )));
            }
            for tool_name in &def.tool_names {
                if !catalog.contains(tool_name) {
                    return Err(VeyraError::Config(format!(
                        "Agent '{}' references unknown tool '{}'",
                        def.key, tool_name
                    )));
                }
            }

            let tool_defs = catalog.definitions_for(&def.tool_names)?;
            let model_config = def.model.clone().unwrap_or_else(|| default_model.clone());

            let node = Arc::new(AgentNode::new(
                def.key.clone(),
                def.node_name.clone(),
                def.routing_intent_type.clone(),
                def.prompt.clone(),
                tool_defs,
                model_config,
                node_max_turns,
            ));

            if by_key.insert(def.key.clone(), node.clone()).is_some() {
                return Err(VeyraError::Config(format!(
                    "Duplicate agent key '{}'",
                    def.key
                )));
            }
            if by_node_name
                .insert(def.node_name.clone(), node.clone())
                .is_some()
            {
                return Err(VeyraError::Config(format!(
                    "Duplicate node name '{}'",
                    def.node_name
                )));
            }
            if by_intent
                .insert(def.routing_intent_type.clone(), node)
                .is_some()
            {
                return Err(VeyraError::Config(format!(
                    "Duplicate routing intent type '{}'",
                    def.routing_intent_type
                )));
            }
        }

        info!(agents = by_key.len(), "Agent registry built");

        Ok(Self {
            by_node_name,
            by_key,
            by_intent,
        })
    }

    pub fn node(&self, node_name: &str) -> Option<Arc<AgentNode>> {
        self.by_node_name.get(node_name).cloned()
    }

    pub fn node_by_key(&self, key: &str) -> Option<Arc<AgentNode>> {
        self.by_key.get(key).cloned()
    }

    pub fn node_for_intent(&self, intent_type: &str) -> Option<Arc<AgentNode>> {
        self.by_intent.get(intent_type).cloned()
    }

    /// Routing intent types this registry can dispatch to.
    pub fn intent_types(&self) -> Vec<&str> {
        self.by_intent.keys().map(String::as_str).collect()
    }

    pub fn node_names(&self) -> Vec<&str> {
        self.by_node_name.keys().map(String::as_str).collect()
    }

    /// Whether a state name is valid for edges: a configured agent node
    /// or one of the built-in dispatcher states.
    pub fn is_known_state(&self, name: &str) -> bool {
        RESERVED_NODES.contains(&name) || self.by_node_name.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}
