use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, VeyraError};

/// Top-level Veyra configuration, loaded from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub model: ModelConfig,
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub agents: Vec<AgentDefinition>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(VeyraError::ConfigNotFound(path.display().to_string()));
        }
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| VeyraError::Config(e.to_string()))
    }
}

/// Model connection parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    pub model_id: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_model_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub retry: Option<RetryConfig>,
}

fn default_provider() -> String {
    "openai".to_string()
}
fn default_max_tokens() -> u32 {
    2048
}
fn default_temperature() -> f32 {
    0.0
}
fn default_model_timeout() -> u64 {
    60
}

/// Retry configuration for model requests.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

fn default_max_retries() -> u32 {
    2
}
fn default_initial_backoff() -> u64 {
    500
}
fn default_max_backoff() -> u64 {
    8_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

/// Route dispatcher tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Minimum classification confidence before routing to an agent.
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
    /// Hard bound on node executions within one turn.
    #[serde(default = "default_max_hops")]
    pub max_hops_per_turn: usize,
    /// Timeout for the classification collaborator.
    #[serde(default = "default_classify_timeout")]
    pub classify_timeout_secs: u64,
    /// Maximum model→tool rounds inside one agent node execution.
    #[serde(default = "default_node_max_turns")]
    pub node_max_turns: usize,
    /// Assistant text produced by the clarify node.
    #[serde(default = "default_clarify_prompt")]
    pub clarify_prompt: String,
}

fn default_confidence_threshold() -> f64 {
    0.6
}
fn default_max_hops() -> usize {
    8
}
fn default_classify_timeout() -> u64 {
    15
}
fn default_node_max_turns() -> usize {
    4
}
fn default_clarify_prompt() -> String {
    "I want to make sure I help with the right thing. Could you tell me a bit more about what you need?".to_string()
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: default_confidence_threshold(),
            max_hops_per_turn: default_max_hops(),
            classify_timeout_secs: default_classify_timeout(),
            node_max_turns: default_node_max_turns(),
            clarify_prompt: default_clarify_prompt(),
        }
    }
}

/// Checkpoint store location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: String,
}

fn default_store_path() -> String {
    "veyra.db".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

/// HTTP gateway settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_bind() -> String {
    "127.0.0.1:8420".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

/// Declarative definition of one specialist agent.
///
/// The full set is validated and frozen into the registry at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDefinition {
    /// Unique registry key.
    pub key: String,
    /// Unique dispatcher state name.
    pub node_name: String,
    /// The classified intent this agent handles.
    pub routing_intent_type: String,
    /// Prompt template. Placeholders `{user_id}`, `{user_profile}` and
    /// `{history_summary}` are resolved at node-execution time.
    pub prompt: String,
    /// Tools this agent may call; each must resolve in the catalog.
    #[serde(default)]
    pub tool_names: Vec<String>,
    /// Optional per-agent model override.
    #[serde(default)]
    pub model: Option<ModelConfig>,
}

/// A routing rule between dispatcher nodes.
///
/// `condition` is either the literal `always` or an expression for the
/// condition evaluator. Edges are evaluated in declared order; the
/// first true condition wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub source_node: String,
    pub target_node: String,
    #[serde(default = "default_condition")]
    pub condition: String,
}

fn default_condition() -> String {
    "always".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_parses() {
        let toml_str = r#"
            [model]
            model_id = "gpt-4o-mini"
        "#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.model.provider, "openai");
        assert_eq!(config.model.max_tokens, 2048);
        assert_eq!(config.router.confidence_threshold, 0.6);
        assert_eq!(config.router.max_hops_per_turn, 8);
        assert!(config.agents.is_empty());
    }

    #[test]
    fn test_full_config_parses() {
        let toml_str = r#"
            [model]
            provider = "openai"
            model_id = "gpt-4o"
            temperature = 0.2

            [router]
            confidence_threshold = 0.7

            [store]
            path = "/tmp/veyra-test.db"

            [gateway]
            bind = "0.0.0.0:9000"

            [[agents]]
            key = "blood_pressure_agent"
            node_name = "blood_pressure_node"
            routing_intent_type = "blood_pressure"
            prompt = "You help the user track blood pressure. Profile: {user_profile}"
            tool_names = ["record_blood_pressure", "query_blood_pressure"]

            [[edges]]
            source_node = "blood_pressure_node"
            target_node = "clarify"
            condition = "need_reroute == true"
        "#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.agents.len(), 1);
        assert_eq!(config.agents[0].tool_names.len(), 2);
        assert_eq!(config.edges[0].condition, "need_reroute == true");
        assert_eq!(config.router.confidence_threshold, 0.7);
    }

    #[test]
    fn test_edge_condition_defaults_to_always() {
        let toml_str = r#"
            source_node = "a"
            target_node = "b"
        "#;
        let edge: Edge = toml::from_str(toml_str).unwrap();
        assert_eq!(edge.condition, "always");
    }
}
