use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{error, warn};

use veyra_core::scope;
use veyra_core::types::{ToolCallContext, ToolResult};

use crate::catalog::ToolCatalog;

/// Argument keys owned by the platform. Any value the model supplies
/// under these names is discarded before injection.
const IDENTITY_KEYS: [&str; 3] = ["user_id", "correlation_id", "session_id"];

/// Outcome of one wrapped tool invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct InvocationOutcome {
    /// Call-correlation id echoed from an enveloped call, so the
    /// reasoning loop can match results back to requests.
    pub call_id: Option<String>,
    pub result: ToolResult,
}

/// Wraps every tool call so the caller's identity reaches the real
/// implementation regardless of what the model produced.
///
/// The explicit `ToolCallContext` is authoritative; the ambient turn
/// scope is consulted only when no explicit context was threaded in.
pub struct IdentityWrapper {
    catalog: Arc<ToolCatalog>,
}

impl IdentityWrapper {
    pub fn new(catalog: Arc<ToolCatalog>) -> Self {
        Self { catalog }
    }

    /// Invoke `name` with identity merged into the innermost argument
    /// map. Tool failures come back as structured error results, never
    /// as errors to the caller.
    pub async fn invoke(
        &self,
        name: &str,
        input: Value,
        ctx: Option<&ToolCallContext>,
    ) -> InvocationOutcome {
        let identity = match ctx {
            Some(ctx) => ctx.clone(),
            None => {
                let scope = scope::current_scope();
                warn!(
                    tool = name,
                    correlation_id = %scope.correlation_id,
                    "No explicit tool call context, falling back to ambient turn scope"
                );
                scope.to_context()
            }
        };

        let (merged, call_id) = inject_identity(input, &identity);

        let result = match self.catalog.execute(name, merged).await {
            Ok(result) => result,
            Err(e) => {
                error!(
                    tool = name,
                    correlation_id = %identity.correlation_id,
                    error = %e,
                    "Tool execution failed"
                );
                ToolResult::error(e.to_string())
            }
        };

        InvocationOutcome { call_id, result }
    }
}

/// Merge identity fields into the innermost argument map.
///
/// Handles both shapes the model may produce:
/// - a flat parameter map: `{"systolic": 120, ...}`
/// - an enveloped call: `{"id": "...", "arguments": {...}}`
///
/// Returns the merged arguments and the envelope's call id, if any.
/// Non-object input is replaced by a bare identity map.
pub fn inject_identity(input: Value, identity: &ToolCallContext) -> (Value, Option<String>) {
    match input {
        Value::Object(mut outer) => {
            let is_envelope = matches!(outer.get("arguments"), Some(Value::Object(_)));
            if is_envelope {
                let call_id = outer.get("id").and_then(|v| v.as_str()).map(String::from);
                if let Some(Value::Object(inner)) = outer.get_mut("arguments") {
                    merge_identity(inner, identity);
                }
                let arguments = outer.remove("arguments").unwrap_or(Value::Null);
                (arguments, call_id)
            } else {
                merge_identity(&mut outer, identity);
                (Value::Object(outer), None)
            }
        }
        other => {
            warn!(input = %other, "Tool arguments were not an object, substituting identity-only map");
            let mut map = Map::new();
            merge_identity(&mut map, identity);
            (Value::Object(map), None)
        }
    }
}

fn merge_identity(map: &mut Map<String, Value>, identity: &ToolCallContext) {
    for key in IDENTITY_KEYS {
        map.remove(key);
    }
    map.insert("user_id".into(), Value::String(identity.user_id.clone()));
    map.insert(
        "correlation_id".into(),
        Value::String(identity.correlation_id.clone()),
    );
    map.insert(
        "session_id".into(),
        Value::String(identity.session_id.clone()),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::BoxFuture;
    use serde_json::json;
    use veyra_core::error::Result;
    use veyra_core::scope::{with_scope, TurnScope};
    use veyra_core::traits::Tool;

    fn identity() -> ToolCallContext {
        ToolCallContext {
            correlation_id: "corr-1".into(),
            user_id: "user-1".into(),
            session_id: "thread-1".into(),
        }
    }

    #[test]
    fn test_inject_into_flat_map() {
        let (merged, call_id) =
            inject_identity(json!({"systolic": 120, "diastolic": 80}), &identity());
        assert_eq!(call_id, None);
        assert_eq!(merged["systolic"], json!(120));
        assert_eq!(merged["user_id"], json!("user-1"));
        assert_eq!(merged["correlation_id"], json!("corr-1"));
    }

    #[test]
    fn test_inject_into_envelope() {
        let input = json!({"id": "call_9", "arguments": {"systolic": 120}});
        let (merged, call_id) = inject_identity(input, &identity());
        assert_eq!(call_id.as_deref(), Some("call_9"));
        assert_eq!(merged["systolic"], json!(120));
        assert_eq!(merged["user_id"], json!("user-1"));
    }

    #[test]
    fn test_model_supplied_identity_is_discarded() {
        let input = json!({"user_id": "attacker", "correlation_id": "spoof", "note": "x"});
        let (merged, _) = inject_identity(input, &identity());
        assert_eq!(merged["user_id"], json!("user-1"));
        assert_eq!(merged["correlation_id"], json!("corr-1"));
        assert_eq!(merged["note"], json!("x"));
    }

    #[test]
    fn test_injection_is_deterministic() {
        let input = json!({"systolic": 120});
        let a = inject_identity(input.clone(), &identity());
        let b = inject_identity(input, &identity());
        assert_eq!(a, b);
    }

    struct CaptureTool;

    impl Tool for CaptureTool {
        fn name(&self) -> &str {
            "capture"
        }
        fn description(&self) -> &str {
            "Returns the user_id it was invoked with."
        }
        fn input_schema(&self) -> serde_json::Value {
            json!({"type": "object"})
        }
        fn execute(&self, input: serde_json::Value) -> BoxFuture<'_, Result<ToolResult>> {
            Box::pin(async move {
                let user = input["user_id"].as_str().unwrap_or("<none>").to_string();
                let corr = input["correlation_id"].as_str().unwrap_or("<none>").to_string();
                Ok(ToolResult::success(format!("{user}/{corr}")))
            })
        }
    }

    fn wrapper() -> IdentityWrapper {
        let mut catalog = ToolCatalog::new();
        catalog.register(CaptureTool);
        IdentityWrapper::new(Arc::new(catalog))
    }

    #[tokio::test]
    async fn test_explicit_context_wins() {
        let outcome = wrapper()
            .invoke("capture", json!({}), Some(&identity()))
            .await;
        assert_eq!(outcome.result.content, "user-1/corr-1");
    }

    #[tokio::test]
    async fn test_implicit_channel_is_consulted_when_no_explicit_context() {
        // Proves the ambient scope is actually read, not just populated:
        // the tool sees the scoped identity even though no explicit
        // context reached the wrapper.
        let scope = TurnScope::new("corr-ambient", "user-ambient", "thread-1");
        let outcome = with_scope(scope, async {
            wrapper().invoke("capture", json!({}), None).await
        })
        .await;
        assert_eq!(outcome.result.content, "user-ambient/corr-ambient");
    }

    #[tokio::test]
    async fn test_unset_implicit_channel_yields_fresh_scope_not_failure() {
        let outcome = wrapper().invoke("capture", json!({}), None).await;
        assert!(!outcome.result.is_error);
        // user is empty in a fresh scope, correlation id is freshly minted
        let (user, corr) = outcome.result.content.split_once('/').unwrap();
        assert_eq!(user, "");
        assert!(!corr.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_tool_becomes_failure_result() {
        let outcome = wrapper()
            .invoke("missing", json!({}), Some(&identity()))
            .await;
        assert!(outcome.result.is_error);
        assert!(outcome.result.content.contains("missing"));
    }

    #[tokio::test]
    async fn test_envelope_call_id_round_trips() {
        let outcome = wrapper()
            .invoke(
                "capture",
                json!({"id": "call_3", "arguments": {}}),
                Some(&identity()),
            )
            .await;
        assert_eq!(outcome.call_id.as_deref(), Some("call_3"));
        assert_eq!(outcome.result.content, "user-1/corr-1");
    }
}
