use tracing::debug;
use uuid::Uuid;

use crate::types::ToolCallContext;

/// Correlation identity for one turn's execution.
///
/// The authoritative channel for these identifiers is explicit: they
/// live on `ConversationState` and are threaded as plain parameters
/// into every node, model, and tool call. The task-local here is a
/// fallback for collaborators nested too deep to receive them. It is
/// scoped to one turn's task and never process-global.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnScope {
    pub correlation_id: String,
    pub user_id: String,
    pub session_id: String,
}

impl TurnScope {
    pub fn new(
        correlation_id: impl Into<String>,
        user_id: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            user_id: user_id.into(),
            session_id: session_id.into(),
        }
    }

    /// A fresh, unlinked scope: new correlation id, no user/session.
    /// Used when the implicit channel is read without ever being set.
    pub fn fresh() -> Self {
        Self {
            correlation_id: Uuid::new_v4().to_string(),
            user_id: String::new(),
            session_id: String::new(),
        }
    }

    pub fn to_context(&self) -> ToolCallContext {
        ToolCallContext {
            correlation_id: self.correlation_id.clone(),
            user_id: self.user_id.clone(),
            session_id: self.session_id.clone(),
        }
    }
}

tokio::task_local! {
    static TURN_SCOPE: TurnScope;
}

/// Run `fut` with the given scope installed for the task.
///
/// Set once by the turn entry point; nested calls see the innermost
/// scope.
pub async fn with_scope<F>(scope: TurnScope, fut: F) -> F::Output
where
    F: std::future::Future,
{
    TURN_SCOPE.scope(scope, fut).await
}

/// Read the ambient scope for the current task.
///
/// Falls back to a fresh, unlinked scope when none was installed;
/// callers must not fail just because propagation degraded.
pub fn current_scope() -> TurnScope {
    TURN_SCOPE.try_with(|s| s.clone()).unwrap_or_else(|_| {
        let scope = TurnScope::fresh();
        debug!(correlation_id = %scope.correlation_id, "No ambient turn scope, starting fresh correlation scope");
        scope
    })
}
