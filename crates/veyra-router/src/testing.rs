//! Test doubles shared by unit and integration tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;

use veyra_core::config::ModelConfig;
use veyra_core::error::{Result, VeyraError};
use veyra_core::traits::{IntentClassifier, ModelClient, StateStore};
use veyra_core::types::*;

/// A fixed model config for tests.
pub fn model_config() -> ModelConfig {
    ModelConfig {
        provider: "openai".into(),
        model_id: "scripted".into(),
        api_key: None,
        base_url: None,
        max_tokens: 256,
        temperature: 0.0,
        timeout_secs: 5,
        retry: None,
    }
}

/// One scripted model response.
#[derive(Debug, Clone)]
pub enum Turn {
    Reply(String),
    ToolCall { name: String, arguments: serde_json::Value },
}

impl Turn {
    pub fn reply(text: impl Into<String>) -> Self {
        Turn::Reply(text.into())
    }

    pub fn tool_call(name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Turn::ToolCall {
            name: name.into(),
            arguments,
        }
    }
}

/// A model client that plays back scripted turns.
///
/// When the script runs out, the last turn repeats.
pub struct ScriptedModel {
    script: Mutex<VecDeque<Turn>>,
    last: Mutex<Option<Turn>>,
    fail: bool,
    pub calls: AtomicUsize,
}

impl ScriptedModel {
    pub fn new(turns: Vec<Turn>) -> Self {
        Self {
            script: Mutex::new(turns.into_iter().collect()),
            last: Mutex::new(None),
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    /// A model that always errors.
    pub fn failing() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            last: Mutex::new(None),
            fail: true,
            calls: AtomicUsize::new(0),
        }
    }

    fn next_turn(&self) -> Option<Turn> {
        let mut script = self.script.lock().unwrap();
        match script.pop_front() {
            Some(turn) => {
                *self.last.lock().unwrap() = Some(turn.clone());
                Some(turn)
            }
            None => self.last.lock().unwrap().clone(),
        }
    }
}

impl ModelClient for ScriptedModel {
    fn invoke(
        &self,
        _config: &ModelConfig,
        _messages: Vec<ChatMessage>,
        _tools: &[ToolDefinition],
    ) -> BoxFuture<'_, Result<ModelResponse>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let turn = self.next_turn();
        let fail = self.fail;
        Box::pin(async move {
            if fail {
                return Err(VeyraError::ModelRequest("scripted failure".into()));
            }
            match turn {
                Some(Turn::Reply(text)) => Ok(ModelResponse {
                    content: text,
                    ..Default::default()
                }),
                Some(Turn::ToolCall { name, arguments }) => Ok(ModelResponse {
                    content: String::new(),
                    tool_calls: vec![ToolCallRequest {
                        id: "call_1".into(),
                        name,
                        arguments,
                    }],
                    usage: Usage::default(),
                }),
                None => Ok(ModelResponse {
                    content: "ok".into(),
                    ..Default::default()
                }),
            }
        })
    }
}

/// A classifier that plays back scripted results and counts calls.
pub struct ScriptedClassifier {
    script: Mutex<VecDeque<IntentResult>>,
    fail: bool,
    hang: bool,
    pub calls: Arc<AtomicUsize>,
}

impl ScriptedClassifier {
    pub fn new(results: Vec<IntentResult>) -> Self {
        Self {
            script: Mutex::new(results.into_iter().collect()),
            fail: false,
            hang: false,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A classifier that always errors.
    pub fn failing() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fail: true,
            hang: false,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A classifier that never resolves (for timeout tests).
    pub fn hanging() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fail: false,
            hang: true,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl IntentClassifier for ScriptedClassifier {
    fn classify(&self, _messages: &[ChatMessage]) -> BoxFuture<'_, Result<IntentResult>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        let fail = self.fail;
        let hang = self.hang;
        Box::pin(async move {
            if hang {
                futures::future::pending::<()>().await;
            }
            if fail {
                return Err(VeyraError::Classification("scripted failure".into()));
            }
            next.ok_or_else(|| VeyraError::Classification("script exhausted".into()))
        })
    }
}

/// A store that fails every save, for fail-closed persistence tests.
pub struct FailingStore {
    preloaded: Mutex<Option<ConversationState>>,
}

impl FailingStore {
    pub fn new() -> Self {
        Self {
            preloaded: Mutex::new(None),
        }
    }

    pub fn with_state(state: ConversationState) -> Self {
        Self {
            preloaded: Mutex::new(Some(state)),
        }
    }
}

impl Default for FailingStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore for FailingStore {
    fn save(
        &self,
        _thread_id: &ThreadId,
        _state: &ConversationState,
    ) -> BoxFuture<'_, Result<String>> {
        Box::pin(async { Err(VeyraError::Persistence("store unreachable".into())) })
    }

    fn load(&self, _thread_id: &ThreadId) -> BoxFuture<'_, Result<Option<ConversationState>>> {
        let state = self.preloaded.lock().unwrap().clone();
        Box::pin(async move { Ok(state) })
    }
}
