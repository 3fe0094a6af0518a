use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::Deserialize;
use tracing::debug;

use veyra_core::config::ModelConfig;
use veyra_core::error::{Result, VeyraError};
use veyra_core::traits::{IntentClassifier, ModelClient};
use veyra_core::types::{ChatMessage, IntentResult};

/// How many trailing messages the classifier sees. Older turns add
/// tokens without improving the routing decision.
const CLASSIFY_WINDOW: usize = 6;

/// Model-backed intent classifier.
///
/// Sends the tail of the conversation plus a JSON-only instruction
/// prompt, then parses the reply into an [`IntentResult`]. Anything
/// that goes wrong surfaces as an error; the dispatcher decides how to
/// degrade.
pub struct LlmClassifier {
    model: Arc<dyn ModelClient>,
    config: ModelConfig,
    intent_types: Vec<String>,
}

#[derive(Deserialize)]
struct RawClassification {
    intent_type: String,
    confidence: f64,
    #[serde(default)]
    entities: HashMap<String, String>,
    #[serde(default)]
    needs_clarification: bool,
    #[serde(default)]
    reasoning: Option<String>,
}

impl LlmClassifier {
    pub fn new(
        model: Arc<dyn ModelClient>,
        config: ModelConfig,
        intent_types: Vec<String>,
    ) -> Self {
        Self {
            model,
            config,
            intent_types,
        }
    }

    fn system_prompt(&self) -> String {
        format!(
            "You are an intent classifier for a conversational assistant. \
             Classify the user's latest message into exactly one of these intent types: \
             {}. If none fits, or the message is ambiguous, use \"unclear\".\n\
             Respond with ONLY a JSON object, no prose, shaped like:\n\
             {{\"intent_type\": \"...\", \"confidence\": 0.0, \
             \"entities\": {{}}, \"needs_clarification\": false, \"reasoning\": \"...\"}}\n\
             confidence must be a number between 0 and 1.",
            self.intent_types.join(", ")
        )
    }

    fn parse(content: &str) -> Result<IntentResult> {
        let raw: RawClassification = serde_json::from_str(extract_json(content))
            .map_err(|e| VeyraError::Classification(format!("unparseable reply: {e}")))?;
        IntentResult::new(
            raw.intent_type,
            raw.confidence,
            raw.entities,
            raw.needs_clarification,
            raw.reasoning,
        )
    }
}

/// Strip markdown code fences some models wrap JSON replies in.
fn extract_json(content: &str) -> &str {
    let trimmed = content.trim();
    let trimmed = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    trimmed.strip_suffix("```").unwrap_or(trimmed).trim()
}

impl IntentClassifier for LlmClassifier {
    fn classify(&self, messages: &[ChatMessage]) -> BoxFuture<'_, Result<IntentResult>> {
        let tail = messages
            .iter()
            .skip(messages.len().saturating_sub(CLASSIFY_WINDOW))
            .cloned();
        let mut request = vec![ChatMessage::system(self.system_prompt())];
        request.extend(tail);

        Box::pin(async move {
            let response = self.model.invoke(&self.config, request, &[]).await?;
            let result = Self::parse(&response.content)?;
            debug!(
                intent = result.intent_type(),
                confidence = result.confidence(),
                "Intent classified"
            );
            Ok(result)
        })
    }
}
