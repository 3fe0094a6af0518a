use futures::future::BoxFuture;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use veyra_core::config::ModelConfig;
use veyra_core::error::{Result, VeyraError};
use veyra_core::traits::ModelClient;
use veyra_core::types::*;

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

/// OpenAI-compatible client. Works with OpenAI, Ollama, vLLM, Groq,
/// OpenRouter, etc. Non-streaming: the dispatcher consumes whole
/// responses.
pub struct OpenAiCompatClient {
    http: Client,
}

impl OpenAiCompatClient {
    pub fn new() -> Self {
        Self {
            http: Client::new(),
        }
    }
}

impl Default for OpenAiCompatClient {
    fn default() -> Self {
        Self::new()
    }
}

// Request types
#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<OaiMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<OaiTool>,
}

#[derive(Serialize)]
struct OaiMessage {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct OaiTool {
    r#type: String,
    function: OaiToolDef,
}

#[derive(Serialize)]
struct OaiToolDef {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

// Response types
#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<OaiUsage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<OaiToolCall>>,
}

#[derive(Deserialize)]
struct OaiToolCall {
    #[serde(default)]
    id: Option<String>,
    function: OaiFunction,
}

#[derive(Deserialize)]
struct OaiFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Deserialize)]
struct OaiUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

fn convert_tools(tools: &[ToolDefinition]) -> Vec<OaiTool> {
    tools
        .iter()
        .map(|t| OaiTool {
            r#type: "function".to_string(),
            function: OaiToolDef {
                name: t.name.clone(),
                description: t.description.clone(),
                parameters: t.input_schema.clone(),
            },
        })
        .collect()
}

fn convert_messages(messages: Vec<ChatMessage>) -> Vec<OaiMessage> {
    messages
        .into_iter()
        .map(|m| match m.role {
            Role::System => OaiMessage {
                role: "system".into(),
                content: m.content,
            },
            Role::User => OaiMessage {
                role: "user".into(),
                content: m.content,
            },
            Role::Assistant => OaiMessage {
                role: "assistant".into(),
                content: m.content,
            },
            // Tool results travel as user messages; this client keeps no
            // per-call wire ids across turns.
            Role::Tool => OaiMessage {
                role: "user".into(),
                content: format!("Tool result: {}", m.content),
            },
        })
        .collect()
}

fn resolve_api_key(config: &ModelConfig) -> Option<String> {
    config
        .api_key
        .clone()
        .or_else(|| std::env::var("VEYRA_API_KEY").ok())
        .or_else(|| std::env::var("OPENAI_API_KEY").ok())
}

impl ModelClient for OpenAiCompatClient {
    fn invoke(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
        tools: &[ToolDefinition],
    ) -> BoxFuture<'_, Result<ModelResponse>> {
        let config = config.clone();
        let tools = tools.to_vec();

        Box::pin(async move {
            let url = config
                .base_url
                .clone()
                .unwrap_or_else(|| OPENAI_API_URL.to_string());

            let request = ChatRequest {
                model: config.model_id.clone(),
                messages: convert_messages(messages),
                max_tokens: config.max_tokens,
                temperature: Some(config.temperature),
                tools: convert_tools(&tools),
            };

            debug!(model = %config.model_id, url = %url, "Sending model request");

            let mut builder = self
                .http
                .post(&url)
                .timeout(std::time::Duration::from_secs(config.timeout_secs))
                .json(&request);
            if let Some(key) = resolve_api_key(&config) {
                builder = builder.bearer_auth(key);
            }

            let resp = builder.send().await.map_err(|e| {
                if e.is_timeout() {
                    VeyraError::ModelTimeout(config.timeout_secs)
                } else {
                    VeyraError::ModelRequest(e.to_string())
                }
            })?;

            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                return Err(VeyraError::ModelRequest(format!(
                    "HTTP {}: {}",
                    status.as_u16(),
                    body.chars().take(500).collect::<String>()
                )));
            }

            let parsed: ChatResponse = resp
                .json()
                .await
                .map_err(|e| VeyraError::ModelParse(e.to_string()))?;

            let choice = parsed
                .choices
                .into_iter()
                .next()
                .ok_or_else(|| VeyraError::ModelParse("response had no choices".into()))?;

            let tool_calls = choice
                .message
                .tool_calls
                .unwrap_or_default()
                .into_iter()
                .map(|tc| {
                    let arguments =
                        serde_json::from_str(&tc.function.arguments).unwrap_or_else(|e| {
                            warn!(tool = %tc.function.name, error = %e, "Unparseable tool arguments, using empty object");
                            serde_json::json!({})
                        });
                    ToolCallRequest {
                        id: tc.id.unwrap_or_default(),
                        name: tc.function.name,
                        arguments,
                    }
                })
                .collect();

            let usage = parsed
                .usage
                .map(|u| Usage {
                    input_tokens: u.prompt_tokens,
                    output_tokens: u.completion_tokens,
                })
                .unwrap_or_default();

            Ok(ModelResponse {
                content: choice.message.content.unwrap_or_default(),
                tool_calls,
                usage,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convert_tools() {
        let defs = vec![ToolDefinition {
            name: "record_blood_pressure".into(),
            description: "Record a reading".into(),
            input_schema: serde_json::json!({"type": "object"}),
        }];
        let converted = convert_tools(&defs);
        assert_eq!(converted.len(), 1);
        assert_eq!(converted[0].r#type, "function");
        assert_eq!(converted[0].function.name, "record_blood_pressure");
    }

    #[test]
    fn test_convert_messages_maps_tool_role() {
        let msgs = vec![
            ChatMessage::system("You route requests."),
            ChatMessage::user("hi"),
            ChatMessage::tool("saved"),
        ];
        let converted = convert_messages(msgs);
        assert_eq!(converted[0].role, "system");
        assert_eq!(converted[1].role, "user");
        assert_eq!(converted[2].role, "user");
        assert!(converted[2].content.starts_with("Tool result:"));
    }

    #[test]
    fn test_response_parsing() {
        let body = r#"{
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "function": {"name": "record_blood_pressure", "arguments": "{\"systolic\": 120}"}
                    }]
                }
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5}
        }"#;
        let parsed: ChatResponse = serde_json::from_str(body).unwrap();
        let calls = parsed.choices[0].message.tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].function.name, "record_blood_pressure");
        assert_eq!(calls[0].id.as_deref(), Some("call_1"));
    }
}
