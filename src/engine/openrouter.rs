//! OpenRouter engine (OpenAI-compatible chat completions with tool calling).
//!
//! ## Endpoint
//! - `POST {endpoint}/chat/completions`
//! - Header: `Authorization: Bearer {key}`, key read from the environment
//!   variable named by `agents.api_key_env`.

use super::{CompletionRequest, EngineError, EngineReply, Message, ReasoningEngine};
use crate::agent::OutputSchema;
use crate::config::AgentsConfig;
use crate::tools::ToolCall;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info};

pub struct OpenRouterEngine {
    client: Client,
    endpoint: String,
    model: String,
    api_key: String,
}

// =============================================================================
// RESPONSE STRUCTURES
// =============================================================================

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    // Some providers send an explicit null.
    #[serde(default)]
    tool_calls: Option<Vec<ResponseToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ResponseToolCall {
    id: String,
    function: ResponseFunction,
}

#[derive(Debug, Deserialize)]
struct ResponseFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

impl OpenRouterEngine {
    pub fn from_config(cfg: &AgentsConfig) -> Result<Self, EngineError> {
        let api_key = std::env::var(&cfg.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| EngineError::MissingApiKey(cfg.api_key_env.clone()))?;
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.request_timeout_secs))
            .build()?;
        info!(model = %cfg.model, endpoint = %cfg.endpoint, "OpenRouter engine ready");
        Ok(Self {
            client,
            endpoint: cfg.endpoint.trim_end_matches('/').to_string(),
            model: cfg.model.clone(),
            api_key,
        })
    }
}

/// Map the transcript onto chat messages.
pub fn to_chat_messages(messages: &[Message], schema: OutputSchema) -> Vec<Value> {
    messages
        .iter()
        .map(|m| match m {
            Message::System { text } => {
                let mut content = text.clone();
                if let Some(schema) = schema.json_schema() {
                    content.push_str(
                        "\n\nWhen you give your final answer, reply with a single JSON object matching this schema:\n",
                    );
                    content.push_str(&schema.to_string());
                }
                json!({ "role": "system", "content": content })
            }
            Message::User { text, data } => {
                let content = match data {
                    Some(data) => format!("{}\n\nStructured data:\n{}", text, data),
                    None => text.clone(),
                };
                json!({ "role": "user", "content": content })
            }
            Message::ToolCalls { calls } => json!({
                "role": "assistant",
                "content": Value::Null,
                "tool_calls": calls
                    .iter()
                    .map(|c| json!({
                        "id": c.id,
                        "type": "function",
                        "function": { "name": c.name, "arguments": c.arguments.to_string() },
                    }))
                    .collect::<Vec<_>>(),
            }),
            Message::ToolResult { call, result, .. } => json!({
                "role": "tool",
                "tool_call_id": call.id,
                "content": result.to_string(),
            }),
            Message::Answer { value } => {
                let content = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                json!({ "role": "assistant", "content": content })
            }
            Message::Correction { text } => json!({ "role": "user", "content": text }),
        })
        .collect()
}

/// Text answers pass through; structured ones are parsed as JSON, with or
/// without a markdown fence around them.
pub fn parse_answer(content: &str, schema: OutputSchema) -> Value {
    if schema == OutputSchema::Text {
        return Value::String(content.to_string());
    }
    let trimmed = content.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|rest| rest.trim_end().trim_end_matches("```"))
        .unwrap_or(trimmed)
        .trim();
    serde_json::from_str(body).unwrap_or_else(|_| Value::String(content.to_string()))
}

fn into_reply(completion: ChatCompletion, schema: OutputSchema) -> Result<EngineReply, EngineError> {
    let message = completion
        .choices
        .into_iter()
        .next()
        .map(|c| c.message)
        .ok_or_else(|| EngineError::Malformed("response has no choices".to_string()))?;

    let tool_calls = message.tool_calls.unwrap_or_default();
    if !tool_calls.is_empty() {
        let calls = tool_calls
            .into_iter()
            .map(|tc| ToolCall {
                id: tc.id,
                name: tc.function.name,
                arguments: serde_json::from_str(&tc.function.arguments)
                    .unwrap_or(Value::String(tc.function.arguments)),
            })
            .collect();
        return Ok(EngineReply::ToolCalls(calls));
    }

    Ok(EngineReply::Final(parse_answer(
        message.content.as_deref().unwrap_or_default(),
        schema,
    )))
}

#[async_trait]
impl ReasoningEngine for OpenRouterEngine {
    fn name(&self) -> &str {
        "openrouter"
    }

    async fn complete(&self, request: CompletionRequest<'_>) -> Result<EngineReply, EngineError> {
        let url = format!("{}/chat/completions", self.endpoint);
        let tools: Vec<Value> = request.tools.iter().map(|t| t.to_openai_format()).collect();
        let mut body = json!({
            "model": self.model,
            "messages": to_chat_messages(request.transcript.messages(), request.schema),
        });
        if !tools.is_empty() {
            body["tools"] = Value::Array(tools);
            body["tool_choice"] = json!("auto");
        }

        debug!(role = %request.role, messages = request.transcript.len(), "Requesting completion");
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let completion: ChatCompletion = response.json().await?;
        into_reply(completion, request.schema)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolName;

    #[test]
    fn test_fenced_json_is_unwrapped() {
        let value = parse_answer("```json\n{\"summary\": \"x\"}\n```", OutputSchema::LogSummary);
        assert_eq!(value, json!({ "summary": "x" }));
        let text = parse_answer("{\"a\": 1}", OutputSchema::Text);
        assert_eq!(text, json!("{\"a\": 1}"));
        let broken = parse_answer("not json", OutputSchema::RcaReport);
        assert_eq!(broken, json!("not json"));
    }

    #[test]
    fn test_tool_messages_follow_calls() {
        let call = ToolCall::new("c1", ToolName::FetchLogs, json!({ "service": "api-gateway" }));
        let messages = vec![
            Message::System { text: "sys".to_string() },
            Message::ToolCalls { calls: vec![call.clone()] },
            Message::ToolResult {
                call,
                result: json!(["line"]),
                is_error: false,
            },
        ];
        let chat = to_chat_messages(&messages, OutputSchema::LogSummary);
        assert!(chat[0]["content"].as_str().unwrap().contains("JSON object"));
        assert_eq!(chat[1]["tool_calls"][0]["function"]["name"], "fetch_logs");
        assert_eq!(
            chat[1]["tool_calls"][0]["function"]["arguments"],
            "{\"service\":\"api-gateway\"}"
        );
        assert_eq!(chat[2]["role"], "tool");
        assert_eq!(chat[2]["tool_call_id"], "c1");
    }

    #[test]
    fn test_tool_call_response_is_parsed() {
        let completion: ChatCompletion = serde_json::from_value(json!({
            "choices": [{ "message": { "content": null, "tool_calls": [
                { "id": "x", "type": "function", "function": { "name": "search_logs", "arguments": "{\"pattern\":\"timeout\"}" } }
            ]}}]
        }))
        .unwrap();
        let EngineReply::ToolCalls(calls) = into_reply(completion, OutputSchema::LogSummary).unwrap() else {
            panic!("expected tool calls");
        };
        assert!(calls[0].is(ToolName::SearchLogs));
        assert_eq!(calls[0].arguments["pattern"], "timeout");
    }

    #[test]
    fn test_null_tool_calls_is_an_answer() {
        let completion: ChatCompletion = serde_json::from_value(json!({
            "choices": [{ "message": { "content": "pool exhausted", "tool_calls": null }}]
        }))
        .unwrap();
        assert_eq!(
            into_reply(completion, OutputSchema::Text).unwrap(),
            EngineReply::Final(json!("pool exhausted"))
        );
    }

    #[test]
    fn test_missing_key_is_reported() {
        let cfg = AgentsConfig {
            api_key_env: "INCIDENT_COMMANDER_TEST_UNSET_KEY".to_string(),
            ..AgentsConfig::default()
        };
        assert!(matches!(
            OpenRouterEngine::from_config(&cfg),
            Err(EngineError::MissingApiKey(_))
        ));
    }
}
