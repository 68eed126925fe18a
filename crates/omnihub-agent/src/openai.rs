//! OpenAI-compatible provider: chat completions + embeddings.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use omnihub_core::config::AiConfig;
use omnihub_core::types::{ToolChoice, ToolSpec};
use omnihub_context::ContextRole;

use crate::error::{AgentError, Result};
use crate::provider::{
    AiProvider, CompletionRequest, CompletionResponse, FinishReason, ToolCall,
};

pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    default_model: String,
    embeddings_model: String,
}

impl OpenAiProvider {
    pub fn new(config: &AiConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            default_model: config.model.clone(),
            embeddings_model: config.embeddings_model.clone(),
        }
    }

    fn model_for(&self, req: &CompletionRequest) -> String {
        if req.model.is_empty() {
            self.default_model.clone()
        } else {
            req.model.clone()
        }
    }
}

pub(crate) fn build_request_body(req: &CompletionRequest, model: &str) -> serde_json::Value {
    let messages: Vec<serde_json::Value> = req
        .messages
        .iter()
        .map(|m| {
            let role = match m.role {
                ContextRole::System => "system",
                ContextRole::User => "user",
                ContextRole::Assistant => "assistant",
            };
            serde_json::json!({ "role": role, "content": m.content })
        })
        .collect();

    let mut body = serde_json::json!({
        "model": model,
        "messages": messages,
        "max_tokens": req.max_tokens,
        "temperature": req.temperature,
    });

    if !req.tools.is_empty() {
        body["tools"] = serde_json::json!(req
            .tools
            .iter()
            .map(tool_definition)
            .collect::<Vec<_>>());
        body["tool_choice"] = match req.tool_choice {
            ToolChoice::Auto => serde_json::json!("auto"),
            ToolChoice::None => serde_json::json!("none"),
            ToolChoice::Required => serde_json::json!("required"),
        };
    }

    body
}

fn tool_definition(tool: &ToolSpec) -> serde_json::Value {
    serde_json::json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.parameters,
        }
    })
}

pub(crate) fn parse_response(resp: ApiResponse) -> CompletionResponse {
    let choice = resp.choices.into_iter().next();
    let content = choice
        .as_ref()
        .and_then(|c| c.message.content.as_deref())
        .unwrap_or("")
        .to_string();

    let tool_calls: Vec<ToolCall> = choice
        .as_ref()
        .and_then(|c| c.message.tool_calls.as_ref())
        .map(|calls| {
            calls
                .iter()
                .map(|tc| ToolCall {
                    id: tc.id.clone(),
                    name: tc.function.name.clone(),
                    arguments: serde_json::from_str(&tc.function.arguments).unwrap_or_default(),
                })
                .collect()
        })
        .unwrap_or_default();

    let finish_reason = choice
        .and_then(|c| c.finish_reason)
        .map(|r| FinishReason::from_label(&r))
        .unwrap_or(FinishReason::Stop);

    CompletionResponse {
        content,
        tool_calls,
        tokens_used: resp
            .usage
            .map(|u| u.prompt_tokens + u.completion_tokens)
            .unwrap_or(0),
        finish_reason,
    }
}

#[async_trait]
impl AiProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn complete(&self, req: &CompletionRequest) -> Result<CompletionResponse> {
        let model = self.model_for(req);
        let body = build_request_body(req, &model);
        let url = format!("{}/v1/chat/completions", self.base_url);

        debug!(model = %model, messages = req.messages.len(), "sending completion request");

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if status == 429 {
            let retry = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|s| s * 1000)
                .unwrap_or(5000);
            return Err(AgentError::RateLimited {
                retry_after_ms: retry,
            });
        }
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "completion API error");
            return Err(AgentError::Api {
                status,
                message: text,
            });
        }

        let api_resp: ApiResponse = resp
            .json()
            .await
            .map_err(|e| AgentError::Parse(e.to_string()))?;
        Ok(parse_response(api_resp))
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/v1/embeddings", self.base_url);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "model": self.embeddings_model,
                "input": text,
            }))
            .send()
            .await?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(AgentError::Api {
                status,
                message: text,
            });
        }

        let api_resp: EmbeddingsResponse = resp
            .json()
            .await
            .map_err(|e| AgentError::Parse(e.to_string()))?;
        api_resp
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| AgentError::Parse("embeddings response carried no vectors".to_string()))
    }
}

// API response types.

#[derive(Deserialize)]
pub(crate) struct ApiResponse {
    pub(crate) choices: Vec<Choice>,
    pub(crate) usage: Option<Usage>,
}

#[derive(Deserialize)]
pub(crate) struct Choice {
    pub(crate) message: ChatMessage,
    pub(crate) finish_reason: Option<String>,
}

#[derive(Deserialize)]
pub(crate) struct ChatMessage {
    pub(crate) content: Option<String>,
    pub(crate) tool_calls: Option<Vec<ApiToolCall>>,
}

#[derive(Deserialize)]
pub(crate) struct ApiToolCall {
    pub(crate) id: String,
    pub(crate) function: ApiFunction,
}

#[derive(Deserialize)]
pub(crate) struct ApiFunction {
    pub(crate) name: String,
    pub(crate) arguments: String,
}

#[derive(Deserialize)]
pub(crate) struct Usage {
    pub(crate) prompt_tokens: u32,
    pub(crate) completion_tokens: u32,
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    embedding: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use omnihub_context::PromptMessage;

    fn request() -> CompletionRequest {
        CompletionRequest {
            messages: vec![
                PromptMessage {
                    role: ContextRole::System,
                    content: "You are helpful".to_string(),
                },
                PromptMessage {
                    role: ContextRole::User,
                    content: "hi".to_string(),
                },
            ],
            model: "gpt-4o-mini".to_string(),
            max_tokens: 256,
            temperature: 0.4,
            tools: Vec::new(),
            tool_choice: ToolChoice::Auto,
        }
    }

    #[test]
    fn body_carries_roles_and_sampling() {
        let body = build_request_body(&request(), "gpt-4o-mini");
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["role"], "user");
        assert_eq!(body["temperature"], 0.4);
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn tools_serialize_with_choice() {
        let mut req = request();
        req.tools.push(ToolSpec {
            name: "render_chart".to_string(),
            description: "Draw a chart".to_string(),
            parameters: serde_json::json!({ "type": "object" }),
            visual: true,
            visual_template_id: Some("chart-1".to_string()),
        });
        req.tool_choice = ToolChoice::Required;
        let body = build_request_body(&req, "m");
        assert_eq!(body["tools"][0]["function"]["name"], "render_chart");
        assert_eq!(body["tool_choice"], "required");
    }

    #[test]
    fn response_parsing_extracts_tool_calls() {
        let api: ApiResponse = serde_json::from_str(
            r#"{
                "choices": [{
                    "message": {
                        "content": null,
                        "tool_calls": [{
                            "id": "call_1",
                            "type": "function",
                            "function": { "name": "render_chart", "arguments": "{\"x\":1}" }
                        }]
                    },
                    "finish_reason": "tool_calls"
                }],
                "usage": { "prompt_tokens": 10, "completion_tokens": 5 }
            }"#,
        )
        .unwrap();
        let parsed = parse_response(api);
        assert_eq!(parsed.finish_reason, FinishReason::ToolCalls);
        assert_eq!(parsed.tool_calls[0].name, "render_chart");
        assert_eq!(parsed.tool_calls[0].arguments["x"], 1);
        assert_eq!(parsed.tokens_used, 15);
    }
}
