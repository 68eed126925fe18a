use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use omnihub_core::types::{Intent, Sentiment, ToolChoice, ToolSpec};
use omnihub_context::{ContextRole, PromptMessage};

use crate::error::{AgentError, Result};

/// Why the completion stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    ToolCalls,
}

impl FinishReason {
    /// Map a provider's finish-reason label onto the canonical set.
    pub fn from_label(raw: &str) -> Self {
        match raw {
            "length" | "max_tokens" => FinishReason::Length,
            "content_filter" => FinishReason::ContentFilter,
            "tool_calls" | "tool_use" => FinishReason::ToolCalls,
            _ => FinishReason::Stop,
        }
    }
}

/// A tool call extracted from the completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// Request to an AI provider.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<PromptMessage>,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub tools: Vec<ToolSpec>,
    pub tool_choice: ToolChoice,
}

/// Response from an AI provider.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub tokens_used: u32,
    pub finish_reason: FinishReason,
}

/// Provider-agnostic AI surface: completion plus the auxiliary
/// classification calls the orchestrator leans on.
///
/// `classify_intent` and `analyze_sentiment` have default
/// implementations that prompt the completion endpoint with a
/// constrained instruction and parse the JSON reply, so a provider only
/// has to implement `complete` and `embed`.
#[async_trait]
pub trait AiProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(&self, req: &CompletionRequest) -> Result<CompletionResponse>;

    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    async fn classify_intent(&self, message: &str, intents: &[String]) -> Result<Intent> {
        let instruction = format!(
            "Classify the user message into one of these intents: {}. \
             Reply with JSON only: {{\"name\": \"<intent>\", \"confidence\": <0..1>}}.",
            intents.join(", ")
        );
        let resp = self
            .complete(&CompletionRequest {
                messages: vec![
                    PromptMessage {
                        role: ContextRole::System,
                        content: instruction,
                    },
                    PromptMessage {
                        role: ContextRole::User,
                        content: message.to_string(),
                    },
                ],
                model: String::new(),
                max_tokens: 64,
                temperature: 0.0,
                tools: Vec::new(),
                tool_choice: ToolChoice::None,
            })
            .await?;
        parse_intent(&resp.content)
    }

    async fn analyze_sentiment(&self, message: &str) -> Result<Sentiment> {
        let resp = self
            .complete(&CompletionRequest {
                messages: vec![
                    PromptMessage {
                        role: ContextRole::System,
                        content: "Classify the sentiment of the user message. \
                                  Reply with exactly one word: positive, neutral, or negative."
                            .to_string(),
                    },
                    PromptMessage {
                        role: ContextRole::User,
                        content: message.to_string(),
                    },
                ],
                model: String::new(),
                max_tokens: 8,
                temperature: 0.0,
                tools: Vec::new(),
                tool_choice: ToolChoice::None,
            })
            .await?;
        Ok(parse_sentiment(&resp.content))
    }
}

pub(crate) fn parse_intent(raw: &str) -> Result<Intent> {
    let trimmed = raw.trim().trim_start_matches("```json").trim_matches('`').trim();
    let value: serde_json::Value = serde_json::from_str(trimmed)
        .map_err(|e| AgentError::Parse(format!("intent reply is not JSON: {e}")))?;
    Ok(Intent {
        name: value
            .get("name")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string(),
        confidence: value
            .get("confidence")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0)
            .clamp(0.0, 1.0),
    })
}

pub(crate) fn parse_sentiment(raw: &str) -> Sentiment {
    match raw.trim().to_lowercase().as_str() {
        s if s.contains("positive") => Sentiment::Positive,
        s if s.contains("negative") => Sentiment::Negative,
        s if s.contains("neutral") => Sentiment::Neutral,
        _ => Sentiment::Unknown,
    }
}
