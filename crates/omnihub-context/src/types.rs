use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use omnihub_core::types::{Intent, Sentiment};

/// Role of a context window entry, mirroring the AI message roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextRole {
    System,
    User,
    Assistant,
}

/// One turn in the sliding context window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextEntry {
    pub role: ContextRole,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    pub ts: DateTime<Utc>,
}

/// Flow execution state stored under `context.state`.
///
/// The string keys `active_flow_id`, `current_node_id`, `collected_data`
/// and `flow_started_at` are a compatibility surface; `as_kv`/`from_kv`
/// convert between this typed value and the raw map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowState {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_flow_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_node_id: Option<String>,
    #[serde(default)]
    pub collected_data: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flow_started_at: Option<DateTime<Utc>>,
}

impl FlowState {
    pub fn is_active(&self) -> bool {
        self.active_flow_id.is_some()
    }

    /// Clear flow bookkeeping but keep `collected_data` for reference.
    pub fn end_flow(&mut self) {
        self.active_flow_id = None;
        self.current_node_id = None;
        self.flow_started_at = None;
    }

    pub fn as_kv(&self) -> HashMap<String, serde_json::Value> {
        let mut kv = HashMap::new();
        if let Some(id) = &self.active_flow_id {
            kv.insert("active_flow_id".to_string(), serde_json::json!(id));
        }
        if let Some(id) = &self.current_node_id {
            kv.insert("current_node_id".to_string(), serde_json::json!(id));
        }
        kv.insert(
            "collected_data".to_string(),
            serde_json::json!(self.collected_data),
        );
        if let Some(at) = &self.flow_started_at {
            kv.insert("flow_started_at".to_string(), serde_json::json!(at));
        }
        kv
    }

    pub fn from_kv(kv: &HashMap<String, serde_json::Value>) -> Self {
        Self {
            active_flow_id: kv
                .get("active_flow_id")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
            current_node_id: kv
                .get("current_node_id")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
            collected_data: kv
                .get("collected_data")
                .and_then(|v| serde_json::from_value(v.clone()).ok())
                .unwrap_or_default(),
            flow_started_at: kv
                .get("flow_started_at")
                .and_then(|v| serde_json::from_value(v.clone()).ok()),
        }
    }
}

/// Per-conversation singleton feeding the AI and the flow engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationContext {
    pub conversation_id: String,
    #[serde(default)]
    pub window: Vec<ContextEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent: Option<Intent>,
    #[serde(default)]
    pub sentiment: Sentiment,
    #[serde(default)]
    pub entities: HashMap<String, String>,
    #[serde(default)]
    pub state: FlowState,
    pub updated_at: DateTime<Utc>,
}

impl ConversationContext {
    pub fn new(conversation_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            window: Vec::new(),
            intent: None,
            sentiment: Sentiment::Unknown,
            entities: HashMap::new(),
            state: FlowState::default(),
            updated_at: Utc::now(),
        }
    }

    /// A conversation with no prior turns and no flow history — the
    /// `welcome` trigger condition.
    pub fn is_fresh(&self) -> bool {
        self.window.is_empty() && !self.state.is_active() && self.state.collected_data.is_empty()
    }
}

/// Role/content pair handed to the AI provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptMessage {
    pub role: ContextRole,
    pub content: String,
}
