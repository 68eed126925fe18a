//! Canonical events produced by `parse_webhook`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use omnihub_core::message::{Message, StatusUpdate};

use crate::adapter::CallStatus;

/// One normalized occurrence extracted from a provider webhook. A single
/// HTTP delivery may fan out into several events (batch payloads).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WebhookEvent {
    /// An inbound message from an external contact, already canonical
    /// except for conversation resolution (the ingress fills that in).
    Message(Box<Message>),

    /// Delivery status change for a previously sent message.
    Status(StatusUpdate),

    /// WhatsApp coexistence echo: the Business App sent something.
    Echo {
        phone_number_id: String,
        timestamp: DateTime<Utc>,
    },

    /// Call lifecycle change.
    CallStatus {
        call_id: String,
        status: CallStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// The provider is asking what to do next on a live call.
    IvrRequest {
        call_id: String,
        from: String,
        to: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        digits: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        speech: Option<String>,
    },

    /// A call recording became available.
    Recording {
        call_id: String,
        url: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        duration_secs: Option<u64>,
    },

    /// A transcription became available.
    Transcription { call_id: String, text: String },

    /// Template review/quality update from WhatsApp.
    TemplateUpdate {
        name: String,
        field: String,
        payload: serde_json::Value,
    },

    /// Account-level notification (alerts, reviews, capability changes).
    AccountUpdate {
        field: String,
        payload: serde_json::Value,
    },
}
