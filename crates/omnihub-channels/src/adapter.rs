//! Adapter capability set.
//!
//! Every provider integration implements one of two trait surfaces:
//! [`MessagingAdapter`] for chat-style channels and [`VoiceAdapter`] for
//! telephony. Dispatch is value-based through the registry; there is no
//! shared base with overridable hooks.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ChannelError, Result};
use crate::event::WebhookEvent;
use crate::ivr::IvrAction;

/// Request headers as seen by webhook validation.
///
/// The ingress inserts every header under both its original and
/// lowercased name so adapters can look up either spelling.
pub type WebhookHeaders = HashMap<String, String>;

/// What a given adapter can do; the dispatcher consults this before
/// routing structured content.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct AdapterCapabilities {
    pub messaging: bool,
    pub voice: bool,
    pub media: bool,
    pub interactive: bool,
    pub templates: bool,
    pub read_receipts: bool,
}

/// How an adapter's rendered webhook responses must be served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderFormat {
    Xml,
    Json,
    Text,
}

impl RenderFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            RenderFormat::Xml => "application/xml",
            RenderFormat::Json => "application/json",
            RenderFormat::Text => "text/plain",
        }
    }
}

/// Provider acknowledgement of an accepted outbound message.
#[derive(Debug, Clone)]
pub struct SendReceipt {
    /// Provider-assigned message id; becomes the canonical `external_id`.
    pub external_id: String,
}

/// Resolved media bytes plus their declared type.
#[derive(Debug, Clone)]
pub struct MediaDownload {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub filename: Option<String>,
}

/// Chat-style channel surface (WhatsApp Cloud, and any future peer).
#[async_trait]
pub trait MessagingAdapter: Send + Sync {
    /// Stable lowercase identifier, unique across registered adapters.
    fn name(&self) -> &str;

    fn capabilities(&self) -> AdapterCapabilities;

    /// Deliver one message already rendered to the channel's wire shape.
    async fn send_message(&self, wire: &serde_json::Value) -> Result<SendReceipt>;

    /// Fetch a previously sent message. Most chat APIs cannot, so the
    /// default declines.
    async fn get_message(&self, external_id: &str) -> Result<serde_json::Value> {
        let _ = external_id;
        Err(ChannelError::NotSupported {
            operation: "get_message",
        })
    }

    async fn delete_message(&self, external_id: &str) -> Result<()> {
        let _ = external_id;
        Err(ChannelError::NotSupported {
            operation: "delete_message",
        })
    }

    async fn mark_as_read(&self, external_id: &str) -> Result<()>;

    /// Upload media, returning the provider media id.
    async fn upload_media(&self, bytes: Vec<u8>, mime_type: &str) -> Result<String>;

    /// Resolve a provider media id to downloadable bytes.
    async fn download_media(&self, media_id: &str) -> Result<MediaDownload>;

    /// Check the provider signature over the raw body. Synchronous and
    /// cheap; a missing or malformed header is a rejection, never a pass.
    fn validate_webhook(&self, headers: &WebhookHeaders, body: &[u8]) -> bool;

    /// Parse a validated webhook body into canonical events.
    fn parse_webhook(&self, headers: &WebhookHeaders, body: &[u8]) -> Result<Vec<WebhookEvent>>;
}

/// Canonical call lifecycle state shared by every voice provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    Queued,
    Ringing,
    InProgress,
    Completed,
    Busy,
    NoAnswer,
    Failed,
    Canceled,
}

/// Parameters of an outbound call.
#[derive(Debug, Clone)]
pub struct CallRequest {
    pub to: String,
    pub from: Option<String>,
    /// URL the provider fetches (or posts to) for call instructions.
    pub answer_url: Option<String>,
    /// Inline script for providers that accept one directly.
    pub actions: Vec<IvrAction>,
}

#[derive(Debug, Clone)]
pub struct CallHandle {
    pub call_id: String,
    pub status: CallStatus,
}

#[derive(Debug, Clone)]
pub struct CallInfo {
    pub call_id: String,
    pub status: CallStatus,
    pub from: Option<String>,
    pub to: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub duration_secs: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct RecordingInfo {
    pub recording_id: String,
    pub url: String,
    pub duration_secs: Option<u64>,
}

/// Telephony channel surface.
#[async_trait]
pub trait VoiceAdapter: Send + Sync {
    fn name(&self) -> &str;

    fn capabilities(&self) -> AdapterCapabilities;

    /// Serving format of [`VoiceAdapter::render_response`] output.
    fn render_format(&self) -> RenderFormat;

    async fn make_call(&self, req: &CallRequest) -> Result<CallHandle>;

    async fn get_call(&self, call_id: &str) -> Result<CallInfo>;

    async fn end_call(&self, call_id: &str) -> Result<()>;

    async fn transfer(&self, call_id: &str, destination: &str) -> Result<()>;

    async fn get_recording(&self, recording_id: &str) -> Result<RecordingInfo>;

    async fn delete_recording(&self, recording_id: &str) -> Result<()>;

    /// Render an IVR script to this provider's wire dialect. Total over
    /// all variants; unsupported actions degrade to the nearest
    /// equivalent. This is the only function allowed to emit wire bytes.
    fn render_response(&self, actions: &[IvrAction]) -> Result<Vec<u8>>;

    /// Validate an inbound webhook. `url` is the full public request URL
    /// (Twilio signs it together with the form parameters).
    fn validate_webhook(&self, headers: &WebhookHeaders, url: &str, body: &[u8]) -> bool;

    fn parse_webhook(&self, headers: &WebhookHeaders, body: &[u8]) -> Result<Vec<WebhookEvent>>;
}
