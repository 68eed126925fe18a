//! WhatsApp Business Cloud adapter (Graph API).

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use omnihub_core::config::{
    WhatsAppConfig, PROVIDER_HTTP_TIMEOUT_SECS, WHATSAPP_BURST, WHATSAPP_RATE_PER_SEC,
};
use omnihub_channels::adapter::{
    AdapterCapabilities, MediaDownload, MessagingAdapter, SendReceipt, WebhookHeaders,
};
use omnihub_channels::error::{ChannelError, Result};
use omnihub_channels::event::WebhookEvent;
use omnihub_channels::limiter::TokenBucket;
use omnihub_channels::retry::{parse_retry_after, with_backoff, RetryPolicy};

use crate::signature;
use crate::webhook::{self, ChannelIdentity};

const GRAPH_BASE_URL: &str = "https://graph.facebook.com";

/// Messaging adapter over the Graph API, one instance per registered
/// channel. Shares its rate limiter across all tasks that send through it.
#[derive(Debug)]
pub struct CloudApiAdapter {
    client: reqwest::Client,
    identity: ChannelIdentity,
    access_token: String,
    phone_number_id: String,
    webhook_secret: String,
    api_version: String,
    base_url: String,
    limiter: TokenBucket,
    retry: RetryPolicy,
    cancel: CancellationToken,
}

impl CloudApiAdapter {
    pub fn new(identity: ChannelIdentity, config: &WhatsAppConfig) -> Result<Self> {
        if config.access_token.is_empty() || config.phone_number_id.is_empty() {
            return Err(ChannelError::Validation(
                "whatsapp adapter needs access_token and phone_number_id".to_string(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(PROVIDER_HTTP_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            identity,
            access_token: config.access_token.clone(),
            phone_number_id: config.phone_number_id.clone(),
            webhook_secret: config.webhook_secret.clone(),
            api_version: config.api_version.clone(),
            base_url: GRAPH_BASE_URL.to_string(),
            limiter: TokenBucket::new(WHATSAPP_RATE_PER_SEC, WHATSAPP_BURST),
            retry: RetryPolicy::default(),
            cancel: CancellationToken::new(),
        })
    }

    /// Override the Graph endpoint, for tests against a local server.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn phone_number_id(&self) -> &str {
        &self.phone_number_id
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/{}/{}/messages",
            self.base_url, self.api_version, self.phone_number_id
        )
    }

    fn media_url(&self, media_id: &str) -> String {
        format!("{}/{}/{}", self.base_url, self.api_version, media_id)
    }

    async fn post_messages(&self, wire: &serde_json::Value) -> Result<SendReceipt> {
        let resp = self
            .client
            .post(self.messages_url())
            .bearer_auth(&self.access_token)
            .json(wire)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let retry_after = parse_retry_after(
                resp.headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok()),
            );
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "graph API send failed");
            return Err(ChannelError::from_status(status, text, retry_after));
        }

        let api: SendResponse = resp
            .json()
            .await
            .map_err(|e| ChannelError::Parse(e.to_string()))?;
        let external_id = api
            .messages
            .into_iter()
            .next()
            .map(|m| m.id)
            .ok_or_else(|| ChannelError::Parse("send response carried no message id".to_string()))?;
        Ok(SendReceipt { external_id })
    }
}

#[async_trait]
impl MessagingAdapter for CloudApiAdapter {
    fn name(&self) -> &str {
        "whatsapp_cloud"
    }

    fn capabilities(&self) -> AdapterCapabilities {
        AdapterCapabilities {
            messaging: true,
            voice: false,
            media: true,
            interactive: true,
            templates: true,
            read_receipts: true,
        }
    }

    async fn send_message(&self, wire: &serde_json::Value) -> Result<SendReceipt> {
        self.limiter.acquire(&self.cancel).await?;
        debug!(to = %wire.get("to").and_then(|v| v.as_str()).unwrap_or(""), "sending whatsapp message");
        with_backoff(self.retry, &self.cancel, "whatsapp send", || {
            self.post_messages(wire)
        })
        .await
    }

    async fn mark_as_read(&self, external_id: &str) -> Result<()> {
        self.limiter.acquire(&self.cancel).await?;
        let body = serde_json::json!({
            "messaging_product": "whatsapp",
            "status": "read",
            "message_id": external_id,
        });
        let resp = self
            .client
            .post(self.messages_url())
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await?;
        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ChannelError::from_status(status, text, None));
        }
        Ok(())
    }

    async fn upload_media(&self, bytes: Vec<u8>, mime_type: &str) -> Result<String> {
        self.limiter.acquire(&self.cancel).await?;
        let url = format!(
            "{}/{}/{}/media",
            self.base_url, self.api_version, self.phone_number_id
        );
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name("upload")
            .mime_str(mime_type)
            .map_err(|e| ChannelError::Validation(format!("bad mime type: {e}")))?;
        let form = reqwest::multipart::Form::new()
            .text("messaging_product", "whatsapp")
            .part("file", part);

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.access_token)
            .multipart(form)
            .send()
            .await?;
        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ChannelError::from_status(status, text, None));
        }
        let api: MediaUploadResponse = resp
            .json()
            .await
            .map_err(|e| ChannelError::Parse(e.to_string()))?;
        Ok(api.id)
    }

    async fn download_media(&self, media_id: &str) -> Result<MediaDownload> {
        // Two hops: resolve the media id to a short-lived URL, then fetch
        // the bytes with the same bearer token.
        let resp = self
            .client
            .get(self.media_url(media_id))
            .bearer_auth(&self.access_token)
            .send()
            .await?;
        let status = resp.status().as_u16();
        if status == 404 {
            return Err(ChannelError::NotFound {
                what: "media",
                id: media_id.to_string(),
            });
        }
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ChannelError::from_status(status, text, None));
        }
        let meta: MediaMetaResponse = resp
            .json()
            .await
            .map_err(|e| ChannelError::Parse(e.to_string()))?;

        let bytes_resp = self
            .client
            .get(&meta.url)
            .bearer_auth(&self.access_token)
            .send()
            .await?;
        let status = bytes_resp.status().as_u16();
        if !bytes_resp.status().is_success() {
            let text = bytes_resp.text().await.unwrap_or_default();
            return Err(ChannelError::from_status(status, text, None));
        }
        let bytes = bytes_resp.bytes().await?.to_vec();
        Ok(MediaDownload {
            bytes,
            mime_type: meta.mime_type.unwrap_or_default(),
            filename: None,
        })
    }

    fn validate_webhook(&self, headers: &WebhookHeaders, body: &[u8]) -> bool {
        signature::validate_signature(headers, body, &self.webhook_secret)
    }

    fn parse_webhook(&self, _headers: &WebhookHeaders, body: &[u8]) -> Result<Vec<WebhookEvent>> {
        webhook::parse(&self.identity, body)
    }
}

#[derive(Deserialize)]
struct SendResponse {
    #[serde(default)]
    messages: Vec<SentMessage>,
}

#[derive(Deserialize)]
struct SentMessage {
    id: String,
}

#[derive(Deserialize)]
struct MediaUploadResponse {
    id: String,
}

#[derive(Deserialize)]
struct MediaMetaResponse {
    url: String,
    mime_type: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> CloudApiAdapter {
        CloudApiAdapter::new(
            ChannelIdentity {
                tenant_id: "t1".to_string(),
                channel_id: "ch1".to_string(),
            },
            &WhatsAppConfig {
                access_token: "token".to_string(),
                phone_number_id: "106540352242922".to_string(),
                business_id: None,
                verify_token: "verify".to_string(),
                webhook_secret: "secret".to_string(),
                api_version: "v21.0".to_string(),
                default_template: None,
                template_language: "en".to_string(),
                coexistence_enabled: false,
            },
        )
        .unwrap()
    }

    #[test]
    fn missing_credentials_fail_initialization() {
        let err = CloudApiAdapter::new(
            ChannelIdentity {
                tenant_id: "t".to_string(),
                channel_id: "c".to_string(),
            },
            &WhatsAppConfig {
                access_token: String::new(),
                phone_number_id: String::new(),
                business_id: None,
                verify_token: String::new(),
                webhook_secret: String::new(),
                api_version: "v21.0".to_string(),
                default_template: None,
                template_language: "en".to_string(),
                coexistence_enabled: false,
            },
        )
        .unwrap_err();
        assert!(matches!(err, ChannelError::Validation(_)));
    }

    #[test]
    fn urls_embed_api_version_and_phone_number() {
        let a = adapter();
        assert_eq!(
            a.messages_url(),
            "https://graph.facebook.com/v21.0/106540352242922/messages"
        );
        assert_eq!(a.media_url("m1"), "https://graph.facebook.com/v21.0/m1");
    }

    #[test]
    fn webhook_validation_uses_configured_secret() {
        let a = adapter();
        let body = br#"{"object":"whatsapp_business_account","entry":[]}"#;
        let mut headers = WebhookHeaders::new();
        headers.insert(
            "x-hub-signature-256".to_string(),
            signature::sign(body, "secret"),
        );
        assert!(a.validate_webhook(&headers, body));
        assert!(!a.validate_webhook(&headers, b"other"));
    }
}
