//! Asterisk adapter: AMI for call control, AGI text for IVR responses.
//!
//! Webhooks are authenticated with a shared-secret HMAC over the body;
//! a missing signature is always a rejection, including in development.

pub mod agi;
pub mod ami;

use std::sync::Arc;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use omnihub_core::config::AsteriskConfig;
use omnihub_channels::adapter::{
    AdapterCapabilities, CallHandle, CallInfo, CallRequest, CallStatus, RecordingInfo,
    RenderFormat, VoiceAdapter, WebhookHeaders,
};
use omnihub_channels::error::{ChannelError, Result};
use omnihub_channels::event::WebhookEvent;
use omnihub_channels::ivr::IvrAction;

use ami::AmiClient;

type HmacSha256 = Hmac<Sha256>;

pub struct AsteriskAdapter {
    ami: Arc<AmiClient>,
    context: String,
    webhook_secret: Option<String>,
}

impl AsteriskAdapter {
    pub fn new(config: &AsteriskConfig) -> Result<Self> {
        if config.ami_host.is_empty() || config.ami_user.is_empty() {
            return Err(ChannelError::Validation(
                "asterisk adapter needs ami_host and ami_user".to_string(),
            ));
        }
        Ok(Self {
            ami: Arc::new(AmiClient::new(config)),
            context: config.context.clone(),
            webhook_secret: config.webhook_secret.clone(),
        })
    }

    /// AMI client handle for the connection supervisor.
    pub fn ami(&self) -> Arc<AmiClient> {
        self.ami.clone()
    }
}

fn map_channel_state(raw: &str) -> CallStatus {
    match raw {
        "0" | "1" | "2" => CallStatus::Queued, // Down/Reserved/OffHook
        "4" | "5" => CallStatus::Ringing,      // Ring/Ringing
        "6" => CallStatus::InProgress,         // Up
        _ => CallStatus::Failed,
    }
}

#[async_trait]
impl VoiceAdapter for AsteriskAdapter {
    fn name(&self) -> &str {
        "asterisk"
    }

    fn capabilities(&self) -> AdapterCapabilities {
        AdapterCapabilities {
            voice: true,
            ..AdapterCapabilities::default()
        }
    }

    fn render_format(&self) -> RenderFormat {
        RenderFormat::Text
    }

    async fn make_call(&self, req: &CallRequest) -> Result<CallHandle> {
        let channel = format!("PJSIP/{}", req.to);
        let mut params: Vec<(&str, &str)> = vec![
            ("Channel", channel.as_str()),
            ("Context", self.context.as_str()),
            ("Exten", "s"),
            ("Priority", "1"),
            ("Async", "true"),
        ];
        let caller_id = req.from.clone().unwrap_or_default();
        if !caller_id.is_empty() {
            params.push(("CallerID", caller_id.as_str()));
        }

        let resp = self.ami.send_action("Originate", &params).await?;
        if !resp.is_success() {
            return Err(ChannelError::Permanent {
                status: 0,
                message: format!(
                    "Originate refused: {}",
                    resp.get("Message").unwrap_or("no message")
                ),
            });
        }
        Ok(CallHandle {
            call_id: resp
                .get("Uniqueid")
                .map(|s| s.to_string())
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            status: CallStatus::Queued,
        })
    }

    async fn get_call(&self, call_id: &str) -> Result<CallInfo> {
        let resp = self
            .ami
            .send_action("Status", &[("Channel", call_id)])
            .await?;
        if !resp.is_success() {
            return Err(ChannelError::NotFound {
                what: "call",
                id: call_id.to_string(),
            });
        }
        Ok(CallInfo {
            call_id: call_id.to_string(),
            status: resp
                .get("ChannelState")
                .map(map_channel_state)
                .unwrap_or(CallStatus::Failed),
            from: resp.get("CallerIDNum").map(|s| s.to_string()),
            to: resp.get("ConnectedLineNum").map(|s| s.to_string()),
            started_at: None,
            duration_secs: resp.get("Seconds").and_then(|s| s.parse().ok()),
        })
    }

    async fn end_call(&self, call_id: &str) -> Result<()> {
        let resp = self
            .ami
            .send_action("Hangup", &[("Channel", call_id)])
            .await?;
        if !resp.is_success() {
            return Err(ChannelError::NotFound {
                what: "call",
                id: call_id.to_string(),
            });
        }
        Ok(())
    }

    async fn transfer(&self, call_id: &str, destination: &str) -> Result<()> {
        let resp = self
            .ami
            .send_action(
                "Redirect",
                &[
                    ("Channel", call_id),
                    ("Context", self.context.as_str()),
                    ("Exten", destination),
                    ("Priority", "1"),
                ],
            )
            .await?;
        if !resp.is_success() {
            return Err(ChannelError::NotFound {
                what: "call",
                id: call_id.to_string(),
            });
        }
        Ok(())
    }

    async fn get_recording(&self, recording_id: &str) -> Result<RecordingInfo> {
        // Recordings land on the Asterisk filesystem; the id is the
        // monitor path announced in the CDR event.
        Ok(RecordingInfo {
            recording_id: recording_id.to_string(),
            url: recording_id.to_string(),
            duration_secs: None,
        })
    }

    async fn delete_recording(&self, _recording_id: &str) -> Result<()> {
        Err(ChannelError::NotSupported {
            operation: "delete_recording",
        })
    }

    fn render_response(&self, actions: &[IvrAction]) -> Result<Vec<u8>> {
        agi::render(actions)
    }

    fn validate_webhook(&self, headers: &WebhookHeaders, _url: &str, body: &[u8]) -> bool {
        // Shared-secret HMAC over the body. No configured secret means
        // network-position trust was chosen explicitly; with a secret,
        // a missing header is always a rejection.
        let Some(secret) = self.webhook_secret.as_deref() else {
            return true;
        };
        let Some(sig_hex) = headers.get("x-webhook-signature") else {
            return false;
        };
        let Ok(expected) = hex::decode(sig_hex) else {
            return false;
        };
        let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
            return false;
        };
        mac.update(body);
        mac.verify_slice(&expected).is_ok()
    }

    fn parse_webhook(&self, _headers: &WebhookHeaders, body: &[u8]) -> Result<Vec<WebhookEvent>> {
        let payload: serde_json::Value = serde_json::from_slice(body)
            .map_err(|e| ChannelError::Parse(format!("asterisk webhook: {e}")))?;

        let call_id = payload
            .get("uniqueid")
            .or_else(|| payload.get("channel"))
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        match payload.get("event").and_then(|v| v.as_str()) {
            Some("Hangup") => Ok(vec![WebhookEvent::CallStatus {
                call_id,
                status: CallStatus::Completed,
                error: None,
            }]),
            Some("DTMF") | Some("DTMFEnd") => Ok(vec![WebhookEvent::IvrRequest {
                call_id,
                from: payload
                    .get("calleridnum")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                to: payload
                    .get("exten")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                digits: payload
                    .get("digit")
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string()),
                speech: None,
            }]),
            _ => Ok(vec![WebhookEvent::IvrRequest {
                call_id,
                from: payload
                    .get("calleridnum")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                to: payload
                    .get("exten")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                digits: None,
                speech: None,
            }]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(secret: Option<&str>) -> AsteriskConfig {
        AsteriskConfig {
            ami_host: "127.0.0.1".to_string(),
            ami_port: 5038,
            ami_user: "admin".to_string(),
            ami_password: "pw".to_string(),
            context: "default".to_string(),
            webhook_secret: secret.map(|s| s.to_string()),
        }
    }

    fn signed_headers(body: &[u8], secret: &str) -> WebhookHeaders {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        let mut h = WebhookHeaders::new();
        h.insert(
            "x-webhook-signature".to_string(),
            hex::encode(mac.finalize().into_bytes()),
        );
        h
    }

    #[test]
    fn missing_signature_is_rejected_when_secret_is_set() {
        let a = AsteriskAdapter::new(&config(Some("s3cret"))).unwrap();
        let body = br#"{"event":"Hangup","uniqueid":"u1"}"#;
        // No dev-mode bypass: absent header fails.
        assert!(!a.validate_webhook(&WebhookHeaders::new(), "", body));
        assert!(a.validate_webhook(&signed_headers(body, "s3cret"), "", body));
        assert!(!a.validate_webhook(&signed_headers(body, "wrong"), "", body));
    }

    #[test]
    fn parse_webhook_maps_hangup_and_dtmf() {
        let a = AsteriskAdapter::new(&config(None)).unwrap();
        let headers = WebhookHeaders::new();

        let events = a
            .parse_webhook(&headers, br#"{"event":"Hangup","uniqueid":"u1"}"#)
            .unwrap();
        assert!(matches!(
            &events[0],
            WebhookEvent::CallStatus { status: CallStatus::Completed, .. }
        ));

        let events = a
            .parse_webhook(
                &headers,
                br#"{"event":"DTMF","uniqueid":"u1","digit":"5","calleridnum":"100"}"#,
            )
            .unwrap();
        assert!(matches!(
            &events[0],
            WebhookEvent::IvrRequest { digits: Some(d), .. } if d == "5"
        ));
    }
}
