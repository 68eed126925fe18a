//! FreeSWITCH adapter: ESL for call control, JSON dialplan steps for
//! IVR responses.

pub mod dialplan;
pub mod esl;

use std::sync::Arc;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use omnihub_core::config::FreeswitchConfig;
use omnihub_channels::adapter::{
    AdapterCapabilities, CallHandle, CallInfo, CallRequest, CallStatus, RecordingInfo,
    RenderFormat, VoiceAdapter, WebhookHeaders,
};
use omnihub_channels::error::{ChannelError, Result};
use omnihub_channels::event::WebhookEvent;
use omnihub_channels::ivr::IvrAction;

use esl::EslClient;

type HmacSha256 = Hmac<Sha256>;

pub struct FreeswitchAdapter {
    esl: Arc<EslClient>,
    gateway: String,
    recordings_url: Option<String>,
    webhook_secret: Option<String>,
}

impl FreeswitchAdapter {
    pub fn new(config: &FreeswitchConfig) -> Result<Self> {
        if config.esl_host.is_empty() || config.esl_password.is_empty() {
            return Err(ChannelError::Validation(
                "freeswitch adapter needs esl_host and esl_password".to_string(),
            ));
        }
        Ok(Self {
            esl: Arc::new(EslClient::new(config)),
            gateway: config
                .gateway
                .clone()
                .unwrap_or_else(|| "default".to_string()),
            recordings_url: config.recordings_url.clone(),
            webhook_secret: config.webhook_secret.clone(),
        })
    }

    pub fn esl(&self) -> Arc<EslClient> {
        self.esl.clone()
    }
}

#[async_trait]
impl VoiceAdapter for FreeswitchAdapter {
    fn name(&self) -> &str {
        "freeswitch"
    }

    fn capabilities(&self) -> AdapterCapabilities {
        AdapterCapabilities {
            voice: true,
            ..AdapterCapabilities::default()
        }
    }

    fn render_format(&self) -> RenderFormat {
        RenderFormat::Json
    }

    async fn make_call(&self, req: &CallRequest) -> Result<CallHandle> {
        let origination = match &req.from {
            Some(from) => format!("{{origination_caller_id_number={from}}}"),
            None => String::new(),
        };
        let body = self
            .esl
            .api(&format!(
                "originate {origination}sofia/gateway/{}/{} &park()",
                self.gateway, req.to
            ))
            .await?;
        if !body.starts_with("+OK") {
            return Err(ChannelError::Permanent {
                status: 0,
                message: format!("originate refused: {}", body.trim()),
            });
        }
        let call_id = body.trim_start_matches("+OK").trim().to_string();
        Ok(CallHandle {
            call_id,
            status: CallStatus::Queued,
        })
    }

    async fn get_call(&self, call_id: &str) -> Result<CallInfo> {
        let body = self.esl.api(&format!("uuid_exists {call_id}")).await?;
        if body.trim() != "true" {
            return Err(ChannelError::NotFound {
                what: "call",
                id: call_id.to_string(),
            });
        }
        Ok(CallInfo {
            call_id: call_id.to_string(),
            status: CallStatus::InProgress,
            from: None,
            to: None,
            started_at: None,
            duration_secs: None,
        })
    }

    async fn end_call(&self, call_id: &str) -> Result<()> {
        let body = self.esl.api(&format!("uuid_kill {call_id}")).await?;
        if body.starts_with("-ERR") {
            return Err(ChannelError::NotFound {
                what: "call",
                id: call_id.to_string(),
            });
        }
        Ok(())
    }

    async fn transfer(&self, call_id: &str, destination: &str) -> Result<()> {
        let body = self
            .esl
            .api(&format!("uuid_transfer {call_id} {destination}"))
            .await?;
        if body.starts_with("-ERR") {
            return Err(ChannelError::NotFound {
                what: "call",
                id: call_id.to_string(),
            });
        }
        Ok(())
    }

    async fn get_recording(&self, recording_id: &str) -> Result<RecordingInfo> {
        let url = match &self.recordings_url {
            Some(base) => format!("{}/{recording_id}.wav", base.trim_end_matches('/')),
            None => recording_id.to_string(),
        };
        Ok(RecordingInfo {
            recording_id: recording_id.to_string(),
            url,
            duration_secs: None,
        })
    }

    async fn delete_recording(&self, _recording_id: &str) -> Result<()> {
        Err(ChannelError::NotSupported {
            operation: "delete_recording",
        })
    }

    fn render_response(&self, actions: &[IvrAction]) -> Result<Vec<u8>> {
        dialplan::render(actions)
    }

    fn validate_webhook(&self, headers: &WebhookHeaders, _url: &str, body: &[u8]) -> bool {
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
            .map_err(|e| ChannelError::Parse(format!("freeswitch webhook: {e}")))?;

        let call_id = payload
            .get("Unique-ID")
            .or_else(|| payload.get("uuid"))
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let event_name = payload
            .get("Event-Name")
            .or_else(|| payload.get("event"))
            .and_then(|v| v.as_str())
            .unwrap_or_default();

        match event_name {
            "CHANNEL_HANGUP" | "CHANNEL_HANGUP_COMPLETE" => Ok(vec![WebhookEvent::CallStatus {
                call_id,
                status: CallStatus::Completed,
                error: None,
            }]),
            "DTMF" => Ok(vec![WebhookEvent::IvrRequest {
                call_id,
                from: header_str(&payload, "Caller-Caller-ID-Number"),
                to: header_str(&payload, "Caller-Destination-Number"),
                digits: payload
                    .get("DTMF-Digit")
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string()),
                speech: None,
            }]),
            "RECORD_STOP" => Ok(vec![WebhookEvent::Recording {
                call_id,
                url: header_str(&payload, "Record-File-Path"),
                duration_secs: None,
            }]),
            _ => Ok(vec![WebhookEvent::IvrRequest {
                call_id,
                from: header_str(&payload, "Caller-Caller-ID-Number"),
                to: header_str(&payload, "Caller-Destination-Number"),
                digits: None,
                speech: None,
            }]),
        }
    }
}

fn header_str(payload: &serde_json::Value, key: &str) -> String {
    payload
        .get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter(secret: Option<&str>) -> FreeswitchAdapter {
        FreeswitchAdapter::new(&FreeswitchConfig {
            esl_host: "127.0.0.1".to_string(),
            esl_port: 8021,
            esl_password: "ClueCon".to_string(),
            gateway: Some("carrier1".to_string()),
            recordings_url: Some("https://pbx.example.com/recordings".to_string()),
            webhook_secret: secret.map(|s| s.to_string()),
        })
        .unwrap()
    }

    #[test]
    fn webhook_signature_is_required_when_configured() {
        let a = adapter(Some("hunter2"));
        let body = br#"{"Event-Name":"DTMF"}"#;
        assert!(!a.validate_webhook(&WebhookHeaders::new(), "", body));

        let mut mac = HmacSha256::new_from_slice(b"hunter2").unwrap();
        mac.update(body);
        let mut headers = WebhookHeaders::new();
        headers.insert(
            "x-webhook-signature".to_string(),
            hex::encode(mac.finalize().into_bytes()),
        );
        assert!(a.validate_webhook(&headers, "", body));
    }

    #[test]
    fn parse_webhook_hangup_and_dtmf() {
        let a = adapter(None);
        let headers = WebhookHeaders::new();

        let events = a
            .parse_webhook(
                &headers,
                br#"{"Event-Name":"CHANNEL_HANGUP","Unique-ID":"u1"}"#,
            )
            .unwrap();
        assert!(matches!(
            &events[0],
            WebhookEvent::CallStatus { status: CallStatus::Completed, .. }
        ));

        let events = a
            .parse_webhook(
                &headers,
                br#"{"Event-Name":"DTMF","Unique-ID":"u1","DTMF-Digit":"7"}"#,
            )
            .unwrap();
        assert!(matches!(
            &events[0],
            WebhookEvent::IvrRequest { digits: Some(d), .. } if d == "7"
        ));
    }

    #[tokio::test]
    async fn recording_url_joins_configured_base() {
        let a = adapter(None);
        let info = a.get_recording("rec-1").await.unwrap();
        assert_eq!(info.url, "https://pbx.example.com/recordings/rec-1.wav");
    }
}
