//! Amazon Connect adapter.
//!
//! Outbound calls hit the Connect API with SigV4-signed requests.
//! Inbound events arrive through EventBridge and are trusted by network
//! position, so webhook validation only checks the body shape. The
//! rendered response is a JSON action list consumed by the contact flow.

pub mod sigv4;

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use omnihub_core::config::{AmazonConnectConfig, PROVIDER_HTTP_TIMEOUT_SECS};
use omnihub_channels::adapter::{
    AdapterCapabilities, CallHandle, CallInfo, CallRequest, CallStatus, RecordingInfo,
    RenderFormat, VoiceAdapter, WebhookHeaders,
};
use omnihub_channels::error::{ChannelError, Result};
use omnihub_channels::event::WebhookEvent;
use omnihub_channels::ivr::{DialTarget, GatherInput, IvrAction};
use omnihub_channels::retry::{with_backoff, RetryPolicy};

pub struct ConnectAdapter {
    client: reqwest::Client,
    config: AmazonConnectConfig,
    base_url: String,
    retry: RetryPolicy,
    cancel: CancellationToken,
}

impl ConnectAdapter {
    pub fn new(config: &AmazonConnectConfig) -> Result<Self> {
        if config.instance_id.is_empty() || config.access_key_id.is_empty() {
            return Err(ChannelError::Validation(
                "connect adapter needs instance_id and credentials".to_string(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(PROVIDER_HTTP_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            config: config.clone(),
            base_url: format!("https://connect.{}.amazonaws.com", config.region),
            retry: RetryPolicy::default(),
            cancel: CancellationToken::new(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn signed_request(
        &self,
        method: &str,
        path: &str,
        body: &Value,
    ) -> Result<serde_json::Value> {
        let url = format!("{}{path}", self.base_url);
        let body_bytes =
            serde_json::to_vec(body).map_err(|e| ChannelError::Parse(e.to_string()))?;
        let headers = sigv4::sign_request(
            &sigv4::SigningParams {
                access_key_id: &self.config.access_key_id,
                secret_access_key: &self.config.secret_access_key,
                region: &self.config.region,
                service: "connect",
            },
            method,
            &url,
            &body_bytes,
        )?;

        let mut req = self
            .client
            .request(
                method
                    .parse::<reqwest::Method>()
                    .map_err(|_| ChannelError::Validation(format!("bad method {method}")))?,
                &url,
            )
            .header("content-type", "application/json")
            .body(body_bytes);
        for (k, v) in headers {
            req = req.header(k, v);
        }

        let resp = req.send().await?;
        let status = resp.status().as_u16();
        if status == 404 {
            return Err(ChannelError::NotFound {
                what: "contact",
                id: path.to_string(),
            });
        }
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ChannelError::from_status(status, text, None));
        }
        resp.json()
            .await
            .map_err(|e| ChannelError::Parse(e.to_string()))
    }
}

#[async_trait]
impl VoiceAdapter for ConnectAdapter {
    fn name(&self) -> &str {
        "amazon_connect"
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
        let flow_id = self.config.contact_flow_id.as_deref().ok_or_else(|| {
            ChannelError::Validation("no contact_flow_id configured".to_string())
        })?;
        let mut body = json!({
            "InstanceId": self.config.instance_id,
            "ContactFlowId": flow_id,
            "DestinationPhoneNumber": req.to,
        });
        if let Some(from) = &req.from {
            body["SourcePhoneNumber"] = json!(from);
        }
        if let Some(queue) = &self.config.queue_id {
            body["QueueId"] = json!(queue);
        }

        debug!(to = %req.to, "starting connect outbound contact");
        let resp = with_backoff(self.retry, &self.cancel, "connect call", || {
            self.signed_request("PUT", "/contact/outbound-voice", &body)
        })
        .await?;

        let call_id = resp
            .get("ContactId")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ChannelError::Parse("response carried no ContactId".to_string()))?
            .to_string();
        Ok(CallHandle {
            call_id,
            status: CallStatus::Queued,
        })
    }

    async fn get_call(&self, call_id: &str) -> Result<CallInfo> {
        let resp = self
            .signed_request(
                "POST",
                &format!("/contacts/{}/{}", self.config.instance_id, call_id),
                &json!({}),
            )
            .await?;
        let attrs = resp.get("Contact").cloned().unwrap_or_default();
        Ok(CallInfo {
            call_id: call_id.to_string(),
            status: CallStatus::InProgress,
            from: attrs
                .get("CustomerEndpoint")
                .and_then(|e| e.get("Address"))
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
            to: None,
            started_at: None,
            duration_secs: None,
        })
    }

    async fn end_call(&self, call_id: &str) -> Result<()> {
        self.signed_request(
            "POST",
            "/contact/stop",
            &json!({
                "ContactId": call_id,
                "InstanceId": self.config.instance_id,
            }),
        )
        .await
        .map(|_| ())
    }

    async fn transfer(&self, call_id: &str, destination: &str) -> Result<()> {
        self.signed_request(
            "POST",
            "/contact/transfer",
            &json!({
                "ContactId": call_id,
                "InstanceId": self.config.instance_id,
                "QueueId": destination,
            }),
        )
        .await
        .map(|_| ())
    }

    async fn get_recording(&self, recording_id: &str) -> Result<RecordingInfo> {
        // Connect drops recordings in S3; the id is the object URL
        // delivered by the contact record event.
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
        let rendered: Vec<Value> = actions.iter().filter_map(render_action).collect();
        serde_json::to_vec(&rendered).map_err(|e| ChannelError::Parse(e.to_string()))
    }

    /// EventBridge delivery is trusted by network position; the payload
    /// must still look like a Connect event.
    fn validate_webhook(&self, _headers: &WebhookHeaders, _url: &str, body: &[u8]) -> bool {
        serde_json::from_slice::<Value>(body)
            .map(|v| v.get("detail").is_some() || v.get("ContactId").is_some())
            .unwrap_or(false)
    }

    fn parse_webhook(&self, _headers: &WebhookHeaders, body: &[u8]) -> Result<Vec<WebhookEvent>> {
        let payload: Value = serde_json::from_slice(body)
            .map_err(|e| ChannelError::Parse(format!("connect webhook: {e}")))?;
        let detail = payload.get("detail").unwrap_or(&payload);

        let call_id = detail
            .get("contactId")
            .or_else(|| detail.get("ContactId"))
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        let status = match detail
            .get("eventType")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
        {
            "INITIATED" | "QUEUED" => CallStatus::Queued,
            "CONNECTED_TO_AGENT" | "CONNECTED" => CallStatus::InProgress,
            "DISCONNECTED" => CallStatus::Completed,
            _ => {
                return Ok(vec![WebhookEvent::IvrRequest {
                    call_id,
                    from: detail
                        .get("customerEndpoint")
                        .and_then(|e| e.get("address"))
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string(),
                    to: String::new(),
                    digits: detail
                        .get("storedCustomerInput")
                        .and_then(|v| v.as_str())
                        .map(|s| s.to_string()),
                    speech: None,
                }])
            }
        };
        Ok(vec![WebhookEvent::CallStatus {
            call_id,
            status,
            error: None,
        }])
    }
}

/// Map an IVR action to a simplified contact-flow action object. `None`
/// drops variants the flow runtime handles implicitly (hangup ends the
/// flow when the action list runs out).
fn render_action(action: &IvrAction) -> Option<Value> {
    match action {
        IvrAction::Say { text, lang, .. } => Some(json!({
            "Type": "MessageParticipant",
            "Parameters": { "Text": text, "LanguageCode": lang },
        })),
        IvrAction::Play { url, .. } => Some(json!({
            "Type": "MessageParticipant",
            "Parameters": { "AudioPrompt": url },
        })),
        IvrAction::Gather {
            input,
            timeout_secs,
            num_digits,
            nested,
            ..
        } => {
            let prompt = nested.iter().find_map(|a| match a {
                IvrAction::Say { text, .. } => Some(text.clone()),
                _ => None,
            });
            Some(json!({
                "Type": "GetParticipantInput",
                "Parameters": {
                    "Text": prompt.unwrap_or_default(),
                    "InputTimeLimitSeconds": timeout_secs,
                    "MaxDigits": num_digits.unwrap_or(1),
                    "DTMF": matches!(input, GatherInput::Dtmf | GatherInput::DtmfSpeech),
                },
            }))
        }
        IvrAction::Record { max_length_secs, .. } => Some(json!({
            "Type": "StartRecording",
            "Parameters": { "MaxLengthSeconds": max_length_secs },
        })),
        IvrAction::Dial { target, .. } => match target {
            DialTarget::Number { number } => Some(json!({
                "Type": "TransferToPhoneNumber",
                "Parameters": { "PhoneNumber": number },
            })),
            DialTarget::Sip { uri } => Some(json!({
                "Type": "TransferToPhoneNumber",
                "Parameters": { "PhoneNumber": uri },
            })),
            DialTarget::Queue { name } => Some(json!({
                "Type": "TransferToQueue",
                "Parameters": { "QueueName": name },
            })),
        },
        IvrAction::Hangup => Some(json!({ "Type": "DisconnectParticipant", "Parameters": {} })),
        IvrAction::Pause { length_secs } => Some(json!({
            "Type": "Wait",
            "Parameters": { "Seconds": length_secs },
        })),
        IvrAction::Redirect { url, .. } => Some(json!({
            "Type": "InvokeExternalResource",
            "Parameters": { "Uri": url },
        })),
        IvrAction::Queue { name, .. } => Some(json!({
            "Type": "TransferToQueue",
            "Parameters": { "QueueName": name },
        })),
        // No peer-to-peer conference primitive; nearest equivalent is a
        // queue transfer into the named queue.
        IvrAction::Conference { name, .. } => Some(json!({
            "Type": "TransferToQueue",
            "Parameters": { "QueueName": name },
        })),
    }
}
