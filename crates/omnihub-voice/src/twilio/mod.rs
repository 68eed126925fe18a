//! Twilio Programmable Voice adapter.

pub mod signature;
pub mod twiml;

use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use omnihub_core::config::{TwilioConfig, PROVIDER_HTTP_TIMEOUT_SECS};
use omnihub_channels::adapter::{
    AdapterCapabilities, CallHandle, CallInfo, CallRequest, CallStatus, RecordingInfo,
    RenderFormat, VoiceAdapter, WebhookHeaders,
};
use omnihub_channels::error::{ChannelError, Result};
use omnihub_channels::event::WebhookEvent;
use omnihub_channels::ivr::IvrAction;
use omnihub_channels::retry::{parse_retry_after, with_backoff, RetryPolicy};

use crate::form;

const TWILIO_API_BASE: &str = "https://api.twilio.com/2010-04-01";

pub struct TwilioAdapter {
    client: reqwest::Client,
    account_sid: String,
    auth_token: String,
    caller_id: Option<String>,
    base_url: String,
    retry: RetryPolicy,
    cancel: CancellationToken,
}

impl TwilioAdapter {
    pub fn new(config: &TwilioConfig) -> Result<Self> {
        if config.account_sid.is_empty() || config.auth_token.is_empty() {
            return Err(ChannelError::Validation(
                "twilio adapter needs account_sid and auth_token".to_string(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(PROVIDER_HTTP_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            account_sid: config.account_sid.clone(),
            auth_token: config.auth_token.clone(),
            caller_id: config.caller_id.clone(),
            base_url: TWILIO_API_BASE.to_string(),
            retry: RetryPolicy::default(),
            cancel: CancellationToken::new(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn calls_url(&self) -> String {
        format!("{}/Accounts/{}/Calls.json", self.base_url, self.account_sid)
    }

    fn call_url(&self, sid: &str) -> String {
        format!(
            "{}/Accounts/{}/Calls/{}.json",
            self.base_url, self.account_sid, sid
        )
    }

    fn recording_url(&self, sid: &str) -> String {
        format!(
            "{}/Accounts/{}/Recordings/{}.json",
            self.base_url, self.account_sid, sid
        )
    }

    async fn post_form(&self, url: &str, params: &[(&str, String)]) -> Result<serde_json::Value> {
        let resp = self
            .client
            .post(url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(params)
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
            return Err(ChannelError::from_status(status, text, retry_after));
        }
        resp.json().await.map_err(|e| ChannelError::Parse(e.to_string()))
    }
}

/// Map Twilio's call status strings to the canonical lifecycle.
fn map_call_status(raw: &str) -> CallStatus {
    match raw {
        "queued" | "initiated" => CallStatus::Queued,
        "ringing" => CallStatus::Ringing,
        "in-progress" | "answered" => CallStatus::InProgress,
        "completed" => CallStatus::Completed,
        "busy" => CallStatus::Busy,
        "no-answer" => CallStatus::NoAnswer,
        "canceled" => CallStatus::Canceled,
        _ => CallStatus::Failed,
    }
}

#[async_trait]
impl VoiceAdapter for TwilioAdapter {
    fn name(&self) -> &str {
        "twilio"
    }

    fn capabilities(&self) -> AdapterCapabilities {
        AdapterCapabilities {
            voice: true,
            ..AdapterCapabilities::default()
        }
    }

    fn render_format(&self) -> RenderFormat {
        RenderFormat::Xml
    }

    async fn make_call(&self, req: &CallRequest) -> Result<CallHandle> {
        let from = req
            .from
            .clone()
            .or_else(|| self.caller_id.clone())
            .ok_or_else(|| ChannelError::Validation("no caller id configured".to_string()))?;

        let mut params = vec![("To", req.to.clone()), ("From", from)];
        if let Some(url) = &req.answer_url {
            params.push(("Url", url.clone()));
        } else if !req.actions.is_empty() {
            let twiml = twiml::render(&req.actions)?;
            params.push(("Twiml", String::from_utf8_lossy(&twiml).into_owned()));
        } else {
            return Err(ChannelError::Validation(
                "make_call needs an answer_url or inline actions".to_string(),
            ));
        }

        debug!(to = %req.to, "starting twilio call");
        let url = self.calls_url();
        let body = with_backoff(self.retry, &self.cancel, "twilio call", || {
            self.post_form(&url, &params)
        })
        .await?;

        let api: CallResource =
            serde_json::from_value(body).map_err(|e| ChannelError::Parse(e.to_string()))?;
        Ok(CallHandle {
            call_id: api.sid,
            status: map_call_status(&api.status),
        })
    }

    async fn get_call(&self, call_id: &str) -> Result<CallInfo> {
        let resp = self
            .client
            .get(self.call_url(call_id))
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .send()
            .await?;
        let status = resp.status().as_u16();
        if status == 404 {
            return Err(ChannelError::NotFound {
                what: "call",
                id: call_id.to_string(),
            });
        }
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ChannelError::from_status(status, text, None));
        }
        let api: CallResource = resp
            .json()
            .await
            .map_err(|e| ChannelError::Parse(e.to_string()))?;
        Ok(CallInfo {
            call_id: api.sid,
            status: map_call_status(&api.status),
            from: api.from,
            to: api.to,
            started_at: api
                .start_time
                .as_deref()
                .and_then(|t| DateTime::parse_from_rfc2822(t).ok())
                .map(|t| t.to_utc()),
            duration_secs: api.duration.and_then(|d| d.parse().ok()),
        })
    }

    async fn end_call(&self, call_id: &str) -> Result<()> {
        self.post_form(
            &self.call_url(call_id),
            &[("Status", "completed".to_string())],
        )
        .await
        .map(|_| ())
    }

    async fn transfer(&self, call_id: &str, destination: &str) -> Result<()> {
        // Redirect the live call to new instructions that dial the target.
        let twiml = twiml::render(&[IvrAction::Dial {
            target: omnihub_channels::ivr::DialTarget::Number {
                number: destination.to_string(),
            },
            timeout_secs: 30,
            caller_id: self.caller_id.clone(),
            record: false,
        }])?;
        self.post_form(
            &self.call_url(call_id),
            &[("Twiml", String::from_utf8_lossy(&twiml).into_owned())],
        )
        .await
        .map(|_| ())
    }

    async fn get_recording(&self, recording_id: &str) -> Result<RecordingInfo> {
        let resp = self
            .client
            .get(self.recording_url(recording_id))
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .send()
            .await?;
        let status = resp.status().as_u16();
        if status == 404 {
            return Err(ChannelError::NotFound {
                what: "recording",
                id: recording_id.to_string(),
            });
        }
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ChannelError::from_status(status, text, None));
        }
        let api: RecordingResource = resp
            .json()
            .await
            .map_err(|e| ChannelError::Parse(e.to_string()))?;
        Ok(RecordingInfo {
            url: format!("{}{}", self.base_url, api.uri.trim_end_matches(".json")),
            recording_id: api.sid,
            duration_secs: api.duration.and_then(|d| d.parse().ok()),
        })
    }

    async fn delete_recording(&self, recording_id: &str) -> Result<()> {
        let resp = self
            .client
            .delete(self.recording_url(recording_id))
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .send()
            .await?;
        let status = resp.status().as_u16();
        if !resp.status().is_success() && status != 404 {
            let text = resp.text().await.unwrap_or_default();
            return Err(ChannelError::from_status(status, text, None));
        }
        Ok(())
    }

    fn render_response(&self, actions: &[IvrAction]) -> Result<Vec<u8>> {
        twiml::render(actions)
    }

    fn validate_webhook(&self, headers: &WebhookHeaders, url: &str, body: &[u8]) -> bool {
        signature::validate(headers, url, body, &self.auth_token)
    }

    fn parse_webhook(&self, _headers: &WebhookHeaders, body: &[u8]) -> Result<Vec<WebhookEvent>> {
        let params = form::parse(body);
        let call_id = params
            .get("CallSid")
            .cloned()
            .ok_or_else(|| ChannelError::Parse("webhook is missing CallSid".to_string()))?;

        if let Some(url) = params.get("RecordingUrl") {
            return Ok(vec![WebhookEvent::Recording {
                call_id,
                url: url.clone(),
                duration_secs: params
                    .get("RecordingDuration")
                    .and_then(|d| d.parse().ok()),
            }]);
        }
        if let Some(text) = params.get("TranscriptionText") {
            return Ok(vec![WebhookEvent::Transcription {
                call_id,
                text: text.clone(),
            }]);
        }

        let digits = params.get("Digits").cloned();
        let speech = params.get("SpeechResult").cloned();
        if digits.is_some() || speech.is_some() {
            return Ok(vec![WebhookEvent::IvrRequest {
                call_id,
                from: params.get("From").cloned().unwrap_or_default(),
                to: params.get("To").cloned().unwrap_or_default(),
                digits,
                speech,
            }]);
        }

        match params.get("CallStatus").map(|s| s.as_str()) {
            Some(s @ ("completed" | "busy" | "no-answer" | "failed" | "canceled" | "queued")) => {
                Ok(vec![WebhookEvent::CallStatus {
                    call_id,
                    status: map_call_status(s),
                    error: params.get("ErrorMessage").cloned(),
                }])
            }
            _ => Ok(vec![WebhookEvent::IvrRequest {
                call_id,
                from: params.get("From").cloned().unwrap_or_default(),
                to: params.get("To").cloned().unwrap_or_default(),
                digits: None,
                speech: None,
            }]),
        }
    }
}

#[derive(Deserialize)]
struct CallResource {
    sid: String,
    status: String,
    #[serde(default)]
    from: Option<String>,
    #[serde(default)]
    to: Option<String>,
    #[serde(default)]
    start_time: Option<String>,
    #[serde(default)]
    duration: Option<String>,
}

#[derive(Deserialize)]
struct RecordingResource {
    sid: String,
    uri: String,
    #[serde(default)]
    duration: Option<String>,
}
