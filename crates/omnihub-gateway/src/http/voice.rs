//! Voice webhook ingress.
//!
//! The adapter's `render_response` is the only producer of response
//! bodies here; the HTTP layer sets the content type from the adapter's
//! declared render format. On internal errors the provider receives an
//! empty action list rather than an error page.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{OriginalUri, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use tracing::{debug, info, warn};

use omnihub_bus::bus::MessageBus;
use omnihub_channels::adapter::{CallStatus, VoiceAdapter, WebhookHeaders};
use omnihub_channels::event::WebhookEvent;
use omnihub_channels::ivr::{GatherInput, IvrAction};
use omnihub_core::message::{ContentType, Message, MessageStatus, StatusUpdate};
use omnihub_core::types::{ChannelType, VoiceProvider};

use crate::app::AppState;
use crate::http::webhook_headers;

fn resolve_adapter(
    state: &AppState,
    params: &HashMap<String, String>,
) -> Option<(VoiceProvider, Arc<dyn VoiceAdapter>)> {
    let name = params
        .get("provider")
        .cloned()
        .or_else(|| state.config.voice.default_provider.clone())?;
    let provider: VoiceProvider = name.parse().ok()?;
    let adapter = state.registry.voice(&provider)?;
    Some((provider, adapter))
}

/// Reconstruct the public URL the provider signed (Twilio covers it).
fn request_url(headers: &HeaderMap, uri: &OriginalUri) -> String {
    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("https");
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    format!("{scheme}://{host}{}", uri.0)
}

fn render(adapter: &dyn VoiceAdapter, actions: &[IvrAction]) -> Response {
    let content_type = adapter.render_format().content_type();
    match adapter.render_response(actions) {
        Ok(body) => ([(header::CONTENT_TYPE, content_type)], body).into_response(),
        Err(e) => {
            warn!(error = %e, "IVR render failed, answering with empty response");
            let empty = adapter.render_response(&[]).unwrap_or_default();
            ([(header::CONTENT_TYPE, content_type)], empty).into_response()
        }
    }
}

/// The fixed answer script: greet, then gather DTMF or speech back to
/// this endpoint.
fn answer_script(state: &AppState) -> Vec<IvrAction> {
    let greeting = state
        .config
        .voice
        .greeting
        .clone()
        .unwrap_or_else(|| "Welcome. How can we help you today?".to_string());
    vec![IvrAction::Gather {
        input: GatherInput::DtmfSpeech,
        timeout_secs: 6,
        num_digits: Some(1),
        finish_on_key: None,
        action_url: "/voice/webhook".to_string(),
        hints: Vec::new(),
        nested: vec![IvrAction::say(greeting)],
    }]
}

fn goodbye_script(state: &AppState) -> Vec<IvrAction> {
    let goodbye = state
        .config
        .voice
        .goodbye
        .clone()
        .unwrap_or_else(|| "Thank you. Goodbye.".to_string());
    vec![IvrAction::say(goodbye), IvrAction::Hangup]
}

fn validated<'a>(
    state: &'a AppState,
    params: &HashMap<String, String>,
    headers: &HeaderMap,
    uri: &OriginalUri,
    body: &[u8],
) -> Result<(VoiceProvider, Arc<dyn VoiceAdapter>, WebhookHeaders), Response> {
    let Some((provider, adapter)) = resolve_adapter(state, params) else {
        return Err((StatusCode::NOT_FOUND, "unknown voice provider").into_response());
    };
    let header_map = webhook_headers(headers);
    let url = request_url(headers, uri);
    if !adapter.validate_webhook(&header_map, &url, body) {
        warn!(provider = provider.as_str(), "voice webhook signature rejected");
        return Err((StatusCode::UNAUTHORIZED, "signature validation failed").into_response());
    }
    Ok((provider, adapter, header_map))
}

/// POST /voice/webhook — IVR request; replies with the provider dialect.
pub async fn webhook(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
    uri: OriginalUri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let (provider, adapter, header_map) =
        match validated(&state, &params, &headers, &uri, &body) {
            Ok(v) => v,
            Err(resp) => return resp,
        };

    let events = match adapter.parse_webhook(&header_map, &body) {
        Ok(e) => e,
        Err(e) => {
            warn!(error = %e, "voice webhook parse failed");
            return (StatusCode::BAD_REQUEST, "unparseable webhook payload").into_response();
        }
    };

    for event in &events {
        if let WebhookEvent::IvrRequest {
            call_id,
            from,
            digits,
            speech,
            ..
        } = event
        {
            let input = speech.clone().or_else(|| digits.clone());
            if let Some(content) = input {
                // Collected input feeds the pipeline as an inbound
                // message on the voice channel. The dedupe key covers
                // the input so provider webhook retries collapse while
                // distinct inputs on the same call pass through.
                let mut msg = Message::inbound(
                    state.config.tenant.id.clone(),
                    String::new(),
                    format!("voice:{}", provider.as_str()),
                    ChannelType::Voice(provider),
                    from.clone(),
                    ContentType::Text,
                    content.clone(),
                );
                msg.external_id = Some(format!("{call_id}:{content}"));
                if let Err(e) = state.bus.publish_inbound(msg).await {
                    warn!(error = %e, "voice inbound publish failed");
                }
                return render(adapter.as_ref(), &goodbye_script(&state));
            }
            debug!(call_id = %call_id, "answering new call");
            return render(adapter.as_ref(), &answer_script(&state));
        }
    }

    // Status-ish events on the IVR path still answer with a valid,
    // empty script.
    render(adapter.as_ref(), &[])
}

/// POST /voice/status — call lifecycle fan-out.
pub async fn status(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
    uri: OriginalUri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let (_, adapter, header_map) = match validated(&state, &params, &headers, &uri, &body) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match adapter.parse_webhook(&header_map, &body) {
        Ok(events) => {
            for event in events {
                if let WebhookEvent::CallStatus {
                    call_id,
                    status,
                    error,
                } = event
                {
                    let message_status = match status {
                        CallStatus::Completed => MessageStatus::Delivered,
                        CallStatus::Busy | CallStatus::NoAnswer | CallStatus::Failed
                        | CallStatus::Canceled => MessageStatus::Failed,
                        _ => continue,
                    };
                    let update = StatusUpdate {
                        message_id: call_id.clone(),
                        external_id: Some(call_id),
                        status: message_status,
                        error_message: error,
                        timestamp: chrono::Utc::now(),
                    };
                    if let Err(e) = state.bus.publish_status(update).await {
                        warn!(error = %e, "call status publish failed");
                    }
                }
            }
            StatusCode::OK.into_response()
        }
        Err(e) => {
            warn!(error = %e, "voice status parse failed");
            (StatusCode::BAD_REQUEST, "unparseable status payload").into_response()
        }
    }
}

/// POST /voice/recording — recording availability fan-out.
pub async fn recording(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
    uri: OriginalUri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let (_, adapter, header_map) = match validated(&state, &params, &headers, &uri, &body) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match adapter.parse_webhook(&header_map, &body) {
        Ok(events) => {
            for event in events {
                if let WebhookEvent::Recording { call_id, url, duration_secs } = event {
                    info!(call_id = %call_id, url = %url, ?duration_secs, "recording available");
                }
            }
            StatusCode::OK.into_response()
        }
        Err(e) => {
            warn!(error = %e, "voice recording parse failed");
            (StatusCode::BAD_REQUEST, "unparseable recording payload").into_response()
        }
    }
}

/// POST /voice/transcription — transcripts enter the pipeline as
/// inbound contact messages.
pub async fn transcription(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
    uri: OriginalUri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let (provider, adapter, header_map) =
        match validated(&state, &params, &headers, &uri, &body) {
            Ok(v) => v,
            Err(resp) => return resp,
        };
    match adapter.parse_webhook(&header_map, &body) {
        Ok(events) => {
            for event in events {
                if let WebhookEvent::Transcription { call_id, text } = event {
                    let mut msg = Message::inbound(
                        state.config.tenant.id.clone(),
                        String::new(),
                        format!("voice:{}", provider.as_str()),
                        ChannelType::Voice(provider),
                        call_id.clone(),
                        ContentType::Text,
                        text,
                    );
                    msg.external_id = Some(format!("{call_id}:transcription"));
                    if let Err(e) = state.bus.publish_inbound(msg).await {
                        warn!(error = %e, "transcription publish failed");
                    }
                }
            }
            StatusCode::OK.into_response()
        }
        Err(e) => {
            warn!(error = %e, "voice transcription parse failed");
            (StatusCode::BAD_REQUEST, "unparseable transcription payload").into_response()
        }
    }
}
