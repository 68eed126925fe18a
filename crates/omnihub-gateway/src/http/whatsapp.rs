//! WhatsApp webhook ingress — GET challenge + POST delivery.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde_json::json;
use tracing::{debug, info, warn};

use omnihub_bus::bus::MessageBus;
use omnihub_channels::adapter::MessagingAdapter;
use omnihub_channels::event::WebhookEvent;
use omnihub_whatsapp::signature::verify_challenge;

use crate::app::{AppState, WHATSAPP_CHANNEL_ID};
use crate::http::webhook_headers;

/// GET /api/v1/webhooks/whatsapp — Meta subscribe handshake.
///
/// 200 echoing `hub.challenge` iff the verify token matches; 403
/// otherwise.
pub async fn challenge(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let Some(config) = &state.config.whatsapp else {
        return (StatusCode::NOT_FOUND, String::new());
    };

    match verify_challenge(
        params.get("hub.mode").map(|s| s.as_str()),
        params.get("hub.verify_token").map(|s| s.as_str()),
        params.get("hub.challenge").map(|s| s.as_str()),
        &config.verify_token,
    ) {
        Some(challenge) => {
            info!("whatsapp webhook challenge accepted");
            (StatusCode::OK, challenge.to_string())
        }
        None => {
            warn!("whatsapp webhook challenge refused");
            (StatusCode::FORBIDDEN, String::new())
        }
    }
}

/// POST /api/v1/webhooks/whatsapp — message/status/echo delivery.
///
/// 401 on signature failure, 400 on parse failure, 200 once the events
/// are on the bus. Consumer-side failures never reach this response.
pub async fn webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let Some(adapter) = &state.whatsapp else {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "whatsapp channel is not configured"})),
        );
    };

    let header_map = webhook_headers(&headers);
    if !adapter.validate_webhook(&header_map, &body) {
        warn!("whatsapp webhook signature rejected");
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "signature validation failed"})),
        );
    }

    let events = match adapter.parse_webhook(&header_map, &body) {
        Ok(events) => events,
        Err(e) => {
            warn!(error = %e, "whatsapp webhook parse failed");
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": "unparseable webhook payload"})),
            );
        }
    };

    let mut accepted = 0usize;
    for event in events {
        match event {
            WebhookEvent::Message(msg) => {
                // A customer-initiated message opens the 24h session
                // window before the pipeline sees it.
                let phone_number_id = msg
                    .metadata
                    .get("phone_number_id")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                if let Err(e) = state.sessions.record_customer_message(
                    &phone_number_id,
                    &msg.contact_id,
                    msg.created_at,
                ) {
                    warn!(error = %e, "session window update failed");
                }
                if let Err(e) = state.bus.publish_inbound(*msg).await {
                    warn!(error = %e, "inbound publish failed");
                } else {
                    accepted += 1;
                }
            }
            WebhookEvent::Status(update) => {
                if let Err(e) = state.bus.publish_status(update).await {
                    warn!(error = %e, "status publish failed");
                } else {
                    accepted += 1;
                }
            }
            WebhookEvent::Echo { timestamp, .. } => {
                match state.coexistence.record_echo(WHATSAPP_CHANNEL_ID, timestamp) {
                    Ok(Some(transition)) => {
                        info!(to = transition.to.as_str(), "coexistence revived by echo");
                    }
                    Ok(None) => {}
                    Err(e) => warn!(error = %e, "echo recording failed"),
                }
                accepted += 1;
            }
            WebhookEvent::TemplateUpdate { name, field, .. } => {
                debug!(template = %name, field = %field, "template update received");
                accepted += 1;
            }
            WebhookEvent::AccountUpdate { field, .. } => {
                debug!(field = %field, "account update received");
                accepted += 1;
            }
            other => {
                debug!(?other, "ignoring non-messaging event on whatsapp ingress");
            }
        }
    }

    debug!(accepted, "whatsapp webhook processed");
    (StatusCode::OK, Json(json!({"ok": true, "accepted": accepted})))
}
