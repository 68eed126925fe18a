//! WhatsApp Business Cloud webhook parsing.
//!
//! One parser handles every subscription field: `messages` (inbound
//! messages + statuses), `message_echoes` (coexistence), template
//! updates, and account-level notifications.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use omnihub_core::message::{Attachment, ContentType, Message, MessageStatus, StatusUpdate};
use omnihub_core::types::ChannelType;
use omnihub_channels::error::{ChannelError, Result};
use omnihub_channels::event::WebhookEvent;
use omnihub_channels::normalize::{canonical_content_type, normalize_text};

/// The only `object` value this endpoint serves.
pub const WEBHOOK_OBJECT: &str = "whatsapp_business_account";

#[derive(Debug, Deserialize)]
struct WebhookPayload {
    object: String,
    #[serde(default)]
    entry: Vec<Entry>,
}

#[derive(Debug, Deserialize)]
struct Entry {
    #[allow(dead_code)]
    id: Option<String>,
    #[serde(default)]
    changes: Vec<Change>,
}

#[derive(Debug, Deserialize)]
struct Change {
    field: String,
    #[serde(default)]
    value: Value,
}

/// Identity of the channel this webhook belongs to; stamped onto every
/// canonical message the parser produces.
#[derive(Debug, Clone)]
pub struct ChannelIdentity {
    pub tenant_id: String,
    pub channel_id: String,
}

/// Parse a validated webhook body into canonical events.
pub fn parse(identity: &ChannelIdentity, body: &[u8]) -> Result<Vec<WebhookEvent>> {
    let payload: WebhookPayload = serde_json::from_slice(body)
        .map_err(|e| ChannelError::Parse(format!("webhook body is not valid JSON: {e}")))?;

    if payload.object != WEBHOOK_OBJECT {
        return Err(ChannelError::Validation(format!(
            "unexpected webhook object '{}'",
            payload.object
        )));
    }

    let mut events = Vec::new();
    for entry in payload.entry {
        for change in entry.changes {
            parse_change(identity, &change.field, &change.value, &mut events);
        }
    }
    Ok(events)
}

fn parse_change(
    identity: &ChannelIdentity,
    field: &str,
    value: &Value,
    events: &mut Vec<WebhookEvent>,
) {
    match field {
        "messages" => parse_messages_change(identity, value, events),
        "message_echoes" => parse_echoes_change(value, events),
        "message_template_status_update"
        | "message_template_quality_update"
        | "template_category_update" => {
            let name = value
                .get("message_template_name")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            events.push(WebhookEvent::TemplateUpdate {
                name,
                field: field.to_string(),
                payload: value.clone(),
            });
        }
        "account_alerts" | "account_update" | "account_review_update"
        | "phone_number_name_update" | "phone_number_quality_update" | "security" | "flows"
        | "business_capability_update" => {
            events.push(WebhookEvent::AccountUpdate {
                field: field.to_string(),
                payload: value.clone(),
            });
        }
        other => {
            debug!(field = other, "ignoring unknown webhook field");
        }
    }
}

fn phone_number_id(value: &Value) -> String {
    value
        .get("metadata")
        .and_then(|m| m.get("phone_number_id"))
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

fn parse_messages_change(identity: &ChannelIdentity, value: &Value, events: &mut Vec<WebhookEvent>) {
    let pni = phone_number_id(value);
    let profile_name = value
        .get("contacts")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("profile"))
        .and_then(|p| p.get("name"))
        .and_then(|n| n.as_str())
        .map(|s| s.to_string());

    if let Some(messages) = value.get("messages").and_then(|m| m.as_array()) {
        for raw in messages {
            match parse_inbound_message(identity, raw, &pni, profile_name.as_deref()) {
                Some(msg) => events.push(WebhookEvent::Message(Box::new(msg))),
                None => warn!("skipping unparseable inbound message"),
            }
        }
    }

    if let Some(statuses) = value.get("statuses").and_then(|s| s.as_array()) {
        for raw in statuses {
            if let Some(update) = parse_status(raw) {
                events.push(WebhookEvent::Status(update));
            }
        }
    }
}

fn parse_timestamp(raw: &Value) -> DateTime<Utc> {
    raw.get("timestamp")
        .and_then(|t| t.as_str())
        .and_then(|t| t.parse::<i64>().ok())
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .unwrap_or_else(Utc::now)
}

fn parse_inbound_message(
    identity: &ChannelIdentity,
    raw: &Value,
    phone_number_id: &str,
    profile_name: Option<&str>,
) -> Option<Message> {
    let from = raw.get("from")?.as_str()?.to_string();
    let wamid = raw.get("id")?.as_str()?.to_string();
    let kind = raw.get("type")?.as_str()?;
    let created_at = parse_timestamp(raw);

    let mut attachments = Vec::new();
    let (content_type, content) = match kind {
        "text" => (
            ContentType::Text,
            normalize_text(raw.get("text")?.get("body")?.as_str()?),
        ),
        "image" | "audio" | "video" | "document" | "sticker" => {
            let media = raw.get(kind)?;
            let ct = canonical_content_type(kind);
            let caption = media
                .get("caption")
                .and_then(|c| c.as_str())
                .map(normalize_text)
                .unwrap_or_default();
            attachments.push(media_attachment(kind, media));
            (ct, caption)
        }
        "location" => (
            ContentType::Location,
            raw.get("location")?.to_string(),
        ),
        "contacts" => (ContentType::Contact, raw.get("contacts")?.to_string()),
        "interactive" => {
            // Button/list replies flow into the pipeline as plain text so
            // the flow engine can match on the selected title.
            let interactive = raw.get("interactive")?;
            let reply = interactive
                .get("button_reply")
                .or_else(|| interactive.get("list_reply"))?;
            let title = reply.get("title").and_then(|t| t.as_str()).unwrap_or_default();
            (ContentType::Text, title.to_string())
        }
        "button" => (
            ContentType::Text,
            raw.get("button")?
                .get("text")
                .and_then(|t| t.as_str())
                .unwrap_or_default()
                .to_string(),
        ),
        other => {
            debug!(kind = other, "unhandled inbound message type");
            return None;
        }
    };

    let mut msg = Message::inbound(
        identity.tenant_id.clone(),
        String::new(), // conversation resolved at ingress
        identity.channel_id.clone(),
        ChannelType::WhatsAppOfficial,
        from,
        content_type,
        content,
    );
    msg.created_at = created_at;
    msg.external_id = Some(wamid);
    msg.attachments = attachments;
    msg.metadata.insert(
        "phone_number_id".to_string(),
        Value::String(phone_number_id.to_string()),
    );
    if let Some(name) = profile_name {
        msg.metadata
            .insert("profile_name".to_string(), Value::String(name.to_string()));
    }
    if kind == "interactive" {
        if let Some(id) = raw
            .get("interactive")
            .and_then(|i| i.get("button_reply").or_else(|| i.get("list_reply")))
            .and_then(|r| r.get("id"))
            .and_then(|v| v.as_str())
        {
            msg.metadata
                .insert("interactive_reply_id".to_string(), Value::String(id.to_string()));
        }
    }
    Some(msg)
}

fn media_attachment(kind: &str, media: &Value) -> Attachment {
    Attachment {
        id: String::new(),
        kind: canonical_kind_label(kind).to_string(),
        url: None,
        media_id: media
            .get("id")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string()),
        filename: media
            .get("filename")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string()),
        mime_type: media
            .get("mime_type")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
        size_bytes: 0,
        thumbnail_url: None,
        metadata: Default::default(),
    }
}

fn canonical_kind_label(kind: &str) -> &str {
    if kind == "sticker" {
        "image"
    } else {
        kind
    }
}

fn parse_status(raw: &Value) -> Option<StatusUpdate> {
    let external_id = raw.get("id")?.as_str()?.to_string();
    let status_str = raw.get("status")?.as_str()?;
    let status: MessageStatus = status_str.parse().ok()?;
    let error_message = raw
        .get("errors")
        .and_then(|e| e.get(0))
        .and_then(|e| e.get("title"))
        .and_then(|t| t.as_str())
        .map(|s| s.to_string());

    Some(StatusUpdate {
        // Provider statuses key on the provider id; the dispatcher joins
        // them back to the canonical message through external_id.
        message_id: external_id.clone(),
        external_id: Some(external_id),
        status,
        error_message,
        timestamp: parse_timestamp(raw),
    })
}

fn parse_echoes_change(value: &Value, events: &mut Vec<WebhookEvent>) {
    let pni = phone_number_id(value);
    let echoes = value
        .get("message_echoes")
        .or_else(|| value.get("messages"))
        .and_then(|m| m.as_array());
    let Some(echoes) = echoes else { return };
    for raw in echoes {
        events.push(WebhookEvent::Echo {
            phone_number_id: pni.clone(),
            timestamp: parse_timestamp(raw),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn identity() -> ChannelIdentity {
        ChannelIdentity {
            tenant_id: "t1".to_string(),
            channel_id: "ch1".to_string(),
        }
    }

    fn envelope(field: &str, value: Value) -> Vec<u8> {
        json!({
            "object": "whatsapp_business_account",
            "entry": [{ "id": "wba1", "changes": [{ "field": field, "value": value }] }],
        })
        .to_string()
        .into_bytes()
    }

    #[test]
    fn rejects_foreign_objects() {
        let body = json!({"object": "page", "entry": []}).to_string();
        let err = parse(&identity(), body.as_bytes()).unwrap_err();
        assert!(matches!(err, ChannelError::Validation(_)));
    }

    #[test]
    fn parses_text_message() {
        let body = envelope(
            "messages",
            json!({
                "metadata": { "phone_number_id": "106540352242922" },
                "contacts": [{ "profile": { "name": "Ada" }, "wa_id": "5511999990000" }],
                "messages": [{
                    "from": "5511999990000",
                    "id": "wamid.ABC",
                    "timestamp": "1700000000",
                    "type": "text",
                    "text": { "body": " hi \r\nthere " },
                }],
            }),
        );
        let events = parse(&identity(), &body).unwrap();
        assert_eq!(events.len(), 1);
        match &events[0] {
            WebhookEvent::Message(msg) => {
                assert_eq!(msg.contact_id, "5511999990000");
                assert_eq!(msg.external_id.as_deref(), Some("wamid.ABC"));
                assert_eq!(msg.content, "hi \nthere");
                assert_eq!(msg.content_type, ContentType::Text);
                assert_eq!(msg.metadata["profile_name"], "Ada");
                assert_eq!(msg.metadata["phone_number_id"], "106540352242922");
            }
            other => panic!("expected message, got {other:?}"),
        }
    }

    #[test]
    fn parses_media_message_with_media_id() {
        let body = envelope(
            "messages",
            json!({
                "metadata": { "phone_number_id": "106540352242922" },
                "messages": [{
                    "from": "5511999990000",
                    "id": "wamid.IMG",
                    "timestamp": "1700000000",
                    "type": "image",
                    "image": { "id": "media-1", "mime_type": "image/jpeg", "caption": "look" },
                }],
            }),
        );
        let events = parse(&identity(), &body).unwrap();
        match &events[0] {
            WebhookEvent::Message(msg) => {
                assert_eq!(msg.content_type, ContentType::Image);
                assert_eq!(msg.content, "look");
                assert_eq!(msg.attachments[0].media_id.as_deref(), Some("media-1"));
                assert_eq!(msg.attachments[0].mime_type, "image/jpeg");
            }
            other => panic!("expected message, got {other:?}"),
        }
    }

    #[test]
    fn parses_interactive_button_reply_as_text() {
        let body = envelope(
            "messages",
            json!({
                "metadata": { "phone_number_id": "1" },
                "messages": [{
                    "from": "5511999990000",
                    "id": "wamid.BTN",
                    "timestamp": "1700000000",
                    "type": "interactive",
                    "interactive": {
                        "type": "button_reply",
                        "button_reply": { "id": "opt-a", "title": "A" },
                    },
                }],
            }),
        );
        let events = parse(&identity(), &body).unwrap();
        match &events[0] {
            WebhookEvent::Message(msg) => {
                assert_eq!(msg.content, "A");
                assert_eq!(msg.metadata["interactive_reply_id"], "opt-a");
            }
            other => panic!("expected message, got {other:?}"),
        }
    }

    #[test]
    fn parses_statuses() {
        let body = envelope(
            "messages",
            json!({
                "metadata": { "phone_number_id": "1" },
                "statuses": [{
                    "id": "wamid.OUT",
                    "status": "delivered",
                    "timestamp": "1700000100",
                }, {
                    "id": "wamid.BAD",
                    "status": "failed",
                    "timestamp": "1700000101",
                    "errors": [{ "code": 131047, "title": "Re-engagement message" }],
                }],
            }),
        );
        let events = parse(&identity(), &body).unwrap();
        assert_eq!(events.len(), 2);
        match &events[0] {
            WebhookEvent::Status(s) => {
                assert_eq!(s.status, MessageStatus::Delivered);
                assert_eq!(s.external_id.as_deref(), Some("wamid.OUT"));
            }
            other => panic!("expected status, got {other:?}"),
        }
        match &events[1] {
            WebhookEvent::Status(s) => {
                assert_eq!(s.status, MessageStatus::Failed);
                assert_eq!(s.error_message.as_deref(), Some("Re-engagement message"));
            }
            other => panic!("expected status, got {other:?}"),
        }
    }

    #[test]
    fn parses_message_echoes() {
        let body = envelope(
            "message_echoes",
            json!({
                "metadata": { "phone_number_id": "106540352242922" },
                "message_echoes": [{ "id": "wamid.ECHO", "timestamp": "1700000000" }],
            }),
        );
        let events = parse(&identity(), &body).unwrap();
        match &events[0] {
            WebhookEvent::Echo { phone_number_id, .. } => {
                assert_eq!(phone_number_id, "106540352242922");
            }
            other => panic!("expected echo, got {other:?}"),
        }
    }

    #[test]
    fn batch_payload_fans_out() {
        let body = json!({
            "object": "whatsapp_business_account",
            "entry": [{
                "id": "wba1",
                "changes": [{
                    "field": "messages",
                    "value": {
                        "metadata": { "phone_number_id": "1" },
                        "messages": [
                            { "from": "1", "id": "wamid.1", "timestamp": "1", "type": "text", "text": { "body": "a" } },
                            { "from": "2", "id": "wamid.2", "timestamp": "2", "type": "text", "text": { "body": "b" } },
                        ],
                    },
                }],
            }],
        })
        .to_string();
        let events = parse(&identity(), body.as_bytes()).unwrap();
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn template_and_account_fields_fan_out() {
        let body = envelope(
            "message_template_status_update",
            json!({ "message_template_name": "welcome_back", "event": "APPROVED" }),
        );
        let events = parse(&identity(), &body).unwrap();
        assert!(matches!(
            &events[0],
            WebhookEvent::TemplateUpdate { name, .. } if name == "welcome_back"
        ));

        let body = envelope("account_alerts", json!({ "alert": "x" }));
        let events = parse(&identity(), &body).unwrap();
        assert!(matches!(&events[0], WebhookEvent::AccountUpdate { field, .. } if field == "account_alerts"));
    }
}
