//! Canonical ↔ per-channel content translation.
//!
//! Inbound, adapters hand provider fragments to `canonical_content_type`
//! and `normalize_text`. Outbound, `denormalize` renders a canonical
//! message into the destination channel's wire shape.

use serde_json::{json, Value};

use omnihub_core::message::{Attachment, ContentType, Message};
use omnihub_core::types::ChannelType;

/// Maximum characters in a single SMS segment-bundle we emit.
const SMS_MAX_CHARS: usize = 160;

/// Map a provider content-type label onto the canonical enumeration.
pub fn canonical_content_type(raw: &str) -> ContentType {
    match raw.trim().to_ascii_lowercase().as_str() {
        "text" | "chat" => ContentType::Text,
        "image" | "photo" | "sticker" => ContentType::Image,
        "video" => ContentType::Video,
        "audio" | "voice" | "ptt" | "audio/ogg" => ContentType::Audio,
        "document" | "file" => ContentType::Document,
        "location" => ContentType::Location,
        "contact" | "contacts" | "vcard" => ContentType::Contact,
        "template" => ContentType::Template,
        "interactive" | "button" | "list" => ContentType::Interactive,
        _ => ContentType::Text,
    }
}

/// Trim surrounding whitespace and normalize CRLF line endings.
pub fn normalize_text(raw: &str) -> String {
    raw.trim().replace("\r\n", "\n")
}

/// Render a canonical message into the destination channel's wire shape.
pub fn denormalize(msg: &Message) -> Value {
    match &msg.channel_type {
        ChannelType::WhatsAppOfficial => denormalize_whatsapp(msg),
        ChannelType::Telegram => denormalize_telegram(msg),
        ChannelType::WebChat => serde_json::to_value(msg).unwrap_or_else(|_| json!({})),
        ChannelType::Sms => json!({
            "to": msg.contact_id,
            "body": truncate_sms(&msg.content),
        }),
        ChannelType::Voice(_) => json!({
            "to": msg.contact_id,
            "content_type": msg.content_type,
            "content": msg.content,
        }),
    }
}

fn first_attachment_url(msg: &Message) -> Option<&str> {
    msg.attachments.first().and_then(|a| a.url.as_deref())
}

fn denormalize_whatsapp(msg: &Message) -> Value {
    let mut out = json!({
        "messaging_product": "whatsapp",
        "recipient_type": "individual",
        "to": msg.contact_id,
    });

    match msg.content_type {
        ContentType::Text => {
            out["type"] = json!("text");
            out["text"] = json!({ "body": msg.content, "preview_url": false });
        }
        ContentType::Image | ContentType::Audio | ContentType::Video => {
            let key = match msg.content_type {
                ContentType::Image => "image",
                ContentType::Audio => "audio",
                _ => "video",
            };
            out["type"] = json!(key);
            let mut media = json!({});
            if let Some(url) = first_attachment_url(msg) {
                media["link"] = json!(url);
            } else if let Some(id) = msg.attachments.first().and_then(|a| a.media_id.as_deref()) {
                media["id"] = json!(id);
            }
            // Audio messages carry no caption on the Cloud API.
            if !msg.content.is_empty() && msg.content_type != ContentType::Audio {
                media["caption"] = json!(msg.content);
            }
            out[key] = media;
        }
        ContentType::Document => {
            out["type"] = json!("document");
            let mut doc = json!({});
            if let Some(url) = first_attachment_url(msg) {
                doc["link"] = json!(url);
            }
            if let Some(name) = msg.attachments.first().and_then(|a| a.filename.as_deref()) {
                doc["filename"] = json!(name);
            }
            if !msg.content.is_empty() {
                doc["caption"] = json!(msg.content);
            }
            out["document"] = doc;
        }
        ContentType::Location => {
            out["type"] = json!("location");
            out["location"] =
                serde_json::from_str(&msg.content).unwrap_or_else(|_| json!({}));
        }
        ContentType::Template | ContentType::Interactive | ContentType::Contact => {
            // Structured payloads are stored JSON-encoded in `content`.
            let key = match msg.content_type {
                ContentType::Template => "template",
                ContentType::Interactive => "interactive",
                _ => "contacts",
            };
            out["type"] = json!(key);
            out[key] = serde_json::from_str(&msg.content).unwrap_or_else(|_| json!({}));
        }
    }
    out
}

fn denormalize_telegram(msg: &Message) -> Value {
    match msg.content_type {
        ContentType::Image => {
            let mut out = json!({
                "chat_id": msg.contact_id,
                "photo": first_attachment_url(msg).unwrap_or_default(),
            });
            if !msg.content.is_empty() {
                out["caption"] = json!(msg.content);
            }
            out
        }
        ContentType::Audio | ContentType::Video | ContentType::Document => {
            let key = match msg.content_type {
                ContentType::Audio => "audio",
                ContentType::Video => "video",
                _ => "document",
            };
            let mut out = json!({ "chat_id": msg.contact_id });
            out[key] = json!(first_attachment_url(msg).unwrap_or_default());
            if !msg.content.is_empty() {
                out["caption"] = json!(msg.content);
            }
            out
        }
        ContentType::Location => {
            let loc: Value = serde_json::from_str(&msg.content).unwrap_or_else(|_| json!({}));
            json!({
                "chat_id": msg.contact_id,
                "latitude": loc.get("latitude").cloned().unwrap_or(Value::Null),
                "longitude": loc.get("longitude").cloned().unwrap_or(Value::Null),
            })
        }
        _ => json!({
            "chat_id": msg.contact_id,
            "text": msg.content,
            "parse_mode": "HTML",
        }),
    }
}

/// Inverse of `denormalize` for the channels that support it, recovering
/// the canonical content fields from a wire payload.
pub fn normalize_wire(
    channel: &ChannelType,
    wire: &Value,
) -> Option<(ContentType, String, Vec<Attachment>)> {
    match channel {
        ChannelType::WhatsAppOfficial => normalize_whatsapp_wire(wire),
        ChannelType::Telegram => normalize_telegram_wire(wire),
        ChannelType::WebChat => {
            let msg: Message = serde_json::from_value(wire.clone()).ok()?;
            Some((msg.content_type, msg.content, msg.attachments))
        }
        _ => None,
    }
}

fn attachment_from_url(kind: &str, url: &str, filename: Option<&str>) -> Attachment {
    Attachment {
        id: String::new(),
        kind: kind.to_string(),
        url: Some(url.to_string()),
        filename: filename.map(|s| s.to_string()),
        ..Attachment::default()
    }
}

fn normalize_whatsapp_wire(wire: &Value) -> Option<(ContentType, String, Vec<Attachment>)> {
    let kind = wire.get("type")?.as_str()?;
    let content_type = canonical_content_type(kind);
    match content_type {
        ContentType::Text => {
            let body = wire.get("text")?.get("body")?.as_str()?.to_string();
            Some((ContentType::Text, body, Vec::new()))
        }
        ContentType::Image | ContentType::Audio | ContentType::Video | ContentType::Document => {
            let media = wire.get(kind)?;
            let caption = media
                .get("caption")
                .and_then(|c| c.as_str())
                .unwrap_or_default()
                .to_string();
            let url = media.get("link").and_then(|l| l.as_str())?;
            let filename = media.get("filename").and_then(|f| f.as_str());
            Some((
                content_type,
                caption,
                vec![attachment_from_url(kind, url, filename)],
            ))
        }
        ContentType::Location => {
            let loc = wire.get("location")?;
            Some((ContentType::Location, loc.to_string(), Vec::new()))
        }
        _ => {
            let payload = wire.get(kind)?;
            Some((content_type, payload.to_string(), Vec::new()))
        }
    }
}

fn normalize_telegram_wire(wire: &Value) -> Option<(ContentType, String, Vec<Attachment>)> {
    if let Some(text) = wire.get("text").and_then(|t| t.as_str()) {
        return Some((ContentType::Text, text.to_string(), Vec::new()));
    }
    for (key, ct) in [
        ("photo", ContentType::Image),
        ("audio", ContentType::Audio),
        ("video", ContentType::Video),
        ("document", ContentType::Document),
    ] {
        if let Some(url) = wire.get(key).and_then(|v| v.as_str()) {
            let caption = wire
                .get("caption")
                .and_then(|c| c.as_str())
                .unwrap_or_default()
                .to_string();
            let kind = if key == "photo" { "image" } else { key };
            return Some((ct, caption, vec![attachment_from_url(kind, url, None)]));
        }
    }
    if wire.get("latitude").is_some() {
        let loc = json!({
            "latitude": wire.get("latitude").cloned().unwrap_or(Value::Null),
            "longitude": wire.get("longitude").cloned().unwrap_or(Value::Null),
        });
        return Some((ContentType::Location, loc.to_string(), Vec::new()));
    }
    None
}

/// Cut a message down to one SMS worth of characters, ellipsized.
fn truncate_sms(text: &str) -> String {
    if text.chars().count() <= SMS_MAX_CHARS {
        return text.to_string();
    }
    let mut out: String = text.chars().take(SMS_MAX_CHARS - 1).collect();
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn canonical(channel: ChannelType, ct: ContentType, content: &str) -> Message {
        Message::inbound("t1", "c1", "ch1", channel, "5511999990000", ct, content)
    }

    fn with_attachment(mut msg: Message, kind: &str, url: &str) -> Message {
        msg.attachments.push(attachment_from_url(kind, url, None));
        msg
    }

    #[test]
    fn content_type_canonicalization() {
        assert_eq!(canonical_content_type(" PTT "), ContentType::Audio);
        assert_eq!(canonical_content_type("audio/ogg"), ContentType::Audio);
        assert_eq!(canonical_content_type("photo"), ContentType::Image);
        assert_eq!(canonical_content_type("chat"), ContentType::Text);
        assert_eq!(canonical_content_type("mystery"), ContentType::Text);
    }

    #[test]
    fn text_normalization_strips_crlf() {
        assert_eq!(normalize_text("  hi\r\nthere \r\n"), "hi\nthere");
        assert_eq!(normalize_text("a\r\nb"), "a\nb");
    }

    #[test]
    fn sms_truncates_with_ellipsis() {
        let long = "x".repeat(200);
        let msg = canonical(ChannelType::Sms, ContentType::Text, &long);
        let wire = denormalize(&msg);
        let body = wire["body"].as_str().unwrap();
        assert_eq!(body.chars().count(), 160);
        assert!(body.ends_with('…'));

        let short = canonical(ChannelType::Sms, ContentType::Text, "short");
        assert_eq!(denormalize(&short)["body"], "short");
    }

    #[test]
    fn whatsapp_round_trip_text() {
        let msg = canonical(ChannelType::WhatsAppOfficial, ContentType::Text, "hello");
        let wire = denormalize(&msg);
        assert_eq!(wire["type"], "text");
        let (ct, content, atts) =
            normalize_wire(&ChannelType::WhatsAppOfficial, &wire).unwrap();
        assert_eq!(ct, ContentType::Text);
        assert_eq!(content, "hello");
        assert!(atts.is_empty());
    }

    #[test]
    fn whatsapp_round_trip_media() {
        for (ct, kind) in [
            (ContentType::Image, "image"),
            (ContentType::Audio, "audio"),
            (ContentType::Video, "video"),
            (ContentType::Document, "document"),
        ] {
            let caption = if ct == ContentType::Audio { "" } else { "cap" };
            let msg = with_attachment(
                canonical(ChannelType::WhatsAppOfficial, ct, caption),
                kind,
                "https://cdn.example.com/m.bin",
            );
            let wire = denormalize(&msg);
            let (got_ct, got_content, got_atts) =
                normalize_wire(&ChannelType::WhatsAppOfficial, &wire).unwrap();
            assert_eq!(got_ct, ct);
            assert_eq!(got_content, caption);
            assert_eq!(
                got_atts[0].url.as_deref(),
                Some("https://cdn.example.com/m.bin")
            );
        }
    }

    #[test]
    fn whatsapp_round_trip_location() {
        let loc = json!({"latitude": -23.55, "longitude": -46.63, "name": "HQ"});
        let msg = canonical(
            ChannelType::WhatsAppOfficial,
            ContentType::Location,
            &loc.to_string(),
        );
        let wire = denormalize(&msg);
        let (ct, content, _) = normalize_wire(&ChannelType::WhatsAppOfficial, &wire).unwrap();
        assert_eq!(ct, ContentType::Location);
        let back: Value = serde_json::from_str(&content).unwrap();
        assert_eq!(back, loc);
    }

    #[test]
    fn telegram_round_trip_text_and_photo() {
        let msg = canonical(ChannelType::Telegram, ContentType::Text, "oi");
        let wire = denormalize(&msg);
        assert_eq!(wire["parse_mode"], "HTML");
        let (ct, content, _) = normalize_wire(&ChannelType::Telegram, &wire).unwrap();
        assert_eq!((ct, content.as_str()), (ContentType::Text, "oi"));

        let msg = with_attachment(
            canonical(ChannelType::Telegram, ContentType::Image, "cap"),
            "image",
            "https://cdn.example.com/p.jpg",
        );
        let wire = denormalize(&msg);
        let (ct, content, atts) = normalize_wire(&ChannelType::Telegram, &wire).unwrap();
        assert_eq!(ct, ContentType::Image);
        assert_eq!(content, "cap");
        assert_eq!(atts[0].url.as_deref(), Some("https://cdn.example.com/p.jpg"));
    }

    #[test]
    fn webchat_round_trip_is_canonical_identity() {
        let msg = canonical(ChannelType::WebChat, ContentType::Text, "hello");
        let wire = denormalize(&msg);
        let (ct, content, _) = normalize_wire(&ChannelType::WebChat, &wire).unwrap();
        assert_eq!(ct, msg.content_type);
        assert_eq!(content, msg.content);
    }

    #[test]
    fn unknown_channel_uses_generic_shape() {
        let msg = canonical(
            ChannelType::Voice(omnihub_core::types::VoiceProvider::Twilio),
            ContentType::Text,
            "say this",
        );
        let wire = denormalize(&msg);
        assert_eq!(wire["content"], "say this");
        assert_eq!(wire["to"], "5511999990000");
    }
}
