//! Outbound message shaping for the Cloud API.

use serde_json::Value;

use omnihub_core::message::{ContentType, Message};
use omnihub_channels::error::{ChannelError, Result};
use omnihub_channels::normalize::denormalize;

use crate::template;

/// Metadata key a caller sets to force a specific template.
pub const TEMPLATE_NAME_KEY: &str = "template_name";
pub const TEMPLATE_LANGUAGE_KEY: &str = "template_language";

/// Render a canonical outbound message into the Cloud API wire payload.
pub fn build_wire(msg: &Message) -> Result<Value> {
    let wire = denormalize(msg);
    if wire.get("type").is_none() {
        return Err(ChannelError::Validation(
            "message did not denormalize to a wire type".to_string(),
        ));
    }
    Ok(wire)
}

/// Rewrite a free-form message as a template send, used when the 24h
/// session window has expired. The original text becomes the template's
/// body parameter.
pub fn as_template(msg: &Message, name: &str, language: &str) -> Message {
    let mut templated = msg.clone();
    templated.content_type = ContentType::Template;
    templated.content = template::session_fallback(name, language, &msg.content).to_string();
    templated
}

/// Pick the template the session fallback should use: explicit metadata
/// first, channel default second.
pub fn fallback_template<'a>(msg: &'a Message, channel_default: Option<&'a str>) -> Option<&'a str> {
    msg.metadata
        .get(TEMPLATE_NAME_KEY)
        .and_then(|v| v.as_str())
        .or(channel_default)
}

pub fn template_language<'a>(msg: &'a Message, channel_language: &'a str) -> &'a str {
    msg.metadata
        .get(TEMPLATE_LANGUAGE_KEY)
        .and_then(|v| v.as_str())
        .unwrap_or(channel_language)
}

#[cfg(test)]
mod tests {
    use super::*;
    use omnihub_core::types::ChannelType;
    use serde_json::json;

    fn text_message(content: &str) -> Message {
        Message::inbound(
            "t1",
            "c1",
            "ch1",
            ChannelType::WhatsAppOfficial,
            "5511999990000",
            ContentType::Text,
            content,
        )
    }

    #[test]
    fn wire_payload_has_messaging_product() {
        let wire = build_wire(&text_message("hi")).unwrap();
        assert_eq!(wire["messaging_product"], "whatsapp");
        assert_eq!(wire["to"], "5511999990000");
        assert_eq!(wire["type"], "text");
        assert_eq!(wire["text"]["body"], "hi");
    }

    #[test]
    fn session_expired_text_becomes_template() {
        let msg = text_message("Hi");
        let templated = as_template(&msg, "welcome_back", "en");
        assert_eq!(templated.content_type, ContentType::Template);

        let wire = build_wire(&templated).unwrap();
        assert_eq!(wire["type"], "template");
        assert_eq!(wire["template"]["name"], "welcome_back");
        assert_eq!(wire["template"]["language"]["code"], "en");
        assert_eq!(
            wire["template"]["components"][0]["parameters"][0]["text"],
            "Hi"
        );
    }

    #[test]
    fn metadata_template_overrides_channel_default() {
        let mut msg = text_message("Hi");
        assert_eq!(fallback_template(&msg, Some("chan_default")), Some("chan_default"));
        assert_eq!(fallback_template(&msg, None), None);

        msg.metadata
            .insert(TEMPLATE_NAME_KEY.to_string(), json!("campaign_x"));
        assert_eq!(fallback_template(&msg, Some("chan_default")), Some("campaign_x"));
    }
}
