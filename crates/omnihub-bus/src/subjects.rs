//! NATS-like subject strings routing canonical payloads between workers.

use omnihub_core::types::ChannelType;

pub const STATUS_UPDATES: &str = "status.updates";

pub fn inbound(tenant_id: &str) -> String {
    format!("messages.inbound.{tenant_id}")
}

pub fn outbound(channel_type: &ChannelType) -> String {
    format!("messages.outbound.{}", channel_type.as_key())
}

pub fn event(kind: &str) -> String {
    format!("events.{kind}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use omnihub_core::types::VoiceProvider;

    #[test]
    fn subjects_embed_routing_keys() {
        assert_eq!(inbound("acme"), "messages.inbound.acme");
        assert_eq!(
            outbound(&ChannelType::WhatsAppOfficial),
            "messages.outbound.whatsapp_official"
        );
        assert_eq!(
            outbound(&ChannelType::Voice(VoiceProvider::Twilio)),
            "messages.outbound.voice:twilio"
        );
        assert_eq!(event("coexistence"), "events.coexistence");
    }
}
