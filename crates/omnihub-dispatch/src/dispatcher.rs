//! Outbound dispatcher: one subscription group per channel type.
//!
//! Each outbound message is deduped by id, run through the WhatsApp
//! session/template rule when applicable, rendered to the channel's
//! wire shape, and handed to the adapter. Adapter errors are terminal
//! here — the adapter already owns retrying transients — and publish a
//! `failed` status.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, warn};

use omnihub_bus::bus::{MessageBus, MessageHandler};
use omnihub_bus::dedup::MessageDeduplicator;
use omnihub_bus::error::Result as BusResult;
use omnihub_channels::adapter::CallRequest;
use omnihub_channels::ivr::IvrAction;
use omnihub_channels::manager::AdapterRegistry;
use omnihub_channels::normalize;
use omnihub_core::directory::ChannelDirectory;
use omnihub_core::message::{ContentType, Message, StatusUpdate};
use omnihub_core::types::ChannelType;
use omnihub_whatsapp::outbound::{self, as_template, fallback_template, template_language};
use omnihub_whatsapp::session::SessionWindowStore;

pub struct OutboundDispatcher {
    registry: Arc<AdapterRegistry>,
    sessions: Arc<SessionWindowStore>,
    channels: Arc<dyn ChannelDirectory>,
    bus: Arc<dyn MessageBus>,
    processed: Arc<MessageDeduplicator>,
}

impl OutboundDispatcher {
    pub fn new(
        registry: Arc<AdapterRegistry>,
        sessions: Arc<SessionWindowStore>,
        channels: Arc<dyn ChannelDirectory>,
        bus: Arc<dyn MessageBus>,
    ) -> Self {
        Self {
            registry,
            sessions,
            channels,
            bus,
            processed: Arc::new(MessageDeduplicator::new()),
        }
    }

    async fn publish_status(&self, update: StatusUpdate) {
        if let Err(e) = self.bus.publish_status(update).await {
            warn!(error = %e, "status publish failed");
        }
    }

    /// Apply the 24h session rule: an expired window converts the send
    /// into a template, or fails it when no template is configured.
    fn apply_session_rule(&self, msg: Message) -> Result<Message, String> {
        if msg.channel_type != ChannelType::WhatsAppOfficial
            || msg.content_type == ContentType::Template
        {
            return Ok(msg);
        }

        let channel = self
            .channels
            .get(&msg.channel_id)
            .ok()
            .flatten()
            .ok_or_else(|| format!("unknown channel {}", msg.channel_id))?;
        let phone_number_id = channel
            .credential("phone_number_id")
            .unwrap_or_default()
            .to_string();

        let open = self
            .sessions
            .is_open(&phone_number_id, &msg.contact_id, Utc::now())
            .map_err(|e| format!("session lookup failed: {e}"))?;
        if open {
            return Ok(msg);
        }

        match fallback_template(&msg, channel.default_template()) {
            Some(name) => {
                let language = template_language(&msg, channel.template_language());
                info!(
                    message_id = %msg.id,
                    template = name,
                    "session window expired, sending as template"
                );
                Ok(as_template(&msg, name, language))
            }
            None => Err("session expired and no template configured".to_string()),
        }
    }

    async fn deliver(&self, msg: &Message) -> Result<String, String> {
        match &msg.channel_type {
            ChannelType::Voice(provider) => {
                let adapter = self
                    .registry
                    .voice(provider)
                    .ok_or_else(|| format!("no adapter for voice:{}", provider.as_str()))?;
                let handle = adapter
                    .make_call(&CallRequest {
                        to: msg.contact_id.clone(),
                        from: None,
                        answer_url: None,
                        actions: vec![IvrAction::say(&msg.content), IvrAction::Hangup],
                    })
                    .await
                    .map_err(|e| e.to_string())?;
                Ok(handle.call_id)
            }
            channel_type => {
                let adapter = self
                    .registry
                    .messaging(channel_type)
                    .ok_or_else(|| format!("no adapter for {channel_type}"))?;
                let wire = if *channel_type == ChannelType::WhatsAppOfficial {
                    outbound::build_wire(msg).map_err(|e| e.to_string())?
                } else {
                    normalize::denormalize(msg)
                };
                let receipt = adapter
                    .send_message(&wire)
                    .await
                    .map_err(|e| e.to_string())?;
                Ok(receipt.external_id)
            }
        }
    }
}

#[async_trait]
impl MessageHandler for OutboundDispatcher {
    async fn handle(&self, msg: Message) -> BusResult<()> {
        // Dedupe by canonical id; a bus redelivery of a sent message
        // must not reach the provider twice.
        if !self.processed.check_and_record(&msg.id) {
            debug!(message_id = %msg.id, "duplicate outbound dropped");
            return Ok(());
        }

        let msg_id = msg.id.clone();
        let msg = match self.apply_session_rule(msg) {
            Ok(m) => m,
            Err(reason) => {
                warn!(message_id = %msg_id, reason = %reason, "outbound failed before send");
                self.publish_status(StatusUpdate::failed(&msg_id, reason)).await;
                return Ok(());
            }
        };

        match self.deliver(&msg).await {
            Ok(external_id) => {
                info!(message_id = %msg.id, external_id = %external_id, "outbound sent");
                self.publish_status(StatusUpdate::sent(&msg.id, Some(external_id)))
                    .await;
            }
            Err(reason) => {
                warn!(message_id = %msg.id, reason = %reason, "outbound send failed");
                self.publish_status(StatusUpdate::failed(&msg.id, reason)).await;
            }
        }
        Ok(())
    }
}
