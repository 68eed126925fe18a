//! Inbound consumer: bridges the bus to the orchestrator.
//!
//! Work for one conversation is serialized through the context store's
//! per-conversation lock; unrelated conversations run in parallel up to
//! the worker pool.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use omnihub_bus::bus::{BusEvent, MessageBus, MessageHandler};
use omnihub_bus::dedup::MessageDeduplicator;
use omnihub_bus::error::Result as BusResult;
use omnihub_core::directory::{BotDirectory, ConversationDirectory};
use omnihub_core::message::{Message, SenderType};
use omnihub_agent::{AgentError, BotReply, Orchestrator};
use omnihub_context::ContextStore;

pub struct InboundConsumer {
    orchestrator: Arc<Orchestrator>,
    context: Arc<ContextStore>,
    bots: Arc<dyn BotDirectory>,
    conversations: Arc<dyn ConversationDirectory>,
    bus: Arc<dyn MessageBus>,
    dedup: Arc<MessageDeduplicator>,
    cancel: CancellationToken,
}

impl InboundConsumer {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        context: Arc<ContextStore>,
        bots: Arc<dyn BotDirectory>,
        conversations: Arc<dyn ConversationDirectory>,
        bus: Arc<dyn MessageBus>,
        dedup: Arc<MessageDeduplicator>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            orchestrator,
            context,
            bots,
            conversations,
            bus,
            dedup,
            cancel,
        }
    }

    async fn publish_reply(&self, inbound: &Message, reply: &BotReply) -> BusResult<()> {
        if reply.should_escalate {
            self.bus
                .publish_event(BusEvent::Escalation {
                    conversation_id: inbound.conversation_id.clone(),
                    reason: reply
                        .escalation_reason
                        .clone()
                        .unwrap_or_else(|| "unspecified".to_string()),
                })
                .await?;
        }

        // A decline (no content, no visual) escalates without replying.
        if reply.content.is_empty() && reply.visual.is_none() {
            return Ok(());
        }

        let mut out = Message::bot_reply(inbound, reply.content_type(), reply.content.clone());
        if let Some(visual) = &reply.visual {
            out.attachments.push(omnihub_core::message::Attachment {
                id: String::new(),
                kind: "image".to_string(),
                url: Some(visual.image_url.clone()),
                mime_type: "image/png".to_string(),
                ..Default::default()
            });
        }
        if !reply.quick_replies.is_empty() {
            out.metadata.insert(
                "quick_replies".to_string(),
                serde_json::json!(reply.quick_replies),
            );
        }
        self.bus.publish_outbound(out).await
    }
}

#[async_trait]
impl MessageHandler for InboundConsumer {
    async fn handle(&self, msg: Message) -> BusResult<()> {
        // Idempotent receive: a provider-assigned id seen twice within
        // the TTL is acknowledged and dropped.
        if let Some(external_id) = &msg.external_id {
            if !self.dedup.check_and_record(external_id) {
                debug!(external_id = %external_id, "duplicate inbound dropped");
                return Ok(());
            }
        }

        // Only external contacts drive the orchestrator; agent and
        // system messages on the inbound subject are bookkeeping.
        if msg.sender_type != SenderType::Contact {
            return Ok(());
        }

        let conversation = match self.conversations.resolve(
            &msg.tenant_id,
            &msg.channel_id,
            &msg.contact_id,
        ) {
            Ok(c) => c,
            Err(e) => {
                error!(error = %e, "conversation resolution failed");
                return Ok(());
            }
        };

        let Some(bot) = self.bots.bot_for_channel(&msg.channel_id) else {
            debug!(channel_id = %msg.channel_id, "no bot bound to channel");
            return Ok(());
        };

        let mut msg = msg;
        msg.conversation_id = conversation.id.clone();

        // Serialize per conversation so the context window stays
        // consistent; other conversations proceed concurrently.
        let lock = self.context.conversation_lock(&conversation.id);
        let _guard = lock.lock().await;

        match self
            .orchestrator
            .handle_message(&conversation, &bot, &msg, &self.cancel)
            .await
        {
            Ok(replies) => {
                for reply in &replies {
                    self.publish_reply(&msg, reply).await?;
                }
                info!(
                    conversation_id = %conversation.id,
                    replies = replies.len(),
                    "inbound message handled"
                );
                Ok(())
            }
            Err(AgentError::Cancelled) => {
                // A cancelled orchestration publishes nothing.
                debug!(conversation_id = %conversation.id, "orchestration cancelled");
                Ok(())
            }
            Err(e) => {
                // The webhook handshake already succeeded; log and move
                // on rather than poisoning the subscription.
                warn!(conversation_id = %conversation.id, error = %e, "orchestration failed");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use rusqlite::Connection;

    use omnihub_agent::provider::{AiProvider, CompletionRequest, CompletionResponse};
    use omnihub_core::message::ContentType;
    use omnihub_agent::FinishReason;
    use omnihub_bus::InMemoryBus;
    use omnihub_core::directory::StaticBotDirectory;
    use omnihub_core::types::{Bot, BotSettings, BotStatus, ChannelType, ToolChoice};
    use omnihub_flow::engine::FlowEngine;
    use omnihub_flow::store::FlowStore;

    use crate::directory::SqliteDirectory;

    struct CountingProvider {
        calls: AtomicU32,
    }

    #[async_trait]
    impl AiProvider for CountingProvider {
        fn name(&self) -> &str {
            "counting"
        }

        async fn complete(
            &self,
            _req: &CompletionRequest,
        ) -> omnihub_agent::Result<CompletionResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(CompletionResponse {
                content: "Hello!".to_string(),
                tool_calls: Vec::new(),
                tokens_used: 5,
                finish_reason: FinishReason::Stop,
            })
        }

        async fn embed(&self, _text: &str) -> omnihub_agent::Result<Vec<f32>> {
            Ok(vec![0.0])
        }

        async fn analyze_sentiment(
            &self,
            _message: &str,
        ) -> omnihub_agent::Result<omnihub_core::types::Sentiment> {
            Ok(omnihub_core::types::Sentiment::Neutral)
        }
    }

    fn bot() -> Bot {
        Bot {
            id: "b1".to_string(),
            tenant_id: "t1".to_string(),
            provider: "counting".to_string(),
            model: "m".to_string(),
            config: BotSettings {
                system_prompt: "You are helpful".to_string(),
                temperature: 0.7,
                max_tokens: 128,
                context_window_size: 20,
                confidence_threshold: 0.5,
                fallback_message: "oops".to_string(),
                welcome_message: None,
                escalation_rules: Vec::new(),
                working_hours: None,
                knowledge_base_id: None,
                tools: Vec::new(),
                tool_choice: ToolChoice::Auto,
            },
            channels: vec!["ch1".to_string()],
            status: BotStatus::Active,
        }
    }

    fn consumer(
        provider: Arc<CountingProvider>,
        bus: Arc<InMemoryBus>,
    ) -> InboundConsumer {
        let context = Arc::new(ContextStore::new(Connection::open_in_memory().unwrap()).unwrap());
        let flow_store = Arc::new(FlowStore::new(Connection::open_in_memory().unwrap()).unwrap());
        let engine = Arc::new(FlowEngine::new(flow_store));
        let orchestrator = Arc::new(Orchestrator::new(
            context.clone(),
            engine,
            provider,
        ));
        let directory = Arc::new(SqliteDirectory::new(Connection::open_in_memory().unwrap()).unwrap());
        InboundConsumer::new(
            orchestrator,
            context,
            Arc::new(StaticBotDirectory::new(vec![bot()])),
            directory,
            bus,
            Arc::new(MessageDeduplicator::new()),
            CancellationToken::new(),
        )
    }

    fn inbound(external_id: &str) -> Message {
        let mut m = Message::inbound(
            "t1",
            "",
            "ch1",
            ChannelType::WhatsAppOfficial,
            "5511999990000",
            ContentType::Text,
            "hi",
        );
        m.external_id = Some(external_id.to_string());
        m
    }

    #[tokio::test]
    async fn duplicate_external_id_triggers_exactly_one_ai_call() {
        let provider = Arc::new(CountingProvider {
            calls: AtomicU32::new(0),
        });
        let bus = Arc::new(InMemoryBus::new(16));
        let consumer = consumer(provider.clone(), bus);

        consumer.handle(inbound("wamid.M1")).await.unwrap();
        consumer.handle(inbound("wamid.M1")).await.unwrap();

        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn reply_is_published_outbound() {
        use omnihub_bus::bus::MessageHandler as _;
        use tokio::sync::mpsc;

        struct Collect {
            tx: mpsc::Sender<Message>,
        }

        #[async_trait]
        impl omnihub_bus::bus::MessageHandler for Collect {
            async fn handle(&self, m: Message) -> BusResult<()> {
                self.tx.send(m).await.ok();
                Ok(())
            }
        }

        let provider = Arc::new(CountingProvider {
            calls: AtomicU32::new(0),
        });
        let bus = Arc::new(InMemoryBus::new(16));
        let (tx, mut rx) = mpsc::channel(4);
        bus.subscribe_outbound(
            &ChannelType::WhatsAppOfficial,
            "test",
            Arc::new(Collect { tx }),
        )
        .await
        .unwrap();

        let consumer = consumer(provider, bus);
        consumer.handle(inbound("wamid.M2")).await.unwrap();

        let out = tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(out.content, "Hello!");
        assert_eq!(out.sender_type, SenderType::Bot);
        assert_eq!(out.contact_id, "5511999990000");
        assert!(!out.conversation_id.is_empty());
    }
}
