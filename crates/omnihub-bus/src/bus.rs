use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use omnihub_core::message::{Message, StatusUpdate};
use omnihub_core::types::{ChannelType, CoexistenceStatus};

use crate::error::Result;

/// Out-of-band pipeline event fanned out on `events.<type>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusEvent {
    CoexistenceAlert {
        channel_id: String,
        status: CoexistenceStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        days_remaining: Option<i64>,
    },
    Escalation {
        conversation_id: String,
        reason: String,
    },
    ImportProgress {
        job_id: String,
        conversations: u64,
        messages: u64,
        contacts: u64,
    },
}

impl BusEvent {
    /// Subject suffix for `events.<type>`.
    pub fn kind(&self) -> &'static str {
        match self {
            BusEvent::CoexistenceAlert { .. } => "coexistence",
            BusEvent::Escalation { .. } => "escalation",
            BusEvent::ImportProgress { .. } => "import",
        }
    }
}

/// Consumer callback for canonical messages.
///
/// Returning an error triggers redelivery (at-least-once); handlers must
/// be idempotent, which the dedupe layer provides for externally-keyed
/// messages.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, msg: Message) -> Result<()>;
}

#[async_trait]
pub trait StatusHandler: Send + Sync {
    async fn handle(&self, update: StatusUpdate) -> Result<()>;
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: BusEvent) -> Result<()>;
}

/// Transport-agnostic pub/sub seam between ingress, orchestration, and
/// egress workers.
///
/// Guarantees: at-least-once delivery per subscription group; durable
/// group queues (a restarting consumer re-attaches to its backlog); no
/// cross-conversation ordering. A blocked group never stalls other
/// groups.
#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn publish_inbound(&self, msg: Message) -> Result<()>;

    async fn publish_outbound(&self, msg: Message) -> Result<()>;

    async fn publish_status(&self, update: StatusUpdate) -> Result<()>;

    async fn publish_event(&self, event: BusEvent) -> Result<()>;

    /// Consume inbound messages for one tenant.
    async fn subscribe_inbound(
        &self,
        tenant_id: &str,
        group: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<()>;

    /// Consume outbound messages for one channel type.
    async fn subscribe_outbound(
        &self,
        channel_type: &ChannelType,
        group: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<()>;

    async fn subscribe_status(&self, group: &str, handler: Arc<dyn StatusHandler>) -> Result<()>;

    async fn subscribe_events(
        &self,
        kind: &str,
        group: &str,
        handler: Arc<dyn EventHandler>,
    ) -> Result<()>;
}
