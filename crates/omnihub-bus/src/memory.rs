//! In-process bus implementation over bounded tokio mpsc queues.
//!
//! One queue per (subject, group) pair lives inside the bus, not inside
//! the worker, so a consumer that restarts re-attaches to its backlog.
//! Delivery to a full queue is detached into a background task, which
//! keeps the publisher and every other group unblocked.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use omnihub_core::message::{Message, StatusUpdate};
use omnihub_core::types::ChannelType;

use crate::bus::{BusEvent, EventHandler, MessageBus, MessageHandler, StatusHandler};
use crate::error::{BusError, Result};
use crate::subjects;

/// In-place redeliveries before a message is dropped as poison.
const MAX_REDELIVERIES: u32 = 5;
/// Delay between redeliveries of the same message.
const REDELIVERY_DELAY_MS: u64 = 1_000;

#[derive(Clone)]
enum Payload {
    Message(Message),
    Status(StatusUpdate),
    Event(BusEvent),
}

struct Group {
    tx: mpsc::Sender<Payload>,
    /// Present until a worker claims it. A second active subscriber for
    /// the same (subject, group) is an error.
    rx: Mutex<Option<mpsc::Receiver<Payload>>>,
}

/// Bounded multi-group in-memory broker.
pub struct InMemoryBus {
    groups: DashMap<(String, String), Arc<Group>>,
    queue_depth: usize,
    shutdown: CancellationToken,
}

impl InMemoryBus {
    pub fn new(queue_depth: usize) -> Self {
        Self {
            groups: DashMap::new(),
            queue_depth,
            shutdown: CancellationToken::new(),
        }
    }

    /// Token cancelled when the bus shuts down; workers exit on it.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    fn group(&self, subject: &str, group: &str) -> Arc<Group> {
        self.groups
            .entry((subject.to_string(), group.to_string()))
            .or_insert_with(|| {
                let (tx, rx) = mpsc::channel(self.queue_depth);
                Arc::new(Group {
                    tx,
                    rx: Mutex::new(Some(rx)),
                })
            })
            .clone()
    }

    fn deliver(&self, subject: &str, payload: Payload) {
        let mut delivered = 0usize;
        for entry in self.groups.iter() {
            let (sub, group_name) = entry.key();
            if sub != subject {
                continue;
            }
            delivered += 1;
            match entry.value().tx.try_send(payload.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(p)) => {
                    // Slow group: hand the send to a background task so the
                    // publisher and sibling groups keep moving.
                    let tx = entry.value().tx.clone();
                    let group_name = group_name.clone();
                    let subject = subject.to_string();
                    tokio::spawn(async move {
                        if tx.send(p).await.is_err() {
                            warn!(%subject, group = %group_name, "bus group closed while backlogged");
                        }
                    });
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    warn!(%subject, group = %group_name, "bus group receiver gone");
                }
            }
        }
        if delivered == 0 {
            debug!(%subject, "no subscription groups for subject");
        }
    }

    /// Claim the group's receiver and spawn its worker task.
    async fn attach(&self, subject: &str, group_name: &str, handler: PayloadHandler) -> Result<()> {
        let group = self.group(subject, group_name);
        let rx = group
            .rx
            .lock()
            .await
            .take()
            .ok_or_else(|| BusError::GroupActive {
                subject: subject.to_string(),
                group: group_name.to_string(),
            })?;

        let shutdown = self.shutdown.clone();
        let subject = subject.to_string();
        let group_name = group_name.to_string();
        tokio::spawn(run_worker(rx, handler, shutdown, subject, group_name));
        Ok(())
    }
}

/// Handler adapter erasing the payload kind a subscription consumes.
enum PayloadHandler {
    Message(Arc<dyn MessageHandler>),
    Status(Arc<dyn StatusHandler>),
    Event(Arc<dyn EventHandler>),
}

impl PayloadHandler {
    async fn invoke(&self, payload: Payload) -> Result<()> {
        match (self, payload) {
            (PayloadHandler::Message(h), Payload::Message(m)) => h.handle(m).await,
            (PayloadHandler::Status(h), Payload::Status(s)) => h.handle(s).await,
            (PayloadHandler::Event(h), Payload::Event(e)) => h.handle(e).await,
            _ => Err(BusError::Handler(
                "payload kind does not match subscription".to_string(),
            )),
        }
    }
}

/// Worker loop: pull, invoke, retry in place on error (at-least-once).
async fn run_worker(
    mut rx: mpsc::Receiver<Payload>,
    handler: PayloadHandler,
    shutdown: CancellationToken,
    subject: String,
    group: String,
) {
    loop {
        let payload = tokio::select! {
            _ = shutdown.cancelled() => {
                debug!(%subject, %group, "bus worker shutting down");
                return;
            }
            p = rx.recv() => match p {
                Some(p) => p,
                None => return,
            },
        };

        for attempt in 0..=MAX_REDELIVERIES {
            match handler.invoke(payload.clone()).await {
                Ok(()) => break,
                Err(e) if attempt == MAX_REDELIVERIES => {
                    error!(%subject, %group, error = %e, "message dropped after max redeliveries");
                }
                Err(e) => {
                    warn!(%subject, %group, attempt, error = %e, "handler failed, redelivering");
                    tokio::select! {
                        _ = shutdown.cancelled() => return,
                        _ = tokio::time::sleep(std::time::Duration::from_millis(REDELIVERY_DELAY_MS)) => {}
                    }
                }
            }
        }
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn publish_inbound(&self, msg: Message) -> Result<()> {
        let subject = subjects::inbound(&msg.tenant_id);
        self.deliver(&subject, Payload::Message(msg));
        Ok(())
    }

    async fn publish_outbound(&self, msg: Message) -> Result<()> {
        let subject = subjects::outbound(&msg.channel_type);
        self.deliver(&subject, Payload::Message(msg));
        Ok(())
    }

    async fn publish_status(&self, update: StatusUpdate) -> Result<()> {
        self.deliver(subjects::STATUS_UPDATES, Payload::Status(update));
        Ok(())
    }

    async fn publish_event(&self, event: BusEvent) -> Result<()> {
        let subject = subjects::event(event.kind());
        self.deliver(&subject, Payload::Event(event));
        Ok(())
    }

    async fn subscribe_inbound(
        &self,
        tenant_id: &str,
        group: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<()> {
        self.attach(&subjects::inbound(tenant_id), group, PayloadHandler::Message(handler))
            .await
    }

    async fn subscribe_outbound(
        &self,
        channel_type: &ChannelType,
        group: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<()> {
        self.attach(
            &subjects::outbound(channel_type),
            group,
            PayloadHandler::Message(handler),
        )
        .await
    }

    async fn subscribe_status(&self, group: &str, handler: Arc<dyn StatusHandler>) -> Result<()> {
        self.attach(subjects::STATUS_UPDATES, group, PayloadHandler::Status(handler))
            .await
    }

    async fn subscribe_events(
        &self,
        kind: &str,
        group: &str,
        handler: Arc<dyn EventHandler>,
    ) -> Result<()> {
        self.attach(&subjects::event(kind), group, PayloadHandler::Event(handler))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use omnihub_core::message::ContentType;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::mpsc as test_mpsc;

    fn msg(tenant: &str) -> Message {
        Message::inbound(
            tenant,
            "c1",
            "ch1",
            ChannelType::WhatsAppOfficial,
            "5511999990000",
            ContentType::Text,
            "hi",
        )
    }

    struct Collect {
        tx: test_mpsc::Sender<Message>,
    }

    #[async_trait]
    impl MessageHandler for Collect {
        async fn handle(&self, m: Message) -> Result<()> {
            self.tx.send(m).await.map_err(|e| BusError::Handler(e.to_string()))
        }
    }

    #[tokio::test]
    async fn inbound_routes_by_tenant() {
        let bus = InMemoryBus::new(16);
        let (tx, mut rx) = test_mpsc::channel(4);
        bus.subscribe_inbound("acme", "workers", Arc::new(Collect { tx }))
            .await
            .unwrap();

        bus.publish_inbound(msg("acme")).await.unwrap();
        bus.publish_inbound(msg("other")).await.unwrap();

        let got = tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.tenant_id, "acme");
        // The other tenant's message never arrives here.
        assert!(
            tokio::time::timeout(std::time::Duration::from_millis(100), rx.recv())
                .await
                .is_err()
        );
    }

    struct FailTwice {
        attempts: AtomicU32,
        tx: test_mpsc::Sender<u32>,
    }

    #[async_trait]
    impl MessageHandler for FailTwice {
        async fn handle(&self, _m: Message) -> Result<()> {
            let n = self.attempts.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(BusError::Handler("transient".to_string()))
            } else {
                self.tx.send(n).await.ok();
                Ok(())
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn failed_handler_gets_redelivery() {
        let bus = InMemoryBus::new(16);
        let (tx, mut rx) = test_mpsc::channel(1);
        bus.subscribe_inbound(
            "t",
            "workers",
            Arc::new(FailTwice {
                attempts: AtomicU32::new(0),
                tx,
            }),
        )
        .await
        .unwrap();

        bus.publish_inbound(msg("t")).await.unwrap();

        let succeeded_on = tokio::time::timeout(std::time::Duration::from_secs(30), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(succeeded_on, 2);
    }

    #[tokio::test]
    async fn second_subscriber_for_same_group_is_rejected() {
        let bus = InMemoryBus::new(16);
        let (tx, _rx) = test_mpsc::channel(4);
        let h: Arc<dyn MessageHandler> = Arc::new(Collect { tx });
        bus.subscribe_inbound("t", "g", h.clone()).await.unwrap();
        let err = bus.subscribe_inbound("t", "g", h).await.unwrap_err();
        assert!(matches!(err, BusError::GroupActive { .. }));
    }
}
