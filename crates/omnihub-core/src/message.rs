use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::ChannelType;

/// Who produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SenderType {
    Contact,
    User,
    Bot,
    System,
}

/// Canonical content type every provider payload is normalized into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Text,
    Image,
    Video,
    Audio,
    Document,
    Location,
    Contact,
    Template,
    Interactive,
}

/// Delivery status of a message.
///
/// The lifecycle is `Pending → Sent → Delivered → Read` with `Failed` as a
/// terminal sink reachable from any state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Pending,
    Sent,
    Delivered,
    Read,
    Failed,
}

impl MessageStatus {
    /// Total order used to keep status folds monotonic when the bus
    /// reorders deliveries.
    pub fn rank(&self) -> u8 {
        match self {
            MessageStatus::Pending => 0,
            MessageStatus::Sent => 1,
            MessageStatus::Delivered => 2,
            MessageStatus::Read => 3,
            MessageStatus::Failed => 4,
        }
    }

    /// Fold an incoming status update into the current one.
    ///
    /// Keeps the higher rank; `Failed` always wins. Equal ranks keep the
    /// current value so replays are idempotent.
    pub fn fold(self, incoming: MessageStatus) -> MessageStatus {
        if incoming.rank() > self.rank() {
            incoming
        } else {
            self
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, MessageStatus::Read | MessageStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Pending => "pending",
            MessageStatus::Sent => "sent",
            MessageStatus::Delivered => "delivered",
            MessageStatus::Read => "read",
            MessageStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for MessageStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(MessageStatus::Pending),
            "sent" => Ok(MessageStatus::Sent),
            "delivered" => Ok(MessageStatus::Delivered),
            "read" => Ok(MessageStatus::Read),
            "failed" => Ok(MessageStatus::Failed),
            other => Err(format!("unknown message status: {other}")),
        }
    }
}

/// A file or media object referenced by a message.
///
/// An attachment carries either a directly downloadable `url` or a
/// provider-issued `media_id`; resolving a media id to bytes is the
/// owning adapter's job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Attachment {
    pub id: String,
    /// Attachment kind as a canonical content type string (image, audio, …).
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    pub mime_type: String,
    #[serde(default)]
    pub size_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Canonical, provider-independent representation of a single
/// communication event. This is the payload carried on every bus subject.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub tenant_id: String,
    pub conversation_id: String,
    pub channel_id: String,
    pub channel_type: ChannelType,
    /// Provider-native address of the external contact (phone number,
    /// chat id, …). Inbound: the sender. Outbound: the recipient.
    pub contact_id: String,
    pub sender_type: SenderType,
    pub sender_id: String,
    pub content_type: ContentType,
    /// Plain text for `Text`; JSON-encoded payload for structured types.
    pub content: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    pub status: MessageStatus,
    /// Provider-assigned id, unique per channel once set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// A fresh inbound message from an external contact.
    pub fn inbound(
        tenant_id: impl Into<String>,
        conversation_id: impl Into<String>,
        channel_id: impl Into<String>,
        channel_type: ChannelType,
        contact_id: impl Into<String>,
        content_type: ContentType,
        content: impl Into<String>,
    ) -> Self {
        let contact_id = contact_id.into();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            tenant_id: tenant_id.into(),
            conversation_id: conversation_id.into(),
            channel_id: channel_id.into(),
            channel_type,
            sender_id: contact_id.clone(),
            contact_id,
            sender_type: SenderType::Contact,
            content_type,
            content: content.into(),
            metadata: HashMap::new(),
            attachments: Vec::new(),
            status: MessageStatus::Delivered,
            external_id: None,
            created_at: Utc::now(),
        }
    }

    /// A bot reply destined for the contact of `inbound`.
    pub fn bot_reply(inbound: &Message, content_type: ContentType, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            tenant_id: inbound.tenant_id.clone(),
            conversation_id: inbound.conversation_id.clone(),
            channel_id: inbound.channel_id.clone(),
            channel_type: inbound.channel_type.clone(),
            contact_id: inbound.contact_id.clone(),
            sender_type: SenderType::Bot,
            sender_id: "bot".to_string(),
            content_type,
            content: content.into(),
            metadata: HashMap::new(),
            attachments: Vec::new(),
            status: MessageStatus::Pending,
            external_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: serde_json::Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }
}

/// Delivery status change fanned out on `status.updates`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub message_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    pub status: MessageStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl StatusUpdate {
    pub fn sent(message_id: impl Into<String>, external_id: Option<String>) -> Self {
        Self {
            message_id: message_id.into(),
            external_id,
            status: MessageStatus::Sent,
            error_message: None,
            timestamp: Utc::now(),
        }
    }

    pub fn failed(message_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            external_id: None,
            status: MessageStatus::Failed,
            error_message: Some(reason.into()),
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_fold_is_monotonic() {
        let s = MessageStatus::Pending;
        let s = s.fold(MessageStatus::Sent);
        assert_eq!(s, MessageStatus::Sent);
        // A late-arriving lower-rank update never regresses the status.
        let s = s.fold(MessageStatus::Pending);
        assert_eq!(s, MessageStatus::Sent);
        let s = s.fold(MessageStatus::Read);
        assert_eq!(s, MessageStatus::Read);
    }

    #[test]
    fn failed_is_a_sink() {
        let s = MessageStatus::Sent.fold(MessageStatus::Failed);
        assert_eq!(s, MessageStatus::Failed);
        assert_eq!(s.fold(MessageStatus::Read), MessageStatus::Failed);
        assert!(s.is_terminal());
    }

    #[test]
    fn status_round_trips_through_str() {
        for s in [
            MessageStatus::Pending,
            MessageStatus::Sent,
            MessageStatus::Delivered,
            MessageStatus::Read,
            MessageStatus::Failed,
        ] {
            assert_eq!(s.as_str().parse::<MessageStatus>().unwrap(), s);
        }
    }

    #[test]
    fn bot_reply_targets_the_inbound_contact() {
        let inbound = Message::inbound(
            "t1",
            "c1",
            "ch1",
            ChannelType::WhatsAppOfficial,
            "5511999990000",
            ContentType::Text,
            "hi",
        );
        let reply = Message::bot_reply(&inbound, ContentType::Text, "Hello!");
        assert_eq!(reply.contact_id, "5511999990000");
        assert_eq!(reply.conversation_id, "c1");
        assert_eq!(reply.sender_type, SenderType::Bot);
        assert_eq!(reply.status, MessageStatus::Pending);
    }
}
