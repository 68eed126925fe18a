//! Collaborator interfaces the pipeline consumes but does not own.
//!
//! Conversation, contact, and channel CRUD live behind an admin surface
//! elsewhere; the core only needs to resolve the records the pipeline
//! touches on the hot path.

use crate::error::Result;
use crate::types::{Bot, ChannelRecord, Conversation};

/// Resolves the active conversation for a (channel, contact) pair.
///
/// One active conversation per pair is expected; implementations create
/// it on first contact.
pub trait ConversationDirectory: Send + Sync {
    fn resolve(&self, tenant_id: &str, channel_id: &str, contact_id: &str) -> Result<Conversation>;

    fn get(&self, conversation_id: &str) -> Result<Option<Conversation>>;
}

/// Looks up channel registrations by id.
pub trait ChannelDirectory: Send + Sync {
    fn get(&self, channel_id: &str) -> Result<Option<ChannelRecord>>;

    /// All channels with coexistence enabled, for the monitor scan.
    fn coexistence_channels(&self) -> Result<Vec<ChannelRecord>>;
}

/// Finds the bot serving a given channel.
pub trait BotDirectory: Send + Sync {
    fn bot_for_channel(&self, channel_id: &str) -> Option<Bot>;
}

/// Config-backed bot lookup for single-node deployments.
pub struct StaticBotDirectory {
    bots: Vec<Bot>,
}

impl StaticBotDirectory {
    pub fn new(bots: Vec<Bot>) -> Self {
        Self { bots }
    }
}

impl BotDirectory for StaticBotDirectory {
    fn bot_for_channel(&self, channel_id: &str) -> Option<Bot> {
        self.bots
            .iter()
            .find(|b| b.channels.iter().any(|c| c == channel_id))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Bot, BotSettings, BotStatus, ToolChoice};

    fn bot(id: &str, channels: &[&str]) -> Bot {
        Bot {
            id: id.to_string(),
            tenant_id: "t1".to_string(),
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            config: BotSettings {
                system_prompt: "You are helpful".to_string(),
                temperature: 0.7,
                max_tokens: 512,
                context_window_size: 20,
                confidence_threshold: 0.5,
                fallback_message: "Sorry, try again later.".to_string(),
                welcome_message: None,
                escalation_rules: Vec::new(),
                working_hours: None,
                knowledge_base_id: None,
                tools: Vec::new(),
                tool_choice: ToolChoice::Auto,
            },
            channels: channels.iter().map(|s| s.to_string()).collect(),
            status: BotStatus::Active,
        }
    }

    #[test]
    fn static_directory_matches_by_channel() {
        let dir = StaticBotDirectory::new(vec![bot("b1", &["ch1"]), bot("b2", &["ch2", "ch3"])]);
        assert_eq!(dir.bot_for_channel("ch3").unwrap().id, "b2");
        assert!(dir.bot_for_channel("ch9").is_none());
    }
}
