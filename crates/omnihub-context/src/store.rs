//! Read-through, write-through store for conversation contexts.
//!
//! Writes persist first, then refresh the in-memory cache; reads prefer
//! the cache. Out-of-band mutators must call `invalidate`. The
//! per-conversation locks exposed here give the pipeline its
//! single-writer-per-conversation invariant without any global lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use dashmap::DashMap;
use rusqlite::Connection;
use tracing::debug;

use omnihub_core::config::{CONTEXT_TRIM_TO, MAX_CONTEXT_ENTRIES};
use omnihub_core::types::{Intent, Sentiment};

use crate::db::init_db;
use crate::error::{ContextError, Result};
use crate::types::{ContextEntry, ContextRole, ConversationContext, FlowState, PromptMessage};

pub struct ContextStore {
    db: Mutex<Connection>,
    cache: Mutex<HashMap<String, ConversationContext>>,
    locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

impl ContextStore {
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
            cache: Mutex::new(HashMap::new()),
            locks: DashMap::new(),
        })
    }

    /// Mutex serializing orchestrator work for one conversation. Stored
    /// in a sharded map; unrelated conversations never contend.
    pub fn conversation_lock(&self, conversation_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .entry(conversation_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    pub fn get_or_create(&self, conversation_id: &str) -> Result<ConversationContext> {
        if let Some(ctx) = self.cache.lock().unwrap().get(conversation_id) {
            return Ok(ctx.clone());
        }
        if let Some(ctx) = self.load(conversation_id)? {
            self.cache
                .lock()
                .unwrap()
                .insert(conversation_id.to_string(), ctx.clone());
            return Ok(ctx);
        }
        let ctx = ConversationContext::new(conversation_id);
        self.persist(&ctx)?;
        self.cache
            .lock()
            .unwrap()
            .insert(conversation_id.to_string(), ctx.clone());
        debug!(conversation_id, "created conversation context");
        Ok(ctx)
    }

    pub fn add_user_message(
        &self,
        conversation_id: &str,
        content: &str,
        message_id: Option<&str>,
    ) -> Result<()> {
        self.append(conversation_id, ContextRole::User, content, message_id)
    }

    pub fn add_assistant_message(
        &self,
        conversation_id: &str,
        content: &str,
        message_id: Option<&str>,
    ) -> Result<()> {
        self.append(conversation_id, ContextRole::Assistant, content, message_id)
    }

    pub fn add_system_message(&self, conversation_id: &str, content: &str) -> Result<()> {
        self.append(conversation_id, ContextRole::System, content, None)
    }

    pub fn set_intent(&self, conversation_id: &str, intent: Intent) -> Result<()> {
        self.mutate(conversation_id, |ctx| ctx.intent = Some(intent.clone()))
    }

    pub fn set_sentiment(&self, conversation_id: &str, sentiment: Sentiment) -> Result<()> {
        self.mutate(conversation_id, |ctx| ctx.sentiment = sentiment)
    }

    pub fn set_entity(&self, conversation_id: &str, key: &str, value: &str) -> Result<()> {
        self.mutate(conversation_id, |ctx| {
            ctx.entities.insert(key.to_string(), value.to_string());
        })
    }

    pub fn set_state(&self, conversation_id: &str, state: FlowState) -> Result<()> {
        self.mutate(conversation_id, |ctx| ctx.state = state.clone())
    }

    /// Drop flow bookkeeping, keeping collected data for reference.
    pub fn clear_state(&self, conversation_id: &str) -> Result<()> {
        self.mutate(conversation_id, |ctx| ctx.state.end_flow())
    }

    /// Most recent `max` window entries, oldest first.
    pub fn get_context_window(
        &self,
        conversation_id: &str,
        max: usize,
    ) -> Result<Vec<ContextEntry>> {
        let ctx = self.get_or_create(conversation_id)?;
        let skip = ctx.window.len().saturating_sub(max);
        Ok(ctx.window[skip..].to_vec())
    }

    /// Assemble the provider message list: system prompt, recent turns,
    /// and the current user message (not duplicated when the caller
    /// already appended it to the window).
    pub fn build_messages_for_ai(
        &self,
        conversation_id: &str,
        system_prompt: &str,
        current_user_msg: &str,
        max: usize,
    ) -> Result<Vec<PromptMessage>> {
        let window = self.get_context_window(conversation_id, max)?;
        let mut messages = vec![PromptMessage {
            role: ContextRole::System,
            content: system_prompt.to_string(),
        }];
        for entry in &window {
            messages.push(PromptMessage {
                role: entry.role,
                content: entry.content.clone(),
            });
        }
        let already_last = window
            .last()
            .map(|e| e.role == ContextRole::User && e.content == current_user_msg)
            .unwrap_or(false);
        if !already_last {
            messages.push(PromptMessage {
                role: ContextRole::User,
                content: current_user_msg.to_string(),
            });
        }
        Ok(messages)
    }

    /// Drop the cached copy; the next read goes to the database.
    pub fn invalidate(&self, conversation_id: &str) {
        self.cache.lock().unwrap().remove(conversation_id);
    }

    // ── internals ────────────────────────────────────────────────────────

    fn append(
        &self,
        conversation_id: &str,
        role: ContextRole,
        content: &str,
        message_id: Option<&str>,
    ) -> Result<()> {
        self.mutate(conversation_id, |ctx| {
            ctx.window.push(ContextEntry {
                role,
                content: content.to_string(),
                message_id: message_id.map(|s| s.to_string()),
                ts: Utc::now(),
            });
            trim_window(&mut ctx.window);
        })
    }

    fn mutate<F>(&self, conversation_id: &str, f: F) -> Result<()>
    where
        F: Fn(&mut ConversationContext),
    {
        let mut ctx = self.get_or_create(conversation_id)?;
        f(&mut ctx);
        ctx.updated_at = Utc::now();
        // Write-through: the database first, then the cache.
        self.persist(&ctx)?;
        self.cache
            .lock()
            .unwrap()
            .insert(conversation_id.to_string(), ctx);
        Ok(())
    }

    fn load(&self, conversation_id: &str) -> Result<Option<ConversationContext>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            "SELECT context FROM conversation_contexts WHERE conversation_id = ?1",
            [conversation_id],
            |row| row.get::<_, String>(0),
        ) {
            Ok(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(ContextError::Database(e)),
        }
    }

    fn persist(&self, ctx: &ConversationContext) -> Result<()> {
        let raw = serde_json::to_string(ctx)?;
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO conversation_contexts (conversation_id, context, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(conversation_id) DO UPDATE SET context = ?2, updated_at = ?3",
            rusqlite::params![ctx.conversation_id, raw, ctx.updated_at.to_rfc3339()],
        )?;
        Ok(())
    }
}

/// Oldest-first trim down to `CONTEXT_TRIM_TO` once the window exceeds
/// `MAX_CONTEXT_ENTRIES`. The most recent user entry always survives.
fn trim_window(window: &mut Vec<ContextEntry>) {
    if window.len() <= MAX_CONTEXT_ENTRIES {
        return;
    }
    let cutoff = window.len() - CONTEXT_TRIM_TO;
    let last_user_idx = window
        .iter()
        .rposition(|e| e.role == ContextRole::User);

    let mut kept: Vec<ContextEntry> = Vec::with_capacity(CONTEXT_TRIM_TO + 1);
    if let Some(idx) = last_user_idx {
        if idx < cutoff {
            kept.push(window[idx].clone());
        }
    }
    kept.extend_from_slice(&window[cutoff..]);
    *window = kept;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ContextStore {
        ContextStore::new(Connection::open_in_memory().unwrap()).unwrap()
    }

    fn entry(role: ContextRole, content: &str) -> ContextEntry {
        ContextEntry {
            role,
            content: content.to_string(),
            message_id: None,
            ts: Utc::now(),
        }
    }

    #[test]
    fn get_or_create_is_idempotent() {
        let s = store();
        let a = s.get_or_create("c1").unwrap();
        let b = s.get_or_create("c1").unwrap();
        assert_eq!(a.conversation_id, b.conversation_id);
        assert!(a.is_fresh());
    }

    #[test]
    fn window_never_exceeds_max() {
        let s = store();
        for i in 0..50 {
            s.add_user_message("c1", &format!("u{i}"), None).unwrap();
            s.add_assistant_message("c1", &format!("a{i}"), None).unwrap();
        }
        let ctx = s.get_or_create("c1").unwrap();
        assert!(ctx.window.len() <= MAX_CONTEXT_ENTRIES);
    }

    #[test]
    fn trim_goes_down_to_trim_target() {
        let mut window: Vec<ContextEntry> = (0..MAX_CONTEXT_ENTRIES + 1)
            .map(|i| {
                entry(
                    if i % 2 == 0 {
                        ContextRole::User
                    } else {
                        ContextRole::Assistant
                    },
                    &format!("m{i}"),
                )
            })
            .collect();
        trim_window(&mut window);
        assert_eq!(window.len(), CONTEXT_TRIM_TO);
        // Oldest entries went first.
        assert_eq!(window.first().unwrap().content, "m11");
    }

    #[test]
    fn trim_preserves_most_recent_user_message() {
        // A long run of assistant/system turns after the last user turn
        // would push it past the cutoff; the trim keeps it anyway.
        let mut window = vec![entry(ContextRole::User, "keep me")];
        for i in 0..MAX_CONTEXT_ENTRIES {
            window.push(entry(ContextRole::Assistant, &format!("a{i}")));
        }
        trim_window(&mut window);
        assert!(window.iter().any(|e| e.content == "keep me"));
        assert_eq!(window.len(), CONTEXT_TRIM_TO + 1);
    }

    #[test]
    fn build_messages_places_system_first_and_user_last() {
        let s = store();
        s.add_user_message("c1", "hello", None).unwrap();
        s.add_assistant_message("c1", "hi!", None).unwrap();

        let msgs = s
            .build_messages_for_ai("c1", "You are helpful", "how are you?", 20)
            .unwrap();
        assert_eq!(msgs.first().unwrap().role, ContextRole::System);
        assert_eq!(msgs.first().unwrap().content, "You are helpful");
        assert_eq!(msgs.last().unwrap().role, ContextRole::User);
        assert_eq!(msgs.last().unwrap().content, "how are you?");
        assert_eq!(msgs.len(), 4);
    }

    #[test]
    fn build_messages_does_not_duplicate_appended_user_message() {
        let s = store();
        s.add_user_message("c1", "hello", None).unwrap();
        let msgs = s
            .build_messages_for_ai("c1", "sys", "hello", 20)
            .unwrap();
        // system + the single user turn.
        assert_eq!(msgs.len(), 2);
    }

    #[test]
    fn state_and_entities_persist_through_reload() {
        let s = store();
        s.set_entity("c1", "city", "Lisbon").unwrap();
        let mut flow = FlowState::default();
        flow.active_flow_id = Some("f1".to_string());
        flow.current_node_id = Some("n0".to_string());
        s.set_state("c1", flow).unwrap();

        // Drop the cache; the database copy must carry everything.
        s.invalidate("c1");
        let ctx = s.get_or_create("c1").unwrap();
        assert_eq!(ctx.entities["city"], "Lisbon");
        assert_eq!(ctx.state.active_flow_id.as_deref(), Some("f1"));

        s.clear_state("c1").unwrap();
        let ctx = s.get_or_create("c1").unwrap();
        assert!(!ctx.state.is_active());
    }

    #[test]
    fn intent_and_sentiment_round_trip() {
        let s = store();
        s.set_intent(
            "c1",
            Intent {
                name: "order_status".to_string(),
                confidence: 0.92,
            },
        )
        .unwrap();
        s.set_sentiment("c1", Sentiment::Negative).unwrap();
        s.invalidate("c1");
        let ctx = s.get_or_create("c1").unwrap();
        assert_eq!(ctx.intent.as_ref().unwrap().name, "order_status");
        assert_eq!(ctx.sentiment, Sentiment::Negative);
    }
}
