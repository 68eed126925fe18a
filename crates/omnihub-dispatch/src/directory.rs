//! SQLite-backed implementations of the directory collaborator traits.
//!
//! The full CRUD surface for conversations and channels lives in an
//! external admin service; the pipeline only needs hot-path resolution,
//! which these tables cover for single-node deployments.

use std::sync::Mutex;

use rusqlite::Connection;
use tracing::debug;

use omnihub_core::directory::{ChannelDirectory, ConversationDirectory};
use omnihub_core::error::{HubError, Result};
use omnihub_core::types::{
    ChannelRecord, ChannelType, CoexistenceStatus, Conversation, ConversationStatus,
};

pub struct SqliteDirectory {
    db: Mutex<Connection>,
}

impl SqliteDirectory {
    pub fn new(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                channel_id TEXT NOT NULL,
                contact_id TEXT NOT NULL,
                assigned_user_id TEXT,
                status TEXT NOT NULL DEFAULT 'open',
                priority INTEGER NOT NULL DEFAULT 0,
                tags TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_conversations_active
                ON conversations (channel_id, contact_id);
            CREATE TABLE IF NOT EXISTS channels (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                channel_type TEXT NOT NULL,
                credentials TEXT NOT NULL DEFAULT '{}',
                config TEXT NOT NULL DEFAULT '{}',
                coexistence_status TEXT NOT NULL DEFAULT 'inactive',
                last_echo_at TEXT
            );",
        )
        .map_err(db_err)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    /// Register or update a channel record (startup wiring and tests).
    pub fn upsert_channel(&self, channel: &ChannelRecord) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO channels
             (id, tenant_id, channel_type, credentials, config, coexistence_status, last_echo_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET
                tenant_id = ?2, channel_type = ?3, credentials = ?4, config = ?5,
                coexistence_status = ?6, last_echo_at = ?7",
            rusqlite::params![
                channel.id,
                channel.tenant_id,
                channel.channel_type.as_key(),
                serde_json::to_string(&channel.credentials)?,
                serde_json::to_string(&channel.config)?,
                channel.coexistence_status.as_str(),
                channel.last_echo_at.map(|t| t.to_rfc3339()),
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }
}

impl ConversationDirectory for SqliteDirectory {
    fn resolve(&self, tenant_id: &str, channel_id: &str, contact_id: &str) -> Result<Conversation> {
        let db = self.db.lock().unwrap();
        let existing = db.query_row(
            "SELECT id, tenant_id, channel_id, contact_id, assigned_user_id, status, priority, tags
             FROM conversations WHERE channel_id = ?1 AND contact_id = ?2",
            rusqlite::params![channel_id, contact_id],
            row_to_conversation,
        );
        match existing {
            Ok(conv) => Ok(conv),
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                let id = uuid::Uuid::now_v7().to_string();
                db.execute(
                    "INSERT OR IGNORE INTO conversations
                     (id, tenant_id, channel_id, contact_id, status, priority, tags, created_at)
                     VALUES (?1, ?2, ?3, ?4, 'open', 0, '[]', ?5)",
                    rusqlite::params![
                        id,
                        tenant_id,
                        channel_id,
                        contact_id,
                        chrono::Utc::now().to_rfc3339()
                    ],
                )
                .map_err(db_err)?;
                debug!(channel_id, contact_id, "created conversation");
                // Read back to survive the insert race.
                db.query_row(
                    "SELECT id, tenant_id, channel_id, contact_id, assigned_user_id, status, priority, tags
                     FROM conversations WHERE channel_id = ?1 AND contact_id = ?2",
                    rusqlite::params![channel_id, contact_id],
                    row_to_conversation,
                )
                .map_err(db_err)
            }
            Err(e) => Err(db_err(e)),
        }
    }

    fn get(&self, conversation_id: &str) -> Result<Option<Conversation>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            "SELECT id, tenant_id, channel_id, contact_id, assigned_user_id, status, priority, tags
             FROM conversations WHERE id = ?1",
            [conversation_id],
            row_to_conversation,
        ) {
            Ok(conv) => Ok(Some(conv)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(db_err(e)),
        }
    }
}

impl ChannelDirectory for SqliteDirectory {
    fn get(&self, channel_id: &str) -> Result<Option<ChannelRecord>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            "SELECT id, tenant_id, channel_type, credentials, config, coexistence_status, last_echo_at
             FROM channels WHERE id = ?1",
            [channel_id],
            row_to_channel,
        ) {
            Ok(ch) => Ok(Some(ch)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(db_err(e)),
        }
    }

    fn coexistence_channels(&self) -> Result<Vec<ChannelRecord>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db
            .prepare(
                "SELECT id, tenant_id, channel_type, credentials, config, coexistence_status, last_echo_at
                 FROM channels WHERE channel_type = 'whatsapp_official'",
            )
            .map_err(db_err)?;
        let rows = stmt.query_map([], row_to_channel).map_err(db_err)?;
        Ok(rows
            .filter_map(|r| r.ok())
            .filter(|c| c.coexistence_enabled())
            .collect())
    }
}

fn row_to_conversation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Conversation> {
    let status_str: String = row.get(5)?;
    let tags_json: String = row.get(7)?;
    Ok(Conversation {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        channel_id: row.get(2)?,
        contact_id: row.get(3)?,
        assigned_user_id: row.get(4)?,
        status: match status_str.as_str() {
            "pending" => ConversationStatus::Pending,
            "resolved" => ConversationStatus::Resolved,
            "closed" => ConversationStatus::Closed,
            _ => ConversationStatus::Open,
        },
        priority: row.get(6)?,
        tags: serde_json::from_str(&tags_json).unwrap_or_default(),
    })
}

fn row_to_channel(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChannelRecord> {
    let type_str: String = row.get(2)?;
    let credentials: String = row.get(3)?;
    let config: String = row.get(4)?;
    let status_str: String = row.get(5)?;
    let last_echo: Option<String> = row.get(6)?;
    Ok(ChannelRecord {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        channel_type: type_str
            .parse::<ChannelType>()
            .unwrap_or(ChannelType::WebChat),
        credentials: serde_json::from_str(&credentials).unwrap_or_default(),
        config: serde_json::from_str(&config).unwrap_or_default(),
        coexistence_status: status_str
            .parse::<CoexistenceStatus>()
            .unwrap_or(CoexistenceStatus::Inactive),
        last_echo_at: last_echo
            .and_then(|t| chrono::DateTime::parse_from_rfc3339(&t).ok())
            .map(|t| t.with_timezone(&chrono::Utc)),
    })
}

fn db_err(e: rusqlite::Error) -> HubError {
    HubError::Database(e.to_string())
}
