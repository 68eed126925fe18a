//! WhatsApp 24-hour session window tracking.
//!
//! Every customer-initiated message opens (or refreshes) a free-form
//! messaging window per (phone_number_id, contact). Once it expires,
//! outbound messages must go as templates.

use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use rusqlite::Connection;
use tracing::debug;

use omnihub_core::config::SESSION_WINDOW_HOURS;
use omnihub_channels::error::{ChannelError, Result};

/// One (phone_number_id, contact) messaging window.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionWindow {
    pub phone_number_id: String,
    pub contact: String,
    pub last_customer_message_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl SessionWindow {
    pub fn can_send_session_message(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// SQLite-backed window store shared by ingress and dispatcher.
pub struct SessionWindowStore {
    db: Mutex<Connection>,
}

impl SessionWindowStore {
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    /// Record a customer-initiated message, opening or refreshing the window.
    pub fn record_customer_message(
        &self,
        phone_number_id: &str,
        contact: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let expires = at + Duration::hours(SESSION_WINDOW_HOURS);
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO session_windows (phone_number_id, contact, last_customer_message_at, expires_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(phone_number_id, contact)
             DO UPDATE SET last_customer_message_at = ?3, expires_at = ?4",
            rusqlite::params![phone_number_id, contact, at.to_rfc3339(), expires.to_rfc3339()],
        )
        .map_err(db_err)?;
        debug!(phone_number_id, contact, "session window refreshed");
        Ok(())
    }

    /// Fetch the window, if the contact ever messaged in.
    pub fn window(&self, phone_number_id: &str, contact: &str) -> Result<Option<SessionWindow>> {
        let db = self.db.lock().unwrap();
        let row = db.query_row(
            "SELECT last_customer_message_at, expires_at FROM session_windows
             WHERE phone_number_id = ?1 AND contact = ?2",
            rusqlite::params![phone_number_id, contact],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                ))
            },
        );
        match row {
            Ok((last, expires)) => Ok(Some(SessionWindow {
                phone_number_id: phone_number_id.to_string(),
                contact: contact.to_string(),
                last_customer_message_at: parse_ts(&last)?,
                expires_at: parse_ts(&expires)?,
            })),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(db_err(e)),
        }
    }

    /// True when a free-form message may still be sent to the contact.
    pub fn is_open(&self, phone_number_id: &str, contact: &str, now: DateTime<Utc>) -> Result<bool> {
        Ok(self
            .window(phone_number_id, contact)?
            .map(|w| w.can_send_session_message(now))
            .unwrap_or(false))
    }
}

fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS session_windows (
            phone_number_id TEXT NOT NULL,
            contact TEXT NOT NULL,
            last_customer_message_at TEXT NOT NULL,
            expires_at TEXT NOT NULL,
            PRIMARY KEY (phone_number_id, contact)
        );",
    )
    .map_err(db_err)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ChannelError::Parse(format!("bad stored timestamp '{raw}': {e}")))
}

fn db_err(e: rusqlite::Error) -> ChannelError {
    ChannelError::Parse(format!("session store: {e}"))
}
