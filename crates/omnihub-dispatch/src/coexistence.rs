//! WhatsApp coexistence activity monitor.
//!
//! The Business App must stay in use next to the Cloud API; inbound
//! `message_echoes` prove it. An hourly scan walks every
//! coexistence-enabled channel and moves it through
//! pending → active → warning → disconnected based on echo age,
//! persisting and alerting only on actual transitions.

use std::sync::Arc;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use omnihub_bus::bus::{BusEvent, MessageBus};
use omnihub_core::config::{COEXISTENCE_DISCONNECT_DAYS, COEXISTENCE_WARNING_DAYS};
use omnihub_core::types::CoexistenceStatus;

use crate::error::{DispatchError, Result};

/// One observed state change from a scan or an echo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoexistenceTransition {
    pub channel_id: String,
    pub from: CoexistenceStatus,
    pub to: CoexistenceStatus,
    pub days_remaining: Option<i64>,
}

/// Persisted coexistence state per channel.
pub struct CoexistenceStore {
    db: Mutex<Connection>,
}

impl CoexistenceStore {
    pub fn new(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS channel_coexistence (
                channel_id TEXT PRIMARY KEY,
                status TEXT NOT NULL DEFAULT 'pending',
                last_echo_at TEXT,
                updated_at TEXT NOT NULL
            );",
        )?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    /// Start tracking a channel (idempotent).
    pub fn track(&self, channel_id: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT OR IGNORE INTO channel_coexistence (channel_id, status, updated_at)
             VALUES (?1, 'pending', ?2)",
            rusqlite::params![channel_id, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn status(&self, channel_id: &str) -> Result<Option<CoexistenceStatus>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            "SELECT status FROM channel_coexistence WHERE channel_id = ?1",
            [channel_id],
            |row| row.get::<_, String>(0),
        ) {
            Ok(raw) => Ok(raw.parse().ok()),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(DispatchError::Database(e)),
        }
    }

    /// Record a `message_echo`: refresh the echo timestamp and revive a
    /// warning/disconnected channel back to active.
    pub fn record_echo(
        &self,
        channel_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<CoexistenceTransition>> {
        self.track(channel_id)?;
        let before = self.status(channel_id)?.unwrap_or(CoexistenceStatus::Pending);
        let after = match before {
            CoexistenceStatus::Warning | CoexistenceStatus::Disconnected | CoexistenceStatus::Pending => {
                CoexistenceStatus::Active
            }
            other => other,
        };

        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE channel_coexistence
             SET last_echo_at = ?2, status = ?3, updated_at = ?4
             WHERE channel_id = ?1",
            rusqlite::params![
                channel_id,
                at.to_rfc3339(),
                after.as_str(),
                Utc::now().to_rfc3339()
            ],
        )?;

        if before != after {
            info!(channel_id, from = before.as_str(), to = after.as_str(), "coexistence revived by echo");
            Ok(Some(CoexistenceTransition {
                channel_id: channel_id.to_string(),
                from: before,
                to: after,
                days_remaining: None,
            }))
        } else {
            Ok(None)
        }
    }

    /// Evaluate every tracked channel against `now`, persisting and
    /// returning only actual transitions.
    pub fn scan(&self, now: DateTime<Utc>) -> Result<Vec<CoexistenceTransition>> {
        let rows: Vec<(String, String, Option<String>)> = {
            let db = self.db.lock().unwrap();
            let mut stmt = db.prepare(
                "SELECT channel_id, status, last_echo_at FROM channel_coexistence",
            )?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                    ))
                })?
                .filter_map(|r| r.ok())
                .collect();
            rows
        };

        let mut transitions = Vec::new();
        for (channel_id, status_raw, last_echo_raw) in rows {
            let before: CoexistenceStatus =
                status_raw.parse().unwrap_or(CoexistenceStatus::Pending);
            let last_echo = last_echo_raw
                .and_then(|t| DateTime::parse_from_rfc3339(&t).ok())
                .map(|t| t.with_timezone(&Utc));

            let (after, days_remaining) = classify(last_echo, now);
            if after == before {
                continue;
            }

            let db = self.db.lock().unwrap();
            db.execute(
                "UPDATE channel_coexistence SET status = ?2, updated_at = ?3 WHERE channel_id = ?1",
                rusqlite::params![channel_id, after.as_str(), Utc::now().to_rfc3339()],
            )?;
            drop(db);

            info!(
                channel_id = %channel_id,
                from = before.as_str(),
                to = after.as_str(),
                "coexistence state transition"
            );
            transitions.push(CoexistenceTransition {
                channel_id,
                from: before,
                to: after,
                days_remaining,
            });
        }
        Ok(transitions)
    }
}

/// Target state and (for warnings) days left before disconnection.
fn classify(last_echo: Option<DateTime<Utc>>, now: DateTime<Utc>) -> (CoexistenceStatus, Option<i64>) {
    let Some(last_echo) = last_echo else {
        return (CoexistenceStatus::Pending, None);
    };
    let days = (now - last_echo).num_days();
    if days >= COEXISTENCE_DISCONNECT_DAYS {
        (CoexistenceStatus::Disconnected, None)
    } else if days >= COEXISTENCE_WARNING_DAYS {
        (
            CoexistenceStatus::Warning,
            Some(COEXISTENCE_DISCONNECT_DAYS - days),
        )
    } else {
        (CoexistenceStatus::Active, None)
    }
}

/// Periodic scanner publishing one alert per transition.
pub struct CoexistenceMonitor {
    store: Arc<CoexistenceStore>,
    bus: Arc<dyn MessageBus>,
    interval_secs: u64,
}

impl CoexistenceMonitor {
    pub fn new(store: Arc<CoexistenceStore>, bus: Arc<dyn MessageBus>, interval_secs: u64) -> Self {
        Self {
            store,
            bus,
            interval_secs,
        }
    }

    pub async fn run(self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(self.interval_secs));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.scan_once(Utc::now()).await {
                        error!(error = %e, "coexistence scan failed");
                    }
                }
                _ = shutdown.cancelled() => {
                    info!("coexistence monitor shutting down");
                    return;
                }
            }
        }
    }

    pub async fn scan_once(&self, now: DateTime<Utc>) -> Result<()> {
        for transition in self.store.scan(now)? {
            self.bus
                .publish_event(BusEvent::CoexistenceAlert {
                    channel_id: transition.channel_id.clone(),
                    status: transition.to,
                    days_remaining: transition.days_remaining,
                })
                .await?;
        }
        Ok(())
    }
}
