use rusqlite::Connection;

use crate::error::Result;

/// Create the context table. One JSON document per conversation; the
/// single-writer discipline makes a document row safe and keeps reads
/// to one lookup.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS conversation_contexts (
            conversation_id TEXT PRIMARY KEY,
            context TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );",
    )?;
    Ok(())
}
