//! Knowledge-base retrieval: embeddings in SQLite, cosine similarity,
//! top-k framed into the system prompt.

use std::sync::Mutex;

use rusqlite::Connection;

use crate::error::{AgentError, Result};

/// How many items the orchestrator pulls into the prompt.
pub const TOP_K: usize = 3;

#[derive(Debug, Clone)]
pub struct KnowledgeItem {
    pub id: String,
    pub content: String,
    pub score: f32,
}

pub struct KnowledgeStore {
    db: Mutex<Connection>,
}

impl KnowledgeStore {
    pub fn new(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS knowledge_items (
                id TEXT PRIMARY KEY,
                kb_id TEXT NOT NULL,
                content TEXT NOT NULL,
                embedding BLOB NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_knowledge_kb ON knowledge_items (kb_id);",
        )
        .map_err(db_err)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    pub fn add_item(&self, kb_id: &str, content: &str, embedding: &[f32]) -> Result<String> {
        let id = uuid::Uuid::now_v7().to_string();
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO knowledge_items (id, kb_id, content, embedding, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                id,
                kb_id,
                content,
                encode_embedding(embedding),
                chrono::Utc::now().to_rfc3339()
            ],
        )
        .map_err(db_err)?;
        Ok(id)
    }

    /// Nearest items to the query vector by cosine similarity.
    pub fn top_k(&self, kb_id: &str, query: &[f32], k: usize) -> Result<Vec<KnowledgeItem>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db
            .prepare("SELECT id, content, embedding FROM knowledge_items WHERE kb_id = ?1")
            .map_err(db_err)?;
        let rows = stmt
            .query_map([kb_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Vec<u8>>(2)?,
                ))
            })
            .map_err(db_err)?;

        let mut scored: Vec<KnowledgeItem> = rows
            .filter_map(|r| r.ok())
            .map(|(id, content, blob)| {
                let embedding = decode_embedding(&blob);
                KnowledgeItem {
                    id,
                    content,
                    score: cosine_similarity(query, &embedding),
                }
            })
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }
}

/// Frame retrieved items for appending to the system prompt.
pub fn frame_block(items: &[KnowledgeItem]) -> String {
    let mut out = String::from("Relevant information from the knowledge base:\n");
    for item in items {
        out.push_str("- ");
        out.push_str(&item.content);
        out.push('\n');
    }
    out
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Little-endian f32 packing; stable across restarts on one node.
fn encode_embedding(v: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(v.len() * 4);
    for x in v {
        out.extend_from_slice(&x.to_le_bytes());
    }
    out
}

fn decode_embedding(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn db_err(e: rusqlite::Error) -> AgentError {
    AgentError::Knowledge(e.to_string())
}
