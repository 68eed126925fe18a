//! SQLite-backed flow persistence.

use std::sync::Mutex;

use rusqlite::Connection;
use tracing::info;

use crate::error::{FlowError, Result};
use crate::types::Flow;

pub struct FlowStore {
    db: Mutex<Connection>,
}

impl FlowStore {
    pub fn new(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS flows (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                priority INTEGER NOT NULL DEFAULT 0,
                active INTEGER NOT NULL DEFAULT 1,
                definition TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_flows_tenant ON flows (tenant_id, active, priority);",
        )?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    /// Insert or replace a flow after structural validation.
    pub fn upsert(&self, flow: &Flow) -> Result<()> {
        flow.validate().map_err(|reason| FlowError::Invalid {
            flow_id: flow.id.clone(),
            reason,
        })?;
        let definition = serde_json::to_string(flow)?;
        let now = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO flows (id, tenant_id, priority, active, definition, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET
                tenant_id = ?2, priority = ?3, active = ?4, definition = ?5, updated_at = ?6",
            rusqlite::params![
                flow.id,
                flow.tenant_id,
                flow.priority,
                flow.active as i32,
                definition,
                now
            ],
        )?;
        info!(flow_id = %flow.id, tenant = %flow.tenant_id, "flow stored");
        Ok(())
    }

    pub fn get(&self, flow_id: &str) -> Result<Option<Flow>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            "SELECT definition FROM flows WHERE id = ?1",
            [flow_id],
            |row| row.get::<_, String>(0),
        ) {
            Ok(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(FlowError::Database(e)),
        }
    }

    /// Active flows for a tenant, highest priority first. Trigger
    /// matching walks this order and takes the first hit.
    pub fn active_for_tenant(&self, tenant_id: &str) -> Result<Vec<Flow>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT definition FROM flows
             WHERE tenant_id = ?1 AND active = 1
             ORDER BY priority DESC, id",
        )?;
        let rows = stmt.query_map([tenant_id], |row| row.get::<_, String>(0))?;
        let mut flows = Vec::new();
        for raw in rows.filter_map(|r| r.ok()) {
            if let Ok(flow) = serde_json::from_str(&raw) {
                flows.push(flow);
            }
        }
        Ok(flows)
    }

    pub fn delete(&self, flow_id: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        let n = db.execute("DELETE FROM flows WHERE id = ?1", [flow_id])?;
        if n == 0 {
            return Err(FlowError::NotFound {
                id: flow_id.to_string(),
            });
        }
        info!(flow_id, "flow deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FlowNode, FlowTrigger, NodeType};

    fn flow(id: &str, priority: i32) -> Flow {
        Flow {
            id: id.to_string(),
            tenant_id: "t1".to_string(),
            trigger: FlowTrigger::Keyword,
            trigger_value: "menu".to_string(),
            start_node_id: "n0".to_string(),
            nodes: vec![FlowNode {
                id: "n0".to_string(),
                node_type: NodeType::End,
                content: "done".to_string(),
                quick_replies: vec![],
                transitions: vec![],
                actions: vec![],
                vre_config: None,
            }],
            priority,
            active: true,
        }
    }

    fn store() -> FlowStore {
        FlowStore::new(Connection::open_in_memory().unwrap()).unwrap()
    }

    #[test]
    fn upsert_and_get_round_trip() {
        let s = store();
        s.upsert(&flow("f1", 0)).unwrap();
        let got = s.get("f1").unwrap().unwrap();
        assert_eq!(got.trigger_value, "menu");
        assert!(s.get("missing").unwrap().is_none());
    }

    #[test]
    fn invalid_flow_is_rejected() {
        let s = store();
        let mut bad = flow("f1", 0);
        bad.start_node_id = "ghost".to_string();
        assert!(s.upsert(&bad).is_err());
    }

    #[test]
    fn tenant_listing_orders_by_priority() {
        let s = store();
        s.upsert(&flow("low", 1)).unwrap();
        s.upsert(&flow("high", 9)).unwrap();
        let mut inactive = flow("off", 99);
        inactive.active = false;
        s.upsert(&inactive).unwrap();

        let flows = s.active_for_tenant("t1").unwrap();
        let ids: Vec<_> = flows.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec!["high", "low"]);
    }

    #[test]
    fn delete_missing_flow_errors() {
        let s = store();
        assert!(matches!(
            s.delete("ghost").unwrap_err(),
            FlowError::NotFound { .. }
        ));
    }
}
