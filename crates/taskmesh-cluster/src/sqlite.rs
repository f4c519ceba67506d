//! SQLite-backed cluster registry.
//!
//! Every node of a cluster points at the same database file (shared volume or
//! network filesystem). WAL mode keeps readers from blocking the health sweep.

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::Mutex;

use crate::registry::{ClusterRegistry, NodeRecord};
use taskmesh_core::error::{Result, TaskMeshError};
use taskmesh_core::identity::NodeKey;

pub struct SqliteRegistry {
    conn: Mutex<Connection>,
}

impl SqliteRegistry {
    /// Open or create the registry database.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)
            .map_err(|e| TaskMeshError::Registry(format!("Registry open error: {e}")))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();
        conn.busy_timeout(std::time::Duration::from_secs(5)).ok();

        let registry = Self {
            conn: Mutex::new(conn),
        };
        registry.migrate()?;
        Ok(registry)
    }

    fn migrate(&self) -> Result<()> {
        self.conn()?
            .execute_batch(
                "
            CREATE TABLE IF NOT EXISTS cluster_nodes (
                host TEXT NOT NULL,
                port INTEGER NOT NULL,
                instance_id TEXT NOT NULL,
                cluster_port INTEGER NOT NULL,
                join_date TEXT NOT NULL,
                health_check_date TEXT,          -- NULL until the first successful probe
                PRIMARY KEY (host, port)
            );
         ",
            )
            .map_err(|e| TaskMeshError::Registry(format!("Migration: {e}")))
    }

    fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| TaskMeshError::Registry(format!("Lock: {e}")))
    }
}

/// A timestamp column that is not RFC 3339 is a corrupt row, not "epoch".
fn parse_time(idx: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<NodeRecord> {
    let join_date: String = row.get(4)?;
    let health_check_date: Option<String> = row.get(5)?;
    Ok(NodeRecord {
        host: row.get(0)?,
        port: row.get(1)?,
        instance_id: row.get(2)?,
        cluster_port: row.get(3)?,
        join_timestamp: parse_time(4, &join_date)?,
        last_health_check: health_check_date.as_deref().map(|s| parse_time(5, s)).transpose()?,
    })
}

const SELECT_COLUMNS: &str =
    "SELECT host, port, instance_id, cluster_port, join_date, health_check_date FROM cluster_nodes";

impl ClusterRegistry for SqliteRegistry {
    fn list_nodes(&self) -> Result<Vec<NodeRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!("{SELECT_COLUMNS} ORDER BY host, port"))
            .map_err(|e| TaskMeshError::Registry(format!("List nodes: {e}")))?;
        let rows = stmt
            .query_map([], row_to_record)
            .map_err(|e| TaskMeshError::Registry(format!("List nodes: {e}")))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| TaskMeshError::Registry(format!("List nodes: {e}")))
    }

    fn get_node(&self, key: &NodeKey) -> Result<Option<NodeRecord>> {
        self.conn()?
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE host = ?1 AND port = ?2"),
                params![key.host, key.port],
                row_to_record,
            )
            .optional()
            .map_err(|e| TaskMeshError::Registry(format!("Get node {key}: {e}")))
    }

    fn upsert_node(&self, record: &NodeRecord) -> Result<()> {
        self.conn()?
            .execute(
                "INSERT OR REPLACE INTO cluster_nodes
                 (host, port, instance_id, cluster_port, join_date, health_check_date)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    record.host,
                    record.port,
                    record.instance_id,
                    record.cluster_port,
                    record.join_timestamp.to_rfc3339(),
                    record.last_health_check.map(|t| t.to_rfc3339()),
                ],
            )
            .map_err(|e| TaskMeshError::Registry(format!("Upsert node {}: {e}", record.key())))?;
        Ok(())
    }

    fn delete_node(&self, key: &NodeKey) -> Result<bool> {
        let n = self
            .conn()?
            .execute(
                "DELETE FROM cluster_nodes WHERE host = ?1 AND port = ?2",
                params![key.host, key.port],
            )
            .map_err(|e| TaskMeshError::Registry(format!("Delete node {key}: {e}")))?;
        Ok(n > 0)
    }
}
