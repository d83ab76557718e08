//! SQLite graph store
//!
//! Persistent [`GraphStore`] backed by one database file. Writes go through a
//! small pool of connections (one per merge write slot); each batch is one
//! transaction, so partial progress is durable per batch. `SQLITE_BUSY` and
//! `SQLITE_LOCKED` surface as transient errors for the merge engine to retry.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};
use rusqlite::{params, Connection, ErrorCode};

use crate::error::StoreError;
use crate::model::{EntityKind, RelationKind};
use crate::store::{EdgeRecord, GraphStore, NodeRecord, StoreResult};

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, _)
                if matches!(e.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) =>
            {
                StoreError::transient(err.to_string())
            }
            _ => StoreError::permanent(err.to_string()),
        }
    }
}

pub struct SqliteGraphStore {
    path: PathBuf,
    slots: Vec<Mutex<Connection>>,
    next: AtomicUsize,
}

impl SqliteGraphStore {
    /// Open (creating if needed) a store with `write_slots` pooled connections
    pub fn open(path: &Path, write_slots: usize, busy_timeout: Duration) -> StoreResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::permanent(format!("Failed to create {}: {}", parent.display(), e))
            })?;
        }

        let first = Self::connect(path, busy_timeout)?;
        Self::create_schema(&first)?;
        let mut slots = vec![Mutex::new(first)];
        for _ in 1..write_slots.max(1) {
            slots.push(Mutex::new(Self::connect(path, busy_timeout)?));
        }

        tracing::debug!(
            "[STORE] opened {} with {} write slots",
            path.display(),
            slots.len()
        );
        Ok(Self {
            path: path.to_path_buf(),
            slots,
            next: AtomicUsize::new(0),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(path: &Path, busy_timeout: Duration) -> StoreResult<Connection> {
        let conn = Connection::open(path).map_err(|e| {
            StoreError::permanent(format!("Failed to open SQLite database: {}", e))
        })?;
        conn.busy_timeout(busy_timeout)?;
        let _mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Ok(conn)
    }

    fn create_schema(conn: &Connection) -> StoreResult<()> {
        conn.execute_batch(
            r#"
            -- Schema metadata
            CREATE TABLE IF NOT EXISTS schema_info (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            INSERT OR IGNORE INTO schema_info VALUES ('version', '1.0');
            INSERT OR IGNORE INTO schema_info VALUES ('created_at', datetime('now'));
            INSERT OR IGNORE INTO schema_info VALUES ('generator', 'vista-graph-engine');

            -- Entities, keyed by business key
            CREATE TABLE IF NOT EXISTS nodes (
                kind TEXT NOT NULL,
                key TEXT NOT NULL,
                id INTEGER NOT NULL,
                properties TEXT NOT NULL,
                PRIMARY KEY (kind, key)
            );

            -- Merge tier: one row per (kind, endpoints, discriminator)
            CREATE TABLE IF NOT EXISTS edges (
                kind TEXT NOT NULL,
                from_kind TEXT NOT NULL,
                from_key TEXT NOT NULL,
                to_kind TEXT NOT NULL,
                to_key TEXT NOT NULL,
                discriminator TEXT NOT NULL DEFAULT '',
                properties TEXT NOT NULL,
                PRIMARY KEY (kind, from_kind, from_key, to_kind, to_key, discriminator)
            );

            -- Append tier: no uniqueness, re-runs add rows
            CREATE TABLE IF NOT EXISTS edge_log (
                kind TEXT NOT NULL,
                from_kind TEXT NOT NULL,
                from_key TEXT NOT NULL,
                to_kind TEXT NOT NULL,
                to_key TEXT NOT NULL,
                discriminator TEXT NOT NULL DEFAULT '',
                properties TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_edges_from ON edges(from_kind, from_key);
            CREATE INDEX IF NOT EXISTS idx_edge_log_kind ON edge_log(kind);
            CREATE INDEX IF NOT EXISTS idx_edge_log_from ON edge_log(from_kind, from_key);
            "#,
        )
        .map_err(|e| StoreError::permanent(format!("Failed to create schema: {}", e)))
    }

    /// A free connection, or wait on one in round-robin order
    fn slot(&self) -> MutexGuard<'_, Connection> {
        for slot in &self.slots {
            if let Some(guard) = slot.try_lock() {
                return guard;
            }
        }
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.slots.len();
        self.slots[index].lock()
    }

    fn write_edges(&self, sql: &str, batch: &[EdgeRecord]) -> StoreResult<usize> {
        let mut conn = self.slot();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(sql)?;
            for edge in batch {
                stmt.execute(params![
                    edge.kind.as_str(),
                    edge.from.kind.as_str(),
                    edge.from.key,
                    edge.to.kind.as_str(),
                    edge.to.key,
                    edge.discriminator,
                    edge.properties.to_string(),
                ])?;
            }
        }
        tx.commit()?;
        Ok(batch.len())
    }

    fn count(&self, sql: &str, kind: Option<&str>) -> StoreResult<usize> {
        let conn = self.slot();
        let count: i64 = match kind {
            Some(kind) => conn.query_row(sql, params![kind], |row| row.get(0))?,
            None => conn.query_row(sql, [], |row| row.get(0))?,
        };
        Ok(count as usize)
    }
}

impl GraphStore for SqliteGraphStore {
    fn upsert_nodes(&self, batch: &[NodeRecord]) -> StoreResult<usize> {
        let mut conn = self.slot();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO nodes (kind, key, id, properties) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(kind, key) DO UPDATE SET id = excluded.id, properties = excluded.properties",
            )?;
            for record in batch {
                stmt.execute(params![
                    record.node.kind.as_str(),
                    record.node.key,
                    record.id,
                    record.properties.to_string(),
                ])?;
            }
        }
        tx.commit()?;
        Ok(batch.len())
    }

    fn merge_edges(&self, batch: &[EdgeRecord]) -> StoreResult<usize> {
        self.write_edges(
            "INSERT INTO edges (kind, from_kind, from_key, to_kind, to_key, discriminator, properties)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(kind, from_kind, from_key, to_kind, to_key, discriminator)
             DO UPDATE SET properties = excluded.properties",
            batch,
        )
    }

    fn append_edges(&self, batch: &[EdgeRecord]) -> StoreResult<usize> {
        self.write_edges(
            "INSERT INTO edge_log (kind, from_kind, from_key, to_kind, to_key, discriminator, properties)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            batch,
        )
    }

    fn node_count(&self, kind: Option<EntityKind>) -> StoreResult<usize> {
        match kind {
            Some(kind) => self.count("SELECT COUNT(*) FROM nodes WHERE kind = ?1", Some(kind.as_str())),
            None => self.count("SELECT COUNT(*) FROM nodes", None),
        }
    }

    fn edge_count(&self, kind: Option<RelationKind>) -> StoreResult<usize> {
        match kind {
            Some(kind) => self.count(
                "SELECT (SELECT COUNT(*) FROM edges WHERE kind = ?1)
                      + (SELECT COUNT(*) FROM edge_log WHERE kind = ?1)",
                Some(kind.as_str()),
            ),
            None => self.count(
                "SELECT (SELECT COUNT(*) FROM edges) + (SELECT COUNT(*) FROM edge_log)",
                None,
            ),
        }
    }

    fn clear_edges(&self, kind: RelationKind) -> StoreResult<usize> {
        let mut conn = self.slot();
        let tx = conn.transaction()?;
        let merged = tx.execute("DELETE FROM edges WHERE kind = ?1", params![kind.as_str()])?;
        let appended = tx.execute("DELETE FROM edge_log WHERE kind = ?1", params![kind.as_str()])?;
        tx.commit()?;
        tracing::info!("[STORE] cleared {} {} edges", merged + appended, kind);
        Ok(merged + appended)
    }

    fn nodes_without_edge(
        &self,
        node_kind: EntityKind,
        edge_kind: RelationKind,
    ) -> StoreResult<Vec<String>> {
        let conn = self.slot();
        let mut stmt = conn.prepare_cached(
            "SELECT n.key FROM nodes n
             WHERE n.kind = ?1
               AND NOT EXISTS (SELECT 1 FROM edges e
                               WHERE e.kind = ?2 AND e.from_kind = n.kind AND e.from_key = n.key)
               AND NOT EXISTS (SELECT 1 FROM edge_log l
                               WHERE l.kind = ?2 AND l.from_kind = n.kind AND l.from_key = n.key)
             ORDER BY n.key",
        )?;
        let keys = stmt
            .query_map(params![node_kind.as_str(), edge_kind.as_str()], |row| {
                row.get::<_, String>(0)
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(keys)
    }
}
