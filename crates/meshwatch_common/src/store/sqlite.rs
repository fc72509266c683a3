//! Durable engine on SQLite.
//!
//! One table per entity kind, keyed by node id, values stored as JSON
//! documents. Gateways are a table of MACs. Multi-step operations run
//! inside a transaction on the single shared connection.

use super::{NodeStore, Notifier, StatusUpdate};
use crate::error::{EntityKind, StoreError, StoreResult};
use crate::model::{Neighbours, NodeInfo, NodeStatus, Statistics};
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, warn};

const NODEINFOS: &str = "nodeinfos";
const STATISTICS: &str = "statistics";
const STATUSINFO: &str = "statusinfo";
const NEIGHBOURS: &str = "neighbours";

fn table_for(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::NodeInfo => NODEINFOS,
        EntityKind::Statistics => STATISTICS,
        EntityKind::Status => STATUSINFO,
        EntityKind::Neighbours => NEIGHBOURS,
    }
}

pub struct SqliteStore {
    conn: Mutex<Connection>,
    notifier: Notifier,
}

impl SqliteStore {
    pub const ENGINE: &'static str = "sqlite";

    /// Open or create the database at `path`.
    pub fn open_at<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                if let Err(e) = fs::create_dir_all(parent) {
                    warn!("Could not create {}: {}", parent.display(), e);
                }
            }
        }

        let conn = Connection::open(path)?;
        // Enable WAL mode for better concurrent access
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::init_schema(&conn)?;
        debug!("Opened node database at {}", path.display());

        Ok(Self {
            conn: Mutex::new(conn),
            notifier: Notifier::default(),
        })
    }

    /// In-memory database, mainly for tests.
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            notifier: Notifier::default(),
        })
    }

    fn init_schema(conn: &Connection) -> StoreResult<()> {
        for table in [NODEINFOS, STATISTICS, STATUSINFO, NEIGHBOURS] {
            conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {table} (
                    node_id TEXT PRIMARY KEY,
                    value TEXT NOT NULL
                );"
            ))?;
        }
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS gateways (
                mac TEXT PRIMARY KEY
            );",
        )?;
        Ok(())
    }

    fn get_json<T: DeserializeOwned>(&self, kind: EntityKind, node_id: &str) -> StoreResult<T> {
        let conn = self.conn.lock()?;
        read_json(&conn, table_for(kind), node_id)?
            .ok_or_else(|| StoreError::not_found(kind, node_id))
    }

    fn all_json<T: DeserializeOwned>(&self, kind: EntityKind) -> StoreResult<Vec<T>> {
        let conn = self.conn.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT value FROM {} ORDER BY node_id",
            table_for(kind)
        ))?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut values = Vec::new();
        for row in rows {
            values.push(serde_json::from_str(&row?)?);
        }
        Ok(values)
    }

    fn put_json<T: Serialize>(&self, kind: EntityKind, node_id: &str, value: &T) -> StoreResult<()> {
        let conn = self.conn.lock()?;
        write_json(&conn, table_for(kind), node_id, value)
    }
}

fn read_json<T: DeserializeOwned>(
    conn: &Connection,
    table: &str,
    node_id: &str,
) -> StoreResult<Option<T>> {
    let raw: Option<String> = conn
        .query_row(
            &format!("SELECT value FROM {table} WHERE node_id = ?1"),
            params![node_id],
            |row| row.get(0),
        )
        .optional()?;
    match raw {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

fn write_json<T: Serialize>(
    conn: &Connection,
    table: &str,
    node_id: &str,
    value: &T,
) -> StoreResult<()> {
    let raw = serde_json::to_string(value)?;
    conn.execute(
        &format!("INSERT OR REPLACE INTO {table} (node_id, value) VALUES (?1, ?2)"),
        params![node_id, raw],
    )?;
    Ok(())
}

impl NodeStore for SqliteStore {
    fn engine(&self) -> &'static str {
        Self::ENGINE
    }

    fn get_nodeinfo(&self, node_id: &str) -> StoreResult<NodeInfo> {
        self.get_json(EntityKind::NodeInfo, node_id)
    }

    fn all_nodeinfos(&self) -> StoreResult<Vec<NodeInfo>> {
        self.all_json(EntityKind::NodeInfo)
    }

    fn put_nodeinfo(&self, nodeinfo: &NodeInfo) -> StoreResult<()> {
        self.put_json(EntityKind::NodeInfo, &nodeinfo.node_id, nodeinfo)
    }

    fn get_statistics(&self, node_id: &str) -> StoreResult<Statistics> {
        self.get_json(EntityKind::Statistics, node_id)
    }

    fn all_statistics(&self) -> StoreResult<Vec<Statistics>> {
        self.all_json(EntityKind::Statistics)
    }

    fn put_statistics(&self, statistics: &Statistics) -> StoreResult<()> {
        self.put_json(EntityKind::Statistics, &statistics.node_id, statistics)
    }

    fn get_status(&self, node_id: &str) -> StoreResult<NodeStatus> {
        self.get_json(EntityKind::Status, node_id)
    }

    fn all_statuses(&self) -> StoreResult<Vec<NodeStatus>> {
        self.all_json(EntityKind::Status)
    }

    fn put_status(&self, status: &NodeStatus) -> StoreResult<()> {
        self.put_json(EntityKind::Status, &status.node_id, status)
    }

    fn update_status(
        &self,
        node_id: &str,
        update: StatusUpdate<'_>,
    ) -> StoreResult<Option<NodeStatus>> {
        let mut conn = self.conn.lock()?;
        let tx = conn.transaction()?;
        let current: Option<NodeStatus> = read_json(&tx, STATUSINFO, node_id)?;
        let updated = update(current);
        if let Some(status) = &updated {
            write_json(&tx, STATUSINFO, node_id, status)?;
        }
        tx.commit()?;
        Ok(updated)
    }

    fn get_neighbours(&self, node_id: &str) -> StoreResult<Neighbours> {
        self.get_json(EntityKind::Neighbours, node_id)
    }

    fn all_neighbours(&self) -> StoreResult<Vec<Neighbours>> {
        self.all_json(EntityKind::Neighbours)
    }

    fn put_neighbours(&self, neighbours: &Neighbours) -> StoreResult<()> {
        self.put_json(EntityKind::Neighbours, &neighbours.node_id, neighbours)
    }

    fn put_gateway(&self, mac: &str) -> StoreResult<()> {
        let conn = self.conn.lock()?;
        conn.execute(
            "INSERT OR IGNORE INTO gateways (mac) VALUES (?1)",
            params![mac],
        )?;
        Ok(())
    }

    fn remove_gateway(&self, mac: &str) -> StoreResult<()> {
        let conn = self.conn.lock()?;
        conn.execute("DELETE FROM gateways WHERE mac = ?1", params![mac])?;
        Ok(())
    }

    fn is_gateway(&self, mac: &str) -> StoreResult<bool> {
        let conn = self.conn.lock()?;
        let found = conn
            .query_row(
                "SELECT 1 FROM gateways WHERE mac = ?1",
                params![mac],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn gateways(&self) -> StoreResult<Vec<String>> {
        let conn = self.conn.lock()?;
        let mut stmt = conn.prepare("SELECT mac FROM gateways ORDER BY mac")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        Ok(rows.collect::<Result<Vec<String>, _>>()?)
    }

    fn expire_node(
        &self,
        node_id: &str,
        still_expired: &dyn Fn(&NodeStatus) -> bool,
    ) -> StoreResult<bool> {
        let mut conn = self.conn.lock()?;
        let tx = conn.transaction()?;

        let status: Option<NodeStatus> = read_json(&tx, STATUSINFO, node_id)?;
        if !status.as_ref().map(still_expired).unwrap_or(false) {
            return Ok(false);
        }

        let nodeinfo: Option<NodeInfo> = read_json(&tx, NODEINFOS, node_id)?;
        if let Some(nodeinfo) = nodeinfo {
            for mac in nodeinfo.mesh_macs() {
                tx.execute("DELETE FROM gateways WHERE mac = ?1", params![mac])?;
            }
        }
        for table in [NODEINFOS, STATISTICS, STATUSINFO, NEIGHBOURS] {
            tx.execute(
                &format!("DELETE FROM {table} WHERE node_id = ?1"),
                params![node_id],
            )?;
        }
        tx.commit()?;
        Ok(true)
    }

    fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    fn close(&self) -> StoreResult<()> {
        let conn = self.conn.lock()?;
        conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_data_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nodes.db");

        {
            let store = SqliteStore::open_at(&path).unwrap();
            store
                .put_nodeinfo(&NodeInfo {
                    node_id: "n1".into(),
                    hostname: "router-1".into(),
                    ..Default::default()
                })
                .unwrap();
            store.put_gateway("aa:bb:cc:dd:ee:ff").unwrap();
            store.close().unwrap();
        }

        let store = SqliteStore::open_at(&path).unwrap();
        assert_eq!(store.get_nodeinfo("n1").unwrap().hostname, "router-1");
        assert!(store.is_gateway("aa:bb:cc:dd:ee:ff").unwrap());
    }

    #[test]
    fn test_creates_missing_parent_directory() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("nodes.db");
        let store = SqliteStore::open_at(&path).unwrap();
        assert!(store.all_nodeinfos().unwrap().is_empty());
        assert!(path.exists());
    }

    #[test]
    fn test_reads_legacy_status_documents() {
        let store = SqliteStore::open_in_memory().unwrap();
        {
            let conn = store.conn.lock().unwrap();
            conn.execute(
                "INSERT INTO statusinfo (node_id, value) VALUES (?1, ?2)",
                params![
                    "n1",
                    r#"{"NodeId":"n1","Firstseen":"2015-11-20T08:15:42","Lastseen":"2015-11-21T08:15:42","Online":true,"Gateway":false}"#
                ],
            )
            .unwrap();
        }
        let status = store.get_status("n1").unwrap();
        assert!(status.online);
        assert!(status.lastseen_at().is_ok());
    }
}
