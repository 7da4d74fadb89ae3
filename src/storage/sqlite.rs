//! SQLite-backed [`KvBackend`].

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use crate::error::Result;
use crate::model::NodeId;
use crate::storage::backend::KvBackend;

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS records (
    id INTEGER PRIMARY KEY,
    bytes BLOB NOT NULL
);
CREATE TABLE IF NOT EXISTS strings (
    id INTEGER PRIMARY KEY,
    value TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS stores (
    name TEXT PRIMARY KEY
);
CREATE TABLE IF NOT EXISTS store_entries (
    store TEXT NOT NULL,
    key BLOB NOT NULL,
    value BLOB NOT NULL,
    PRIMARY KEY (store, key)
);
";

const UPSERT_RECORD_SQL: &str = "INSERT OR REPLACE INTO records (id, bytes) VALUES (?1, ?2)";
const UPSERT_ENTRY_SQL: &str =
    "INSERT OR REPLACE INTO store_entries (store, key, value) VALUES (?1, ?2, ?3)";

/// Crash-consistent store on a single SQLite file in WAL mode.
///
/// The connection is shared behind a mutex; batches run in one transaction.
pub struct SqliteBackend {
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl SqliteBackend {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open(&path)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.execute_batch(SCHEMA_SQL)?;
        debug!(path = %path.display(), journal_mode = %mode, "sqlite.open");
        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl KvBackend for SqliteBackend {
    fn get_record(&self, id: NodeId) -> Result<Option<Vec<u8>>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached("SELECT bytes FROM records WHERE id = ?1")?;
        Ok(stmt.query_row([id], |row| row.get(0)).optional()?)
    }

    fn persist_batch(&self, records: &[(NodeId, Vec<u8>)]) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(UPSERT_RECORD_SQL)?;
            for (id, bytes) in records {
                stmt.execute(params![id, bytes])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn remove_record(&self, id: NodeId) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM records WHERE id = ?1", [id])?;
        Ok(())
    }

    fn all_records(&self) -> Result<Vec<(NodeId, Vec<u8>)>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached("SELECT id, bytes FROM records ORDER BY id")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn record_count(&self) -> Result<u64> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn persist_string(&self, id: i32, value: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO strings (id, value) VALUES (?1, ?2)",
            params![id, value],
        )?;
        Ok(())
    }

    fn load_strings(&self) -> Result<Vec<(i32, String)>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached("SELECT id, value FROM strings ORDER BY id")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn get_meta(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached("SELECT value FROM metadata WHERE key = ?1")?;
        Ok(stmt.query_row([key], |row| row.get(0)).optional()?)
    }

    fn put_meta(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    fn meta_entries(&self) -> Result<Vec<(String, String)>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached("SELECT key, value FROM metadata ORDER BY key")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn open_store(&self, store: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("INSERT OR IGNORE INTO stores (name) VALUES (?1)", [store])?;
        Ok(())
    }

    fn store_names(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached("SELECT name FROM stores ORDER BY name")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn replace_store(&self, store: &str, entries: &[(Vec<u8>, Vec<u8>)]) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute("INSERT OR IGNORE INTO stores (name) VALUES (?1)", [store])?;
        tx.execute("DELETE FROM store_entries WHERE store = ?1", [store])?;
        {
            let mut stmt = tx.prepare_cached(UPSERT_ENTRY_SQL)?;
            for (key, value) in entries {
                stmt.execute(params![store, key, value])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn clear_store(&self, store: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM store_entries WHERE store = ?1", [store])?;
        Ok(())
    }

    fn drop_store(&self, store: &str) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM store_entries WHERE store = ?1", [store])?;
        tx.execute("DELETE FROM stores WHERE name = ?1", [store])?;
        tx.commit()?;
        Ok(())
    }

    fn store_entries(&self, store: &str) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare_cached("SELECT key, value FROM store_entries WHERE store = ?1 ORDER BY key")?;
        let rows = stmt.query_map([store], |row| Ok((row.get(0)?, row.get(1)?)))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn flush(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.query_row("PRAGMA wal_checkpoint(PASSIVE)", [], |_| Ok(()))?;
        Ok(())
    }
}
