//! Core Store implementation

use std::fs;
use std::path::{Path, PathBuf};

use eyre::{Context, Result};
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

/// Database file created inside the store directory
pub const DB_FILE_NAME: &str = "sessions.db";

/// A type that can be persisted in the store
///
/// Records are grouped by collection so several record types can share one
/// database without key collisions.
pub trait Record: Serialize + DeserializeOwned {
    /// Name of the collection this record type lives in
    fn collection_name() -> &'static str;
}

/// Current time as Unix milliseconds
pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// SQLite-backed record store
pub struct Store {
    conn: Connection,
    path: Option<PathBuf>,
}

impl Store {
    /// Open or create a store in the given directory
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        debug!(dir = %dir.display(), "Store::open: called");
        fs::create_dir_all(dir).context("Failed to create store directory")?;

        let db_path = dir.join(DB_FILE_NAME);
        let conn = Connection::open(&db_path).context(format!("Failed to open {}", db_path.display()))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .context("Failed to enable WAL journal")?;

        let store = Self {
            conn,
            path: Some(db_path),
        };
        store.migrate()?;
        info!(path = %dir.display(), "Opened session store");
        Ok(store)
    }

    /// Open a throwaway store that lives only as long as this value
    pub fn open_in_memory() -> Result<Self> {
        debug!("Store::open_in_memory: called");
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        let store = Self { conn, path: None };
        store.migrate()?;
        Ok(store)
    }

    /// Path of the backing database file (None for in-memory stores)
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn migrate(&self) -> Result<()> {
        debug!("Store::migrate: called");
        self.conn
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS records (
                    collection TEXT NOT NULL,
                    key        TEXT NOT NULL,
                    body       TEXT NOT NULL,
                    updated_at INTEGER NOT NULL,
                    PRIMARY KEY (collection, key)
                );",
            )
            .context("Failed to create records table")
    }

    /// Get a record by key, None if it was never stored
    pub fn get<T: Record>(&self, key: &str) -> Result<Option<T>> {
        let collection = T::collection_name();
        debug!(%collection, %key, "Store::get: called");
        let body: Option<String> = self
            .conn
            .query_row(
                "SELECT body FROM records WHERE collection = ?1 AND key = ?2",
                params![collection, key],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to query record")?;

        match body {
            Some(body) => {
                let record = serde_json::from_str(&body)
                    .context(format!("Failed to deserialize {} record '{}'", collection, key))?;
                Ok(Some(record))
            }
            None => {
                debug!(%collection, %key, "Store::get: no record");
                Ok(None)
            }
        }
    }

    /// Insert or replace the record stored under key
    pub fn put<T: Record>(&mut self, key: &str, record: &T) -> Result<()> {
        let collection = T::collection_name();
        debug!(%collection, %key, "Store::put: called");
        let body = serde_json::to_string(record).context("Failed to serialize record")?;
        self.conn
            .execute(
                "INSERT INTO records (collection, key, body, updated_at) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(collection, key) DO UPDATE SET body = excluded.body, updated_at = excluded.updated_at",
                params![collection, key, body, now_ms()],
            )
            .context("Failed to write record")?;
        Ok(())
    }

    /// Delete the record under key, returning whether one existed
    pub fn delete<T: Record>(&mut self, key: &str) -> Result<bool> {
        let collection = T::collection_name();
        debug!(%collection, %key, "Store::delete: called");
        let affected = self
            .conn
            .execute(
                "DELETE FROM records WHERE collection = ?1 AND key = ?2",
                params![collection, key],
            )
            .context("Failed to delete record")?;
        Ok(affected > 0)
    }

    /// List every key in the record type's collection, ordered by key
    pub fn keys<T: Record>(&self) -> Result<Vec<String>> {
        let collection = T::collection_name();
        debug!(%collection, "Store::keys: called");
        let mut stmt = self
            .conn
            .prepare("SELECT key FROM records WHERE collection = ?1 ORDER BY key")
            .context("Failed to prepare key listing")?;
        let keys = stmt
            .query_map(params![collection], |row| row.get::<_, String>(0))
            .context("Failed to list keys")?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to read key row")?;
        Ok(keys)
    }

    /// Load every record in the record type's collection, ordered by key
    pub fn list<T: Record>(&self) -> Result<Vec<(String, T)>> {
        let collection = T::collection_name();
        debug!(%collection, "Store::list: called");
        let mut stmt = self
            .conn
            .prepare("SELECT key, body FROM records WHERE collection = ?1 ORDER BY key")
            .context("Failed to prepare listing")?;
        let rows = stmt
            .query_map(params![collection], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .context("Failed to list records")?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to read record row")?;

        rows.into_iter()
            .map(|(key, body)| {
                let record = serde_json::from_str(&body)
                    .context(format!("Failed to deserialize {} record '{}'", collection, key))?;
                Ok((key, record))
            })
            .collect()
    }
}
