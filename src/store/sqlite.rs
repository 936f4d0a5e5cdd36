//! SQLite content store.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::{store_err, RelayError, Result};

use super::traits::{ContentStore, RequestIdentity, StoredEntry};

/// SQLite-based content store.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

impl SqliteStore {
  /// Open (or create) a store at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).map_err(store_err("Failed to create store directory"))?;
    }

    let conn = Connection::open(path).map_err(|e| {
      RelayError::StoreUnavailable(format!(
        "Failed to open store at {}: {}",
        path.display(),
        e
      ))
    })?;

    Self::with_connection(conn)
  }

  /// Open a store that lives only as long as this value.
  #[cfg(test)]
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory().map_err(store_err("Failed to open in-memory store"))?;
    Self::with_connection(conn)
  }

  /// Get the default store path.
  pub fn default_path() -> Option<PathBuf> {
    let data_dir = dirs::data_dir().or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))?;
    Some(data_dir.join("fatslim-relay").join("store.db"))
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;
    Ok(store)
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute_batch(STORE_SCHEMA)
      .map_err(store_err("Failed to run store migrations"))?;
    Ok(())
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| RelayError::StoreUnavailable(format!("Lock poisoned: {}", e)))
  }
}

/// Schema for the content store.
const STORE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS generations (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now'))
);

-- One row per (generation, request identity); replaced wholesale on write
CREATE TABLE IF NOT EXISTS entries (
    generation TEXT NOT NULL,
    identity_hash TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    stored_at TEXT NOT NULL,
    PRIMARY KEY (generation, identity_hash)
);

CREATE INDEX IF NOT EXISTS idx_entries_generation ON entries(generation);
"#;

impl ContentStore for SqliteStore {
  fn create(&self, generation: &str) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute(
        "INSERT OR IGNORE INTO generations (name) VALUES (?)",
        params![generation],
      )
      .map_err(store_err("Failed to create generation"))?;
    Ok(())
  }

  fn get(&self, generation: &str, identity: &RequestIdentity) -> Result<Option<StoredEntry>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare(
        "SELECT status, headers, body, stored_at FROM entries
         WHERE generation = ? AND identity_hash = ?",
      )
      .map_err(store_err("Failed to prepare query"))?;

    let row: Option<(u16, String, Vec<u8>, String)> = stmt
      .query_row(params![generation, identity.cache_hash()], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
      })
      .optional()
      .map_err(store_err("Failed to read entry"))?;

    match row {
      Some((status, headers, body, stored_at)) => {
        let headers: Vec<(String, Vec<u8>)> =
          serde_json::from_str(&headers).map_err(store_err("Failed to decode stored headers"))?;
        Ok(Some(StoredEntry {
          status,
          headers,
          body: Bytes::from(body),
          stored_at: parse_datetime(&stored_at)?,
        }))
      }
      None => Ok(None),
    }
  }

  fn put(&self, generation: &str, identity: &RequestIdentity, entry: &StoredEntry) -> Result<()> {
    let conn = self.lock()?;
    let headers =
      serde_json::to_string(&entry.headers).map_err(store_err("Failed to encode headers"))?;

    let tx = conn
      .unchecked_transaction()
      .map_err(store_err("Failed to begin transaction"))?;

    tx.execute(
      "INSERT OR IGNORE INTO generations (name) VALUES (?)",
      params![generation],
    )
    .map_err(store_err("Failed to create generation"))?;

    tx.execute(
      "INSERT OR REPLACE INTO entries
         (generation, identity_hash, method, url, status, headers, body, stored_at)
       VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
      params![
        generation,
        identity.cache_hash(),
        identity.method(),
        identity.url(),
        entry.status,
        headers,
        entry.body.as_ref(),
        entry.stored_at.to_rfc3339(),
      ],
    )
    .map_err(store_err("Failed to store entry"))?;

    tx.commit().map_err(store_err("Failed to commit transaction"))?;
    Ok(())
  }

  fn identities(&self, generation: &str) -> Result<Vec<RequestIdentity>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare("SELECT method, url FROM entries WHERE generation = ? ORDER BY url")
      .map_err(store_err("Failed to prepare query"))?;

    let identities = stmt
      .query_map(params![generation], |row| {
        Ok(RequestIdentity::from_parts(
          row.get::<_, String>(0)?,
          row.get::<_, String>(1)?,
        ))
      })
      .map_err(store_err("Failed to list entries"))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(store_err("Failed to read entry identity"))?;

    Ok(identities)
  }

  fn delete(&self, generation: &str) -> Result<bool> {
    let conn = self.lock()?;

    let tx = conn
      .unchecked_transaction()
      .map_err(store_err("Failed to begin transaction"))?;

    tx.execute("DELETE FROM entries WHERE generation = ?", params![generation])
      .map_err(store_err("Failed to delete entries"))?;

    let removed = tx
      .execute("DELETE FROM generations WHERE name = ?", params![generation])
      .map_err(store_err("Failed to delete generation"))?;

    tx.commit().map_err(store_err("Failed to commit transaction"))?;
    Ok(removed > 0)
  }

  fn list_names(&self) -> Result<Vec<String>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare("SELECT name FROM generations ORDER BY created_at, name")
      .map_err(store_err("Failed to prepare query"))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(store_err("Failed to list generations"))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(store_err("Failed to read generation name"))?;

    Ok(names)
  }
}

/// Parse a stored RFC 3339 timestamp.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| RelayError::StoreUnavailable(format!("Failed to parse datetime '{}': {}", s, e)))
}
