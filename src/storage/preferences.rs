// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Durable key-value preferences backed by SQLite.

use anyhow::{anyhow, Context, Result};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// String-valued preference store.
#[derive(Clone)]
pub struct Preferences {
    conn: Arc<Mutex<Connection>>,
}

impl Preferences {
    /// Create or open the preferences database.
    pub fn open(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("creating data directory {:?}", data_dir))?;
        let db_path = data_dir.join("preferences.db");
        info!("Opening preferences database: {:?}", db_path);

        let conn = Connection::open(&db_path)?;
        Self::with_connection(conn)
    }

    /// In-memory store, for tests.
    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS preferences (
                key TEXT PRIMARY KEY NOT NULL,
                value TEXT NOT NULL
            )",
            [],
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock();
        let value = conn
            .query_row(
                "SELECT value FROM preferences WHERE key = ?1",
                [key],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| anyhow!("reading preference {}: {}", key, e))?;
        Ok(value)
    }

    pub fn put(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO preferences (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )
        .with_context(|| format!("writing preference {}", key))?;
        Ok(())
    }

    /// Reject every later write, to exercise save failures.
    #[cfg(test)]
    pub(crate) fn make_read_only(&self) {
        self.conn
            .lock()
            .execute_batch("PRAGMA query_only = ON")
            .unwrap();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_put_get_overwrite() {
        let prefs = Preferences::in_memory().unwrap();
        assert_eq!(prefs.get("k").unwrap(), None);

        prefs.put("k", "one").unwrap();
        prefs.put("k", "two").unwrap();
        assert_eq!(prefs.get("k").unwrap().as_deref(), Some("two"));
    }

    #[test]
    fn test_read_only_rejects_writes() {
        let prefs = Preferences::in_memory().unwrap();
        prefs.put("k", "v").unwrap();
        prefs.make_read_only();

        assert!(prefs.put("k", "w").is_err());
        assert_eq!(prefs.get("k").unwrap().as_deref(), Some("v"));
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempdir().unwrap();
        Preferences::open(dir.path()).unwrap().put("k", "v").unwrap();

        let reopened = Preferences::open(dir.path()).unwrap();
        assert_eq!(reopened.get("k").unwrap().as_deref(), Some("v"));
    }
}
