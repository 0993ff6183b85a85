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

//! Alarm lifecycle log using SQLite.

use anyhow::Result;
use chrono::{DateTime, Local, TimeZone};
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// A single log entry.
#[derive(Debug, Clone)]
pub struct AlertEntry {
    pub id: i64,
    pub timestamp: DateTime<Local>,
    pub kind: AlertKind,
    pub detail: String,
}

/// Kind of alarm lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertKind {
    FallDetected,
    Cancelled,
    AlertSent,
    AlertFailed,
    LinkLost,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::FallDetected => "FALL_DETECTED",
            AlertKind::Cancelled => "CANCELLED",
            AlertKind::AlertSent => "ALERT_SENT",
            AlertKind::AlertFailed => "ALERT_FAILED",
            AlertKind::LinkLost => "LINK_LOST",
        }
    }

    fn from_str(s: &str) -> Self {
        match s {
            "CANCELLED" => AlertKind::Cancelled,
            "ALERT_SENT" => AlertKind::AlertSent,
            "ALERT_FAILED" => AlertKind::AlertFailed,
            "LINK_LOST" => AlertKind::LinkLost,
            _ => AlertKind::FallDetected,
        }
    }
}

/// Alert log database manager.
#[derive(Clone)]
pub struct AlertLog {
    conn: Arc<Mutex<Connection>>,
    max_entries: u32,
}

impl AlertLog {
    /// Create or open the alert log database.
    pub fn new(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        let db_path = data_dir.join("alerts.db");
        info!("Opening alert log database: {:?}", db_path);

        Self::with_connection(Connection::open(&db_path)?)
    }

    /// In-memory log, used by tests.
    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS alerts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp INTEGER NOT NULL,
                kind TEXT NOT NULL,
                detail TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_alerts_timestamp ON alerts(timestamp DESC)",
            [],
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            max_entries: 1000,
        })
    }

    /// Record an event.
    pub fn record(&self, kind: AlertKind, detail: &str) -> Result<()> {
        let conn = self.conn.lock();
        let timestamp = Local::now().timestamp();

        conn.execute(
            "INSERT INTO alerts (timestamp, kind, detail) VALUES (?1, ?2, ?3)",
            params![timestamp, kind.as_str(), detail],
        )?;

        // Keep only the newest max_entries rows
        conn.execute(
            "DELETE FROM alerts WHERE id NOT IN (
                SELECT id FROM alerts ORDER BY id DESC LIMIT ?1
            )",
            [self.max_entries],
        )?;

        Ok(())
    }

    /// Most recent entries, newest first.
    pub fn recent(&self, limit: u32) -> Result<Vec<AlertEntry>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, timestamp, kind, detail
             FROM alerts
             ORDER BY timestamp DESC, id DESC
             LIMIT ?1",
        )?;

        let entries = stmt
            .query_map([limit], |row| {
                let timestamp_secs: i64 = row.get(1)?;
                let kind: String = row.get(2)?;

                Ok(AlertEntry {
                    id: row.get(0)?,
                    timestamp: Local
                        .timestamp_opt(timestamp_secs, 0)
                        .single()
                        .unwrap_or_else(Local::now),
                    kind: AlertKind::from_str(&kind),
                    detail: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(entries)
    }

    /// Total entry count.
    pub fn count(&self) -> Result<u32> {
        let conn = self.conn.lock();
        let count: u32 = conn.query_row("SELECT COUNT(*) FROM alerts", [], |row| row.get(0))?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_alert_log_basic() {
        let dir = tempdir().unwrap();
        let log = AlertLog::new(dir.path()).unwrap();

        log.record(AlertKind::FallDetected, "epoch 1").unwrap();
        log.record(AlertKind::AlertSent, "initial alert: 2 of 3 contact(s)")
            .unwrap();

        let entries = log.recent(10).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].kind, AlertKind::AlertSent);
        assert_eq!(entries[1].kind, AlertKind::FallDetected);
        assert_eq!(entries[1].detail, "epoch 1");
    }

    #[test]
    fn test_alert_log_trims_old_entries() {
        let mut log = AlertLog::in_memory().unwrap();
        log.max_entries = 3;

        for i in 0..5 {
            log.record(AlertKind::LinkLost, &format!("drop {}", i)).unwrap();
        }

        assert_eq!(log.count().unwrap(), 3);
        let details: Vec<_> = log.recent(10).unwrap().into_iter().map(|e| e.detail).collect();
        assert_eq!(details, vec!["drop 4", "drop 3", "drop 2"]);
    }
}
