//! SQLite-backed browser profile: visit history, stored site data and the
//! settings key-value table.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::Connection;
use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::Mutex;

use crate::error::Result;
use crate::platform::{DataCategory, DataRemover, HistoryItem, HistoryQuery, HistoryStore, KeyValueStore};
use crate::settings::rfc3339;

#[derive(Clone)]
pub struct ProfileDb {
    conn: Arc<Mutex<Connection>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct ProfileCounts {
    pub history: i64,
    pub site_data: i64,
}

impl ProfileDb {
    pub fn open(path: &Path) -> Result<Self> {
        Self::from_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Upserts a visit; a repeat visit refreshes title and time.
    pub async fn record_visit(&self, url: &str, title: Option<&str>, visit_ms: i64) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            r#"
INSERT INTO history (url, title, visit_ms, visit_count)
VALUES (?1, ?2, ?3, 1)
ON CONFLICT(url) DO UPDATE SET
  title=COALESCE(excluded.title, history.title),
  visit_ms=MAX(excluded.visit_ms, history.visit_ms),
  visit_count=history.visit_count + 1
            "#,
            (url, title, visit_ms),
        )?;
        Ok(())
    }

    pub async fn store_site_data(
        &self,
        category: DataCategory,
        origin: &str,
        stored_ms: i64,
    ) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO site_data (category, origin, stored_ms) VALUES (?1, ?2, ?3)",
            (category.as_str(), origin, stored_ms),
        )?;
        Ok(())
    }

    pub async fn counts(&self) -> Result<ProfileCounts> {
        let conn = self.conn.lock().await;
        let history = conn.query_row("SELECT COUNT(*) FROM history", [], |row| row.get(0))?;
        let site_data = conn.query_row("SELECT COUNT(*) FROM site_data", [], |row| row.get(0))?;
        Ok(ProfileCounts { history, site_data })
    }
}

fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;

CREATE TABLE IF NOT EXISTS history (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  url TEXT NOT NULL UNIQUE,
  title TEXT,
  visit_ms INTEGER NOT NULL,
  visit_count INTEGER NOT NULL DEFAULT 1
);
CREATE INDEX IF NOT EXISTS idx_history_visit_ms ON history(visit_ms);

CREATE TABLE IF NOT EXISTS site_data (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  category TEXT NOT NULL,
  origin TEXT NOT NULL,
  stored_ms INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_site_data_category ON site_data(category, stored_ms);

CREATE TABLE IF NOT EXISTS kv (
  key TEXT PRIMARY KEY,
  value TEXT NOT NULL,
  updated_at TEXT NOT NULL
);
"#,
    )
}

#[async_trait]
impl HistoryStore for ProfileDb {
    async fn search(&self, query: &HistoryQuery) -> Result<Vec<HistoryItem>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            r#"
SELECT url, title, visit_ms FROM history
WHERE visit_ms >= ?1 AND visit_ms <= ?2
  AND (?3 = '' OR instr(lower(url), ?3) > 0 OR instr(lower(COALESCE(title, '')), ?3) > 0)
ORDER BY visit_ms DESC
LIMIT ?4
            "#,
        )?;
        let limit = i64::try_from(query.max_results).unwrap_or(i64::MAX);
        let rows = stmt.query_map(
            (
                query.start_ms,
                query.end_ms.unwrap_or(i64::MAX),
                query.text.to_lowercase(),
                limit,
            ),
            |row| {
                Ok(HistoryItem {
                    url: row.get(0)?,
                    title: row.get(1)?,
                    visit_ms: row.get(2)?,
                })
            },
        )?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    async fn delete_url(&self, url: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute("DELETE FROM history WHERE url = ?1", [url])?;
        Ok(())
    }

    async fn delete_all(&self) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute("DELETE FROM history", [])?;
        // Best effort: reset AUTOINCREMENT so ids start small again.
        let _ = conn.execute("DELETE FROM sqlite_sequence WHERE name = 'history'", []);
        Ok(())
    }
}

#[async_trait]
impl DataRemover for ProfileDb {
    async fn remove(&self, since_ms: i64, categories: &BTreeSet<DataCategory>) -> Result<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        for category in categories {
            tx.execute(
                "DELETE FROM site_data WHERE category = ?1 AND stored_ms >= ?2",
                (category.as_str(), since_ms),
            )?;
        }
        tx.commit()?;
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for ProfileDb {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().await;
        match conn.query_row("SELECT value FROM kv WHERE key = ?1", [key], |row| row.get(0)) {
            Ok(v) => Ok(Some(v)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let updated_at = rfc3339(OffsetDateTime::now_utc());
        let conn = self.conn.lock().await;
        conn.execute(
            r#"
INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)
ON CONFLICT(key) DO UPDATE SET
  value=excluded.value,
  updated_at=excluded.updated_at
            "#,
            (key, value, &updated_at),
        )?;
        Ok(())
    }
}
