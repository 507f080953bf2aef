//! Contracts for the host services the cleaner drives.
//!
//! The core never talks to a browser directly. Everything it deletes, schedules or
//! persists goes through one of these traits, so the binary can plug in the SQLite
//! profile adapter and tests can plug in in-memory fakes.

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// One visited page as reported by the history store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryItem {
    pub url: String,
    #[serde(default)]
    pub title: Option<String>,
    /// Last visit, milliseconds since the Unix epoch.
    pub visit_ms: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HistoryQuery {
    /// Free-text filter matched by the store. Empty matches everything.
    pub text: String,
    pub start_ms: i64,
    /// `None` means "up to now".
    pub end_ms: Option<i64>,
    pub max_results: usize,
}

/// Site-data kinds understood by the bulk deletion engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DataCategory {
    #[serde(rename = "cache")]
    Cache,
    #[serde(rename = "cacheStorage")]
    CacheStorage,
    #[serde(rename = "cookies")]
    Cookies,
    #[serde(rename = "localStorage")]
    LocalStorage,
    #[serde(rename = "indexedDB")]
    IndexedDb,
    #[serde(rename = "webSQL")]
    WebSql,
    #[serde(rename = "serviceWorkers")]
    ServiceWorkers,
}

impl DataCategory {
    pub const ALL: [DataCategory; 7] = [
        DataCategory::Cache,
        DataCategory::CacheStorage,
        DataCategory::Cookies,
        DataCategory::LocalStorage,
        DataCategory::IndexedDb,
        DataCategory::WebSql,
        DataCategory::ServiceWorkers,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DataCategory::Cache => "cache",
            DataCategory::CacheStorage => "cacheStorage",
            DataCategory::Cookies => "cookies",
            DataCategory::LocalStorage => "localStorage",
            DataCategory::IndexedDb => "indexedDB",
            DataCategory::WebSql => "webSQL",
            DataCategory::ServiceWorkers => "serviceWorkers",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == s)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub message: String,
}

#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn search(&self, query: &HistoryQuery) -> Result<Vec<HistoryItem>>;

    /// Removes every visit recorded for `url`. Deleting an unknown URL is not an error.
    async fn delete_url(&self, url: &str) -> Result<()>;

    async fn delete_all(&self) -> Result<()>;
}

#[async_trait]
pub trait DataRemover: Send + Sync {
    /// Purges all data in `categories` stored at or after `since_ms` (0 = all time).
    async fn remove(&self, since_ms: i64, categories: &BTreeSet<DataCategory>) -> Result<()>;
}

#[async_trait]
pub trait TimerService: Send + Sync {
    /// Installs (or replaces) a named repeating alarm.
    async fn create_periodic(
        &self,
        name: &str,
        initial_delay_minutes: u32,
        period_minutes: u32,
    ) -> Result<()>;

    async fn cancel(&self, name: &str) -> Result<()>;
}

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Fire-and-forget: implementations log their own failures.
    async fn show(&self, notification: &Notification);
}
