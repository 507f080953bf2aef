//! In-memory collaborators for unit tests.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{CleanerError, Result};
use crate::platform::{
    DataCategory, DataRemover, HistoryItem, HistoryQuery, HistoryStore, KeyValueStore,
    Notification, Notifier, TimerService,
};

#[derive(Default)]
pub struct MemoryKv {
    values: Mutex<HashMap<String, String>>,
    fail_writes: AtomicBool,
}

impl MemoryKv {
    pub fn put(&self, key: &str, value: &str) {
        self.values
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
    }

    pub fn raw(&self, key: &str) -> Option<String> {
        self.values.lock().unwrap().get(key).cloned()
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl KeyValueStore for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.raw(key))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(CleanerError::Platform("storage quota exceeded".into()));
        }
        self.put(key, value);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeTimers {
    active: Mutex<HashMap<String, (u32, u32)>>,
    fail_next: AtomicBool,
}

impl FakeTimers {
    pub fn active(&self) -> HashMap<String, (u32, u32)> {
        self.active.lock().unwrap().clone()
    }

    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl TimerService for FakeTimers {
    async fn create_periodic(
        &self,
        name: &str,
        initial_delay_minutes: u32,
        period_minutes: u32,
    ) -> Result<()> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(CleanerError::Platform("alarm quota exceeded".into()));
        }
        self.active
            .lock()
            .unwrap()
            .insert(name.to_string(), (initial_delay_minutes, period_minutes));
        Ok(())
    }

    async fn cancel(&self, name: &str) -> Result<()> {
        self.active.lock().unwrap().remove(name);
        Ok(())
    }
}

/// History store whose text search mimics a browser's loose matching
/// (case-insensitive, url or title).
#[derive(Default)]
pub struct FakeHistory {
    items: Mutex<Vec<HistoryItem>>,
    failing_urls: Mutex<HashSet<String>>,
    failing_searches: AtomicUsize,
    fail_delete_all: AtomicBool,
    delete_all_calls: AtomicUsize,
    queries: Mutex<Vec<HistoryQuery>>,
}

impl FakeHistory {
    pub fn with_items(items: &[(&str, &str, i64)]) -> Self {
        let h = Self::default();
        *h.items.lock().unwrap() = items
            .iter()
            .map(|(url, title, visit_ms)| HistoryItem {
                url: url.to_string(),
                title: Some(title.to_string()).filter(|t| !t.is_empty()),
                visit_ms: *visit_ms,
            })
            .collect();
        h
    }

    pub fn urls(&self) -> Vec<String> {
        self.items.lock().unwrap().iter().map(|i| i.url.clone()).collect()
    }

    pub fn fail_delete_of(&self, url: &str) {
        self.failing_urls.lock().unwrap().insert(url.to_string());
    }

    /// The next `n` searches fail.
    pub fn fail_searches(&self, n: usize) {
        self.failing_searches.store(n, Ordering::SeqCst);
    }

    pub fn fail_delete_all(&self) {
        self.fail_delete_all.store(true, Ordering::SeqCst);
    }

    pub fn delete_all_calls(&self) -> usize {
        self.delete_all_calls.load(Ordering::SeqCst)
    }

    pub fn queries(&self) -> Vec<HistoryQuery> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl HistoryStore for FakeHistory {
    async fn search(&self, query: &HistoryQuery) -> Result<Vec<HistoryItem>> {
        self.queries.lock().unwrap().push(query.clone());
        let pending = self.failing_searches.load(Ordering::SeqCst);
        if pending > 0 {
            self.failing_searches.store(pending - 1, Ordering::SeqCst);
            return Err(CleanerError::Platform("history service unavailable".into()));
        }
        let needle = query.text.to_lowercase();
        Ok(self
            .items
            .lock()
            .unwrap()
            .iter()
            .filter(|i| i.visit_ms >= query.start_ms)
            .filter(|i| query.end_ms.map_or(true, |end| i.visit_ms <= end))
            .filter(|i| {
                needle.is_empty()
                    || i.url.to_lowercase().contains(&needle)
                    || i
                        .title
                        .as_deref()
                        .is_some_and(|t| t.to_lowercase().contains(&needle))
            })
            .take(query.max_results)
            .cloned()
            .collect())
    }

    async fn delete_url(&self, url: &str) -> Result<()> {
        if self.failing_urls.lock().unwrap().contains(url) {
            return Err(CleanerError::Platform(format!("cannot delete {url}")));
        }
        self.items.lock().unwrap().retain(|i| i.url != url);
        Ok(())
    }

    async fn delete_all(&self) -> Result<()> {
        self.delete_all_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_delete_all.load(Ordering::SeqCst) {
            return Err(CleanerError::Platform("history service unavailable".into()));
        }
        self.items.lock().unwrap().clear();
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeRemover {
    calls: Mutex<Vec<(i64, BTreeSet<DataCategory>)>>,
    fail: AtomicBool,
}

impl FakeRemover {
    pub fn calls(&self) -> Vec<(i64, BTreeSet<DataCategory>)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn fail(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl DataRemover for FakeRemover {
    async fn remove(&self, since_ms: i64, categories: &BTreeSet<DataCategory>) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(CleanerError::Platform("browsing data removal failed".into()));
        }
        self.calls
            .lock()
            .unwrap()
            .push((since_ms, categories.clone()));
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeNotifier {
    shown: Mutex<Vec<Notification>>,
}

impl FakeNotifier {
    pub fn shown(&self) -> Vec<Notification> {
        self.shown.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for FakeNotifier {
    async fn show(&self, notification: &Notification) {
        self.shown.lock().unwrap().push(notification.clone());
    }
}

pub fn categories(list: &[DataCategory]) -> BTreeSet<DataCategory> {
    list.iter().copied().collect()
}
