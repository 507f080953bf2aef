use std::collections::BTreeSet;
use std::fmt::Display;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{error, info, warn};

use crate::error::{CleanerError, Result};
use crate::platform::{DataCategory, DataRemover, HistoryItem, HistoryQuery, HistoryStore};
use crate::settings::Removed;

/// Upper bound on entries enumerated per history search.
pub const SEARCH_CAP: usize = 10_000;
const HOUR_MS: i64 = 60 * 60 * 1000;

const FULL_CLEAN_CATEGORIES: [DataCategory; 6] = [
    DataCategory::Cache,
    DataCategory::Cookies,
    DataCategory::LocalStorage,
    DataCategory::IndexedDb,
    DataCategory::WebSql,
    DataCategory::ServiceWorkers,
];

/// User-facing data kinds for a selective clear.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CategorySelection {
    pub history: bool,
    pub cache: bool,
    pub cookies: bool,
    pub local_storage: bool,
}

impl CategorySelection {
    pub fn is_empty(&self) -> bool {
        !(self.history || self.cache || self.cookies || self.local_storage)
    }

    /// Engine categories for everything except history, which has its own API.
    pub fn data_categories(&self) -> BTreeSet<DataCategory> {
        let mut out = BTreeSet::new();
        if self.cache {
            out.insert(DataCategory::CacheStorage);
            out.insert(DataCategory::Cache);
        }
        if self.cookies {
            out.insert(DataCategory::Cookies);
        }
        if self.local_storage {
            out.insert(DataCategory::LocalStorage);
            out.insert(DataCategory::IndexedDb);
            out.insert(DataCategory::WebSql);
        }
        out
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CleanupRequest {
    Quick,
    Full,
    Url(String),
    Keyword(String),
    Bulk(Vec<String>),
    TimeRange { hours: u32 },
    AllHistory,
    Categories(CategorySelection),
}

impl CleanupRequest {
    fn kind(&self) -> &'static str {
        match self {
            CleanupRequest::Quick => "quick clear",
            CleanupRequest::Full => "full clean",
            CleanupRequest::Url(_) => "url clear",
            CleanupRequest::Keyword(_) => "keyword clear",
            CleanupRequest::Bulk(_) => "bulk clear",
            CleanupRequest::TimeRange { .. } => "time range clear",
            CleanupRequest::AllHistory => "all history clear",
            CleanupRequest::Categories(_) => "category clear",
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_urls: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keyword: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hours: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// What to add to the cumulative statistics; `None` leaves them untouched.
    #[serde(skip)]
    pub removed: Option<Removed>,
}

impl CleanupResult {
    pub fn failed(err: impl Display) -> Self {
        Self {
            success: false,
            error: Some(err.to_string()),
            ..Default::default()
        }
    }

    fn counted(count: u64) -> Self {
        Self {
            success: true,
            count: Some(count),
            removed: Some(Removed::Exact(count)),
            ..Default::default()
        }
    }

    fn wiped(message: &str) -> Self {
        Self {
            success: true,
            message: Some(message.to_string()),
            removed: Some(Removed::Unbounded),
            ..Default::default()
        }
    }
}

/// Lowercases and strips scheme, `www.` and trailing slash, repeatedly until stable.
pub fn normalize_url(url: &str) -> String {
    let mut current = url.to_lowercase();
    loop {
        let next = strip_url_decorations(&current);
        if next == current {
            return current;
        }
        current = next;
    }
}

fn strip_url_decorations(s: &str) -> String {
    let s = s.trim();
    let s = s
        .strip_prefix("https://")
        .or_else(|| s.strip_prefix("http://"))
        .unwrap_or(s);
    let s = s.strip_prefix("www.").unwrap_or(s);
    let s = s.strip_suffix('/').unwrap_or(s);
    s.to_string()
}

fn unix_ms(t: OffsetDateTime) -> i64 {
    (t.unix_timestamp_nanos() / 1_000_000) as i64
}

/// Turns cleanup requests into calls on the history store and deletion engine.
pub struct Orchestrator {
    history: Arc<dyn HistoryStore>,
    remover: Arc<dyn DataRemover>,
}

impl Orchestrator {
    pub fn new(history: Arc<dyn HistoryStore>, remover: Arc<dyn DataRemover>) -> Self {
        Self { history, remover }
    }

    /// Runs one request to completion. Never errors: failures come back as
    /// `success: false` with the error text.
    pub async fn execute(&self, request: &CleanupRequest, now: OffsetDateTime) -> CleanupResult {
        info!("{} started", request.kind());
        let outcome = match request {
            CleanupRequest::Quick => self.clear_last_hours(1, now).await.map(CleanupResult::counted),
            CleanupRequest::Full => self.full_clean().await,
            CleanupRequest::Url(url) => self.clear_url(url).await,
            CleanupRequest::Keyword(keyword) => self.clear_keyword(keyword).await,
            CleanupRequest::Bulk(urls) => Ok(self.clear_bulk(urls).await),
            CleanupRequest::TimeRange { hours } => self.clear_time_range(*hours, now).await,
            CleanupRequest::AllHistory => self.clear_all_history().await,
            CleanupRequest::Categories(selection) => {
                return self.clear_categories(selection).await;
            }
        };
        match outcome {
            Ok(result) => {
                info!("{} finished", request.kind());
                result
            }
            Err(err) => {
                error!("{} failed: {err}", request.kind());
                CleanupResult::failed(err)
            }
        }
    }

    async fn search_all(&self, text: &str) -> Result<Vec<HistoryItem>> {
        self.history
            .search(&HistoryQuery {
                text: text.to_string(),
                start_ms: 0,
                end_ms: None,
                max_results: SEARCH_CAP,
            })
            .await
    }

    /// Deletes entries one at a time; a failed delete is logged and skipped.
    async fn delete_each(&self, items: &[&HistoryItem]) -> u64 {
        let mut deleted = 0;
        for item in items {
            match self.history.delete_url(&item.url).await {
                Ok(()) => deleted += 1,
                Err(err) => warn!("delete {} failed: {err}", item.url),
            }
        }
        deleted
    }

    async fn clear_last_hours(&self, hours: u32, now: OffsetDateTime) -> Result<u64> {
        let now_ms = unix_ms(now);
        let items = self
            .history
            .search(&HistoryQuery {
                text: String::new(),
                start_ms: now_ms - i64::from(hours) * HOUR_MS,
                end_ms: Some(now_ms),
                max_results: SEARCH_CAP,
            })
            .await?;
        let matches: Vec<&HistoryItem> = items.iter().collect();
        Ok(self.delete_each(&matches).await)
    }

    async fn full_clean(&self) -> Result<CleanupResult> {
        self.history.delete_all().await?;
        self.remover
            .remove(0, &FULL_CLEAN_CATEGORIES.into_iter().collect())
            .await?;
        Ok(CleanupResult::wiped("All browsing data cleared"))
    }

    async fn clear_url(&self, url: &str) -> Result<CleanupResult> {
        let target = normalize_url(url);
        if target.is_empty() {
            return Err(CleanerError::InvalidRequest("url must not be empty".into()));
        }
        let items = self.search_all("").await?;
        let matches: Vec<&HistoryItem> = items
            .iter()
            .filter(|item| !item.url.is_empty() && normalize_url(&item.url).contains(&target))
            .collect();
        let count = self.delete_each(&matches).await;
        Ok(CleanupResult {
            url: Some(url.to_string()),
            ..CleanupResult::counted(count)
        })
    }

    async fn clear_keyword(&self, keyword: &str) -> Result<CleanupResult> {
        if keyword.is_empty() {
            return Err(CleanerError::InvalidRequest("keyword must not be empty".into()));
        }
        let items = self.search_all(keyword).await?;
        // The store's text search is loose; keep only literal hits.
        let matches: Vec<&HistoryItem> = items
            .iter()
            .filter(|item| {
                !item.url.is_empty()
                    && (item.url.contains(keyword)
                        || item.title.as_deref().is_some_and(|t| t.contains(keyword)))
            })
            .collect();
        let count = self.delete_each(&matches).await;
        Ok(CleanupResult {
            keyword: Some(keyword.to_string()),
            ..CleanupResult::counted(count)
        })
    }

    async fn clear_bulk(&self, urls: &[String]) -> CleanupResult {
        let mut total_count = 0;
        let mut processed_urls = 0;
        for url in urls {
            match self.clear_url(url).await {
                Ok(result) => {
                    total_count += result.count.unwrap_or(0);
                    processed_urls += 1;
                }
                Err(err) => warn!("bulk clear of {url} failed: {err}"),
            }
        }
        CleanupResult {
            success: true,
            total_count: Some(total_count),
            processed_urls: Some(processed_urls),
            removed: Some(Removed::Exact(total_count)),
            ..Default::default()
        }
    }

    async fn clear_time_range(&self, hours: u32, now: OffsetDateTime) -> Result<CleanupResult> {
        if hours == 0 {
            return Err(CleanerError::InvalidRequest("hours must be positive".into()));
        }
        let count = self.clear_last_hours(hours, now).await?;
        Ok(CleanupResult {
            hours: Some(hours),
            ..CleanupResult::counted(count)
        })
    }

    async fn clear_all_history(&self) -> Result<CleanupResult> {
        self.history.delete_all().await?;
        Ok(CleanupResult::wiped("All history cleared"))
    }

    /// History goes first; once it is wiped the removal counts even if the
    /// category call then fails.
    async fn clear_categories(&self, selection: &CategorySelection) -> CleanupResult {
        let kind = "category clear";
        let mut removed = None;
        if selection.history {
            if let Err(err) = self.history.delete_all().await {
                error!("{kind} failed: {err}");
                return CleanupResult::failed(err);
            }
            removed = Some(Removed::Unbounded);
        }
        let categories = selection.data_categories();
        if !categories.is_empty() {
            if let Err(err) = self.remover.remove(0, &categories).await {
                error!("{kind} failed: {err}");
                return CleanupResult {
                    removed,
                    ..CleanupResult::failed(err)
                };
            }
        }
        info!("{kind} finished");
        CleanupResult {
            success: true,
            message: Some("Selected data cleared".to_string()),
            removed,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{categories, FakeHistory, FakeRemover};
    use time::format_description::well_known::Rfc3339;

    fn now() -> OffsetDateTime {
        OffsetDateTime::parse("2026-03-01T10:00:00Z", &Rfc3339).unwrap()
    }

    fn mins_ago(m: i64) -> i64 {
        unix_ms(now()) - m * 60 * 1000
    }

    fn orchestrator(history: &Arc<FakeHistory>, remover: &Arc<FakeRemover>) -> Orchestrator {
        Orchestrator::new(history.clone(), remover.clone())
    }

    #[test]
    fn normalize_url_strips_decorations() {
        assert_eq!(normalize_url("HTTPS://WWW.Example.com/"), normalize_url("example.com"));
        assert_eq!(normalize_url("http://example.com/path/"), "example.com/path");
        assert_eq!(normalize_url("www.a.com"), "a.com");
    }

    #[test]
    fn normalize_url_is_idempotent() {
        for u in [
            "https://http://www.www.a.com//",
            "HTTP://Example.COM/Path/",
            "  https:// spaced.org/ ",
            "",
            "/",
            "www.",
            "ftp://x.y/",
        ] {
            let once = normalize_url(u);
            assert_eq!(normalize_url(&once), once, "input {u:?}");
        }
    }

    #[tokio::test]
    async fn url_clear_matches_substring_of_normalized_urls() {
        let history = Arc::new(FakeHistory::with_items(&[
            ("https://a.com/x", "", mins_ago(10)),
            ("http://www.a.com/y", "", mins_ago(5000)),
            ("https://b.com/", "", mins_ago(1)),
        ]));
        let remover = Arc::new(FakeRemover::default());
        let result = orchestrator(&history, &remover)
            .execute(&CleanupRequest::Url("a.com".into()), now())
            .await;

        assert!(result.success);
        assert_eq!(result.count, Some(2));
        assert_eq!(result.url.as_deref(), Some("a.com"));
        assert_eq!(result.removed, Some(Removed::Exact(2)));
        assert_eq!(history.urls(), vec!["https://b.com/".to_string()]);

        let q = &history.queries()[0];
        assert_eq!((q.start_ms, q.end_ms, q.max_results), (0, None, SEARCH_CAP));
    }

    #[tokio::test]
    async fn empty_url_is_rejected() {
        let history = Arc::new(FakeHistory::with_items(&[("https://a.com", "", 0)]));
        let remover = Arc::new(FakeRemover::default());
        let result = orchestrator(&history, &remover)
            .execute(&CleanupRequest::Url("https://".into()), now())
            .await;
        assert!(!result.success);
        assert_eq!(history.urls().len(), 1);
    }

    #[tokio::test]
    async fn quick_clear_only_touches_last_hour_and_skips_failures() {
        let history = Arc::new(FakeHistory::with_items(&[
            ("https://recent.com/1", "", mins_ago(5)),
            ("https://recent.com/2", "", mins_ago(30)),
            ("https://stuck.com", "", mins_ago(40)),
            ("https://old.com", "", mins_ago(90)),
        ]));
        history.fail_delete_of("https://stuck.com");
        let remover = Arc::new(FakeRemover::default());
        let result = orchestrator(&history, &remover)
            .execute(&CleanupRequest::Quick, now())
            .await;

        assert!(result.success);
        assert_eq!(result.count, Some(2));
        assert_eq!(
            history.urls(),
            vec!["https://stuck.com".to_string(), "https://old.com".to_string()]
        );
        let q = &history.queries()[0];
        assert_eq!(q.start_ms, mins_ago(60));
        assert_eq!(q.end_ms, Some(unix_ms(now())));
    }

    #[tokio::test]
    async fn time_range_uses_requested_window() {
        let history = Arc::new(FakeHistory::with_items(&[
            ("https://a.com", "", mins_ago(60 * 3)),
            ("https://b.com", "", mins_ago(60 * 30)),
        ]));
        let remover = Arc::new(FakeRemover::default());
        let result = orchestrator(&history, &remover)
            .execute(&CleanupRequest::TimeRange { hours: 24 }, now())
            .await;

        assert!(result.success);
        assert_eq!(result.count, Some(1));
        assert_eq!(result.hours, Some(24));
        assert_eq!(history.urls(), vec!["https://b.com".to_string()]);
    }

    #[tokio::test]
    async fn keyword_clear_refilters_case_sensitively() {
        let history = Arc::new(FakeHistory::with_items(&[
            ("https://rust-lang.org", "Home", 1),
            ("https://books.example", "Rust Book", 2),
            ("https://blog.example", "about rust tips", 3),
            ("https://unrelated.example", "Cooking", 4),
        ]));
        let remover = Arc::new(FakeRemover::default());
        let result = orchestrator(&history, &remover)
            .execute(&CleanupRequest::Keyword("rust".into()), now())
            .await;

        assert!(result.success);
        assert_eq!(result.count, Some(2));
        assert_eq!(result.keyword.as_deref(), Some("rust"));
        assert_eq!(
            history.urls(),
            vec![
                "https://books.example".to_string(),
                "https://unrelated.example".to_string()
            ]
        );
        assert_eq!(history.queries()[0].text, "rust");
    }

    #[tokio::test]
    async fn bulk_clear_continues_after_a_failed_url() {
        let history = Arc::new(FakeHistory::with_items(&[
            ("https://one.com/a", "", 1),
            ("https://two.com/a", "", 2),
            ("https://two.com/b", "", 3),
        ]));
        history.fail_searches(1);
        let remover = Arc::new(FakeRemover::default());
        let result = orchestrator(&history, &remover)
            .execute(
                &CleanupRequest::Bulk(vec!["one.com".into(), "two.com".into()]),
                now(),
            )
            .await;

        assert!(result.success);
        assert_eq!(result.processed_urls, Some(1));
        assert_eq!(result.total_count, Some(2));
        assert_eq!(history.queries().len(), 2, "second url still attempted");
        assert_eq!(history.urls(), vec!["https://one.com/a".to_string()]);
    }

    #[tokio::test]
    async fn bulk_clear_counts_successful_urls_with_no_matches() {
        let history = Arc::new(FakeHistory::with_items(&[("https://a.com", "", 1)]));
        let remover = Arc::new(FakeRemover::default());
        let result = orchestrator(&history, &remover)
            .execute(
                &CleanupRequest::Bulk(vec!["nothing.here".into(), "a.com".into()]),
                now(),
            )
            .await;
        assert_eq!(result.processed_urls, Some(2));
        assert_eq!(result.total_count, Some(1));
    }

    #[tokio::test]
    async fn full_clean_wipes_history_and_site_data() {
        let history = Arc::new(FakeHistory::with_items(&[("https://a.com", "", 1)]));
        let remover = Arc::new(FakeRemover::default());
        let result = orchestrator(&history, &remover)
            .execute(&CleanupRequest::Full, now())
            .await;

        assert!(result.success);
        assert_eq!(result.removed, Some(Removed::Unbounded));
        assert_eq!(history.delete_all_calls(), 1);
        assert_eq!(
            remover.calls(),
            vec![(0, categories(&FULL_CLEAN_CATEGORIES))]
        );
    }

    #[tokio::test]
    async fn full_clean_reports_engine_failure() {
        let history = Arc::new(FakeHistory::default());
        let remover = Arc::new(FakeRemover::default());
        remover.fail();
        let result = orchestrator(&history, &remover)
            .execute(&CleanupRequest::Full, now())
            .await;

        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("browsing data removal failed"));
        assert_eq!(result.removed, None);
    }

    #[tokio::test]
    async fn all_history_uses_bulk_delete() {
        let history = Arc::new(FakeHistory::with_items(&[("https://a.com", "", 1)]));
        let remover = Arc::new(FakeRemover::default());
        let result = orchestrator(&history, &remover)
            .execute(&CleanupRequest::AllHistory, now())
            .await;
        assert!(result.success);
        assert_eq!(result.message.as_deref(), Some("All history cleared"));
        assert!(history.urls().is_empty());
        assert!(remover.calls().is_empty());
    }

    #[tokio::test]
    async fn cookies_only_selection_issues_one_category_call() {
        let history = Arc::new(FakeHistory::default());
        let remover = Arc::new(FakeRemover::default());
        let selection = CategorySelection {
            cookies: true,
            ..Default::default()
        };
        let result = orchestrator(&history, &remover)
            .execute(&CleanupRequest::Categories(selection), now())
            .await;

        assert!(result.success);
        assert_eq!(result.removed, None);
        assert_eq!(history.delete_all_calls(), 0);
        assert_eq!(remover.calls(), vec![(0, categories(&[DataCategory::Cookies]))]);
    }

    #[tokio::test]
    async fn selection_maps_to_engine_vocabulary() {
        let history = Arc::new(FakeHistory::default());
        let remover = Arc::new(FakeRemover::default());
        let selection = CategorySelection {
            history: true,
            cache: true,
            cookies: false,
            local_storage: true,
        };
        let result = orchestrator(&history, &remover)
            .execute(&CleanupRequest::Categories(selection), now())
            .await;

        assert!(result.success);
        assert_eq!(result.removed, Some(Removed::Unbounded));
        assert_eq!(history.delete_all_calls(), 1);
        assert_eq!(
            remover.calls(),
            vec![(
                0,
                categories(&[
                    DataCategory::Cache,
                    DataCategory::CacheStorage,
                    DataCategory::LocalStorage,
                    DataCategory::IndexedDb,
                    DataCategory::WebSql,
                ])
            )]
        );
    }

    #[tokio::test]
    async fn failed_category_call_keeps_history_removal() {
        let history = Arc::new(FakeHistory::with_items(&[("https://a.com", "", mins_ago(1))]));
        let remover = Arc::new(FakeRemover::default());
        remover.fail();
        let selection = CategorySelection {
            history: true,
            cookies: true,
            ..Default::default()
        };
        let result = orchestrator(&history, &remover)
            .execute(&CleanupRequest::Categories(selection), now())
            .await;

        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("browsing data removal failed"));
        assert_eq!(result.removed, Some(Removed::Unbounded));
        assert!(history.urls().is_empty());

        history.fail_delete_all();
        let result = orchestrator(&history, &remover)
            .execute(
                &CleanupRequest::Categories(CategorySelection {
                    history: true,
                    ..Default::default()
                }),
                now(),
            )
            .await;
        assert!(!result.success);
        assert_eq!(result.removed, None);
    }

    #[test]
    fn result_serializes_like_the_extension_expects() {
        let r = CleanupResult {
            url: Some("a.com".into()),
            ..CleanupResult::counted(3)
        };
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(v, serde_json::json!({"success": true, "count": 3, "url": "a.com"}));

        let v = serde_json::to_value(CleanupResult::failed("boom")).unwrap();
        assert_eq!(v, serde_json::json!({"success": false, "error": "boom"}));
    }
}
