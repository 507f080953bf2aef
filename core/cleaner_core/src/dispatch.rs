use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{debug, error, info};

use crate::cleanup::{CategorySelection, CleanupRequest, CleanupResult, Orchestrator};
use crate::error::Result;
use crate::platform::{
    DataCategory, DataRemover, HistoryQuery, HistoryStore, KeyValueStore, Notification, Notifier,
    TimerService,
};
use crate::settings::{Removed, ScheduleUpdate, Settings, SettingsManager, Startup, SCHEDULE_ALARM};

const STATS_SEARCH_CAP: usize = 100_000;
const NOTIFICATION_TITLE: &str = "History Cleaner Pro";
const POLICY_CATEGORIES: [DataCategory; 2] = [DataCategory::Cache, DataCategory::Cookies];

/// A request from the UI layer: an `action` tag plus its parameters.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Action {
    QuickClear,
    FullClean,
    ClearUrl { url: String },
    ClearKeyword { keyword: String },
    ClearBulk { urls: Vec<String> },
    ClearCache { options: CategorySelection },
    ClearTimeRange { hours: u32 },
    ClearAllHistory,
    SaveSchedule { schedule: ScheduleUpdate },
    SaveStartup { startup: Startup },
    GetSettings,
    GetStats,
    GetNextCleanTime,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Ack {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Ack {
    fn from_result(res: Result<()>) -> Self {
        match res {
            Ok(()) => Ack {
                success: true,
                error: None,
            },
            Err(err) => Ack {
                success: false,
                error: Some(err.to_string()),
            },
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsReply {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_cleared: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_cleaned: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Plain result object handed back across the request/response channel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Reply {
    Cleanup(CleanupResult),
    Ack(Ack),
    CurrentSettings {
        settings: Settings,
    },
    Stats(StatsReply),
    NextClean {
        #[serde(rename = "nextCleanTime")]
        next_clean_time: String,
    },
}

pub struct Collaborators {
    pub history: Arc<dyn HistoryStore>,
    pub remover: Arc<dyn DataRemover>,
    pub store: Arc<dyn KeyValueStore>,
    pub timers: Arc<dyn TimerService>,
    pub notifier: Arc<dyn Notifier>,
}

/// The whole cleaner: settings, orchestration and the hooks the host calls into.
pub struct Cleaner {
    settings: SettingsManager,
    orchestrator: Orchestrator,
    history: Arc<dyn HistoryStore>,
    remover: Arc<dyn DataRemover>,
    notifier: Arc<dyn Notifier>,
}

impl Cleaner {
    pub async fn start(c: Collaborators, now: OffsetDateTime) -> Self {
        let settings = SettingsManager::load(c.store, c.timers, now).await;
        Self {
            settings,
            orchestrator: Orchestrator::new(c.history.clone(), c.remover.clone()),
            history: c.history,
            remover: c.remover,
            notifier: c.notifier,
        }
    }

    pub fn settings(&self) -> &Settings {
        self.settings.settings()
    }

    pub async fn dispatch(&mut self, action: Action, now: OffsetDateTime) -> Reply {
        debug!("dispatch {action:?}");
        match action {
            Action::QuickClear => self.cleanup(CleanupRequest::Quick, now).await,
            Action::FullClean => self.cleanup(CleanupRequest::Full, now).await,
            Action::ClearUrl { url } => self.cleanup(CleanupRequest::Url(url), now).await,
            Action::ClearKeyword { keyword } => {
                self.cleanup(CleanupRequest::Keyword(keyword), now).await
            }
            Action::ClearBulk { urls } => self.cleanup(CleanupRequest::Bulk(urls), now).await,
            Action::ClearCache { options } => {
                if options.is_empty() {
                    return Reply::Cleanup(CleanupResult::failed(
                        "select at least one data type to clear",
                    ));
                }
                self.cleanup(CleanupRequest::Categories(options), now).await
            }
            Action::ClearTimeRange { hours } => {
                self.cleanup(CleanupRequest::TimeRange { hours }, now).await
            }
            Action::ClearAllHistory => self.cleanup(CleanupRequest::AllHistory, now).await,
            Action::SaveSchedule { schedule } => {
                let res = self.settings.update_schedule(schedule, now).await;
                if let Err(err) = &res {
                    error!("save schedule failed: {err}");
                }
                Reply::Ack(Ack::from_result(res))
            }
            Action::SaveStartup { startup } => {
                Reply::Ack(Ack::from_result(self.settings.update_startup(startup).await))
            }
            Action::GetSettings => Reply::CurrentSettings {
                settings: self.settings().clone(),
            },
            Action::GetStats => Reply::Stats(self.stats().await),
            Action::GetNextCleanTime => Reply::NextClean {
                next_clean_time: self.settings.next_clean_description(now),
            },
        }
    }

    async fn cleanup(&mut self, request: CleanupRequest, now: OffsetDateTime) -> Reply {
        Reply::Cleanup(self.run_cleanup(&request, now).await)
    }

    /// Executes a request and feeds whatever it removed into the statistics,
    /// including a partial removal from a request that failed later on.
    pub async fn run_cleanup(&mut self, request: &CleanupRequest, now: OffsetDateTime) -> CleanupResult {
        let result = self.orchestrator.execute(request, now).await;
        if let Some(removed) = result.removed {
            self.settings.record_cleanup(removed, now).await;
        }
        result
    }

    async fn stats(&self) -> StatsReply {
        let query = HistoryQuery {
            text: String::new(),
            start_ms: 0,
            end_ms: None,
            max_results: STATS_SEARCH_CAP,
        };
        match self.history.search(&query).await {
            Ok(items) => {
                let stats = &self.settings().stats;
                StatsReply {
                    success: true,
                    history_count: Some(items.len()),
                    total_cleared: Some(stats.total_cleared),
                    last_cleaned: Some(
                        stats
                            .last_cleaned
                            .clone()
                            .unwrap_or_else(|| "Never".to_string()),
                    ),
                    error: None,
                }
            }
            Err(err) => {
                error!("get stats failed: {err}");
                StatsReply {
                    success: false,
                    history_count: None,
                    total_cleared: None,
                    last_cleaned: None,
                    error: Some(err.to_string()),
                }
            }
        }
    }

    async fn wipe_for_policy(&self, clear_history: bool, clear_cache: bool) -> Result<()> {
        if clear_history {
            self.history.delete_all().await?;
        }
        if clear_cache {
            let categories: BTreeSet<DataCategory> = POLICY_CATEGORIES.into_iter().collect();
            self.remover.remove(0, &categories).await?;
        }
        Ok(())
    }

    /// Timer entry point. Only the schedule alarm is acted on, and only while enabled.
    pub async fn on_alarm(&mut self, name: &str, now: OffsetDateTime) {
        if name != SCHEDULE_ALARM {
            debug!("ignoring alarm {name}");
            return;
        }
        let schedule = self.settings().schedule.clone();
        if !schedule.enabled {
            info!("schedule disabled, skipping stale alarm");
            return;
        }

        info!("performing scheduled cleaning");
        match self
            .wipe_for_policy(schedule.clear_history, schedule.clear_cache)
            .await
        {
            Ok(()) => {
                self.settings.mark_scheduled_run(now, true).await;
                self.settings.record_cleanup(Removed::Unbounded, now).await;
                self.notifier
                    .show(&Notification {
                        title: NOTIFICATION_TITLE.to_string(),
                        message: "Scheduled cleaning completed successfully!".to_string(),
                    })
                    .await;
            }
            Err(err) => {
                error!("scheduled cleaning failed: {err}");
                self.settings.mark_scheduled_run(now, false).await;
            }
        }
    }

    /// Browser-start entry point.
    pub async fn run_startup_cleaning(&mut self, now: OffsetDateTime) {
        let startup = self.settings().startup.clone();
        if !startup.enabled {
            return;
        }
        info!("performing startup cleaning");
        match self
            .wipe_for_policy(startup.clear_history, startup.clear_cache)
            .await
        {
            Ok(()) => self.settings.record_cleanup(Removed::Unbounded, now).await,
            Err(err) => error!("startup cleaning failed: {err}"),
        }
    }
}
