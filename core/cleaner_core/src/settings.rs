use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::{format_description::well_known::Rfc3339, macros::format_description, Duration, OffsetDateTime};
use tracing::{error, info, warn};

use crate::error::{CleanerError, Result};
use crate::platform::{KeyValueStore, TimerService};

pub const SETTINGS_KEY: &str = "historyCleanerSettings";
pub const SCHEDULE_ALARM: &str = "scheduledCleaning";
pub const DEFAULT_INTERVAL_MINUTES: u32 = 60;
/// Added to `total_cleared` when a bulk wipe cannot report how much it removed.
pub const SENTINEL_INCREMENT: u64 = 9999;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Schedule {
    pub enabled: bool,
    /// Minutes between runs. Always > 0.
    pub interval: u32,
    pub clear_history: bool,
    pub clear_cache: bool,
    pub last_run: Option<String>,
    pub next_run: Option<String>,
}

impl Default for Schedule {
    fn default() -> Self {
        Self {
            enabled: false,
            interval: DEFAULT_INTERVAL_MINUTES,
            clear_history: true,
            clear_cache: false,
            last_run: None,
            next_run: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Startup {
    pub enabled: bool,
    pub clear_history: bool,
    pub clear_cache: bool,
}

impl Default for Startup {
    fn default() -> Self {
        Self {
            enabled: false,
            clear_history: true,
            clear_cache: false,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Stats {
    pub total_cleared: u64,
    pub last_cleaned: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub schedule: Schedule,
    pub startup: Startup,
    pub stats: Stats,
}

impl Settings {
    /// Decodes a stored record section by section; anything unreadable falls back
    /// to its default instead of discarding the whole record.
    pub fn from_stored(raw: &str) -> Self {
        let mut settings = Settings::default();
        let value: Value = match serde_json::from_str(raw) {
            Ok(v) => v,
            Err(err) => {
                warn!("stored settings are not valid JSON, using defaults: {err}");
                return settings;
            }
        };

        if let Some(v) = value.get("schedule") {
            match serde_json::from_value::<Schedule>(v.clone()) {
                Ok(s) => settings.schedule = s,
                Err(err) => warn!("stored schedule unreadable, using defaults: {err}"),
            }
        }
        if let Some(v) = value.get("startup") {
            match serde_json::from_value::<Startup>(v.clone()) {
                Ok(s) => settings.startup = s,
                Err(err) => warn!("stored startup policy unreadable, using defaults: {err}"),
            }
        }
        if let Some(v) = value.get("stats") {
            match serde_json::from_value::<Stats>(v.clone()) {
                Ok(s) => settings.stats = s,
                Err(err) => warn!("stored stats unreadable, using defaults: {err}"),
            }
        }

        if settings.schedule.interval == 0 {
            warn!("stored schedule interval was 0, reset to {DEFAULT_INTERVAL_MINUTES}");
            settings.schedule.interval = DEFAULT_INTERVAL_MINUTES;
        }
        settings
    }
}

/// Partial schedule edit; absent fields keep their current value.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScheduleUpdate {
    pub enabled: Option<bool>,
    pub interval: Option<u32>,
    pub clear_history: Option<bool>,
    pub clear_cache: Option<bool>,
}

/// How many items a cleanup removed, as far as it can tell.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Removed {
    Exact(u64),
    /// Bulk wipes ("everything since epoch") report no count.
    Unbounded,
}

impl Removed {
    pub fn increment(self) -> u64 {
        match self {
            Removed::Exact(n) => n,
            Removed::Unbounded => SENTINEL_INCREMENT,
        }
    }
}

pub fn rfc3339(t: OffsetDateTime) -> String {
    t.format(&Rfc3339).unwrap_or_default()
}

/// `now` plus `interval` minutes, rejected when it falls outside the representable range.
fn run_after(now: OffsetDateTime, interval: u32) -> Result<OffsetDateTime> {
    now.checked_add(Duration::minutes(i64::from(interval)))
        .ok_or_else(|| {
            CleanerError::InvalidRequest(format!("interval of {interval} minutes is too large"))
        })
}

fn display_time(t: OffsetDateTime) -> String {
    let fmt = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    match t.format(fmt) {
        Ok(s) => format!("{s} UTC"),
        Err(_) => rfc3339(t),
    }
}

/// Human description of when the scheduled cleaner will next run.
pub fn describe_next_clean(schedule: &Schedule, now: OffsetDateTime) -> String {
    if !schedule.enabled {
        return "Not scheduled".to_string();
    }
    let Some(next_run) = schedule
        .next_run
        .as_deref()
        .and_then(|s| OffsetDateTime::parse(s, &Rfc3339).ok())
    else {
        return "Not scheduled".to_string();
    };

    let diff_ms = (next_run - now).whole_milliseconds();
    let minutes = (diff_ms as f64 / 60_000.0).round() as i64;

    if minutes <= 0 {
        "Any minute now...".to_string()
    } else if minutes < 60 {
        format!("In {minutes} minutes")
    } else if minutes < 120 {
        "In 1 hour".to_string()
    } else {
        format!("In {} hours", minutes / 60)
    }
}

/// Owns the process-wide settings record and keeps the schedule alarm in step with it.
pub struct SettingsManager {
    settings: Settings,
    store: Arc<dyn KeyValueStore>,
    timers: Arc<dyn TimerService>,
}

impl SettingsManager {
    /// Never fails: unreadable or missing data degrades to defaults.
    pub async fn load(
        store: Arc<dyn KeyValueStore>,
        timers: Arc<dyn TimerService>,
        now: OffsetDateTime,
    ) -> Self {
        let settings = match store.get(SETTINGS_KEY).await {
            Ok(Some(raw)) => Settings::from_stored(&raw),
            Ok(None) => {
                info!("no stored settings, using defaults");
                Settings::default()
            }
            Err(err) => {
                error!("load settings failed, using defaults: {err}");
                Settings::default()
            }
        };

        let mut manager = Self {
            settings,
            store,
            timers,
        };

        if manager.settings.schedule.enabled {
            if let Err(err) = manager.arm(now).await {
                error!("re-arming schedule on load failed: {err}");
                manager.settings.schedule.next_run = None;
            }
            manager.save().await;
        }
        info!(
            "settings loaded (schedule enabled: {}, startup enabled: {})",
            manager.settings.schedule.enabled, manager.settings.startup.enabled
        );
        manager
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Persists the in-memory record. Failures are logged; memory stays authoritative.
    pub async fn save(&self) {
        let raw = match serde_json::to_string(&self.settings) {
            Ok(s) => s,
            Err(err) => {
                error!("serialize settings failed: {err}");
                return;
            }
        };
        if let Err(err) = self.store.set(SETTINGS_KEY, &raw).await {
            error!("save settings failed: {err}");
        }
    }

    async fn arm(&mut self, now: OffsetDateTime) -> Result<()> {
        let interval = self.settings.schedule.interval;
        let next_run = run_after(now, interval)?;
        self.timers
            .create_periodic(SCHEDULE_ALARM, interval, interval)
            .await?;
        self.settings.schedule.next_run = Some(rfc3339(next_run));
        Ok(())
    }

    pub async fn update_schedule(&mut self, update: ScheduleUpdate, now: OffsetDateTime) -> Result<()> {
        if update.interval == Some(0) {
            return Err(CleanerError::InvalidRequest(
                "interval must be a positive number of minutes".into(),
            ));
        }

        let mut schedule = self.settings.schedule.clone();
        if let Some(v) = update.enabled {
            schedule.enabled = v;
        }
        if let Some(v) = update.interval {
            schedule.interval = v;
        }
        if let Some(v) = update.clear_history {
            schedule.clear_history = v;
        }
        if let Some(v) = update.clear_cache {
            schedule.clear_cache = v;
        }
        schedule.last_run = None;
        schedule.next_run = None;

        if schedule.enabled {
            let next_run = run_after(now, schedule.interval)?;
            self.timers
                .create_periodic(SCHEDULE_ALARM, schedule.interval, schedule.interval)
                .await?;
            schedule.next_run = Some(rfc3339(next_run));
            info!("schedule armed: every {} minutes", schedule.interval);
        } else {
            self.timers.cancel(SCHEDULE_ALARM).await?;
            info!("schedule disabled");
        }

        self.settings.schedule = schedule;
        self.save().await;
        Ok(())
    }

    /// Replaces the startup policy wholesale.
    pub async fn update_startup(&mut self, startup: Startup) -> Result<()> {
        self.settings.startup = startup;
        self.save().await;
        Ok(())
    }

    pub async fn record_cleanup(&mut self, removed: Removed, now: OffsetDateTime) {
        let stats = &mut self.settings.stats;
        stats.total_cleared = stats.total_cleared.saturating_add(removed.increment());
        stats.last_cleaned = Some(display_time(now));
        self.save().await;
    }

    /// Bookkeeping after an alarm fire; `next_run` advances even when the run failed.
    pub async fn mark_scheduled_run(&mut self, now: OffsetDateTime, succeeded: bool) {
        let schedule = &mut self.settings.schedule;
        if succeeded {
            schedule.last_run = Some(rfc3339(now));
        }
        schedule.next_run = match run_after(now, schedule.interval) {
            Ok(t) => Some(rfc3339(t)),
            Err(err) => {
                warn!("next run not computed: {err}");
                None
            }
        };
        self.save().await;
    }

    pub fn next_clean_description(&self, now: OffsetDateTime) -> String {
        describe_next_clean(&self.settings.schedule, now)
    }
}
