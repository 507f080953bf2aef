//! Browsing-data cleaner core: settings and schedule management plus the
//! cleanup orchestrator, driven through an action dispatcher.

pub mod cleanup;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod notify;
pub mod platform;
pub mod settings;
pub mod timers;

#[cfg(test)]
mod testing;

pub use cleanup::{normalize_url, CategorySelection, CleanupRequest, CleanupResult, Orchestrator};
pub use dispatch::{Action, Cleaner, Collaborators, Reply};
pub use error::{CleanerError, Result};
pub use settings::{Settings, SettingsManager};
