use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::error::{CleanerError, Result};
use crate::platform::TimerService;

/// Named periodic alarms backed by tokio tasks. A fire sends the alarm name on
/// the channel; the receiver runs the handler, so fires queue behind whatever
/// operation is in flight.
pub struct TokioTimers {
    fired: mpsc::UnboundedSender<String>,
    tasks: Mutex<HashMap<String, JoinHandle<()>>>,
    unit: Duration,
}

impl TokioTimers {
    pub fn new(fired: mpsc::UnboundedSender<String>) -> Self {
        Self::with_unit(fired, Duration::from_secs(60))
    }

    /// `unit` is the length of one "minute"; shortened in tests.
    pub fn with_unit(fired: mpsc::UnboundedSender<String>, unit: Duration) -> Self {
        Self {
            fired,
            tasks: Mutex::new(HashMap::new()),
            unit,
        }
    }
}

#[async_trait]
impl TimerService for TokioTimers {
    async fn create_periodic(
        &self,
        name: &str,
        initial_delay_minutes: u32,
        period_minutes: u32,
    ) -> Result<()> {
        if period_minutes == 0 {
            return Err(CleanerError::InvalidRequest(format!(
                "alarm {name}: period must be positive"
            )));
        }
        let too_long = || CleanerError::InvalidRequest(format!("alarm {name}: delay out of range"));
        let start = self
            .unit
            .checked_mul(initial_delay_minutes)
            .and_then(|delay| Instant::now().checked_add(delay))
            .ok_or_else(too_long)?;
        let period = self.unit.checked_mul(period_minutes).ok_or_else(too_long)?;
        let tx = self.fired.clone();
        let alarm = name.to_string();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(start, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                debug!("alarm {alarm} fired");
                if tx.send(alarm.clone()).is_err() {
                    break;
                }
            }
        });

        if let Some(old) = self.tasks.lock().await.insert(name.to_string(), handle) {
            old.abort();
        }
        info!("alarm {name} armed: first in {initial_delay_minutes} min, every {period_minutes} min");
        Ok(())
    }

    async fn cancel(&self, name: &str) -> Result<()> {
        if let Some(handle) = self.tasks.lock().await.remove(name) {
            handle.abort();
            info!("alarm {name} cancelled");
        }
        Ok(())
    }
}
