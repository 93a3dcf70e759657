use chrono::{DateTime, Duration, Local, NaiveTime, TimeZone, Utc};
use std::sync::Arc;
use tokio::time;
use tracing::{error, info, instrument};

use crate::db::services::settings_service::effective_retention_days;
use crate::db::services::{MonitorStore, SettingsStore, StoreError};

/// Deletes status history older than the retention horizon.
pub struct RetentionSweeper {
    store: Arc<dyn MonitorStore>,
    settings: Arc<dyn SettingsStore>,
    default_days: u32,
    cleanup_hour: u32,
}

impl RetentionSweeper {
    pub fn new(
        store: Arc<dyn MonitorStore>,
        settings: Arc<dyn SettingsStore>,
        default_days: u32,
        cleanup_hour: u32,
    ) -> Self {
        Self {
            store,
            settings,
            default_days,
            cleanup_hour: cleanup_hour.min(23),
        }
    }

    /// Sweeps once a day at `cleanup_hour` local time. Never returns.
    pub async fn run_daily(self: Arc<Self>) {
        info!(cleanup_hour = self.cleanup_hour, "Starting daily retention sweeper.");
        loop {
            let now = Local::now();
            let next = next_run_after(now, self.cleanup_hour);
            let wait = (next - now).to_std().unwrap_or(std::time::Duration::from_secs(60));
            time::sleep(wait).await;

            if let Err(e) = self.cleanup_old_data().await {
                error!(error = %e, "Scheduled retention sweep failed.");
            }
        }
    }

    #[instrument(skip(self))]
    pub async fn cleanup_old_data(&self) -> Result<u64, StoreError> {
        self.cleanup_at(Utc::now()).await
    }

    /// Sweep relative to an explicit `now`.
    pub async fn cleanup_at(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let configured = self.settings.get_retention_days().await?;
        let days = effective_retention_days(configured, self.default_days);
        let cutoff = now - Duration::days(i64::from(days));

        let deleted = self.store.delete_older_than(cutoff).await?;
        info!(retention_days = days, %cutoff, deleted, "Old status records cleaned up.");
        Ok(deleted)
    }

    /// Runs a sweep on demand. Failures are logged and reported as zero rows.
    pub async fn trigger_manual_cleanup(&self) -> u64 {
        match self.cleanup_old_data().await {
            Ok(deleted) => deleted,
            Err(e) => {
                error!(error = %e, "Manual retention sweep failed.");
                0
            }
        }
    }
}

/// The next `hour:00` local time strictly after `now`.
fn next_run_after(now: DateTime<Local>, hour: u32) -> DateTime<Local> {
    let at = NaiveTime::from_hms_opt(hour, 0, 0).unwrap_or(NaiveTime::MIN);
    let mut day = now.date_naive();
    for _ in 0..3 {
        if let Some(candidate) = Local.from_local_datetime(&day.and_time(at)).earliest() {
            if candidate > now {
                return candidate;
            }
        }
        day = day.succ_opt().unwrap_or(day);
    }
    now + Duration::days(1)
}
