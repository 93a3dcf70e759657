use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::debug;

use super::checker::CheckResult;
use crate::db::enums::MonitorStatus;
use crate::db::models::{LastCheck, Monitor, StatusRecord};
use crate::db::services::{MonitorStore, StoreError};
use crate::notifications::NotificationDispatcher;

/// Message stored when a fire fails outside any checker.
pub const EXECUTION_FAULT_MESSAGE: &str = "监控任务执行异常";

/// Writes check outcomes to history and forwards status changes to notifications.
pub struct StatusRecorder {
    store: Arc<dyn MonitorStore>,
    notifier: Arc<NotificationDispatcher>,
}

impl StatusRecorder {
    pub fn new(store: Arc<dyn MonitorStore>, notifier: Arc<NotificationDispatcher>) -> Self {
        Self { store, notifier }
    }

    /// Records one fired check. Returns whether a history row was appended.
    pub async fn record(&self, monitor: &Monitor, result: &CheckResult) -> Result<bool, StoreError> {
        let now = Utc::now();
        let append = if monitor.is_push() {
            self.push_changed(monitor, result.status).await?
        } else {
            true
        };

        if append {
            self.store
                .append_status_record(StatusRecord::new(
                    monitor.id,
                    result.status,
                    result.message.clone(),
                    result.latency_ms,
                    now,
                ))
                .await?;
        } else {
            debug!(monitor_id = monitor.id, status = %result.status, "Unchanged push status not appended.");
        }

        self.store
            .update_last_check(
                monitor.id,
                LastCheck {
                    status: result.status,
                    last_check_at: now,
                    next_check_at: now + Duration::seconds(i64::from(monitor.interval.max(1))),
                },
            )
            .await?;

        if append {
            self.notifier
                .notify(monitor, result.status, &result.message, monitor.last_status)
                .await;
        }
        Ok(append)
    }

    /// Push monitors only keep DOWN rows and transitions.
    async fn push_changed(&self, monitor: &Monitor, status: MonitorStatus) -> Result<bool, StoreError> {
        if status == MonitorStatus::Down {
            return Ok(true);
        }
        let latest = self.store.recent_records(monitor.id, 1).await?;
        let prior = latest.first().map(|r| r.status).or(monitor.last_status);
        Ok(prior != Some(status))
    }

    /// Stores a DOWN row for a fire that failed before producing a result.
    ///
    /// The fault counts as a DOWN check: the cached status is refreshed and the
    /// change goes through the same notification rules as any other result.
    pub async fn record_fault(&self, monitor: &Monitor, detail: &str) -> Result<(), StoreError> {
        let message = if detail.is_empty() {
            EXECUTION_FAULT_MESSAGE.to_string()
        } else {
            format!("{EXECUTION_FAULT_MESSAGE}: {detail}")
        };
        let now = Utc::now();
        self.store
            .append_status_record(StatusRecord::new(
                monitor.id,
                MonitorStatus::Down,
                message.clone(),
                None,
                now,
            ))
            .await?;
        self.store
            .update_last_check(
                monitor.id,
                LastCheck {
                    status: MonitorStatus::Down,
                    last_check_at: now,
                    next_check_at: now + Duration::seconds(i64::from(monitor.interval.max(1))),
                },
            )
            .await?;
        self.notifier
            .notify(monitor, MonitorStatus::Down, &message, monitor.last_status)
            .await;
        Ok(())
    }
}
