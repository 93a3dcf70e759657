use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

use super::checker::CheckResult;
use super::status_recorder::StatusRecorder;
use crate::db::enums::MonitorStatus;
use crate::db::models::{MonitorConfig, PushTimestamp};
use crate::db::services::{MonitorStore, StoreError};

/// What an accepted heartbeat was recorded as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushReceipt {
    pub monitor_id: i32,
    pub status: MonitorStatus,
}

/// Interprets the `status` a pusher reports. Anything unrecognised counts as up.
pub fn parse_push_status(raw: Option<&str>) -> MonitorStatus {
    match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
        Some("down") | Some("0") => MonitorStatus::Down,
        _ => MonitorStatus::Up,
    }
}

/// Accepts heartbeats for push monitors.
pub struct PushReceiver {
    store: Arc<dyn MonitorStore>,
    recorder: Arc<StatusRecorder>,
}

impl PushReceiver {
    pub fn new(store: Arc<dyn MonitorStore>, recorder: Arc<StatusRecorder>) -> Self {
        Self { store, recorder }
    }

    /// Stamps the push time and records the reported status. Returns `None`
    /// for an unknown token.
    pub async fn receive_push(
        &self,
        token: &str,
        status: MonitorStatus,
        message: &str,
        latency_ms: Option<u64>,
    ) -> Result<Option<PushReceipt>, StoreError> {
        let Some(mut monitor) = self.store.find_push_monitor(token).await? else {
            warn!(token, "Push received for unknown token.");
            return Ok(None);
        };

        let now = Utc::now();
        self.store.update_push_time(monitor.id, now).await?;
        if let MonitorConfig::Push(config) = &mut monitor.config {
            config.last_push_time = Some(PushTimestamp::from(now));
        }

        let message = if message.trim().is_empty() {
            "Unknown"
        } else {
            message
        };
        let result = match status {
            MonitorStatus::Down => CheckResult::down(message, latency_ms),
            _ => CheckResult::up(message, latency_ms.filter(|ms| *ms > 0)),
        };
        self.recorder.record(&monitor, &result).await?;
        info!(monitor_id = monitor.id, status = %result.status, "Push heartbeat accepted.");

        Ok(Some(PushReceipt {
            monitor_id: monitor.id,
            status: result.status,
        }))
    }
}
