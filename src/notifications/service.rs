use async_trait::async_trait;
use chrono::{DateTime, Duration, Local, Utc};
use dashmap::DashMap;
use futures::future::join_all;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use super::models::{ChannelBinding, ChannelConfig, FailureInfo, NotificationData};
use super::senders::{
    email::EmailSender, telegram::TelegramSender, webhook::WebhookSender, wechat::WechatSender,
    NotificationSender, SenderError,
};
use crate::db::enums::MonitorStatus;
use crate::db::models::{Monitor, MonitorConfig};
use crate::db::services::{MonitorStore, NotificationRegistry, StoreError};

/// Aggregation window used when a monitor has no resend interval.
pub const DEFAULT_RESEND_WINDOW_SECS: i64 = 30 * 60;

#[derive(Error, Debug)]
pub enum NotificationError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Sender error: {0}")]
    Sender(#[from] SenderError),
}

/// Last notification sent for a monitor. Lost on restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotificationState {
    pub last_notified_at: DateTime<Utc>,
    pub last_notified_status: MonitorStatus,
}

/// Delivers one rendered notification to one bound channel.
#[async_trait]
pub trait NotificationDelivery: Send + Sync {
    async fn deliver(
        &self,
        binding: &ChannelBinding,
        data: &NotificationData,
    ) -> Result<(), NotificationError>;
}

/// Routes each binding to the sender for its channel type.
#[derive(Default)]
pub struct ChannelDelivery {
    email: EmailSender,
    telegram: TelegramSender,
    webhook: WebhookSender,
    wechat: WechatSender,
}

#[async_trait]
impl NotificationDelivery for ChannelDelivery {
    async fn deliver(
        &self,
        binding: &ChannelBinding,
        data: &NotificationData,
    ) -> Result<(), NotificationError> {
        let sender: &dyn NotificationSender = match &binding.config {
            ChannelConfig::Email { .. } => &self.email,
            ChannelConfig::Telegram { .. } => &self.telegram,
            ChannelConfig::Webhook { .. } => &self.webhook,
            ChannelConfig::WechatPush { .. } => &self.wechat,
        };
        sender.send(&binding.config, data).await?;
        Ok(())
    }
}

pub(crate) fn format_local(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Decides which status changes reach people and fans them out to channels.
pub struct NotificationDispatcher {
    store: Arc<dyn MonitorStore>,
    registry: Arc<dyn NotificationRegistry>,
    delivery: Arc<dyn NotificationDelivery>,
    cache: DashMap<i32, NotificationState>,
}

impl NotificationDispatcher {
    pub fn new(store: Arc<dyn MonitorStore>, registry: Arc<dyn NotificationRegistry>) -> Self {
        Self::with_delivery(store, registry, Arc::new(ChannelDelivery::default()))
    }

    pub fn with_delivery(
        store: Arc<dyn MonitorStore>,
        registry: Arc<dyn NotificationRegistry>,
        delivery: Arc<dyn NotificationDelivery>,
    ) -> Self {
        Self {
            store,
            registry,
            delivery,
            cache: DashMap::new(),
        }
    }

    pub fn last_notification(&self, monitor_id: i32) -> Option<NotificationState> {
        self.cache.get(&monitor_id).map(|entry| *entry)
    }

    /// Drops all dedup state.
    pub fn clear(&self) {
        self.cache.clear();
    }

    /// Resend window in seconds: push interval for push monitors, resend
    /// interval (minutes) for the rest.
    fn window_secs(monitor: &Monitor) -> i64 {
        match &monitor.config {
            MonitorConfig::Push(config) => config.interval_seconds() as i64,
            _ if monitor.resend_interval > 0 => i64::from(monitor.resend_interval) * 60,
            _ => DEFAULT_RESEND_WINDOW_SECS,
        }
    }

    fn base_data(monitor: &Monitor, status: MonitorStatus, message: &str, now: DateTime<Utc>) -> NotificationData {
        NotificationData {
            monitor_name: monitor.name.clone(),
            monitor_type: monitor.type_name(),
            status,
            status_text: status.display_text().to_string(),
            time: format_local(now),
            message: if message.is_empty() {
                "无详细信息".to_string()
            } else {
                message.to_string()
            },
            failure: None,
        }
    }

    async fn bindings(&self, monitor_id: i32) -> Vec<ChannelBinding> {
        match self.registry.get_enabled_bindings_for_monitor(monitor_id).await {
            Ok(bindings) => bindings,
            Err(e) => {
                error!(monitor_id, error = %e, "Failed to load notification bindings.");
                Vec::new()
            }
        }
    }

    /// Evaluates a status change and notifies bound channels when the rules
    /// allow it. Returns how many channels accepted the notification; errors
    /// are logged, never returned.
    #[instrument(skip(self, monitor, message), fields(monitor_id = monitor.id))]
    pub async fn notify(
        &self,
        monitor: &Monitor,
        new_status: MonitorStatus,
        message: &str,
        previous_hint: Option<MonitorStatus>,
    ) -> usize {
        match self.evaluate(monitor, new_status, message, previous_hint).await {
            Ok(delivered) => delivered,
            Err(e) => {
                error!(error = %e, "Failed to process status change notification.");
                0
            }
        }
    }

    async fn evaluate(
        &self,
        monitor: &Monitor,
        new_status: MonitorStatus,
        message: &str,
        previous_hint: Option<MonitorStatus>,
    ) -> Result<usize, NotificationError> {
        let bindings = self.bindings(monitor.id).await;
        if bindings.is_empty() {
            return Ok(0);
        }

        let history = self.store.recent_records(monitor.id, 2).await?;
        let is_new = history.len() <= 1;
        let real_previous = if history.len() > 1 {
            Some(history[1].status)
        } else {
            previous_hint
        };

        if is_new && new_status == MonitorStatus::Up {
            debug!("Suppressing UP notification for a new monitor.");
            return Ok(0);
        }
        if real_previous == Some(new_status) {
            return Ok(0);
        }

        let now = Utc::now();
        let last = self.last_notification(monitor.id);
        let mut data = Self::base_data(monitor, new_status, message, now);

        match new_status {
            MonitorStatus::Down => {
                let window = Self::window_secs(monitor);
                if let Some(last) = last {
                    if last.last_notified_status == MonitorStatus::Down
                        && (now - last.last_notified_at).num_seconds() < window
                    {
                        debug!(window_secs = window, "DOWN notification suppressed inside resend window.");
                        return Ok(0);
                    }
                }

                let since = now - Duration::seconds(window);
                let count = self
                    .store
                    .count_status_since(monitor.id, MonitorStatus::Down, since)
                    .await?;
                let first = self
                    .store
                    .first_status_since(monitor.id, MonitorStatus::Down, since)
                    .await?;
                let duration_minutes = first
                    .as_ref()
                    .map(|r| (now - r.timestamp).num_minutes())
                    .unwrap_or(0);
                let first_time = first
                    .as_ref()
                    .map(|r| format_local(r.timestamp))
                    .unwrap_or_else(|| "未知".to_string());

                data.message = format!(
                    "在 {} 分钟内失败 {count} 次，首次失败于 {first_time}，持续 {duration_minutes} 分钟\n{}",
                    window / 60,
                    data.message
                );
                data.failure = Some(FailureInfo {
                    count,
                    first_failure_time: first_time,
                    last_failure_time: format_local(now),
                    duration_minutes,
                });
            }
            MonitorStatus::Up if real_previous == Some(MonitorStatus::Down) && !is_new => {
                let outage_minutes = last
                    .filter(|l| l.last_notified_status == MonitorStatus::Down)
                    .map(|l| (now - l.last_notified_at).num_minutes())
                    .unwrap_or(0);
                let duration = if outage_minutes > 0 {
                    format!("故障持续了约 {outage_minutes} 分钟。")
                } else {
                    String::new()
                };
                data.message = format!("监控已恢复正常。{duration}\n{}", data.message);
            }
            _ => {}
        }

        let delivered = self.fan_out(&bindings, &data).await;
        self.cache.insert(
            monitor.id,
            NotificationState {
                last_notified_at: now,
                last_notified_status: new_status,
            },
        );
        info!(status = %new_status, delivered, "Status change notification sent.");
        Ok(delivered)
    }

    /// Sends `message` to every bound channel without applying the transition rules.
    pub async fn send_reminder(&self, monitor: &Monitor, status: MonitorStatus, message: &str) -> usize {
        let bindings = self.bindings(monitor.id).await;
        if bindings.is_empty() {
            return 0;
        }
        let data = Self::base_data(monitor, status, message, Utc::now());
        self.fan_out(&bindings, &data).await
    }

    async fn fan_out(&self, bindings: &[ChannelBinding], data: &NotificationData) -> usize {
        let outcomes = join_all(
            bindings
                .iter()
                .map(|binding| async move { (binding, self.delivery.deliver(binding, data).await) }),
        )
        .await;

        let mut delivered = 0;
        for (binding, outcome) in outcomes {
            match outcome {
                Ok(()) => delivered += 1,
                Err(e) => warn!(
                    monitor_id = binding.monitor_id,
                    channel_id = binding.channel_id,
                    channel = %binding.channel_name,
                    channel_type = binding.config.channel_type(),
                    error = %e,
                    "Failed to deliver notification."
                ),
            }
        }
        delivered
    }
}
