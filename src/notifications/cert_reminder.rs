use chrono::{Local, NaiveDate, NaiveDateTime, Timelike};
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;

use super::service::NotificationDispatcher;
use crate::db::enums::MonitorStatus;
use crate::db::models::Monitor;
use crate::monitors::cert_checker::{CertificateInfo, EXPIRY_WARNING_DAYS};

/// Minutes after the reminder hour during which reminders may go out.
const REMINDER_WINDOW_MINUTES: u32 = 5;

/// Once-a-day certificate expiry reminders, independent of the regular
/// status-change notifications.
pub struct CertReminder {
    dispatcher: Arc<NotificationDispatcher>,
    reminder_hour: u32,
    sent: DashMap<(i32, NaiveDate), HashSet<String>>,
}

impl CertReminder {
    pub fn new(dispatcher: Arc<NotificationDispatcher>, reminder_hour: u32) -> Self {
        Self {
            dispatcher,
            reminder_hour,
            sent: DashMap::new(),
        }
    }

    pub async fn remind(&self, monitor: &Monitor, info: &CertificateInfo) -> bool {
        self.remind_at(monitor, info, Local::now().naive_local()).await
    }

    /// Sends at most one reminder per monitor, day and kind. Returns whether one was sent.
    pub async fn remind_at(&self, monitor: &Monitor, info: &CertificateInfo, now: NaiveDateTime) -> bool {
        let status = info.status();
        if status == MonitorStatus::Up && info.days_remaining > EXPIRY_WARNING_DAYS {
            return false;
        }
        if now.hour() != self.reminder_hour || now.minute() >= REMINDER_WINDOW_MINUTES {
            return false;
        }

        let today = now.date();
        self.sent.retain(|(_, day), _| *day == today);

        let (kind, message) = if status == MonitorStatus::Down {
            (
                "expired".to_string(),
                format!("【严重警告】{} 的SSL证书已过期！请立即处理！", monitor.name),
            )
        } else {
            (
                format!("expiring-{}", info.days_remaining),
                format!(
                    "【证书到期提醒】{} 的SSL证书将在 {} 天后过期，请及时更新证书。",
                    monitor.name, info.days_remaining
                ),
            )
        };

        let key = (monitor.id, today);
        if self
            .sent
            .get(&key)
            .is_some_and(|kinds| kinds.contains(&kind))
        {
            return false;
        }

        self.dispatcher.send_reminder(monitor, status, &message).await;
        self.sent.entry(key).or_default().insert(kind.clone());
        info!(monitor_id = monitor.id, kind = %kind, "Certificate reminder sent.");
        true
    }

    pub fn clear(&self) {
        self.sent.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::services::MemoryStore;
    use crate::notifications::service::tests::{binding, RecordingDelivery};

    async fn reminder() -> (CertReminder, Arc<RecordingDelivery>) {
        let store = Arc::new(MemoryStore::new());
        store.add_binding(binding(1, 10)).await;
        let delivery = Arc::new(RecordingDelivery::default());
        let dispatcher = Arc::new(NotificationDispatcher::with_delivery(
            store.clone(),
            store,
            delivery.clone(),
        ));
        (CertReminder::new(dispatcher, 12), delivery)
    }

    fn at(day: u32, hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, day)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
    }

    fn expiring(days: i64) -> CertificateInfo {
        CertificateInfo {
            valid: true,
            days_remaining: days,
        }
    }

    #[tokio::test]
    async fn test_sent_once_per_day_inside_window() {
        let (reminder, delivery) = reminder().await;
        let monitor = crate::monitors::checker::tests::port_monitor(1);

        assert!(reminder.remind_at(&monitor, &expiring(5), at(1, 12, 0)).await);
        assert!(!reminder.remind_at(&monitor, &expiring(5), at(1, 12, 3)).await);
        assert!(reminder.remind_at(&monitor, &expiring(4), at(2, 12, 1)).await);

        let messages = delivery.messages();
        assert_eq!(messages.len(), 2);
        assert!(messages[0].contains("将在 5 天后过期"));
    }

    #[tokio::test]
    async fn test_outside_window_or_healthy_is_silent() {
        let (reminder, delivery) = reminder().await;
        let monitor = crate::monitors::checker::tests::port_monitor(1);

        assert!(!reminder.remind_at(&monitor, &expiring(5), at(1, 12, 5)).await);
        assert!(!reminder.remind_at(&monitor, &expiring(5), at(1, 11, 59)).await);
        assert!(!reminder.remind_at(&monitor, &expiring(30), at(1, 12, 0)).await);
        assert!(delivery.messages().is_empty());
    }

    #[tokio::test]
    async fn test_expired_uses_its_own_kind() {
        let (reminder, delivery) = reminder().await;
        let monitor = crate::monitors::checker::tests::port_monitor(1);
        let expired = CertificateInfo {
            valid: false,
            days_remaining: -2,
        };

        assert!(reminder.remind_at(&monitor, &expiring(3), at(1, 12, 0)).await);
        assert!(reminder.remind_at(&monitor, &expired, at(1, 12, 1)).await);
        assert!(!reminder.remind_at(&monitor, &expired, at(1, 12, 2)).await);
        assert!(delivery.messages()[1].starts_with("【严重警告】port-1 的SSL证书已过期"));
    }
}
