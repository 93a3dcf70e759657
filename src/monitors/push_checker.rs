use async_trait::async_trait;
use chrono::{DateTime, Local, Utc};

use super::checker::{CheckResult, Checker};
use super::error::CheckError;
use crate::db::models::{Monitor, MonitorConfig, PushConfig};

/// Compares the last heartbeat against the allowed push interval. No I/O.
pub fn check_push(config: &PushConfig, now: DateTime<Utc>) -> CheckResult {
    let Some(stored) = &config.last_push_time else {
        return CheckResult::pending("等待推送");
    };
    let Some(last_push) = stored.to_datetime() else {
        return CheckResult::pending("推送时间格式无效，等待新的推送");
    };

    let elapsed_ms = (now - last_push).num_milliseconds();
    let allowed_ms = config.interval_seconds() as i64 * 1000;
    if elapsed_ms <= allowed_ms {
        let local = last_push.with_timezone(&Local);
        return CheckResult::up(
            format!("最近推送时间: {}", local.format("%Y-%m-%d %H:%M:%S")),
            None,
        );
    }

    CheckResult::down(format!("推送超时: {}", format_overdue(elapsed_ms / 1000)), None)
}

fn format_overdue(total_seconds: i64) -> String {
    let minutes = total_seconds / 60;
    let seconds = total_seconds % 60;
    if minutes > 0 {
        format!("超时 {minutes} 分 {seconds} 秒")
    } else {
        format!("超时 {seconds} 秒")
    }
}

pub struct PushChecker;

#[async_trait]
impl Checker for PushChecker {
    async fn check(&self, monitor: &Monitor) -> CheckResult {
        match &monitor.config {
            MonitorConfig::Push(config) => check_push(config, Utc::now()),
            _ => CheckResult::from_error(CheckError::UnsupportedType(monitor.type_name()), None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::enums::MonitorStatus;
    use crate::db::models::PushTimestamp;
    use chrono::Duration;

    fn config(last: Option<PushTimestamp>, interval: Option<u64>) -> PushConfig {
        PushConfig {
            token: "tok".into(),
            last_push_time: last,
            push_interval: interval,
        }
    }

    #[test]
    fn test_recent_push_is_up() {
        let now = Utc::now();
        let cfg = config(Some((now - Duration::seconds(30)).into()), Some(60));
        let result = check_push(&cfg, now);
        assert_eq!(result.status, MonitorStatus::Up);
        assert!(result.message.starts_with("最近推送时间: "));
        assert_eq!(result.latency_ms, None);
    }

    #[test]
    fn test_overdue_push_is_down_with_minutes_and_seconds() {
        let now = Utc::now();
        let cfg = config(Some((now - Duration::seconds(90)).into()), Some(60));
        let result = check_push(&cfg, now);
        assert_eq!(result.status, MonitorStatus::Down);
        assert_eq!(result.message, "推送超时: 超时 1 分 30 秒");
    }

    #[test]
    fn test_short_overdue_uses_seconds_only() {
        let now = Utc::now();
        let cfg = config(Some(PushTimestamp::Millis((now - Duration::seconds(45)).timestamp_millis())), Some(30));
        assert_eq!(check_push(&cfg, now).message, "推送超时: 超时 45 秒");
    }

    #[test]
    fn test_missing_or_garbage_timestamp_is_pending() {
        let now = Utc::now();
        assert_eq!(check_push(&config(None, None), now).message, "等待推送");

        let garbage = config(Some(PushTimestamp::Text("invalid-date".into())), None);
        let result = check_push(&garbage, now);
        assert_eq!(result.status, MonitorStatus::Pending);
        assert_eq!(result.message, "推送时间格式无效，等待新的推送");
    }

    #[test]
    fn test_default_interval_is_sixty_seconds() {
        let now = Utc::now();
        let cfg = config(Some((now - Duration::seconds(59)).into()), None);
        assert_eq!(check_push(&cfg, now).status, MonitorStatus::Up);
        let cfg = config(Some((now - Duration::seconds(61)).into()), Some(0));
        assert_eq!(check_push(&cfg, now).status, MonitorStatus::Down);
    }
}
