//! The uniform checker contract and the dispatcher that routes monitors to it.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::cert_checker::CertChecker;
use super::database_checker::DatabaseChecker;
use super::error::CheckError;
use super::http_checker::HttpChecker;
use super::port_checker::PortChecker;
use super::push_checker::PushChecker;
use crate::db::enums::{MonitorKind, MonitorStatus};
use crate::db::models::Monitor;
use crate::db::services::SettingsStore;
use crate::notifications::cert_reminder::CertReminder;

/// Outcome of one check as handed to the recorder.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckResult {
    pub status: MonitorStatus,
    pub message: String,
    pub latency_ms: Option<u64>,
}

impl CheckResult {
    pub fn up(message: impl Into<String>, latency_ms: Option<u64>) -> Self {
        Self {
            status: MonitorStatus::Up,
            message: message.into(),
            latency_ms,
        }
    }

    pub fn down(message: impl Into<String>, latency_ms: Option<u64>) -> Self {
        Self {
            status: MonitorStatus::Down,
            message: message.into(),
            latency_ms,
        }
    }

    pub fn pending(message: impl Into<String>) -> Self {
        Self {
            status: MonitorStatus::Pending,
            message: message.into(),
            latency_ms: None,
        }
    }

    pub fn from_error(err: CheckError, latency_ms: Option<u64>) -> Self {
        Self::down(err.to_string(), latency_ms)
    }

    pub fn is_down(&self) -> bool {
        self.status == MonitorStatus::Down
    }
}

impl From<Result<CheckResult, CheckError>> for CheckResult {
    fn from(result: Result<CheckResult, CheckError>) -> Self {
        result.unwrap_or_else(|e| CheckResult::from_error(e, None))
    }
}

/// A protocol checker. Implementations convert every failure into a DOWN
/// result instead of returning an error.
#[async_trait]
pub trait Checker: Send + Sync {
    async fn check(&self, monitor: &Monitor) -> CheckResult;
}

/// Routes monitors to their checker, then applies retries and upside-down inversion.
pub struct CheckDispatcher {
    checkers: HashMap<MonitorKind, Arc<dyn Checker>>,
}

impl CheckDispatcher {
    /// A dispatcher with the built-in checker for every monitor type.
    pub fn new(settings: Arc<dyn SettingsStore>, reminder: Option<Arc<CertReminder>>) -> Self {
        let cert = Arc::new(CertChecker::new(reminder));
        let http: Arc<dyn Checker> = Arc::new(HttpChecker::new(settings, Some(cert.clone())));
        let database: Arc<dyn Checker> = Arc::new(DatabaseChecker);

        Self::empty()
            .with_checker(MonitorKind::Http, http.clone())
            .with_checker(MonitorKind::Keyword, http)
            .with_checker(MonitorKind::HttpsCert, cert)
            .with_checker(MonitorKind::Port, Arc::new(PortChecker))
            .with_checker(MonitorKind::Mysql, database.clone())
            .with_checker(MonitorKind::Redis, database)
            .with_checker(MonitorKind::Push, Arc::new(PushChecker))
    }

    pub fn empty() -> Self {
        Self {
            checkers: HashMap::new(),
        }
    }

    /// Registers or replaces the checker for `kind`.
    pub fn with_checker(mut self, kind: MonitorKind, checker: Arc<dyn Checker>) -> Self {
        self.checkers.insert(kind, checker);
        self
    }

    pub async fn dispatch(&self, monitor: &Monitor) -> CheckResult {
        // Invalid or unknown configurations never reach a checker and are not inverted.
        if let Err(e) = monitor.config.validate() {
            return CheckResult::from_error(e, None);
        }
        let checker = match monitor.kind().and_then(|kind| self.checkers.get(&kind)) {
            Some(checker) => checker.clone(),
            None => {
                return CheckResult::from_error(
                    CheckError::UnsupportedType(monitor.type_name()),
                    None,
                );
            }
        };

        let result = self.run_with_retries(checker.as_ref(), monitor).await;
        if monitor.upside_down {
            CheckResult {
                status: result.status.inverted(),
                ..result
            }
        } else {
            result
        }
    }

    async fn run_with_retries(&self, checker: &dyn Checker, monitor: &Monitor) -> CheckResult {
        let first = checker.check(monitor).await;
        if !first.is_down() || monitor.retries == 0 || monitor.is_push() {
            return first;
        }

        let pause = Duration::from_secs(u64::from(monitor.retry_interval.max(1)));
        let mut last = first;
        for attempt in 1..=monitor.retries {
            tokio::time::sleep(pause).await;
            debug!(monitor_id = monitor.id, attempt, "Retrying failed check.");
            let retry = checker.check(monitor).await;
            if retry.status == MonitorStatus::Up {
                return CheckResult {
                    message: format!("重试成功 ({attempt}/{}): {}", monitor.retries, retry.message),
                    ..retry
                };
            }
            last = retry;
        }
        CheckResult {
            message: format!("重试{}次后仍然失败: {}", monitor.retries, last.message),
            ..last
        }
    }
}
