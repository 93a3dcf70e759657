//! Wires the collaborators together and owns the background tasks.

use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::info;

use super::config::EngineConfig;
use crate::db::enums::MonitorStatus;
use crate::db::services::{MonitorStore, NotificationRegistry, SettingsStore, StoreError};
use crate::monitors::{
    CheckDispatcher, PushReceipt, PushReceiver, RetentionSweeper, Scheduler, StatusRecorder,
};
use crate::notifications::{CertReminder, NotificationDelivery, NotificationDispatcher};

pub struct MonitorEngine {
    scheduler: Arc<Scheduler>,
    sweeper: Arc<RetentionSweeper>,
    push_receiver: PushReceiver,
    notifier: Arc<NotificationDispatcher>,
    reminder: Arc<CertReminder>,
    sweeper_task: Mutex<Option<JoinHandle<()>>>,
}

impl MonitorEngine {
    /// An engine that delivers notifications through the built-in channel senders.
    pub fn new<S>(store: Arc<S>, config: &EngineConfig) -> Self
    where
        S: MonitorStore + SettingsStore + NotificationRegistry + 'static,
    {
        let notifier = Arc::new(NotificationDispatcher::new(store.clone(), store.clone()));
        Self::assemble(store, notifier, None, config)
    }

    /// An engine with custom checkers and delivery, used by tests.
    pub fn with_parts<S>(
        store: Arc<S>,
        dispatcher: CheckDispatcher,
        delivery: Arc<dyn NotificationDelivery>,
        config: &EngineConfig,
    ) -> Self
    where
        S: MonitorStore + SettingsStore + NotificationRegistry + 'static,
    {
        let notifier = Arc::new(NotificationDispatcher::with_delivery(
            store.clone(),
            store.clone(),
            delivery,
        ));
        Self::assemble(store, notifier, Some(dispatcher), config)
    }

    fn assemble<S>(
        store: Arc<S>,
        notifier: Arc<NotificationDispatcher>,
        dispatcher: Option<CheckDispatcher>,
        config: &EngineConfig,
    ) -> Self
    where
        S: MonitorStore + SettingsStore + NotificationRegistry + 'static,
    {
        let reminder = Arc::new(CertReminder::new(notifier.clone(), config.cert_reminder_hour));
        let dispatcher = dispatcher
            .unwrap_or_else(|| CheckDispatcher::new(store.clone(), Some(reminder.clone())));
        let recorder = Arc::new(StatusRecorder::new(store.clone(), notifier.clone()));
        let scheduler = Arc::new(Scheduler::new(
            store.clone(),
            Arc::new(dispatcher),
            recorder.clone(),
        ));
        let sweeper = Arc::new(RetentionSweeper::new(
            store.clone(),
            store.clone(),
            config.default_retention_days,
            config.cleanup_hour,
        ));

        Self {
            scheduler,
            sweeper,
            push_receiver: PushReceiver::new(store, recorder),
            notifier,
            reminder,
            sweeper_task: Mutex::new(None),
        }
    }

    /// Schedules every active monitor and starts the daily sweeper.
    pub async fn start(&self) -> usize {
        let started = self.scheduler.reset_all_monitors().await;
        let mut task = self.sweeper_task.lock().await;
        if task.is_none() {
            *task = Some(tokio::spawn(self.sweeper.clone().run_daily()));
        }
        info!(monitors = started, "Monitor engine started.");
        started
    }

    pub async fn shutdown(&self) {
        let stopped = self.scheduler.stop_all();
        if let Some(task) = self.sweeper_task.lock().await.take() {
            task.abort();
        }
        self.notifier.clear();
        self.reminder.clear();
        info!(stopped, "Monitor engine stopped.");
    }

    pub async fn schedule_monitor(&self, id: i32) -> bool {
        self.scheduler.schedule_monitor(id).await
    }

    pub fn stop_monitor(&self, id: i32) -> bool {
        self.scheduler.stop_monitor(id)
    }

    pub async fn reset_all_monitors(&self) -> usize {
        self.scheduler.reset_all_monitors().await
    }

    pub async fn trigger_manual_cleanup(&self) -> u64 {
        self.sweeper.trigger_manual_cleanup().await
    }

    pub async fn receive_push(
        &self,
        token: &str,
        status: MonitorStatus,
        message: &str,
        latency_ms: Option<u64>,
    ) -> Result<Option<PushReceipt>, StoreError> {
        self.push_receiver
            .receive_push(token, status, message, latency_ms)
            .await
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn notifier(&self) -> &NotificationDispatcher {
        &self.notifier
    }
}
