use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use monitor_engine::db::enums::{MonitorKind, MonitorStatus};
use monitor_engine::db::models::{Monitor, MonitorConfig, PortConfig, PortSpec, PushConfig, StatusRecord};
use monitor_engine::db::services::settings_service::SystemSettings;
use monitor_engine::db::services::{MemoryStore, MonitorStore};
use monitor_engine::monitors::{CheckDispatcher, CheckResult, Checker};
use monitor_engine::notifications::models::{ChannelBinding, ChannelConfig, NotificationData};
use monitor_engine::notifications::{NotificationDelivery, NotificationError};
use monitor_engine::server::{EngineConfig, MonitorEngine};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Plays back queued results, then repeats the last one.
struct Script(Mutex<VecDeque<CheckResult>>);

impl Script {
    fn new(results: Vec<CheckResult>) -> Arc<Self> {
        Arc::new(Self(Mutex::new(results.into())))
    }
}

#[async_trait]
impl Checker for Script {
    async fn check(&self, _monitor: &Monitor) -> CheckResult {
        let mut queue = self.0.lock().unwrap();
        if queue.len() > 1 {
            queue.pop_front().unwrap()
        } else {
            queue.front().cloned().unwrap()
        }
    }
}

#[derive(Default)]
struct Outbox(Mutex<Vec<NotificationData>>);

#[async_trait]
impl NotificationDelivery for Outbox {
    async fn deliver(
        &self,
        _binding: &ChannelBinding,
        data: &NotificationData,
    ) -> Result<(), NotificationError> {
        self.0.lock().unwrap().push(data.clone());
        Ok(())
    }
}

fn port_monitor(id: i32, interval: u32) -> Monitor {
    Monitor {
        id,
        name: format!("db-{id}"),
        config: MonitorConfig::Port(PortConfig {
            hostname: "10.0.0.5".into(),
            port: Some(PortSpec::Number(5432)),
        }),
        interval,
        retries: 0,
        retry_interval: 1,
        resend_interval: 0,
        upside_down: false,
        active: true,
        last_status: None,
        last_check_at: None,
        next_check_at: None,
    }
}

fn webhook_binding(monitor_id: i32) -> ChannelBinding {
    ChannelBinding {
        monitor_id,
        channel_id: 1,
        channel_name: "ops".into(),
        enabled: true,
        config: ChannelConfig::Webhook {
            url: "http://127.0.0.1:9/hook".into(),
            headers: None,
            body_template: None,
        },
    }
}

fn engine(store: Arc<MemoryStore>, checker: Arc<dyn Checker>, outbox: Arc<Outbox>) -> MonitorEngine {
    let dispatcher = CheckDispatcher::empty().with_checker(MonitorKind::Port, checker);
    MonitorEngine::with_parts(store, dispatcher, outbox, &EngineConfig::default())
}

async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test(start_paused = true)]
async fn test_one_job_per_monitor_across_reschedules() {
    let store = Arc::new(MemoryStore::new());
    for id in 1..=3 {
        store.insert_monitor(port_monitor(id, 30)).await;
    }
    let engine = engine(
        store.clone(),
        Script::new(vec![CheckResult::up("端口 5432 开放", Some(1))]),
        Arc::new(Outbox::default()),
    );

    assert_eq!(engine.start().await, 3);
    assert!(engine.schedule_monitor(2).await);
    assert!(engine.schedule_monitor(2).await);
    assert!(engine.stop_monitor(3));
    assert!(!engine.stop_monitor(3));
    assert_eq!(engine.scheduler().job_count(), 2);

    store.remove_monitor(1).await;
    assert!(!engine.schedule_monitor(1).await);
    assert_eq!(engine.scheduler().job_count(), 1);

    assert_eq!(engine.reset_all_monitors().await, 2);
    assert_eq!(engine.scheduler().job_count(), 2);

    engine.shutdown().await;
    assert_eq!(engine.scheduler().job_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_down_then_recovery_notifies_twice() {
    let store = Arc::new(MemoryStore::new());
    store.insert_monitor(port_monitor(1, 1)).await;
    store.add_binding(webhook_binding(1)).await;
    let outbox = Arc::new(Outbox::default());
    let engine = engine(
        store.clone(),
        Script::new(vec![
            CheckResult::down("连接被拒绝", None),
            CheckResult::down("连接被拒绝", None),
            CheckResult::up("端口 5432 开放", Some(2)),
        ]),
        outbox.clone(),
    );

    engine.start().await;
    tokio::time::sleep(Duration::from_secs(6)).await;
    settle().await;
    engine.shutdown().await;

    let sent = outbox.0.lock().unwrap().clone();
    assert_eq!(sent.len(), 2, "sent: {sent:?}");
    assert_eq!(sent[0].status, MonitorStatus::Down);
    assert_eq!(sent[1].status, MonitorStatus::Up);
    assert!(sent[1].message.starts_with("监控已恢复正常"));

    let history = store.records_for(1).await;
    assert!(history.len() >= 4);
    assert_eq!(history[0].status, MonitorStatus::Down);
}

#[tokio::test(start_paused = true)]
async fn test_upside_down_records_inverted_status() {
    let store = Arc::new(MemoryStore::new());
    store
        .insert_monitor(Monitor {
            upside_down: true,
            ..port_monitor(1, 60)
        })
        .await;
    let engine = engine(
        store.clone(),
        Script::new(vec![CheckResult::up("端口 5432 开放", Some(1))]),
        Arc::new(Outbox::default()),
    );

    assert!(engine.schedule_monitor(1).await);
    settle().await;
    engine.shutdown().await;

    let history = store.records_for(1).await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, MonitorStatus::Down);
    assert_eq!(
        store.monitor(1).await.unwrap().last_status,
        Some(MonitorStatus::Down)
    );
}

#[tokio::test]
async fn test_push_heartbeat_round_trip() {
    let store = Arc::new(MemoryStore::new());
    store
        .insert_monitor(Monitor {
            config: MonitorConfig::Push(PushConfig {
                token: "cron-nightly".into(),
                last_push_time: None,
                push_interval: Some(3600),
            }),
            ..port_monitor(9, 60)
        })
        .await;
    store.add_binding(webhook_binding(9)).await;
    let outbox = Arc::new(Outbox::default());
    let engine = engine(
        store.clone(),
        Script::new(vec![CheckResult::up("unused", None)]),
        outbox.clone(),
    );

    let receipt = engine
        .receive_push("cron-nightly", MonitorStatus::Down, "backup failed", Some(40))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(receipt.monitor_id, 9);
    assert_eq!(receipt.status, MonitorStatus::Down);
    assert!(engine
        .receive_push("unknown", MonitorStatus::Up, "", None)
        .await
        .unwrap()
        .is_none());

    assert_eq!(store.records_for(9).await[0].message, "backup failed");
    assert_eq!(outbox.0.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_manual_cleanup_respects_retention_setting() {
    let store = Arc::new(MemoryStore::new());
    store
        .set_settings(SystemSettings {
            data_retention_days: Some(7),
            ..Default::default()
        })
        .await;
    let now = Utc::now();
    for days in [1, 6, 8, 40] {
        store
            .append_status_record(StatusRecord::new(
                1,
                MonitorStatus::Up,
                format!("{days}d"),
                None,
                now - ChronoDuration::days(days),
            ))
            .await
            .unwrap();
    }
    let engine = engine(
        store.clone(),
        Script::new(vec![CheckResult::up("ok", None)]),
        Arc::new(Outbox::default()),
    );

    assert_eq!(engine.trigger_manual_cleanup().await, 2);
    let left: Vec<String> = store.records_for(1).await.into_iter().map(|r| r.message).collect();
    assert_eq!(left, vec!["1d", "6d"]);
}
