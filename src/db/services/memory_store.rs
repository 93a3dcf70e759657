use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

use super::settings_service::{ProxySettings, SystemSettings};
use super::{MonitorStore, NotificationRegistry, SettingsStore, StoreError};
use crate::db::enums::MonitorStatus;
use crate::db::models::{LastCheck, Monitor, MonitorConfig, PushTimestamp, StatusRecord};
use crate::notifications::models::ChannelBinding;

#[derive(Default)]
struct MemoryState {
    monitors: BTreeMap<i32, Monitor>,
    records: Vec<StatusRecord>,
    bindings: Vec<ChannelBinding>,
    settings: SystemSettings,
}

/// Process-local store implementing every collaborator trait.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
    fail_reads: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_monitor(&self, monitor: Monitor) {
        self.state.write().await.monitors.insert(monitor.id, monitor);
    }

    /// Removes a monitor and cascades to its history and bindings.
    pub async fn remove_monitor(&self, id: i32) -> Option<Monitor> {
        let mut state = self.state.write().await;
        state.records.retain(|r| r.monitor_id != id);
        state.bindings.retain(|b| b.monitor_id != id);
        state.monitors.remove(&id)
    }

    pub async fn monitor(&self, id: i32) -> Option<Monitor> {
        self.state.read().await.monitors.get(&id).cloned()
    }

    pub async fn add_binding(&self, binding: ChannelBinding) {
        self.state.write().await.bindings.push(binding);
    }

    pub async fn set_settings(&self, settings: SystemSettings) {
        self.state.write().await.settings = settings;
    }

    /// History of one monitor, oldest first.
    pub async fn records_for(&self, id: i32) -> Vec<StatusRecord> {
        self.state
            .read()
            .await
            .records
            .iter()
            .filter(|r| r.monitor_id == id)
            .cloned()
            .collect()
    }

    /// Makes monitor lookups fail until reset, to simulate an unavailable backend.
    pub fn set_read_failure(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    fn check_reads(&self) -> Result<(), StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("monitor reads are failing".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl MonitorStore for MemoryStore {
    async fn get_by_id(&self, id: i32) -> Result<Option<Monitor>, StoreError> {
        self.check_reads()?;
        Ok(self.state.read().await.monitors.get(&id).cloned())
    }

    async fn get_all_active(&self) -> Result<Vec<Monitor>, StoreError> {
        self.check_reads()?;
        Ok(self
            .state
            .read()
            .await
            .monitors
            .values()
            .filter(|m| m.active)
            .cloned()
            .collect())
    }

    async fn update_last_check(&self, id: i32, last: LastCheck) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let monitor = state
            .monitors
            .get_mut(&id)
            .ok_or(StoreError::MonitorNotFound(id))?;
        monitor.last_status = Some(last.status);
        monitor.last_check_at = Some(last.last_check_at);
        monitor.next_check_at = Some(last.next_check_at);
        Ok(())
    }

    async fn set_next_check_at(&self, id: i32, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let monitor = state
            .monitors
            .get_mut(&id)
            .ok_or(StoreError::MonitorNotFound(id))?;
        monitor.next_check_at = Some(at);
        Ok(())
    }

    async fn append_status_record(&self, record: StatusRecord) -> Result<(), StoreError> {
        self.state.write().await.records.push(record);
        Ok(())
    }

    async fn recent_records(&self, id: i32, limit: usize) -> Result<Vec<StatusRecord>, StoreError> {
        let state = self.state.read().await;
        let mut records: Vec<StatusRecord> = state
            .records
            .iter()
            .filter(|r| r.monitor_id == id)
            .cloned()
            .collect();
        // Stable sort keeps insertion order for equal timestamps; reverse makes newest first.
        records.sort_by_key(|r| r.timestamp);
        records.reverse();
        records.truncate(limit);
        Ok(records)
    }

    async fn count_status_since(
        &self,
        id: i32,
        status: MonitorStatus,
        since: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .records
            .iter()
            .filter(|r| r.monitor_id == id && r.status == status && r.timestamp >= since)
            .count() as u64)
    }

    async fn first_status_since(
        &self,
        id: i32,
        status: MonitorStatus,
        since: DateTime<Utc>,
    ) -> Result<Option<StatusRecord>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .records
            .iter()
            .filter(|r| r.monitor_id == id && r.status == status && r.timestamp >= since)
            .min_by_key(|r| r.timestamp)
            .cloned())
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut state = self.state.write().await;
        let before = state.records.len();
        state.records.retain(|r| r.timestamp >= cutoff);
        Ok((before - state.records.len()) as u64)
    }

    async fn find_push_monitor(&self, token: &str) -> Result<Option<Monitor>, StoreError> {
        self.check_reads()?;
        let state = self.state.read().await;
        Ok(state
            .monitors
            .values()
            .find(|m| matches!(&m.config, MonitorConfig::Push(c) if c.token == token))
            .cloned())
    }

    async fn update_push_time(&self, id: i32, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let monitor = state
            .monitors
            .get_mut(&id)
            .ok_or(StoreError::MonitorNotFound(id))?;
        if let MonitorConfig::Push(config) = &mut monitor.config {
            config.last_push_time = Some(PushTimestamp::from(at));
        }
        Ok(())
    }
}

#[async_trait]
impl SettingsStore for MemoryStore {
    async fn get_all_proxy_settings(&self) -> Result<ProxySettings, StoreError> {
        Ok(self.state.read().await.settings.proxy.clone())
    }

    async fn get_retention_days(&self) -> Result<Option<u32>, StoreError> {
        Ok(self.state.read().await.settings.data_retention_days)
    }
}

#[async_trait]
impl NotificationRegistry for MemoryStore {
    async fn get_enabled_bindings_for_monitor(
        &self,
        monitor_id: i32,
    ) -> Result<Vec<ChannelBinding>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .bindings
            .iter()
            .filter(|b| b.monitor_id == monitor_id && b.enabled)
            .cloned()
            .collect())
    }
}
