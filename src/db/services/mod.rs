//! Collaborator interfaces the monitoring core consumes.
//!
//! Persistence is owned elsewhere; the engine only relies on the narrow CRUD
//! and range queries declared here. `MemoryStore` is the bundled implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::db::enums::MonitorStatus;
use crate::db::models::{LastCheck, Monitor, StatusRecord};
use crate::notifications::models::ChannelBinding;

pub mod memory_store;
pub mod settings_service;

pub use memory_store::MemoryStore;
pub use settings_service::ProxySettings;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Monitor not found: {0}")]
    MonitorNotFound(i32),
    #[error("Store unavailable: {0}")]
    Unavailable(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[async_trait]
pub trait MonitorStore: Send + Sync {
    async fn get_by_id(&self, id: i32) -> Result<Option<Monitor>, StoreError>;

    async fn get_all_active(&self) -> Result<Vec<Monitor>, StoreError>;

    async fn update_last_check(&self, id: i32, last: LastCheck) -> Result<(), StoreError>;

    async fn set_next_check_at(&self, id: i32, at: DateTime<Utc>) -> Result<(), StoreError>;

    async fn append_status_record(&self, record: StatusRecord) -> Result<(), StoreError>;

    /// Newest first.
    async fn recent_records(&self, id: i32, limit: usize) -> Result<Vec<StatusRecord>, StoreError>;

    async fn count_status_since(
        &self,
        id: i32,
        status: MonitorStatus,
        since: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    /// Oldest record with `status` at or after `since`.
    async fn first_status_since(
        &self,
        id: i32,
        status: MonitorStatus,
        since: DateTime<Utc>,
    ) -> Result<Option<StatusRecord>, StoreError>;

    /// Deletes records with `timestamp < cutoff`, returning how many were removed.
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;

    async fn find_push_monitor(&self, token: &str) -> Result<Option<Monitor>, StoreError>;

    async fn update_push_time(&self, id: i32, at: DateTime<Utc>) -> Result<(), StoreError>;
}

#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn get_all_proxy_settings(&self) -> Result<ProxySettings, StoreError>;

    /// `None` when the operator never set a retention horizon.
    async fn get_retention_days(&self) -> Result<Option<u32>, StoreError>;
}

#[async_trait]
pub trait NotificationRegistry: Send + Sync {
    async fn get_enabled_bindings_for_monitor(
        &self,
        monitor_id: i32,
    ) -> Result<Vec<ChannelBinding>, StoreError>;
}
