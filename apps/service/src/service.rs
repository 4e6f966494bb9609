//! Monitor lifecycle operations used by the application layer.
//!
//! Every mutation goes through here so the store and the scheduler never
//! disagree about which monitors are active.

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;

use crate::config::ProbeStrategy;
use crate::database::MonitorStore;
use crate::database::models::{
    CheckRecord, Monitor, MonitorUpdate, NewMonitor, SUMMARY_WINDOW, UptimeSummary,
};
use crate::monitoring::JobScheduler;
use crate::monitoring::validation::{
    validate_check_interval, validate_monitor_target, validate_name, validate_timeout,
};

pub const DEFAULT_CHECK_LIMIT: usize = 100;
pub const MAX_CHECK_LIMIT: usize = 500;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Monitor {0} not found")]
    NotFound(i64),
    #[error("Invalid monitor: {0}")]
    Invalid(String),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

fn invalid(error: anyhow::Error) -> ServiceError {
    ServiceError::Invalid(error.to_string())
}

pub struct MonitorService {
    store: Arc<dyn MonitorStore>,
    scheduler: Arc<JobScheduler>,
    strategy: ProbeStrategy,
    /// Serializes store write + reschedule pairs
    lifecycle: Mutex<()>,
}

impl MonitorService {
    pub fn new(store: Arc<dyn MonitorStore>, scheduler: Arc<JobScheduler>, strategy: ProbeStrategy) -> Self {
        Self {
            store,
            scheduler,
            strategy,
            lifecycle: Mutex::new(()),
        }
    }

    /// Validate, persist with the interval floor applied, and schedule
    pub async fn create_monitor(&self, monitor: NewMonitor) -> Result<Monitor, ServiceError> {
        let monitor = NewMonitor {
            name: monitor.name.trim().to_string(),
            target: monitor.target.trim().to_string(),
            ..monitor
        };
        validate_name(&monitor.name).map_err(invalid)?;
        validate_monitor_target(&monitor.target, self.strategy).map_err(invalid)?;
        validate_timeout(monitor.timeout_seconds).map_err(invalid)?;
        validate_check_interval(monitor.interval_seconds).map_err(invalid)?;

        let _guard = self.lifecycle.lock().await;
        let created = self.store.insert_monitor(&monitor).await?;
        self.scheduler.schedule(&created);

        info!(monitor_id = created.id, owner_id = created.owner_id, "Monitor created");
        Ok(created)
    }

    /// Persist changes, then reschedule (or unschedule when paused)
    pub async fn update_monitor(&self, monitor_id: i64, update: MonitorUpdate) -> Result<Monitor, ServiceError> {
        let update = MonitorUpdate {
            name: update.name.map(|name| name.trim().to_string()),
            target: update.target.map(|target| target.trim().to_string()),
            ..update
        };
        if let Some(name) = &update.name {
            validate_name(name).map_err(invalid)?;
        }
        if let Some(target) = &update.target {
            validate_monitor_target(target, self.strategy).map_err(invalid)?;
        }
        if let Some(timeout) = update.timeout_seconds {
            validate_timeout(timeout).map_err(invalid)?;
        }
        if let Some(interval) = update.interval_seconds {
            validate_check_interval(interval).map_err(invalid)?;
        }

        let _guard = self.lifecycle.lock().await;
        let updated = self
            .store
            .update_monitor(monitor_id, &update)
            .await?
            .ok_or(ServiceError::NotFound(monitor_id))?;
        self.scheduler.schedule(&updated);

        info!(monitor_id, paused = updated.is_paused, "Monitor updated");
        Ok(updated)
    }

    pub async fn set_paused(&self, monitor_id: i64, paused: bool) -> Result<Monitor, ServiceError> {
        self.update_monitor(
            monitor_id,
            MonitorUpdate {
                is_paused: Some(paused),
                ..Default::default()
            },
        )
        .await
    }

    /// Unschedule, purge the check history, then remove the monitor
    pub async fn delete_monitor(&self, monitor_id: i64) -> Result<(), ServiceError> {
        let _guard = self.lifecycle.lock().await;
        if self.store.get_monitor(monitor_id).await?.is_none() {
            return Err(ServiceError::NotFound(monitor_id));
        }

        self.scheduler.unschedule(monitor_id);
        let purged = self.store.delete_checks(monitor_id).await?;
        self.store.delete_monitor(monitor_id).await?;

        info!(monitor_id, purged, "Monitor deleted");
        Ok(())
    }

    pub async fn get_monitor(&self, monitor_id: i64) -> Result<Monitor, ServiceError> {
        self.store
            .get_monitor(monitor_id)
            .await?
            .ok_or(ServiceError::NotFound(monitor_id))
    }

    pub async fn list_monitors(&self, owner_id: Option<i64>) -> Result<Vec<Monitor>, ServiceError> {
        Ok(self.store.list_monitors(owner_id).await?)
    }

    /// Most recent checks first; `limit` defaults to 100 and is kept within 1..=500
    pub async fn list_checks(
        &self,
        monitor_id: i64,
        limit: Option<usize>,
    ) -> Result<Vec<CheckRecord>, ServiceError> {
        let limit = limit.unwrap_or(DEFAULT_CHECK_LIMIT).clamp(1, MAX_CHECK_LIMIT);
        self.get_monitor(monitor_id).await?;
        Ok(self.store.recent_checks(monitor_id, limit).await?)
    }

    /// Rollup over the most recent checks
    pub async fn uptime_summary(&self, monitor_id: i64) -> Result<UptimeSummary, ServiceError> {
        self.get_monitor(monitor_id).await?;
        let records = self.store.recent_checks(monitor_id, SUMMARY_WINDOW).await?;
        Ok(UptimeSummary::from_records(&records))
    }
}
