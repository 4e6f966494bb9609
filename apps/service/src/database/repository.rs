use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Row, TransactionBehavior, params};
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::{debug, warn};

use super::models::{
    CheckRecord, Monitor, MonitorUpdate, NewMonitor, NotificationChannel, NotificationPreference,
    RecordedState, clamp_interval,
};
use crate::monitoring::types::CheckOutcome;
use crate::pool::{LibsqlManager, LibsqlPool};

const MONITOR_COLUMNS: &str = "id, owner_id, name, target, interval_seconds, timeout_seconds, is_paused, \
     last_check_at, last_status_code, last_is_up, last_latency_ms, created_at, updated_at";

const CHECK_COLUMNS: &str = "id, monitor_id, status_code, is_up, latency_ms, message, checked_at";

/// Upper bound on retrying a write while another connection holds the lock
const LOCK_WAIT: Duration = Duration::from_secs(5);
const LOCK_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Persistence operations the monitoring engine and service rely on
#[async_trait]
pub trait MonitorStore: Send + Sync {
    /// Get a monitor by id
    async fn get_monitor(&self, monitor_id: i64) -> Result<Option<Monitor>>;

    /// Get all monitors that are not paused
    async fn get_active_monitors(&self) -> Result<Vec<Monitor>>;

    /// List monitors, optionally restricted to one owner
    async fn list_monitors(&self, owner_id: Option<i64>) -> Result<Vec<Monitor>>;

    /// Insert a monitor, clamping its interval
    async fn insert_monitor(&self, monitor: &NewMonitor) -> Result<Monitor>;

    /// Apply a configuration update; `None` if the monitor does not exist.
    /// Cached observation fields are left untouched.
    async fn update_monitor(&self, monitor_id: i64, update: &MonitorUpdate) -> Result<Option<Monitor>>;

    /// Delete a monitor together with its check history
    async fn delete_monitor(&self, monitor_id: i64) -> Result<bool>;

    /// Delete every check record of a monitor
    async fn delete_checks(&self, monitor_id: i64) -> Result<u64>;

    /// Append a check record and refresh the monitor's cached observation
    /// atomically. Returns `None` (and writes nothing) if the monitor is gone.
    async fn record_check(
        &self,
        monitor_id: i64,
        outcome: &CheckOutcome,
        observed_at: DateTime<Utc>,
    ) -> Result<Option<RecordedState>>;

    /// Most recent checks first
    async fn recent_checks(&self, monitor_id: i64, limit: usize) -> Result<Vec<CheckRecord>>;

    /// Save a notification preference, returning its id
    async fn save_notification_preference(&self, preference: &NotificationPreference) -> Result<i64>;

    /// Enabled destinations of an owner for one channel
    async fn notification_destinations(
        &self,
        owner_id: i64,
        channel: NotificationChannel,
    ) -> Result<Vec<String>>;
}

/// LibSQL store implementation
pub struct LibsqlStore {
    pool: LibsqlPool,
}

impl LibsqlStore {
    /// Create a new store from a pool
    pub fn new_from_pool(pool: LibsqlPool) -> Self {
        Self { pool }
    }

    /// Get a connection from the pool
    async fn get_conn(&self) -> Result<deadpool::managed::Object<LibsqlManager>> {
        Ok(self.pool.get().await?)
    }
}

/// Run a write, retrying while the database is locked by another connection.
///
/// Each attempt blocks for at most the pool's busy timeout; the waits between
/// attempts are async and cancellable.
async fn retry_locked<T, F, Fut>(mut write: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let deadline = Instant::now() + LOCK_WAIT;
    let mut attempts = 1u32;
    loop {
        match write().await {
            Err(e) if is_locked(&e) && Instant::now() < deadline => {
                debug!(attempts, "Database locked; retrying write");
                attempts += 1;
                sleep(LOCK_RETRY_DELAY).await;
            }
            result => return result,
        }
    }
}

fn is_locked(error: &anyhow::Error) -> bool {
    error.chain().any(|cause| {
        let text = cause.to_string();
        text.contains("database is locked") || text.contains("SQLITE_BUSY")
    })
}

fn monitor_from_row(row: &Row) -> Result<Monitor> {
    Ok(Monitor {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        name: row.get(2)?,
        target: row.get(3)?,
        interval_seconds: row.get::<i64>(4)? as u64,
        timeout_seconds: row.get::<i64>(5)? as u64,
        is_paused: row.get::<i64>(6)? != 0,
        last_check_at: row.get::<Option<i64>>(7)?.map(Monitor::i64_to_timestamp),
        last_status_code: row.get::<Option<i64>>(8)?.map(|v| v as u16),
        last_is_up: row.get::<Option<i64>>(9)?.map(|v| v != 0),
        last_latency_ms: row.get::<Option<f64>>(10)?,
        created_at: Monitor::i64_to_timestamp(row.get(11)?),
        updated_at: Monitor::i64_to_timestamp(row.get(12)?),
    })
}

fn check_from_row(row: &Row) -> Result<CheckRecord> {
    Ok(CheckRecord {
        id: row.get(0)?,
        monitor_id: row.get(1)?,
        status_code: row.get::<Option<i64>>(2)?.map(|v| v as u16),
        is_up: row.get::<i64>(3)? != 0,
        latency_ms: row.get::<Option<f64>>(4)?,
        message: row.get::<Option<String>>(5)?.unwrap_or_default(),
        checked_at: Monitor::i64_to_timestamp(row.get(6)?),
    })
}

async fn fetch_monitor(conn: &Connection, monitor_id: i64) -> Result<Option<Monitor>> {
    let mut stmt = conn
        .prepare(&format!("SELECT {MONITOR_COLUMNS} FROM monitors WHERE id = ?"))
        .await?;
    let mut rows = stmt.query(params![monitor_id]).await?;

    match rows.next().await? {
        Some(row) => Ok(Some(monitor_from_row(&row)?)),
        None => Ok(None),
    }
}

/// Body of [`MonitorStore::record_check`], run inside the caller's transaction
async fn apply_check(
    conn: &Connection,
    monitor_id: i64,
    outcome: &CheckOutcome,
    observed_at: DateTime<Utc>,
) -> Result<Option<RecordedState>> {
    let previous = {
        let mut rows = conn
            .query("SELECT last_is_up FROM monitors WHERE id = ?", params![monitor_id])
            .await?;
        let Some(row) = rows.next().await? else {
            return Ok(None);
        };
        row.get::<Option<i64>>(0)?.map(|v| v != 0)
    };

    let checked_at = Monitor::timestamp_to_i64(observed_at);
    let status_code = outcome.status_code.map(i64::from);
    let is_up = if outcome.success { 1 } else { 0 };

    conn.execute(
        "INSERT INTO monitor_checks (monitor_id, status_code, is_up, latency_ms, message, checked_at) VALUES (?, ?, ?, ?, ?, ?)",
        params![
            monitor_id,
            status_code,
            is_up,
            outcome.latency_ms,
            outcome.message.clone(),
            checked_at
        ],
    )
    .await?;

    conn.execute(
        "UPDATE monitors SET last_check_at = ?, last_status_code = ?, last_is_up = ?, last_latency_ms = ? WHERE id = ?",
        params![checked_at, status_code, is_up, outcome.latency_ms, monitor_id],
    )
    .await?;

    Ok(Some(RecordedState {
        previous,
        current: outcome.success,
    }))
}

#[async_trait]
impl MonitorStore for LibsqlStore {
    async fn get_monitor(&self, monitor_id: i64) -> Result<Option<Monitor>> {
        let conn = self.get_conn().await?;
        fetch_monitor(&conn, monitor_id).await
    }

    async fn get_active_monitors(&self) -> Result<Vec<Monitor>> {
        let conn = self.get_conn().await?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {MONITOR_COLUMNS} FROM monitors WHERE is_paused = 0 ORDER BY id"
            ))
            .await?;

        let mut rows = stmt.query(()).await?;
        let mut monitors = Vec::new();
        while let Some(row) = rows.next().await? {
            monitors.push(monitor_from_row(&row)?);
        }

        Ok(monitors)
    }

    async fn list_monitors(&self, owner_id: Option<i64>) -> Result<Vec<Monitor>> {
        let conn = self.get_conn().await?;
        let mut rows = match owner_id {
            Some(owner_id) => {
                let mut stmt = conn
                    .prepare(&format!(
                        "SELECT {MONITOR_COLUMNS} FROM monitors WHERE owner_id = ? ORDER BY created_at DESC, id DESC"
                    ))
                    .await?;
                stmt.query(params![owner_id]).await?
            }
            None => {
                let mut stmt = conn
                    .prepare(&format!(
                        "SELECT {MONITOR_COLUMNS} FROM monitors ORDER BY created_at DESC, id DESC"
                    ))
                    .await?;
                stmt.query(()).await?
            }
        };

        let mut monitors = Vec::new();
        while let Some(row) = rows.next().await? {
            monitors.push(monitor_from_row(&row)?);
        }

        Ok(monitors)
    }

    async fn insert_monitor(&self, monitor: &NewMonitor) -> Result<Monitor> {
        let conn = self.get_conn().await?;
        let conn: &Connection = &conn;
        let now = Monitor::timestamp_to_i64(Utc::now());

        retry_locked(move || async move {
            Ok::<_, anyhow::Error>(conn
                .execute(
                    "INSERT INTO monitors (owner_id, name, target, interval_seconds, timeout_seconds, is_paused, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                    params![
                        monitor.owner_id,
                        monitor.name.clone(),
                        monitor.target.clone(),
                        clamp_interval(monitor.interval_seconds) as i64,
                        monitor.timeout_seconds as i64,
                        if monitor.is_paused { 1 } else { 0 },
                        now,
                        now
                    ],
                )
                .await?)
        })
        .await?;

        let id = conn.last_insert_rowid();
        fetch_monitor(conn, id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("monitor {id} vanished right after insert"))
    }

    async fn update_monitor(&self, monitor_id: i64, update: &MonitorUpdate) -> Result<Option<Monitor>> {
        let conn = self.get_conn().await?;
        let conn: &Connection = &conn;
        let Some(mut monitor) = fetch_monitor(conn, monitor_id).await? else {
            return Ok(None);
        };
        update.apply_to(&mut monitor);
        monitor.updated_at = Utc::now();

        let monitor = &monitor;
        let changed = retry_locked(move || async move {
            Ok::<_, anyhow::Error>(conn
                .execute(
                    "UPDATE monitors SET name = ?, target = ?, interval_seconds = ?, timeout_seconds = ?, is_paused = ?, updated_at = ? WHERE id = ?",
                    params![
                        monitor.name.clone(),
                        monitor.target.clone(),
                        clamp_interval(monitor.interval_seconds) as i64,
                        monitor.timeout_seconds as i64,
                        if monitor.is_paused { 1 } else { 0 },
                        Monitor::timestamp_to_i64(monitor.updated_at),
                        monitor_id
                    ],
                )
                .await?)
        })
        .await?;

        if changed == 0 {
            return Ok(None);
        }
        // Re-read so the returned cache fields reflect any check that raced us.
        fetch_monitor(conn, monitor_id).await
    }

    async fn delete_monitor(&self, monitor_id: i64) -> Result<bool> {
        let conn = self.get_conn().await?;
        let conn: &Connection = &conn;

        retry_locked(move || async move {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate).await?;
            tx.execute(
                "DELETE FROM monitor_checks WHERE monitor_id = ?",
                params![monitor_id],
            )
            .await?;
            let deleted = tx
                .execute("DELETE FROM monitors WHERE id = ?", params![monitor_id])
                .await?;

            tx.commit().await?;
            Ok::<_, anyhow::Error>(deleted > 0)
        })
        .await
    }

    async fn delete_checks(&self, monitor_id: i64) -> Result<u64> {
        let conn = self.get_conn().await?;
        let conn: &Connection = &conn;

        retry_locked(move || async move {
            Ok::<_, anyhow::Error>(conn
                .execute(
                    "DELETE FROM monitor_checks WHERE monitor_id = ?",
                    params![monitor_id],
                )
                .await?)
        })
        .await
    }

    async fn record_check(
        &self,
        monitor_id: i64,
        outcome: &CheckOutcome,
        observed_at: DateTime<Utc>,
    ) -> Result<Option<RecordedState>> {
        let conn = self.get_conn().await?;
        let conn: &Connection = &conn;

        // Only BEGIN can hit the lock; once the transaction is open the
        // remaining statements run without waiting.
        retry_locked(move || async move {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate).await?;

            match apply_check(&tx, monitor_id, outcome, observed_at).await {
                Ok(state) => {
                    tx.commit().await?;
                    Ok(state)
                }
                Err(e) => {
                    if let Err(rollback_error) = tx.rollback().await {
                        warn!(monitor_id, error = %rollback_error, "Rollback of check record failed");
                    }
                    Err(e)
                }
            }
        })
        .await
    }

    async fn recent_checks(&self, monitor_id: i64, limit: usize) -> Result<Vec<CheckRecord>> {
        let conn = self.get_conn().await?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {CHECK_COLUMNS} FROM monitor_checks WHERE monitor_id = ? ORDER BY checked_at DESC, id DESC LIMIT ?"
            ))
            .await?;

        let mut rows = stmt.query(params![monitor_id, limit as i64]).await?;
        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            records.push(check_from_row(&row)?);
        }

        Ok(records)
    }

    async fn save_notification_preference(&self, preference: &NotificationPreference) -> Result<i64> {
        let conn = self.get_conn().await?;
        let conn: &Connection = &conn;
        let enabled = if preference.is_enabled { 1 } else { 0 };

        if let Some(id) = preference.id {
            retry_locked(move || async move {
                Ok::<_, anyhow::Error>(conn
                    .execute(
                        "UPDATE notification_preferences SET channel = ?, destination = ?, is_enabled = ? WHERE id = ?",
                        params![
                            preference.channel.as_str(),
                            preference.destination.clone(),
                            enabled,
                            id
                        ],
                    )
                    .await?)
            })
            .await?;
            return Ok(id);
        }

        let created_at = Monitor::timestamp_to_i64(Utc::now());
        retry_locked(move || async move {
            Ok::<_, anyhow::Error>(conn
                .execute(
                    "INSERT INTO notification_preferences (owner_id, channel, destination, is_enabled, created_at) VALUES (?, ?, ?, ?, ?)
                     ON CONFLICT (owner_id, channel, destination) DO UPDATE SET is_enabled = excluded.is_enabled",
                    params![
                        preference.owner_id,
                        preference.channel.as_str(),
                        preference.destination.clone(),
                        enabled,
                        created_at
                    ],
                )
                .await?)
        })
        .await?;

        let mut rows = conn
            .query(
                "SELECT id FROM notification_preferences WHERE owner_id = ? AND channel = ? AND destination = ?",
                params![
                    preference.owner_id,
                    preference.channel.as_str(),
                    preference.destination.clone()
                ],
            )
            .await?;
        let row = rows
            .next()
            .await?
            .ok_or_else(|| anyhow::anyhow!("notification preference missing after save"))?;
        Ok(row.get(0)?)
    }

    async fn notification_destinations(
        &self,
        owner_id: i64,
        channel: NotificationChannel,
    ) -> Result<Vec<String>> {
        let conn = self.get_conn().await?;
        let mut stmt = conn
            .prepare(
                "SELECT destination FROM notification_preferences WHERE owner_id = ? AND channel = ? AND is_enabled = 1 ORDER BY id",
            )
            .await?;

        let mut rows = stmt.query(params![owner_id, channel.as_str()]).await?;
        let mut destinations = Vec::new();
        while let Some(row) = rows.next().await? {
            let destination: String = row.get(0)?;
            if !destination.trim().is_empty() {
                destinations.push(destination);
            }
        }

        Ok(destinations)
    }
}
