use anyhow::Result;
use chrono::Utc;
use libsql::Connection;

/// Schema version - increment when making schema changes
const SCHEMA_VERSION: i32 = 2;

/// Run database migrations
///
/// Safe to call on every start; already applied versions are skipped.
pub async fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL,
            description TEXT
        )",
        (),
    )
    .await?;

    let current_version = get_current_version(conn).await?;

    if current_version >= SCHEMA_VERSION {
        tracing::info!(version = current_version, "Database schema is up to date");
        return Ok(());
    }

    tracing::info!(from = current_version, to = SCHEMA_VERSION, "Running migrations");

    if current_version < 1 {
        run_migration_v1(conn).await?;
        record_migration(conn, 1, "Monitors and check history").await?;
    }

    if current_version < 2 {
        run_migration_v2(conn).await?;
        record_migration(conn, 2, "Notification preferences").await?;
    }

    tracing::info!(version = SCHEMA_VERSION, "Database migrations completed");
    Ok(())
}

/// Get current schema version from database
async fn get_current_version(conn: &Connection) -> Result<i32> {
    let mut rows = conn
        .query("SELECT MAX(version) FROM schema_migrations", ())
        .await?;

    if let Some(row) = rows.next().await? {
        let version: Option<i32> = row.get(0)?;
        Ok(version.unwrap_or(0))
    } else {
        Ok(0)
    }
}

/// Record that a migration was applied
async fn record_migration(conn: &Connection, version: i32, description: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO schema_migrations (version, applied_at, description) VALUES (?, ?, ?)",
        libsql::params![version, Utc::now().timestamp(), description],
    )
    .await?;

    tracing::info!("Applied migration v{}: {}", version, description);
    Ok(())
}

/// Migration v1: monitors with their cached last observation, plus the
/// append-only check history
async fn run_migration_v1(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS monitors (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            owner_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            target TEXT NOT NULL,
            interval_seconds INTEGER NOT NULL DEFAULT 60 CHECK (interval_seconds >= 30),
            timeout_seconds INTEGER NOT NULL DEFAULT 10,
            is_paused INTEGER NOT NULL DEFAULT 0,
            last_check_at INTEGER,
            last_status_code INTEGER,
            last_is_up INTEGER,
            last_latency_ms REAL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )",
        (),
    )
    .await?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS monitor_checks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            monitor_id INTEGER NOT NULL REFERENCES monitors(id) ON DELETE CASCADE,
            status_code INTEGER,
            is_up INTEGER NOT NULL,
            latency_ms REAL,
            message TEXT NOT NULL DEFAULT '',
            checked_at INTEGER NOT NULL
        )",
        (),
    )
    .await?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_monitors_owner ON monitors(owner_id)",
        (),
    )
    .await?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_monitors_paused ON monitors(is_paused)",
        (),
    )
    .await?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_monitor_checks_recent ON monitor_checks(monitor_id, checked_at DESC)",
        (),
    )
    .await?;

    Ok(())
}

/// Migration v2: per-owner notification destinations
async fn run_migration_v2(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS notification_preferences (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            owner_id INTEGER NOT NULL,
            channel TEXT NOT NULL,
            destination TEXT NOT NULL,
            is_enabled INTEGER NOT NULL DEFAULT 1,
            created_at INTEGER NOT NULL,
            UNIQUE (owner_id, channel, destination)
        )",
        (),
    )
    .await?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_notification_preferences_owner ON notification_preferences(owner_id, channel)",
        (),
    )
    .await?;

    Ok(())
}
