//! Database abstraction layer
//!
//! The engine only talks to [`MonitorStore`]; [`LibsqlStore`] backs it with a
//! pooled local libsql database.

pub mod migrations;
pub mod models;
pub mod repository;

pub use repository::{LibsqlStore, MonitorStore};

use anyhow::Result;

use crate::pool::LibsqlPool;

/// Initialize database with schema
pub async fn initialize_database(conn: &libsql::Connection) -> Result<()> {
    migrations::run_migrations(conn).await
}

/// Open the pool, migrate, and wrap it in a store
pub async fn open_store(path: &str, max_connections: usize) -> Result<LibsqlStore> {
    let pool: LibsqlPool = crate::pool::open_pool(path, max_connections).await?;
    let conn = pool.get().await?;
    initialize_database(&conn).await?;
    drop(conn);
    Ok(LibsqlStore::new_from_pool(pool))
}
