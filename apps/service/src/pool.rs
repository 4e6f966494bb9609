use anyhow::Result;
use deadpool::managed::{self, Pool, RecycleResult};
use libsql::{Builder, Connection, Database, Error as LibsqlError};

/// How long one statement blocks on a locked database before failing.
/// Longer waits are retried asynchronously by the store.
const BUSY_TIMEOUT_MS: u64 = 100;

pub struct LibsqlManager {
    database: Database,
}

impl LibsqlManager {
    pub fn new(database: Database) -> Self {
        Self { database }
    }
}

impl managed::Manager for LibsqlManager {
    type Type = Connection;
    type Error = LibsqlError;

    async fn create(&self) -> Result<Self::Type, Self::Error> {
        let conn = self.database.connect()?;
        // Both pragmas are per connection; stepping the rows executes them.
        conn.query("PRAGMA foreign_keys = ON", ()).await?.next().await?;
        conn.query(&format!("PRAGMA busy_timeout = {BUSY_TIMEOUT_MS}"), ()).await?.next().await?;
        Ok(conn)
    }

    async fn recycle(
        &self,
        conn: &mut Self::Type,
        _: &managed::Metrics,
    ) -> RecycleResult<Self::Error> {
        conn.query("SELECT 1", ())
            .await?
            .next()
            .await?
            .ok_or(LibsqlError::QueryReturnedNoRows)?;
        Ok(())
    }
}

pub type LibsqlPool = Pool<LibsqlManager>;

/// Open (or create) the local database file and wrap it in a pool
pub async fn open_pool(path: &str, max_connections: usize) -> Result<LibsqlPool> {
    let database = Builder::new_local(path).build().await?;
    let pool = Pool::builder(LibsqlManager::new(database))
        .max_size(max_connections.max(1))
        .build()?;
    Ok(pool)
}
