//! # SQLite Store
//!
//! Connection pool setup and the SQLite-backed [`DataStore`].
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      SQLite-backed DataStore                            │
//! │                                                                         │
//! │  DbConfig::new(path) ← Configure pool settings                         │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  Database::new(config).await ← Create pool + run migrations            │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────┐                           │
//! │  │            SqlitePool                    │                           │
//! │  │  ┌─────┐ ┌─────┐ ┌─────┐ ┌─────┐       │                           │
//! │  │  │Conn1│ │Conn2│ │Conn3│ │Conn4│ ...   │  (max_connections)        │
//! │  │  └─────┘ └─────┘ └─────┘ └─────┘       │                           │
//! │  └─────────────────────────────────────────┘                           │
//! │       │                                                                 │
//! │       ├── read()  → BEGIN (deferred)   one WAL snapshot per tx         │
//! │       └── write() → write lock + BEGIN  one writer at a time           │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## WAL Mode
//! With WAL journaling a read transaction keeps seeing the snapshot taken at
//! its first read while writers commit underneath it. That is what lets a
//! synchronization run fetch a whole table from one point in time.
//!
//! Writes are serialized in-process before `BEGIN`, so a write transaction
//! that reads first never has its snapshot invalidated by a sibling writer.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use mapcache_core::selector::Selector;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::{Sqlite, SqlitePool, Transaction};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};

use crate::error::{DbError, DbResult};
use crate::migrations;
use crate::store::{DataStore, ReadTransaction, StoreFuture, WriteTransaction};

// =============================================================================
// Configuration
// =============================================================================

/// Database configuration.
///
/// ## Example
/// ```rust,ignore
/// let config = DbConfig::new("/var/lib/mapcache/mapcache.db")
///     .max_connections(8)
///     .min_connections(1);
/// ```
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Path to the SQLite database file, or `:memory:`.
    pub database_path: PathBuf,

    /// Maximum number of connections in the pool.
    /// Default: 5 (one per worker plus the scheduler is plenty)
    pub max_connections: u32,

    /// Minimum number of connections to keep alive.
    /// Default: 1
    pub min_connections: u32,

    /// Connection acquire timeout.
    /// Default: 30 seconds
    pub connect_timeout: Duration,

    /// Idle timeout before closing a connection. `None` keeps them forever.
    /// Default: 10 minutes
    pub idle_timeout: Option<Duration>,

    /// Maximum lifetime of a pooled connection. `None` keeps them forever.
    /// Default: 30 minutes
    pub max_lifetime: Option<Duration>,

    /// Whether to run migrations on connect.
    /// Default: true
    pub run_migrations: bool,
}

impl DbConfig {
    /// Creates a new database configuration with the given path.
    ///
    /// ## Arguments
    /// * `path` - Path to the SQLite database file. Created if missing.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        DbConfig {
            database_path: path.into(),
            max_connections: 5,
            min_connections: 1,
            connect_timeout: Duration::from_secs(30),
            idle_timeout: Some(Duration::from_secs(600)),
            max_lifetime: Some(Duration::from_secs(1800)),
            run_migrations: true,
        }
    }

    /// Sets the maximum number of connections.
    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// Sets the minimum number of connections.
    pub fn min_connections(mut self, min: u32) -> Self {
        self.min_connections = min;
        self
    }

    /// Creates an in-memory database configuration.
    ///
    /// The store lives exactly as long as its single connection, so that
    /// connection is never reaped.
    pub fn in_memory() -> Self {
        DbConfig {
            database_path: PathBuf::from(":memory:"),
            max_connections: 1,
            min_connections: 1,
            connect_timeout: Duration::from_secs(5),
            idle_timeout: None,
            max_lifetime: None,
            run_migrations: true,
        }
    }

    /// Returns true if this configuration describes an in-memory store.
    pub fn is_in_memory(&self) -> bool {
        self.database_path.as_os_str() == ":memory:"
    }
}

// =============================================================================
// Database
// =============================================================================

/// SQLite-backed store handle.
///
/// Cloning is cheap: clones share the pool and the write lock.
#[derive(Debug, Clone)]
pub struct Database {
    /// The SQLite connection pool.
    pool: SqlitePool,

    /// Serializes write transactions.
    write_lock: Arc<Mutex<()>>,
}

impl Database {
    /// Creates a new database connection pool.
    ///
    /// ## What This Does
    /// 1. Creates the database file if it doesn't exist
    /// 2. Enables WAL journaling with NORMAL synchronous
    /// 3. Creates the connection pool
    /// 4. Runs migrations (if enabled)
    ///
    /// ## Returns
    /// * `Ok(Database)` - Ready-to-use store
    /// * `Err(DbError)` - Connection or migration failed
    pub async fn new(config: DbConfig) -> DbResult<Self> {
        info!(
            path = %config.database_path.display(),
            "Initializing database connection"
        );

        let connect_url = format!("sqlite://{}?mode=rwc", config.database_path.display());

        let connect_options = SqliteConnectOptions::from_str(&connect_url)
            .map_err(|e| DbError::ConnectionFailed(e.to_string()))?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .create_if_missing(true);

        debug!("Connection options configured");

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connect_timeout)
            .idle_timeout(config.idle_timeout)
            .max_lifetime(config.max_lifetime)
            .connect_with(connect_options)
            .await
            .map_err(|e| DbError::ConnectionFailed(e.to_string()))?;

        info!(
            max_connections = config.max_connections,
            "Database pool created"
        );

        let db = Database {
            pool,
            write_lock: Arc::new(Mutex::new(())),
        };

        if config.run_migrations {
            db.run_migrations().await?;
        }

        Ok(db)
    }

    /// Runs database migrations.
    ///
    /// Called by `new()` when `run_migrations` is set; idempotent.
    pub async fn run_migrations(&self) -> DbResult<()> {
        info!("Running database migrations");
        migrations::run_migrations(&self.pool).await?;
        info!("Migrations complete");
        Ok(())
    }

    /// Returns a reference to the connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Closes the database connection pool.
    ///
    /// After calling close, every new transaction fails.
    pub async fn close(&self) {
        info!("Closing database connection pool");
        self.pool.close().await;
    }

    /// Checks if the database is healthy (can execute queries).
    pub async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }
}

impl DataStore for Database {
    fn read(&self) -> StoreFuture<'_, Box<dyn ReadTransaction>> {
        Box::pin(async move {
            let tx = self
                .pool
                .begin()
                .await
                .map_err(|e| DbError::TransactionFailed(e.to_string()))?;
            Ok(Box::new(SqliteReadTransaction { tx }) as Box<dyn ReadTransaction>)
        })
    }

    fn write(&self) -> StoreFuture<'_, Box<dyn WriteTransaction>> {
        Box::pin(async move {
            let guard = self.write_lock.clone().lock_owned().await;
            let tx = self
                .pool
                .begin()
                .await
                .map_err(|e| DbError::TransactionFailed(e.to_string()))?;
            Ok(Box::new(SqliteWriteTransaction { tx, _guard: guard }) as Box<dyn WriteTransaction>)
        })
    }
}

// =============================================================================
// Transactions
// =============================================================================

struct SqliteReadTransaction {
    tx: Transaction<'static, Sqlite>,
}

struct SqliteWriteTransaction {
    tx: Transaction<'static, Sqlite>,
    _guard: OwnedMutexGuard<()>,
}

impl ReadTransaction for SqliteReadTransaction {
    fn select(&mut self, selector: &str) -> StoreFuture<'_, Vec<(String, String)>> {
        let selector = selector.to_string();
        Box::pin(async move { select_nodes(&mut self.tx, &selector).await })
    }

    fn get(&mut self, path: &str) -> StoreFuture<'_, Option<String>> {
        let path = path.to_string();
        Box::pin(async move { get_node(&mut self.tx, &path).await })
    }

    fn exists(&mut self, path: &str) -> StoreFuture<'_, bool> {
        let path = path.to_string();
        Box::pin(async move { node_exists(&mut self.tx, &path).await })
    }
}

impl ReadTransaction for SqliteWriteTransaction {
    fn select(&mut self, selector: &str) -> StoreFuture<'_, Vec<(String, String)>> {
        let selector = selector.to_string();
        Box::pin(async move { select_nodes(&mut self.tx, &selector).await })
    }

    fn get(&mut self, path: &str) -> StoreFuture<'_, Option<String>> {
        let path = path.to_string();
        Box::pin(async move { get_node(&mut self.tx, &path).await })
    }

    fn exists(&mut self, path: &str) -> StoreFuture<'_, bool> {
        let path = path.to_string();
        Box::pin(async move { node_exists(&mut self.tx, &path).await })
    }
}

impl WriteTransaction for SqliteWriteTransaction {
    fn put(&mut self, path: &str, value: &str) -> StoreFuture<'_, ()> {
        let path = path.to_string();
        let value = value.to_string();
        Box::pin(async move {
            sqlx::query(
                "INSERT INTO nodes (path, value) VALUES (?1, ?2) \
                 ON CONFLICT(path) DO UPDATE SET value = excluded.value",
            )
            .bind(&path)
            .bind(&value)
            .execute(&mut *self.tx)
            .await?;
            Ok(())
        })
    }

    fn delete(&mut self, path: &str) -> StoreFuture<'_, ()> {
        let path = path.to_string();
        Box::pin(async move {
            let result = sqlx::query(
                "DELETE FROM nodes WHERE path = ?1 OR substr(path, 1, length(?1) + 1) = ?1 || '/'",
            )
            .bind(&path)
            .execute(&mut *self.tx)
            .await?;
            debug!(path = %path, removed = result.rows_affected(), "Deleted subtree");
            Ok(())
        })
    }

    fn commit(self: Box<Self>) -> StoreFuture<'static, ()> {
        Box::pin(async move {
            let this = *self;
            this.tx
                .commit()
                .await
                .map_err(|e| DbError::TransactionFailed(e.to_string()))
        })
    }
}

// =============================================================================
// Queries
// =============================================================================

async fn select_nodes(conn: &mut SqliteConnection, selector: &str) -> DbResult<Vec<(String, String)>> {
    let parsed = Selector::parse(selector)?;
    let prefix = parsed.literal_prefix();

    let rows: Vec<(String, String)> = sqlx::query_as(
        "SELECT path, value FROM nodes WHERE substr(path, 1, length(?1)) = ?1 ORDER BY seq",
    )
    .bind(&prefix)
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows
        .into_iter()
        .filter(|(path, _)| parsed.matches(path))
        .collect())
}

async fn get_node(conn: &mut SqliteConnection, path: &str) -> DbResult<Option<String>> {
    let value: Option<String> = sqlx::query_scalar("SELECT value FROM nodes WHERE path = ?1")
        .bind(path)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(value)
}

async fn node_exists(conn: &mut SqliteConnection, path: &str) -> DbResult<bool> {
    let found: Option<i64> = sqlx::query_scalar(
        "SELECT 1 FROM nodes WHERE path = ?1 OR substr(path, 1, length(?1) + 1) = ?1 || '/' LIMIT 1",
    )
    .bind(path)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(found.is_some())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_db() -> Database {
        Database::new(DbConfig::in_memory()).await.unwrap()
    }

    #[tokio::test]
    async fn test_in_memory_database() {
        let db = memory_db().await;
        assert!(db.health_check().await);
    }

    #[tokio::test]
    async fn test_config_builder() {
        let config = DbConfig::new("/tmp/test.db")
            .max_connections(10)
            .min_connections(2);

        assert_eq!(config.max_connections, 10);
        assert_eq!(config.min_connections, 2);
        assert!(!config.is_in_memory());
        assert!(DbConfig::in_memory().is_in_memory());
    }

    #[tokio::test]
    async fn test_upsert_keeps_insertion_order() {
        let db = memory_db().await;

        let mut tx = db.write().await.unwrap();
        tx.put("/t/row[k='a']/v", "1").await.unwrap();
        tx.put("/t/row[k='b']/v", "2").await.unwrap();
        tx.put("/t/row[k='a']/v", "3").await.unwrap();
        tx.commit().await.unwrap();

        let mut read = db.read().await.unwrap();
        let rows = read.select("/t/row/v").await.unwrap();
        assert_eq!(
            rows,
            vec![
                ("/t/row[k='a']/v".to_string(), "3".to_string()),
                ("/t/row[k='b']/v".to_string(), "2".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_delete_removes_subtree_only() {
        let db = memory_db().await;

        let mut tx = db.write().await.unwrap();
        tx.put("/a/b/x", "1").await.unwrap();
        tx.put("/a/b/y/z", "2").await.unwrap();
        tx.put("/a/bc", "3").await.unwrap();
        tx.delete("/a/b").await.unwrap();
        assert!(!tx.exists("/a/b").await.unwrap());
        tx.commit().await.unwrap();

        let mut read = db.read().await.unwrap();
        assert_eq!(read.get("/a/bc").await.unwrap().as_deref(), Some("3"));
        assert!(read.get("/a/b/y/z").await.unwrap().is_none());
        assert!(read.exists("/a").await.unwrap());
    }

    #[tokio::test]
    async fn test_uncommitted_write_is_discarded() {
        let db = memory_db().await;

        {
            let mut tx = db.write().await.unwrap();
            tx.put("/a/x", "1").await.unwrap();
        }

        let mut read = db.read().await.unwrap();
        assert!(read.get("/a/x").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_on_disk_read_snapshot_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(DbConfig::new(dir.path().join("cache.db")))
            .await
            .unwrap();

        let mut tx = db.write().await.unwrap();
        tx.put("/src/row[k='r1']/k", "r1").await.unwrap();
        tx.commit().await.unwrap();

        let mut read = db.read().await.unwrap();
        assert_eq!(read.select("/src/row/k").await.unwrap().len(), 1);

        let mut tx = db.write().await.unwrap();
        tx.put("/src/row[k='r2']/k", "r2").await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(read.select("/src/row/k").await.unwrap().len(), 1);
        drop(read);

        let mut fresh = db.read().await.unwrap();
        assert_eq!(fresh.select("/src/row/k").await.unwrap().len(), 2);
        drop(fresh);

        db.close().await;
    }
}
