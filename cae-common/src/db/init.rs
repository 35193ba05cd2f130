//! Database initialization
//!
//! The document store and the broker each live in their own SQLite file.
//! Both are created on first use and their schemas are applied idempotently,
//! so cae-web and cae-ml may start in either order.

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Busy timeout applied to every connection; lock contention past this is
/// handled by `retry::retry_on_lock`
const BUSY_TIMEOUT_MS: u64 = 5000;

/// Open (creating if needed) a SQLite database file with WAL enabled
pub async fn open_pool(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // WAL lets the web and worker processes read while the other writes
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_millis(BUSY_TIMEOUT_MS));

    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    Ok(pool)
}

/// Single-connection in-memory database (every connection to `:memory:` is
/// a separate database, so the pool must never open a second one)
pub async fn open_memory_pool() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await?;
    Ok(pool)
}

/// Create document store tables [images, results]
pub async fn init_store_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS images (
            id TEXT PRIMARY KEY,
            bytes BLOB NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS results (
            id TEXT PRIMARY KEY,
            image_id TEXT NOT NULL,
            red INTEGER NOT NULL,
            green INTEGER NOT NULL,
            blue INTEGER NOT NULL,
            hex TEXT NOT NULL,
            name TEXT NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_results_image_id ON results(image_id)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Create broker tables [queues, queue_messages, dead_letters]
pub async fn init_broker_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS queues (
            name TEXT PRIMARY KEY,
            declared_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // seq gives per-queue FIFO order; visible_at_ms implements delivery leases
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS queue_messages (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            queue TEXT NOT NULL,
            payload TEXT NOT NULL,
            attempts INTEGER NOT NULL DEFAULT 0,
            visible_at_ms INTEGER NOT NULL,
            enqueued_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_queue_messages_queue ON queue_messages(queue, visible_at_ms, seq)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS dead_letters (
            seq INTEGER PRIMARY KEY,
            queue TEXT NOT NULL,
            payload TEXT NOT NULL,
            attempts INTEGER NOT NULL,
            last_error TEXT NOT NULL,
            dead_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_schemas_are_idempotent() {
        let pool = open_memory_pool().await.unwrap();
        init_store_schema(&pool).await.unwrap();
        init_store_schema(&pool).await.unwrap();
        init_broker_schema(&pool).await.unwrap();
        init_broker_schema(&pool).await.unwrap();
    }

    #[tokio::test]
    async fn test_open_pool_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("nested").join("store.db");

        let pool = open_pool(&db_path).await.unwrap();
        init_store_schema(&pool).await.unwrap();

        assert!(db_path.exists());
    }
}
