//! Result store: raw uploads and analysis results
//!
//! Wraps the document store (a SQLite file) behind insert-one/find-one-by-id
//! operations. Each call is atomic on its own; nothing spans calls.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::path::Path;
use tracing::debug;
use uuid::Uuid;

use crate::color::ColorAnalysis;
use crate::db;
use crate::retry::retry_on_lock;
use crate::{Error, Result};

/// Default upper bound on waiting out writer contention
pub const DEFAULT_MAX_LOCK_WAIT_MS: u64 = 5000;

/// Uploaded image as stored
#[derive(Debug, Clone)]
pub struct ImageRecord {
    pub id: String,
    pub bytes: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

/// Persisted color analysis of one image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorResult {
    pub id: String,
    pub image_id: String,
    pub rgb: [u8; 3],
    pub hex: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl ColorResult {
    pub fn analysis(&self) -> ColorAnalysis {
        ColorAnalysis {
            rgb: self.rgb,
            hex: self.hex.clone(),
            name: self.name.clone(),
        }
    }
}

/// Handle to the document store; cheap to clone
#[derive(Clone)]
pub struct ResultStore {
    pool: SqlitePool,
    max_lock_wait_ms: u64,
}

impl ResultStore {
    /// Open the store file, creating tables on first use
    pub async fn open(db_path: &Path) -> Result<Self> {
        let pool = db::open_pool(db_path).await.map_err(|e| match e {
            Error::Database(err) => Error::from_store(err),
            other => other,
        })?;
        Self::from_pool(pool).await
    }

    /// Wrap an existing pool, creating tables if missing
    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        db::init_store_schema(&pool).await.map_err(|e| match e {
            Error::Database(err) => Error::from_store(err),
            other => other,
        })?;
        Ok(Self {
            pool,
            max_lock_wait_ms: DEFAULT_MAX_LOCK_WAIT_MS,
        })
    }

    /// Bound on how long a write waits out "database is locked"
    pub fn with_max_lock_wait_ms(mut self, max_lock_wait_ms: u64) -> Self {
        self.max_lock_wait_ms = max_lock_wait_ms;
        self
    }

    /// Persist an image blob; the bytes are not validated
    pub async fn put_image(&self, bytes: &[u8]) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let created_at = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);

        retry_on_lock("put_image", self.max_lock_wait_ms, || async {
            sqlx::query("INSERT INTO images (id, bytes, created_at) VALUES (?, ?, ?)")
                .bind(&id)
                .bind(bytes)
                .bind(&created_at)
                .execute(&self.pool)
                .await
                .map_err(Error::from_store)?;
            Ok(())
        })
        .await?;

        debug!(image_id = %id, size = bytes.len(), "Image stored");
        Ok(id)
    }

    pub async fn get_image(&self, id: &str) -> Result<ImageRecord> {
        let row = sqlx::query("SELECT id, bytes, created_at FROM images WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::from_store)?
            .ok_or_else(|| Error::NotFound(format!("image {}", id)))?;

        Ok(ImageRecord {
            id: row.get("id"),
            bytes: row.get("bytes"),
            created_at: parse_timestamp(row.get("created_at"))?,
        })
    }

    /// Persist the analysis of `image_id`; returns the new result id
    pub async fn put_result(&self, image_id: &str, analysis: &ColorAnalysis) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let created_at = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);

        retry_on_lock("put_result", self.max_lock_wait_ms, || async {
            sqlx::query(
                r#"
                INSERT INTO results (id, image_id, red, green, blue, hex, name, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&id)
            .bind(image_id)
            .bind(analysis.rgb[0] as i64)
            .bind(analysis.rgb[1] as i64)
            .bind(analysis.rgb[2] as i64)
            .bind(&analysis.hex)
            .bind(&analysis.name)
            .bind(&created_at)
            .execute(&self.pool)
            .await
            .map_err(Error::from_store)?;
            Ok(())
        })
        .await?;

        debug!(result_id = %id, image_id, hex = %analysis.hex, "Result stored");
        Ok(id)
    }

    pub async fn get_result(&self, id: &str) -> Result<ColorResult> {
        let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_RESULT))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::from_store)?
            .ok_or_else(|| Error::NotFound(format!("result {}", id)))?;

        result_from_row(&row)
    }

    /// Newest result recorded for an image, if any
    pub async fn find_result_for_image(&self, image_id: &str) -> Result<Option<ColorResult>> {
        let row = sqlx::query(&format!(
            "{} WHERE image_id = ? ORDER BY created_at DESC, rowid DESC LIMIT 1",
            SELECT_RESULT
        ))
        .bind(image_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::from_store)?;

        row.as_ref().map(result_from_row).transpose()
    }

    /// Newest result overall, if any
    pub async fn latest_result(&self) -> Result<Option<ColorResult>> {
        let row = sqlx::query(&format!(
            "{} ORDER BY created_at DESC, rowid DESC LIMIT 1",
            SELECT_RESULT
        ))
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::from_store)?;

        row.as_ref().map(result_from_row).transpose()
    }
}

const SELECT_RESULT: &str =
    "SELECT id, image_id, red, green, blue, hex, name, created_at FROM results";

fn result_from_row(row: &SqliteRow) -> Result<ColorResult> {
    let channel = |column: &str| -> Result<u8> {
        let value: i64 = row.get(column);
        u8::try_from(value)
            .map_err(|_| Error::Internal(format!("{} out of range: {}", column, value)))
    };

    Ok(ColorResult {
        id: row.get("id"),
        image_id: row.get("image_id"),
        rgb: [channel("red")?, channel("green")?, channel("blue")?],
        hex: row.get("hex"),
        name: row.get("name"),
        created_at: parse_timestamp(row.get("created_at"))?,
    })
}

fn parse_timestamp(value: String) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Failed to parse timestamp '{}': {}", value, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_store() -> ResultStore {
        let pool = db::open_memory_pool().await.unwrap();
        ResultStore::from_pool(pool).await.unwrap()
    }

    #[tokio::test]
    async fn test_unreachable_store_at_startup_is_unavailable() {
        let pool = db::open_memory_pool().await.unwrap();
        pool.close().await;

        let err = ResultStore::from_pool(pool).await.err().unwrap();
        assert!(matches!(err, Error::StorageUnavailable(_)));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_image_round_trip() {
        let store = memory_store().await;
        let bytes = b"Fake image data".to_vec();

        let id = store.put_image(&bytes).await.unwrap();
        let record = store.get_image(&id).await.unwrap();

        assert_eq!(record.id, id);
        assert_eq!(record.bytes, bytes);
    }

    #[tokio::test]
    async fn test_ids_are_unique() {
        let store = memory_store().await;
        let a = store.put_image(b"a").await.unwrap();
        let b = store.put_image(b"a").await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_missing_image_is_not_found() {
        let store = memory_store().await;
        let err = store.get_image("605a698c80b5eaf424b1bb78").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_result_round_trip() {
        let store = memory_store().await;
        let image_id = store.put_image(b"img").await.unwrap();
        let analysis = ColorAnalysis::from_rgb([255, 0, 0]);

        let result_id = store.put_result(&image_id, &analysis).await.unwrap();
        assert_ne!(result_id, image_id);

        let result = store.get_result(&result_id).await.unwrap();
        assert_eq!(result.id, result_id);
        assert_eq!(result.image_id, image_id);
        assert_eq!(result.rgb, [255, 0, 0]);
        assert_eq!(result.hex, "#ff0000");
        assert_eq!(result.name, "red");
        assert_eq!(result.analysis(), analysis);
    }

    #[tokio::test]
    async fn test_missing_result_is_not_found() {
        let store = memory_store().await;
        let err = store.get_result("nope").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_find_result_for_image_and_latest() {
        let store = memory_store().await;
        assert!(store.latest_result().await.unwrap().is_none());

        let first = store.put_image(b"1").await.unwrap();
        let second = store.put_image(b"2").await.unwrap();
        store
            .put_result(&first, &ColorAnalysis::from_rgb([0, 0, 255]))
            .await
            .unwrap();
        let second_result = store
            .put_result(&second, &ColorAnalysis::from_rgb([0, 128, 0]))
            .await
            .unwrap();

        let found = store.find_result_for_image(&first).await.unwrap().unwrap();
        assert_eq!(found.name, "blue");
        assert!(store.find_result_for_image("other").await.unwrap().is_none());

        let latest = store.latest_result().await.unwrap().unwrap();
        assert_eq!(latest.id, second_result);
    }
}
