use crate::error::SyncError;
use crate::media::{MediaKind, MediaRecord};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{FromRow, Row};
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info, instrument};

/// Metadata view of a buffered record, without the payload blobs.
/// Used for the pending-count surface; payloads stay in the database
/// until reconciliation reads them.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct PendingMedia {
    pub key: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub captured_at: DateTime<Utc>,
    pub duration_seconds: Option<i64>,
}

/// Local durable queue of media awaiting upload, backed by SQLite.
///
/// The queue is the single source of truth for work not yet done: a
/// record leaves it only through an explicit [`remove`](Self::remove)
/// or [`clear`](Self::clear) after a confirmed successful upload. Each
/// mutation is a single-statement transaction, so an `enqueue` from the
/// capture path and a `remove` from a reconciliation pass cannot
/// corrupt each other under interleaving.
pub struct MediaQueue {
    pool: SqlitePool,
}

impl MediaQueue {
    /// Open (or create) the queue database at the given path and run
    /// migrations.
    pub async fn open(path: &Path) -> Result<Self, SyncError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let queue = Self::connect(options, 4).await?;

        info!(path = %path.display(), "Opened pending-media queue");
        Ok(queue)
    }

    /// In-memory queue for tests; contents do not survive the pool.
    pub async fn open_in_memory() -> Result<Self, SyncError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        // A single never-recycled connection, otherwise each pooled
        // connection sees its own empty in-memory database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    async fn connect(options: SqliteConnectOptions, max_connections: u32) -> Result<Self, SyncError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    /// Insert a record, keyed by its `key`. Idempotent: re-enqueueing an
    /// existing key is a no-op and never produces two entries.
    #[instrument(skip(self, record), fields(key = %record.key))]
    pub async fn enqueue(&self, record: &MediaRecord) -> Result<(), SyncError> {
        let (duration_seconds, thumbnail) = match &record.kind {
            MediaKind::Video {
                duration_seconds,
                thumbnail,
            } => (Some(*duration_seconds), thumbnail.as_deref()),
            MediaKind::Photo => (None, None),
        };

        let result = sqlx::query(
            r#"
            INSERT INTO pending_media (
                key, content_type, size_bytes, captured_at,
                duration_seconds, thumbnail, payload
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(key) DO NOTHING
            "#,
        )
        .bind(&record.key)
        .bind(&record.content_type)
        .bind(record.size_bytes)
        .bind(record.captured_at)
        .bind(duration_seconds)
        .bind(thumbnail)
        .bind(&record.payload)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            debug!(key = %record.key, "Record already buffered, enqueue is a no-op");
        } else {
            debug!(key = %record.key, size_bytes = record.size_bytes, "Record buffered");
            metrics::counter!("snapvault.queue.enqueued").increment(1);
        }

        Ok(())
    }

    /// Snapshot of all buffered records, in insertion order.
    pub async fn list_all(&self) -> Result<Vec<MediaRecord>, SyncError> {
        let rows = sqlx::query(
            r#"
            SELECT key, content_type, size_bytes, captured_at,
                   duration_seconds, thumbnail, payload
            FROM pending_media
            ORDER BY seq ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_record).collect()
    }

    /// Metadata-only snapshot, in insertion order.
    pub async fn list_pending(&self) -> Result<Vec<PendingMedia>, SyncError> {
        let items = sqlx::query_as::<_, PendingMedia>(
            r#"
            SELECT key, content_type, size_bytes, captured_at, duration_seconds
            FROM pending_media
            ORDER BY seq ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(items)
    }

    /// Number of buffered records.
    pub async fn count(&self) -> Result<i64, SyncError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM pending_media")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Delete the record with the given key; a no-op if absent.
    ///
    /// Safe to call more than once for the same key: if the process
    /// restarts between "uploaded" and "removed", the duplicate remove
    /// after the next pass must not error.
    #[instrument(skip(self))]
    pub async fn remove(&self, key: &str) -> Result<(), SyncError> {
        let result = sqlx::query("DELETE FROM pending_media WHERE key = ?1")
            .bind(key)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() > 0 {
            debug!(key, "Record removed from queue");
        }
        Ok(())
    }

    /// Remove all records. Only valid after a reconciliation pass in
    /// which every item uploaded successfully.
    pub async fn clear(&self) -> Result<(), SyncError> {
        sqlx::query("DELETE FROM pending_media")
            .execute(&self.pool)
            .await?;
        debug!("Queue cleared");
        Ok(())
    }
}

fn row_to_record(row: sqlx::sqlite::SqliteRow) -> Result<MediaRecord, SyncError> {
    let duration_seconds: Option<i64> = row.try_get("duration_seconds")?;
    let thumbnail: Option<Vec<u8>> = row.try_get("thumbnail")?;

    let kind = match duration_seconds {
        Some(duration_seconds) => MediaKind::Video {
            duration_seconds,
            thumbnail,
        },
        None => MediaKind::Photo,
    };

    Ok(MediaRecord {
        key: row.try_get("key")?,
        content_type: row.try_get("content_type")?,
        size_bytes: row.try_get("size_bytes")?,
        captured_at: row.try_get("captured_at")?,
        payload: row.try_get("payload")?,
        kind,
    })
}
