// Offline Learning Core - Low-bandwidth Content Delivery
// Copyright (C) 2025 Henning Berge
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


//! Database query functions
//!
//! # Query Patterns
//! - One free function per statement, taking `&SqlitePool`
//! - Queue transitions are conditional on the current status and report
//!   whether a row changed, so a late writer never overwrites a cancel
//! - Timestamps are bound as strings produced by `clock::to_db_timestamp`

use crate::clock::to_db_timestamp;
use crate::error::Result;
use crate::quality::QualityName;
use crate::storage::models::*;
use chrono::{DateTime, Utc};
use sqlx::{Sqlite, SqlitePool};

const QUEUE_COLUMNS: &str = "queue_id, user_id, content_id, quality, priority, status, progress, \
     retry_count, error_message, file_size_mb, queued_at, started_at, completed_at";

// ============================================================================
// CONTENT QUERIES
// ============================================================================

/// Insert or refresh an importer-owned content row
///
/// Offline availability columns are left untouched on refresh.
pub async fn upsert_content(pool: &SqlitePool, item: &NewContentItem, now: DateTime<Utc>) -> Result<()> {
    let now = to_db_timestamp(now);
    sqlx::query(
        r#"
        INSERT INTO ContentItems (
            content_id, title, source_type, source_media_url, duration_seconds,
            created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(content_id) DO UPDATE SET
            title = excluded.title,
            source_type = excluded.source_type,
            source_media_url = excluded.source_media_url,
            duration_seconds = excluded.duration_seconds,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&item.content_id)
    .bind(&item.title)
    .bind(&item.source_type)
    .bind(&item.source_media_url)
    .bind(item.duration_seconds)
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?;

    Ok(())
}

/// Find content item by ID
pub async fn find_content(pool: &SqlitePool, content_id: &str) -> Result<Option<ContentItem>> {
    let item = sqlx::query_as::<_, ContentItem>(
        r#"
        SELECT content_id, title, source_type, source_media_url, duration_seconds,
               offline_available, offline_size_mb
        FROM ContentItems WHERE content_id = ?
        "#,
    )
    .bind(content_id)
    .fetch_optional(pool)
    .await?;

    Ok(item)
}

/// Refresh the offline columns of a content item from its asset rows
pub async fn refresh_content_offline<'e, E>(executor: E, content_id: &str, now: DateTime<Utc>) -> Result<()>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        UPDATE ContentItems SET
            offline_available = EXISTS (SELECT 1 FROM OfflineAssets WHERE content_id = ?1),
            offline_size_mb = (SELECT SUM(size_mb) FROM OfflineAssets WHERE content_id = ?1),
            updated_at = ?2
        WHERE content_id = ?1
        "#,
    )
    .bind(content_id)
    .bind(to_db_timestamp(now))
    .execute(executor)
    .await?;

    Ok(())
}

// ============================================================================
// QUEUE QUERIES
// ============================================================================

/// Insert a new queue entry
///
/// Fails with a unique violation when a live entry for the same
/// (user, content, quality) already exists.
pub async fn insert_queue_entry(pool: &SqlitePool, entry: &QueueEntry) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO OfflineQueue (
            queue_id, user_id, content_id, quality, priority, status,
            progress, retry_count, queued_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&entry.queue_id)
    .bind(&entry.user_id)
    .bind(&entry.content_id)
    .bind(entry.quality.as_str())
    .bind(entry.priority.as_str())
    .bind(entry.status.as_str())
    .bind(entry.progress as i64)
    .bind(entry.retry_count as i64)
    .bind(to_db_timestamp(entry.queued_at))
    .execute(pool)
    .await?;

    Ok(())
}

/// Find queue entry by ID
pub async fn find_queue_entry(pool: &SqlitePool, queue_id: &str) -> Result<Option<QueueEntry>> {
    let entry = sqlx::query_as::<_, QueueEntry>(&format!(
        "SELECT {} FROM OfflineQueue WHERE queue_id = ?",
        QUEUE_COLUMNS
    ))
    .bind(queue_id)
    .fetch_optional(pool)
    .await?;

    Ok(entry)
}

/// Find the non-terminal entry for a (user, content, quality) triple
pub async fn find_live_entry(
    pool: &SqlitePool,
    user_id: &str,
    content_id: &str,
    quality: QualityName,
) -> Result<Option<QueueEntry>> {
    let entry = sqlx::query_as::<_, QueueEntry>(&format!(
        r#"
        SELECT {} FROM OfflineQueue
        WHERE user_id = ? AND content_id = ? AND quality = ?
          AND status IN ('pending', 'downloading')
        "#,
        QUEUE_COLUMNS
    ))
    .bind(user_id)
    .bind(content_id)
    .bind(quality.as_str())
    .fetch_optional(pool)
    .await?;

    Ok(entry)
}

/// Pending entries in dispatch order: priority band, then arrival, then insertion
pub async fn list_dispatchable(pool: &SqlitePool, limit: i64) -> Result<Vec<QueueEntry>> {
    let entries = sqlx::query_as::<_, QueueEntry>(&format!(
        r#"
        SELECT {} FROM OfflineQueue
        WHERE status = 'pending'
        ORDER BY
            CASE priority WHEN 'high' THEN 0 WHEN 'medium' THEN 1 ELSE 2 END,
            queued_at ASC,
            rowid ASC
        LIMIT ?
        "#,
        QUEUE_COLUMNS
    ))
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(entries)
}

/// Pending and downloading entries of one user, oldest first
pub async fn list_live_for_user(pool: &SqlitePool, user_id: &str) -> Result<Vec<QueueEntry>> {
    let entries = sqlx::query_as::<_, QueueEntry>(&format!(
        r#"
        SELECT {} FROM OfflineQueue
        WHERE user_id = ? AND status IN ('pending', 'downloading')
        ORDER BY queued_at ASC, rowid ASC
        "#,
        QUEUE_COLUMNS
    ))
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(entries)
}

/// Every entry of one user regardless of status, newest first
pub async fn list_entries_for_user(pool: &SqlitePool, user_id: &str) -> Result<Vec<QueueEntry>> {
    let entries = sqlx::query_as::<_, QueueEntry>(&format!(
        "SELECT {} FROM OfflineQueue WHERE user_id = ? ORDER BY queued_at DESC, rowid DESC",
        QUEUE_COLUMNS
    ))
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(entries)
}

/// Entries in a given status
pub async fn list_by_status(pool: &SqlitePool, status: QueueStatus) -> Result<Vec<QueueEntry>> {
    let entries = sqlx::query_as::<_, QueueEntry>(&format!(
        "SELECT {} FROM OfflineQueue WHERE status = ? ORDER BY queued_at ASC, rowid ASC",
        QUEUE_COLUMNS
    ))
    .bind(status.as_str())
    .fetch_all(pool)
    .await?;

    Ok(entries)
}

/// Count entries in a given status
pub async fn count_by_status(pool: &SqlitePool, status: QueueStatus) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM OfflineQueue WHERE status = ?")
        .bind(status.as_str())
        .fetch_one(pool)
        .await?;

    Ok(count)
}

/// `pending -> downloading`
pub async fn mark_downloading(pool: &SqlitePool, queue_id: &str, now: DateTime<Utc>) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE OfflineQueue
        SET status = 'downloading', started_at = ?, error_message = NULL
        WHERE queue_id = ? AND status = 'pending'
        "#,
    )
    .bind(to_db_timestamp(now))
    .bind(queue_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Raise progress of a downloading entry; lower values are ignored
pub async fn update_progress(pool: &SqlitePool, queue_id: &str, progress: u8) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE OfflineQueue
        SET progress = MAX(progress, ?)
        WHERE queue_id = ? AND status = 'downloading'
        "#,
    )
    .bind(progress.min(100) as i64)
    .bind(queue_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// `downloading -> completed`
pub async fn mark_completed<'e, E>(
    executor: E,
    queue_id: &str,
    file_size_mb: f64,
    now: DateTime<Utc>,
) -> Result<bool>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        r#"
        UPDATE OfflineQueue
        SET status = 'completed', progress = 100, file_size_mb = ?,
            error_message = NULL, completed_at = ?
        WHERE queue_id = ? AND status = 'downloading'
        "#,
    )
    .bind(file_size_mb)
    .bind(to_db_timestamp(now))
    .bind(queue_id)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// `downloading -> pending` after a retryable failure
pub async fn requeue_for_retry(
    pool: &SqlitePool,
    queue_id: &str,
    retry_count: u32,
    error_message: &str,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE OfflineQueue
        SET status = 'pending', progress = 0, retry_count = ?,
            error_message = ?, started_at = NULL
        WHERE queue_id = ? AND status = 'downloading'
        "#,
    )
    .bind(retry_count as i64)
    .bind(error_message)
    .bind(queue_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// `downloading -> failed` (terminal)
pub async fn mark_failed(
    pool: &SqlitePool,
    queue_id: &str,
    error_message: &str,
    now: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE OfflineQueue
        SET status = 'failed', error_message = ?, completed_at = ?
        WHERE queue_id = ? AND status = 'downloading'
        "#,
    )
    .bind(error_message)
    .bind(to_db_timestamp(now))
    .bind(queue_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// `pending | downloading -> cancelled`
pub async fn mark_cancelled(pool: &SqlitePool, queue_id: &str, now: DateTime<Utc>) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE OfflineQueue
        SET status = 'cancelled', completed_at = ?
        WHERE queue_id = ? AND status IN ('pending', 'downloading')
        "#,
    )
    .bind(to_db_timestamp(now))
    .bind(queue_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Reset every `downloading` entry to `pending` and return the reset entries
///
/// Used at startup: anything still downloading was interrupted by a crash.
pub async fn reset_interrupted(pool: &SqlitePool) -> Result<Vec<QueueEntry>> {
    let mut tx = pool.begin().await?;

    let entries = sqlx::query_as::<_, QueueEntry>(&format!(
        "SELECT {} FROM OfflineQueue WHERE status = 'downloading'",
        QUEUE_COLUMNS
    ))
    .fetch_all(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        UPDATE OfflineQueue
        SET status = 'pending', progress = 0, started_at = NULL
        WHERE status = 'downloading'
        "#,
    )
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(entries)
}

/// Terminal failed entries whose failure is older than `cutoff`
pub async fn list_failed_before(pool: &SqlitePool, cutoff: DateTime<Utc>) -> Result<Vec<QueueEntry>> {
    let entries = sqlx::query_as::<_, QueueEntry>(&format!(
        r#"
        SELECT {} FROM OfflineQueue
        WHERE status = 'failed' AND COALESCE(completed_at, queued_at) < ?
        "#,
        QUEUE_COLUMNS
    ))
    .bind(to_db_timestamp(cutoff))
    .fetch_all(pool)
    .await?;

    Ok(entries)
}

/// Delete a queue entry only while it is still `failed`
pub async fn delete_failed_entry(pool: &SqlitePool, queue_id: &str) -> Result<bool> {
    let result = sqlx::query("DELETE FROM OfflineQueue WHERE queue_id = ? AND status = 'failed'")
        .bind(queue_id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() == 1)
}

// ============================================================================
// OFFLINE ASSET QUERIES
// ============================================================================

/// Insert or replace the asset row of a (content, quality) pair
pub async fn upsert_asset<'e, E>(executor: E, asset: &OfflineAsset) -> Result<()>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO OfflineAssets (content_id, quality, local_path, size_mb, created_at)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(content_id, quality) DO UPDATE SET
            local_path = excluded.local_path,
            size_mb = excluded.size_mb,
            created_at = excluded.created_at
        "#,
    )
    .bind(&asset.content_id)
    .bind(asset.quality.as_str())
    .bind(asset.local_path.to_string_lossy().as_ref())
    .bind(asset.size_mb)
    .bind(to_db_timestamp(asset.created_at))
    .execute(executor)
    .await?;

    Ok(())
}

/// All asset rows of a content item
pub async fn list_assets(pool: &SqlitePool, content_id: &str) -> Result<Vec<OfflineAsset>> {
    let assets = sqlx::query_as::<_, OfflineAsset>(
        "SELECT content_id, quality, local_path, size_mb, created_at FROM OfflineAssets WHERE content_id = ?",
    )
    .bind(content_id)
    .fetch_all(pool)
    .await?;

    Ok(assets)
}

/// Asset row of one variant
pub async fn find_asset(
    pool: &SqlitePool,
    content_id: &str,
    quality: QualityName,
) -> Result<Option<OfflineAsset>> {
    let asset = sqlx::query_as::<_, OfflineAsset>(
        r#"
        SELECT content_id, quality, local_path, size_mb, created_at
        FROM OfflineAssets WHERE content_id = ? AND quality = ?
        "#,
    )
    .bind(content_id)
    .bind(quality.as_str())
    .fetch_optional(pool)
    .await?;

    Ok(asset)
}

/// Delete the asset row of one variant
pub async fn delete_asset(pool: &SqlitePool, content_id: &str, quality: QualityName) -> Result<bool> {
    let result = sqlx::query("DELETE FROM OfflineAssets WHERE content_id = ? AND quality = ?")
        .bind(content_id)
        .bind(quality.as_str())
        .execute(pool)
        .await?;

    Ok(result.rows_affected() == 1)
}
