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


//! Database models
//!
//! # Design Decisions
//! - Enums stored as lowercase TEXT (`pending`, `audio_only`, ...)
//! - DateTime stored as TEXT in RFC 3339 with microseconds, so ordering by
//!   the column is chronological
//! - Rows with enum columns are mapped by hand; plain rows derive `FromRow`

use crate::error::{PipelineError, Result};
use crate::quality::{Priority, QualityName};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, FromRow, Row};
use std::path::PathBuf;

// ============================================================================
// ENUMS
// ============================================================================

/// Lifecycle of a queue entry
///
/// `pending -> downloading -> {completed | failed | cancelled}`, with a
/// retryable failure returning the entry to `pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Pending,
    Downloading,
    Completed,
    Failed,
    Cancelled,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Pending => "pending",
            QueueStatus::Downloading => "downloading",
            QueueStatus::Completed => "completed",
            QueueStatus::Failed => "failed",
            QueueStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(QueueStatus::Pending),
            "downloading" => Ok(QueueStatus::Downloading),
            "completed" => Ok(QueueStatus::Completed),
            "failed" => Ok(QueueStatus::Failed),
            "cancelled" => Ok(QueueStatus::Cancelled),
            _ => Err(PipelineError::InvalidData(format!("Invalid queue status: {}", s))),
        }
    }

    /// Terminal entries are never scheduled again
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            QueueStatus::Completed | QueueStatus::Failed | QueueStatus::Cancelled
        )
    }
}

impl std::fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

// ============================================================================
// CONTENT ITEMS
// ============================================================================

/// Content item as registered by a catalog importer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ContentItem {
    pub content_id: String,
    pub title: String,
    /// Storage group, e.g. `videos/khan-academy`
    pub source_type: String,
    pub source_media_url: Option<String>,
    pub duration_seconds: i64,
    pub offline_available: bool,
    pub offline_size_mb: Option<f64>,
}

/// Importer-facing shape for registering or refreshing a content item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewContentItem {
    pub content_id: String,
    pub title: String,
    pub source_type: String,
    pub source_media_url: Option<String>,
    pub duration_seconds: i64,
}

impl NewContentItem {
    pub fn new<S: Into<String>>(content_id: S, source_media_url: Option<String>) -> Self {
        Self {
            content_id: content_id.into(),
            title: String::new(),
            source_type: "videos".to_string(),
            source_media_url,
            duration_seconds: 0,
        }
    }
}

// ============================================================================
// QUEUE ENTRIES
// ============================================================================

/// One requested (user, content, quality) download
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub queue_id: String,
    pub user_id: String,
    pub content_id: String,
    pub quality: QualityName,
    pub priority: Priority,
    pub status: QueueStatus,
    /// 0-100, never decreases while downloading
    pub progress: u8,
    /// Retries already performed
    pub retry_count: u32,
    pub error_message: Option<String>,
    pub file_size_mb: Option<f64>,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl QueueEntry {
    /// Fresh `pending` entry with a new UUID
    pub fn new_pending(
        user_id: &str,
        content_id: &str,
        quality: QualityName,
        priority: Priority,
        queued_at: DateTime<Utc>,
    ) -> Self {
        Self {
            queue_id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            content_id: content_id.to_string(),
            quality,
            priority,
            status: QueueStatus::Pending,
            progress: 0,
            retry_count: 0,
            error_message: None,
            file_size_mb: None,
            queued_at,
            started_at: None,
            completed_at: None,
        }
    }
}

impl<'r> FromRow<'r, SqliteRow> for QueueEntry {
    fn from_row(row: &'r SqliteRow) -> std::result::Result<Self, sqlx::Error> {
        let quality: String = row.try_get("quality")?;
        let priority: String = row.try_get("priority")?;
        let status: String = row.try_get("status")?;
        let progress: i64 = row.try_get("progress")?;
        let retry_count: i64 = row.try_get("retry_count")?;
        let queued_at: String = row.try_get("queued_at")?;
        let started_at: Option<String> = row.try_get("started_at")?;
        let completed_at: Option<String> = row.try_get("completed_at")?;

        Ok(Self {
            queue_id: row.try_get("queue_id")?,
            user_id: row.try_get("user_id")?,
            content_id: row.try_get("content_id")?,
            quality: QualityName::from_str(&quality).map_err(decode_error)?,
            priority: Priority::from_str(&priority).map_err(decode_error)?,
            status: QueueStatus::from_str(&status).map_err(decode_error)?,
            progress: progress.clamp(0, 100) as u8,
            retry_count: retry_count.max(0) as u32,
            error_message: row.try_get("error_message")?,
            file_size_mb: row.try_get("file_size_mb")?,
            queued_at: parse_timestamp(&queued_at).map_err(decode_error)?,
            started_at: started_at
                .as_deref()
                .map(parse_timestamp)
                .transpose()
                .map_err(decode_error)?,
            completed_at: completed_at
                .as_deref()
                .map(parse_timestamp)
                .transpose()
                .map_err(decode_error)?,
        })
    }
}

// ============================================================================
// OFFLINE ASSETS
// ============================================================================

/// A locally available variant of a content item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfflineAsset {
    pub content_id: String,
    pub quality: QualityName,
    pub local_path: PathBuf,
    pub size_mb: f64,
    pub created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, SqliteRow> for OfflineAsset {
    fn from_row(row: &'r SqliteRow) -> std::result::Result<Self, sqlx::Error> {
        let quality: String = row.try_get("quality")?;
        let local_path: String = row.try_get("local_path")?;
        let created_at: String = row.try_get("created_at")?;

        Ok(Self {
            content_id: row.try_get("content_id")?,
            quality: QualityName::from_str(&quality).map_err(decode_error)?,
            local_path: PathBuf::from(local_path),
            size_mb: row.try_get("size_mb")?,
            created_at: parse_timestamp(&created_at).map_err(decode_error)?,
        })
    }
}

// ============================================================================
// HELPERS
// ============================================================================

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| PipelineError::InvalidData(format!("Invalid timestamp '{}': {}", s, e)))
}

fn decode_error(err: PipelineError) -> sqlx::Error {
    sqlx::Error::Decode(Box::new(err))
}
