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


//! Database migrations
//!
//! Migrations are plain SQL executed at runtime and tracked in `_migrations`,
//! so the crate needs no database at build time.

use crate::error::Result;
use sqlx::{Executor, SqlitePool};

/// Run all database migrations
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    create_migrations_table(pool).await?;

    run_migration(pool, 1, "initial_schema", create_initial_schema(pool)).await?;

    Ok(())
}

async fn create_migrations_table(pool: &SqlitePool) -> Result<()> {
    pool.execute(
        r#"
        CREATE TABLE IF NOT EXISTS _migrations (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .await?;

    Ok(())
}

/// Run a single migration if it hasn't been applied yet
async fn run_migration(
    pool: &SqlitePool,
    id: i32,
    name: &str,
    migration_fn: impl std::future::Future<Output = Result<()>>,
) -> Result<()> {
    let applied: Option<i32> = sqlx::query_scalar("SELECT id FROM _migrations WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;

    if applied.is_some() {
        return Ok(());
    }

    migration_fn.await?;

    sqlx::query("INSERT INTO _migrations (id, name) VALUES (?, ?)")
        .bind(id)
        .bind(name)
        .execute(pool)
        .await?;

    tracing::info!(migration = name, "applied database migration");

    Ok(())
}

async fn create_initial_schema(pool: &SqlitePool) -> Result<()> {
    pool.execute(
        r#"
-- Content items handed over by the catalog importers. The pipeline only
-- writes the offline_* columns.
CREATE TABLE IF NOT EXISTS ContentItems (
    content_id TEXT PRIMARY KEY,
    title TEXT NOT NULL DEFAULT '',
    source_type TEXT NOT NULL DEFAULT 'videos',
    source_media_url TEXT,
    duration_seconds INTEGER NOT NULL DEFAULT 0,
    offline_available INTEGER NOT NULL DEFAULT 0,
    offline_size_mb REAL,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);

-- Download/transcode queue
CREATE TABLE IF NOT EXISTS OfflineQueue (
    queue_id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    content_id TEXT NOT NULL,
    quality TEXT NOT NULL
        CHECK (quality IN ('high', 'medium', 'low', 'ultra_low', 'audio_only')),
    priority TEXT NOT NULL DEFAULT 'medium'
        CHECK (priority IN ('high', 'medium', 'low')),
    status TEXT NOT NULL DEFAULT 'pending'
        CHECK (status IN ('pending', 'downloading', 'completed', 'failed', 'cancelled')),
    progress INTEGER NOT NULL DEFAULT 0 CHECK (progress BETWEEN 0 AND 100),
    retry_count INTEGER NOT NULL DEFAULT 0,
    error_message TEXT,
    file_size_mb REAL,
    queued_at TEXT NOT NULL,
    started_at TEXT,
    completed_at TEXT,
    FOREIGN KEY (content_id) REFERENCES ContentItems(content_id) ON DELETE CASCADE
);

-- One live request per (user, content, quality); terminal rows may repeat
CREATE UNIQUE INDEX IF NOT EXISTS idx_queue_live_request
    ON OfflineQueue(user_id, content_id, quality)
    WHERE status IN ('pending', 'downloading');

CREATE INDEX IF NOT EXISTS idx_queue_status ON OfflineQueue(status);
CREATE INDEX IF NOT EXISTS idx_queue_user ON OfflineQueue(user_id);
CREATE INDEX IF NOT EXISTS idx_queue_schedule ON OfflineQueue(status, priority, queued_at);

-- Locally available variants, one row per (content, quality)
CREATE TABLE IF NOT EXISTS OfflineAssets (
    content_id TEXT NOT NULL,
    quality TEXT NOT NULL
        CHECK (quality IN ('high', 'medium', 'low', 'ultra_low', 'audio_only')),
    local_path TEXT NOT NULL,
    size_mb REAL NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    PRIMARY KEY (content_id, quality),
    FOREIGN KEY (content_id) REFERENCES ContentItems(content_id) ON DELETE CASCADE
);
        "#,
    )
    .await?;

    Ok(())
}
