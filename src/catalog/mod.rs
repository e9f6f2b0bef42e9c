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

//! Offline asset catalog
//!
//! Durable record of which variants of a content item exist on local
//! storage. Rows are written only by the queue's completion path and removed
//! only by an explicit [`OfflineAssetCatalog::evict`]; nothing is evicted
//! automatically.

pub mod paths;
pub mod playlist;

use crate::clock::SharedClock;
use crate::error::{PipelineError, Result};
use crate::quality::QualityName;
use crate::storage::{queries, Database, OfflineAsset};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Clone)]
pub struct OfflineAssetCatalog {
    db: Database,
    content_dir: PathBuf,
    clock: SharedClock,
}

impl OfflineAssetCatalog {
    pub fn new(db: Database, content_dir: PathBuf, clock: SharedClock) -> Self {
        Self {
            db,
            content_dir,
            clock,
        }
    }

    pub fn content_dir(&self) -> &Path {
        &self.content_dir
    }

    /// Where a finished variant of `content_id` is stored
    pub fn variant_path(&self, source_type: &str, content_id: &str, quality: QualityName) -> PathBuf {
        paths::variant_path(&self.content_dir, source_type, content_id, quality)
    }

    /// Local path of every available variant of a content item
    pub async fn lookup(&self, content_id: &str) -> Result<BTreeMap<QualityName, PathBuf>> {
        let assets = queries::list_assets(self.db.pool(), content_id).await?;
        Ok(assets
            .into_iter()
            .map(|asset| (asset.quality, asset.local_path))
            .collect())
    }

    /// Full asset rows of a content item
    pub async fn assets(&self, content_id: &str) -> Result<Vec<OfflineAsset>> {
        queries::list_assets(self.db.pool(), content_id).await
    }

    /// Move a finished variant into place and commit its asset row in the
    /// same transaction as the queue entry's `downloading -> completed`
    /// transition
    ///
    /// Returns `None` and leaves `staged` where it is when the entry has
    /// already left `downloading`, e.g. because it was cancelled.
    pub(crate) async fn publish(
        &self,
        queue_id: &str,
        content_id: &str,
        quality: QualityName,
        staged: &Path,
        final_path: &Path,
        size_mb: f64,
    ) -> Result<Option<OfflineAsset>> {
        let now = self.clock.now();
        let mut tx = self.db.pool().begin().await?;

        if !queries::mark_completed(&mut *tx, queue_id, size_mb, now).await? {
            tx.rollback().await?;
            return Ok(None);
        }

        paths::move_into_place(staged, final_path).await?;

        let asset = OfflineAsset {
            content_id: content_id.to_string(),
            quality,
            local_path: final_path.to_path_buf(),
            size_mb,
            created_at: now,
        };
        queries::upsert_asset(&mut *tx, &asset).await?;
        queries::refresh_content_offline(&mut *tx, content_id, now).await?;

        tx.commit().await?;

        tracing::info!(
            content_id = %content_id,
            quality = %quality,
            size_mb,
            path = %final_path.display(),
            "offline asset recorded"
        );

        Ok(Some(asset))
    }

    /// Delete one variant's file and row; `false` when it was not recorded
    pub async fn evict(&self, content_id: &str, quality: QualityName) -> Result<bool> {
        let Some(asset) = queries::find_asset(self.db.pool(), content_id, quality).await? else {
            return Ok(false);
        };

        paths::remove_if_exists(&asset.local_path).await?;
        queries::delete_asset(self.db.pool(), content_id, quality).await?;
        queries::refresh_content_offline(self.db.pool(), content_id, self.clock.now()).await?;

        tracing::info!(content_id = %content_id, quality = %quality, "offline asset evicted");
        Ok(true)
    }

    /// Write `playlist.m3u8` next to the video variants of a content item
    pub async fn write_adaptive_playlist(&self, content_id: &str) -> Result<PathBuf> {
        let variants = self.lookup(content_id).await?;

        let dir = variants
            .iter()
            .find(|(quality, _)| !quality.is_audio_only())
            .and_then(|(_, path)| path.parent())
            .map(Path::to_path_buf)
            .ok_or_else(|| {
                PipelineError::InvalidState(format!(
                    "content {} has no local video variants",
                    content_id
                ))
            })?;

        let body = playlist::render_master_playlist(
            variants.iter().map(|(quality, path)| (*quality, path.as_path())),
        );
        let playlist_path = dir.join(playlist::PLAYLIST_FILE_NAME);

        tokio::fs::write(&playlist_path, body).await.map_err(|e| {
            PipelineError::FileIoError(format!("write: {} - {}", playlist_path.display(), e))
        })?;

        Ok(playlist_path)
    }
}
