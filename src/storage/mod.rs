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


//! Database storage and models
//!
//! # Database Schema
//! - ContentItems: importer-owned content rows plus offline availability
//! - OfflineQueue: download/transcode queue entries and their lifecycle
//! - OfflineAssets: locally available variants, one per (content, quality)
//!
//! # Usage Example
//! ```rust,no_run
//! use offline_core::storage::{queries, Database, NewContentItem};
//!
//! # async fn example() -> offline_core::Result<()> {
//! let db = Database::new("./data/offline.db").await?;
//! let item = NewContentItem::new("khan-fractions-1", Some("https://cdn.example.org/f1.mp4".into()));
//! queries::upsert_content(db.pool(), &item, chrono::Utc::now()).await?;
//! # Ok(())
//! # }
//! ```

pub mod database;
pub mod migrations;
pub mod models;
pub mod queries;

pub use database::Database;
pub use models::{ContentItem, NewContentItem, OfflineAsset, QueueEntry, QueueStatus};

use crate::clock::SharedClock;
use crate::error::Result;

/// Importer-facing handle for registering content items
#[derive(Clone)]
pub struct ContentStore {
    db: Database,
    clock: SharedClock,
}

impl ContentStore {
    pub fn new(db: Database, clock: SharedClock) -> Self {
        Self { db, clock }
    }

    /// Register or refresh a content item
    pub async fn upsert_content(&self, item: &NewContentItem) -> Result<()> {
        queries::upsert_content(self.db.pool(), item, self.clock.now()).await?;
        tracing::debug!(content_id = %item.content_id, "content item registered");
        Ok(())
    }

    pub async fn get(&self, content_id: &str) -> Result<Option<ContentItem>> {
        queries::find_content(self.db.pool(), content_id).await
    }
}
