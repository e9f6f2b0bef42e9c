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

//! Storage layout helpers
//!
//! Layout: `<content_dir>/<source_type>/<content_id>/<quality>.<ext>`, with
//! `source_type` allowed to span several segments (`videos/khan-academy`).

use crate::error::{PipelineError, Result};
use crate::quality::QualityName;
use std::path::{Path, PathBuf};

/// Characters that are invalid in file names on at least one supported platform
const INVALID_CHARS: &[char] = &['<', '>', ':', '"', '|', '?', '*', '\\', '/'];

/// Make a single path segment safe: invalid and control characters become
/// `_`, surrounding whitespace and dots are trimmed, and an empty result
/// becomes `_`.
pub fn sanitize_component(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| {
            if c.is_control() || INVALID_CHARS.contains(&c) {
                '_'
            } else {
                c
            }
        })
        .collect();

    let trimmed = replaced.trim().trim_matches('.');
    if trimmed.is_empty() {
        "_".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Directory holding every variant of one content item
pub fn content_dir_for(content_dir: &Path, source_type: &str, content_id: &str) -> PathBuf {
    let mut dir = content_dir.to_path_buf();
    for segment in source_type.split(&['/', '\\'][..]).filter(|s| !s.trim().is_empty()) {
        dir.push(sanitize_component(segment));
    }
    dir.push(sanitize_component(content_id));
    dir
}

/// Final location of one variant
pub fn variant_path(content_dir: &Path, source_type: &str, content_id: &str, quality: QualityName) -> PathBuf {
    content_dir_for(content_dir, source_type, content_id)
        .join(format!("{}.{}", quality.as_str(), quality.extension()))
}

/// Move a finished file into place, replacing any previous variant.
///
/// Falls back to copy + remove when the rename crosses filesystems.
pub async fn move_into_place(from: &Path, to: &Path) -> Result<()> {
    if let Some(parent) = to.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(|e| {
            PipelineError::FileIoError(format!("create_dir: {} - {}", parent.display(), e))
        })?;
    }

    if tokio::fs::rename(from, to).await.is_ok() {
        return Ok(());
    }

    tokio::fs::copy(from, to).await.map_err(|e| {
        PipelineError::FileIoError(format!("copy: {} -> {} - {}", from.display(), to.display(), e))
    })?;
    tokio::fs::remove_file(from).await.map_err(|e| {
        PipelineError::FileIoError(format!("remove: {} - {}", from.display(), e))
    })?;

    Ok(())
}

/// Remove a file, treating "already gone" as success
pub async fn remove_if_exists(path: &Path) -> Result<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(PipelineError::FileIoError(format!(
            "remove: {} - {}",
            path.display(),
            e
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_component() {
        assert_eq!(sanitize_component("khan-academy"), "khan-academy");
        assert_eq!(sanitize_component("a/b:c"), "a_b_c");
        assert_eq!(sanitize_component(".."), "_");
        assert_eq!(sanitize_component("  lesson 1. "), "lesson 1");
    }

    #[test]
    fn test_variant_layout() {
        let root = Path::new("/srv/content");
        assert_eq!(
            variant_path(root, "videos/khan-academy", "km-101", QualityName::Low),
            PathBuf::from("/srv/content/videos/khan-academy/km-101/low.mp4")
        );
        assert_eq!(
            variant_path(root, "videos", "km-101", QualityName::AudioOnly),
            PathBuf::from("/srv/content/videos/km-101/audio_only.m4a")
        );
    }

    #[test]
    fn test_layout_cannot_escape_root() {
        let root = Path::new("/srv/content");
        let path = variant_path(root, "../../etc", "../passwd", QualityName::High);
        assert!(path.starts_with(root));
        assert!(!path.components().any(|c| c == std::path::Component::ParentDir));
    }

    #[tokio::test]
    async fn test_move_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let from = dir.path().join("temp").join("q1.low.mp4");
        tokio::fs::create_dir_all(from.parent().unwrap()).await.unwrap();
        tokio::fs::write(&from, b"video").await.unwrap();

        let to = dir.path().join("videos").join("c1").join("low.mp4");
        move_into_place(&from, &to).await.unwrap();
        assert!(!from.exists());
        assert_eq!(tokio::fs::read(&to).await.unwrap(), b"video");

        assert!(remove_if_exists(&to).await.unwrap());
        assert!(!remove_if_exists(&to).await.unwrap());
    }
}
