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

//! Media transcoding
//!
//! The [`Transcoder`] trait is the seam between the queue and the encoder.
//! [`FfmpegTranscoder`] drives the `ffmpeg`/`ffprobe` binaries; tests plug in
//! in-process fakes.
//!
//! # Encoding contract
//! - Video rungs: H.264 baseline 3.0, yuv420p, AAC audio, faststart MP4
//! - `audio_only`: AAC in an M4A container, video dropped
//! - Output is never larger than the source resolution; callers resolve the
//!   rung with [`crate::quality::effective_quality`] first
//! - Still images: JPEG size variants via [`optimize_image`]

pub mod ffmpeg;
pub mod images;
pub mod probe;

pub use ffmpeg::FfmpegTranscoder;
pub use images::{optimize_image, ImageProfile, ImageVariant};
pub use probe::SourceInfo;

use crate::error::{PipelineError, Result};
use crate::quality::{offered_qualities, QualityName, QualityProfile};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Transcode progress callback, called with a fraction in `0.0..=1.0`
pub type ProgressCallback = Arc<dyn Fn(f32) + Send + Sync>;

/// Outcome of producing every offered rung of one source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub original_size: u64,
    pub optimized_size: u64,
    /// `original_size / optimized_size`, `None` when nothing was produced
    pub compression_ratio: Option<f64>,
    pub variants: BTreeMap<QualityName, PathBuf>,
    /// Rungs that failed, with the error text
    pub failures: BTreeMap<QualityName, String>,
}

#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Inspect a source file
    async fn probe(&self, input: &Path) -> Result<SourceInfo>;

    /// Encode `input` into `output` according to `profile`
    ///
    /// `source` is the result of [`Transcoder::probe`] for `input`.
    async fn transcode(
        &self,
        input: &Path,
        output: &Path,
        profile: &QualityProfile,
        source: &SourceInfo,
        progress: ProgressCallback,
    ) -> Result<()>;

    /// Produce every rung the source supports under `out_dir`
    ///
    /// A failing rung is logged and skipped; a missing encoder aborts.
    async fn optimize_all(&self, input: &Path, out_dir: &Path) -> Result<OptimizationResult> {
        let original_size = tokio::fs::metadata(input)
            .await
            .map_err(|e| PipelineError::FileIoError(format!("{}: {}", input.display(), e)))?
            .len();

        tokio::fs::create_dir_all(out_dir).await.map_err(|e| {
            PipelineError::FileIoError(format!("create_dir: {} - {}", out_dir.display(), e))
        })?;

        let source = self.probe(input).await?;
        let mut variants = BTreeMap::new();
        let mut failures = BTreeMap::new();

        for quality in offered_qualities(source.short_side()) {
            let output = out_dir.join(format!("{}.{}", quality.as_str(), quality.extension()));
            let result = self
                .transcode(input, &output, quality.profile(), &source, Arc::new(|_| {}))
                .await;

            match result {
                Ok(()) => {
                    tracing::info!(quality = %quality, output = %output.display(), "variant created");
                    variants.insert(quality, output);
                }
                Err(e @ PipelineError::TranscoderNotFound(_)) => return Err(e),
                Err(e) => {
                    tracing::warn!(quality = %quality, error = %e, "variant failed");
                    failures.insert(quality, e.to_string());
                }
            }
        }

        let mut optimized_size = 0u64;
        for path in variants.values() {
            optimized_size += tokio::fs::metadata(path).await.map(|m| m.len()).unwrap_or(0);
        }

        Ok(OptimizationResult {
            original_size,
            optimized_size,
            compression_ratio: (optimized_size > 0)
                .then(|| original_size as f64 / optimized_size as f64),
            variants,
            failures,
        })
    }
}
