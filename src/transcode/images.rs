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

//! Still image variants
//!
//! Cover art and thumbnails are re-encoded as JPEG at four widths. Each
//! variant is scaled to fit its profile width with the aspect ratio kept and
//! is never enlarged.

use crate::error::{PipelineError, Result};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{ColorType, RgbImage};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::io::Cursor;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageProfile {
    High,
    Medium,
    Low,
    Thumbnail,
}

impl ImageProfile {
    pub const ALL: [ImageProfile; 4] = [
        ImageProfile::High,
        ImageProfile::Medium,
        ImageProfile::Low,
        ImageProfile::Thumbnail,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ImageProfile::High => "high",
            ImageProfile::Medium => "medium",
            ImageProfile::Low => "low",
            ImageProfile::Thumbnail => "thumbnail",
        }
    }

    pub fn max_width(&self) -> u32 {
        match self {
            ImageProfile::High => 1920,
            ImageProfile::Medium => 1280,
            ImageProfile::Low => 640,
            ImageProfile::Thumbnail => 320,
        }
    }

    /// JPEG quality, 1-100
    pub fn jpeg_quality(&self) -> u8 {
        match self {
            ImageProfile::High => 90,
            ImageProfile::Medium => 80,
            ImageProfile::Low => 70,
            ImageProfile::Thumbnail => 60,
        }
    }

    pub fn file_name(&self) -> String {
        format!("{}.jpg", self.as_str())
    }
}

impl fmt::Display for ImageProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageVariant {
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub size_bytes: u64,
}

/// Output size of a `width` x `height` image for `profile`
///
/// Images already narrower than the profile keep their size.
pub fn target_dimensions(width: u32, height: u32, profile: ImageProfile) -> (u32, u32) {
    let max = profile.max_width();
    if width <= max {
        return (width, height);
    }
    let scaled = (height as u64 * max as u64 + width as u64 / 2) / width as u64;
    (max, scaled.max(1) as u32)
}

fn encode_variant(source: &RgbImage, profile: ImageProfile) -> Result<(u32, u32, Vec<u8>)> {
    let (width, height) = target_dimensions(source.width(), source.height(), profile);

    let resized;
    let pixels = if (width, height) == source.dimensions() {
        source
    } else {
        resized = image::imageops::resize(source, width, height, FilterType::Lanczos3);
        &resized
    };

    let mut out = Cursor::new(Vec::new());
    {
        let mut encoder = JpegEncoder::new_with_quality(&mut out, profile.jpeg_quality());
        encoder.encode(pixels.as_raw(), width, height, ColorType::Rgb8.into())?;
    }

    Ok((width, height, out.into_inner()))
}

/// Write every profile of `input` as `<profile>.jpg` under `out_dir`
///
/// An unreadable input fails the call. A profile that cannot be encoded or
/// written is logged and left out of the result.
pub async fn optimize_image(input: &Path, out_dir: &Path) -> Result<BTreeMap<ImageProfile, ImageVariant>> {
    tokio::fs::create_dir_all(out_dir).await.map_err(|e| {
        PipelineError::FileIoError(format!("create_dir: {} - {}", out_dir.display(), e))
    })?;

    let source_path = input.to_path_buf();
    let encoded = tokio::task::spawn_blocking(move || {
        let source = image::open(&source_path)?.to_rgb8();
        let encoded: Vec<(ImageProfile, Result<(u32, u32, Vec<u8>)>)> = ImageProfile::ALL
            .iter()
            .map(|profile| (*profile, encode_variant(&source, *profile)))
            .collect();
        Ok::<_, PipelineError>(encoded)
    })
    .await
    .map_err(|e| PipelineError::Transcode(format!("image task failed: {}", e)))??;

    let mut variants = BTreeMap::new();

    for (profile, result) in encoded {
        let path = out_dir.join(profile.file_name());
        let written = match result {
            Ok((width, height, bytes)) => tokio::fs::write(&path, &bytes)
                .await
                .map(|()| ImageVariant {
                    path: path.clone(),
                    width,
                    height,
                    size_bytes: bytes.len() as u64,
                })
                .map_err(PipelineError::from),
            Err(e) => Err(e),
        };

        match written {
            Ok(variant) => {
                tracing::debug!(
                    profile = %profile,
                    width = variant.width,
                    height = variant.height,
                    size_bytes = variant.size_bytes,
                    "image variant created"
                );
                variants.insert(profile, variant);
            }
            Err(e) => {
                tracing::error!(profile = %profile, input = %input.display(), error = %e, "image variant failed");
            }
        }
    }

    Ok(variants)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, Rgb};

    fn gradient(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8]))
    }

    #[test]
    fn test_target_dimensions_never_enlarge() {
        assert_eq!(target_dimensions(3840, 2160, ImageProfile::High), (1920, 1080));
        assert_eq!(target_dimensions(3840, 2160, ImageProfile::Thumbnail), (320, 180));
        assert_eq!(target_dimensions(800, 600, ImageProfile::High), (800, 600));
        assert_eq!(target_dimensions(800, 600, ImageProfile::Low), (640, 480));
        assert_eq!(target_dimensions(5000, 2, ImageProfile::Thumbnail), (320, 1));
    }

    #[test]
    fn test_profile_table() {
        let widths: Vec<u32> = ImageProfile::ALL.iter().map(ImageProfile::max_width).collect();
        assert_eq!(widths, vec![1920, 1280, 640, 320]);
        let qualities: Vec<u8> = ImageProfile::ALL.iter().map(ImageProfile::jpeg_quality).collect();
        assert_eq!(qualities, vec![90, 80, 70, 60]);
        assert_eq!(ImageProfile::Thumbnail.file_name(), "thumbnail.jpg");
    }

    #[tokio::test]
    async fn test_optimize_image_writes_every_profile() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("cover.png");
        gradient(800, 400).save(&input).unwrap();
        let out_dir = dir.path().join("images");

        let variants = optimize_image(&input, &out_dir).await.unwrap();
        assert_eq!(variants.len(), 4);

        let expected = [
            (ImageProfile::High, (800, 400)),
            (ImageProfile::Medium, (800, 400)),
            (ImageProfile::Low, (640, 320)),
            (ImageProfile::Thumbnail, (320, 160)),
        ];
        for (profile, dims) in expected {
            let variant = &variants[&profile];
            assert_eq!(variant.path, out_dir.join(profile.file_name()));
            assert_eq!((variant.width, variant.height), dims);

            let bytes = tokio::fs::read(&variant.path).await.unwrap();
            assert!(bytes.starts_with(&[0xFF, 0xD8, 0xFF]));
            assert_eq!(bytes.len() as u64, variant.size_bytes);
            let decoded = image::load_from_memory(&bytes).unwrap();
            assert_eq!(decoded.dimensions(), dims);
        }
    }

    #[tokio::test]
    async fn test_optimize_image_rejects_unreadable_input() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("broken.png");
        tokio::fs::write(&input, b"not an image").await.unwrap();

        let result = optimize_image(&input, &dir.path().join("out")).await;
        assert!(matches!(result, Err(PipelineError::ImageError(_))));
    }
}
