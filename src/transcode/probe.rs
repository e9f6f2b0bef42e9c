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

//! Source inspection through ffprobe's JSON output
//!
//! Executes: `ffprobe -v quiet -print_format json -show_streams -show_format {path}`

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};

/// What the pipeline needs to know about a source before encoding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceInfo {
    pub has_video: bool,
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// 0.0 when the container does not report a duration
    pub duration_seconds: f64,
}

impl SourceInfo {
    /// Native height of the video stream, `None` for audio-only sources
    pub fn video_height(&self) -> Option<u32> {
        if self.has_video {
            self.height
        } else {
            None
        }
    }

    /// Shorter edge of the video frame, the dimension ladder rungs are
    /// compared against so portrait sources are not upscaled
    pub fn short_side(&self) -> Option<u32> {
        if !self.has_video {
            return None;
        }
        match (self.width, self.height) {
            (Some(w), Some(h)) => Some(w.min(h)),
            (_, h) => h,
        }
    }
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
    format: Option<FfprobeFormat>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    duration: Option<String>,
    /// Cover art is reported as a video stream with this disposition
    #[serde(default)]
    disposition: Option<FfprobeDisposition>,
}

#[derive(Debug, Deserialize)]
struct FfprobeDisposition {
    #[serde(default)]
    attached_pic: u8,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

/// Parse ffprobe JSON into [`SourceInfo`]
///
/// Output without any audio or video stream is malformed media.
pub fn parse_ffprobe_output(json: &str) -> Result<SourceInfo> {
    let probe: FfprobeOutput = serde_json::from_str(json).map_err(|e| {
        PipelineError::permanent(format!("Failed to parse ffprobe output: {}", e), None)
    })?;

    let video = probe.streams.iter().find(|s| {
        s.codec_type.as_deref() == Some("video")
            && s.disposition.as_ref().map_or(true, |d| d.attached_pic == 0)
    });
    let has_audio = probe
        .streams
        .iter()
        .any(|s| s.codec_type.as_deref() == Some("audio"));

    if video.is_none() && !has_audio {
        return Err(PipelineError::permanent(
            "Source has no audio or video stream",
            None,
        ));
    }

    let duration_seconds = probe
        .format
        .as_ref()
        .and_then(|f| f.duration.as_deref())
        .or_else(|| video.and_then(|v| v.duration.as_deref()))
        .and_then(|d| d.parse::<f64>().ok())
        .unwrap_or(0.0);

    Ok(SourceInfo {
        has_video: video.is_some(),
        width: video.and_then(|v| v.width),
        height: video.and_then(|v| v.height),
        duration_seconds,
    })
}
