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


//! The fixed quality ladder
//!
//! | name       | video kbps | resolution | fps | audio kbps |
//! |------------|-----------:|------------|----:|-----------:|
//! | high       | 1000       | 1280x720   | 30  | 128        |
//! | medium     | 500        | 854x480    | 24  | 96         |
//! | low        | 250        | 640x360    | 24  | 64         |
//! | ultra_low  | 100        | 426x240    | 15  | 32         |
//! | audio_only | -          | -          | -   | 64         |

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Rung of the quality ladder.
///
/// Variants are declared from lowest to highest bitrate so the derived
/// `Ord` compares by bitrate: `AudioOnly < UltraLow < ... < High`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityName {
    AudioOnly,
    UltraLow,
    Low,
    Medium,
    High,
}

impl QualityName {
    /// Every rung, highest bitrate first
    pub const LADDER: [QualityName; 5] = [
        QualityName::High,
        QualityName::Medium,
        QualityName::Low,
        QualityName::UltraLow,
        QualityName::AudioOnly,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QualityName::High => "high",
            QualityName::Medium => "medium",
            QualityName::Low => "low",
            QualityName::UltraLow => "ultra_low",
            QualityName::AudioOnly => "audio_only",
        }
    }

    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "high" => Ok(QualityName::High),
            "medium" => Ok(QualityName::Medium),
            "low" => Ok(QualityName::Low),
            "ultra_low" => Ok(QualityName::UltraLow),
            "audio_only" => Ok(QualityName::AudioOnly),
            _ => Err(PipelineError::InvalidInput(format!("Invalid quality: {}", s))),
        }
    }

    /// Encoding profile for this rung
    pub fn profile(&self) -> &'static QualityProfile {
        match self {
            QualityName::High => &HIGH,
            QualityName::Medium => &MEDIUM,
            QualityName::Low => &LOW,
            QualityName::UltraLow => &ULTRA_LOW,
            QualityName::AudioOnly => &AUDIO_ONLY,
        }
    }

    pub fn is_audio_only(&self) -> bool {
        matches!(self, QualityName::AudioOnly)
    }

    /// Next rung down the ladder, `None` at `audio_only`
    pub fn lower(&self) -> Option<QualityName> {
        match self {
            QualityName::High => Some(QualityName::Medium),
            QualityName::Medium => Some(QualityName::Low),
            QualityName::Low => Some(QualityName::UltraLow),
            QualityName::UltraLow => Some(QualityName::AudioOnly),
            QualityName::AudioOnly => None,
        }
    }

    /// File extension of the published variant
    pub fn extension(&self) -> &'static str {
        if self.is_audio_only() {
            "m4a"
        } else {
            "mp4"
        }
    }
}

impl fmt::Display for QualityName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Target frame size of a video profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Fixed encoding settings for one rung of the ladder
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QualityProfile {
    pub name: QualityName,
    /// Target video bitrate in kbps (0 for audio-only)
    pub video_bitrate_kbps: u32,
    /// `None` only for audio-only
    pub resolution: Option<Resolution>,
    pub frame_rate: u32,
    pub audio_bitrate_kbps: u32,
}

impl QualityProfile {
    /// Advertised stream bandwidth in bits per second (video + audio)
    pub fn bandwidth_bps(&self) -> u64 {
        (self.video_bitrate_kbps as u64 + self.audio_bitrate_kbps as u64) * 1000
    }

    /// Whether ffmpeg caps the rate with `-maxrate`/`-bufsize`.
    /// `ultra_low` is encoded unconstrained.
    pub fn constrains_rate(&self) -> bool {
        !matches!(self.name, QualityName::UltraLow | QualityName::AudioOnly)
    }
}

pub static HIGH: QualityProfile = QualityProfile {
    name: QualityName::High,
    video_bitrate_kbps: 1000,
    resolution: Some(Resolution::new(1280, 720)),
    frame_rate: 30,
    audio_bitrate_kbps: 128,
};

pub static MEDIUM: QualityProfile = QualityProfile {
    name: QualityName::Medium,
    video_bitrate_kbps: 500,
    resolution: Some(Resolution::new(854, 480)),
    frame_rate: 24,
    audio_bitrate_kbps: 96,
};

pub static LOW: QualityProfile = QualityProfile {
    name: QualityName::Low,
    video_bitrate_kbps: 250,
    resolution: Some(Resolution::new(640, 360)),
    frame_rate: 24,
    audio_bitrate_kbps: 64,
};

pub static ULTRA_LOW: QualityProfile = QualityProfile {
    name: QualityName::UltraLow,
    video_bitrate_kbps: 100,
    resolution: Some(Resolution::new(426, 240)),
    frame_rate: 15,
    audio_bitrate_kbps: 32,
};

pub static AUDIO_ONLY: QualityProfile = QualityProfile {
    name: QualityName::AudioOnly,
    video_bitrate_kbps: 0,
    resolution: None,
    frame_rate: 0,
    audio_bitrate_kbps: 64,
};

/// Scheduling priority of a queue entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }

    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "high" => Ok(Priority::High),
            "medium" => Ok(Priority::Medium),
            "low" => Ok(Priority::Low),
            _ => Err(PipelineError::InvalidInput(format!("Invalid priority: {}", s))),
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Medium
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}
