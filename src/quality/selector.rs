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


//! Bandwidth and source-resolution driven quality decisions

use crate::quality::profile::QualityName;

/// Bandwidth thresholds in bits per second, highest rung first.
/// A rung is chosen when the measured bandwidth is strictly above its floor.
const THRESHOLDS: [(f64, QualityName); 4] = [
    (2_000_000.0, QualityName::High),
    (1_000_000.0, QualityName::Medium),
    (500_000.0, QualityName::Low),
    (200_000.0, QualityName::UltraLow),
];

/// Map a throughput measurement to a rung of the ladder.
///
/// Total and monotone: NaN and negative input fall through to `audio_only`.
pub fn select_quality(bits_per_second: f64) -> QualityName {
    THRESHOLDS
        .iter()
        .find(|(floor, _)| bits_per_second > *floor)
        .map(|(_, quality)| *quality)
        .unwrap_or(QualityName::AudioOnly)
}

/// Profiles worth producing for a source whose shorter frame edge is
/// `source_short_side` pixels.
///
/// Never upscales: a rung's height is compared with the shorter edge, so a
/// 720x1280 portrait clip counts as 720p. `audio_only` is always included;
/// `None` (no video stream) yields `audio_only` alone. Returned highest
/// bitrate first.
pub fn offered_qualities(source_short_side: Option<u32>) -> Vec<QualityName> {
    QualityName::LADDER
        .iter()
        .copied()
        .filter(|q| match q.profile().resolution {
            None => true,
            Some(res) => source_short_side.map_or(false, |side| res.height <= side),
        })
        .collect()
}

/// Resolve a requested rung against what the source can support.
///
/// Returns the requested rung when it is offered, otherwise the highest
/// offered rung below it.
pub fn effective_quality(requested: QualityName, source_short_side: Option<u32>) -> QualityName {
    offered_qualities(source_short_side)
        .into_iter()
        .find(|q| *q <= requested)
        .unwrap_or(QualityName::AudioOnly)
}
