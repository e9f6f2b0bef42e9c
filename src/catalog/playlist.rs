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

//! HLS master playlist over the locally available video variants

use crate::quality::QualityName;
use std::path::Path;

/// File name of the master playlist inside a content directory
pub const PLAYLIST_FILE_NAME: &str = "playlist.m3u8";

/// Render a master playlist listing each video variant, highest first.
///
/// `audio_only` variants are skipped. URIs are relative file names so the
/// playlist stays valid wherever the content directory is served from.
pub fn render_master_playlist<'a, I>(variants: I) -> String
where
    I: IntoIterator<Item = (QualityName, &'a Path)>,
{
    let mut entries: Vec<(QualityName, &Path)> = variants
        .into_iter()
        .filter(|(quality, _)| !quality.is_audio_only())
        .collect();
    entries.sort_by(|a, b| b.0.cmp(&a.0));

    let mut playlist = String::from("#EXTM3U\n#EXT-X-VERSION:3\n");

    for (quality, path) in entries {
        let profile = quality.profile();
        let Some(resolution) = profile.resolution else {
            continue;
        };
        let uri = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("{}.{}", quality.as_str(), quality.extension()));

        playlist.push_str(&format!(
            "\n#EXT-X-STREAM-INF:BANDWIDTH={},RESOLUTION={}\n{}\n",
            profile.bandwidth_bps(),
            resolution,
            uri
        ));
    }

    playlist
}
