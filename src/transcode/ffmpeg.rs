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

//! ffmpeg-backed [`Transcoder`]
//!
//! # Command shape
//! Video rung:
//! `ffmpeg -hide_banner -y -i in -c:v libx264 -preset fast -b:v 500k -maxrate 500k
//!  -bufsize 1000k -s 854x480 -r 24 -pix_fmt yuv420p -profile:v baseline -level 3.0
//!  -c:a aac -b:a 96k -movflags +faststart out.mp4`
//!
//! `ultra_low` omits `-maxrate`/`-bufsize`. Audio-only:
//! `ffmpeg -hide_banner -y -i in -vn -c:a aac -b:a 64k -movflags +faststart out.m4a`

use crate::error::{PipelineError, Result};
use crate::quality::QualityProfile;
use crate::transcode::probe::{parse_ffprobe_output, SourceInfo};
use crate::transcode::{ProgressCallback, Transcoder};
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::VecDeque;
use std::path::Path;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

/// stderr lines kept for the error message of a failed run
const STDERR_TAIL_LINES: usize = 5;

lazy_static! {
    static ref TIME_RE: Regex = Regex::new(r"time=(\d+):(\d{2}):(\d{2}(?:\.\d+)?)")
        .expect("static regex is valid");
}

#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    ffmpeg_path: String,
    ffprobe_path: String,
}

impl Default for FfmpegTranscoder {
    fn default() -> Self {
        Self::new("ffmpeg", "ffprobe")
    }
}

impl FfmpegTranscoder {
    pub fn new<S: Into<String>>(ffmpeg_path: S, ffprobe_path: S) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            ffprobe_path: ffprobe_path.into(),
        }
    }

    /// Arguments (without the program name) encoding `input` for `profile`
    pub fn build_args(input: &Path, output: &Path, profile: &QualityProfile) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "-hide_banner".into(),
            "-y".into(),
            "-i".into(),
            input.to_string_lossy().into_owned(),
        ];

        match profile.resolution {
            None => {
                args.push("-vn".into());
            }
            Some(resolution) => {
                let kbps = profile.video_bitrate_kbps;
                args.extend([
                    "-c:v".into(),
                    "libx264".into(),
                    "-preset".into(),
                    "fast".into(),
                    "-b:v".into(),
                    format!("{}k", kbps),
                ]);
                if profile.constrains_rate() {
                    args.extend([
                        "-maxrate".into(),
                        format!("{}k", kbps),
                        "-bufsize".into(),
                        format!("{}k", kbps * 2),
                    ]);
                }
                args.extend([
                    "-s".into(),
                    resolution.to_string(),
                    "-r".into(),
                    profile.frame_rate.to_string(),
                    "-pix_fmt".into(),
                    "yuv420p".into(),
                    "-profile:v".into(),
                    "baseline".into(),
                    "-level".into(),
                    "3.0".into(),
                ]);
            }
        }

        args.extend([
            "-c:a".into(),
            "aac".into(),
            "-b:a".into(),
            format!("{}k", profile.audio_bitrate_kbps),
            "-movflags".into(),
            "+faststart".into(),
            output.to_string_lossy().into_owned(),
        ]);

        args
    }

    /// Run ffmpeg, forwarding `time=` progress as a fraction of `total_duration`
    async fn execute(&self, args: &[String], total_duration: f64, progress: ProgressCallback) -> Result<()> {
        let mut child = Command::new(&self.ffmpeg_path)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| self.spawn_error(&self.ffmpeg_path, e))?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| PipelineError::Transcode("Failed to capture ffmpeg stderr".to_string()))?;

        let reader_progress = progress.clone();
        let reader = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);
            let mut last = 0.0f32;

            while let Ok(Some(line)) = lines.next_line().await {
                if let Some(fraction) = parse_progress(&line, total_duration) {
                    // Update every 1%
                    if fraction - last > 0.01 {
                        last = fraction;
                        reader_progress(fraction);
                    }
                }
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
            tail
        });

        let status = child
            .wait()
            .await
            .map_err(|e| PipelineError::Transcode(format!("ffmpeg process failed: {}", e)))?;
        let tail = reader.await.unwrap_or_default();

        if !status.success() {
            let detail: Vec<String> = tail.into_iter().collect();
            return Err(PipelineError::Transcode(format!(
                "ffmpeg exited with {}: {}",
                status,
                detail.join(" | ")
            )));
        }

        progress(1.0);
        Ok(())
    }

    fn spawn_error(&self, program: &str, e: std::io::Error) -> PipelineError {
        if e.kind() == std::io::ErrorKind::NotFound {
            PipelineError::TranscoderNotFound(program.to_string())
        } else {
            PipelineError::Transcode(format!("Failed to execute {}: {}", program, e))
        }
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn probe(&self, input: &Path) -> Result<SourceInfo> {
        let output = Command::new(&self.ffprobe_path)
            .arg("-v")
            .arg("quiet")
            .arg("-print_format")
            .arg("json")
            .arg("-show_streams")
            .arg("-show_format")
            .arg(input.as_os_str())
            .output()
            .await
            .map_err(|e| self.spawn_error(&self.ffprobe_path, e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PipelineError::permanent(
                format!("ffprobe rejected {}: {}", input.display(), stderr.trim()),
                None,
            ));
        }

        let json = String::from_utf8_lossy(&output.stdout);
        parse_ffprobe_output(&json)
    }

    async fn transcode(
        &self,
        input: &Path,
        output: &Path,
        profile: &QualityProfile,
        source: &SourceInfo,
        progress: ProgressCallback,
    ) -> Result<()> {
        if !input.exists() {
            return Err(PipelineError::FileIoError(format!(
                "{}: Input file does not exist",
                input.display()
            )));
        }
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                PipelineError::FileIoError(format!("create_dir: {} - {}", parent.display(), e))
            })?;
        }

        let args = Self::build_args(input, output, profile);
        tracing::debug!(quality = %profile.name, args = ?args, "running ffmpeg");

        if let Err(e) = self.execute(&args, source.duration_seconds, progress).await {
            let _ = tokio::fs::remove_file(output).await;
            return Err(e);
        }

        if !output.exists() {
            return Err(PipelineError::Transcode(
                "Output file was not created".to_string(),
            ));
        }

        Ok(())
    }
}

/// Parse ffmpeg's `time=HH:MM:SS.ss` status into a fraction of `total_duration`
fn parse_progress(line: &str, total_duration: f64) -> Option<f32> {
    if total_duration <= 0.0 {
        return None;
    }
    let elapsed = parse_time(line)?;
    Some((elapsed / total_duration).min(1.0) as f32)
}

/// Seconds encoded in the first `time=` field of a status line
fn parse_time(line: &str) -> Option<f64> {
    let caps = TIME_RE.captures(line)?;
    let hours: f64 = caps.get(1)?.as_str().parse().ok()?;
    let minutes: f64 = caps.get(2)?.as_str().parse().ok()?;
    let seconds: f64 = caps.get(3)?.as_str().parse().ok()?;
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quality::QualityName;
    use std::path::PathBuf;

    fn args_for(quality: QualityName) -> Vec<String> {
        FfmpegTranscoder::build_args(
            &PathBuf::from("/tmp/src.mp4"),
            &PathBuf::from("/tmp/out.mp4"),
            quality.profile(),
        )
    }

    fn value_after<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
        args.iter()
            .position(|a| a == flag)
            .and_then(|i| args.get(i + 1))
            .map(String::as_str)
    }

    #[test]
    fn test_medium_args() {
        let args = args_for(QualityName::Medium);
        assert_eq!(value_after(&args, "-c:v"), Some("libx264"));
        assert_eq!(value_after(&args, "-preset"), Some("fast"));
        assert_eq!(value_after(&args, "-b:v"), Some("500k"));
        assert_eq!(value_after(&args, "-maxrate"), Some("500k"));
        assert_eq!(value_after(&args, "-bufsize"), Some("1000k"));
        assert_eq!(value_after(&args, "-s"), Some("854x480"));
        assert_eq!(value_after(&args, "-r"), Some("24"));
        assert_eq!(value_after(&args, "-pix_fmt"), Some("yuv420p"));
        assert_eq!(value_after(&args, "-profile:v"), Some("baseline"));
        assert_eq!(value_after(&args, "-level"), Some("3.0"));
        assert_eq!(value_after(&args, "-b:a"), Some("96k"));
        assert_eq!(value_after(&args, "-movflags"), Some("+faststart"));
        assert_eq!(args.last().map(String::as_str), Some("/tmp/out.mp4"));
    }

    #[test]
    fn test_ultra_low_is_unconstrained() {
        let args = args_for(QualityName::UltraLow);
        assert_eq!(value_after(&args, "-b:v"), Some("100k"));
        assert!(!args.iter().any(|a| a == "-maxrate" || a == "-bufsize"));
        assert_eq!(value_after(&args, "-r"), Some("15"));
    }

    #[test]
    fn test_audio_only_drops_video() {
        let args = args_for(QualityName::AudioOnly);
        assert!(args.iter().any(|a| a == "-vn"));
        assert!(!args.iter().any(|a| a == "-c:v" || a == "-s"));
        assert_eq!(value_after(&args, "-c:a"), Some("aac"));
        assert_eq!(value_after(&args, "-b:a"), Some("64k"));
    }

    #[test]
    fn test_parse_time() {
        assert_eq!(parse_time("time=00:00:30.50"), Some(30.5));
        assert_eq!(parse_time("size=1kB time=01:30:00.00 bitrate=1.0"), Some(5400.0));
        assert_eq!(parse_time("time=N/A bitrate=N/A"), None);
    }

    #[test]
    fn test_parse_progress() {
        let line = "frame=1234 fps=100 q=28.0 size=1024kB time=00:01:23.45 bitrate=64.0kbits/s speed=2.0x";
        let p = parse_progress(line, 600.0).unwrap();
        assert!((p - 0.1391).abs() < 0.01);
        assert_eq!(parse_progress("time=00:20:00.00", 600.0), Some(1.0));
        assert_eq!(parse_progress(line, 0.0), None);
    }

    #[tokio::test]
    async fn test_missing_binary_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.mp4");
        tokio::fs::write(&input, b"x").await.unwrap();

        let transcoder = FfmpegTranscoder::new(
            "/nonexistent/bin/ffmpeg-offline-test",
            "/nonexistent/bin/ffprobe-offline-test",
        );
        let err = transcoder.probe(&input).await.unwrap_err();
        assert!(matches!(err, PipelineError::TranscoderNotFound(_)));

        let source = SourceInfo {
            has_video: true,
            width: Some(640),
            height: Some(360),
            duration_seconds: 1.0,
        };
        let err = transcoder
            .transcode(
                &input,
                &dir.path().join("out.mp4"),
                crate::quality::QualityName::Low.profile(),
                &source,
                std::sync::Arc::new(|_| {}),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::TranscoderNotFound(_)));
        assert!(!err.is_retryable());
    }
}
