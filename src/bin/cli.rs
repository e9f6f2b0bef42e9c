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

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use offline_core::logging::{self, LogFormat};
use offline_core::storage::NewContentItem;
use offline_core::transcode;
use offline_core::{
    CancelOutcome, Pipeline, PipelineConfig, Priority, QualityName, QualityRequest, QueueOutcome,
    VariantOutcome,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "offline-cli")]
#[command(about = "Offline content pipeline - operator tool", long_about = None)]
struct Cli {
    /// JSON settings file; `OFFLINE_*` environment variables are used otherwise
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler and bandwidth monitor until Ctrl-C
    Run,
    /// Register or refresh a content item
    Register {
        content_id: String,
        /// Source media URL
        url: String,
        #[arg(long, default_value = "")]
        title: String,
        #[arg(long, default_value = "videos")]
        source_type: String,
        #[arg(long, default_value_t = 0)]
        duration: i64,
    },
    /// Queue a download
    Enqueue {
        user_id: String,
        content_id: String,
        /// Quality rung; picked from measured bandwidth when omitted
        #[arg(short, long, value_parser = parse_quality)]
        quality: Option<QualityName>,
        #[arg(short, long, value_parser = parse_priority, default_value = "medium")]
        priority: Priority,
    },
    /// Show pending and downloading entries of a user
    Status {
        user_id: String,
        /// Include finished entries
        #[arg(long)]
        all: bool,
    },
    /// Cancel a queue entry
    Cancel { queue_id: String },
    /// List local variants of a content item
    Lookup {
        content_id: String,
        /// Also show which variant this user would be served
        #[arg(long)]
        user: Option<String>,
    },
    /// Delete one local variant
    Evict {
        content_id: String,
        #[arg(value_parser = parse_quality)]
        quality: QualityName,
    },
    /// Write the adaptive playlist of a content item
    Playlist { content_id: String },
    /// Measure bandwidth once and print the selected quality
    SelectQuality {
        #[arg(default_value = "operator")]
        user_id: String,
    },
    /// Measure bandwidth once
    Measure,
    /// Purge old failed entries and their temp files
    Cleanup,
    /// Write JPEG size variants of a cover image or thumbnail
    OptimizeImage { input: PathBuf, out_dir: PathBuf },
}

fn parse_quality(s: &str) -> std::result::Result<QualityName, String> {
    QualityName::from_str(s).map_err(|e| e.to_string())
}

fn parse_priority(s: &str) -> std::result::Result<Priority, String> {
    Priority::from_str(s).map_err(|e| e.to_string())
}

fn load_config(path: Option<&PathBuf>) -> Result<PipelineConfig> {
    match path {
        Some(path) => PipelineConfig::from_json_file(path)
            .with_context(|| format!("loading settings from {}", path.display())),
        None => PipelineConfig::from_env().context("reading OFFLINE_* environment"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    logging::init(if cli.json_logs { LogFormat::Json } else { LogFormat::Pretty });

    let config = load_config(cli.config.as_ref())?;
    let pipeline = Pipeline::open(config)
        .await
        .context("opening pipeline database")?;

    match cli.command {
        Commands::Run => {
            pipeline.start().await.context("starting pipeline")?;
            println!("Pipeline running, press Ctrl-C to stop");
            tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
            pipeline.shutdown().await;
        }
        Commands::Register {
            content_id,
            url,
            title,
            source_type,
            duration,
        } => {
            let mut item = NewContentItem::new(content_id.clone(), Some(url));
            item.title = title;
            item.source_type = source_type;
            item.duration_seconds = duration;
            pipeline.register_content(&item).await?;
            println!("Registered {}", content_id);
        }
        Commands::Enqueue {
            user_id,
            content_id,
            quality,
            priority,
        } => {
            let request = match quality {
                Some(q) => QualityRequest::Fixed(q),
                None => {
                    pipeline.measure_bandwidth().await;
                    QualityRequest::Auto
                }
            };
            match pipeline.queue_download(&user_id, &content_id, request, priority).await? {
                QueueOutcome::Queued {
                    queue_id,
                    quality,
                    existing,
                } => {
                    let note = if existing { " (already queued)" } else { "" };
                    println!("{} queued at {}{}", queue_id, quality, note);
                }
                QueueOutcome::ContentNotFound { content_id } => {
                    anyhow::bail!("content {} is not registered", content_id)
                }
                QueueOutcome::InvalidSource { content_id, reason } => {
                    anyhow::bail!("content {} cannot be fetched: {}", content_id, reason)
                }
            }
        }
        Commands::Status { user_id, all } => {
            let entries = if all {
                pipeline.queue().entries_for_user(&user_id).await?
            } else {
                pipeline.queue_status(&user_id).await?
            };
            if entries.is_empty() {
                println!("No entries for {}", user_id);
            }
            for entry in entries {
                println!(
                    "{}  {:<11} {:<10} {:>3}%  {:<6} retries={} {}",
                    entry.queue_id,
                    entry.status,
                    entry.quality,
                    entry.progress,
                    entry.priority,
                    entry.retry_count,
                    entry.error_message.as_deref().unwrap_or("")
                );
            }
        }
        Commands::Cancel { queue_id } => match pipeline.cancel_download(&queue_id).await? {
            CancelOutcome::Cancelled => println!("Cancelled {}", queue_id),
            CancelOutcome::AlreadyFinished => println!("{} had already finished", queue_id),
            CancelOutcome::NotFound => anyhow::bail!("no queue entry {}", queue_id),
        },
        Commands::Lookup { content_id, user } => {
            let assets = pipeline.catalog().assets(&content_id).await?;
            if assets.is_empty() {
                println!("No local variants of {}", content_id);
            }
            for asset in assets {
                println!(
                    "{:<10} {:>8.2} MB  {}",
                    asset.quality,
                    asset.size_mb,
                    asset.local_path.display()
                );
            }
            if let Some(user) = user {
                pipeline.measure_bandwidth().await;
                match pipeline.resolve_variant_for_user(&user, &content_id).await? {
                    VariantOutcome::Found(variant) => println!(
                        "Serve {} -> {} ({})",
                        user,
                        variant.local_path.display(),
                        variant.quality
                    ),
                    VariantOutcome::NoLocalVariant => println!("Nothing suitable for {}", user),
                    VariantOutcome::ContentNotFound { content_id } => {
                        anyhow::bail!("unknown content {}", content_id)
                    }
                }
            }
        }
        Commands::Evict { content_id, quality } => {
            if pipeline.catalog().evict(&content_id, quality).await? {
                println!("Evicted {} {}", content_id, quality);
            } else {
                println!("{} has no local {} variant", content_id, quality);
            }
        }
        Commands::Playlist { content_id } => {
            let path = pipeline.catalog().write_adaptive_playlist(&content_id).await?;
            println!("Wrote {}", path.display());
        }
        Commands::SelectQuality { user_id } => {
            let sample = pipeline.measure_bandwidth().await;
            let quality = pipeline.select_quality_for_user(&user_id).await;
            println!(
                "{:.0} bps ({}), selected {}",
                sample.download_bps, sample.connection, quality
            );
        }
        Commands::Measure => {
            let from = chrono::Utc::now();
            pipeline.measure_bandwidth().await;
            let report = pipeline.bandwidth_report(from, chrono::Utc::now()).await;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Cleanup => {
            let report = pipeline.cleanup_failed().await?;
            println!(
                "Removed {} failed entries and {} temp files",
                report.entries_removed, report.files_removed
            );
        }
        Commands::OptimizeImage { input, out_dir } => {
            let variants = transcode::optimize_image(&input, &out_dir)
                .await
                .with_context(|| format!("optimizing {}", input.display()))?;
            for (profile, variant) in variants {
                println!(
                    "{:<10} {}x{} {} bytes -> {}",
                    profile,
                    variant.width,
                    variant.height,
                    variant.size_bytes,
                    variant.path.display()
                );
            }
        }
    }

    Ok(())
}
