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


//! Error types for the offline content pipeline
//!
//! Errors are grouped by the pipeline stage that raises them. The queue
//! manager only cares about four outcomes of a job, and the helpers at the
//! bottom of this file map every variant onto one of them:
//!
//! - **Transient fetch** (timeouts, connection resets, remote 5xx) - the entry
//!   goes back to `pending` while retries remain
//! - **Permanent content** (404, malformed media, missing source URL) - the
//!   entry fails immediately
//! - **Transcode** (ffmpeg exited non-zero) - retried like a transient fetch,
//!   since it is usually resource contention
//! - **Cancellation** - always terminal, never retried

use thiserror::Error;

/// Result type alias using [`PipelineError`]
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Main error type for the pipeline
#[derive(Error, Debug)]
pub enum PipelineError {
    // ===== Fetch Errors =====

    /// Network failure that may succeed on a later attempt
    #[error("Transient fetch error: {message}")]
    TransientFetch {
        message: String,
        /// HTTP status code if the remote answered
        status_code: Option<u16>,
    },

    /// The remote content can never be fetched as-is (404, 410, malformed media)
    #[error("Permanent content error: {message}")]
    PermanentContent {
        message: String,
        /// HTTP status code if the remote answered
        status_code: Option<u16>,
    },

    /// Source URL failed to parse or uses an unsupported scheme
    #[error("Invalid source URL: {0}")]
    InvalidSourceUrl(String),

    // ===== Transcode Errors =====

    /// The transcoder ran but did not produce a usable output
    #[error("Transcode failed: {0}")]
    Transcode(String),

    /// ffmpeg or ffprobe binary could not be executed
    #[error("Transcoder binary not found: {0}")]
    TranscoderNotFound(String),

    // ===== Queue Errors =====

    /// Queue entry does not exist
    #[error("Queue entry not found: {0}")]
    QueueEntryNotFound(String),

    /// Content item does not exist in the catalog collaborator's table
    #[error("Content not found: {0}")]
    ContentNotFound(String),

    /// Operation is not valid for the entry's current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Operation was cancelled by the user or by shutdown
    #[error("Operation cancelled")]
    Cancelled,

    // ===== Configuration/Storage Errors =====

    /// Configuration is invalid or incomplete
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Generic file I/O error with context
    #[error("File I/O error: {0}")]
    FileIoError(String),

    /// Database schema migration failed
    #[error("Database migration failed: {0}")]
    MigrationFailed(String),

    /// Stored value could not be decoded into a domain type
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Generic input validation error
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // ===== External Library Errors =====

    /// HTTP client error from reqwest
    #[error("HTTP client error: {0}")]
    ReqwestError(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON serialization error: {0}")]
    SerdeJsonError(#[from] serde_json::Error),

    /// Database driver error from sqlx
    #[error("Database error: {0}")]
    SqlxError(#[from] sqlx::Error),

    /// Standard I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Image decode or encode failure
    #[error("Image error: {0}")]
    ImageError(#[from] image::ImageError),
}

impl From<url::ParseError> for PipelineError {
    fn from(err: url::ParseError) -> Self {
        PipelineError::InvalidSourceUrl(err.to_string())
    }
}

impl From<std::num::ParseIntError> for PipelineError {
    fn from(err: std::num::ParseIntError) -> Self {
        PipelineError::InvalidInput(format!("Failed to parse integer: {}", err))
    }
}

impl PipelineError {
    /// Create a TransientFetch error
    pub fn transient<S: Into<String>>(message: S, status_code: Option<u16>) -> Self {
        PipelineError::TransientFetch {
            message: message.into(),
            status_code,
        }
    }

    /// Create a PermanentContent error
    pub fn permanent<S: Into<String>>(message: S, status_code: Option<u16>) -> Self {
        PipelineError::PermanentContent {
            message: message.into(),
            status_code,
        }
    }

    /// Classify an HTTP status returned by a media source.
    ///
    /// 408, 429 and every 5xx are worth retrying; anything else outside the
    /// 2xx range means the source will not change by asking again.
    pub fn from_status(status: u16, url: &str) -> Self {
        let message = format!("HTTP {} from {}", status, url);
        match status {
            408 | 429 | 500..=599 => PipelineError::transient(message, Some(status)),
            _ => PipelineError::permanent(message, Some(status)),
        }
    }

    /// Map a reqwest failure onto the fetch taxonomy
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            let url = err.url().map(|u| u.to_string()).unwrap_or_default();
            return Self::from_status(status.as_u16(), &url);
        }
        if err.is_builder() {
            return PipelineError::InvalidSourceUrl(err.to_string());
        }
        // Timeouts, connect failures, resets and body decode errors
        PipelineError::transient(err.to_string(), None)
    }

    /// Check if a failed job should be returned to `pending`
    pub fn is_retryable(&self) -> bool {
        match self {
            PipelineError::TransientFetch { .. } | PipelineError::Transcode(_) => true,
            PipelineError::ReqwestError(e) => !e.is_builder() && e.status().map_or(true, |s| {
                s.is_server_error() || s.as_u16() == 408 || s.as_u16() == 429
            }),
            PipelineError::IoError(_) | PipelineError::FileIoError(_) => true,
            _ => false,
        }
    }

    /// Check if the error is the result of an explicit cancellation
    pub fn is_cancellation(&self) -> bool {
        matches!(self, PipelineError::Cancelled)
    }

    /// Check if the error means the content itself is unusable
    pub fn is_permanent(&self) -> bool {
        !self.is_cancellation() && !self.is_retryable()
    }

    /// Short category label for structured logging
    pub fn category(&self) -> &'static str {
        match self {
            PipelineError::TransientFetch { .. } | PipelineError::ReqwestError(_) => "fetch",
            PipelineError::PermanentContent { .. }
            | PipelineError::InvalidSourceUrl(_)
            | PipelineError::ContentNotFound(_) => "content",
            PipelineError::Transcode(_)
            | PipelineError::TranscoderNotFound(_)
            | PipelineError::ImageError(_) => "transcode",
            PipelineError::Cancelled => "cancelled",
            PipelineError::SqlxError(_) | PipelineError::MigrationFailed(_) => "database",
            PipelineError::IoError(_) | PipelineError::FileIoError(_) => "io",
            _ => "other",
        }
    }

    /// Get a message suitable for the queue status shown to learners
    pub fn user_message(&self) -> String {
        match self {
            PipelineError::TransientFetch { .. } => {
                "The content server could not be reached. The download will be retried.".to_string()
            }
            PipelineError::PermanentContent { status_code: Some(404), .. } => {
                "This content is no longer available from its source.".to_string()
            }
            PipelineError::TranscoderNotFound(binary) => {
                format!("{} is required but was not found. Please install FFmpeg.", binary)
            }
            PipelineError::Cancelled => "Download cancelled.".to_string(),
            _ => self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(PipelineError::from_status(503, "http://x").is_retryable());
        assert!(PipelineError::from_status(429, "http://x").is_retryable());
        assert!(!PipelineError::from_status(404, "http://x").is_retryable());
        assert!(PipelineError::from_status(404, "http://x").is_permanent());
        assert!(PipelineError::from_status(403, "http://x").is_permanent());
    }

    #[test]
    fn test_transcode_is_retryable() {
        assert!(PipelineError::Transcode("exit status 1".into()).is_retryable());
        assert!(!PipelineError::TranscoderNotFound("ffmpeg".into()).is_retryable());
    }

    #[test]
    fn test_cancellation_is_neither_retryable_nor_permanent() {
        let err = PipelineError::Cancelled;
        assert!(err.is_cancellation());
        assert!(!err.is_retryable());
        assert!(!err.is_permanent());
    }

    #[test]
    fn test_user_message_for_missing_content() {
        let err = PipelineError::permanent("HTTP 404 from http://x", Some(404));
        assert_eq!(err.user_message(), "This content is no longer available from its source.");
    }
}
