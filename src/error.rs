//! Error types for gallery-dl-core
//!
//! This module provides the error taxonomy for the library:
//! - A crate-wide [`Error`] with a [`Result`] alias
//! - Page-level [`FetchError`] classification consumed by the retry policy
//! - [`ConversionError`] for the archive/document pipeline
//! - [`OracleError`] for metadata resolution failures

use crate::types::JobStatus;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for gallery-dl-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for gallery-dl-core
///
/// Each variant carries enough context to diagnose the failure without
/// consulting logs.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "download_dir")
        key: Option<String>,
    },

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Conversion pipeline error
    #[error("conversion error: {0}")]
    Conversion(#[from] ConversionError),

    /// Metadata oracle error
    #[error("metadata error: {0}")]
    Oracle(#[from] OracleError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Job, batch or record not found
    #[error("not found: {0}")]
    NotFound(String),

    /// A job status change that would move backwards or leave a terminal state
    #[error("invalid job state transition: {from} -> {to}")]
    InvalidStateTransition {
        /// Current status
        from: JobStatus,
        /// Requested status
        to: JobStatus,
    },

    /// Shutdown in progress - not accepting new batches
    #[error("shutdown in progress: not accepting new batches")]
    ShuttingDown,

    /// History record could not be persisted
    ///
    /// Non-fatal for the job that produced it; surfaced to callers as a warning.
    #[error("history write failed: {0}")]
    HistoryWriteFailed(String),

    /// External tool execution failed (aria2c, ImageMagick)
    #[error("external tool error: {0}")]
    ExternalTool(String),

    /// Operation not supported (missing binary, unsupported format)
    #[error("not supported: {0}")]
    NotSupported(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),
}

/// Failure reported by the metadata oracle
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OracleError {
    /// The gallery does not exist on the source site
    #[error("gallery not found: {0}")]
    NotFound(String),

    /// The source site failed to answer (network, parse, rate limit)
    #[error("site error: {0}")]
    SiteError(String),
}

/// Why a single page fetch failed
///
/// This is the `error_kind` carried by transfer events. Classification into
/// transient vs permanent lives in [`crate::retry`].
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FetchError {
    /// Request or transfer timed out
    #[error("timed out")]
    Timeout,

    /// Connection refused, reset, or name resolution failed
    #[error("connection error: {0}")]
    Connection(String),

    /// Server answered with a 5xx (or 429) status
    #[error("server error (HTTP {0})")]
    ServerError(u16),

    /// Resource does not exist (HTTP 404)
    #[error("not found")]
    NotFound,

    /// Access denied (HTTP 401/403)
    #[error("forbidden")]
    Forbidden,

    /// The page URL could not be parsed or uses an unsupported scheme
    #[error("malformed URL: {0}")]
    MalformedUrl(String),

    /// The transfer engine produced no output within the silence window
    #[error("transfer engine unresponsive")]
    EngineUnresponsive,

    /// The transfer engine failed for a reason we cannot classify
    #[error("transfer engine failure: {0}")]
    EngineFailure(String),

    /// Local filesystem error while writing the page
    #[error("I/O error: {0}")]
    Io(String),

    /// The enclosing job was cancelled
    #[error("cancelled")]
    Cancelled,
}

/// Machine-readable conversion failure kind
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversionErrorKind {
    /// No pages to convert
    NoPagesFound,
    /// A referenced page is missing or empty
    MissingPage,
    /// No encoder handles the requested format
    UnsupportedFormat,
    /// The encoder failed or the output did not verify
    EncodingFailed,
    /// Target exists and overwrite was not requested
    OutputPathConflict,
}

/// Conversion pipeline errors
#[derive(Debug, Error)]
pub enum ConversionError {
    /// The request referenced no pages (or the directory held no images)
    #[error("no pages found in {source_dir}")]
    NoPagesFound {
        /// Directory the pages were expected in
        source_dir: PathBuf,
    },

    /// A referenced page path does not exist or is empty
    #[error("page {path} is missing or empty")]
    MissingPage {
        /// The offending page path
        path: PathBuf,
    },

    /// No registered encoder supports the requested format
    #[error("unsupported output format: {format}")]
    UnsupportedFormat {
        /// Format name as requested
        format: String,
    },

    /// Encoding failed or the written output could not be verified
    #[error("encoding {output} failed: {reason}")]
    EncodingFailed {
        /// Output path that was being written
        output: PathBuf,
        /// The reason encoding failed
        reason: String,
    },

    /// Output file already exists and overwrite was not requested
    #[error("output {path} already exists")]
    OutputPathConflict {
        /// The conflicting output path
        path: PathBuf,
    },
}

impl ConversionError {
    /// Machine-readable kind of this error
    pub fn kind(&self) -> ConversionErrorKind {
        match self {
            ConversionError::NoPagesFound { .. } => ConversionErrorKind::NoPagesFound,
            ConversionError::MissingPage { .. } => ConversionErrorKind::MissingPage,
            ConversionError::UnsupportedFormat { .. } => ConversionErrorKind::UnsupportedFormat,
            ConversionError::EncodingFailed { .. } => ConversionErrorKind::EncodingFailed,
            ConversionError::OutputPathConflict { .. } => ConversionErrorKind::OutputPathConflict,
        }
    }
}
