//! Database layer for gallery-dl-core
//!
//! SQLite persistence for the gallery history.
//!
//! ## Submodules
//!
//! - [`migrations`]: database lifecycle, schema migrations
//! - [`history`]: history append, query, stats and pruning

use crate::history::{HistoryEntry, HistoryRecord};
use crate::types::{ConversionFormat, GalleryId, JobStatus};
use sqlx::{FromRow, sqlite::SqlitePool};
use std::path::PathBuf;

mod history;
mod migrations;

/// History record from database (raw from SQLite)
#[derive(Debug, Clone, FromRow)]
pub struct HistoryRow {
    /// Unique database ID
    pub id: i64,
    /// Gallery identifier
    pub gallery_id: String,
    /// Gallery title
    pub title: String,
    /// Gallery URL
    pub source_url: Option<String>,
    /// Directory the pages were written to
    pub download_path: Option<String>,
    /// Pages in the gallery
    pub page_count: i64,
    /// Pages fetched
    pub pages_succeeded: i64,
    /// Terminal status code
    pub status: i32,
    /// Unix timestamp when the job was created
    pub created_at: i64,
    /// Unix timestamp when the job finished
    pub finished_at: i64,
    /// Output kind name, when converted
    pub converted_format: Option<String>,
    /// Output file, when converted
    pub conversion_path: Option<String>,
    /// Conversion failure detail
    pub conversion_error: Option<String>,
    /// Bytes on disk
    pub size_bytes: i64,
}

impl From<HistoryRow> for HistoryEntry {
    fn from(row: HistoryRow) -> Self {
        use chrono::{TimeZone, Utc};

        let timestamp = |secs: i64| Utc.timestamp_opt(secs, 0).single().unwrap_or_else(Utc::now);

        HistoryEntry {
            id: row.id,
            record: HistoryRecord {
                gallery_id: GalleryId(row.gallery_id),
                title: row.title,
                source_url: row.source_url,
                download_path: row.download_path.map(PathBuf::from),
                page_count: row.page_count.max(0) as usize,
                pages_succeeded: row.pages_succeeded.max(0) as usize,
                status: JobStatus::from_i32(row.status),
                created_at: timestamp(row.created_at),
                finished_at: timestamp(row.finished_at),
                converted_format: row
                    .converted_format
                    .and_then(|f| f.parse::<ConversionFormat>().ok()),
                conversion_path: row.conversion_path.map(PathBuf::from),
                conversion_error: row.conversion_error,
                size_bytes: row.size_bytes.max(0) as u64,
            },
        }
    }
}

/// Database handle for gallery-dl-core
pub struct Database {
    pool: SqlitePool,
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
