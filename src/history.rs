//! History store interface
//!
//! One record is appended per terminal job, and appended before the job's
//! result is handed to the caller. Records are never updated in place.

use crate::db::Database;
use crate::error::Result;
use crate::types::{ConversionFormat, GalleryId, JobResult, JobStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Persisted outcome of one gallery job
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    /// Gallery identifier
    pub gallery_id: GalleryId,
    /// Gallery title (falls back to the identifier)
    pub title: String,
    /// Gallery URL, when known
    pub source_url: Option<String>,
    /// Directory the pages were written to
    pub download_path: Option<PathBuf>,
    /// Pages in the gallery
    pub page_count: usize,
    /// Pages fetched
    pub pages_succeeded: usize,
    /// Terminal job status
    pub status: JobStatus,
    /// When the job was created
    pub created_at: DateTime<Utc>,
    /// When the job finished
    pub finished_at: DateTime<Utc>,
    /// Output kind, when a conversion succeeded
    pub converted_format: Option<ConversionFormat>,
    /// Output file, when a conversion succeeded
    pub conversion_path: Option<PathBuf>,
    /// Conversion failure detail, when a conversion failed
    pub conversion_error: Option<String>,
    /// Bytes on disk for the gallery (pages, or the converted file)
    pub size_bytes: u64,
}

impl HistoryRecord {
    /// Build a record from a job's terminal result
    pub fn from_result(result: &JobResult, created_at: DateTime<Utc>, size_bytes: u64) -> Self {
        use crate::types::ConversionOutcome;

        let (converted_format, conversion_path, conversion_error, size_bytes) =
            match &result.conversion {
                Some(ConversionOutcome::Converted {
                    format,
                    output_path,
                    bytes_written,
                    ..
                }) => (
                    Some(*format),
                    Some(output_path.clone()),
                    None,
                    *bytes_written,
                ),
                Some(ConversionOutcome::Failed { message, .. }) => {
                    (None, None, Some(message.clone()), size_bytes)
                }
                None => (None, None, None, size_bytes),
            };

        Self {
            gallery_id: result.gallery_id.clone(),
            title: result
                .title
                .clone()
                .unwrap_or_else(|| result.gallery_id.to_string()),
            source_url: None,
            download_path: result.target_dir.clone(),
            page_count: result.pages_total,
            pages_succeeded: result.pages_succeeded,
            status: result.status,
            created_at,
            finished_at: result.finished_at,
            converted_format,
            conversion_path,
            conversion_error,
            size_bytes,
        }
    }
}

/// A stored record with its row id
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Row id
    pub id: i64,
    /// The record
    #[serde(flatten)]
    pub record: HistoryRecord,
}

/// Query filter; every set field must match
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryFilter {
    /// Case-insensitive substring of the title or gallery id
    pub text: Option<String>,
    /// Finished at or after
    pub since: Option<DateTime<Utc>>,
    /// Finished at or before
    pub until: Option<DateTime<Utc>>,
    /// Exact status
    pub status: Option<JobStatus>,
}

impl HistoryFilter {
    /// Filter matching a text fragment
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }
}

/// Aggregate counts over the history
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryStats {
    /// Number of records
    pub total_records: u64,
    /// Sum of page counts
    pub total_pages: u64,
    /// Sum of on-disk sizes
    pub total_bytes: u64,
    /// Records per terminal status
    pub by_status: HashMap<JobStatus, u64>,
    /// Records finished in the last 7 days
    pub last_7_days: u64,
}

/// Append/query contract for persisted job outcomes
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Durably append one record, returning its row id
    async fn append(&self, record: &HistoryRecord) -> Result<i64>;

    /// Records matching `filter`, newest first, at most `limit`
    async fn query(&self, filter: &HistoryFilter, limit: usize) -> Result<Vec<HistoryEntry>>;

    /// Whether a `Done` record exists for `gallery_id`
    async fn is_downloaded(&self, gallery_id: &GalleryId) -> Result<bool>;

    /// Aggregate counts
    async fn stats(&self) -> Result<HistoryStats>;

    /// Drop the oldest records beyond `max_entries`, returning how many went
    async fn prune(&self, max_entries: usize) -> Result<u64>;

    /// Delete every record, returning how many went
    async fn clear(&self) -> Result<u64>;
}

#[async_trait]
impl HistoryStore for Database {
    async fn append(&self, record: &HistoryRecord) -> Result<i64> {
        self.insert_history(record).await
    }

    async fn query(&self, filter: &HistoryFilter, limit: usize) -> Result<Vec<HistoryEntry>> {
        self.query_history(filter, limit).await
    }

    async fn is_downloaded(&self, gallery_id: &GalleryId) -> Result<bool> {
        self.history_has_done(gallery_id).await
    }

    async fn stats(&self) -> Result<HistoryStats> {
        self.history_stats().await
    }

    async fn prune(&self, max_entries: usize) -> Result<u64> {
        self.prune_history(max_entries).await
    }

    async fn clear(&self) -> Result<u64> {
        self.clear_history().await
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ConversionOutcome, JobId};

    fn result(conversion: Option<ConversionOutcome>) -> JobResult {
        JobResult {
            job_id: JobId(1),
            gallery_id: GalleryId::new("177013"),
            title: None,
            status: JobStatus::Done,
            target_dir: Some(PathBuf::from("/dl/g")),
            pages_total: 5,
            pages_succeeded: 5,
            failures: Vec::new(),
            failure_reason: None,
            conversion,
            warnings: Vec::new(),
            finished_at: Utc::now(),
        }
    }

    #[test]
    fn record_falls_back_to_id_for_title() {
        let record = HistoryRecord::from_result(&result(None), Utc::now(), 1234);
        assert_eq!(record.title, "177013");
        assert_eq!(record.size_bytes, 1234);
        assert_eq!(record.converted_format, None);
    }

    #[test]
    fn record_carries_conversion_outcome() {
        let converted = result(Some(ConversionOutcome::Converted {
            format: ConversionFormat::ArchiveBundle,
            output_path: PathBuf::from("/dl/g/g.cbz"),
            bytes_written: 900,
            source_deleted: true,
        }));
        let record = HistoryRecord::from_result(&converted, Utc::now(), 1234);
        assert_eq!(record.converted_format, Some(ConversionFormat::ArchiveBundle));
        assert_eq!(record.conversion_path, Some(PathBuf::from("/dl/g/g.cbz")));
        assert_eq!(record.size_bytes, 900);

        let failed = result(Some(ConversionOutcome::Failed {
            format: ConversionFormat::PaginatedDocument,
            kind: crate::error::ConversionErrorKind::EncodingFailed,
            message: "boom".to_string(),
        }));
        let record = HistoryRecord::from_result(&failed, Utc::now(), 1234);
        assert_eq!(record.status, JobStatus::Done);
        assert_eq!(record.conversion_error.as_deref(), Some("boom"));
        assert_eq!(record.converted_format, None);
    }
}
