//! Core types for gallery-dl-core

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{ConversionErrorKind, Error, FetchError, Result};
use crate::profile::{PerformanceProfile, ProfileMode};

/// Source-specific gallery identifier (e.g. a numeric id or a gallery URL)
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GalleryId(pub String);

impl GalleryId {
    /// Create a new GalleryId
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the identifier as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for GalleryId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for GalleryId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for GalleryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Unique identifier for a gallery job within one downloader instance
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub u64);

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a submitted batch
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(pub u64);

impl std::fmt::Display for BatchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Gallery job status
///
/// Transitions only move forward; `Done`, `Failed` and `PartiallyFailed`
/// are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for a gallery slot
    Queued,
    /// Resolving metadata and fetching pages
    Fetching,
    /// All pages fetched, conversion running
    Converting,
    /// Every page fetched
    Done,
    /// No page fetched (or metadata unavailable, or cancelled)
    Failed,
    /// Some pages fetched, at least one failed permanently
    PartiallyFailed,
}

impl JobStatus {
    /// Convert integer status code to JobStatus
    pub fn from_i32(status: i32) -> Self {
        match status {
            0 => JobStatus::Queued,
            1 => JobStatus::Fetching,
            2 => JobStatus::Converting,
            3 => JobStatus::Done,
            4 => JobStatus::Failed,
            5 => JobStatus::PartiallyFailed,
            _ => JobStatus::Failed, // Default to Failed for unknown status
        }
    }

    /// Convert JobStatus to integer status code
    pub fn to_i32(&self) -> i32 {
        match self {
            JobStatus::Queued => 0,
            JobStatus::Fetching => 1,
            JobStatus::Converting => 2,
            JobStatus::Done => 3,
            JobStatus::Failed => 4,
            JobStatus::PartiallyFailed => 5,
        }
    }

    /// Whether the job can no longer change status
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Done | JobStatus::Failed | JobStatus::PartiallyFailed
        )
    }

    /// Whether moving from `self` to `next` is a legal forward transition
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        match (self, next) {
            (Queued, Fetching) | (Queued, Failed) => true,
            (Fetching, Converting) | (Fetching, Done) => true,
            (Fetching, Failed) | (Fetching, PartiallyFailed) => true,
            (Converting, Done) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            JobStatus::Queued => "queued",
            JobStatus::Fetching => "fetching",
            JobStatus::Converting => "converting",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
            JobStatus::PartiallyFailed => "partially_failed",
        };
        f.write_str(name)
    }
}

/// Page fetch status
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageStatus {
    /// Not yet handed to the transfer engine
    #[default]
    Pending,
    /// Transfer in progress (or waiting for a retry)
    InFlight,
    /// Page written to its local path
    Succeeded,
    /// Page failed permanently
    Failed,
}

/// One page of a gallery
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PageTask {
    /// 0-based position; defines output order
    pub index: usize,
    /// Remote image URL
    pub url: String,
    /// Destination on disk
    pub local_path: PathBuf,
    /// Current status
    pub status: PageStatus,
    /// Number of fetch attempts made so far
    pub attempts: u32,
    /// Most recent failure, if any
    pub last_error: Option<FetchError>,
    /// Bytes written by the successful attempt
    pub bytes: u64,
}

impl PageTask {
    /// Create a pending page task
    pub fn new(index: usize, url: impl Into<String>, local_path: impl Into<PathBuf>) -> Self {
        Self {
            index,
            url: url.into(),
            local_path: local_path.into(),
            status: PageStatus::Pending,
            attempts: 0,
            last_error: None,
            bytes: 0,
        }
    }

    /// Whether the task has reached a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self.status, PageStatus::Succeeded | PageStatus::Failed)
    }
}

/// A gallery being downloaded
///
/// Owned by the job task that runs it; the profile is captured at admission
/// and never changes afterwards.
#[derive(Clone, Debug)]
pub struct GalleryJob {
    /// Job identifier
    pub id: JobId,
    /// Gallery identifier this job was created for
    pub gallery_id: GalleryId,
    /// Title reported by the metadata oracle
    pub title: Option<String>,
    /// Gallery URL reported by the metadata oracle
    pub source_url: Option<String>,
    /// Directory the pages are written to
    pub target_dir: PathBuf,
    /// Pages in index order
    pub pages: Vec<PageTask>,
    /// Current status
    pub status: JobStatus,
    /// Concurrency limits captured at admission
    pub profile: PerformanceProfile,
    /// When the job was created
    pub created_at: DateTime<Utc>,
    /// When the job reached a terminal status
    pub finished_at: Option<DateTime<Utc>>,
}

impl GalleryJob {
    /// Create a queued job
    pub fn new(id: JobId, gallery_id: GalleryId, profile: PerformanceProfile) -> Self {
        Self {
            id,
            gallery_id,
            title: None,
            source_url: None,
            target_dir: PathBuf::new(),
            pages: Vec::new(),
            status: JobStatus::Queued,
            profile,
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Move the job forward, stamping `finished_at` on terminal states
    pub fn advance(&mut self, next: JobStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(Error::InvalidStateTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        if next.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Status implied by the page outcomes once every page is terminal
    ///
    /// `Done` requires every page to have succeeded; any success mixed with a
    /// failure gives `PartiallyFailed`; no success at all gives `Failed`.
    pub fn fetch_outcome(&self) -> JobStatus {
        let succeeded = self.pages_succeeded();
        if self.pages.is_empty() || succeeded == 0 {
            JobStatus::Failed
        } else if succeeded == self.pages.len() {
            JobStatus::Done
        } else {
            JobStatus::PartiallyFailed
        }
    }

    /// Number of pages that succeeded
    pub fn pages_succeeded(&self) -> usize {
        self.pages
            .iter()
            .filter(|p| p.status == PageStatus::Succeeded)
            .count()
    }

    /// Whether every page has a terminal status
    pub fn all_pages_terminal(&self) -> bool {
        self.pages.iter().all(PageTask::is_terminal)
    }

    /// Local paths of succeeded pages, in index order
    pub fn ordered_page_paths(&self) -> Vec<PathBuf> {
        let mut pages: Vec<&PageTask> = self
            .pages
            .iter()
            .filter(|p| p.status == PageStatus::Succeeded)
            .collect();
        pages.sort_by_key(|p| p.index);
        pages.into_iter().map(|p| p.local_path.clone()).collect()
    }

    /// Total bytes written for succeeded pages
    pub fn bytes_written(&self) -> u64 {
        self.pages
            .iter()
            .filter(|p| p.status == PageStatus::Succeeded)
            .map(|p| p.bytes)
            .sum()
    }

    /// Per-page failure list for retrying just the missing pages later
    pub fn page_failures(&self) -> Vec<PageFailure> {
        self.pages
            .iter()
            .filter(|p| p.status == PageStatus::Failed)
            .map(|p| PageFailure {
                index: p.index,
                url: p.url.clone(),
                reason: p.last_error.clone().unwrap_or(FetchError::Cancelled),
                attempts: p.attempts,
            })
            .collect()
    }
}

/// Why a gallery job failed as a whole
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum JobFailureReason {
    /// The metadata oracle could not resolve the gallery
    MetadataUnavailable {
        /// Oracle error message
        message: String,
    },
    /// The batch was cancelled before the job finished
    Cancelled,
    /// Every page failed
    AllPagesFailed,
    /// The job's task ended without reporting a result
    Aborted {
        /// Why the task ended
        message: String,
    },
}

/// A page that failed permanently
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageFailure {
    /// Page index
    pub index: usize,
    /// Remote URL
    pub url: String,
    /// Last error observed
    pub reason: FetchError,
    /// Attempts made
    pub attempts: u32,
}

/// Output kind produced by the conversion pipeline
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversionFormat {
    /// Page-ordered zip container (.cbz)
    #[default]
    ArchiveBundle,
    /// Single multi-page document (.pdf)
    PaginatedDocument,
}

impl ConversionFormat {
    /// File extension used for default output paths
    pub fn extension(&self) -> &'static str {
        match self {
            ConversionFormat::ArchiveBundle => "cbz",
            ConversionFormat::PaginatedDocument => "pdf",
        }
    }

    /// Stable name used for storage
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversionFormat::ArchiveBundle => "archive_bundle",
            ConversionFormat::PaginatedDocument => "paginated_document",
        }
    }
}

impl std::str::FromStr for ConversionFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "archive_bundle" | "cbz" | "zip" => Ok(ConversionFormat::ArchiveBundle),
            "paginated_document" | "pdf" => Ok(ConversionFormat::PaginatedDocument),
            other => Err(Error::NotSupported(format!(
                "unknown conversion format '{other}'"
            ))),
        }
    }
}

impl std::fmt::Display for ConversionFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Conversion options attached to a batch
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionSettings {
    /// Output kind
    pub format: ConversionFormat,
    /// Encoder quality, clamped to 1-100
    pub quality: u8,
    /// Remove page files after a verified conversion
    pub delete_source: bool,
    /// Replace an existing output file
    pub overwrite: bool,
}

impl Default for ConversionSettings {
    fn default() -> Self {
        Self {
            format: ConversionFormat::ArchiveBundle,
            quality: 100,
            delete_source: false,
            overwrite: false,
        }
    }
}

/// Options for [`submit`](crate::GalleryDownloader::submit)
#[derive(Clone, Debug, Default)]
pub struct SubmitOptions {
    /// Re-download galleries already recorded as done in history
    pub force: bool,
    /// Convert finished galleries (falls back to the auto-convert config when None)
    pub conversion: Option<ConversionSettings>,
    /// Override the configured download directory
    pub download_dir: Option<PathBuf>,
}

/// What happened to a finished gallery's conversion
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ConversionOutcome {
    /// Output written and verified
    Converted {
        /// Output kind
        format: ConversionFormat,
        /// Output file
        output_path: PathBuf,
        /// Size of the output file
        bytes_written: u64,
        /// Whether the page files were removed
        source_deleted: bool,
    },
    /// Conversion failed; the downloaded pages are untouched
    Failed {
        /// Output kind
        format: ConversionFormat,
        /// Failure kind
        kind: ConversionErrorKind,
        /// Failure detail
        message: String,
    },
}

/// Terminal report for one gallery job
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobResult {
    /// Job identifier
    pub job_id: JobId,
    /// Gallery identifier
    pub gallery_id: GalleryId,
    /// Gallery title, when metadata resolved
    pub title: Option<String>,
    /// Terminal status
    pub status: JobStatus,
    /// Directory holding the pages
    pub target_dir: Option<PathBuf>,
    /// Number of pages in the gallery
    pub pages_total: usize,
    /// Number of pages fetched
    pub pages_succeeded: usize,
    /// Pages that failed permanently
    pub failures: Vec<PageFailure>,
    /// Job-level failure cause
    pub failure_reason: Option<JobFailureReason>,
    /// Conversion result, when a conversion ran
    pub conversion: Option<ConversionOutcome>,
    /// Non-fatal problems (e.g. history write failures)
    pub warnings: Vec<String>,
    /// When the job reached its terminal status
    pub finished_at: DateTime<Utc>,
}

impl JobResult {
    /// Whether every page was fetched
    pub fn is_success(&self) -> bool {
        self.status == JobStatus::Done
    }
}

/// Snapshot of one job's progress
///
/// Produced by the progress aggregator; never persisted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    /// Job identifier
    pub job_id: JobId,
    /// Bytes transferred so far
    pub bytes_done: u64,
    /// Total bytes, when every page size is known
    pub bytes_total: Option<u64>,
    /// Pages with a terminal outcome
    pub files_done: usize,
    /// Pages in the job
    pub files_total: usize,
    /// Moving-average speed in bytes per second
    pub speed_bps: u64,
    /// Estimated time remaining, None when unknown
    #[serde(with = "optional_secs")]
    pub eta: Option<Duration>,
}

impl ProgressSnapshot {
    /// Fraction of pages with a terminal outcome (0.0 to 1.0)
    pub fn fraction(&self) -> f64 {
        if self.files_total == 0 {
            return 0.0;
        }
        self.files_done as f64 / self.files_total as f64
    }
}

/// Why a submitted identifier was not turned into a job
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// A job for this gallery is already queued or fetching
    AlreadyActive,
    /// History records a successful download (use `force` to override)
    AlreadyDownloaded,
    /// The identifier appears earlier in the same batch
    DuplicateInBatch,
}

/// A deduplicated submission
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    /// The rejected identifier
    pub gallery_id: GalleryId,
    /// Why it was rejected
    pub reason: RejectReason,
}

/// A queued or running job, as reported by
/// [`active_jobs`](crate::GalleryDownloader::active_jobs)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveJobInfo {
    /// Job ID
    pub job_id: JobId,
    /// Batch the job belongs to
    pub batch_id: BatchId,
    /// Gallery identifier
    pub gallery_id: GalleryId,
    /// Current status
    pub status: JobStatus,
}

/// Overall result of a batch, mapped to a process exit code by callers
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchOutcome {
    /// Every job finished Done
    Success,
    /// Some jobs failed or were partial
    PartialSuccess,
    /// No job fetched any page
    TotalFailure,
    /// The batch was cancelled
    Cancelled,
}

impl BatchOutcome {
    /// Classify a finished batch
    pub fn from_results(results: &[JobResult], cancelled: bool) -> Self {
        if cancelled {
            return BatchOutcome::Cancelled;
        }
        let done = results.iter().filter(|r| r.is_success()).count();
        let any_pages = results.iter().any(|r| r.pages_succeeded > 0);
        if done == results.len() {
            BatchOutcome::Success
        } else if !any_pages {
            BatchOutcome::TotalFailure
        } else {
            BatchOutcome::PartialSuccess
        }
    }

    /// Conventional process exit code
    pub fn exit_code(&self) -> i32 {
        match self {
            BatchOutcome::Success => 0,
            BatchOutcome::PartialSuccess => 1,
            BatchOutcome::TotalFailure => 2,
            BatchOutcome::Cancelled => 130,
        }
    }
}

/// Event emitted by the downloader
///
/// Subscribe via [`GalleryDownloader::subscribe`](crate::GalleryDownloader::subscribe).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Gallery job created and waiting for a slot
    Queued {
        /// Job ID
        job_id: JobId,
        /// Batch the job belongs to
        batch_id: BatchId,
        /// Gallery identifier
        gallery_id: GalleryId,
    },

    /// Submission deduplicated
    Rejected {
        /// Batch the identifier was submitted with
        batch_id: BatchId,
        /// Gallery identifier
        gallery_id: GalleryId,
        /// Why
        reason: RejectReason,
    },

    /// Metadata resolved, pages being fetched
    Started {
        /// Job ID
        job_id: JobId,
        /// Gallery identifier
        gallery_id: GalleryId,
        /// Gallery title
        title: String,
        /// Number of pages
        pages: usize,
    },

    /// Progress update for a job
    Progress(ProgressSnapshot),

    /// A page failed transiently and will be retried
    PageRetry {
        /// Job ID
        job_id: JobId,
        /// Page index
        index: usize,
        /// Attempt that failed
        attempt: u32,
        /// Delay before the next attempt
        delay_ms: u64,
        /// The failure
        error: FetchError,
    },

    /// A page failed permanently
    PageFailed {
        /// Job ID
        job_id: JobId,
        /// Page index
        index: usize,
        /// The failure
        error: FetchError,
    },

    /// Conversion started
    Converting {
        /// Job ID
        job_id: JobId,
        /// Output kind
        format: ConversionFormat,
    },

    /// Conversion finished and verified
    ConversionComplete {
        /// Job ID
        job_id: JobId,
        /// Output file
        output_path: PathBuf,
        /// Output size
        bytes_written: u64,
    },

    /// Conversion failed; pages are untouched
    ConversionFailed {
        /// Job ID
        job_id: JobId,
        /// Failure kind
        kind: ConversionErrorKind,
        /// Failure detail
        message: String,
    },

    /// Job reached a terminal status
    Finished {
        /// Job ID
        job_id: JobId,
        /// Gallery identifier
        gallery_id: GalleryId,
        /// Terminal status
        status: JobStatus,
    },

    /// History record could not be written
    HistoryWriteFailed {
        /// Job ID
        job_id: JobId,
        /// Error message
        error: String,
    },

    /// Performance profile switched
    ProfileChanged {
        /// Preset (or custom) now active
        mode: ProfileMode,
        /// The new limits
        profile: PerformanceProfile,
    },

    /// Every job of a batch is terminal
    BatchFinished {
        /// Batch ID
        batch_id: BatchId,
        /// Overall result
        outcome: BatchOutcome,
    },

    /// Downloader shutting down
    Shutdown,
}

// Optional Duration serialization helper (whole seconds)
mod optional_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&d.as_secs()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = Option::<u64>::deserialize(deserializer)?;
        Ok(secs.map(Duration::from_secs))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn job_with(statuses: &[PageStatus]) -> GalleryJob {
        let mut job = GalleryJob::new(JobId(1), GalleryId::from("g"), PerformanceProfile::normal());
        job.pages = statuses
            .iter()
            .enumerate()
            .map(|(i, status)| {
                let mut page = PageTask::new(i, format!("https://img/{i}.jpg"), format!("/g/{i}"));
                page.status = *status;
                page
            })
            .collect();
        job
    }

    #[test]
    fn status_round_trips_through_i32() {
        for status in [
            JobStatus::Queued,
            JobStatus::Fetching,
            JobStatus::Converting,
            JobStatus::Done,
            JobStatus::Failed,
            JobStatus::PartiallyFailed,
        ] {
            assert_eq!(JobStatus::from_i32(status.to_i32()), status);
        }
        assert_eq!(JobStatus::from_i32(99), JobStatus::Failed);
    }

    #[test]
    fn terminal_statuses_cannot_move() {
        for terminal in [JobStatus::Done, JobStatus::Failed, JobStatus::PartiallyFailed] {
            for next in [
                JobStatus::Queued,
                JobStatus::Fetching,
                JobStatus::Converting,
                JobStatus::Done,
            ] {
                assert!(
                    !terminal.can_transition_to(next),
                    "{terminal} -> {next} must be rejected"
                );
            }
        }
    }

    #[test]
    fn advance_stamps_finished_at_only_when_terminal() {
        let mut job = job_with(&[]);
        job.advance(JobStatus::Fetching).unwrap();
        assert!(job.finished_at.is_none());

        job.advance(JobStatus::Done).unwrap();
        assert!(job.finished_at.is_some());

        let err = job.advance(JobStatus::Fetching).unwrap_err();
        assert!(matches!(err, Error::InvalidStateTransition { .. }));
    }

    #[test]
    fn fetch_outcome_follows_page_results() {
        use PageStatus::*;
        assert_eq!(job_with(&[Succeeded, Succeeded]).fetch_outcome(), JobStatus::Done);
        assert_eq!(
            job_with(&[Succeeded, Failed]).fetch_outcome(),
            JobStatus::PartiallyFailed
        );
        assert_eq!(job_with(&[Failed, Failed]).fetch_outcome(), JobStatus::Failed);
        assert_eq!(job_with(&[]).fetch_outcome(), JobStatus::Failed);
    }

    #[test]
    fn ordered_page_paths_follow_index_not_storage_order() {
        let mut job = job_with(&[PageStatus::Succeeded; 3]);
        job.pages.reverse();

        let paths = job.ordered_page_paths();
        assert_eq!(
            paths,
            vec![PathBuf::from("/g/0"), PathBuf::from("/g/1"), PathBuf::from("/g/2")]
        );
    }

    #[test]
    fn page_failures_carry_last_error_and_attempts() {
        let mut job = job_with(&[PageStatus::Succeeded, PageStatus::Failed]);
        job.pages[1].attempts = 4;
        job.pages[1].last_error = Some(FetchError::ServerError(503));

        let failures = job.page_failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].index, 1);
        assert_eq!(failures[0].attempts, 4);
        assert_eq!(failures[0].reason, FetchError::ServerError(503));
    }

    #[test]
    fn conversion_format_parses_aliases() {
        assert_eq!(
            "cbz".parse::<ConversionFormat>().unwrap(),
            ConversionFormat::ArchiveBundle
        );
        assert_eq!(
            "PDF".parse::<ConversionFormat>().unwrap(),
            ConversionFormat::PaginatedDocument
        );
        assert!("epub".parse::<ConversionFormat>().is_err());
    }

    fn result(status: JobStatus, succeeded: usize) -> JobResult {
        JobResult {
            job_id: JobId(1),
            gallery_id: GalleryId::from("g"),
            title: None,
            status,
            target_dir: None,
            pages_total: 5,
            pages_succeeded: succeeded,
            failures: vec![],
            failure_reason: None,
            conversion: None,
            warnings: vec![],
            finished_at: Utc::now(),
        }
    }

    #[test]
    fn batch_outcome_classification() {
        assert_eq!(
            BatchOutcome::from_results(&[result(JobStatus::Done, 5)], false),
            BatchOutcome::Success
        );
        assert_eq!(
            BatchOutcome::from_results(
                &[result(JobStatus::Done, 5), result(JobStatus::Failed, 0)],
                false
            ),
            BatchOutcome::PartialSuccess
        );
        assert_eq!(
            BatchOutcome::from_results(&[result(JobStatus::Failed, 0)], false),
            BatchOutcome::TotalFailure
        );
        assert_eq!(
            BatchOutcome::from_results(&[result(JobStatus::Done, 5)], true),
            BatchOutcome::Cancelled
        );
        assert_eq!(BatchOutcome::Cancelled.exit_code(), 130);
    }

    #[test]
    fn progress_event_serializes_with_type_tag() {
        let event = Event::Progress(ProgressSnapshot {
            job_id: JobId(7),
            bytes_done: 10,
            bytes_total: None,
            files_done: 1,
            files_total: 4,
            speed_bps: 5,
            eta: None,
        });

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "progress");
        assert_eq!(json["job_id"], 7);
        assert!(json["eta"].is_null());
    }
}
