//! Job context -- queued job description and per-job shared state.

use crate::types::{
    BatchId, ConversionSettings, Event, GalleryId, JobId, JobResult, JobStatus, ProgressSnapshot,
};
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use super::super::GalleryDownloader;
use super::super::queue_processor::GallerySlot;

/// Where a job's page list comes from
#[derive(Clone, Debug)]
pub(crate) enum JobSource {
    /// Ask the metadata oracle
    Resolve,
    /// Known pages of an earlier job (retrying just the missing ones)
    Pages {
        title: Option<String>,
        target_dir: PathBuf,
        /// (index, url) pairs
        pages: Vec<(usize, String)>,
    },
}

/// A job waiting in the FIFO queue
pub(crate) struct QueuedJob {
    pub(crate) job_id: JobId,
    pub(crate) batch_id: BatchId,
    pub(crate) gallery_id: GalleryId,
    pub(crate) source: JobSource,
    pub(crate) conversion: Option<ConversionSettings>,
    pub(crate) download_dir: PathBuf,
    pub(crate) cancel: CancellationToken,
    pub(crate) results: mpsc::UnboundedSender<JobResult>,
    pub(crate) created_at: DateTime<Utc>,
}

/// Shared context for a single running job, reducing parameter passing between helpers.
pub(crate) struct JobContext {
    pub(crate) downloader: GalleryDownloader,
    pub(crate) queued: QueuedJob,
    /// Held while the job counts against the gallery cap
    pub(crate) slot: Option<GallerySlot>,
}

impl JobContext {
    pub(crate) fn job_id(&self) -> JobId {
        self.queued.job_id
    }

    pub(crate) fn cancel(&self) -> &CancellationToken {
        &self.queued.cancel
    }

    pub(crate) fn emit(&self, event: Event) {
        self.downloader.emit_event(event);
    }

    /// Release the gallery slot so the next queued job can start
    pub(super) fn release_slot(&mut self) {
        self.slot.take();
    }

    pub(super) async fn set_status(&self, status: JobStatus) {
        let mut active = self.downloader.queue_state.active.lock().await;
        if let Some(job) = active.get_mut(&self.queued.job_id) {
            job.status = status;
        }
    }

    pub(super) async fn register_progress(&self, rx: watch::Receiver<ProgressSnapshot>) {
        let mut active = self.downloader.queue_state.active.lock().await;
        if let Some(job) = active.get_mut(&self.queued.job_id) {
            job.progress = Some(rx);
        }
    }
}
