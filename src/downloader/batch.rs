//! Batch handles -- the caller's view of one `submit` call.

use crate::types::{BatchId, BatchOutcome, Event, GalleryId, JobId, JobResult, Rejection};
use futures::Stream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::GalleryDownloader;

/// Downloader-side bookkeeping for a batch with unfinished jobs
pub(crate) struct BatchState {
    /// Parent of every job token in the batch
    pub(crate) cancel: CancellationToken,
    /// Jobs that have not reported yet
    pub(crate) remaining: usize,
    /// Terminal results seen so far
    pub(crate) results: Vec<JobResult>,
}

impl BatchState {
    pub(crate) fn new(cancel: CancellationToken, jobs: usize) -> Self {
        Self {
            cancel,
            remaining: jobs,
            results: Vec::with_capacity(jobs),
        }
    }
}

/// Summary of a finished batch
#[derive(Clone, Debug)]
pub struct BatchSummary {
    /// Batch ID
    pub batch_id: BatchId,
    /// One result per job, in completion order
    pub results: Vec<JobResult>,
    /// Identifiers that never became jobs
    pub rejected: Vec<Rejection>,
    /// Overall classification
    pub outcome: BatchOutcome,
}

/// Handle returned by [`GalleryDownloader::submit`]
///
/// Yields one [`JobResult`] per accepted job in completion order. Dropping
/// the handle does not cancel the batch.
pub struct BatchHandle {
    batch_id: BatchId,
    jobs: Vec<(JobId, GalleryId)>,
    rejected: Vec<Rejection>,
    results: mpsc::UnboundedReceiver<JobResult>,
    remaining: usize,
    collected: Vec<JobResult>,
    cancel: CancellationToken,
    downloader: GalleryDownloader,
}

impl BatchHandle {
    pub(crate) fn new(
        downloader: GalleryDownloader,
        batch_id: BatchId,
        jobs: Vec<(JobId, GalleryId)>,
        rejected: Vec<Rejection>,
        results: mpsc::UnboundedReceiver<JobResult>,
        cancel: CancellationToken,
    ) -> Self {
        let remaining = jobs.len();
        Self {
            batch_id,
            jobs,
            rejected,
            results,
            remaining,
            collected: Vec::with_capacity(remaining),
            cancel,
            downloader,
        }
    }

    /// Batch ID
    pub fn batch_id(&self) -> BatchId {
        self.batch_id
    }

    /// Accepted jobs in submission order
    pub fn jobs(&self) -> &[(JobId, GalleryId)] {
        &self.jobs
    }

    /// Identifiers rejected by deduplication
    pub fn rejected(&self) -> &[Rejection] {
        &self.rejected
    }

    /// Whether the batch has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cancel every job of this batch
    ///
    /// Queued jobs finish at once; fetching jobs abort their transfers and
    /// keep the pages already written. Each still reports a result.
    pub async fn cancel(&self) {
        if let Err(e) = self.downloader.cancel_batch(self.batch_id).await {
            tracing::debug!(batch_id = %self.batch_id, error = %e, "Batch already finished");
        }
    }

    /// Next job result, or None once every job has reported
    pub async fn next(&mut self) -> Option<JobResult> {
        if self.remaining == 0 {
            return None;
        }
        let result = self.results.recv().await?;
        self.remaining -= 1;
        self.collected.push(result.clone());
        Some(result)
    }

    /// Turn the handle into a stream of job results
    pub fn into_stream(self) -> impl Stream<Item = JobResult> {
        futures::stream::unfold(self, |mut handle| async move {
            let result = handle.next().await?;
            Some((result, handle))
        })
    }

    /// Wait for every job and summarise the batch
    pub async fn wait(mut self) -> BatchSummary {
        while self.next().await.is_some() {}

        let outcome = BatchOutcome::from_results(&self.collected, self.cancel.is_cancelled());
        BatchSummary {
            batch_id: self.batch_id,
            results: self.collected,
            rejected: self.rejected,
            outcome,
        }
    }
}

impl GalleryDownloader {
    /// Record a job result against its batch; emits `BatchFinished` after the last one
    pub(crate) async fn record_batch_result(&self, batch_id: BatchId, result: &JobResult) {
        let finished = {
            let mut batches = self.queue_state.batches.lock().await;
            let Some(state) = batches.get_mut(&batch_id) else {
                return;
            };
            state.results.push(result.clone());
            state.remaining = state.remaining.saturating_sub(1);
            if state.remaining > 0 {
                return;
            }
            batches.remove(&batch_id)
        };

        if let Some(state) = finished {
            let outcome = BatchOutcome::from_results(&state.results, state.cancel.is_cancelled());
            tracing::info!(
                batch_id = %batch_id,
                jobs = state.results.len(),
                ?outcome,
                "Batch finished"
            );
            self.emit_event(Event::BatchFinished { batch_id, outcome });
        }
    }
}
