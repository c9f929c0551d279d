//! Batch submission, deduplication and the FIFO job queue.

use crate::error::Result;
use crate::types::{
    BatchOutcome, ConversionSettings, Event, GalleryId, JobStatus, RejectReason, Rejection,
    SubmitOptions,
};
use chrono::Utc;
use std::collections::HashSet;
use std::path::PathBuf;
use tokio::sync::mpsc;

use super::batch::{BatchHandle, BatchState};
use super::job::{JobSource, QueuedJob, deliver_cancelled};
use super::{ActiveJob, GalleryDownloader};

/// A deduplicated identifier on its way into the queue
pub(crate) struct Candidate {
    pub(crate) gallery_id: GalleryId,
    pub(crate) source: JobSource,
}

impl GalleryDownloader {
    /// Submit a batch of gallery identifiers
    ///
    /// Each identifier becomes one job, unless it is:
    /// - repeated earlier in the same batch (`DuplicateInBatch`)
    /// - already queued or fetching (`AlreadyActive`)
    /// - recorded as done in history and `options.force` is false (`AlreadyDownloaded`)
    ///
    /// Rejections are returned synchronously on the handle. Accepted jobs wait
    /// in FIFO order for one of `max_parallel_galleries` slots; their results
    /// arrive on the handle in completion order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShuttingDown`](crate::Error::ShuttingDown) once
    /// [`shutdown`](Self::shutdown) has started.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use gallery_dl_core::{GalleryDownloader, types::SubmitOptions};
    /// # async fn run(downloader: GalleryDownloader) -> gallery_dl_core::Result<()> {
    /// let batch = downloader
    ///     .submit(["177013", "228922"], SubmitOptions::default())
    ///     .await?;
    /// let summary = batch.wait().await;
    /// std::process::exit(summary.outcome.exit_code());
    /// # }
    /// ```
    pub async fn submit<I, G>(&self, gallery_ids: I, options: SubmitOptions) -> Result<BatchHandle>
    where
        I: IntoIterator<Item = G>,
        G: Into<GalleryId>,
    {
        self.ensure_accepting()?;

        let mut rejected = Vec::new();
        let mut seen = HashSet::new();
        let mut candidates = Vec::new();

        for gallery_id in gallery_ids.into_iter().map(Into::into) {
            if !seen.insert(gallery_id.clone()) {
                rejected.push(Rejection {
                    gallery_id,
                    reason: RejectReason::DuplicateInBatch,
                });
                continue;
            }

            if !options.force && self.already_downloaded(&gallery_id).await {
                rejected.push(Rejection {
                    gallery_id,
                    reason: RejectReason::AlreadyDownloaded,
                });
                continue;
            }

            candidates.push(Candidate {
                gallery_id,
                source: JobSource::Resolve,
            });
        }

        let conversion = options
            .conversion
            .or_else(|| self.auto_convert_settings());
        let download_dir = options
            .download_dir
            .unwrap_or_else(|| self.config.download_dir().clone());

        self.enqueue(candidates, rejected, conversion, download_dir)
            .await
    }

    /// Whether history records a successful download of `gallery_id`
    ///
    /// A history lookup failure is logged and treated as "not downloaded".
    async fn already_downloaded(&self, gallery_id: &GalleryId) -> bool {
        let Some(history) = &self.history else {
            return false;
        };
        match history.is_downloaded(gallery_id).await {
            Ok(done) => done,
            Err(e) => {
                tracing::warn!(gallery_id = %gallery_id, error = %e, "History lookup failed");
                false
            }
        }
    }

    /// Conversion applied to batches that do not ask for one explicitly
    fn auto_convert_settings(&self) -> Option<ConversionSettings> {
        let conversion = &self.config.conversion;
        conversion.auto_convert.then(|| ConversionSettings {
            format: conversion.default_format,
            quality: conversion.quality,
            delete_source: conversion.delete_source,
            overwrite: conversion.overwrite,
        })
    }

    /// Register candidates as jobs and push them onto the queue
    ///
    /// The active-set check and the insert happen under one lock, so two
    /// concurrent submissions of the same gallery yield exactly one job.
    pub(crate) async fn enqueue(
        &self,
        candidates: Vec<Candidate>,
        mut rejected: Vec<Rejection>,
        conversion: Option<ConversionSettings>,
        download_dir: PathBuf,
    ) -> Result<BatchHandle> {
        self.ensure_accepting()?;

        let batch_id = self.next_batch_id();
        let batch_cancel = self.queue_state.shutdown.child_token();
        let (results_tx, results_rx) = mpsc::unbounded_channel();
        let mut jobs = Vec::new();
        let mut queued_jobs = Vec::new();

        {
            let mut active = self.queue_state.active.lock().await;
            let running: HashSet<GalleryId> =
                active.values().map(|job| job.gallery_id.clone()).collect();

            for candidate in candidates {
                if running.contains(&candidate.gallery_id) {
                    rejected.push(Rejection {
                        gallery_id: candidate.gallery_id,
                        reason: RejectReason::AlreadyActive,
                    });
                    continue;
                }

                let job_id = self.next_job_id();
                let cancel = batch_cancel.child_token();
                active.insert(
                    job_id,
                    ActiveJob {
                        batch_id,
                        gallery_id: candidate.gallery_id.clone(),
                        status: JobStatus::Queued,
                        cancel: cancel.clone(),
                        progress: None,
                    },
                );
                jobs.push((job_id, candidate.gallery_id.clone()));
                queued_jobs.push(QueuedJob {
                    job_id,
                    batch_id,
                    gallery_id: candidate.gallery_id,
                    source: candidate.source,
                    conversion: conversion.clone(),
                    download_dir: download_dir.clone(),
                    cancel,
                    results: results_tx.clone(),
                    created_at: Utc::now(),
                });
            }
        }

        for rejection in &rejected {
            tracing::info!(
                batch_id = %batch_id,
                gallery_id = %rejection.gallery_id,
                reason = ?rejection.reason,
                "Submission rejected"
            );
            self.emit_event(Event::Rejected {
                batch_id,
                gallery_id: rejection.gallery_id.clone(),
                reason: rejection.reason,
            });
        }

        if queued_jobs.is_empty() {
            self.emit_event(Event::BatchFinished {
                batch_id,
                outcome: BatchOutcome::from_results(&[], false),
            });
        } else {
            self.queue_state
                .batches
                .lock()
                .await
                .insert(batch_id, BatchState::new(batch_cancel.clone(), queued_jobs.len()));

            let mut queue = self.queue_state.queue.lock().await;
            // Shutdown drains the queue under this lock, so a push after it would never run
            if self.is_shutting_down() {
                drop(queue);
                tracing::info!(
                    batch_id = %batch_id,
                    jobs = queued_jobs.len(),
                    "Shutdown began during submission, cancelling batch"
                );
                for queued in queued_jobs {
                    deliver_cancelled(self.clone(), queued).await;
                }
            } else {
                for queued in queued_jobs {
                    self.emit_event(Event::Queued {
                        job_id: queued.job_id,
                        batch_id,
                        gallery_id: queued.gallery_id.clone(),
                    });
                    queue.push_back(queued);
                }
                drop(queue);
                self.queue_state.wake.notify_one();
            }
        }

        tracing::info!(
            batch_id = %batch_id,
            accepted = jobs.len(),
            rejected = rejected.len(),
            "Batch submitted"
        );

        Ok(BatchHandle::new(
            self.clone(),
            batch_id,
            jobs,
            rejected,
            results_rx,
            batch_cancel,
        ))
    }

    /// Remove queued (not yet admitted) jobs matching `predicate`
    pub(crate) async fn take_queued(
        &self,
        mut predicate: impl FnMut(&QueuedJob) -> bool,
    ) -> Vec<QueuedJob> {
        let mut queue = self.queue_state.queue.lock().await;
        let mut taken = Vec::new();
        let mut kept = std::collections::VecDeque::with_capacity(queue.len());
        for queued in queue.drain(..) {
            if predicate(&queued) {
                taken.push(queued);
            } else {
                kept.push_back(queued);
            }
        }
        *queue = kept;
        taken
    }

    /// Number of jobs waiting for a gallery slot
    pub async fn queued_len(&self) -> usize {
        self.queue_state.queue.lock().await.len()
    }
}
