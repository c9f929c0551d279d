//! Control operations -- cancellation, profile switching, progress and history queries.

use crate::conversion::ConversionResult;
use crate::error::{Error, Result};
use crate::history::{HistoryEntry, HistoryFilter, HistoryStats, HistoryStore};
use crate::profile::{PerformanceProfile, ProfileMode, ProfileStatus};
use crate::progress::BatchProgress;
use crate::types::{
    ActiveJobInfo, BatchId, ConversionSettings, Event, GalleryId, JobId, JobResult,
    ProgressSnapshot,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_stream::wrappers::WatchStream;

use super::batch::BatchHandle;
use super::job::{JobSource, deliver_cancelled};
use super::queue::Candidate;
use super::GalleryDownloader;

impl GalleryDownloader {
    /// Cancel every job of a batch
    ///
    /// Jobs still waiting for a slot report `Failed(Cancelled)` immediately.
    /// Fetching jobs abort their in-flight transfers; pages already written
    /// stay on disk and the job is recorded `Failed(Cancelled)`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] when the batch is unknown or already finished.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use gallery_dl_core::{GalleryDownloader, Result, types::SubmitOptions};
    /// # async fn example(downloader: GalleryDownloader) -> Result<()> {
    /// let batch = downloader.submit(["1", "2"], SubmitOptions::default()).await?;
    /// downloader.cancel_batch(batch.batch_id()).await?;
    /// let summary = batch.wait().await;
    /// assert_eq!(summary.outcome.exit_code(), 130);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn cancel_batch(&self, batch_id: BatchId) -> Result<()> {
        let token = {
            let batches = self.queue_state.batches.lock().await;
            batches
                .get(&batch_id)
                .map(|state| state.cancel.clone())
                .ok_or_else(|| Error::NotFound(format!("batch {batch_id}")))?
        };

        tracing::info!(batch_id = %batch_id, "Cancelling batch");
        token.cancel();

        let waiting = self.take_queued(|queued| queued.batch_id == batch_id).await;
        for queued in waiting {
            deliver_cancelled(self.clone(), queued).await;
        }

        Ok(())
    }

    /// Cancel a single job
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] when the job is not queued or running.
    pub async fn cancel_job(&self, job_id: JobId) -> Result<()> {
        let token = {
            let active = self.queue_state.active.lock().await;
            active
                .get(&job_id)
                .map(|job| job.cancel.clone())
                .ok_or_else(|| Error::NotFound(format!("job {job_id}")))?
        };

        tracing::info!(job_id = %job_id, "Cancelling job");
        token.cancel();

        if let Some(queued) = self
            .take_queued(|queued| queued.job_id == job_id)
            .await
            .pop()
        {
            deliver_cancelled(self.clone(), queued).await;
        }

        Ok(())
    }

    /// Switch the performance profile
    ///
    /// Only jobs admitted after the switch use the new limits; jobs already
    /// fetching keep the profile they were admitted with. A larger gallery
    /// cap takes effect immediately for queued jobs.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when a limit is zero.
    pub async fn set_profile(&self, profile: PerformanceProfile) -> Result<()> {
        profile.validate()?;

        let mode = ProfileMode::classify(
            &profile,
            &self.config.performance.normal,
            &self.config.performance.turbo,
        );
        *self.profile.write().await = profile.clone();

        tracing::info!(
            ?mode,
            max_parallel_galleries = profile.max_parallel_galleries,
            max_connections_per_server = profile.max_connections_per_server,
            max_concurrent_downloads = profile.max_concurrent_downloads,
            "Performance profile switched"
        );
        self.emit_event(Event::ProfileChanged { mode, profile });
        self.queue_state.wake.notify_one();
        Ok(())
    }

    /// Switch to a named preset
    ///
    /// `Custom` uses the configured custom limits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotSupported`] for `Custom` when no custom limits are configured.
    pub async fn set_profile_mode(&self, mode: ProfileMode) -> Result<()> {
        let performance = &self.config.performance;
        let profile = match mode {
            ProfileMode::Custom => performance.custom.clone().ok_or_else(|| {
                Error::NotSupported("no custom performance profile configured".to_string())
            })?,
            preset => performance.preset(preset),
        };
        self.set_profile(profile).await
    }

    /// The profile applied to newly admitted jobs
    pub async fn profile_status(&self) -> ProfileStatus {
        let profile = self.profile.read().await.clone();
        ProfileStatus {
            mode: ProfileMode::classify(
                &profile,
                &self.config.performance.normal,
                &self.config.performance.turbo,
            ),
            is_turbo: profile.is_turbo(),
            profile,
        }
    }

    /// Stream of progress snapshots for a fetching job
    ///
    /// Returns None when the job is unknown or has not started fetching.
    /// The stream ends when the job's fetch phase ends.
    pub async fn progress(&self, job_id: JobId) -> Option<WatchStream<ProgressSnapshot>> {
        let active = self.queue_state.active.lock().await;
        let rx = active.get(&job_id)?.progress.clone()?;
        Some(WatchStream::new(rx))
    }

    /// Latest progress snapshot of a fetching job
    pub async fn job_progress(&self, job_id: JobId) -> Option<ProgressSnapshot> {
        let active = self.queue_state.active.lock().await;
        let rx = active.get(&job_id)?.progress.as_ref()?;
        let snapshot = rx.borrow().clone();
        Some(snapshot)
    }

    /// Combined progress of a batch's fetching jobs
    pub async fn batch_progress(&self, batch_id: BatchId) -> BatchProgress {
        let active = self.queue_state.active.lock().await;
        let snapshots: Vec<ProgressSnapshot> = active
            .values()
            .filter(|job| job.batch_id == batch_id)
            .filter_map(|job| job.progress.as_ref().map(|rx| rx.borrow().clone()))
            .collect();
        BatchProgress::from_snapshots(&snapshots)
    }

    /// Jobs currently queued or running, ordered by job ID
    pub async fn active_jobs(&self) -> Vec<ActiveJobInfo> {
        let active = self.queue_state.active.lock().await;
        let mut jobs: Vec<ActiveJobInfo> = active
            .iter()
            .map(|(job_id, job)| ActiveJobInfo {
                job_id: *job_id,
                batch_id: job.batch_id,
                gallery_id: job.gallery_id.clone(),
                status: job.status,
            })
            .collect();
        jobs.sort_by_key(|job| job.job_id);
        jobs
    }

    /// Re-fetch the pages a finished job could not get
    ///
    /// The new job writes into the same directory and leaves pages that
    /// already succeeded untouched. No conversion runs afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] when the result lists no failed pages.
    pub async fn retry_pages(&self, result: &JobResult) -> Result<BatchHandle> {
        let target_dir = match &result.target_dir {
            Some(dir) if !result.failures.is_empty() => dir.clone(),
            _ => {
                return Err(Error::NotFound(format!(
                    "no failed pages to retry for job {}",
                    result.job_id
                )));
            }
        };

        let pages: Vec<(usize, String)> = result
            .failures
            .iter()
            .map(|failure| (failure.index, failure.url.clone()))
            .collect();

        tracing::info!(
            job_id = %result.job_id,
            gallery_id = %result.gallery_id,
            pages = pages.len(),
            "Retrying failed pages"
        );

        let download_dir = target_dir
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| target_dir.clone());

        self.enqueue(
            vec![Candidate {
                gallery_id: result.gallery_id.clone(),
                source: JobSource::Pages {
                    title: result.title.clone(),
                    target_dir,
                    pages,
                },
            }],
            Vec::new(),
            None,
            download_dir,
        )
        .await
    }

    /// Convert an existing directory of images
    ///
    /// Pages are taken in natural file-name order. `settings` defaults to
    /// the configured conversion defaults.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Conversion`] with the failure kind.
    pub async fn convert_directory(
        &self,
        source_dir: impl AsRef<Path>,
        settings: Option<ConversionSettings>,
        output_path: Option<PathBuf>,
    ) -> Result<ConversionResult> {
        let conversion = &self.config.conversion;
        let settings = settings.unwrap_or_else(|| ConversionSettings {
            format: conversion.default_format,
            quality: conversion.quality,
            delete_source: conversion.delete_source,
            overwrite: conversion.overwrite,
        });

        let source_dir = source_dir.as_ref();
        tracing::info!(dir = ?source_dir, format = %settings.format, "Converting directory");

        let converted = self
            .converter
            .convert_directory(source_dir, &settings, output_path)
            .await?;
        Ok(converted)
    }

    /// Query history, newest first
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotSupported`] when history is disabled.
    pub async fn query_history(
        &self,
        filter: &HistoryFilter,
        limit: usize,
    ) -> Result<Vec<HistoryEntry>> {
        self.history_store()?.query(filter, limit).await
    }

    /// Whether history records a successful download of `gallery_id`
    pub async fn is_downloaded(&self, gallery_id: &GalleryId) -> Result<bool> {
        self.history_store()?.is_downloaded(gallery_id).await
    }

    /// Aggregate history statistics
    pub async fn history_stats(&self) -> Result<HistoryStats> {
        self.history_store()?.stats().await
    }

    /// Delete every history record, returning how many were removed
    pub async fn clear_history(&self) -> Result<u64> {
        let removed = self.history_store()?.clear().await?;
        tracing::info!(removed, "History cleared");
        Ok(removed)
    }

    fn history_store(&self) -> Result<&Arc<dyn HistoryStore>> {
        self.history
            .as_ref()
            .ok_or_else(|| Error::NotSupported("history is disabled".to_string()))
    }
}
