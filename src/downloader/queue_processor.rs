//! Queue processor -- admits queued jobs under the gallery cap and spawns job tasks.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Notify;

use super::GalleryDownloader;
use super::job::{JobContext, QueuedJob, abandoned_result, run_job};
use crate::profile::PerformanceProfile;

/// One unit of the gallery cap; released on drop
pub(crate) struct GallerySlot {
    running: Arc<AtomicUsize>,
    wake: Arc<Notify>,
}

impl Drop for GallerySlot {
    fn drop(&mut self) {
        self.running.fetch_sub(1, Ordering::SeqCst);
        self.wake.notify_one();
    }
}

impl GalleryDownloader {
    /// Start the queue processor task
    ///
    /// The processor loops until shutdown:
    /// 1. Waits until a job is queued and fewer than `max_parallel_galleries`
    ///    jobs are fetching (the cap is read from the current profile each time)
    /// 2. Pops the oldest job and snapshots the current profile for it
    /// 3. Spawns the job task, which holds a [`GallerySlot`] while fetching
    pub(crate) fn start_queue_processor(&self) -> tokio::task::JoinHandle<()> {
        let downloader = self.clone();
        let wake = Arc::clone(&self.queue_state.wake);
        let shutdown = self.queue_state.shutdown.clone();

        tokio::spawn(async move {
            loop {
                if let Some((queued, profile, slot)) = downloader.admit_next().await {
                    downloader.spawn_job(queued, profile, slot);
                    continue;
                }

                tokio::select! {
                    _ = wake.notified() => {}
                    _ = shutdown.cancelled() => break,
                }
            }
            tracing::debug!("Queue processor stopped");
        })
    }

    /// Pop the oldest queued job if the gallery cap allows
    async fn admit_next(&self) -> Option<(QueuedJob, PerformanceProfile, GallerySlot)> {
        if self.queue_state.shutdown.is_cancelled() {
            return None;
        }

        let profile = self.profile.read().await.clone();
        let mut queue = self.queue_state.queue.lock().await;
        if queue.is_empty()
            || self.queue_state.running.load(Ordering::SeqCst) >= profile.max_parallel_galleries
        {
            return None;
        }

        let queued = queue.pop_front()?;
        self.queue_state.running.fetch_add(1, Ordering::SeqCst);
        let slot = GallerySlot {
            running: Arc::clone(&self.queue_state.running),
            wake: Arc::clone(&self.queue_state.wake),
        };

        tracing::debug!(
            job_id = %queued.job_id,
            gallery_id = %queued.gallery_id,
            waiting = queue.len(),
            max_parallel_galleries = profile.max_parallel_galleries,
            "Admitting gallery job"
        );

        Some((queued, profile, slot))
    }

    /// Spawn the job task plus a watcher that reports it if the task dies
    fn spawn_job(&self, queued: QueuedJob, profile: PerformanceProfile, slot: GallerySlot) {
        let job_id = queued.job_id;
        let batch_id = queued.batch_id;
        let gallery_id = queued.gallery_id.clone();
        let results = queued.results.clone();
        let downloader = self.clone();

        let ctx = JobContext {
            downloader: self.clone(),
            queued,
            slot: Some(slot),
        };
        let handle = tokio::spawn(run_job(ctx, profile));

        tokio::spawn(async move {
            if let Err(e) = handle.await {
                tracing::error!(job_id = %job_id, error = %e, "Gallery job task died");
                downloader.queue_state.active.lock().await.remove(&job_id);
                let result =
                    abandoned_result(job_id, gallery_id, format!("job task failed: {e}"));
                downloader.record_batch_result(batch_id, &result).await;
                results.send(result).ok();
            }
        });
    }
}
