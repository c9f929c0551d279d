//! Shutdown coordination.

use crate::error::Result;
use crate::types::Event;
use std::sync::atomic::Ordering;
use std::time::Duration;

use super::GalleryDownloader;
use super::job::deliver_cancelled;

/// How long shutdown waits for running jobs to report
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

impl GalleryDownloader {
    /// Gracefully shut down the downloader
    ///
    /// This method performs a graceful shutdown sequence:
    /// 1. Stops accepting new batches
    /// 2. Cancels every batch and stops the queue processor
    /// 3. Reports queued jobs as cancelled
    /// 4. Waits for running jobs to report, with a timeout (30 seconds)
    /// 5. Closes the history database
    ///
    /// Pages already written stay on disk.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Initiating graceful shutdown");

        self.queue_state.accepting_new.store(false, Ordering::SeqCst);

        // Batch tokens are children of this one
        self.queue_state.shutdown.cancel();

        let waiting = self.take_queued(|_| true).await;
        if !waiting.is_empty() {
            tracing::info!(jobs = waiting.len(), "Cancelling queued jobs");
        }
        for queued in waiting {
            deliver_cancelled(self.clone(), queued).await;
        }

        match tokio::time::timeout(SHUTDOWN_TIMEOUT, self.wait_for_active_jobs()).await {
            Ok(()) => tracing::info!("All running jobs finished"),
            Err(_) => {
                tracing::warn!("Timeout waiting for running jobs, proceeding with shutdown")
            }
        }

        self.emit_event(Event::Shutdown);

        if let Some(db) = &self.database {
            db.close().await;
            tracing::info!("History database closed");
        }

        tracing::info!("Graceful shutdown complete");
        Ok(())
    }

    /// Whether `shutdown` has been called
    pub fn is_shutting_down(&self) -> bool {
        !self.queue_state.accepting_new.load(Ordering::SeqCst)
    }

    async fn wait_for_active_jobs(&self) {
        loop {
            let active_count = self.queue_state.active.lock().await.len();
            if active_count == 0 {
                return;
            }

            tracing::debug!(active_count, "Waiting for running jobs to finish");
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}
