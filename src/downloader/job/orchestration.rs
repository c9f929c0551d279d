//! Job orchestration -- top-level lifecycle for a single gallery.

use crate::profile::PerformanceProfile;
use crate::progress::{ProgressAggregatorParams, spawn_progress_aggregator};
use crate::types::{Event, GalleryJob, JobFailureReason, JobStatus, PageTask};
use crate::utils::{gallery_dir_name, page_file_name};

use super::context::{JobContext, JobSource};
use super::fetch::fetch_pages;
use super::finalization::finalize_job;

/// Core job task -- orchestrates the full lifecycle of one gallery.
///
/// Phases:
/// 1. Resolve the page list (metadata oracle, or the pages of an earlier job)
/// 2. Create the gallery directory
/// 3. Fetch every page through the transfer adapter, retrying transient failures
/// 4. Release the gallery slot, then convert, record history and report
pub(crate) async fn run_job(mut ctx: JobContext, profile: PerformanceProfile) {
    let mut job = GalleryJob::new(ctx.job_id(), ctx.queued.gallery_id.clone(), profile);
    job.created_at = ctx.queued.created_at;

    if ctx.cancel().is_cancelled() {
        ctx.release_slot();
        finalize_job(ctx, job, Some(JobFailureReason::Cancelled)).await;
        return;
    }

    if let Err(e) = job.advance(JobStatus::Fetching) {
        tracing::error!(job_id = %job.id, error = %e, "Job could not start");
    }
    ctx.set_status(JobStatus::Fetching).await;

    // Phase 1: page list
    if let Err(reason) = resolve_pages(&ctx, &mut job).await {
        ctx.release_slot();
        finalize_job(ctx, job, Some(reason)).await;
        return;
    }

    // Phase 2: gallery directory (pages that cannot be written fail individually)
    if let Err(e) = tokio::fs::create_dir_all(&job.target_dir).await {
        tracing::error!(
            job_id = %job.id,
            dir = ?job.target_dir,
            error = %e,
            "Failed to create gallery directory"
        );
    }

    ctx.emit(Event::Started {
        job_id: job.id,
        gallery_id: job.gallery_id.clone(),
        title: job.title.clone().unwrap_or_else(|| job.gallery_id.to_string()),
        pages: job.pages.len(),
    });

    // Phase 3: fetch
    let config = &ctx.downloader.config;
    let aggregator = spawn_progress_aggregator(ProgressAggregatorParams {
        job_id: job.id,
        files_total: job.pages.len(),
        interval: config.download.progress_interval,
        window: config.download.speed_window,
        event_tx: ctx.downloader.event_tx.clone(),
    });
    ctx.register_progress(aggregator.subscribe()).await;

    fetch_pages(&ctx, &mut job, &aggregator).await;
    aggregator.finish().await;

    tracing::info!(
        job_id = %job.id,
        gallery_id = %job.gallery_id,
        succeeded = job.pages_succeeded(),
        total = job.pages.len(),
        "Gallery fetch finished"
    );

    // Phase 4: the slot only covers fetching
    ctx.release_slot();
    finalize_job(ctx, job, None).await;
}

/// Fill in the job's title, directory and page tasks
async fn resolve_pages(
    ctx: &JobContext,
    job: &mut GalleryJob,
) -> std::result::Result<(), JobFailureReason> {
    match ctx.queued.source.clone() {
        JobSource::Resolve => {
            let oracle = &ctx.downloader.oracle;
            let resolved = tokio::select! {
                _ = ctx.cancel().cancelled() => return Err(JobFailureReason::Cancelled),
                resolved = oracle.resolve(&job.gallery_id) => resolved,
            };

            let metadata = match resolved {
                Ok(metadata) => metadata,
                Err(e) => {
                    tracing::warn!(
                        job_id = %job.id,
                        gallery_id = %job.gallery_id,
                        oracle = oracle.name(),
                        error = %e,
                        "Metadata unavailable"
                    );
                    return Err(JobFailureReason::MetadataUnavailable {
                        message: e.to_string(),
                    });
                }
            };

            if metadata.page_urls.is_empty() {
                tracing::warn!(job_id = %job.id, gallery_id = %job.gallery_id, "Gallery has no pages");
                return Err(JobFailureReason::MetadataUnavailable {
                    message: "gallery has no pages".to_string(),
                });
            }

            job.target_dir = ctx
                .queued
                .download_dir
                .join(gallery_dir_name(&metadata.title, job.gallery_id.as_str()));
            job.pages = metadata
                .page_urls
                .into_iter()
                .enumerate()
                .map(|(index, url)| {
                    let local_path = job.target_dir.join(page_file_name(index, &url));
                    PageTask::new(index, url, local_path)
                })
                .collect();
            job.title = Some(metadata.title);
            job.source_url = metadata.source_url;
        }
        JobSource::Pages {
            title,
            target_dir,
            pages,
        } => {
            job.title = title;
            job.pages = pages
                .into_iter()
                .map(|(index, url)| {
                    let local_path = target_dir.join(page_file_name(index, &url));
                    PageTask::new(index, url, local_path)
                })
                .collect();
            job.target_dir = target_dir;
        }
    }

    Ok(())
}
