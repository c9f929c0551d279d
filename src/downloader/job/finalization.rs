//! Job finalization -- status evaluation, conversion, history write and result delivery.

use crate::conversion::ConversionRequest;
use crate::history::HistoryRecord;
use crate::types::{
    ConversionOutcome, ConversionSettings, Event, GalleryId, GalleryJob, JobFailureReason, JobId,
    JobResult, JobStatus,
};
use chrono::Utc;

use super::super::GalleryDownloader;
use super::context::{JobContext, QueuedJob};

/// Evaluate the job's outcome and report it
///
/// `failure` short-circuits to `Failed` (metadata unavailable, cancelled
/// before fetching). Otherwise the page outcomes decide. The history record
/// is written before the result leaves for the caller.
pub(crate) async fn finalize_job(
    ctx: JobContext,
    mut job: GalleryJob,
    failure: Option<JobFailureReason>,
) {
    let cancelled = ctx.cancel().is_cancelled();

    let (status, failure_reason) = match failure {
        Some(reason) => (JobStatus::Failed, Some(reason)),
        None if cancelled => (JobStatus::Failed, Some(JobFailureReason::Cancelled)),
        None => match job.fetch_outcome() {
            JobStatus::Failed => (JobStatus::Failed, Some(JobFailureReason::AllPagesFailed)),
            outcome => (outcome, None),
        },
    };

    let mut conversion = None;
    if status == JobStatus::Done
        && let Some(settings) = ctx.queued.conversion.clone()
    {
        conversion = Some(convert(&ctx, &mut job, &settings).await);
    }

    if let Err(e) = job.advance(status) {
        tracing::error!(job_id = %job.id, error = %e, "Unexpected job status transition");
        job.status = status;
        job.finished_at = Some(Utc::now());
    }

    let mut result = JobResult {
        job_id: job.id,
        gallery_id: job.gallery_id.clone(),
        title: job.title.clone(),
        status: job.status,
        target_dir: (!job.pages.is_empty()).then(|| job.target_dir.clone()),
        pages_total: job.pages.len(),
        pages_succeeded: job.pages_succeeded(),
        failures: job.page_failures(),
        failure_reason,
        conversion,
        warnings: Vec::new(),
        finished_at: job.finished_at.unwrap_or_else(Utc::now),
    };

    record_history(&ctx.downloader, &job, &mut result).await;

    match &result.failure_reason {
        Some(reason) => tracing::warn!(
            job_id = %job.id,
            gallery_id = %job.gallery_id,
            status = %result.status,
            ?reason,
            "Gallery job failed"
        ),
        None => tracing::info!(
            job_id = %job.id,
            gallery_id = %job.gallery_id,
            status = %result.status,
            pages = result.pages_succeeded,
            "Gallery job finished"
        ),
    }

    // Leave the active set before reporting so the caller can resubmit at once
    ctx.downloader
        .queue_state
        .active
        .lock()
        .await
        .remove(&job.id);

    ctx.emit(Event::Finished {
        job_id: job.id,
        gallery_id: job.gallery_id.clone(),
        status: result.status,
    });

    ctx.downloader
        .record_batch_result(ctx.queued.batch_id, &result)
        .await;

    if ctx.queued.results.send(result).is_err() {
        tracing::debug!(job_id = %job.id, "Batch handle dropped before the result arrived");
    }
}

/// Run the conversion for a fully fetched gallery
///
/// A conversion failure leaves the job `Done`; it is reported on the result
/// and in history instead.
async fn convert(
    ctx: &JobContext,
    job: &mut GalleryJob,
    settings: &ConversionSettings,
) -> ConversionOutcome {
    if let Err(e) = job.advance(JobStatus::Converting) {
        tracing::error!(job_id = %job.id, error = %e, "Unexpected job status transition");
    }
    ctx.set_status(JobStatus::Converting).await;
    ctx.emit(Event::Converting {
        job_id: job.id,
        format: settings.format,
    });

    let request = ConversionRequest::new(
        Some(job.id),
        job.target_dir.clone(),
        job.ordered_page_paths(),
        settings,
    );

    match ctx.downloader.converter.convert(request).await {
        Ok(converted) => {
            ctx.emit(Event::ConversionComplete {
                job_id: job.id,
                output_path: converted.output_path.clone(),
                bytes_written: converted.bytes_written,
            });
            ConversionOutcome::Converted {
                format: converted.format,
                output_path: converted.output_path,
                bytes_written: converted.bytes_written,
                source_deleted: converted.source_deleted,
            }
        }
        Err(e) => {
            tracing::warn!(job_id = %job.id, error = %e, "Conversion failed, pages kept");
            ctx.emit(Event::ConversionFailed {
                job_id: job.id,
                kind: e.kind(),
                message: e.to_string(),
            });
            ConversionOutcome::Failed {
                format: settings.format,
                kind: e.kind(),
                message: e.to_string(),
            }
        }
    }
}

/// Append the history record; a failure becomes a warning on the result
async fn record_history(downloader: &GalleryDownloader, job: &GalleryJob, result: &mut JobResult) {
    let Some(history) = &downloader.history else {
        return;
    };

    let mut record = HistoryRecord::from_result(result, job.created_at, job.bytes_written());
    record.source_url = job.source_url.clone();

    match history.append(&record).await {
        Ok(id) => {
            tracing::debug!(job_id = %job.id, history_id = id, "History record written");
            if let Some(max) = downloader.config.persistence.max_history_entries {
                match history.prune(max).await {
                    Ok(0) => {}
                    Ok(pruned) => tracing::debug!(pruned, "Pruned old history records"),
                    Err(e) => tracing::warn!(error = %e, "Failed to prune history"),
                }
            }
        }
        Err(e) => {
            tracing::error!(job_id = %job.id, error = %e, "Failed to write history record");
            result.warnings.push(format!("history write failed: {e}"));
            downloader.emit_event(Event::HistoryWriteFailed {
                job_id: job.id,
                error: e.to_string(),
            });
        }
    }
}

/// Report a job that was cancelled while still queued
pub(crate) async fn deliver_cancelled(downloader: GalleryDownloader, queued: QueuedJob) {
    let profile = downloader.profile.read().await.clone();
    let mut job = GalleryJob::new(queued.job_id, queued.gallery_id.clone(), profile);
    job.created_at = queued.created_at;

    let ctx = JobContext {
        downloader,
        queued,
        slot: None,
    };
    finalize_job(ctx, job, Some(JobFailureReason::Cancelled)).await;
}

/// Result for a job whose task ended without reporting (it panicked)
pub(crate) fn abandoned_result(job_id: JobId, gallery_id: GalleryId, message: String) -> JobResult {
    JobResult {
        job_id,
        gallery_id,
        title: None,
        status: JobStatus::Failed,
        target_dir: None,
        pages_total: 0,
        pages_succeeded: 0,
        failures: Vec::new(),
        failure_reason: Some(JobFailureReason::Aborted { message }),
        conversion: None,
        warnings: Vec::new(),
        finished_at: Utc::now(),
    }
}
