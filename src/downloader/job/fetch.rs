//! Page fetching -- drives the transfer adapter and applies the retry policy.

use crate::error::FetchError;
use crate::profile::PerformanceProfile;
use crate::progress::{ProgressAggregator, ProgressInput};
use crate::retry::RetryDecision;
use crate::transfer::{TransferEvent, TransferItem};
use crate::types::{Event, GalleryJob, PageStatus};
use futures::StreamExt;
use futures::stream::{BoxStream, SelectAll};
use std::time::Duration;

use super::context::JobContext;

/// Fetch every page of `job`, returning once each page is terminal
///
/// All pages go to the adapter as one request. A transient failure schedules
/// a delayed single-page request that joins the same event loop, so retries
/// of one page never hold back the others.
pub(super) async fn fetch_pages(
    ctx: &JobContext,
    job: &mut GalleryJob,
    aggregator: &ProgressAggregator,
) {
    let items: Vec<TransferItem> = job
        .pages
        .iter_mut()
        .map(|page| {
            page.status = PageStatus::InFlight;
            TransferItem {
                index: page.index,
                url: page.url.clone(),
                destination: page.local_path.clone(),
            }
        })
        .collect();

    let mut streams: SelectAll<BoxStream<'static, TransferEvent>> = SelectAll::new();
    streams.push(
        ctx.downloader
            .adapter
            .fetch(items, &job.profile, ctx.cancel().clone())
            .boxed(),
    );

    while let Some(event) = streams.next().await {
        // Page indices may be sparse when retrying an earlier job's missing pages
        let Some(pos) = job.pages.iter().position(|p| p.index == event.index()) else {
            tracing::warn!(job_id = %job.id, page = event.index(), "Event for unknown page");
            continue;
        };

        // The aggregator tracks pages by position in the job
        let tracked = ProgressInput::Transfer(at_position(&event, pos));

        match event {
            TransferEvent::BytesProgress { .. } => {
                aggregator.send(tracked).await;
            }
            TransferEvent::Succeeded { bytes, .. } => {
                let page = &mut job.pages[pos];
                page.attempts += 1;
                page.status = PageStatus::Succeeded;
                page.bytes = bytes;
                page.last_error = None;
                aggregator.send(tracked).await;
            }
            TransferEvent::Failed { index, ref error } => {
                let error = error.clone();
                aggregator.send(tracked).await;

                let page = &mut job.pages[pos];
                page.attempts += 1;
                page.last_error = Some(error.clone());

                let decision = if error == FetchError::Cancelled || ctx.cancel().is_cancelled() {
                    RetryDecision::GiveUp
                } else {
                    ctx.downloader.retry.on_failure(page, &error, page.attempts)
                };

                match decision {
                    RetryDecision::Retry { after } => {
                        ctx.emit(Event::PageRetry {
                            job_id: job.id,
                            index,
                            attempt: page.attempts,
                            delay_ms: after.as_millis() as u64,
                            error,
                        });
                        let item = TransferItem {
                            index,
                            url: page.url.clone(),
                            destination: page.local_path.clone(),
                        };
                        streams.push(retry_stream(ctx, &job.profile, item, after));
                    }
                    RetryDecision::GiveUp => {
                        page.status = PageStatus::Failed;
                        if error != FetchError::Cancelled {
                            tracing::warn!(
                                job_id = %job.id,
                                page = index,
                                attempts = page.attempts,
                                error = %error,
                                "Page failed permanently"
                            );
                            ctx.emit(Event::PageFailed {
                                job_id: job.id,
                                index,
                                error,
                            });
                        }
                        aggregator.send(ProgressInput::PageGaveUp(pos)).await;
                    }
                }
            }
        }
    }
}

fn at_position(event: &TransferEvent, pos: usize) -> TransferEvent {
    let mut event = event.clone();
    match &mut event {
        TransferEvent::BytesProgress { index, .. }
        | TransferEvent::Succeeded { index, .. }
        | TransferEvent::Failed { index, .. } => *index = pos,
    }
    event
}

/// Single-page request that starts after `after` (or at once when cancelled)
fn retry_stream(
    ctx: &JobContext,
    profile: &PerformanceProfile,
    item: TransferItem,
    after: Duration,
) -> BoxStream<'static, TransferEvent> {
    let adapter = ctx.downloader.adapter.clone();
    let profile = profile.clone();
    let cancel = ctx.cancel().clone();

    futures::stream::once(async move {
        tokio::select! {
            _ = tokio::time::sleep(after) => {}
            _ = cancel.cancelled() => {}
        }
        adapter.fetch(vec![item], &profile, cancel)
    })
    .flatten()
    .boxed()
}
