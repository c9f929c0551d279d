//! Progress aggregation
//!
//! [`ProgressTracker`] folds transfer events into per-page byte counts and a
//! moving-average speed. [`spawn_progress_aggregator`] runs a tracker in a
//! background task fed by a bounded channel and publishes snapshots at most
//! once per interval, both on a per-job `watch` channel and as
//! [`Event::Progress`] on the downloader's broadcast channel.

use crate::transfer::TransferEvent;
use crate::types::{Event, JobId, ProgressSnapshot};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::Instant;

/// Buffer size for the per-job progress input channel
pub(crate) const PROGRESS_CHANNEL_BUFFER: usize = 256;

#[derive(Clone, Copy, Debug, Default)]
struct PageProgress {
    bytes: u64,
    total: Option<u64>,
    finished: bool,
}

/// Pure progress state for one job
#[derive(Debug)]
pub struct ProgressTracker {
    job_id: JobId,
    pages: Vec<PageProgress>,
    /// Bytes received across all attempts, used only for speed
    transferred: u64,
    samples: VecDeque<(Instant, u64)>,
    window: usize,
}

impl ProgressTracker {
    /// Create a tracker for `files_total` pages averaging speed over `window` samples
    pub fn new(job_id: JobId, files_total: usize, window: usize) -> Self {
        Self {
            job_id,
            pages: vec![PageProgress::default(); files_total],
            transferred: 0,
            samples: VecDeque::with_capacity(window.max(2)),
            window: window.max(2),
        }
    }

    /// Apply a transfer event observed at `at`
    ///
    /// A `Failed` event discards that attempt's bytes; the page only counts
    /// as done once [`page_gave_up`](Self::page_gave_up) is called.
    pub fn record(&mut self, event: &TransferEvent, at: Instant) {
        let Some(page) = self.pages.get_mut(event.index()) else {
            return;
        };

        match event {
            TransferEvent::BytesProgress {
                bytes_so_far,
                bytes_total,
                ..
            } => {
                // A smaller count means a new attempt started from zero
                let delta = bytes_so_far.saturating_sub(page.bytes);
                self.transferred += if *bytes_so_far >= page.bytes {
                    delta
                } else {
                    *bytes_so_far
                };
                page.bytes = *bytes_so_far;
                if bytes_total.is_some() {
                    page.total = *bytes_total;
                }
            }
            TransferEvent::Succeeded { bytes, .. } => {
                self.transferred += bytes.saturating_sub(page.bytes);
                page.bytes = *bytes;
                page.total = Some(*bytes);
                page.finished = true;
            }
            TransferEvent::Failed { .. } => {
                page.bytes = 0;
            }
        }

        self.push_sample(at);
    }

    /// Mark a page as permanently failed
    pub fn page_gave_up(&mut self, index: usize) {
        if let Some(page) = self.pages.get_mut(index) {
            page.finished = true;
            page.bytes = 0;
            page.total = Some(0);
        }
    }

    fn push_sample(&mut self, at: Instant) {
        if self.samples.len() == self.window {
            self.samples.pop_front();
        }
        self.samples.push_back((at, self.transferred));
    }

    /// Moving-average speed over the retained samples, in bytes per second
    pub fn speed_bps(&self) -> u64 {
        let (Some((first_at, first_bytes)), Some((last_at, last_bytes))) =
            (self.samples.front(), self.samples.back())
        else {
            return 0;
        };
        let elapsed = last_at.duration_since(*first_at).as_secs_f64();
        if elapsed <= 0.0 {
            return 0;
        }
        (last_bytes.saturating_sub(*first_bytes) as f64 / elapsed) as u64
    }

    /// Current snapshot
    pub fn snapshot(&self) -> ProgressSnapshot {
        let bytes_done: u64 = self.pages.iter().map(|p| p.bytes).sum();
        let bytes_total = self
            .pages
            .iter()
            .map(|p| p.total)
            .sum::<Option<u64>>()
            .map(|total| total.max(bytes_done));
        let speed_bps = self.speed_bps();

        ProgressSnapshot {
            job_id: self.job_id,
            bytes_done,
            bytes_total,
            files_done: self.pages.iter().filter(|p| p.finished).count(),
            files_total: self.pages.len(),
            speed_bps,
            eta: eta(bytes_done, bytes_total, speed_bps),
        }
    }
}

/// Time remaining at `speed_bps`, or None when the total is unknown or speed is zero
pub fn eta(bytes_done: u64, bytes_total: Option<u64>, speed_bps: u64) -> Option<Duration> {
    let total = bytes_total?;
    if speed_bps == 0 {
        return None;
    }
    let remaining = total.saturating_sub(bytes_done);
    Some(Duration::from_secs_f64(remaining as f64 / speed_bps as f64))
}

/// Progress across several jobs (e.g. one batch)
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchProgress {
    /// Jobs included
    pub jobs: usize,
    /// Bytes transferred across jobs
    pub bytes_done: u64,
    /// Total bytes, when known for every job
    pub bytes_total: Option<u64>,
    /// Pages finished across jobs
    pub files_done: usize,
    /// Pages across jobs
    pub files_total: usize,
    /// Combined speed in bytes per second
    pub speed_bps: u64,
    /// Estimated time remaining, None when unknown
    pub eta_secs: Option<u64>,
}

impl BatchProgress {
    /// Combine per-job snapshots
    pub fn from_snapshots<'a>(snapshots: impl IntoIterator<Item = &'a ProgressSnapshot>) -> Self {
        let mut batch = BatchProgress {
            bytes_total: Some(0),
            ..Default::default()
        };
        for snapshot in snapshots {
            batch.jobs += 1;
            batch.bytes_done += snapshot.bytes_done;
            batch.bytes_total = batch
                .bytes_total
                .zip(snapshot.bytes_total)
                .map(|(a, b)| a + b);
            batch.files_done += snapshot.files_done;
            batch.files_total += snapshot.files_total;
            batch.speed_bps += snapshot.speed_bps;
        }
        if batch.jobs == 0 {
            batch.bytes_total = None;
        }
        batch.eta_secs = eta(batch.bytes_done, batch.bytes_total, batch.speed_bps)
            .map(|d| d.as_secs());
        batch
    }
}

/// Input accepted by a running aggregator
#[derive(Clone, Debug)]
pub(crate) enum ProgressInput {
    /// A transfer event from the adapter
    Transfer(TransferEvent),
    /// A page exhausted its retries
    PageGaveUp(usize),
}

/// Parameters for spawning a progress aggregator
pub(crate) struct ProgressAggregatorParams {
    /// Job ID
    pub job_id: JobId,
    /// Pages in the job
    pub files_total: usize,
    /// Minimum spacing between published snapshots
    pub interval: Duration,
    /// Samples in the speed moving average
    pub window: usize,
    /// Event broadcast sender
    pub event_tx: broadcast::Sender<Event>,
}

/// Handle to a running aggregator
pub(crate) struct ProgressAggregator {
    input: mpsc::Sender<ProgressInput>,
    snapshots: watch::Receiver<ProgressSnapshot>,
    task: tokio::task::JoinHandle<ProgressSnapshot>,
}

impl ProgressAggregator {
    /// Feed an input; waits when the aggregator is behind
    pub async fn send(&self, input: ProgressInput) {
        if self.input.send(input).await.is_err() {
            tracing::debug!("Progress aggregator already stopped");
        }
    }

    /// Receiver of published snapshots; closes when the aggregator finishes
    pub fn subscribe(&self) -> watch::Receiver<ProgressSnapshot> {
        self.snapshots.clone()
    }

    /// Stop the aggregator and return the final snapshot
    pub async fn finish(self) -> Option<ProgressSnapshot> {
        let ProgressAggregator { input, task, .. } = self;
        drop(input);
        task.await.ok()
    }
}

/// Spawn a background task that aggregates one job's progress
pub(crate) fn spawn_progress_aggregator(params: ProgressAggregatorParams) -> ProgressAggregator {
    let ProgressAggregatorParams {
        job_id,
        files_total,
        interval,
        window,
        event_tx,
    } = params;

    let (input_tx, mut input_rx) = mpsc::channel(PROGRESS_CHANNEL_BUFFER);
    let mut tracker = ProgressTracker::new(job_id, files_total, window);
    let (snapshot_tx, snapshot_rx) = watch::channel(tracker.snapshot());

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut dirty = false;

        loop {
            tokio::select! {
                msg = input_rx.recv() => {
                    let Some(msg) = msg else {
                        // Channel closed, job is terminal
                        break;
                    };
                    match msg {
                        ProgressInput::Transfer(event) => tracker.record(&event, Instant::now()),
                        ProgressInput::PageGaveUp(index) => tracker.page_gave_up(index),
                    }
                    dirty = true;
                }
                _ = ticker.tick() => {
                    if dirty {
                        let snapshot = tracker.snapshot();
                        snapshot_tx.send_replace(snapshot.clone());
                        event_tx.send(Event::Progress(snapshot)).ok();
                        dirty = false;
                    }
                }
            }
        }

        let snapshot = tracker.snapshot();
        snapshot_tx.send_replace(snapshot.clone());
        event_tx.send(Event::Progress(snapshot.clone())).ok();
        snapshot
    });

    ProgressAggregator {
        input: input_tx,
        snapshots: snapshot_rx,
        task,
    }
}
