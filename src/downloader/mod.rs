//! Core downloader implementation split into focused submodules.
//!
//! The `GalleryDownloader` struct and its methods are organized by domain:
//! - [`queue`] - Batch submission, deduplication and the FIFO job queue
//! - [`queue_processor`] - Admission under the gallery cap
//! - [`job`] - Execution of a single gallery job
//! - [`batch`] - Caller-side batch handles
//! - [`control`] - Cancellation, profile switching, progress and history queries
//! - [`lifecycle`] - Shutdown coordination

mod batch;
mod control;
mod job;
mod lifecycle;
mod queue;
mod queue_processor;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;

pub use batch::{BatchHandle, BatchSummary};

use crate::config::Config;
use crate::conversion::Converter;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::history::HistoryStore;
use crate::oracle::MetadataOracle;
use crate::profile::PerformanceProfile;
use crate::progress::BatchProgress;
use crate::retry::RetryPolicy;
use crate::transfer::{Aria2Engine, TransferAdapter, TransferEngine};
use crate::types::{BatchId, Event, GalleryId, JobId, JobStatus, ProgressSnapshot};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use tokio::sync::{Mutex, Notify, RwLock, broadcast, watch};
use tokio_util::sync::CancellationToken;

/// A job that is known to the downloader (queued or running)
pub(crate) struct ActiveJob {
    pub(crate) batch_id: BatchId,
    pub(crate) gallery_id: GalleryId,
    pub(crate) status: JobStatus,
    pub(crate) cancel: CancellationToken,
    /// Set once the job starts fetching
    pub(crate) progress: Option<watch::Receiver<ProgressSnapshot>>,
}

/// Queue and job state management
#[derive(Clone)]
pub(crate) struct QueueState {
    /// Jobs waiting for a gallery slot, oldest first
    pub(crate) queue: Arc<Mutex<VecDeque<job::QueuedJob>>>,
    /// Queued and running jobs by id
    pub(crate) active: Arc<Mutex<HashMap<JobId, ActiveJob>>>,
    /// Batches with unfinished jobs
    pub(crate) batches: Arc<Mutex<HashMap<BatchId, batch::BatchState>>>,
    /// Jobs currently holding a gallery slot
    pub(crate) running: Arc<AtomicUsize>,
    /// Wakes the queue processor (new job, freed slot, profile change)
    pub(crate) wake: Arc<Notify>,
    /// Flag to indicate whether new batches are accepted (false during shutdown)
    pub(crate) accepting_new: Arc<AtomicBool>,
    /// Stops the queue processor
    pub(crate) shutdown: CancellationToken,
}

impl QueueState {
    fn new() -> Self {
        Self {
            queue: Arc::new(Mutex::new(VecDeque::new())),
            active: Arc::new(Mutex::new(HashMap::new())),
            batches: Arc::new(Mutex::new(HashMap::new())),
            running: Arc::new(AtomicUsize::new(0)),
            wake: Arc::new(Notify::new()),
            accepting_new: Arc::new(AtomicBool::new(true)),
            shutdown: CancellationToken::new(),
        }
    }
}

/// External collaborators of a downloader
///
/// [`GalleryDownloader::new`] builds the production set; tests and embedders
/// with their own engine or history backend use
/// [`GalleryDownloader::with_collaborators`].
pub struct Collaborators {
    /// Resolves gallery identifiers to page lists
    pub oracle: Arc<dyn MetadataOracle>,
    /// Fetches single pages
    pub engine: Arc<dyn TransferEngine>,
    /// Converts finished galleries
    pub converter: Converter,
    /// Persists job outcomes (None disables history)
    pub history: Option<Arc<dyn HistoryStore>>,
}

/// Main downloader instance (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub struct GalleryDownloader {
    /// Configuration (wrapped in Arc for sharing across tasks)
    pub(crate) config: Arc<Config>,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: broadcast::Sender<Event>,
    pub(crate) oracle: Arc<dyn MetadataOracle>,
    pub(crate) adapter: TransferAdapter,
    pub(crate) converter: Arc<Converter>,
    pub(crate) history: Option<Arc<dyn HistoryStore>>,
    /// Owned history database, closed on shutdown
    pub(crate) database: Option<Arc<Database>>,
    pub(crate) retry: Arc<RetryPolicy>,
    /// Profile applied to jobs admitted from now on
    pub(crate) profile: Arc<RwLock<PerformanceProfile>>,
    pub(crate) queue_state: QueueState,
    next_id: Arc<AtomicU64>,
}

impl GalleryDownloader {
    /// Create a downloader using aria2c, the built-in encoders and SQLite history
    ///
    /// Fails with [`Error::NotSupported`] when no aria2c binary can be found.
    pub async fn new(config: Config, oracle: Arc<dyn MetadataOracle>) -> Result<Self> {
        config.validate()?;

        let engine = Aria2Engine::from_config(&config.engine)?;
        tracing::info!(
            aria2c = %engine.binary_path().display(),
            "Transfer engine initialized"
        );

        let converter = Converter::with_defaults(&config.conversion);

        let database = if config.persistence.enable_history {
            Some(Arc::new(
                Database::new(&config.persistence.database_path).await?,
            ))
        } else {
            None
        };

        let mut downloader = Self::with_collaborators(
            config,
            Collaborators {
                oracle,
                engine: Arc::new(engine),
                converter,
                history: database
                    .clone()
                    .map(|db| db as Arc<dyn HistoryStore>),
            },
        )?;
        downloader.database = database;
        Ok(downloader)
    }

    /// Create a downloader with explicit collaborators
    ///
    /// Must be called from within a tokio runtime: the queue processor is
    /// spawned immediately.
    pub fn with_collaborators(config: Config, collaborators: Collaborators) -> Result<Self> {
        config.validate()?;

        // Create broadcast channel with buffer size of 1000 events
        let (event_tx, _rx) = broadcast::channel(1000);

        let adapter = TransferAdapter::new(collaborators.engine, config.download.silence_timeout)
            .with_timeouts(config.engine.timeout, config.engine.connect_timeout);
        let profile = config.performance.initial_profile();
        let retry = RetryPolicy::new(config.download.retry.clone());

        tracing::info!(
            engine = adapter.engine_name(),
            oracle = collaborators.oracle.name(),
            max_parallel_galleries = profile.max_parallel_galleries,
            max_connections_per_server = profile.max_connections_per_server,
            history = collaborators.history.is_some(),
            "Gallery downloader initialized"
        );

        let downloader = Self {
            config: Arc::new(config),
            event_tx,
            oracle: collaborators.oracle,
            adapter,
            converter: Arc::new(collaborators.converter),
            history: collaborators.history,
            database: None,
            retry: Arc::new(retry),
            profile: Arc::new(RwLock::new(profile)),
            queue_state: QueueState::new(),
            next_id: Arc::new(AtomicU64::new(1)),
        };

        downloader.start_queue_processor();
        Ok(downloader)
    }

    /// Subscribe to downloader events
    ///
    /// Multiple subscribers are supported. Each subscriber receives all events independently.
    /// A subscriber that falls behind by more than 1000 events receives
    /// `RecvError::Lagged`.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use gallery_dl_core::{Config, GalleryDownloader, StaticOracle};
    /// use std::sync::Arc;
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<(), Box<dyn std::error::Error>> {
    ///     let downloader = GalleryDownloader::new(Config::default(), Arc::new(StaticOracle::new())).await?;
    ///
    ///     let mut events = downloader.subscribe();
    ///     tokio::spawn(async move {
    ///         while let Ok(event) = events.recv().await {
    ///             tracing::info!(?event, "downloader event");
    ///         }
    ///     });
    ///
    ///     Ok(())
    /// }
    /// ```
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Get the configuration this downloader was built with
    pub fn get_config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    /// Aggregate progress of every running job
    pub async fn overall_progress(&self) -> BatchProgress {
        let active = self.queue_state.active.lock().await;
        let snapshots: Vec<ProgressSnapshot> = active
            .values()
            .filter_map(|job| job.progress.as_ref().map(|rx| rx.borrow().clone()))
            .collect();
        BatchProgress::from_snapshots(&snapshots)
    }

    /// Emit an event to all subscribers
    ///
    /// If there are no active subscribers, the event is silently dropped.
    pub(crate) fn emit_event(&self, event: Event) {
        self.event_tx.send(event).ok();
    }

    pub(crate) fn next_job_id(&self) -> JobId {
        JobId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn next_batch_id(&self) -> BatchId {
        BatchId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn ensure_accepting(&self) -> Result<()> {
        if self.queue_state.accepting_new.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::ShuttingDown)
        }
    }
}
