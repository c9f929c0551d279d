//! Shared test helpers for creating GalleryDownloader instances in tests.

use crate::config::Config;
use crate::conversion::{ArchiveBundleEncoder, Converter};
use crate::db::Database;
use crate::downloader::{BatchHandle, BatchSummary, Collaborators, GalleryDownloader};
use crate::error::FetchError;
use crate::history::HistoryStore;
use crate::oracle::{GalleryMetadata, StaticOracle};
use crate::transfer::{EngineProgress, EngineSettings, TransferEngine, TransferItem};
use crate::types::{Event, JobResult, JobStatus};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::{broadcast, mpsc};

/// Scripted behaviour of the stub engine for one URL
#[derive(Clone, Debug)]
pub(crate) enum PageScript {
    /// Write the page after a delay
    Delay(Duration),
    /// Fail the first `n` attempts, then write the page
    FailTimes(u32, FetchError),
    /// Fail every attempt
    Fail(FetchError),
    /// Never finish and never report progress
    Hang,
}

/// Engine that writes small fake pages and follows per-URL scripts
///
/// URLs without a script succeed after a few milliseconds.
#[derive(Default)]
pub(crate) struct StubEngine {
    scripts: Mutex<HashMap<String, PageScript>>,
    attempts: Mutex<HashMap<String, u32>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl StubEngine {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn script(&self, url: &str, script: PageScript) {
        self.scripts
            .lock()
            .unwrap()
            .insert(url.to_string(), script);
    }

    pub(crate) fn attempts(&self, url: &str) -> u32 {
        self.attempts
            .lock()
            .unwrap()
            .get(url)
            .copied()
            .unwrap_or(0)
    }

    pub(crate) fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransferEngine for StubEngine {
    async fn fetch_one(
        &self,
        item: &TransferItem,
        _settings: &EngineSettings,
        progress: mpsc::Sender<EngineProgress>,
    ) -> Result<u64, FetchError> {
        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            let count = attempts.entry(item.url.clone()).or_insert(0);
            *count += 1;
            *count
        };
        let script = self
            .scripts
            .lock()
            .unwrap()
            .get(&item.url)
            .cloned()
            .unwrap_or(PageScript::Delay(Duration::from_millis(5)));

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        let result = match script {
            PageScript::Delay(delay) => {
                tokio::time::sleep(delay).await;
                write_page(item, &progress).await
            }
            PageScript::FailTimes(n, error) if attempt <= n => {
                tokio::time::sleep(Duration::from_millis(2)).await;
                Err(error)
            }
            PageScript::FailTimes(..) => write_page(item, &progress).await,
            PageScript::Fail(error) => {
                tokio::time::sleep(Duration::from_millis(2)).await;
                Err(error)
            }
            PageScript::Hang => std::future::pending().await,
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn name(&self) -> &'static str {
        "stub"
    }
}

async fn write_page(
    item: &TransferItem,
    progress: &mpsc::Sender<EngineProgress>,
) -> Result<u64, FetchError> {
    let body = format!("page {} from {}", item.index, item.url).into_bytes();
    let total = body.len() as u64;
    let _ = progress
        .send(EngineProgress {
            bytes_so_far: total / 2,
            bytes_total: Some(total),
        })
        .await;
    tokio::fs::write(&item.destination, &body)
        .await
        .map_err(|e| FetchError::Io(e.to_string()))?;
    Ok(total)
}

/// Gallery metadata with `pages` page URLs on one host
pub(crate) fn gallery(title: &str, pages: usize) -> GalleryMetadata {
    GalleryMetadata {
        title: title.to_string(),
        source_url: Some(format!("https://gallery.example/{title}")),
        page_urls: (0..pages).map(|i| page_url(title, i)).collect(),
    }
}

/// URL of page `index` of the gallery built by [`gallery`]
pub(crate) fn page_url(title: &str, index: usize) -> String {
    format!("https://img.example/{title}/{index}.jpg")
}

/// Config with short delays and everything under `dir`
pub(crate) fn test_config(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.download.download_dir = dir.path().join("downloads");
    config.download.retry.initial_delay = Duration::from_millis(10);
    config.download.retry.max_delay = Duration::from_millis(50);
    config.download.progress_interval = Duration::from_millis(10);
    config.download.silence_timeout = Duration::from_secs(5);
    config.performance.normal.request_delay = Duration::ZERO;
    config.performance.turbo.request_delay = Duration::ZERO;
    config.persistence.database_path = dir.path().join("history.db");
    config
}

/// Test downloader around a stub engine and a static oracle
pub(crate) struct TestDownloader {
    pub(crate) downloader: GalleryDownloader,
    pub(crate) engine: Arc<StubEngine>,
    pub(crate) oracle: Arc<StaticOracle>,
    pub(crate) database: Option<Arc<Database>>,
    pub(crate) _dir: TempDir,
}

/// Helper to create a test downloader without history
pub(crate) async fn create_test_downloader() -> TestDownloader {
    build(false, |_| {}).await
}

/// Helper to create a test downloader backed by a SQLite history store
pub(crate) async fn create_test_downloader_with_history() -> TestDownloader {
    build(true, |_| {}).await
}

/// Helper with a config tweak applied before construction
pub(crate) async fn create_test_downloader_with(
    history: bool,
    tweak: impl FnOnce(&mut Config),
) -> TestDownloader {
    build(history, tweak).await
}

async fn build(history: bool, tweak: impl FnOnce(&mut Config)) -> TestDownloader {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(&dir);
    tweak(&mut config);

    let engine = StubEngine::new();
    let oracle = Arc::new(StaticOracle::new());
    let database = if history {
        Some(Arc::new(
            Database::new(&config.persistence.database_path)
                .await
                .unwrap(),
        ))
    } else {
        None
    };

    let mut downloader = GalleryDownloader::with_collaborators(
        config,
        Collaborators {
            oracle: oracle.clone(),
            engine: engine.clone(),
            converter: Converter::new().with_encoder(Arc::new(ArchiveBundleEncoder::new())),
            history: database.clone().map(|db| db as Arc<dyn HistoryStore>),
        },
    )
    .unwrap();
    downloader.database = database.clone();

    TestDownloader {
        downloader,
        engine,
        oracle,
        database,
        _dir: dir,
    }
}

/// Wait for the next event matching `predicate`, failing after five seconds
pub(crate) async fn wait_for_event(
    events: &mut broadcast::Receiver<Event>,
    mut predicate: impl FnMut(&Event) -> bool,
) -> Event {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(event) if predicate(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Wait until `check` holds, polling every 10ms for up to five seconds
pub(crate) async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check().await {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached within five seconds"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Results sorted by gallery id, for order-independent assertions
pub(crate) fn by_gallery(mut results: Vec<JobResult>) -> Vec<JobResult> {
    results.sort_by(|a, b| a.gallery_id.cmp(&b.gallery_id));
    results
}

/// Wait for a batch to finish, failing after ten seconds
pub(crate) async fn finish(batch: BatchHandle) -> BatchSummary {
    tokio::time::timeout(Duration::from_secs(10), batch.wait())
        .await
        .expect("batch did not finish in time")
}

/// Number of active jobs with `status`
pub(crate) async fn count_status(downloader: &GalleryDownloader, status: JobStatus) -> usize {
    downloader
        .active_jobs()
        .await
        .iter()
        .filter(|job| job.status == status)
        .count()
}
