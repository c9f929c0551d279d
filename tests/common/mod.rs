//! Common test utilities for gallery-dl-core integration tests
//!
//! Everything here goes through the public API: a scripted transfer engine,
//! a static oracle and a tempdir-backed configuration.

#![allow(dead_code)]

use async_trait::async_trait;
use gallery_dl_core::conversion::ArchiveBundleEncoder;
use gallery_dl_core::history::HistoryStore;
use gallery_dl_core::transfer::{EngineProgress, EngineSettings, TransferEngine, TransferItem};
use gallery_dl_core::{
    BatchHandle, BatchSummary, Collaborators, Config, Converter, Database, Event, FetchError,
    GalleryDownloader, GalleryMetadata, StaticOracle,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::{broadcast, mpsc};

/// How the fake site answers one URL
#[derive(Clone, Debug)]
pub enum Reply {
    /// Serve the page after a delay
    After(Duration),
    /// Fail the first `n` requests, then serve the page
    FlakyFor(u32, FetchError),
    /// Fail every request
    Always(FetchError),
}

/// Transfer engine standing in for a real site
#[derive(Default)]
pub struct FakeSite {
    replies: Mutex<HashMap<String, Reply>>,
    requests: Mutex<HashMap<String, u32>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl FakeSite {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reply(&self, url: &str, reply: Reply) {
        self.replies
            .lock()
            .unwrap()
            .insert(url.to_string(), reply);
    }

    pub fn requests(&self, url: &str) -> u32 {
        self.requests
            .lock()
            .unwrap()
            .get(url)
            .copied()
            .unwrap_or(0)
    }

    /// Highest number of simultaneous transfers seen
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransferEngine for FakeSite {
    async fn fetch_one(
        &self,
        item: &TransferItem,
        _settings: &EngineSettings,
        progress: mpsc::Sender<EngineProgress>,
    ) -> Result<u64, FetchError> {
        let seen = {
            let mut requests = self.requests.lock().unwrap();
            let count = requests.entry(item.url.clone()).or_insert(0);
            *count += 1;
            *count
        };
        let reply = self
            .replies
            .lock()
            .unwrap()
            .get(&item.url)
            .cloned()
            .unwrap_or(Reply::After(Duration::from_millis(5)));

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let outcome = match reply {
            Reply::After(delay) => {
                tokio::time::sleep(delay).await;
                serve(item, &progress).await
            }
            Reply::FlakyFor(n, error) if seen <= n => Err(error),
            Reply::FlakyFor(..) => serve(item, &progress).await,
            Reply::Always(error) => Err(error),
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        outcome
    }

    fn name(&self) -> &'static str {
        "fake-site"
    }
}

/// Page body served for `item`; tests read it back to check page order
pub fn page_body(index: usize) -> String {
    format!("image data for page {index}")
}

async fn serve(
    item: &TransferItem,
    progress: &mpsc::Sender<EngineProgress>,
) -> Result<u64, FetchError> {
    let body = page_body(item.index);
    let _ = progress
        .send(EngineProgress {
            bytes_so_far: body.len() as u64,
            bytes_total: Some(body.len() as u64),
        })
        .await;
    tokio::fs::write(&item.destination, body.as_bytes())
        .await
        .map_err(|e| FetchError::Io(e.to_string()))?;
    Ok(body.len() as u64)
}

/// URL of page `index` of gallery `title`
pub fn image_url(title: &str, index: usize) -> String {
    format!("https://cdn.example.org/{title}/{index}.png")
}

/// Metadata for a gallery of `pages` pages
pub fn metadata(title: &str, pages: usize) -> GalleryMetadata {
    GalleryMetadata {
        title: title.to_string(),
        source_url: Some(format!("https://site.example.org/g/{title}")),
        page_urls: (0..pages).map(|i| image_url(title, i)).collect(),
    }
}

/// A downloader wired to a fake site
pub struct Harness {
    pub downloader: GalleryDownloader,
    pub site: Arc<FakeSite>,
    pub oracle: Arc<StaticOracle>,
    pub dir: TempDir,
}

impl Harness {
    /// Directory the pages of gallery `id` titled `title` land in
    pub fn gallery_dir(&self, id: &str, title: &str) -> std::path::PathBuf {
        self.downloader
            .get_config()
            .download_dir()
            .join(format!("{title} [{id}]"))
    }
}

/// Config with short retry delays and every path under `dir`
pub fn fast_config(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.download.download_dir = dir.path().join("library");
    config.download.retry.initial_delay = Duration::from_millis(10);
    config.download.retry.max_delay = Duration::from_millis(40);
    config.download.progress_interval = Duration::from_millis(10);
    config.performance.normal.request_delay = Duration::ZERO;
    config.performance.turbo.request_delay = Duration::ZERO;
    config.persistence.database_path = dir.path().join("history.db");
    config
}

/// Route downloader logs to the test output (filtered by `RUST_LOG`)
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}

/// Build a harness; `converter` defaults to the archive bundle encoder
pub async fn harness(
    tweak: impl FnOnce(&mut Config),
    converter: Option<Converter>,
) -> Harness {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let mut config = fast_config(&dir);
    tweak(&mut config);

    let site = FakeSite::new();
    let oracle = Arc::new(StaticOracle::new());
    let history = Database::new(&config.persistence.database_path)
        .await
        .unwrap();

    let downloader = GalleryDownloader::with_collaborators(
        config,
        Collaborators {
            oracle: oracle.clone(),
            engine: site.clone(),
            converter: converter.unwrap_or_else(|| {
                Converter::new().with_encoder(Arc::new(ArchiveBundleEncoder::new()))
            }),
            history: Some(Arc::new(history) as Arc<dyn HistoryStore>),
        },
    )
    .unwrap();

    Harness {
        downloader,
        site,
        oracle,
        dir,
    }
}

/// Wait for a batch to finish, failing after ten seconds
pub async fn settle(batch: BatchHandle) -> BatchSummary {
    tokio::time::timeout(Duration::from_secs(10), batch.wait())
        .await
        .expect("batch did not finish in time")
}

/// Wait for the next event matching `predicate`
pub async fn next_matching(
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
