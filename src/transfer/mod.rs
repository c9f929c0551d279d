//! Transfer engine adapter
//!
//! Wraps an external per-file downloader ([`TransferEngine`]) and turns a list
//! of page transfers into a finite stream of [`TransferEvent`]s:
//!
//! - every submitted item yields exactly one terminal event (`Succeeded` or
//!   `Failed`), even when the engine hangs, crashes, or panics
//! - `max_concurrent_downloads` bounds transfers in flight for one call
//! - `max_connections_per_server` bounds transfers per host across every
//!   concurrent call, via the shared [`HostSlots`] table
//! - a silence watchdog fails an item with `EngineUnresponsive` when the engine
//!   reports nothing for the configured window
//!
//! Events travel over a bounded channel, so a slow consumer slows the engine
//! down instead of buffering without limit.

mod aria2;
mod parser;
mod slots;

pub use aria2::Aria2Engine;
pub use parser::{classify_exit, classify_http_status, parse_readout};
pub use slots::{HostSlot, HostSlots, RequestPacer};

use crate::error::FetchError;
use crate::profile::PerformanceProfile;
use async_trait::async_trait;
use futures::StreamExt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

/// Capacity of the per-call event channel
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Capacity of the engine-to-adapter progress channel for one item
const PROGRESS_CHANNEL_CAPACITY: usize = 16;

/// One file to fetch
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransferItem {
    /// Page index the item belongs to
    pub index: usize,
    /// Remote URL
    pub url: String,
    /// Final path of the downloaded file
    pub destination: PathBuf,
}

/// Per-invocation engine settings
///
/// An engine opens one connection per item. The per-host connection cap is
/// enforced by the adapter through [`HostSlots`] before the engine is called.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineSettings {
    /// Network timeout
    pub timeout: Duration,
    /// Connect timeout
    pub connect_timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Byte progress reported by an engine while fetching one item
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EngineProgress {
    /// Bytes received so far
    pub bytes_so_far: u64,
    /// Total size, when known
    pub bytes_total: Option<u64>,
}

/// External downloader capability
///
/// Implementations fetch a single item and may report progress through
/// `progress`. Any output (including progress) resets the adapter's silence
/// watchdog, so engines that can report progress should.
#[async_trait]
pub trait TransferEngine: Send + Sync {
    /// Fetch `item` to its destination, returning the number of bytes written
    async fn fetch_one(
        &self,
        item: &TransferItem,
        settings: &EngineSettings,
        progress: mpsc::Sender<EngineProgress>,
    ) -> Result<u64, FetchError>;

    /// Name of this engine for logging
    fn name(&self) -> &'static str;
}

/// Event produced by [`TransferAdapter::fetch`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransferEvent {
    /// Bytes received for an item
    BytesProgress {
        /// Page index
        index: usize,
        /// Bytes received so far
        bytes_so_far: u64,
        /// Total size, when known
        bytes_total: Option<u64>,
    },
    /// Item written to disk
    Succeeded {
        /// Page index
        index: usize,
        /// Where the file was written
        path: PathBuf,
        /// File size
        bytes: u64,
    },
    /// Item failed
    Failed {
        /// Page index
        index: usize,
        /// Why
        error: FetchError,
    },
}

impl TransferEvent {
    /// Page index the event refers to
    pub fn index(&self) -> usize {
        match self {
            TransferEvent::BytesProgress { index, .. }
            | TransferEvent::Succeeded { index, .. }
            | TransferEvent::Failed { index, .. } => *index,
        }
    }

    /// Whether this is the item's final event
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransferEvent::BytesProgress { .. })
    }
}

/// Finite event stream for one `fetch` call; cannot be restarted
pub type TransferStream = ReceiverStream<TransferEvent>;

/// Adapter enforcing concurrency caps and supervision around a [`TransferEngine`]
#[derive(Clone)]
pub struct TransferAdapter {
    engine: Arc<dyn TransferEngine>,
    host_slots: Arc<HostSlots>,
    silence_timeout: Duration,
    timeout: Duration,
    connect_timeout: Duration,
}

impl TransferAdapter {
    /// Create an adapter around `engine`
    pub fn new(engine: Arc<dyn TransferEngine>, silence_timeout: Duration) -> Self {
        let defaults = EngineSettings::default();
        Self {
            engine,
            host_slots: Arc::new(HostSlots::new()),
            silence_timeout,
            timeout: defaults.timeout,
            connect_timeout: defaults.connect_timeout,
        }
    }

    /// Override the network timeouts passed to the engine
    pub fn with_timeouts(mut self, timeout: Duration, connect_timeout: Duration) -> Self {
        self.timeout = timeout;
        self.connect_timeout = connect_timeout;
        self
    }

    /// Shared per-host connection table
    pub fn host_slots(&self) -> &Arc<HostSlots> {
        &self.host_slots
    }

    /// Name of the wrapped engine
    pub fn engine_name(&self) -> &'static str {
        self.engine.name()
    }

    /// Fetch `items` with the limits from `profile`
    ///
    /// Returns immediately; work happens in a background task that ends once
    /// every item has produced its terminal event. Cancelling `cancel` aborts
    /// in-flight transfers and fails every unfinished item with `Cancelled`.
    pub fn fetch(
        &self,
        items: Vec<TransferItem>,
        profile: &PerformanceProfile,
        cancel: CancellationToken,
    ) -> TransferStream {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let adapter = self.clone();
        let profile = profile.clone();

        tokio::spawn(async move {
            adapter.run(items, profile, cancel, tx).await;
        });

        ReceiverStream::new(rx)
    }

    async fn run(
        &self,
        items: Vec<TransferItem>,
        profile: PerformanceProfile,
        cancel: CancellationToken,
        tx: mpsc::Sender<TransferEvent>,
    ) {
        let pacer = Arc::new(RequestPacer::new(profile.request_delay));
        let per_host = profile.max_connections_per_server;
        let settings = EngineSettings {
            timeout: self.timeout,
            connect_timeout: self.connect_timeout,
        };

        futures::stream::iter(items)
            .map(|item| {
                let pacer = Arc::clone(&pacer);
                let settings = settings.clone();
                let cancel = cancel.clone();
                let tx = tx.clone();
                async move {
                    let index = item.index;
                    let terminal = self
                        .fetch_item(item, settings, per_host, &pacer, &cancel, &tx)
                        .await;
                    if tx.send(terminal).await.is_err() {
                        tracing::debug!(page = index, "Transfer event receiver dropped");
                    }
                }
            })
            .buffer_unordered(profile.max_concurrent_downloads.max(1))
            .collect::<()>()
            .await;
    }

    /// Run one item to completion and return its terminal event
    async fn fetch_item(
        &self,
        item: TransferItem,
        settings: EngineSettings,
        per_host: usize,
        pacer: &RequestPacer,
        cancel: &CancellationToken,
        tx: &mpsc::Sender<TransferEvent>,
    ) -> TransferEvent {
        let index = item.index;
        let failed = |error: FetchError| TransferEvent::Failed { index, error };

        if cancel.is_cancelled() {
            return failed(FetchError::Cancelled);
        }

        let host = match host_key(&item.url) {
            Ok(host) => host,
            Err(error) => return failed(error),
        };

        let _slot = tokio::select! {
            _ = cancel.cancelled() => return failed(FetchError::Cancelled),
            slot = self.host_slots.acquire(&host, per_host) => slot,
        };

        tokio::select! {
            _ = cancel.cancelled() => return failed(FetchError::Cancelled),
            _ = pacer.wait() => {}
        }

        let (progress_tx, mut progress_rx) = mpsc::channel(PROGRESS_CHANNEL_CAPACITY);
        let engine = Arc::clone(&self.engine);
        let engine_item = item.clone();
        let mut handle = tokio::spawn(async move {
            engine
                .fetch_one(&engine_item, &settings, progress_tx)
                .await
        });

        let silence = tokio::time::sleep(self.silence_timeout);
        tokio::pin!(silence);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    handle.abort();
                    return failed(FetchError::Cancelled);
                }
                joined = &mut handle => {
                    // Reports sent just before the engine returned are still buffered
                    while let Ok(progress) = progress_rx.try_recv() {
                        let _ = tx.send(bytes_progress(index, progress)).await;
                    }
                    return match joined {
                        Ok(Ok(bytes)) => TransferEvent::Succeeded {
                            index,
                            path: item.destination,
                            bytes,
                        },
                        Ok(Err(error)) => failed(error),
                        Err(e) => {
                            tracing::error!(page = index, error = %e, "Transfer engine task died");
                            failed(FetchError::EngineFailure(format!("engine task failed: {e}")))
                        }
                    };
                }
                Some(progress) = progress_rx.recv() => {
                    silence
                        .as_mut()
                        .reset(tokio::time::Instant::now() + self.silence_timeout);
                    // Awaiting here applies the consumer's backpressure to the engine
                    let _ = tx.send(bytes_progress(index, progress)).await;
                }
                _ = &mut silence => {
                    tracing::warn!(
                        page = index,
                        url = %item.url,
                        silence_secs = self.silence_timeout.as_secs(),
                        "Transfer engine went silent, aborting item"
                    );
                    handle.abort();
                    return failed(FetchError::EngineUnresponsive);
                }
            }
        }
    }
}

fn bytes_progress(index: usize, progress: EngineProgress) -> TransferEvent {
    TransferEvent::BytesProgress {
        index,
        bytes_so_far: progress.bytes_so_far,
        bytes_total: progress.bytes_total,
    }
}

/// Host used as the connection-slot key for `url`
///
/// Only absolute http(s) URLs with a host are accepted.
pub fn host_key(url: &str) -> Result<String, FetchError> {
    let parsed = url::Url::parse(url).map_err(|e| FetchError::MalformedUrl(format!("{url}: {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(FetchError::MalformedUrl(format!(
            "{url}: unsupported scheme '{}'",
            parsed.scheme()
        )));
    }
    let host = parsed
        .host_str()
        .ok_or_else(|| FetchError::MalformedUrl(format!("{url}: missing host")))?;
    Ok(match parsed.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}
