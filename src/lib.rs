//! # gallery-dl-core
//!
//! Download orchestration and conversion pipeline for multi-page image galleries.
//!
//! ## Design Philosophy
//!
//! gallery-dl-core is designed to be:
//! - **Bounded** - Gallery-level and per-host connection caps hold across every batch
//! - **Honest about partial results** - Every page ends Succeeded or Failed, every job reports once
//! - **Library-first** - No CLI or UI; site scraping plugs in through [`MetadataOracle`]
//! - **Event-driven** - Consumers subscribe to events, no polling required
//!
//! ## Quick Start
//!
//! ```no_run
//! use gallery_dl_core::oracle::GalleryMetadata;
//! use gallery_dl_core::types::SubmitOptions;
//! use gallery_dl_core::{Config, GalleryDownloader, StaticOracle};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let oracle = Arc::new(StaticOracle::new());
//!     oracle.insert(
//!         "177013",
//!         GalleryMetadata {
//!             title: "Sample Gallery".to_string(),
//!             source_url: None,
//!             page_urls: vec!["https://i.example.com/1.jpg".to_string()],
//!         },
//!     );
//!
//!     let downloader = GalleryDownloader::new(Config::default(), oracle).await?;
//!
//!     // Subscribe to events
//!     let mut events = downloader.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let batch = downloader.submit(["177013"], SubmitOptions::default()).await?;
//!     let summary = batch.wait().await;
//!     downloader.shutdown().await?;
//!     std::process::exit(summary.outcome.exit_code());
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Conversion pipeline (page bundles and documents)
pub mod conversion;
/// Database persistence layer
pub mod db;
/// Core downloader implementation (decomposed into focused submodules)
pub mod downloader;
/// Error types
pub mod error;
/// History store contract and records
pub mod history;
/// Metadata oracle seam
pub mod oracle;
/// Performance profiles
pub mod profile;
/// Progress aggregation
pub mod progress;
/// Retry logic with exponential backoff
pub mod retry;
/// Transfer engine adapter
pub mod transfer;
/// Core types and events
pub mod types;
/// Utility functions
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use conversion::{ConversionRequest, ConversionResult, Converter};
pub use db::Database;
pub use downloader::{BatchHandle, BatchSummary, Collaborators, GalleryDownloader};
pub use error::{ConversionError, Error, FetchError, OracleError, Result};
pub use history::{HistoryFilter, HistoryRecord, HistoryStore};
pub use oracle::{GalleryMetadata, MetadataOracle, StaticOracle};
pub use profile::{PerformanceProfile, ProfileMode};
pub use types::{
    BatchOutcome, ConversionFormat, ConversionSettings, Event, GalleryId, JobFailureReason, JobId,
    JobResult, JobStatus, RejectReason, Rejection, SubmitOptions,
};

/// Wait for a batch, cancelling it on SIGINT/SIGTERM (Ctrl+C elsewhere)
///
/// After a signal the batch still reports every job, so the summary's
/// outcome is [`BatchOutcome::Cancelled`].
///
/// # Example
///
/// ```no_run
/// use gallery_dl_core::{wait_with_interrupt, GalleryDownloader, SubmitOptions};
///
/// # async fn run(downloader: GalleryDownloader) -> gallery_dl_core::Result<()> {
/// let batch = downloader.submit(["177013"], SubmitOptions::default()).await?;
/// let summary = wait_with_interrupt(batch).await;
/// std::process::exit(summary.outcome.exit_code());
/// # }
/// ```
pub async fn wait_with_interrupt(mut batch: BatchHandle) -> BatchSummary {
    let signal = wait_for_signal();
    tokio::pin!(signal);
    let mut interrupted = false;

    loop {
        tokio::select! {
            _ = &mut signal, if !interrupted => {
                tracing::info!(batch_id = %batch.batch_id(), "Interrupted, cancelling batch");
                interrupted = true;
                batch.cancel().await;
            }
            result = batch.next() => {
                if result.is_none() {
                    break;
                }
            }
        }
    }

    batch.wait().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration can fail in restricted environments (containers, tests)
    match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("Received SIGTERM signal"),
                _ = sigint.recv() => tracing::info!("Received SIGINT signal (Ctrl+C)"),
            }
        }
        _ => {
            tracing::warn!("Could not register signal handlers, using ctrl_c fallback");
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
    }
}
