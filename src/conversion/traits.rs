//! Encoder capability used by the conversion pipeline

use crate::error::{Error, Result};
use crate::types::ConversionFormat;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;

/// Encodes an ordered list of page images into a single output file
#[async_trait]
pub trait PageEncoder: Send + Sync {
    /// Output kind this encoder produces
    fn format(&self) -> ConversionFormat;

    /// Write `pages` (already in page order) to `output`
    ///
    /// `quality` is in 1..=100. Returns the number of bytes the encoder
    /// believes it wrote; the pipeline checks this against the file on disk.
    async fn encode(&self, pages: &[PathBuf], output: &Path, quality: u8) -> Result<u64>;

    /// Check that a written output is readable and holds `expected_pages` pages
    ///
    /// The default only checks that the file can be opened and read.
    async fn verify(&self, output: &Path, _expected_pages: usize) -> Result<()> {
        let mut file = tokio::fs::File::open(output).await?;
        let mut first = [0u8; 1];
        let read = file.read(&mut first).await?;
        if read == 0 {
            return Err(Error::Other(format!("{} is empty", output.display())));
        }
        Ok(())
    }

    /// Name of this encoder for logging
    fn name(&self) -> &'static str;
}
