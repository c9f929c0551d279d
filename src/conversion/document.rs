//! Paginated document (.pdf) encoder using the ImageMagick CLI

use super::traits::PageEncoder;
use crate::config::ConversionConfig;
use crate::error::{Error, Result};
use crate::types::ConversionFormat;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;
use tokio::process::Command;

/// Writes pages into a single PDF via `magick` (or IM6 `convert`)
///
/// # Examples
///
/// ```no_run
/// use gallery_dl_core::conversion::DocumentEncoder;
///
/// let encoder = DocumentEncoder::from_path().expect("ImageMagick not found in PATH");
/// ```
#[derive(Clone, Debug)]
pub struct DocumentEncoder {
    binary_path: PathBuf,
}

impl DocumentEncoder {
    /// Create an encoder with an explicit binary path
    pub fn new(binary_path: PathBuf) -> Self {
        Self { binary_path }
    }

    /// Attempt to find ImageMagick in PATH (`magick`, then `convert`)
    pub fn from_path() -> Option<Self> {
        which::which("magick")
            .or_else(|_| which::which("convert"))
            .ok()
            .map(Self::new)
    }

    /// Resolve the binary from configuration, None when unavailable
    pub fn from_config(config: &ConversionConfig) -> Option<Self> {
        match &config.magick_path {
            Some(path) => Some(Self::new(path.clone())),
            None => Self::from_path(),
        }
    }

    fn command(&self, pages: &[PathBuf], output: &Path, quality: u8) -> Command {
        let mut cmd = Command::new(&self.binary_path);
        cmd.args(pages)
            .arg("-quality")
            .arg(quality.clamp(1, 100).to_string())
            // Explicit coder: the pipeline writes to a temporary name without a .pdf suffix
            .arg(format!("pdf:{}", output.display()))
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl PageEncoder for DocumentEncoder {
    fn format(&self) -> ConversionFormat {
        ConversionFormat::PaginatedDocument
    }

    async fn encode(&self, pages: &[PathBuf], output: &Path, quality: u8) -> Result<u64> {
        let result = self
            .command(pages, output, quality)
            .output()
            .await
            .map_err(|e| {
                Error::ExternalTool(format!(
                    "Failed to execute {}: {}",
                    self.binary_path.display(),
                    e
                ))
            })?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(Error::ExternalTool(format!(
                "ImageMagick exited with {}: {}",
                result.status,
                stderr.trim()
            )));
        }

        Ok(tokio::fs::metadata(output).await?.len())
    }

    async fn verify(&self, output: &Path, _expected_pages: usize) -> Result<()> {
        let mut file = tokio::fs::File::open(output).await?;
        let mut header = [0u8; 5];
        file.read_exact(&mut header).await?;
        if &header != b"%PDF-" {
            return Err(Error::Other(format!(
                "{} does not start with a PDF header",
                output.display()
            )));
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "imagemagick-pdf"
    }
}
