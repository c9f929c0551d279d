//! Conversion pipeline
//!
//! Turns a finished gallery's page files into a single archive bundle or
//! paginated document. The pipeline is careful about data loss:
//!
//! - page order comes from the request's explicit list, never from a
//!   directory listing
//! - the encoder writes to `<output>.partial`; the file is only renamed into
//!   place after its size matches what the encoder reported and it reads back
//! - source pages are deleted only after the rename, when requested

mod bundle;
mod document;
mod traits;

pub use bundle::ArchiveBundleEncoder;
pub use document::DocumentEncoder;
pub use traits::PageEncoder;

use crate::error::ConversionError;
use crate::types::{ConversionFormat, ConversionSettings, JobId};
use crate::utils::{collect_image_files, remove_dir_if_empty};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Suffix of the temporary file written before verification
const PARTIAL_SUFFIX: &str = "partial";

/// What to convert
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionRequest {
    /// Job the pages belong to, if any
    pub job_id: Option<JobId>,
    /// Directory holding the pages
    pub source_dir: PathBuf,
    /// Page files in output order
    pub pages: Vec<PathBuf>,
    /// Output kind
    pub format: ConversionFormat,
    /// Encoder quality; clamped to 1-100
    pub quality: u8,
    /// Remove the page files after a verified write
    pub delete_source: bool,
    /// Replace an existing output file
    pub overwrite: bool,
    /// Output path; defaults to `<source_dir>/<dir name>.<ext>`
    pub output_path: Option<PathBuf>,
}

impl ConversionRequest {
    /// Build a request from conversion settings
    pub fn new(
        job_id: Option<JobId>,
        source_dir: PathBuf,
        pages: Vec<PathBuf>,
        settings: &ConversionSettings,
    ) -> Self {
        Self {
            job_id,
            source_dir,
            pages,
            format: settings.format,
            quality: settings.quality,
            delete_source: settings.delete_source,
            overwrite: settings.overwrite,
            output_path: None,
        }
    }

    /// Set an explicit output path
    pub fn with_output_path(mut self, output_path: PathBuf) -> Self {
        self.output_path = Some(output_path);
        self
    }
}

/// Successful conversion
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionResult {
    /// Output kind
    pub format: ConversionFormat,
    /// Final output path
    pub output_path: PathBuf,
    /// Size of the output file
    pub bytes_written: u64,
    /// Pages written
    pub pages: usize,
    /// Whether every source page was removed
    pub source_deleted: bool,
}

/// Default output path: `<source_dir>/<dir name>.<ext>`
pub fn default_output_path(source_dir: &Path, format: ConversionFormat) -> PathBuf {
    let stem = source_dir
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty())
        .unwrap_or("gallery");
    source_dir.join(format!("{stem}.{}", format.extension()))
}

fn partial_path(output: &Path) -> PathBuf {
    let mut name = output.as_os_str().to_os_string();
    name.push(".");
    name.push(PARTIAL_SUFFIX);
    PathBuf::from(name)
}

/// Runs conversions with a set of registered encoders
#[derive(Clone, Default)]
pub struct Converter {
    encoders: HashMap<ConversionFormat, Arc<dyn PageEncoder>>,
}

impl Converter {
    /// Converter with no encoders
    pub fn new() -> Self {
        Self::default()
    }

    /// Converter with the built-in encoders
    ///
    /// The archive bundle encoder is always available; the document encoder
    /// only when ImageMagick can be found.
    pub fn with_defaults(config: &crate::config::ConversionConfig) -> Self {
        let mut converter = Self::new().with_encoder(Arc::new(ArchiveBundleEncoder::new()));
        match DocumentEncoder::from_config(config) {
            Some(encoder) => converter = converter.with_encoder(Arc::new(encoder)),
            None => debug!("ImageMagick not found, paginated documents unavailable"),
        }
        converter
    }

    /// Register (or replace) the encoder for its format
    pub fn with_encoder(mut self, encoder: Arc<dyn PageEncoder>) -> Self {
        self.encoders.insert(encoder.format(), encoder);
        self
    }

    /// Whether `format` has an encoder
    pub fn supports(&self, format: ConversionFormat) -> bool {
        self.encoders.contains_key(&format)
    }

    /// Convert the pages named in `request`
    pub async fn convert(
        &self,
        request: ConversionRequest,
    ) -> std::result::Result<ConversionResult, ConversionError> {
        if request.pages.is_empty() {
            return Err(ConversionError::NoPagesFound {
                source_dir: request.source_dir,
            });
        }

        for page in &request.pages {
            match tokio::fs::metadata(page).await {
                Ok(meta) if meta.is_file() && meta.len() > 0 => {}
                _ => return Err(ConversionError::MissingPage { path: page.clone() }),
            }
        }

        let encoder = self.encoders.get(&request.format).ok_or_else(|| {
            ConversionError::UnsupportedFormat {
                format: request.format.to_string(),
            }
        })?;

        let output = request
            .output_path
            .clone()
            .unwrap_or_else(|| default_output_path(&request.source_dir, request.format));

        if tokio::fs::try_exists(&output).await.unwrap_or(false) && !request.overwrite {
            return Err(ConversionError::OutputPathConflict { path: output });
        }

        let quality = request.quality.clamp(1, 100);
        let partial = partial_path(&output);
        let _ = tokio::fs::remove_file(&partial).await;

        info!(
            job_id = ?request.job_id,
            encoder = encoder.name(),
            pages = request.pages.len(),
            ?output,
            quality,
            "Converting gallery"
        );

        let bytes_written = match self
            .write_verified(encoder.as_ref(), &request.pages, &partial, quality)
            .await
        {
            Ok(bytes) => bytes,
            Err(reason) => {
                let _ = tokio::fs::remove_file(&partial).await;
                warn!(?output, %reason, "Conversion failed, source pages kept");
                return Err(ConversionError::EncodingFailed { output, reason });
            }
        };

        if request.overwrite {
            let _ = tokio::fs::remove_file(&output).await;
        }
        if let Err(e) = tokio::fs::rename(&partial, &output).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(ConversionError::EncodingFailed {
                output,
                reason: format!("failed to move verified output into place: {e}"),
            });
        }

        let source_deleted = if request.delete_source {
            delete_sources(&request.pages, &request.source_dir).await
        } else {
            false
        };

        info!(
            job_id = ?request.job_id,
            ?output,
            bytes_written,
            source_deleted,
            "Conversion complete"
        );

        Ok(ConversionResult {
            format: request.format,
            output_path: output,
            bytes_written,
            pages: request.pages.len(),
            source_deleted,
        })
    }

    /// Convert every supported image in `source_dir`, in natural file-name order
    pub async fn convert_directory(
        &self,
        source_dir: &Path,
        settings: &ConversionSettings,
        output_path: Option<PathBuf>,
    ) -> std::result::Result<ConversionResult, ConversionError> {
        let pages = collect_image_files(source_dir).await.unwrap_or_default();
        let mut request = ConversionRequest::new(None, source_dir.to_path_buf(), pages, settings);
        request.output_path = output_path;
        self.convert(request).await
    }

    /// Encode to `partial` and check the result; Err carries the reason
    async fn write_verified(
        &self,
        encoder: &dyn PageEncoder,
        pages: &[PathBuf],
        partial: &Path,
        quality: u8,
    ) -> std::result::Result<u64, String> {
        let reported = encoder
            .encode(pages, partial, quality)
            .await
            .map_err(|e| e.to_string())?;

        let actual = tokio::fs::metadata(partial)
            .await
            .map_err(|e| format!("output missing after encode: {e}"))?
            .len();

        if actual == 0 {
            return Err("encoder produced an empty file".to_string());
        }
        if actual != reported {
            return Err(format!(
                "short write: encoder reported {reported} bytes, file holds {actual}"
            ));
        }

        encoder
            .verify(partial, pages.len())
            .await
            .map_err(|e| format!("output failed verification: {e}"))?;

        Ok(actual)
    }
}

/// Remove page files, then the directory if it ended up empty
///
/// Returns whether every page was removed.
async fn delete_sources(pages: &[PathBuf], source_dir: &Path) -> bool {
    let mut all_removed = true;
    for page in pages {
        if let Err(e) = tokio::fs::remove_file(page).await {
            warn!(?page, error = %e, "Failed to delete source page");
            all_removed = false;
        }
    }

    match remove_dir_if_empty(source_dir).await {
        Ok(true) => debug!(?source_dir, "Removed empty source directory"),
        Ok(false) => {}
        Err(e) => debug!(?source_dir, error = %e, "Could not inspect source directory"),
    }

    all_removed
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
