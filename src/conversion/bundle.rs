//! Page-ordered zip bundle (.cbz) encoder

use super::traits::PageEncoder;
use crate::error::{Error, Result};
use crate::types::ConversionFormat;
use async_trait::async_trait;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Writes pages into a zip container with zero-padded sequence names
///
/// Entries are named `001.jpg`, `002.png`, ... so comic readers keep the page
/// order regardless of the source file names. Quality 100 stores pages as-is;
/// lower values deflate with increasing effort (level 1 at 99 up to 9 at 1).
#[derive(Clone, Copy, Debug, Default)]
pub struct ArchiveBundleEncoder;

impl ArchiveBundleEncoder {
    /// Create a new encoder
    pub fn new() -> Self {
        Self
    }

    /// Deflate level for a 1-100 quality, None meaning stored
    pub fn compression_level(quality: u8) -> Option<i32> {
        let quality = quality.clamp(1, 100) as i32;
        let level = ((100 - quality) * 9 + 98) / 99;
        (level > 0).then_some(level.min(9))
    }

    /// Entry name for the page at `position`
    pub fn entry_name(position: usize, page: &Path) -> String {
        match page.extension().and_then(|e| e.to_str()) {
            Some(ext) => format!("{:03}.{}", position + 1, ext.to_ascii_lowercase()),
            None => format!("{:03}", position + 1),
        }
    }

    fn write_bundle(pages: &[PathBuf], output: &Path, quality: u8) -> Result<u64> {
        let file = std::fs::File::create(output)?;
        let mut writer = zip::ZipWriter::new(file);
        let options = match Self::compression_level(quality) {
            Some(level) => zip::write::FileOptions::default()
                .compression_method(zip::CompressionMethod::Deflated)
                .compression_level(Some(level)),
            None => zip::write::FileOptions::default()
                .compression_method(zip::CompressionMethod::Stored),
        };

        for (position, page) in pages.iter().enumerate() {
            let data = std::fs::read(page)?;
            let name = Self::entry_name(position, page);
            writer.start_file(name.as_str(), options).map_err(|e| {
                Error::Other(format!("failed to add {name} to bundle: {e}"))
            })?;
            writer.write_all(&data)?;
        }

        let mut file = writer
            .finish()
            .map_err(|e| Error::Other(format!("failed to finish bundle: {e}")))?;
        file.flush()?;
        file.sync_all()?;

        let written = file.metadata()?.len();
        debug!(?output, pages = pages.len(), written, "bundle written");
        Ok(written)
    }

    fn count_entries(output: &Path) -> Result<usize> {
        let file = std::fs::File::open(output)?;
        let archive = zip::ZipArchive::new(file)
            .map_err(|e| Error::Other(format!("bundle is not a readable zip: {e}")))?;
        Ok(archive.len())
    }
}

#[async_trait]
impl PageEncoder for ArchiveBundleEncoder {
    fn format(&self) -> ConversionFormat {
        ConversionFormat::ArchiveBundle
    }

    async fn encode(&self, pages: &[PathBuf], output: &Path, quality: u8) -> Result<u64> {
        let pages = pages.to_vec();
        let output = output.to_path_buf();
        tokio::task::spawn_blocking(move || Self::write_bundle(&pages, &output, quality))
            .await
            .map_err(|e| Error::Other(format!("bundle task failed: {e}")))?
    }

    async fn verify(&self, output: &Path, expected_pages: usize) -> Result<()> {
        let output = output.to_path_buf();
        let entries = tokio::task::spawn_blocking(move || Self::count_entries(&output))
            .await
            .map_err(|e| Error::Other(format!("bundle verification task failed: {e}")))??;
        if entries != expected_pages {
            return Err(Error::Other(format!(
                "bundle holds {entries} entries, expected {expected_pages}"
            )));
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "zip-bundle"
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::TempDir;

    #[test]
    fn quality_maps_to_compression_level() {
        assert_eq!(ArchiveBundleEncoder::compression_level(100), None);
        assert_eq!(ArchiveBundleEncoder::compression_level(99), Some(1));
        assert_eq!(ArchiveBundleEncoder::compression_level(50), Some(5));
        assert_eq!(ArchiveBundleEncoder::compression_level(1), Some(9));
        // Out-of-range values are clamped
        assert_eq!(ArchiveBundleEncoder::compression_level(0), Some(9));
        assert_eq!(ArchiveBundleEncoder::compression_level(255), None);
    }

    #[test]
    fn entry_names_are_zero_padded_and_lowercased() {
        assert_eq!(
            ArchiveBundleEncoder::entry_name(0, Path::new("/g/cover.JPG")),
            "001.jpg"
        );
        assert_eq!(
            ArchiveBundleEncoder::entry_name(41, Path::new("/g/page.png")),
            "042.png"
        );
        assert_eq!(ArchiveBundleEncoder::entry_name(2, Path::new("/g/raw")), "003");
    }

    #[tokio::test]
    async fn bundle_preserves_given_order() {
        let dir = TempDir::new().unwrap();
        // File names deliberately sort differently from the requested order
        let pages = vec![
            dir.path().join("b.jpg"),
            dir.path().join("a.jpg"),
            dir.path().join("c.png"),
        ];
        for (i, page) in pages.iter().enumerate() {
            std::fs::write(page, format!("page-{i}")).unwrap();
        }
        let output = dir.path().join("out.cbz");

        let encoder = ArchiveBundleEncoder::new();
        let written = encoder.encode(&pages, &output, 100).await.unwrap();
        assert_eq!(written, std::fs::metadata(&output).unwrap().len());
        encoder.verify(&output, 3).await.unwrap();

        let mut archive = zip::ZipArchive::new(std::fs::File::open(&output).unwrap()).unwrap();
        let mut entries = Vec::new();
        for i in 0..archive.len() {
            let mut entry = archive.by_index(i).unwrap();
            let mut content = String::new();
            entry.read_to_string(&mut content).unwrap();
            entries.push((entry.name().to_string(), content));
        }
        assert_eq!(
            entries,
            vec![
                ("001.jpg".to_string(), "page-0".to_string()),
                ("002.jpg".to_string(), "page-1".to_string()),
                ("003.png".to_string(), "page-2".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn verify_rejects_wrong_entry_count_and_garbage() {
        let dir = TempDir::new().unwrap();
        let page = dir.path().join("1.jpg");
        std::fs::write(&page, b"data").unwrap();
        let output = dir.path().join("out.cbz");

        let encoder = ArchiveBundleEncoder::new();
        encoder.encode(&[page], &output, 50).await.unwrap();
        assert!(encoder.verify(&output, 2).await.is_err());

        let garbage = dir.path().join("garbage.cbz");
        std::fs::write(&garbage, b"not a zip").unwrap();
        assert!(encoder.verify(&garbage, 1).await.is_err());
    }
}
