use super::*;
use crate::error::{ConversionErrorKind, Error, Result};
use async_trait::async_trait;
use std::io::Read;
use tempfile::TempDir;

/// Encoder that writes fewer bytes than it reports
struct ShortWriteEncoder;

#[async_trait]
impl PageEncoder for ShortWriteEncoder {
    fn format(&self) -> ConversionFormat {
        ConversionFormat::ArchiveBundle
    }

    async fn encode(&self, _pages: &[PathBuf], output: &Path, _quality: u8) -> Result<u64> {
        tokio::fs::write(output, b"trunc").await?;
        Ok(4096)
    }

    fn name(&self) -> &'static str {
        "short-write"
    }
}

/// Encoder that always errors
struct BrokenEncoder;

#[async_trait]
impl PageEncoder for BrokenEncoder {
    fn format(&self) -> ConversionFormat {
        ConversionFormat::PaginatedDocument
    }

    async fn encode(&self, _pages: &[PathBuf], _output: &Path, _quality: u8) -> Result<u64> {
        Err(Error::ExternalTool("encoder crashed".to_string()))
    }

    fn name(&self) -> &'static str {
        "broken"
    }
}

fn gallery(dir: &TempDir, name: &str, pages: usize) -> (PathBuf, Vec<PathBuf>) {
    let source = dir.path().join(name);
    std::fs::create_dir_all(&source).unwrap();
    let files = (1..=pages)
        .map(|i| {
            let path = source.join(format!("{i:03}.jpg"));
            std::fs::write(&path, format!("image-{i}")).unwrap();
            path
        })
        .collect();
    (source, files)
}

fn settings(delete_source: bool) -> ConversionSettings {
    ConversionSettings {
        delete_source,
        ..ConversionSettings::default()
    }
}

fn bundle_converter() -> Converter {
    Converter::new().with_encoder(Arc::new(ArchiveBundleEncoder::new()))
}

#[test]
fn default_output_sits_inside_source_dir() {
    assert_eq!(
        default_output_path(Path::new("/dl/My Gallery"), ConversionFormat::ArchiveBundle),
        PathBuf::from("/dl/My Gallery/My Gallery.cbz")
    );
    assert_eq!(
        default_output_path(Path::new("/dl/x"), ConversionFormat::PaginatedDocument),
        PathBuf::from("/dl/x/x.pdf")
    );
}

#[test]
fn partial_path_appends_suffix() {
    assert_eq!(
        partial_path(Path::new("/dl/x/x.cbz")),
        PathBuf::from("/dl/x/x.cbz.partial")
    );
}

#[tokio::test]
async fn converts_and_keeps_sources_by_default() {
    let dir = TempDir::new().unwrap();
    let (source, pages) = gallery(&dir, "g1", 3);

    let result = bundle_converter()
        .convert(ConversionRequest::new(None, source.clone(), pages.clone(), &settings(false)))
        .await
        .unwrap();

    assert_eq!(result.output_path, source.join("g1.cbz"));
    assert_eq!(result.pages, 3);
    assert!(!result.source_deleted);
    assert_eq!(
        result.bytes_written,
        std::fs::metadata(&result.output_path).unwrap().len()
    );
    assert!(pages.iter().all(|p| p.exists()));
    assert!(!partial_path(&result.output_path).exists());
}

#[tokio::test]
async fn delete_source_removes_pages_and_empty_dir() {
    let dir = TempDir::new().unwrap();
    let (source, pages) = gallery(&dir, "g2", 2);
    let output = dir.path().join("g2.cbz");

    let result = bundle_converter()
        .convert(
            ConversionRequest::new(None, source.clone(), pages.clone(), &settings(true))
                .with_output_path(output.clone()),
        )
        .await
        .unwrap();

    assert!(result.source_deleted);
    assert!(output.exists());
    assert!(pages.iter().all(|p| !p.exists()));
    assert!(!source.exists());
}

#[tokio::test]
async fn delete_source_keeps_dir_holding_the_output() {
    let dir = TempDir::new().unwrap();
    let (source, pages) = gallery(&dir, "g3", 2);

    let result = bundle_converter()
        .convert(ConversionRequest::new(None, source.clone(), pages, &settings(true)))
        .await
        .unwrap();

    assert!(result.source_deleted);
    assert!(source.exists());
    assert!(result.output_path.exists());
}

#[tokio::test]
async fn output_follows_request_order() {
    let dir = TempDir::new().unwrap();
    let (source, mut pages) = gallery(&dir, "g4", 3);
    pages.reverse();

    let result = bundle_converter()
        .convert(ConversionRequest::new(None, source, pages, &settings(false)))
        .await
        .unwrap();

    let mut archive =
        zip::ZipArchive::new(std::fs::File::open(&result.output_path).unwrap()).unwrap();
    let mut first = String::new();
    archive.by_index(0).unwrap().read_to_string(&mut first).unwrap();
    assert_eq!(first, "image-3");
}

#[tokio::test]
async fn empty_page_list_is_no_pages_found() {
    let dir = TempDir::new().unwrap();
    let err = bundle_converter()
        .convert(ConversionRequest::new(
            None,
            dir.path().to_path_buf(),
            Vec::new(),
            &settings(false),
        ))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ConversionErrorKind::NoPagesFound);
}

#[tokio::test]
async fn missing_or_empty_page_is_rejected_before_encoding() {
    let dir = TempDir::new().unwrap();
    let (source, mut pages) = gallery(&dir, "g5", 2);
    let empty = source.join("003.jpg");
    std::fs::write(&empty, b"").unwrap();
    pages.push(empty.clone());

    let err = bundle_converter()
        .convert(ConversionRequest::new(None, source.clone(), pages, &settings(true)))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ConversionErrorKind::MissingPage);
    assert!(matches!(err, ConversionError::MissingPage { path } if path == empty));
    assert!(!source.join("g5.cbz").exists());
}

#[tokio::test]
async fn unregistered_format_is_unsupported() {
    let dir = TempDir::new().unwrap();
    let (source, pages) = gallery(&dir, "g6", 1);
    let settings = ConversionSettings {
        format: ConversionFormat::PaginatedDocument,
        ..ConversionSettings::default()
    };

    let err = bundle_converter()
        .convert(ConversionRequest::new(None, source, pages, &settings))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ConversionErrorKind::UnsupportedFormat);
}

#[tokio::test]
async fn existing_output_conflicts_unless_overwrite() {
    let dir = TempDir::new().unwrap();
    let (source, pages) = gallery(&dir, "g7", 2);
    let output = source.join("g7.cbz");
    std::fs::write(&output, b"previous").unwrap();

    let err = bundle_converter()
        .convert(ConversionRequest::new(None, source.clone(), pages.clone(), &settings(false)))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ConversionErrorKind::OutputPathConflict);
    assert_eq!(std::fs::read(&output).unwrap(), b"previous");

    let overwrite = ConversionSettings {
        overwrite: true,
        ..ConversionSettings::default()
    };
    let result = bundle_converter()
        .convert(ConversionRequest::new(None, source, pages, &overwrite))
        .await
        .unwrap();
    assert_ne!(std::fs::read(&result.output_path).unwrap(), b"previous");
}

#[tokio::test]
async fn short_write_never_deletes_sources() {
    let dir = TempDir::new().unwrap();
    let (source, pages) = gallery(&dir, "g8", 3);
    let converter = Converter::new().with_encoder(Arc::new(ShortWriteEncoder));

    let err = converter
        .convert(ConversionRequest::new(None, source.clone(), pages.clone(), &settings(true)))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ConversionErrorKind::EncodingFailed);
    assert!(pages.iter().all(|p| p.exists()));
    let output = source.join("g8.cbz");
    assert!(!output.exists());
    assert!(!partial_path(&output).exists());
}

#[tokio::test]
async fn encoder_error_is_encoding_failed() {
    let dir = TempDir::new().unwrap();
    let (source, pages) = gallery(&dir, "g9", 1);
    let converter = Converter::new().with_encoder(Arc::new(BrokenEncoder));
    let settings = ConversionSettings {
        format: ConversionFormat::PaginatedDocument,
        delete_source: true,
        ..ConversionSettings::default()
    };

    let err = converter
        .convert(ConversionRequest::new(None, source, pages.clone(), &settings))
        .await
        .unwrap_err();

    match err {
        ConversionError::EncodingFailed { reason, .. } => assert!(reason.contains("crashed")),
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(pages[0].exists());
}

#[tokio::test]
async fn convert_directory_uses_natural_order() {
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("loose");
    std::fs::create_dir_all(&source).unwrap();
    for name in ["10.jpg", "2.jpg", "1.jpg"] {
        std::fs::write(source.join(name), name).unwrap();
    }
    std::fs::write(source.join("notes.txt"), "ignored").unwrap();

    let result = bundle_converter()
        .convert_directory(&source, &settings(false), None)
        .await
        .unwrap();
    assert_eq!(result.pages, 3);

    let mut archive =
        zip::ZipArchive::new(std::fs::File::open(&result.output_path).unwrap()).unwrap();
    let mut contents = Vec::new();
    for i in 0..archive.len() {
        let mut content = String::new();
        archive.by_index(i).unwrap().read_to_string(&mut content).unwrap();
        contents.push(content);
    }
    assert_eq!(contents, vec!["1.jpg", "2.jpg", "10.jpg"]);
}

#[tokio::test]
async fn convert_directory_without_images_is_no_pages_found() {
    let dir = TempDir::new().unwrap();
    let err = bundle_converter()
        .convert_directory(dir.path(), &settings(false), None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ConversionErrorKind::NoPagesFound);
}
