use crate::db::*;
use crate::history::{HistoryFilter, HistoryRecord};
use crate::types::{GalleryId, JobStatus};
use tempfile::NamedTempFile;

fn record() -> HistoryRecord {
    let now = chrono::Utc::now();
    HistoryRecord {
        gallery_id: GalleryId::new("1"),
        title: "After Close".to_string(),
        source_url: None,
        download_path: None,
        page_count: 1,
        pages_succeeded: 1,
        status: JobStatus::Done,
        created_at: now,
        finished_at: now,
        converted_format: None,
        conversion_path: None,
        conversion_error: None,
        size_bytes: 10,
    }
}

/// Appending after the pool is closed must fail, not hang or panic, so the
/// downloader can surface HistoryWriteFailed.
#[tokio::test]
async fn test_insert_history_after_pool_close_returns_error() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();

    db.pool().close().await;

    let result = db.insert_history(&record()).await;
    assert!(
        result.is_err(),
        "insert_history after pool close should return an error, got: {:?}",
        result
    );
}

#[tokio::test]
async fn test_query_history_after_pool_close_returns_error() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();

    db.close().await;

    let result = db.query_history(&HistoryFilter::default(), 10).await;
    assert!(result.is_err());
    assert!(db.history_has_done(&GalleryId::new("1")).await.is_err());
}
