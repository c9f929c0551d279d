//! History management operations.

use crate::history::{HistoryEntry, HistoryFilter, HistoryRecord, HistoryStats};
use crate::types::{GalleryId, JobStatus};
use crate::{Error, Result};
use sqlx::{QueryBuilder, Sqlite};

use super::{Database, HistoryRow};

const HISTORY_COLUMNS: &str = "id, gallery_id, title, source_url, download_path, page_count, \
     pages_succeeded, status, created_at, finished_at, converted_format, conversion_path, \
     conversion_error, size_bytes";

fn path_string(path: Option<&std::path::PathBuf>) -> Option<String> {
    path.map(|p| p.to_string_lossy().into_owned())
}

impl Database {
    /// Insert a finished job into history
    pub async fn insert_history(&self, record: &HistoryRecord) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO history (
                gallery_id, title, source_url, download_path, page_count,
                pages_succeeded, status, created_at, finished_at,
                converted_format, conversion_path, conversion_error, size_bytes
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.gallery_id.as_str())
        .bind(&record.title)
        .bind(&record.source_url)
        .bind(path_string(record.download_path.as_ref()))
        .bind(record.page_count as i64)
        .bind(record.pages_succeeded as i64)
        .bind(record.status.to_i32())
        .bind(record.created_at.timestamp())
        .bind(record.finished_at.timestamp())
        .bind(record.converted_format.map(|f| f.as_str()))
        .bind(path_string(record.conversion_path.as_ref()))
        .bind(&record.conversion_error)
        .bind(record.size_bytes as i64)
        .execute(&self.pool)
        .await
        .map_err(Error::Sqlx)?;

        Ok(result.last_insert_rowid())
    }

    /// Query history, newest first
    ///
    /// Text matches the title or gallery id case-insensitively; `since` and
    /// `until` bound the finish time inclusively.
    pub async fn query_history(
        &self,
        filter: &HistoryFilter,
        limit: usize,
    ) -> Result<Vec<HistoryEntry>> {
        let mut query: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {HISTORY_COLUMNS} FROM history WHERE 1 = 1"));

        if let Some(text) = filter.text.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            let pattern = format!("%{}%", escape_like(&text.to_lowercase()));
            query
                .push(" AND (LOWER(title) LIKE ")
                .push_bind(pattern.clone())
                .push(" ESCAPE '\\' OR LOWER(gallery_id) LIKE ")
                .push_bind(pattern)
                .push(" ESCAPE '\\')");
        }
        if let Some(since) = filter.since {
            query.push(" AND finished_at >= ").push_bind(since.timestamp());
        }
        if let Some(until) = filter.until {
            query.push(" AND finished_at <= ").push_bind(until.timestamp());
        }
        if let Some(status) = filter.status {
            query.push(" AND status = ").push_bind(status.to_i32());
        }

        query
            .push(" ORDER BY finished_at DESC, id DESC LIMIT ")
            .push_bind(limit.min(i64::MAX as usize) as i64);

        let rows = query
            .build_query_as::<HistoryRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Sqlx)?;

        Ok(rows.into_iter().map(HistoryEntry::from).collect())
    }

    /// Get a single history entry by ID
    pub async fn get_history_entry(&self, id: i64) -> Result<Option<HistoryEntry>> {
        let row = sqlx::query_as::<_, HistoryRow>(&format!(
            "SELECT {HISTORY_COLUMNS} FROM history WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Sqlx)?;

        Ok(row.map(HistoryEntry::from))
    }

    /// Whether a successful record exists for `gallery_id`
    pub async fn history_has_done(&self, gallery_id: &GalleryId) -> Result<bool> {
        let found: Option<i64> =
            sqlx::query_scalar("SELECT id FROM history WHERE gallery_id = ? AND status = ? LIMIT 1")
                .bind(gallery_id.as_str())
                .bind(JobStatus::Done.to_i32())
                .fetch_optional(&self.pool)
                .await
                .map_err(Error::Sqlx)?;

        Ok(found.is_some())
    }

    /// Count history entries
    pub async fn count_history(&self) -> Result<i64> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM history")
            .fetch_one(&self.pool)
            .await
            .map_err(Error::Sqlx)
    }

    /// Aggregate counts over the whole history
    pub async fn history_stats(&self) -> Result<HistoryStats> {
        let (total_records, total_pages, total_bytes): (i64, i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COALESCE(SUM(page_count), 0), COALESCE(SUM(size_bytes), 0) FROM history",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Sqlx)?;

        let per_status: Vec<(i32, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM history GROUP BY status")
                .fetch_all(&self.pool)
                .await
                .map_err(Error::Sqlx)?;

        let week_ago = (chrono::Utc::now() - chrono::Duration::days(7)).timestamp();
        let last_7_days: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM history WHERE finished_at >= ?")
                .bind(week_ago)
                .fetch_one(&self.pool)
                .await
                .map_err(Error::Sqlx)?;

        let mut stats = HistoryStats {
            total_records: total_records.max(0) as u64,
            total_pages: total_pages.max(0) as u64,
            total_bytes: total_bytes.max(0) as u64,
            last_7_days: last_7_days.max(0) as u64,
            ..HistoryStats::default()
        };
        for (status, count) in per_status {
            *stats.by_status.entry(JobStatus::from_i32(status)).or_default() += count.max(0) as u64;
        }

        Ok(stats)
    }

    /// Keep only the newest `max_entries` records
    ///
    /// Returns the number of records deleted.
    pub async fn prune_history(&self, max_entries: usize) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM history WHERE id NOT IN (
                SELECT id FROM history ORDER BY finished_at DESC, id DESC LIMIT ?
            )
            "#,
        )
        .bind(max_entries.min(i64::MAX as usize) as i64)
        .execute(&self.pool)
        .await
        .map_err(Error::Sqlx)?;

        Ok(result.rows_affected())
    }

    /// Clear all history
    ///
    /// Returns the number of records deleted.
    pub async fn clear_history(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM history")
            .execute(&self.pool)
            .await
            .map_err(Error::Sqlx)?;

        Ok(result.rows_affected())
    }
}

fn escape_like(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
