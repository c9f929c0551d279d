//! Database lifecycle and schema migrations.

use crate::error::DatabaseError;
use crate::{Error, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqliteSynchronous};
use sqlx::{Connection, SqliteConnection};
use std::path::Path;
use std::time::Duration;

use super::Database;

/// A schema step: version, description, statements run in one transaction
struct Migration {
    version: i64,
    description: &'static str,
    statements: &'static [&'static str],
}

/// Applied in order; a database at version N skips every step up to N
const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    description: "history table",
    statements: &[
        r#"
        CREATE TABLE history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            gallery_id TEXT NOT NULL,
            title TEXT NOT NULL,
            source_url TEXT,
            download_path TEXT,
            page_count INTEGER NOT NULL,
            pages_succeeded INTEGER NOT NULL,
            status INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            finished_at INTEGER NOT NULL,
            converted_format TEXT,
            conversion_path TEXT,
            conversion_error TEXT,
            size_bytes INTEGER NOT NULL DEFAULT 0
        )
        "#,
        "CREATE INDEX idx_history_finished ON history(finished_at DESC, id DESC)",
        "CREATE INDEX idx_history_gallery ON history(gallery_id, status)",
    ],
}];

fn connection_failed(context: &'static str) -> impl Fn(sqlx::Error) -> Error {
    move |e| Error::Database(DatabaseError::ConnectionFailed(format!("{context}: {e}")))
}

fn migration_failed(version: i64) -> impl Fn(sqlx::Error) -> Error {
    move |e| Error::Database(DatabaseError::MigrationFailed(format!("v{version}: {e}")))
}

impl Database {
    /// Open (or create) the history database and bring its schema up to date
    ///
    /// The connection runs in WAL mode with `synchronous=FULL`, so a record is
    /// on disk once [`insert_history`](Database::insert_history) returns.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Database`] when the file cannot be opened or a
    /// migration fails; a failed migration leaves the schema at its previous
    /// version.
    pub async fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Error::Database(DatabaseError::ConnectionFailed(format!(
                    "cannot create {}: {e}",
                    parent.display()
                )))
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePool::connect_with(options)
            .await
            .map_err(connection_failed("open history database"))?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// Apply every migration newer than the stored schema version
    async fn migrate(&self) -> Result<()> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(connection_failed("acquire connection"))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at INTEGER NOT NULL
            )",
        )
        .execute(&mut *conn)
        .await
        .map_err(migration_failed(0))?;

        let current: i64 =
            sqlx::query_scalar("SELECT COALESCE(MAX(version), 0) FROM schema_version")
                .fetch_one(&mut *conn)
                .await
                .map_err(|e| Error::Database(DatabaseError::QueryFailed(e.to_string())))?;

        for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
            apply(&mut conn, migration).await?;
        }

        Ok(())
    }

    /// Close the database connection
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Get the underlying connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

async fn apply(conn: &mut SqliteConnection, migration: &Migration) -> Result<()> {
    let failed = migration_failed(migration.version);
    tracing::info!(
        version = migration.version,
        description = migration.description,
        "Applying database migration"
    );

    // Dropping the transaction without commit rolls it back
    let mut tx = conn.begin().await.map_err(&failed)?;
    for statement in migration.statements {
        sqlx::query(statement)
            .execute(&mut *tx)
            .await
            .map_err(&failed)?;
    }
    sqlx::query("INSERT INTO schema_version (version, applied_at) VALUES (?, ?)")
        .bind(migration.version)
        .bind(chrono::Utc::now().timestamp())
        .execute(&mut *tx)
        .await
        .map_err(&failed)?;
    tx.commit().await.map_err(&failed)?;

    tracing::info!(version = migration.version, "Database migration complete");
    Ok(())
}
