//! Database initialization and schema for sonara-se
//!
//! One SQLite database holds both the embedding store and the durable
//! task queue. The schema is created at startup; existing tables are
//! left untouched.

use sonara_common::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use tracing::info;

/// Open (or create) the service database and ensure the schema exists.
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    init_schema(&pool).await?;

    info!("Database ready: {}", db_path.display());
    Ok(pool)
}

/// Create tables and indexes if missing.
pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS embeddings (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            track_id INTEGER NOT NULL DEFAULT -1,
            vector BLOB NOT NULL,
            guitar INTEGER NOT NULL DEFAULT 0,
            drum INTEGER NOT NULL DEFAULT 0,
            bass INTEGER NOT NULL DEFAULT 0,
            piano INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_embeddings_track_id ON embeddings(track_id)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tasks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            submission_id TEXT NOT NULL,
            stage TEXT NOT NULL,
            payload TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'queued',
            attempts INTEGER NOT NULL DEFAULT 0,
            next_run_at INTEGER NOT NULL,
            last_error TEXT,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_tasks_due ON tasks(status, next_run_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
