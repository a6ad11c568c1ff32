//! Database access for clx-sa
//!
//! Shared SQLite database in the root folder. Enum-valued columns store
//! their serde wire values as TEXT; timestamps are RFC3339 TEXT.

pub mod anomalies;
pub mod cache;
pub mod jobs;
pub mod metrics;
pub mod settings;
pub mod songs;
pub mod tagsets;

use anyhow::Result;
use sqlx::SqlitePool;
use std::path::Path;

/// Initialize database connection pool
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // SQLite URI with mode=rwc (read, write, create)
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let pool = SqlitePool::connect(&db_url).await?;

    init_tables(&pool).await?;

    Ok(pool)
}

/// Create clx-sa tables if they don't exist
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Corpus input: one row per song, ordered by position within a target
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS songs (
            song_id TEXT PRIMARY KEY,
            target_id TEXT NOT NULL,
            title TEXT NOT NULL,
            lyrics TEXT NOT NULL,
            position INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_songs_target
        ON songs (target_id, position)
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tagsets (
            code TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            parent_code TEXT,
            depth_level INTEGER NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            examples TEXT NOT NULL DEFAULT '[]',
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Natural key (word, context_hash): at most one live entry per pair
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS classification_cache (
            word TEXT NOT NULL,
            context_hash TEXT NOT NULL,
            tag_code TEXT NOT NULL,
            confidence REAL NOT NULL,
            source TEXT NOT NULL,
            hit_count INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            ttl_days INTEGER NOT NULL,
            PRIMARY KEY (word, context_hash)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS annotation_jobs (
            id TEXT PRIMARY KEY,
            target_id TEXT NOT NULL,
            status TEXT NOT NULL,
            total_songs INTEGER NOT NULL DEFAULT 0,
            total_words INTEGER NOT NULL DEFAULT 0,
            processed_words INTEGER NOT NULL DEFAULT 0,
            cached_words INTEGER NOT NULL DEFAULT 0,
            new_words INTEGER NOT NULL DEFAULT 0,
            current_song_index INTEGER NOT NULL DEFAULT 0,
            current_word_index INTEGER NOT NULL DEFAULT 0,
            chunk_size INTEGER NOT NULL,
            chunks_processed INTEGER NOT NULL DEFAULT 0,
            started_at TEXT NOT NULL,
            finished_at TEXT,
            error_message TEXT,
            last_chunk_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS anomaly_detections (
            id TEXT PRIMARY KEY,
            check_name TEXT NOT NULL,
            anomaly_type TEXT NOT NULL,
            severity TEXT NOT NULL,
            expected_value REAL NOT NULL,
            actual_value REAL NOT NULL,
            deviation_score REAL NOT NULL,
            context TEXT NOT NULL DEFAULT '{}',
            detected_at TEXT NOT NULL,
            resolved_at TEXT,
            acknowledged_at TEXT,
            acknowledged_by TEXT,
            resolution_notes TEXT,
            auto_resolved INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_anomalies_open
        ON anomaly_detections (check_name, detected_at)
        WHERE resolved_at IS NULL
        "#,
    )
    .execute(pool)
    .await?;

    // Operational telemetry written by the orchestrator/cascade,
    // read-mostly by the Anomaly Monitor
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pipeline_metrics (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            recorded_at TEXT NOT NULL,
            words_processed INTEGER NOT NULL DEFAULT 0,
            words_failed INTEGER NOT NULL DEFAULT 0,
            llm_latency_ms INTEGER,
            llm_tokens INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_metrics_recorded_at
        ON pipeline_metrics (recorded_at)
        "#,
    )
    .execute(pool)
    .await?;

    tracing::info!("Database tables initialized");

    Ok(())
}
