//! Classification cache database operations
//!
//! Keyed by (word, context_hash); shared between concurrent jobs, so every
//! write is last-writer-wins EXCEPT curation precedence: a curation-sourced
//! row is never overwritten by an automated write. The guard lives in the
//! upsert's SQL conditional so concurrent writers cannot race past it.

use chrono::Utc;
use clx_common::{Error, Result};
use sqlx::{Row, SqlitePool};

use crate::models::{CacheEntry, ClassificationSource};

fn row_to_entry(row: &sqlx::sqlite::SqliteRow) -> Result<CacheEntry> {
    let source: String = row.get("source");
    let source: ClassificationSource = serde_json::from_str(&format!("\"{}\"", source))
        .map_err(|e| Error::Internal(format!("Failed to parse cache source: {}", e)))?;

    let created_at: String = row.get("created_at");
    let created_at = chrono::DateTime::parse_from_rfc3339(&created_at)
        .map_err(|e| Error::Internal(format!("Failed to parse created_at: {}", e)))?
        .with_timezone(&chrono::Utc);

    Ok(CacheEntry {
        word: row.get("word"),
        context_hash: row.get("context_hash"),
        tag_code: row.get("tag_code"),
        confidence: row.get("confidence"),
        source,
        hit_count: row.get("hit_count"),
        created_at,
        ttl_days: row.get("ttl_days"),
    })
}

/// Fetch a live entry; expired rows are treated as absent
pub async fn get(pool: &SqlitePool, word: &str, context_hash: &str) -> Result<Option<CacheEntry>> {
    let row = sqlx::query(
        r#"
        SELECT word, context_hash, tag_code, confidence, source, hit_count, created_at, ttl_days
        FROM classification_cache
        WHERE word = ? AND context_hash = ?
        "#,
    )
    .bind(word)
    .bind(context_hash)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => {
            let entry = row_to_entry(&row)?;
            if entry.is_expired(Utc::now()) {
                tracing::debug!(
                    word = %entry.word,
                    context_hash = %entry.context_hash,
                    "Cache entry expired, treating as absent"
                );
                Ok(None)
            } else {
                Ok(Some(entry))
            }
        }
        None => Ok(None),
    }
}

/// Upsert a classification result
///
/// Curation precedence: the update arm is skipped when the stored row is
/// curation-sourced and the incoming write is not. A curation write always
/// lands (explicit human re-curation).
pub async fn put(
    pool: &SqlitePool,
    word: &str,
    context_hash: &str,
    tag_code: &str,
    confidence: f64,
    source: ClassificationSource,
    ttl_days: i64,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO classification_cache
            (word, context_hash, tag_code, confidence, source, hit_count, created_at, ttl_days)
        VALUES (?, ?, ?, ?, ?, 0, ?, ?)
        ON CONFLICT(word, context_hash) DO UPDATE SET
            tag_code = excluded.tag_code,
            confidence = excluded.confidence,
            source = excluded.source,
            created_at = excluded.created_at,
            ttl_days = excluded.ttl_days
        WHERE classification_cache.source != 'curation'
           OR excluded.source = 'curation'
        "#,
    )
    .bind(word)
    .bind(context_hash)
    .bind(tag_code)
    .bind(confidence)
    .bind(source.as_str())
    .bind(Utc::now().to_rfc3339())
    .bind(ttl_days)
    .execute(pool)
    .await?;

    Ok(())
}

/// Live entries holding a generic top-level code, eligible for refinement
///
/// Curation-sourced rows are excluded (a curator's generic code is a
/// deliberate choice), as is the unclassified sentinel.
pub async fn refinement_candidates(pool: &SqlitePool, limit: i64) -> Result<Vec<CacheEntry>> {
    let rows = sqlx::query(
        r#"
        SELECT word, context_hash, tag_code, confidence, source, hit_count, created_at, ttl_days
        FROM classification_cache
        WHERE tag_code NOT LIKE '%.%'
          AND tag_code != 'NC'
          AND source != 'curation'
          AND datetime(created_at, '+' || ttl_days || ' days') >= datetime('now')
        ORDER BY hit_count DESC, word
        LIMIT ?
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.iter().map(row_to_entry).collect()
}

/// Increment the hit counter of a live entry
pub async fn record_hit(pool: &SqlitePool, word: &str, context_hash: &str) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE classification_cache
        SET hit_count = hit_count + 1
        WHERE word = ? AND context_hash = ?
        "#,
    )
    .bind(word)
    .bind(context_hash)
    .execute(pool)
    .await?;
    Ok(())
}

/// Delete expired rows; returns the number evicted
pub async fn purge_expired(pool: &SqlitePool) -> Result<usize> {
    let result = sqlx::query(
        r#"
        DELETE FROM classification_cache
        WHERE datetime(created_at, '+' || ttl_days || ' days') < datetime('now')
        "#,
    )
    .execute(pool)
    .await?;

    let evicted = result.rows_affected() as usize;
    if evicted > 0 {
        tracing::info!(evicted, "Purged expired cache entries");
    }
    Ok(evicted)
}
