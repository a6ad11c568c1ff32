//! Annotation job persistence
//!
//! The persisted row (counters + cursor) is the job's single source of
//! truth: the chunk loop re-reads it on every tick, which is what makes a
//! job survive crashes, pauses and driver replacement.

use clx_common::events::JobStatus;
use clx_common::{Error, Result};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::models::{AnnotationJob, JobCursor};

fn row_to_job(row: &sqlx::sqlite::SqliteRow) -> Result<AnnotationJob> {
    let id_str: String = row.get("id");
    let id = Uuid::parse_str(&id_str)
        .map_err(|e| Error::Internal(format!("Failed to parse job id: {}", e)))?;

    let status: String = row.get("status");
    let status: JobStatus = serde_json::from_str(&format!("\"{}\"", status))
        .map_err(|e| Error::Internal(format!("Failed to parse job status: {}", e)))?;

    let started_at: String = row.get("started_at");
    let started_at = chrono::DateTime::parse_from_rfc3339(&started_at)
        .map_err(|e| Error::Internal(format!("Failed to parse started_at: {}", e)))?
        .with_timezone(&chrono::Utc);

    let finished_at: Option<String> = row.get("finished_at");
    let finished_at = finished_at
        .map(|s| chrono::DateTime::parse_from_rfc3339(&s))
        .transpose()
        .map_err(|e| Error::Internal(format!("Failed to parse finished_at: {}", e)))?
        .map(|dt| dt.with_timezone(&chrono::Utc));

    let last_chunk_at: Option<String> = row.get("last_chunk_at");
    let last_chunk_at = last_chunk_at
        .map(|s| chrono::DateTime::parse_from_rfc3339(&s))
        .transpose()
        .map_err(|e| Error::Internal(format!("Failed to parse last_chunk_at: {}", e)))?
        .map(|dt| dt.with_timezone(&chrono::Utc));

    Ok(AnnotationJob {
        id,
        target_id: row.get("target_id"),
        status,
        total_songs: row.get::<i64, _>("total_songs") as usize,
        total_words: row.get::<i64, _>("total_words") as usize,
        processed_words: row.get::<i64, _>("processed_words") as usize,
        cached_words: row.get::<i64, _>("cached_words") as usize,
        new_words: row.get::<i64, _>("new_words") as usize,
        cursor: JobCursor {
            song_index: row.get::<i64, _>("current_song_index") as usize,
            word_index: row.get::<i64, _>("current_word_index") as usize,
        },
        chunk_size: row.get::<i64, _>("chunk_size") as usize,
        chunks_processed: row.get::<i64, _>("chunks_processed") as usize,
        started_at,
        finished_at,
        error_message: row.get("error_message"),
        last_chunk_at,
    })
}

/// Save (upsert) a job row
pub async fn save_job(pool: &SqlitePool, job: &AnnotationJob) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO annotation_jobs (
            id, target_id, status, total_songs, total_words,
            processed_words, cached_words, new_words,
            current_song_index, current_word_index,
            chunk_size, chunks_processed,
            started_at, finished_at, error_message, last_chunk_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            status = excluded.status,
            processed_words = excluded.processed_words,
            cached_words = excluded.cached_words,
            new_words = excluded.new_words,
            current_song_index = excluded.current_song_index,
            current_word_index = excluded.current_word_index,
            chunks_processed = excluded.chunks_processed,
            finished_at = excluded.finished_at,
            error_message = excluded.error_message,
            last_chunk_at = excluded.last_chunk_at
        "#,
    )
    .bind(job.id.to_string())
    .bind(&job.target_id)
    .bind(job.status.as_str())
    .bind(job.total_songs as i64)
    .bind(job.total_words as i64)
    .bind(job.processed_words as i64)
    .bind(job.cached_words as i64)
    .bind(job.new_words as i64)
    .bind(job.cursor.song_index as i64)
    .bind(job.cursor.word_index as i64)
    .bind(job.chunk_size as i64)
    .bind(job.chunks_processed as i64)
    .bind(job.started_at.to_rfc3339())
    .bind(job.finished_at.map(|dt| dt.to_rfc3339()))
    .bind(&job.error_message)
    .bind(job.last_chunk_at.map(|dt| dt.to_rfc3339()))
    .execute(pool)
    .await?;

    Ok(())
}

/// Persist a chunk's progress only if the row is still advancing
///
/// A pause or cancel can land while a chunk is in flight; the chunk's
/// final write must not resurrect that row. The update is guarded on the
/// stored status, and the caller discards the chunk's row write (cache and
/// metrics writes stand, replay resolves them as hits) when it returns
/// false.
pub async fn save_chunk_progress(pool: &SqlitePool, job: &AnnotationJob) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE annotation_jobs SET
            status = ?,
            processed_words = ?,
            cached_words = ?,
            new_words = ?,
            current_song_index = ?,
            current_word_index = ?,
            chunks_processed = ?,
            finished_at = ?,
            last_chunk_at = ?
        WHERE id = ?
          AND status IN ('iniciado', 'processando')
        "#,
    )
    .bind(job.status.as_str())
    .bind(job.processed_words as i64)
    .bind(job.cached_words as i64)
    .bind(job.new_words as i64)
    .bind(job.cursor.song_index as i64)
    .bind(job.cursor.word_index as i64)
    .bind(job.chunks_processed as i64)
    .bind(job.finished_at.map(|dt| dt.to_rfc3339()))
    .bind(job.last_chunk_at.map(|dt| dt.to_rfc3339()))
    .bind(job.id.to_string())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Load a job by id
pub async fn load_job(pool: &SqlitePool, job_id: Uuid) -> Result<Option<AnnotationJob>> {
    let row = sqlx::query("SELECT * FROM annotation_jobs WHERE id = ?")
        .bind(job_id.to_string())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(row_to_job).transpose()
}

/// The active (processando/pausado/iniciado) job for a target, if any
///
/// At most one active job may exist per target; start_job enforces this by
/// checking here first.
pub async fn active_job_for_target(
    pool: &SqlitePool,
    target_id: &str,
) -> Result<Option<AnnotationJob>> {
    let row = sqlx::query(
        r#"
        SELECT * FROM annotation_jobs
        WHERE target_id = ?
          AND status NOT IN ('concluido', 'erro', 'cancelado')
        ORDER BY started_at DESC
        LIMIT 1
        "#,
    )
    .bind(target_id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(row_to_job).transpose()
}

/// All jobs the chunk driver should advance on its next tick
pub async fn jobs_to_advance(pool: &SqlitePool) -> Result<Vec<AnnotationJob>> {
    let rows = sqlx::query(
        r#"
        SELECT * FROM annotation_jobs
        WHERE status IN ('iniciado', 'processando')
        ORDER BY started_at ASC
        "#,
    )
    .fetch_all(pool)
    .await?;

    rows.iter().map(row_to_job).collect()
}

/// Park jobs left running by a previous process run
///
/// A processando job with no live chunk loop will never advance. Unlike a
/// cancelled row, pausado keeps the cursor usable, so the job can be
/// resumed from exactly where the previous process stopped.
pub async fn recover_stale_jobs(pool: &SqlitePool) -> Result<usize> {
    let result = sqlx::query(
        r#"
        UPDATE annotation_jobs
        SET status = 'pausado'
        WHERE status IN ('iniciado', 'processando')
        "#,
    )
    .execute(pool)
    .await?;

    Ok(result.rows_affected() as usize)
}
