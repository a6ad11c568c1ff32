//! Job orchestration
//!
//! Owns the annotation job lifecycle: creation, the chunked advance step,
//! pause/resume/cancel, and completion. Every chunk persists the full job
//! row (counters + cursor) BEFORE the progress event is emitted, so the
//! database is always at least as advanced as anything a subscriber saw.

pub mod driver;

use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::Arc;
use uuid::Uuid;

use clx_common::events::{ClxEvent, EventBus, JobStatus};
use clx_common::{Error, Result};

use crate::annotate::context::{context_hash, context_window, kwic, tokenize, DEFAULT_WINDOW_RADIUS};
use crate::annotate::{Cascade, WordOccurrence};
use crate::db;
use crate::models::{AnnotationJob, JobCursor};
use crate::taxonomy::TaxonomySnapshot;

/// Coordinates annotation jobs over the shared pool
///
/// Cloneable via Arc fields; one instance is shared by the HTTP handlers
/// and the chunk driver.
#[derive(Clone)]
pub struct JobOrchestrator {
    pool: SqlitePool,
    event_bus: EventBus,
    cascade: Arc<Cascade>,
}

impl JobOrchestrator {
    pub fn new(pool: SqlitePool, event_bus: EventBus, cascade: Arc<Cascade>) -> Self {
        Self {
            pool,
            event_bus,
            cascade,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn cascade(&self) -> &Arc<Cascade> {
        &self.cascade
    }

    /// Create and persist a new job for a target
    ///
    /// Totals are computed up front from the target's songs in position
    /// order; a target with an active (non-terminal) job is a conflict, and
    /// a target with no tokenizable words is invalid input.
    pub async fn start_job(&self, target_id: &str) -> Result<AnnotationJob> {
        if let Some(existing) = db::jobs::active_job_for_target(&self.pool, target_id).await? {
            return Err(Error::Conflict(format!(
                "Target {} already has active job {} ({})",
                target_id,
                existing.id,
                existing.status.as_str()
            )));
        }

        let songs = db::songs::songs_for_target(&self.pool, target_id).await?;
        let total_words: usize = songs.iter().map(|s| tokenize(&s.lyrics).len()).sum();
        if total_words == 0 {
            return Err(Error::InvalidInput(format!(
                "Target {} has no annotatable words",
                target_id
            )));
        }

        let chunk_size = db::settings::chunk_size(&self.pool).await?;
        let job = AnnotationJob::new(target_id.to_string(), songs.len(), total_words, chunk_size);
        db::jobs::save_job(&self.pool, &job).await?;

        tracing::info!(
            job_id = %job.id,
            target_id,
            total_songs = job.total_songs,
            total_words = job.total_words,
            "Annotation job started"
        );

        self.event_bus.emit_lossy(ClxEvent::JobStarted {
            job_id: job.id,
            target_id: target_id.to_string(),
            total_songs: job.total_songs,
            total_words: job.total_words,
            timestamp: Utc::now(),
        });

        Ok(job)
    }

    /// Advance one job by at most one chunk
    ///
    /// The caller passes the persisted row; this method's only effects are
    /// the cache/metrics writes of the cascade, a single guarded job-row
    /// update at the end, and the events. Replaying the same persisted
    /// cursor is harmless (every occurrence resolves from the cache), and
    /// a pause/cancel landing while the chunk is in flight wins over the
    /// chunk's row write.
    pub async fn advance_chunk(&self, mut job: AnnotationJob) -> Result<AnnotationJob> {
        if job.status == JobStatus::Iniciado {
            let t = job.transition_to(JobStatus::Processando);
            self.emit_state_change(&t.job_id, t.old_status, t.new_status);
        } else if job.status != JobStatus::Processando {
            // Paused/terminal rows reach here only via a racing tick; skip
            return Ok(job);
        }

        let snapshot = TaxonomySnapshot::load(&self.pool).await?;
        let ttl_days = db::settings::cache_ttl_days(&self.pool).await?;
        let songs = db::songs::songs_for_target(&self.pool, &job.target_id).await?;

        let (occurrences, next_cursor) = collect_chunk(&songs, job.cursor, job.chunk_size);
        if occurrences.is_empty() {
            // Cursor already past the end (e.g. totals recomputed smaller)
            return self.complete(job).await;
        }

        let outcome = self
            .cascade
            .classify_chunk(&self.pool, &snapshot, &occurrences, ttl_days)
            .await?;

        job.processed_words += occurrences.len();
        job.cached_words += outcome.cache_hits;
        job.new_words += occurrences.len() - outcome.cache_hits;
        job.cursor = next_cursor;
        job.chunks_processed += 1;
        job.last_chunk_at = Some(Utc::now());

        db::metrics::record(
            &self.pool,
            occurrences.len(),
            outcome.failed_words,
            outcome.llm_latency_ms,
            outcome.llm_tokens,
        )
        .await?;

        if job.is_exhausted() {
            return self.complete(job).await;
        }

        // Guarded persist: a pause/cancel that landed mid-chunk wins and
        // the chunk's row write is discarded
        if !db::jobs::save_chunk_progress(&self.pool, &job).await? {
            return self.reload_after_lost_race(job.id).await;
        }
        self.emit_progress(&job);

        Ok(job)
    }

    /// Mark a job concluido and persist the terminal row
    async fn complete(&self, mut job: AnnotationJob) -> Result<AnnotationJob> {
        let t = job.transition_to(JobStatus::Concluido);
        if !db::jobs::save_chunk_progress(&self.pool, &job).await? {
            return self.reload_after_lost_race(job.id).await;
        }
        self.emit_progress(&job);
        self.emit_state_change(&t.job_id, t.old_status, t.new_status);

        let duration_seconds = job
            .finished_at
            .map(|f| (f - job.started_at).num_seconds().max(0) as u64)
            .unwrap_or(0);
        tracing::info!(
            job_id = %job.id,
            total_words = job.total_words,
            cached_words = job.cached_words,
            new_words = job.new_words,
            duration_seconds,
            "Annotation job completed"
        );
        self.event_bus.emit_lossy(ClxEvent::JobCompleted {
            job_id: job.id,
            total_words: job.total_words,
            duration_seconds,
            timestamp: Utc::now(),
        });

        Ok(job)
    }

    /// The stored row after a transition won a race against an in-flight
    /// chunk; the stored state is authoritative
    async fn reload_after_lost_race(&self, job_id: Uuid) -> Result<AnnotationJob> {
        let job = db::jobs::load_job(&self.pool, job_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Job {} not found", job_id)))?;
        tracing::info!(
            job_id = %job_id,
            status = job.status.as_str(),
            "Discarded in-flight chunk after concurrent status change"
        );
        Ok(job)
    }

    /// Pause a running job; the cursor freezes where the last chunk ended
    pub async fn pause_job(&self, job_id: Uuid) -> Result<AnnotationJob> {
        self.request_transition(job_id, JobStatus::Pausado, &[
            JobStatus::Iniciado,
            JobStatus::Processando,
        ])
        .await
    }

    /// Resume a paused job from its persisted cursor
    pub async fn resume_job(&self, job_id: Uuid) -> Result<AnnotationJob> {
        self.request_transition(job_id, JobStatus::Processando, &[JobStatus::Pausado])
            .await
    }

    /// Cancel a job (terminal; already-cached classifications are kept)
    pub async fn cancel_job(&self, job_id: Uuid) -> Result<AnnotationJob> {
        self.request_transition(job_id, JobStatus::Cancelado, &[
            JobStatus::Iniciado,
            JobStatus::Processando,
            JobStatus::Pausado,
        ])
        .await
    }

    /// Mark a job erro with a message (driver-side failure path)
    pub async fn fail_job(&self, mut job: AnnotationJob, message: String) -> Result<AnnotationJob> {
        job.error_message = Some(message.clone());
        let t = job.transition_to(JobStatus::Erro);
        db::jobs::save_job(&self.pool, &job).await?;
        self.emit_state_change(&t.job_id, t.old_status, t.new_status);
        tracing::error!(job_id = %job.id, error = %message, "Annotation job failed");
        self.event_bus.emit_lossy(ClxEvent::JobFailed {
            job_id: job.id,
            error_message: message,
            timestamp: Utc::now(),
        });
        Ok(job)
    }

    async fn request_transition(
        &self,
        job_id: Uuid,
        new_status: JobStatus,
        allowed_from: &[JobStatus],
    ) -> Result<AnnotationJob> {
        let mut job = db::jobs::load_job(&self.pool, job_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Job {} not found", job_id)))?;

        if !allowed_from.contains(&job.status) {
            return Err(Error::Conflict(format!(
                "Cannot move job {} from {} to {}",
                job_id,
                job.status.as_str(),
                new_status.as_str()
            )));
        }

        let t = job.transition_to(new_status);
        db::jobs::save_job(&self.pool, &job).await?;
        self.emit_state_change(&t.job_id, t.old_status, t.new_status);
        Ok(job)
    }

    fn emit_state_change(&self, job_id: &Uuid, old_status: JobStatus, new_status: JobStatus) {
        tracing::info!(
            job_id = %job_id,
            old_status = old_status.as_str(),
            new_status = new_status.as_str(),
            "Job status changed"
        );
        self.event_bus.emit_lossy(ClxEvent::JobStateChanged {
            job_id: *job_id,
            old_status,
            new_status,
            timestamp: Utc::now(),
        });
    }

    fn emit_progress(&self, job: &AnnotationJob) {
        self.event_bus.emit_lossy(ClxEvent::JobProgress {
            job_id: job.id,
            processed_words: job.processed_words,
            total_words: job.total_words,
            cached_words: job.cached_words,
            new_words: job.new_words,
            chunks_processed: job.chunks_processed,
            timestamp: Utc::now(),
        });
    }
}

/// Materialize the next chunk of word occurrences from the cursor
///
/// Walks songs in position order and tokens in text order, crossing song
/// boundaries until `chunk_size` occurrences are collected or the corpus is
/// exhausted. Context windows never cross song boundaries. Returns the
/// occurrences and the cursor pointing at the first uncollected token.
pub fn collect_chunk(
    songs: &[crate::models::Song],
    cursor: JobCursor,
    chunk_size: usize,
) -> (Vec<WordOccurrence>, JobCursor) {
    let mut occurrences = Vec::with_capacity(chunk_size);
    let mut song_index = cursor.song_index;
    let mut word_index = cursor.word_index;

    while song_index < songs.len() && occurrences.len() < chunk_size {
        let tokens = tokenize(&songs[song_index].lyrics);
        while word_index < tokens.len() && occurrences.len() < chunk_size {
            let window = context_window(&tokens, word_index, DEFAULT_WINDOW_RADIUS);
            occurrences.push(WordOccurrence {
                word: tokens[word_index].clone(),
                context_hash: context_hash(&window),
                kwic: kwic(&tokens, word_index, DEFAULT_WINDOW_RADIUS),
            });
            word_index += 1;
        }
        if word_index >= tokens.len() {
            song_index += 1;
            word_index = 0;
        }
    }

    (
        occurrences,
        JobCursor {
            song_index,
            word_index,
        },
    )
}
