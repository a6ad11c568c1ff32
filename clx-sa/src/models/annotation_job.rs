//! Annotation job state machine
//!
//! One resumable, chunked run over one target's song set:
//! iniciado → processando ⇄ pausado → {concluido | erro | cancelado}
//!
//! The persisted `(current_song_index, current_word_index)` cursor always
//! points at the next unprocessed token, which is what makes a job
//! resumable after a crash, a pause, or a driver replacement.

use chrono::{DateTime, Utc};
use clx_common::events::JobStatus;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Resumption cursor: the next unprocessed word occurrence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCursor {
    /// Index into the target's songs, ordered by position
    pub song_index: usize,
    /// Token index inside the current song
    pub word_index: usize,
}

/// Status transition record (for logging and events)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusTransition {
    pub job_id: Uuid,
    pub old_status: JobStatus,
    pub new_status: JobStatus,
    pub transitioned_at: DateTime<Utc>,
}

/// One resumable annotation run over one target's song set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnotationJob {
    pub id: Uuid,
    /// Artist/corpus subset being annotated
    pub target_id: String,
    pub status: JobStatus,
    pub total_songs: usize,
    pub total_words: usize,
    /// Words advanced past by the cursor (monotonic, never exceeds total)
    pub processed_words: usize,
    /// Processed words resolved from the classification cache
    pub cached_words: usize,
    /// Processed words classified fresh (lexicon/pattern/LLM/sentinel)
    pub new_words: usize,
    pub cursor: JobCursor,
    pub chunk_size: usize,
    pub chunks_processed: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Populated when status is erro
    pub error_message: Option<String>,
    /// End of the most recently persisted chunk
    pub last_chunk_at: Option<DateTime<Utc>>,
}

/// Derived progress telemetry (advisory, recomputed on read, never persisted)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobProgress {
    /// Fraction 0.0-1.0
    pub progress: f64,
    pub words_per_second: Option<f64>,
    pub eta_seconds: Option<u64>,
    /// ETA formatted into human units
    pub eta_display: String,
    pub elapsed_seconds: u64,
}

impl AnnotationJob {
    pub fn new(target_id: String, total_songs: usize, total_words: usize, chunk_size: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            target_id,
            status: JobStatus::Iniciado,
            total_songs,
            total_words,
            processed_words: 0,
            cached_words: 0,
            new_words: 0,
            cursor: JobCursor {
                song_index: 0,
                word_index: 0,
            },
            chunk_size,
            chunks_processed: 0,
            started_at: Utc::now(),
            finished_at: None,
            error_message: None,
            last_chunk_at: None,
        }
    }

    /// Transition to a new status
    ///
    /// Terminal states set `finished_at` and are absorbing: an attempt to
    /// leave one is a programming error and is rejected (status unchanged).
    pub fn transition_to(&mut self, new_status: JobStatus) -> StatusTransition {
        let transition = StatusTransition {
            job_id: self.id,
            old_status: self.status,
            new_status,
            transitioned_at: Utc::now(),
        };

        if self.status.is_terminal() {
            tracing::warn!(
                job_id = %self.id,
                current = self.status.as_str(),
                requested = new_status.as_str(),
                "Ignoring transition out of terminal status"
            );
            return transition;
        }

        self.status = new_status;
        if new_status.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        transition
    }

    /// Whether the job has reached a terminal status
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether the cursor has consumed the whole corpus
    pub fn is_exhausted(&self) -> bool {
        self.processed_words >= self.total_words
    }

    /// Derive progress/ETA telemetry from the raw counters
    ///
    /// Guarded against division by ~0 elapsed time and against zero
    /// processed words; in both cases rate and ETA are `None`.
    pub fn derive_progress(&self, now: DateTime<Utc>) -> JobProgress {
        let elapsed_seconds = (now - self.started_at).num_seconds().max(0) as u64;

        let progress = if self.total_words > 0 {
            self.processed_words as f64 / self.total_words as f64
        } else {
            0.0
        };

        let words_per_second = if self.processed_words > 0 && elapsed_seconds > 0 {
            Some(self.processed_words as f64 / elapsed_seconds as f64)
        } else {
            None
        };

        let eta_seconds = words_per_second.and_then(|wps| {
            if wps > 0.0 {
                let remaining = self.total_words.saturating_sub(self.processed_words);
                Some((remaining as f64 / wps).ceil() as u64)
            } else {
                None
            }
        });

        JobProgress {
            progress,
            words_per_second,
            eta_seconds,
            eta_display: clx_common::human_time::format_eta(eta_seconds),
            elapsed_seconds,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn test_job() -> AnnotationJob {
        AnnotationJob::new("target-1".to_string(), 3, 600, 50)
    }

    #[test]
    fn test_new_job_starts_iniciado() {
        let job = test_job();
        assert_eq!(job.status, JobStatus::Iniciado);
        assert_eq!(job.cursor.song_index, 0);
        assert_eq!(job.cursor.word_index, 0);
        assert!(job.finished_at.is_none());
    }

    #[test]
    fn test_terminal_transition_sets_finished_at() {
        let mut job = test_job();
        job.transition_to(JobStatus::Processando);
        let t = job.transition_to(JobStatus::Concluido);
        assert_eq!(t.old_status, JobStatus::Processando);
        assert_eq!(job.status, JobStatus::Concluido);
        assert!(job.finished_at.is_some());
    }

    #[test]
    fn test_terminal_states_are_absorbing() {
        let mut job = test_job();
        job.transition_to(JobStatus::Cancelado);
        job.transition_to(JobStatus::Processando);
        assert_eq!(job.status, JobStatus::Cancelado);
    }

    #[test]
    fn test_derive_progress_guards_zero_processed() {
        let job = test_job();
        let progress = job.derive_progress(job.started_at + Duration::seconds(10));
        assert_eq!(progress.progress, 0.0);
        assert!(progress.words_per_second.is_none());
        assert!(progress.eta_seconds.is_none());
        assert_eq!(progress.eta_display, "calculating");
    }

    #[test]
    fn test_derive_progress_guards_zero_elapsed() {
        let mut job = test_job();
        job.processed_words = 100;
        let progress = job.derive_progress(job.started_at);
        assert!(progress.words_per_second.is_none());
    }

    #[test]
    fn test_derive_progress_rate_and_eta() {
        let mut job = test_job();
        job.processed_words = 300;
        let progress = job.derive_progress(job.started_at + Duration::seconds(30));
        assert_eq!(progress.progress, 0.5);
        assert_eq!(progress.words_per_second, Some(10.0));
        // 300 remaining at 10 wps
        assert_eq!(progress.eta_seconds, Some(30));
        assert_eq!(progress.eta_display, "30s");
    }
}
