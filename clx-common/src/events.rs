//! Event types for the CantoLex event system
//!
//! Provides shared event definitions and the EventBus used by all services.
//! Events are broadcast via EventBus and can be serialized for SSE
//! transmission to connected UIs.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Annotation job status
///
/// Wire values are the Portuguese status names used across the product
/// (database rows, API responses, UI labels).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    /// Job row created, no chunk processed yet
    #[serde(rename = "iniciado")]
    Iniciado,
    /// Chunk loop actively advancing
    #[serde(rename = "processando")]
    Processando,
    /// Explicitly paused, cursor frozen
    #[serde(rename = "pausado")]
    Pausado,
    /// All words processed
    #[serde(rename = "concluido")]
    Concluido,
    /// Unrecoverable failure, see error_message
    #[serde(rename = "erro")]
    Erro,
    /// Cancelled by user
    #[serde(rename = "cancelado")]
    Cancelado,
}

impl JobStatus {
    /// Terminal states are absorbing: no further transitions for this job id
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Concluido | JobStatus::Erro | JobStatus::Cancelado
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Iniciado => "iniciado",
            JobStatus::Processando => "processando",
            JobStatus::Pausado => "pausado",
            JobStatus::Concluido => "concluido",
            JobStatus::Erro => "erro",
            JobStatus::Cancelado => "cancelado",
        }
    }
}

/// Anomaly alert severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnomalySeverity {
    Info,
    Warning,
    Critical,
}

impl AnomalySeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalySeverity::Info => "info",
            AnomalySeverity::Warning => "warning",
            AnomalySeverity::Critical => "critical",
        }
    }
}

/// CantoLex event types
///
/// Broadcast via EventBus; every event carries its own timestamp so
/// subscribers never need to guess event ordering across services.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClxEvent {
    /// Annotation job created and persisted
    JobStarted {
        job_id: Uuid,
        target_id: String,
        total_songs: usize,
        total_words: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Job status transition (iniciado → processando, pause, resume, terminal)
    JobStateChanged {
        job_id: Uuid,
        old_status: JobStatus,
        new_status: JobStatus,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Chunk-level progress update
    ///
    /// Emitted after every persisted chunk. Consumers derive percentage,
    /// words/second and ETA from the raw counters.
    JobProgress {
        job_id: Uuid,
        processed_words: usize,
        total_words: usize,
        cached_words: usize,
        new_words: usize,
        chunks_processed: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Job reached concluido
    JobCompleted {
        job_id: Uuid,
        total_words: usize,
        duration_seconds: u64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Job transitioned to erro
    JobFailed {
        job_id: Uuid,
        error_message: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Anomaly Monitor raised a new alert
    AnomalyRaised {
        anomaly_id: Uuid,
        check_name: String,
        severity: AnomalySeverity,
        deviation_score: f64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Alert resolved (by a human or by the staleness auto-resolver)
    AnomalyResolved {
        anomaly_id: Uuid,
        check_name: String,
        auto_resolved: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl ClxEvent {
    /// Stable event name, used as the SSE event type
    pub fn event_type(&self) -> &'static str {
        match self {
            ClxEvent::JobStarted { .. } => "JobStarted",
            ClxEvent::JobStateChanged { .. } => "JobStateChanged",
            ClxEvent::JobProgress { .. } => "JobProgress",
            ClxEvent::JobCompleted { .. } => "JobCompleted",
            ClxEvent::JobFailed { .. } => "JobFailed",
            ClxEvent::AnomalyRaised { .. } => "AnomalyRaised",
            ClxEvent::AnomalyResolved { .. } => "AnomalyResolved",
        }
    }
}

/// Central event distribution bus for application-wide events
///
/// Uses tokio::broadcast internally, providing:
/// - Non-blocking publish (slow subscribers don't block producers)
/// - Multiple concurrent subscribers
/// - Automatic cleanup when subscribers drop
/// - Lagged message detection for slow subscribers
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ClxEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<ClxEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    #[allow(clippy::result_large_err)]
    pub fn emit(&self, event: ClxEvent) -> Result<usize, broadcast::error::SendError<ClxEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    ///
    /// Used for progress-style events where it's acceptable if no component
    /// is currently listening.
    pub fn emit_lossy(&self, event: ClxEvent) {
        let _ = self.tx.send(event);
    }

    /// Current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
