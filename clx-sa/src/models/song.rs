//! Corpus songs (read-mostly input to annotation jobs)

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One song of a target's corpus subset
///
/// Songs are processed in `position` order so the job cursor is replayable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Song {
    pub song_id: Uuid,
    /// Artist/corpus subset this song belongs to
    pub target_id: String,
    pub title: String,
    pub lyrics: String,
    /// Deterministic ordering within the target
    pub position: i64,
}
