//! Data models for the semantic annotation pipeline

pub mod anomaly;
pub mod annotation_job;
pub mod cache_entry;
pub mod song;
pub mod tagset;

pub use anomaly::{AnomalyDetection, AnomalyType};
pub use annotation_job::{AnnotationJob, JobCursor, JobProgress, StatusTransition};
pub use cache_entry::{CacheEntry, ClassificationSource};
pub use song::Song;
pub use tagset::{Tagset, TagsetStatus};
