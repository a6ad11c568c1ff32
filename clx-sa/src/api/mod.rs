//! HTTP API handlers for clx-sa

pub mod anomalies;
pub mod curation;
pub mod health;
pub mod jobs;
pub mod sse;
pub mod tagsets;

pub use anomalies::anomaly_routes;
pub use curation::curation_routes;
pub use health::health_routes;
pub use jobs::job_routes;
pub use sse::event_stream;
pub use tagsets::tagset_routes;
