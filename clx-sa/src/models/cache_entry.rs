//! Memoized classification results
//!
//! The natural key is `(word, context_hash)`: the same surface word can
//! carry different tags in different local contexts, so a pure word→tag
//! cache would silently average away polysemy.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Default entry time-to-live: 30 days
pub const DEFAULT_TTL_DAYS: i64 = 30;

/// Which cascade stage produced a classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationSource {
    /// Curated dialect/grammar lexicon lookup
    Lexicon,
    /// Morphological pattern rule
    Pattern,
    /// Returned directly from the classification cache
    CacheHit,
    /// Remote language-model fallback
    Llm,
    /// Written by a human curator; never overwritten by automated passes
    Curation,
}

impl ClassificationSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClassificationSource::Lexicon => "lexicon",
            ClassificationSource::Pattern => "pattern",
            ClassificationSource::CacheHit => "cache_hit",
            ClassificationSource::Llm => "llm",
            ClassificationSource::Curation => "curation",
        }
    }
}

/// One memoized classification result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Lowercased surface form
    pub word: String,
    /// Deterministic hash of the local context window
    pub context_hash: String,
    pub tag_code: String,
    /// Confidence 0-1
    pub confidence: f64,
    pub source: ClassificationSource,
    /// Incremented on every cache hit
    pub hit_count: i64,
    pub created_at: DateTime<Utc>,
    /// Time-to-live in days; expired entries are treated as absent
    pub ttl_days: i64,
}

impl CacheEntry {
    /// An expired entry must be treated as absent and is evictable
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.created_at + Duration::days(self.ttl_days)
    }
}
