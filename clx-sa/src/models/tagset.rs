//! Hierarchical tag vocabulary (tagsets)
//!
//! A tagset is one node in the semantic taxonomy. Codes are hierarchical
//! strings ("SE", "SE.TRI", "SE.TRI.SAU"); the first two characters name
//! the top-level domain. Only `active` tagsets may be written as
//! classification results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reserved sentinel code for words the cascade could not classify.
///
/// Always considered writable, never part of the curated taxonomy.
pub const UNCLASSIFIED_CODE: &str = "NC";

/// Tagset lifecycle status
///
/// Proposed (`pending`) by curators, then approved (`active`) or rejected.
/// Approval is irreversible through this service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagsetStatus {
    Pending,
    Active,
    Rejected,
}

impl TagsetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TagsetStatus::Pending => "pending",
            TagsetStatus::Active => "active",
            TagsetStatus::Rejected => "rejected",
        }
    }
}

/// One node in the hierarchical tag taxonomy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tagset {
    /// Hierarchical code, e.g. "SE.TRI"; first 2 chars = top-level domain
    pub code: String,
    pub name: String,
    pub description: String,
    /// Parent code, None for depth-level-1 domains
    pub parent_code: Option<String>,
    /// Depth in the hierarchy, 1-4
    pub depth_level: u8,
    pub status: TagsetStatus,
    /// Ordered example words/phrases illustrating the tag
    pub examples: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Tagset {
    /// Top-level domain prefix (first 2 characters of the code)
    pub fn top_level_prefix(&self) -> &str {
        top_level_prefix(&self.code)
    }

    pub fn is_active(&self) -> bool {
        self.status == TagsetStatus::Active
    }
}

/// Top-level domain prefix of any tag code
///
/// Counts characters, not bytes; codes arrive from an LLM and may contain
/// arbitrary multibyte text.
pub fn top_level_prefix(code: &str) -> &str {
    match code.char_indices().nth(2) {
        Some((idx, _)) => &code[..idx],
        None => code,
    }
}
