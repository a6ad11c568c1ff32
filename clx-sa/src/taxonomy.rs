//! Taxonomy store: the single source of truth for legal tag codes
//!
//! Components never persist a code without validating it against a
//! `TaxonomySnapshot`. A snapshot is point-in-time: the orchestrator
//! re-fetches one per chunk so concurrent curation (approve/reject) is
//! picked up between chunks, never mid-decision.

use clx_common::Result;
use sqlx::SqlitePool;
use std::collections::HashMap;

use crate::models::tagset::{top_level_prefix, UNCLASSIFIED_CODE};
use crate::models::Tagset;

/// Point-in-time view of the active taxonomy
#[derive(Debug, Clone, Default)]
pub struct TaxonomySnapshot {
    by_code: HashMap<String, Tagset>,
}

impl TaxonomySnapshot {
    /// Load all active tagsets from the database
    pub async fn load(pool: &SqlitePool) -> Result<Self> {
        let tagsets = crate::db::tagsets::load_active_tagsets(pool).await?;
        Ok(Self::from_tagsets(tagsets))
    }

    /// Build a snapshot from an in-memory tagset list (test seam)
    pub fn from_tagsets(tagsets: Vec<Tagset>) -> Self {
        let by_code = tagsets.into_iter().map(|t| (t.code.clone(), t)).collect();
        Self { by_code }
    }

    /// True iff the code exactly matches an active tagset's code
    pub fn is_valid_tagset(&self, code: &str) -> bool {
        self.by_code.contains_key(code)
    }

    /// Look up an active tagset by code
    pub fn get(&self, code: &str) -> Option<&Tagset> {
        self.by_code.get(code)
    }

    /// All active tagsets, sorted by code (stable prompt/mapping order)
    pub fn active_tagsets(&self) -> Vec<&Tagset> {
        let mut tagsets: Vec<&Tagset> = self.by_code.values().collect();
        tagsets.sort_by(|a, b| a.code.cmp(&b.code));
        tagsets
    }

    /// Active children of a parent code, sorted by code
    ///
    /// Used by the refinement pass to prefer the most specific valid child
    /// over a generic parent.
    pub fn children_of(&self, parent_code: &str) -> Vec<&Tagset> {
        let mut children: Vec<&Tagset> = self
            .by_code
            .values()
            .filter(|t| t.parent_code.as_deref() == Some(parent_code))
            .collect();
        children.sort_by(|a, b| a.code.cmp(&b.code));
        children
    }

    /// Whether a code's top-level domain resolves to an active level-1 tagset
    ///
    /// A word classified under a code whose domain is not active is treated
    /// as unclassifiable.
    pub fn has_active_domain(&self, code: &str) -> bool {
        let prefix = top_level_prefix(code);
        self.by_code
            .get(prefix)
            .map(|t| t.depth_level == 1)
            .unwrap_or(false)
    }

    /// Downgrade an invalid code to the nearest safely writable code
    ///
    /// Returns the code itself when valid with an active domain, else its
    /// active 2-char top-level ancestor, else the unclassified sentinel.
    pub fn fallback_code(&self, code: &str) -> String {
        if self.is_valid_tagset(code) && self.has_active_domain(code) {
            return code.to_string();
        }
        let prefix = top_level_prefix(code);
        if self.is_valid_tagset(prefix) && self.has_active_domain(prefix) {
            tracing::debug!(code = %code, ancestor = %prefix, "Falling back to ancestor code");
            return prefix.to_string();
        }
        tracing::debug!(code = %code, "No valid ancestor, falling back to sentinel");
        UNCLASSIFIED_CODE.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TagsetStatus;

    pub(crate) fn tagset(code: &str, name: &str, parent: Option<&str>, depth: u8) -> Tagset {
        Tagset {
            code: code.to_string(),
            name: name.to_string(),
            description: String::new(),
            parent_code: parent.map(String::from),
            depth_level: depth,
            status: TagsetStatus::Active,
            examples: Vec::new(),
            created_at: chrono::Utc::now(),
        }
    }

    fn snapshot() -> TaxonomySnapshot {
        TaxonomySnapshot::from_tagsets(vec![
            tagset("SE", "Sentimento", None, 1),
            tagset("SE.TRI", "Tristeza", Some("SE"), 2),
            tagset("SE.ALE", "Alegria", Some("SE"), 2),
            tagset("NA", "Natureza", None, 1),
        ])
    }

    #[test]
    fn test_is_valid_tagset_exact_match_only() {
        let snap = snapshot();
        assert!(snap.is_valid_tagset("SE.TRI"));
        assert!(!snap.is_valid_tagset("SE.TRISTE"));
        assert!(!snap.is_valid_tagset("se.tri"));
    }

    #[test]
    fn test_children_sorted() {
        let snap = snapshot();
        let children: Vec<&str> = snap
            .children_of("SE")
            .iter()
            .map(|t| t.code.as_str())
            .collect();
        assert_eq!(children, vec!["SE.ALE", "SE.TRI"]);
    }

    #[test]
    fn test_fallback_valid_code_unchanged() {
        let snap = snapshot();
        assert_eq!(snap.fallback_code("SE.TRI"), "SE.TRI");
    }

    #[test]
    fn test_fallback_to_ancestor() {
        let snap = snapshot();
        assert_eq!(snap.fallback_code("SE.XYZ"), "SE");
    }

    #[test]
    fn test_fallback_to_sentinel() {
        let snap = snapshot();
        assert_eq!(snap.fallback_code("ZZ.ABC"), UNCLASSIFIED_CODE);
    }

    #[test]
    fn test_fallback_multibyte_code_to_sentinel() {
        // A model can return arbitrary text as a code; prefix extraction
        // must not split a multibyte character
        let snap = snapshot();
        assert_eq!(snap.fallback_code("aé"), UNCLASSIFIED_CODE);
        assert_eq!(snap.fallback_code("né.XYZ"), UNCLASSIFIED_CODE);
        assert_eq!(snap.fallback_code("ção"), UNCLASSIFIED_CODE);
    }

    #[test]
    fn test_valid_code_with_inactive_domain_falls_back() {
        // SE.TRI active but its domain SE missing: unusable
        let snap = TaxonomySnapshot::from_tagsets(vec![tagset("SE.TRI", "Tristeza", Some("SE"), 2)]);
        assert_eq!(snap.fallback_code("SE.TRI"), UNCLASSIFIED_CODE);
    }
}
