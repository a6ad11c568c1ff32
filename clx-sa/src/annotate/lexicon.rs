//! Curated dialect/grammar lexicon (cascade stage 1)
//!
//! Entries map headwords (and listed variants) to thematic categories.
//! Categories are resolved to tag codes at runtime against the current
//! taxonomy snapshot, never hardcoded, so the lexicon survives curators
//! reorganizing codes.

use serde::Deserialize;
use std::collections::HashMap;

use crate::taxonomy::TaxonomySnapshot;

/// Fixed confidence for lexicon hits
pub const LEXICON_CONFIDENCE: f64 = 0.95;

/// One curated lexicon entry
#[derive(Debug, Clone, Deserialize)]
pub struct LexiconEntry {
    pub headword: String,
    #[serde(default)]
    pub variants: Vec<String>,
    /// Thematic category, matched against active tagset names
    pub category: String,
}

#[derive(Debug, Deserialize)]
struct LexiconFile {
    entries: Vec<LexiconEntry>,
}

/// Curated lexicon with normalized lookup index
pub struct Lexicon {
    /// normalized form (headword or variant) → entry index
    index: HashMap<String, usize>,
    entries: Vec<LexiconEntry>,
}

impl Lexicon {
    /// Load the lexicon shipped with the service
    pub fn embedded() -> anyhow::Result<Self> {
        Self::from_toml(include_str!("../../data/lexicon.toml"))
    }

    pub fn from_toml(toml_str: &str) -> anyhow::Result<Self> {
        let file: LexiconFile = toml::from_str(toml_str)?;
        Ok(Self::from_entries(file.entries))
    }

    pub fn from_entries(entries: Vec<LexiconEntry>) -> Self {
        let mut index = HashMap::new();
        for (i, entry) in entries.iter().enumerate() {
            index.insert(normalize(&entry.headword), i);
            for variant in &entry.variants {
                index.insert(normalize(variant), i);
            }
        }
        Self { index, entries }
    }

    /// Look up a word by normalized form or listed variant
    pub fn lookup(&self, word: &str) -> Option<&LexiconEntry> {
        self.index.get(&normalize(word)).map(|&i| &self.entries[i])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Runtime mapping from lexicon categories to active tag codes
///
/// Built per taxonomy snapshot by matching normalized tagset names against
/// normalized category labels. A category with no active tagset resolves to
/// nothing, and stage 1 passes on that word.
pub struct CategoryMapping {
    by_category: HashMap<String, String>,
}

impl CategoryMapping {
    pub fn from_snapshot(snapshot: &TaxonomySnapshot) -> Self {
        let mut by_category = HashMap::new();
        // Sorted iteration: when two active tagsets share a normalized
        // name, the lexicographically smallest (most generic) code wins
        for tagset in snapshot.active_tagsets() {
            by_category
                .entry(normalize(&tagset.name))
                .or_insert_with(|| tagset.code.clone());
        }
        Self { by_category }
    }

    pub fn code_for(&self, category: &str) -> Option<&str> {
        self.by_category.get(&normalize(category)).map(|s| s.as_str())
    }
}

/// Normalize for lookup: lowercase + strip diacritics
///
/// Covers the Latin-1/Portuguese accented range; anything else passes
/// through lowercased.
pub fn normalize(word: &str) -> String {
    word.chars()
        .flat_map(char::to_lowercase)
        .map(fold_diacritic)
        .collect()
}

fn fold_diacritic(c: char) -> char {
    match c {
        'á' | 'à' | 'â' | 'ã' | 'ä' => 'a',
        'é' | 'è' | 'ê' | 'ë' => 'e',
        'í' | 'ì' | 'î' | 'ï' => 'i',
        'ó' | 'ò' | 'ô' | 'õ' | 'ö' => 'o',
        'ú' | 'ù' | 'û' | 'ü' => 'u',
        'ç' => 'c',
        'ñ' => 'n',
        other => other,
    }
}
