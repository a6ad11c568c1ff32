//! Tokenization and local-context hashing
//!
//! The cache key must include local context, not just the word: the same
//! surface word carries different tags in different contexts, and a pure
//! word→tag cache would silently average away polysemy. The hash is
//! order-sensitive over a fixed ±N token window; at song boundaries the
//! window shrinks (it never wraps to a neighboring song).

use sha2::{Digest, Sha256};

/// Default context window radius in tokens
pub const DEFAULT_WINDOW_RADIUS: usize = 5;

/// Split lyrics into lowercase word tokens
///
/// Tokens are maximal runs of alphabetic characters (plus in-word hyphens
/// and apostrophes); punctuation and digits are separators. Diacritics are
/// preserved here; normalization for lexicon lookup happens later.
pub fn tokenize(lyrics: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();

    for ch in lyrics.chars() {
        if ch.is_alphabetic() {
            current.extend(ch.to_lowercase());
        } else if (ch == '-' || ch == '\'') && !current.is_empty() {
            // In-word hyphen/apostrophe ("pé-de-serra", "d'água")
            current.push(ch);
        } else if !current.is_empty() {
            tokens.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        // Trailing separator chars never reach here, but a trailing
        // hyphen can; strip it
        tokens.push(current);
    }

    tokens
        .into_iter()
        .map(|t| t.trim_matches(|c| c == '-' || c == '\'').to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Marker standing in for the keyword's own slot in its context window
///
/// NUL never appears in a token, so the marker cannot collide with real
/// context. Without it, a keyword preceded by "alfa" and a keyword followed
/// by "alfa" would produce the same window.
const KEYWORD_SLOT: &str = "\u{0}";

/// The ±radius tokens around index, clamped to the song's token list
///
/// The keyword itself is replaced by a positional marker (the word is the
/// other half of the cache key), keeping preceding and following context
/// distinct.
pub fn context_window(tokens: &[String], index: usize, radius: usize) -> Vec<String> {
    let start = index.saturating_sub(radius);
    let end = (index + radius + 1).min(tokens.len());

    let mut window = Vec::with_capacity(end - start);
    for (i, token) in tokens.iter().enumerate().take(end).skip(start) {
        if i == index {
            window.push(KEYWORD_SLOT.to_string());
        } else {
            window.push(token.clone());
        }
    }
    window
}

/// Deterministic, order-sensitive hash of a context window
///
/// Identical words in textually identical local contexts hash identically,
/// enabling reuse across songs that share phrasing.
pub fn context_hash(window: &[String]) -> String {
    let mut hasher = Sha256::new();
    for (i, token) in window.iter().enumerate() {
        if i > 0 {
            hasher.update([0x1f]);
        }
        hasher.update(token.as_bytes());
    }
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// KWIC (keyword-in-context) line for LLM prompts and justifications
pub fn kwic(tokens: &[String], index: usize, radius: usize) -> String {
    let start = index.saturating_sub(radius);
    let end = (index + radius + 1).min(tokens.len());

    let mut parts = Vec::with_capacity(end - start);
    for (i, token) in tokens.iter().enumerate().take(end).skip(start) {
        if i == index {
            parts.push(format!("[{}]", token));
        } else {
            parts.push(token.clone());
        }
    }
    parts.join(" ")
}
