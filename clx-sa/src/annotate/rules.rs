//! Morphological pattern rules (cascade stage 2)
//!
//! A small ordered list of deterministic, inspectable heuristics. First
//! matching rule wins; a rule whose target code is not currently active in
//! the taxonomy is skipped entirely, never degraded.

use crate::annotate::lexicon::normalize;
use crate::taxonomy::TaxonomySnapshot;

/// How a rule matches a normalized word
#[derive(Debug, Clone, Copy)]
enum Matcher {
    /// Word ends with the given suffix (and is longer than it)
    Suffix(&'static str),
    /// Word is one of a fixed set
    OneOf(&'static [&'static str]),
}

/// One morphological rule
#[derive(Debug, Clone)]
pub struct PatternRule {
    pub name: &'static str,
    matcher: Matcher,
    pub target_code: &'static str,
    pub confidence: f64,
}

impl PatternRule {
    fn matches(&self, normalized: &str) -> bool {
        match self.matcher {
            Matcher::Suffix(suffix) => {
                normalized.len() > suffix.len() && normalized.ends_with(suffix)
            }
            Matcher::OneOf(set) => set.contains(&normalized),
        }
    }
}

/// A successful rule application
#[derive(Debug, Clone)]
pub struct RuleMatch {
    pub rule_name: &'static str,
    pub tag_code: String,
    pub confidence: f64,
}

const INTERJECTIONS: &[&str] = &["ai", "oh", "ah", "ei", "opa", "ue", "uai", "vixe"];

/// The ordered rule list
///
/// Target codes follow the corpus taxonomy conventions: AC = ação,
/// GR = marcador gramatical, AF = afetividade.
pub fn default_rules() -> Vec<PatternRule> {
    vec![
        PatternRule {
            name: "gerund_suffix",
            matcher: Matcher::Suffix("ndo"),
            target_code: "AC",
            confidence: 0.80,
        },
        PatternRule {
            name: "adverbial_mente",
            matcher: Matcher::Suffix("mente"),
            target_code: "GR.ADV",
            confidence: 0.85,
        },
        PatternRule {
            name: "interjection_set",
            matcher: Matcher::OneOf(INTERJECTIONS),
            target_code: "GR.INT",
            confidence: 0.90,
        },
        PatternRule {
            name: "diminutive_inho",
            matcher: Matcher::Suffix("inho"),
            target_code: "AF",
            confidence: 0.70,
        },
        PatternRule {
            name: "diminutive_inha",
            matcher: Matcher::Suffix("inha"),
            target_code: "AF",
            confidence: 0.70,
        },
    ]
}

/// Apply the rule list to one word
///
/// First rule that matches AND whose target code is active wins. An
/// inactive target skips the rule; later rules still get their chance.
pub fn apply_rules(
    rules: &[PatternRule],
    word: &str,
    snapshot: &TaxonomySnapshot,
) -> Option<RuleMatch> {
    let normalized = normalize(word);
    for rule in rules {
        if !rule.matches(&normalized) {
            continue;
        }
        if !snapshot.is_valid_tagset(rule.target_code) || !snapshot.has_active_domain(rule.target_code)
        {
            tracing::debug!(
                rule = rule.name,
                target_code = rule.target_code,
                "Skipping rule: target code not active"
            );
            continue;
        }
        return Some(RuleMatch {
            rule_name: rule.name,
            tag_code: rule.target_code.to_string(),
            confidence: rule.confidence,
        });
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Tagset, TagsetStatus};

    fn active(code: &str, name: &str, parent: Option<&str>, depth: u8) -> Tagset {
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

    fn full_snapshot() -> TaxonomySnapshot {
        TaxonomySnapshot::from_tagsets(vec![
            active("AC", "Ação", None, 1),
            active("GR", "Marcador Gramatical", None, 1),
            active("GR.ADV", "Advérbio", Some("GR"), 2),
            active("GR.INT", "Interjeição", Some("GR"), 2),
            active("AF", "Afetividade", None, 1),
        ])
    }

    #[test]
    fn test_gerund_rule() {
        let m = apply_rules(&default_rules(), "cantando", &full_snapshot()).unwrap();
        assert_eq!(m.tag_code, "AC");
        assert_eq!(m.confidence, 0.80);
    }

    #[test]
    fn test_adverbial_rule_with_diacritics() {
        let m = apply_rules(&default_rules(), "Tristemente", &full_snapshot()).unwrap();
        assert_eq!(m.tag_code, "GR.ADV");
    }

    #[test]
    fn test_interjection_rule() {
        let m = apply_rules(&default_rules(), "oxe", &full_snapshot());
        // "oxe" is lexicon territory, not in the interjection set here
        assert!(m.is_none());
        let m = apply_rules(&default_rules(), "vixe", &full_snapshot()).unwrap();
        assert_eq!(m.tag_code, "GR.INT");
        assert_eq!(m.confidence, 0.90);
    }

    #[test]
    fn test_suffix_must_not_consume_whole_word() {
        // "mente" alone is a noun/verb, not an adverbial derivation
        assert!(apply_rules(&default_rules(), "mente", &full_snapshot()).is_none());
    }

    #[test]
    fn test_inactive_target_skips_rule_entirely() {
        // AC missing: gerund rule skipped, no degraded fallback
        let snapshot = TaxonomySnapshot::from_tagsets(vec![
            active("GR", "Marcador Gramatical", None, 1),
            active("GR.ADV", "Advérbio", Some("GR"), 2),
        ]);
        assert!(apply_rules(&default_rules(), "cantando", &snapshot).is_none());
        // Other rules with active targets still fire
        assert!(apply_rules(&default_rules(), "somente", &snapshot).is_some());
    }

    #[test]
    fn test_no_match() {
        assert!(apply_rules(&default_rules(), "sertão", &full_snapshot()).is_none());
    }
}
