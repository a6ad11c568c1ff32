//! Classification cascade
//!
//! Resolves each word occurrence through ordered stages, cheapest first:
//! cache, curated lexicon, morphological pattern rules, remote LLM batch.
//! The cache is consulted before any stage runs so replaying an
//! already-classified chunk (crash recovery) touches neither the rules nor
//! the LLM. A word no stage resolves gets the unclassified sentinel at
//! confidence zero; the cascade itself never fails a chunk.

pub mod context;
pub mod lexicon;
pub mod llm;
pub mod refine;
pub mod rules;

use sqlx::SqlitePool;

use clx_common::Result;

use crate::db;
use crate::models::cache_entry::ClassificationSource;
use crate::models::tagset::UNCLASSIFIED_CODE;
use crate::taxonomy::TaxonomySnapshot;

use lexicon::{CategoryMapping, Lexicon, LEXICON_CONFIDENCE};
use llm::{LlmClient, LlmWordQuery};
use rules::PatternRule;

/// One word occurrence to classify, with its precomputed cache key
#[derive(Debug, Clone)]
pub struct WordOccurrence {
    /// Lowercased surface form (diacritics preserved)
    pub word: String,
    /// Hash of the ±N token window around the occurrence
    pub context_hash: String,
    /// KWIC line for LLM prompts
    pub kwic: String,
}

/// A resolved classification for one occurrence
#[derive(Debug, Clone)]
pub struct Classification {
    pub word: String,
    pub context_hash: String,
    pub tag_code: String,
    pub confidence: f64,
    pub source: ClassificationSource,
}

/// Per-chunk cascade telemetry, fed to the metrics table
#[derive(Debug, Clone, Default)]
pub struct ChunkOutcome {
    pub classifications: Vec<Classification>,
    pub cache_hits: usize,
    pub failed_words: usize,
    pub llm_latency_ms: Option<u64>,
    pub llm_tokens: Option<u64>,
}

/// The classification cascade
///
/// Holds the fixed stage-1/2 resources; the taxonomy snapshot and cache TTL
/// are passed per chunk so curation changes land between chunks.
pub struct Cascade {
    lexicon: Lexicon,
    rules: Vec<PatternRule>,
    llm_client: Option<LlmClient>,
}

impl Cascade {
    pub fn new(lexicon: Lexicon, rules: Vec<PatternRule>, llm_client: Option<LlmClient>) -> Self {
        if llm_client.is_none() {
            tracing::warn!("No LLM API key configured; cascade stage 4 disabled");
        }
        Self {
            lexicon,
            rules,
            llm_client,
        }
    }

    /// The LLM client, when stage 4 is enabled (shared with the
    /// refinement pass)
    pub fn llm_client(&self) -> Option<&LlmClient> {
        self.llm_client.as_ref()
    }

    /// Classify one chunk of word occurrences
    ///
    /// Every occurrence in the chunk gets exactly one classification. Cache
    /// hits pass through unchanged (hit counter incremented); every fresh
    /// classification is written through to the cache, EXCEPT sentinel
    /// assignments made because the LLM stage was unavailable or failed.
    /// Those stay uncached so a later run can retry the occurrence.
    pub async fn classify_chunk(
        &self,
        pool: &SqlitePool,
        snapshot: &TaxonomySnapshot,
        occurrences: &[WordOccurrence],
        ttl_days: i64,
    ) -> Result<ChunkOutcome> {
        let mut outcome = ChunkOutcome::default();
        let mapping = CategoryMapping::from_snapshot(snapshot);
        let mut unresolved: Vec<&WordOccurrence> = Vec::new();

        for occ in occurrences {
            // Stage 0: cache. Consulted before everything else so replaying
            // a chunk after a crash re-invokes no classifier.
            if let Some(entry) = db::cache::get(pool, &occ.word, &occ.context_hash).await? {
                db::cache::record_hit(pool, &occ.word, &occ.context_hash).await?;
                outcome.cache_hits += 1;
                outcome.classifications.push(Classification {
                    word: occ.word.clone(),
                    context_hash: occ.context_hash.clone(),
                    tag_code: entry.tag_code,
                    confidence: entry.confidence,
                    source: ClassificationSource::CacheHit,
                });
                continue;
            }

            // Stage 1: curated lexicon, resolved through the live taxonomy
            if let Some(entry) = self.lexicon.lookup(&occ.word) {
                if let Some(code) = mapping.code_for(&entry.category) {
                    if snapshot.has_active_domain(code) {
                        self.accept(
                            pool,
                            &mut outcome,
                            occ,
                            code.to_string(),
                            LEXICON_CONFIDENCE,
                            ClassificationSource::Lexicon,
                            ttl_days,
                        )
                        .await?;
                        continue;
                    }
                }
            }

            // Stage 2: morphological pattern rules
            if let Some(m) = rules::apply_rules(&self.rules, &occ.word, snapshot) {
                self.accept(
                    pool,
                    &mut outcome,
                    occ,
                    m.tag_code,
                    m.confidence,
                    ClassificationSource::Pattern,
                    ttl_days,
                )
                .await?;
                continue;
            }

            unresolved.push(occ);
        }

        if !unresolved.is_empty() {
            self.resolve_with_llm(pool, snapshot, &unresolved, ttl_days, &mut outcome)
                .await?;
        }

        tracing::debug!(
            total = occurrences.len(),
            cache_hits = outcome.cache_hits,
            failed = outcome.failed_words,
            "Chunk cascade complete"
        );

        Ok(outcome)
    }

    /// Record a fresh classification and write it through to the cache
    #[allow(clippy::too_many_arguments)]
    async fn accept(
        &self,
        pool: &SqlitePool,
        outcome: &mut ChunkOutcome,
        occ: &WordOccurrence,
        tag_code: String,
        confidence: f64,
        source: ClassificationSource,
        ttl_days: i64,
    ) -> Result<()> {
        db::cache::put(
            pool,
            &occ.word,
            &occ.context_hash,
            &tag_code,
            confidence,
            source,
            ttl_days,
        )
        .await?;
        outcome.classifications.push(Classification {
            word: occ.word.clone(),
            context_hash: occ.context_hash.clone(),
            tag_code,
            confidence,
            source,
        });
        Ok(())
    }

    /// Stage 4: one batched LLM call for everything stages 0-2 left behind
    ///
    /// Returned codes are re-validated against the taxonomy and downgraded
    /// via `fallback_code` when invalid; words missing from the response and
    /// every word on a failed call get the sentinel, uncached, and count as
    /// failed for the metrics.
    async fn resolve_with_llm(
        &self,
        pool: &SqlitePool,
        snapshot: &TaxonomySnapshot,
        unresolved: &[&WordOccurrence],
        ttl_days: i64,
        outcome: &mut ChunkOutcome,
    ) -> Result<()> {
        let batch = match &self.llm_client {
            Some(client) => {
                let queries: Vec<LlmWordQuery> = unresolved
                    .iter()
                    .map(|occ| LlmWordQuery {
                        word: occ.word.clone(),
                        context: occ.kwic.clone(),
                    })
                    .collect();
                match client
                    .classify_batch(&queries, &snapshot.active_tagsets())
                    .await
                {
                    Ok(batch) => Some(batch),
                    Err(e) => {
                        tracing::warn!(error = %e, words = unresolved.len(), "LLM batch failed");
                        None
                    }
                }
            }
            None => None,
        };

        let Some(batch) = batch else {
            for occ in unresolved {
                outcome.failed_words += 1;
                outcome.classifications.push(sentinel(occ));
            }
            return Ok(());
        };

        outcome.llm_latency_ms = Some(batch.latency_ms);
        outcome.llm_tokens = batch.total_tokens;

        for occ in unresolved {
            // First response tuple for this word; the model answers per
            // word, occurrences of the same word share it
            let tuple = batch
                .classifications
                .iter()
                .find(|c| c.word.eq_ignore_ascii_case(&occ.word));

            match tuple {
                Some(c) => {
                    let code = snapshot.fallback_code(&c.tag_code);
                    if code != c.tag_code {
                        tracing::debug!(
                            word = %occ.word,
                            returned = %c.tag_code,
                            stored = %code,
                            "Downgraded LLM code after validation"
                        );
                    }
                    let confidence = if code == UNCLASSIFIED_CODE {
                        0.0
                    } else {
                        c.confidence.clamp(0.0, 1.0)
                    };
                    self.accept(
                        pool,
                        outcome,
                        occ,
                        code,
                        confidence,
                        ClassificationSource::Llm,
                        ttl_days,
                    )
                    .await?;
                }
                None => {
                    tracing::debug!(word = %occ.word, "Word missing from LLM response");
                    outcome.failed_words += 1;
                    outcome.classifications.push(sentinel(occ));
                }
            }
        }

        Ok(())
    }
}

fn sentinel(occ: &WordOccurrence) -> Classification {
    Classification {
        word: occ.word.clone(),
        context_hash: occ.context_hash.clone(),
        tag_code: UNCLASSIFIED_CODE.to_string(),
        confidence: 0.0,
        source: ClassificationSource::Llm,
    }
}
