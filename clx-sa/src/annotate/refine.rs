//! Refinement pass: generic top-level codes to specific children
//!
//! Cached classifications that landed on a 2-char top-level code (e.g. "SE")
//! are periodically re-submitted to the LLM with the choice restricted to
//! that code's active children. A refinement is accepted only when the
//! returned code really is a child of the original family AND carries a
//! non-empty justification; anything else leaves the cached row untouched.

use sqlx::SqlitePool;
use std::collections::BTreeMap;

use clx_common::Result;

use crate::db;
use crate::models::cache_entry::ClassificationSource;
use crate::models::CacheEntry;
use crate::taxonomy::TaxonomySnapshot;

use super::llm::{LlmClassification, LlmClient, LlmWordQuery};

/// Candidates pulled per refinement pass
pub const REFINE_BATCH_LIMIT: i64 = 100;

/// Pause between refinement passes
pub const REFINE_INTERVAL: std::time::Duration = std::time::Duration::from_secs(3600);

/// Outcome counters for one refinement pass
#[derive(Debug, Clone, Copy, Default)]
pub struct RefineOutcome {
    pub candidates: usize,
    pub refined: usize,
    pub rejected: usize,
    pub llm_tokens: Option<u64>,
}

/// Run one refinement pass over cached top-level classifications
///
/// Families with no active children are skipped outright. The pass is
/// best-effort: an LLM failure ends the pass early without touching any row.
pub async fn refine_cached_entries(
    pool: &SqlitePool,
    snapshot: &TaxonomySnapshot,
    client: &LlmClient,
    ttl_days: i64,
) -> Result<RefineOutcome> {
    let mut outcome = RefineOutcome::default();

    let candidates = db::cache::refinement_candidates(pool, REFINE_BATCH_LIMIT).await?;
    let candidates: Vec<CacheEntry> = candidates
        .into_iter()
        .filter(|e| !snapshot.children_of(&e.tag_code).is_empty())
        .collect();
    outcome.candidates = candidates.len();

    if candidates.is_empty() {
        return Ok(outcome);
    }

    // One batched call per code family keeps the restricted vocabulary
    // honest and the call count proportional to families, not entries
    let mut families: BTreeMap<&str, Vec<&CacheEntry>> = BTreeMap::new();
    for entry in &candidates {
        families.entry(entry.tag_code.as_str()).or_default().push(entry);
    }

    for (family, entries) in &families {
        let children = snapshot.children_of(family);
        let queries: Vec<LlmWordQuery> = entries
            .iter()
            .map(|e| LlmWordQuery {
                word: e.word.clone(),
                context: format!("(cached under {})", family),
            })
            .collect();

        let batch = match client.classify_batch(&queries, &children).await {
            Ok(batch) => batch,
            Err(e) => {
                tracing::warn!(error = %e, "Refinement LLM call failed, ending pass");
                return Ok(outcome);
            }
        };

        if let Some(tokens) = batch.total_tokens {
            outcome.llm_tokens = Some(outcome.llm_tokens.unwrap_or(0) + tokens);
        }

        for entry in entries {
            let tuple = batch
                .classifications
                .iter()
                .find(|c| c.word.eq_ignore_ascii_case(&entry.word));

            match tuple {
                Some(c) if accepts_refinement(snapshot, &entry.tag_code, c) => {
                    db::cache::put(
                        pool,
                        &entry.word,
                        &entry.context_hash,
                        &c.tag_code,
                        c.confidence.clamp(0.0, 1.0),
                        ClassificationSource::Llm,
                        ttl_days,
                    )
                    .await?;
                    tracing::info!(
                        word = %entry.word,
                        from = %entry.tag_code,
                        to = %c.tag_code,
                        "Refined cached classification"
                    );
                    outcome.refined += 1;
                }
                _ => {
                    outcome.rejected += 1;
                }
            }
        }
    }

    Ok(outcome)
}

/// Run refinement passes until cancelled
///
/// Only spawned when the LLM stage is enabled; the cascade keeps ownership
/// of the shared client.
pub async fn run(
    pool: SqlitePool,
    cascade: std::sync::Arc<super::Cascade>,
    shutdown: tokio_util::sync::CancellationToken,
) {
    let mut interval = tokio::time::interval(REFINE_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    tracing::info!("Refinement pass started");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::info!("Refinement pass shutting down");
                return;
            }
            _ = interval.tick() => {
                let Some(client) = cascade.llm_client() else { return };
                let result = async {
                    let snapshot = TaxonomySnapshot::load(&pool).await?;
                    let ttl_days = db::settings::cache_ttl_days(&pool).await?;
                    refine_cached_entries(&pool, &snapshot, client, ttl_days).await
                }
                .await;
                match result {
                    Ok(outcome) if outcome.candidates > 0 => {
                        tracing::info!(
                            candidates = outcome.candidates,
                            refined = outcome.refined,
                            rejected = outcome.rejected,
                            "Refinement pass completed"
                        );
                    }
                    Ok(_) => {}
                    Err(e) => tracing::error!(error = %e, "Refinement pass failed"),
                }
            }
        }
    }
}

/// A refinement is accepted only for an active child of the same family
/// that comes with a non-empty justification
fn accepts_refinement(
    snapshot: &TaxonomySnapshot,
    parent_code: &str,
    c: &LlmClassification,
) -> bool {
    if c.justification.trim().is_empty() {
        return false;
    }
    snapshot
        .get(&c.tag_code)
        .map(|t| t.parent_code.as_deref() == Some(parent_code))
        .unwrap_or(false)
}
