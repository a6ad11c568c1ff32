//! Integration tests for the LLM fallback stage and the refinement pass
//!
//! Runs the cascade and the refinement pass against a local stub
//! chat-completions endpoint, covering the adversarial paths: hallucinated
//! codes (including multibyte ones), out-of-range confidences, words
//! missing from the response and outright call failure.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::{http::StatusCode, routing::post, Json, Router};
use serde_json::json;
use tempfile::TempDir;

use clx_sa::annotate::lexicon::Lexicon;
use clx_sa::annotate::llm::LlmClient;
use clx_sa::annotate::{refine, rules, Cascade, WordOccurrence};
use clx_sa::models::{ClassificationSource, Tagset, TagsetStatus};
use clx_sa::taxonomy::TaxonomySnapshot;

async fn test_pool() -> (sqlx::SqlitePool, TempDir) {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join("cantolex.db");
    let pool = clx_sa::db::init_database_pool(&db_path)
        .await
        .expect("Failed to initialize database");
    (pool, temp_dir)
}

async fn seed_taxonomy(pool: &sqlx::SqlitePool) {
    for (code, name, parent, depth) in [
        ("SE", "Sentimento", None, 1u8),
        ("SE.TRI", "Tristeza", Some("SE"), 2),
        ("NA", "Natureza", None, 1),
        ("NA.SEC", "Seca", Some("NA"), 2),
    ] {
        let tagset = Tagset {
            code: code.to_string(),
            name: name.to_string(),
            description: String::new(),
            parent_code: parent.map(String::from),
            depth_level: depth,
            status: TagsetStatus::Pending,
            examples: Vec::new(),
            created_at: chrono::Utc::now(),
        };
        clx_sa::db::tagsets::propose_tagset(pool, &tagset).await.unwrap();
        clx_sa::db::tagsets::approve_tagset(pool, code).await.unwrap();
    }
}

/// Serve a canned chat-completions reply on an ephemeral port, counting
/// requests; returns the base URL to point the client at
async fn stub_llm(content: &str, hits: Arc<AtomicUsize>) -> String {
    let content = content.to_string();
    let app = Router::new().route(
        "/chat/completions",
        post(move || {
            let content = content.clone();
            let hits = hits.clone();
            async move {
                hits.fetch_add(1, Ordering::SeqCst);
                Json(json!({
                    "choices": [{"message": {"role": "assistant", "content": content}}],
                    "usage": {"total_tokens": 42}
                }))
            }
        }),
    );
    serve_stub(app).await
}

/// A stub endpoint that always fails
async fn stub_llm_failing() -> String {
    let app = Router::new().route(
        "/chat/completions",
        post(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
    );
    serve_stub(app).await
}

async fn serve_stub(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn client_for(base_url: String) -> LlmClient {
    LlmClient::new(base_url, "test-key".to_string(), "stub-model".to_string()).unwrap()
}

fn occurrence(word: &str, hash: &str) -> WordOccurrence {
    WordOccurrence {
        word: word.to_string(),
        context_hash: hash.to_string(),
        kwic: format!("... [{}] ...", word),
    }
}

/// Given a model response mixing valid, hallucinated and multibyte codes
/// When the cascade resolves a chunk through the LLM stage
/// Then every code is re-validated before persisting and nothing panics
#[tokio::test]
async fn test_llm_stage_validates_every_returned_code() {
    let (pool, _guard) = test_pool().await;
    seed_taxonomy(&pool).await;
    let snapshot = TaxonomySnapshot::load(&pool).await.unwrap();

    let content = r#"[
        {"word":"xpto","tagCode":"SE.TRI","confidence":0.77,"justification":"sorrowful"},
        {"word":"zeta","tagCode":"né.INVENTADO","confidence":0.9,"justification":"made up"},
        {"word":"quorpal","tagCode":"SE.FAKE","confidence":1.7,"justification":"over-sure"}
    ]"#;
    let base_url = stub_llm(content, Arc::new(AtomicUsize::new(0))).await;
    let cascade = Cascade::new(
        Lexicon::embedded().unwrap(),
        rules::default_rules(),
        Some(client_for(base_url)),
    );

    // None of these hit the lexicon or the pattern rules
    let occurrences = vec![
        occurrence("xpto", "h1"),
        occurrence("zeta", "h2"),
        occurrence("quorpal", "h3"),
        occurrence("mimsy", "h4"),
    ];
    let outcome = cascade
        .classify_chunk(&pool, &snapshot, &occurrences, 30)
        .await
        .unwrap();

    assert_eq!(outcome.classifications.len(), 4);
    assert_eq!(outcome.llm_tokens, Some(42));
    assert!(outcome.llm_latency_ms.is_some());

    let by_word = |w: &str| {
        outcome
            .classifications
            .iter()
            .find(|c| c.word == w)
            .unwrap()
            .clone()
    };

    // Valid code passes through
    let valid = by_word("xpto");
    assert_eq!(valid.tag_code, "SE.TRI");
    assert_eq!(valid.confidence, 0.77);
    assert_eq!(valid.source, ClassificationSource::Llm);

    // Multibyte hallucinated code downgrades to the sentinel
    let multibyte = by_word("zeta");
    assert_eq!(multibyte.tag_code, "NC");
    assert_eq!(multibyte.confidence, 0.0);

    // Nonexistent child falls back to its active ancestor; out-of-range
    // confidence is clamped
    let downgraded = by_word("quorpal");
    assert_eq!(downgraded.tag_code, "SE");
    assert_eq!(downgraded.confidence, 1.0);

    // Word absent from the response gets the sentinel and counts as failed
    let missing = by_word("mimsy");
    assert_eq!(missing.tag_code, "NC");
    assert_eq!(outcome.failed_words, 1);

    // LLM results were written through; the missing word was not
    assert!(clx_sa::db::cache::get(&pool, "xpto", "h1").await.unwrap().is_some());
    assert!(clx_sa::db::cache::get(&pool, "zeta", "h2").await.unwrap().is_some());
    let ancestor = clx_sa::db::cache::get(&pool, "quorpal", "h3").await.unwrap().unwrap();
    assert_eq!(ancestor.tag_code, "SE");
    assert!(clx_sa::db::cache::get(&pool, "mimsy", "h4").await.unwrap().is_none());
}

/// A failed LLM call degrades every unresolved word to an uncached
/// sentinel; the chunk itself still succeeds
#[tokio::test]
async fn test_llm_failure_degrades_to_uncached_sentinel() {
    let (pool, _guard) = test_pool().await;
    seed_taxonomy(&pool).await;
    let snapshot = TaxonomySnapshot::load(&pool).await.unwrap();

    let cascade = Cascade::new(
        Lexicon::embedded().unwrap(),
        rules::default_rules(),
        Some(client_for(stub_llm_failing().await)),
    );

    let occurrences = vec![occurrence("xpto", "h1"), occurrence("zeta", "h2")];
    let outcome = cascade
        .classify_chunk(&pool, &snapshot, &occurrences, 30)
        .await
        .unwrap();

    assert_eq!(outcome.failed_words, 2);
    for c in &outcome.classifications {
        assert_eq!(c.tag_code, "NC");
        assert_eq!(c.confidence, 0.0);
    }
    // Uncached, so a later run with a working endpoint retries them
    assert!(clx_sa::db::cache::get(&pool, "xpto", "h1").await.unwrap().is_none());
    assert!(clx_sa::db::cache::get(&pool, "zeta", "h2").await.unwrap().is_none());
}

/// Given cached top-level classifications in one family
/// When the refinement pass runs
/// Then the family goes out as a single batched call, same-family children
/// with a justification land, and cross-family proposals are rejected
#[tokio::test]
async fn test_refinement_batches_per_family_and_validates() {
    let (pool, _guard) = test_pool().await;
    seed_taxonomy(&pool).await;
    let snapshot = TaxonomySnapshot::load(&pool).await.unwrap();

    for (word, hash, code, source) in [
        ("saudade", "r1", "SE", ClassificationSource::Llm),
        ("menino", "r2", "SE", ClassificationSource::Llm),
        ("pinned", "r3", "SE", ClassificationSource::Curation),
    ] {
        clx_sa::db::cache::put(&pool, word, hash, code, 0.8, source, 30)
            .await
            .unwrap();
    }

    let content = r#"[
        {"word":"saudade","tagCode":"SE.TRI","confidence":0.85,"justification":"expresses longing"},
        {"word":"menino","tagCode":"NA.SEC","confidence":0.9,"justification":"cross family"}
    ]"#;
    let hits = Arc::new(AtomicUsize::new(0));
    let client = client_for(stub_llm(content, hits.clone()).await);

    let outcome = refine::refine_cached_entries(&pool, &snapshot, &client, 30)
        .await
        .unwrap();

    // The curated row is never a candidate
    assert_eq!(outcome.candidates, 2);
    assert_eq!(outcome.refined, 1);
    assert_eq!(outcome.rejected, 1);
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    let refined = clx_sa::db::cache::get(&pool, "saudade", "r1").await.unwrap().unwrap();
    assert_eq!(refined.tag_code, "SE.TRI");
    assert_eq!(refined.confidence, 0.85);

    let rejected = clx_sa::db::cache::get(&pool, "menino", "r2").await.unwrap().unwrap();
    assert_eq!(rejected.tag_code, "SE");

    let curated = clx_sa::db::cache::get(&pool, "pinned", "r3").await.unwrap().unwrap();
    assert_eq!(curated.tag_code, "SE");
    assert_eq!(curated.source, ClassificationSource::Curation);
}
