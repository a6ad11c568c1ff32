//! Typed access to the settings table
//!
//! Runtime-tunable parameters live in the shared `settings` key/value
//! table so curators can adjust them without a redeploy. Every getter
//! falls back to a compiled default when the key is absent or malformed.

use sqlx::SqlitePool;
use clx_common::Result;

/// Default chunk size (word occurrences per chunk-loop tick)
pub const DEFAULT_CHUNK_SIZE: usize = 50;
/// Default cache entry time-to-live in days
pub const DEFAULT_CACHE_TTL_DAYS: i64 = 30;
/// Default daily LLM token quota
pub const DEFAULT_LLM_DAILY_TOKEN_LIMIT: i64 = 1_000_000;

async fn get_raw(pool: &SqlitePool, key: &str) -> Result<Option<String>> {
    let value: Option<String> = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await?;
    Ok(value)
}

/// Write (upsert) a setting
pub async fn set(pool: &SqlitePool, key: &str, value: &str) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO settings (key, value) VALUES (?, ?)
        ON CONFLICT(key) DO UPDATE SET value = excluded.value
        "#,
    )
    .bind(key)
    .bind(value)
    .execute(pool)
    .await?;
    Ok(())
}

/// Words per chunk-loop tick
pub async fn chunk_size(pool: &SqlitePool) -> Result<usize> {
    Ok(get_raw(pool, "sa_chunk_size")
        .await?
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_CHUNK_SIZE))
}

/// Cache entry time-to-live in days
pub async fn cache_ttl_days(pool: &SqlitePool) -> Result<i64> {
    Ok(get_raw(pool, "sa_cache_ttl_days")
        .await?
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_CACHE_TTL_DAYS))
}

/// Daily LLM token quota (denominator of the quota_warning check)
pub async fn llm_daily_token_limit(pool: &SqlitePool) -> Result<i64> {
    Ok(get_raw(pool, "sa_llm_daily_token_limit")
        .await?
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_LLM_DAILY_TOKEN_LIMIT))
}

/// Remote LLM endpoint configuration; None disables the LLM stage
pub async fn llm_api_key(pool: &SqlitePool) -> Result<Option<String>> {
    Ok(get_raw(pool, "sa_llm_api_key").await?.filter(|k| !k.is_empty()))
}

pub async fn llm_base_url(pool: &SqlitePool) -> Result<String> {
    Ok(get_raw(pool, "sa_llm_base_url")
        .await?
        .unwrap_or_else(|| "https://api.openai.com/v1".to_string()))
}

pub async fn llm_model(pool: &SqlitePool) -> Result<String> {
    Ok(get_raw(pool, "sa_llm_model")
        .await?
        .unwrap_or_else(|| "gpt-4o-mini".to_string()))
}
