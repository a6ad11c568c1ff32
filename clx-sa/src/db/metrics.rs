//! Pipeline telemetry persistence and series queries
//!
//! The orchestrator and cascade append rows as they work; the Anomaly
//! Monitor aggregates them into hourly series. Reads never touch job rows,
//! so the monitor needs no coordination with running jobs.

use chrono::{DateTime, Duration, Timelike, Utc};
use clx_common::Result;
use sqlx::{Row, SqlitePool};

/// Hourly aggregation split into history vs. the in-progress current hour
///
/// Checks compare `current` against statistics computed over `history`
/// (which always excludes the current hour).
#[derive(Debug, Clone, Default)]
pub struct HourlySeries {
    pub history: Vec<f64>,
    pub current: f64,
}

/// Append one telemetry sample
pub async fn record(
    pool: &SqlitePool,
    words_processed: usize,
    words_failed: usize,
    llm_latency_ms: Option<u64>,
    llm_tokens: Option<u64>,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO pipeline_metrics (recorded_at, words_processed, words_failed, llm_latency_ms, llm_tokens)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(Utc::now().to_rfc3339())
    .bind(words_processed as i64)
    .bind(words_failed as i64)
    .bind(llm_latency_ms.map(|v| v as i64))
    .bind(llm_tokens.map(|v| v as i64))
    .execute(pool)
    .await?;
    Ok(())
}

/// Truncate a timestamp to the start of its hour
fn hour_bucket(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(ts)
}

/// Raw per-hour sums of (processed, failed, latency-sum, latency-count)
async fn hourly_rows(
    pool: &SqlitePool,
    since: DateTime<Utc>,
) -> Result<Vec<(DateTime<Utc>, i64, i64, Option<f64>)>> {
    let rows = sqlx::query(
        r#"
        SELECT strftime('%Y-%m-%dT%H:00:00+00:00', recorded_at) AS bucket,
               SUM(words_processed) AS processed,
               SUM(words_failed) AS failed,
               AVG(llm_latency_ms) AS avg_latency
        FROM pipeline_metrics
        WHERE recorded_at >= ?
        GROUP BY bucket
        ORDER BY bucket ASC
        "#,
    )
    .bind(since.to_rfc3339())
    .fetch_all(pool)
    .await?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let bucket: String = row.get("bucket");
        let bucket = chrono::DateTime::parse_from_rfc3339(&bucket)
            .map_err(|e| clx_common::Error::Internal(format!("Failed to parse bucket: {}", e)))?
            .with_timezone(&chrono::Utc);
        out.push((
            bucket,
            row.get::<i64, _>("processed"),
            row.get::<i64, _>("failed"),
            row.get::<Option<f64>, _>("avg_latency"),
        ));
    }
    Ok(out)
}

/// Hourly words-processed counts over the lookback window
///
/// Hours with no samples count as zero so a silent pipeline reads as a
/// throughput drop, not as missing data.
pub async fn hourly_throughput(
    pool: &SqlitePool,
    lookback_hours: i64,
    now: DateTime<Utc>,
) -> Result<HourlySeries> {
    let since = now - Duration::hours(lookback_hours);
    let rows = hourly_rows(pool, since).await?;
    let current_bucket = hour_bucket(now);

    let mut by_bucket = std::collections::BTreeMap::new();
    for (bucket, processed, _, _) in rows {
        by_bucket.insert(bucket, processed as f64);
    }

    let mut history = Vec::new();
    let mut bucket = hour_bucket(since);
    while bucket < current_bucket {
        if bucket >= since {
            history.push(by_bucket.get(&bucket).copied().unwrap_or(0.0));
        }
        bucket += Duration::hours(1);
    }

    Ok(HourlySeries {
        history,
        current: by_bucket.get(&current_bucket).copied().unwrap_or(0.0),
    })
}

/// Per-hour failed/processed ratios over the lookback window
///
/// Hours with zero processed words have no defined ratio and are omitted
/// from history; the current hour reads as 0.0 in that case.
pub async fn hourly_error_ratio(
    pool: &SqlitePool,
    lookback_hours: i64,
    now: DateTime<Utc>,
) -> Result<HourlySeries> {
    let since = now - Duration::hours(lookback_hours);
    let rows = hourly_rows(pool, since).await?;
    let current_bucket = hour_bucket(now);

    let mut history = Vec::new();
    let mut current = 0.0;
    for (bucket, processed, failed, _) in rows {
        if processed == 0 {
            continue;
        }
        let ratio = failed as f64 / processed as f64;
        if bucket == current_bucket {
            current = ratio;
        } else {
            history.push(ratio);
        }
    }

    Ok(HourlySeries { history, current })
}

/// Hourly average LLM latency over the lookback window
///
/// Hours without LLM calls are omitted (no fabricated zeros; a quiet hour
/// says nothing about latency).
pub async fn hourly_avg_latency(
    pool: &SqlitePool,
    lookback_hours: i64,
    now: DateTime<Utc>,
) -> Result<HourlySeries> {
    let since = now - Duration::hours(lookback_hours);
    let rows = hourly_rows(pool, since).await?;
    let current_bucket = hour_bucket(now);

    let mut history = Vec::new();
    let mut current = 0.0;
    for (bucket, _, _, avg_latency) in rows {
        let Some(latency) = avg_latency else { continue };
        if bucket == current_bucket {
            current = latency;
        } else {
            history.push(latency);
        }
    }

    Ok(HourlySeries { history, current })
}

/// Cumulative LLM token usage over the trailing window
pub async fn tokens_in_window(
    pool: &SqlitePool,
    lookback_hours: i64,
    now: DateTime<Utc>,
) -> Result<i64> {
    let since = (now - Duration::hours(lookback_hours)).to_rfc3339();
    let total: Option<i64> = sqlx::query_scalar(
        r#"
        SELECT SUM(llm_tokens) FROM pipeline_metrics WHERE recorded_at >= ?
        "#,
    )
    .bind(since)
    .fetch_one(pool)
    .await?;
    Ok(total.unwrap_or(0))
}
