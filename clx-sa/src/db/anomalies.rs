//! Anomaly detection persistence
//!
//! The monitor only inserts and auto-resolves; humans acknowledge/resolve
//! through the anomaly feed. Rows are never deleted.

use chrono::{DateTime, Duration, Utc};
use clx_common::events::AnomalySeverity;
use clx_common::{Error, Result};
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::models::{AnomalyDetection, AnomalyType};

fn row_to_anomaly(row: &sqlx::sqlite::SqliteRow) -> Result<AnomalyDetection> {
    let id_str: String = row.get("id");
    let id = Uuid::parse_str(&id_str)
        .map_err(|e| Error::Internal(format!("Failed to parse anomaly id: {}", e)))?;

    let anomaly_type: String = row.get("anomaly_type");
    let anomaly_type: AnomalyType = serde_json::from_str(&format!("\"{}\"", anomaly_type))
        .map_err(|e| Error::Internal(format!("Failed to parse anomaly type: {}", e)))?;

    let severity: String = row.get("severity");
    let severity: AnomalySeverity = serde_json::from_str(&format!("\"{}\"", severity))
        .map_err(|e| Error::Internal(format!("Failed to parse severity: {}", e)))?;

    let context: String = row.get("context");
    let context: BTreeMap<String, String> = serde_json::from_str(&context)
        .map_err(|e| Error::Internal(format!("Failed to parse anomaly context: {}", e)))?;

    let parse_ts = |s: String| {
        chrono::DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&chrono::Utc))
            .map_err(|e| Error::Internal(format!("Failed to parse timestamp: {}", e)))
    };

    let detected_at = parse_ts(row.get("detected_at"))?;
    let resolved_at = row
        .get::<Option<String>, _>("resolved_at")
        .map(parse_ts)
        .transpose()?;
    let acknowledged_at = row
        .get::<Option<String>, _>("acknowledged_at")
        .map(parse_ts)
        .transpose()?;

    Ok(AnomalyDetection {
        id,
        check_name: row.get("check_name"),
        anomaly_type,
        severity,
        expected_value: row.get("expected_value"),
        actual_value: row.get("actual_value"),
        deviation_score: row.get("deviation_score"),
        context,
        detected_at,
        resolved_at,
        acknowledged_at,
        acknowledged_by: row.get("acknowledged_by"),
        resolution_notes: row.get("resolution_notes"),
        auto_resolved: row.get::<i64, _>("auto_resolved") != 0,
    })
}

/// Insert a new anomaly row
pub async fn insert_anomaly(pool: &SqlitePool, anomaly: &AnomalyDetection) -> Result<()> {
    let context = serde_json::to_string(&anomaly.context)
        .map_err(|e| Error::Internal(format!("Failed to serialize context: {}", e)))?;

    sqlx::query(
        r#"
        INSERT INTO anomaly_detections (
            id, check_name, anomaly_type, severity,
            expected_value, actual_value, deviation_score, context,
            detected_at, resolved_at, acknowledged_at, acknowledged_by,
            resolution_notes, auto_resolved
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, NULL, NULL, NULL, NULL, 0)
        "#,
    )
    .bind(anomaly.id.to_string())
    .bind(&anomaly.check_name)
    .bind(anomaly.anomaly_type.as_str())
    .bind(anomaly.severity.as_str())
    .bind(anomaly.expected_value)
    .bind(anomaly.actual_value)
    .bind(anomaly.deviation_score)
    .bind(&context)
    .bind(anomaly.detected_at.to_rfc3339())
    .execute(pool)
    .await?;

    Ok(())
}

/// Load one anomaly by id
pub async fn load_anomaly(pool: &SqlitePool, id: Uuid) -> Result<Option<AnomalyDetection>> {
    let row = sqlx::query("SELECT * FROM anomaly_detections WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(row_to_anomaly).transpose()
}

/// True when an unresolved alert for check_name exists inside the dedup window
///
/// Prevents alert storms: the same persisting condition raises at most one
/// unresolved alert per window per check.
pub async fn has_recent_unresolved(
    pool: &SqlitePool,
    check_name: &str,
    window: Duration,
    now: DateTime<Utc>,
) -> Result<bool> {
    let cutoff = (now - window).to_rfc3339();
    let count: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*)
        FROM anomaly_detections
        WHERE check_name = ?
          AND resolved_at IS NULL
          AND detected_at >= ?
        "#,
    )
    .bind(check_name)
    .bind(cutoff)
    .fetch_one(pool)
    .await?;

    Ok(count > 0)
}

/// Force-resolve unresolved alerts older than max_age; returns their ids
///
/// Bounds alert staleness: a persisting issue reappears as a fresh alert on
/// the next sweep instead of one alert living forever.
pub async fn auto_resolve_stale(
    pool: &SqlitePool,
    max_age: Duration,
    now: DateTime<Utc>,
) -> Result<Vec<(Uuid, String)>> {
    let cutoff = (now - max_age).to_rfc3339();

    let rows = sqlx::query(
        r#"
        SELECT id, check_name FROM anomaly_detections
        WHERE resolved_at IS NULL AND detected_at < ?
        "#,
    )
    .bind(&cutoff)
    .fetch_all(pool)
    .await?;

    let stale: Vec<(Uuid, String)> = rows
        .iter()
        .map(|row| {
            let id_str: String = row.get("id");
            let id = Uuid::parse_str(&id_str)
                .map_err(|e| Error::Internal(format!("Failed to parse anomaly id: {}", e)))?;
            Ok((id, row.get("check_name")))
        })
        .collect::<Result<_>>()?;

    if !stale.is_empty() {
        sqlx::query(
            r#"
            UPDATE anomaly_detections
            SET resolved_at = ?, auto_resolved = 1,
                resolution_notes = 'Auto-resolved: alert exceeded maximum age'
            WHERE resolved_at IS NULL AND detected_at < ?
            "#,
        )
        .bind(now.to_rfc3339())
        .bind(&cutoff)
        .execute(pool)
        .await?;
    }

    Ok(stale)
}

/// All unresolved alerts, newest first
pub async fn list_unresolved(pool: &SqlitePool) -> Result<Vec<AnomalyDetection>> {
    let rows = sqlx::query(
        r#"
        SELECT * FROM anomaly_detections
        WHERE resolved_at IS NULL
        ORDER BY detected_at DESC
        "#,
    )
    .fetch_all(pool)
    .await?;

    rows.iter().map(row_to_anomaly).collect()
}

/// All alerts, newest first (bounded)
pub async fn list_all(pool: &SqlitePool, limit: i64) -> Result<Vec<AnomalyDetection>> {
    let rows = sqlx::query(
        r#"
        SELECT * FROM anomaly_detections
        ORDER BY detected_at DESC
        LIMIT ?
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.iter().map(row_to_anomaly).collect()
}

/// Record a human acknowledgment (intent to act)
pub async fn acknowledge(pool: &SqlitePool, id: Uuid, acknowledged_by: &str) -> Result<()> {
    let result = sqlx::query(
        r#"
        UPDATE anomaly_detections
        SET acknowledged_at = ?, acknowledged_by = ?
        WHERE id = ? AND resolved_at IS NULL
        "#,
    )
    .bind(Utc::now().to_rfc3339())
    .bind(acknowledged_by)
    .bind(id.to_string())
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(Error::NotFound(format!("No unresolved anomaly {}", id)));
    }
    Ok(())
}

/// Resolve an alert with human notes
pub async fn resolve(pool: &SqlitePool, id: Uuid, notes: Option<&str>) -> Result<()> {
    let result = sqlx::query(
        r#"
        UPDATE anomaly_detections
        SET resolved_at = ?, resolution_notes = ?, auto_resolved = 0
        WHERE id = ? AND resolved_at IS NULL
        "#,
    )
    .bind(Utc::now().to_rfc3339())
    .bind(notes)
    .bind(id.to_string())
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(Error::NotFound(format!("No unresolved anomaly {}", id)));
    }
    Ok(())
}
