//! Tagset database operations
//!
//! The taxonomy is the single source of truth for which tag codes may
//! legally be written. Curators propose (pending), then approve (active)
//! or reject; approval is irreversible through this service.

use chrono::Utc;
use clx_common::{Error, Result};
use sqlx::{Row, SqlitePool};

use crate::models::{Tagset, TagsetStatus};

fn row_to_tagset(row: &sqlx::sqlite::SqliteRow) -> Result<Tagset> {
    let status: String = row.get("status");
    let status: TagsetStatus = serde_json::from_str(&format!("\"{}\"", status))
        .map_err(|e| Error::Internal(format!("Failed to parse tagset status: {}", e)))?;

    let examples: String = row.get("examples");
    let examples: Vec<String> = serde_json::from_str(&examples)
        .map_err(|e| Error::Internal(format!("Failed to parse tagset examples: {}", e)))?;

    let created_at: String = row.get("created_at");
    let created_at = chrono::DateTime::parse_from_rfc3339(&created_at)
        .map_err(|e| Error::Internal(format!("Failed to parse created_at: {}", e)))?
        .with_timezone(&chrono::Utc);

    let depth_level: i64 = row.get("depth_level");

    Ok(Tagset {
        code: row.get("code"),
        name: row.get("name"),
        description: row.get("description"),
        parent_code: row.get("parent_code"),
        depth_level: depth_level as u8,
        status,
        examples,
        created_at,
    })
}

/// All tagsets with status=active
///
/// Callers treat the result as a point-in-time snapshot and re-fetch per
/// pipeline invocation; curators can add/retire tags concurrently.
pub async fn load_active_tagsets(pool: &SqlitePool) -> Result<Vec<Tagset>> {
    let rows = sqlx::query(
        r#"
        SELECT code, name, description, parent_code, depth_level, status, examples, created_at
        FROM tagsets
        WHERE status = 'active'
        ORDER BY code ASC
        "#,
    )
    .fetch_all(pool)
    .await?;

    rows.iter().map(row_to_tagset).collect()
}

/// Load one tagset by exact code (any status)
pub async fn load_tagset(pool: &SqlitePool, code: &str) -> Result<Option<Tagset>> {
    let row = sqlx::query(
        r#"
        SELECT code, name, description, parent_code, depth_level, status, examples, created_at
        FROM tagsets
        WHERE code = ?
        "#,
    )
    .bind(code)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(row_to_tagset).transpose()
}

/// Propose a new tagset (created pending)
pub async fn propose_tagset(pool: &SqlitePool, tagset: &Tagset) -> Result<()> {
    if tagset.code.len() < 2 {
        return Err(Error::InvalidInput(format!(
            "Tagset code too short: {}",
            tagset.code
        )));
    }
    if !(1..=4).contains(&tagset.depth_level) {
        return Err(Error::InvalidInput(format!(
            "Tagset depth_level out of range 1-4: {}",
            tagset.depth_level
        )));
    }

    let examples = serde_json::to_string(&tagset.examples)
        .map_err(|e| Error::Internal(format!("Failed to serialize examples: {}", e)))?;

    sqlx::query(
        r#"
        INSERT INTO tagsets (code, name, description, parent_code, depth_level, status, examples, created_at)
        VALUES (?, ?, ?, ?, ?, 'pending', ?, ?)
        "#,
    )
    .bind(&tagset.code)
    .bind(&tagset.name)
    .bind(&tagset.description)
    .bind(&tagset.parent_code)
    .bind(tagset.depth_level as i64)
    .bind(&examples)
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await?;

    Ok(())
}

/// Approve a pending tagset (pending → active, irreversible)
pub async fn approve_tagset(pool: &SqlitePool, code: &str) -> Result<()> {
    let result = sqlx::query(
        r#"
        UPDATE tagsets SET status = 'active'
        WHERE code = ? AND status = 'pending'
        "#,
    )
    .bind(code)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(Error::NotFound(format!(
            "No pending tagset with code {}",
            code
        )));
    }
    tracing::info!(code = %code, "Tagset approved");
    Ok(())
}

/// Reject a pending tagset (pending → rejected)
pub async fn reject_tagset(pool: &SqlitePool, code: &str) -> Result<()> {
    let result = sqlx::query(
        r#"
        UPDATE tagsets SET status = 'rejected'
        WHERE code = ? AND status = 'pending'
        "#,
    )
    .bind(code)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(Error::NotFound(format!(
            "No pending tagset with code {}",
            code
        )));
    }
    tracing::info!(code = %code, "Tagset rejected");
    Ok(())
}
