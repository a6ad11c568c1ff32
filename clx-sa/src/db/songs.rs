//! Corpus song queries
//!
//! The song table is seeded by the (out-of-scope) import tooling; this
//! service only reads it, always ordered by position so that job cursors
//! are replayable.

use clx_common::{Error, Result};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::models::Song;

/// All songs of a target, in deterministic processing order
pub async fn songs_for_target(pool: &SqlitePool, target_id: &str) -> Result<Vec<Song>> {
    let rows = sqlx::query(
        r#"
        SELECT song_id, target_id, title, lyrics, position
        FROM songs
        WHERE target_id = ?
        ORDER BY position ASC
        "#,
    )
    .bind(target_id)
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|row| {
            let song_id_str: String = row.get("song_id");
            let song_id = Uuid::parse_str(&song_id_str)
                .map_err(|e| Error::Internal(format!("Failed to parse song_id: {}", e)))?;
            Ok(Song {
                song_id,
                target_id: row.get("target_id"),
                title: row.get("title"),
                lyrics: row.get("lyrics"),
                position: row.get("position"),
            })
        })
        .collect()
}

/// Insert a song row (used by tests and seed tooling)
pub async fn insert_song(pool: &SqlitePool, song: &Song) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO songs (song_id, target_id, title, lyrics, position)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(song.song_id.to_string())
    .bind(&song.target_id)
    .bind(&song.title)
    .bind(&song.lyrics)
    .bind(song.position)
    .execute(pool)
    .await?;
    Ok(())
}
