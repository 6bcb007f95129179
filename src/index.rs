//! Per-faction datasheet index.
//!
//! Faction reconciliation registers every datasheet link it finds here as
//! `pending`. Unit runs pull entries back out, fetch them, and stamp each
//! attempt with its outcome, so an interrupted run resumes where it left off.

use anyhow::Result;
use sqlx::{SqliteConnection, SqlitePool};

use crate::models::{ScrapeStatus, UnitIndexEntry, UnitLink};

/// Register a datasheet link. Name and URL are refreshed; an existing
/// entry keeps its status. Returns `true` when the entry is new.
pub async fn register(
    conn: &mut SqliteConnection,
    faction_id: &str,
    link: &UnitLink,
) -> Result<bool, sqlx::Error> {
    let exists: Option<i64> =
        sqlx::query_scalar("SELECT 1 FROM unit_index WHERE faction_id = ? AND slug = ?")
            .bind(faction_id)
            .bind(&link.slug)
            .fetch_optional(&mut *conn)
            .await?;

    sqlx::query(
        r#"
        INSERT INTO unit_index (faction_id, slug, name, source_url, scrape_status)
        VALUES (?, ?, ?, ?, 'pending')
        ON CONFLICT(faction_id, slug) DO UPDATE SET
            name = excluded.name,
            source_url = excluded.source_url
        "#,
    )
    .bind(faction_id)
    .bind(&link.slug)
    .bind(&link.name)
    .bind(&link.source_url)
    .execute(&mut *conn)
    .await?;

    Ok(exists.is_none())
}

type IndexRow = (String, String, String, String, String, Option<i64>, Option<String>);

fn entry_from_row(row: IndexRow) -> UnitIndexEntry {
    let (faction_id, slug, name, source_url, status, last_attempt_at, last_error) = row;
    UnitIndexEntry {
        faction_id,
        slug,
        name,
        source_url,
        scrape_status: ScrapeStatus::parse(&status).unwrap_or(ScrapeStatus::Pending),
        last_attempt_at,
        last_error,
    }
}

/// Entries of a faction still to be scraped, in slug order. Failed entries
/// are included only when `include_failed` is set.
pub async fn pending(
    pool: &SqlitePool,
    faction_slug: &str,
    include_failed: bool,
    limit: Option<usize>,
) -> Result<Vec<UnitIndexEntry>> {
    let limit = limit.map(|l| l as i64).unwrap_or(-1);
    let rows: Vec<IndexRow> = sqlx::query_as(
        r#"
        SELECT i.faction_id, i.slug, i.name, i.source_url, i.scrape_status,
               i.last_attempt_at, i.last_error
        FROM unit_index i
        JOIN factions f ON f.id = i.faction_id
        WHERE f.slug = ?
          AND (i.scrape_status = 'pending' OR (? AND i.scrape_status = 'failed'))
        ORDER BY i.slug
        LIMIT ?
        "#,
    )
    .bind(faction_slug)
    .bind(include_failed)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(entry_from_row).collect())
}

/// All entries of a faction regardless of status.
pub async fn entries(pool: &SqlitePool, faction_slug: &str) -> Result<Vec<UnitIndexEntry>> {
    let rows: Vec<IndexRow> = sqlx::query_as(
        r#"
        SELECT i.faction_id, i.slug, i.name, i.source_url, i.scrape_status,
               i.last_attempt_at, i.last_error
        FROM unit_index i
        JOIN factions f ON f.id = i.faction_id
        WHERE f.slug = ?
        ORDER BY i.slug
        "#,
    )
    .bind(faction_slug)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(entry_from_row).collect())
}

async fn mark(
    pool: &SqlitePool,
    entry: &UnitIndexEntry,
    status: ScrapeStatus,
    error: Option<&str>,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE unit_index
        SET scrape_status = ?, last_attempt_at = ?, last_error = ?
        WHERE faction_id = ? AND slug = ?
        "#,
    )
    .bind(status.as_str())
    .bind(chrono::Utc::now().timestamp())
    .bind(error)
    .bind(&entry.faction_id)
    .bind(&entry.slug)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn mark_success(pool: &SqlitePool, entry: &UnitIndexEntry) -> Result<()> {
    mark(pool, entry, ScrapeStatus::Success, None).await
}

pub async fn mark_failed(pool: &SqlitePool, entry: &UnitIndexEntry, error: &str) -> Result<()> {
    mark(pool, entry, ScrapeStatus::Failed, Some(error)).await
}
