//! Store statistics and health overview.
//!
//! Provides a quick summary of what has been ingested: per-faction entity
//! counts, unit index progress, catalog sizes, and the state of the page
//! cache. Used by `codex stats` to confirm runs are doing what they should.

use anyhow::Result;
use sqlx::Row;

use crate::cache::CacheStore;
use crate::config::Config;
use crate::db;

/// Per-faction breakdown of entity counts.
struct FactionStats {
    slug: String,
    detachments: i64,
    stratagems: i64,
    enhancements: i64,
    units: i64,
    indexed: i64,
    failed: i64,
    last_update_ts: i64,
}

/// Run the stats command: query the store and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;

    let mut totals = Vec::new();
    for table in ["core_rules", "factions", "weapons", "abilities", "keywords"] {
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
            .fetch_one(&pool)
            .await?;
        totals.push((table, count));
    }

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Codex Sync Store Stats");
    println!("======================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    for (table, count) in &totals {
        println!("  {:<12} {}", format!("{}:", table.replace('_', " ")), count);
    }

    let rows = sqlx::query(
        r#"
        SELECT
            f.slug,
            f.updated_at,
            (SELECT COUNT(*) FROM detachments d WHERE d.faction_id = f.id) AS detachments,
            (SELECT COUNT(*) FROM stratagems s WHERE s.faction_id = f.id) AS stratagems,
            (SELECT COUNT(*) FROM enhancements e
                JOIN detachments d ON d.id = e.detachment_id
                WHERE d.faction_id = f.id) AS enhancements,
            (SELECT COUNT(*) FROM units u WHERE u.faction_id = f.id) AS units,
            (SELECT COUNT(*) FROM unit_index i WHERE i.faction_id = f.id) AS indexed,
            (SELECT COUNT(*) FROM unit_index i
                WHERE i.faction_id = f.id AND i.scrape_status = 'failed') AS failed
        FROM factions f
        ORDER BY f.slug
        "#,
    )
    .fetch_all(&pool)
    .await?;

    let factions: Vec<FactionStats> = rows
        .iter()
        .map(|row| FactionStats {
            slug: row.get("slug"),
            detachments: row.get("detachments"),
            stratagems: row.get("stratagems"),
            enhancements: row.get("enhancements"),
            units: row.get("units"),
            indexed: row.get("indexed"),
            failed: row.get("failed"),
            last_update_ts: row.get("updated_at"),
        })
        .collect();

    if !factions.is_empty() {
        println!();
        println!("  By faction:");
        println!(
            "  {:<24} {:>5} {:>6} {:>5} {:>11} {:>7}   {}",
            "FACTION", "DET", "STRAT", "ENH", "UNITS", "FAILED", "UPDATED"
        );
        println!("  {}", "-".repeat(80));

        for f in &factions {
            println!(
                "  {:<24} {:>5} {:>6} {:>5} {:>11} {:>7}   {}",
                f.slug,
                f.detachments,
                f.stratagems,
                f.enhancements,
                format!("{}/{}", f.units, f.indexed),
                f.failed,
                format_ts_relative(f.last_update_ts)
            );
        }
    }

    let cache = CacheStore::new(&config.cache.dir).stats()?;
    println!();
    println!("  Cache:       {}", config.cache.dir.display());
    println!(
        "  Entries:     {} ({} complete, {})",
        cache.entries,
        cache.complete,
        format_bytes(cache.bytes)
    );
    println!();

    pool.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 3] = ["KB", "MB", "GB"];
    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit + 1 < UNITS.len() {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}

/// Format a Unix timestamp relative to now, e.g. "3 hours ago". Future
/// timestamps and anything older than a month fall back to a date.
fn format_ts_relative(ts: i64) -> String {
    const STEPS: [(i64, &str); 3] = [(86400, "day"), (3600, "hour"), (60, "min")];
    let delta = chrono::Utc::now().timestamp() - ts;
    if !(0..86400 * 30).contains(&delta) {
        return format_ts_iso(ts);
    }
    for (secs, label) in STEPS {
        let n = delta / secs;
        if n > 0 {
            return format!("{} {}{} ago", n, label, if n == 1 { "" } else { "s" });
        }
    }
    "just now".to_string()
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
