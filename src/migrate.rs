use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create every table and index. Safe to run repeatedly.
pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    // Core rules
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS core_rules (
            id TEXT PRIMARY KEY,
            slug TEXT NOT NULL UNIQUE,
            title TEXT NOT NULL,
            category TEXT NOT NULL,
            subcategory TEXT,
            content TEXT NOT NULL,
            order_index INTEGER NOT NULL,
            source_url TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS factions (
            id TEXT PRIMARY KEY,
            slug TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            army_rules_text TEXT,
            lore_text TEXT,
            source_url TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS detachments (
            id TEXT PRIMARY KEY,
            faction_id TEXT NOT NULL,
            slug TEXT NOT NULL,
            name TEXT NOT NULL,
            rule_name TEXT,
            rule_text TEXT,
            lore_text TEXT,
            content_hash TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            UNIQUE(slug, faction_id),
            FOREIGN KEY (faction_id) REFERENCES factions(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Stratagems belong to a faction; the detachment link is an association.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS stratagems (
            id TEXT PRIMARY KEY,
            faction_id TEXT NOT NULL,
            detachment_id TEXT,
            slug TEXT NOT NULL,
            name TEXT NOT NULL,
            cp_cost INTEGER,
            phase TEXT,
            when_text TEXT,
            target TEXT,
            effect TEXT,
            restrictions TEXT,
            content_hash TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            UNIQUE(slug, faction_id),
            FOREIGN KEY (faction_id) REFERENCES factions(id) ON DELETE CASCADE,
            FOREIGN KEY (detachment_id) REFERENCES detachments(id) ON DELETE SET NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS enhancements (
            id TEXT PRIMARY KEY,
            detachment_id TEXT NOT NULL,
            slug TEXT NOT NULL,
            name TEXT NOT NULL,
            points_cost INTEGER,
            description TEXT,
            restrictions TEXT,
            content_hash TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            UNIQUE(slug, detachment_id),
            FOREIGN KEY (detachment_id) REFERENCES detachments(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS units (
            id TEXT PRIMARY KEY,
            faction_id TEXT NOT NULL,
            slug TEXT NOT NULL,
            name TEXT NOT NULL,
            movement TEXT,
            toughness TEXT,
            save TEXT,
            invulnerable_save TEXT,
            wounds TEXT,
            leadership TEXT,
            objective_control TEXT,
            unknown_stats_json TEXT NOT NULL DEFAULT '[]',
            points_cost INTEGER,
            composition_text TEXT,
            is_epic_hero INTEGER NOT NULL DEFAULT 0,
            is_battleline INTEGER NOT NULL DEFAULT 0,
            is_dedicated_transport INTEGER NOT NULL DEFAULT 0,
            source_url TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            UNIQUE(slug, faction_id),
            FOREIGN KEY (faction_id) REFERENCES factions(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Catalog entities shared across units
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS weapons (
            id TEXT PRIMARY KEY,
            slug TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            kind TEXT NOT NULL,
            range TEXT,
            attacks TEXT,
            skill TEXT,
            strength TEXT,
            armour_penetration TEXT,
            damage TEXT,
            abilities TEXT,
            content_hash TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS abilities (
            id TEXT PRIMARY KEY,
            slug TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            kind TEXT NOT NULL,
            description TEXT,
            content_hash TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS keywords (
            id TEXT PRIMARY KEY,
            slug TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            is_faction_keyword INTEGER NOT NULL DEFAULT 0,
            content_hash TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    for (table, column, target) in [
        ("unit_weapons", "weapon_id", "weapons"),
        ("unit_abilities", "ability_id", "abilities"),
        ("unit_keywords", "keyword_id", "keywords"),
    ] {
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                unit_id TEXT NOT NULL,
                {column} TEXT NOT NULL,
                position INTEGER NOT NULL,
                PRIMARY KEY (unit_id, {column}),
                FOREIGN KEY (unit_id) REFERENCES units(id) ON DELETE CASCADE,
                FOREIGN KEY ({column}) REFERENCES {target}(id) ON DELETE CASCADE
            )
            "#
        ))
        .execute(pool)
        .await?;
    }

    // Datasheet index driving incremental unit scraping
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS unit_index (
            faction_id TEXT NOT NULL,
            slug TEXT NOT NULL,
            name TEXT NOT NULL,
            source_url TEXT NOT NULL,
            scrape_status TEXT NOT NULL DEFAULT 'pending',
            last_attempt_at INTEGER,
            last_error TEXT,
            PRIMARY KEY (faction_id, slug),
            FOREIGN KEY (faction_id) REFERENCES factions(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_detachments_faction ON detachments(faction_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_stratagems_faction ON stratagems(faction_id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_stratagems_detachment ON stratagems(detachment_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_units_faction ON units(faction_id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_unit_index_status ON unit_index(faction_id, scrape_status)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
