//! Reconciliation writer: merges extracted records into the store.
//!
//! Every entity is keyed by its natural key (slug, or slug plus owning
//! parent) and written as its own unit of work:
//!
//! | Entity      | Natural key                 | Parent link               |
//! |-------------|-----------------------------|---------------------------|
//! | core rule   | `slug`                      | none                      |
//! | faction     | `slug`                      | none                      |
//! | detachment  | `(slug, faction_id)`        | owned by faction          |
//! | stratagem   | `(slug, faction_id)`        | detachment, nullable      |
//! | enhancement | `(slug, detachment_id)`     | owned by detachment       |
//! | unit        | `(slug, faction_id)`        | owned by faction          |
//! | weapon etc. | `slug`                      | linked to units           |
//!
//! Each row stores a SHA-256 of its mutable fields. A write whose digest
//! matches the stored one is skipped outright, so re-running on unchanged
//! input leaves every non-timestamp column (and the timestamps too) as they
//! were.
//!
//! Failures are per item: a failing record is collected into the
//! [`ReconcileSummary`] and the batch continues. Only a store connectivity
//! failure aborts the run.

use anyhow::Result;
use sha2::{Digest, Sha256};
use sqlx::{SqliteConnection, SqlitePool};
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::db::is_connectivity_error;
use crate::index;
use crate::models::{CoreRule, ExtractedRecord, FactionPage, Unit};
use crate::slug::slugify;

/// Errors shown in a rendered summary before the rest are elided.
pub const MAX_SHOWN_ERRORS: usize = 10;

// ═══════════════════════════════════════════════════════════════════════
// Run summary
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Inserted,
    Updated,
    /// Stored digest matched; nothing written.
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemError {
    pub kind: &'static str,
    pub slug: String,
    pub message: String,
}

impl fmt::Display for ItemError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} '{}': {}", self.kind, self.slug, self.message)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub processed: u64,
    pub inserted: u64,
    pub updated: u64,
    pub skipped: u64,
    pub failed: u64,
    /// Datasheet links newly added to the unit index.
    pub indexed: u64,
    pub errors: Vec<ItemError>,
}

impl ReconcileSummary {
    /// Fold one per-item write result into the summary.
    ///
    /// Returns the written row's id, `None` for a per-item failure, and
    /// `Err` only for store connectivity failures.
    fn record(
        &mut self,
        kind: &'static str,
        slug: &str,
        result: Result<Written, sqlx::Error>,
    ) -> Result<Option<String>> {
        match result {
            Ok(written) => {
                self.processed += 1;
                match written.outcome {
                    WriteOutcome::Inserted => self.inserted += 1,
                    WriteOutcome::Updated => self.updated += 1,
                    WriteOutcome::Unchanged => self.skipped += 1,
                }
                Ok(Some(written.id))
            }
            Err(e) if is_connectivity_error(&e) => Err(anyhow::Error::new(e)
                .context(format!("Store unavailable while writing {} '{}'", kind, slug))),
            Err(e) => {
                self.fail(kind, slug, e.to_string());
                Ok(None)
            }
        }
    }

    /// Count a record that could not be written at all.
    pub fn fail(&mut self, kind: &'static str, slug: &str, message: impl Into<String>) {
        let error = ItemError {
            kind,
            slug: slug.to_string(),
            message: message.into(),
        };
        warn!(kind, slug, message = %error.message, "Record not written");
        self.processed += 1;
        self.failed += 1;
        self.errors.push(error);
    }

    pub fn merge(&mut self, other: ReconcileSummary) {
        self.processed += other.processed;
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.skipped += other.skipped;
        self.failed += other.failed;
        self.indexed += other.indexed;
        self.errors.extend(other.errors);
    }

    /// Rows whose content changed this run.
    pub fn changed(&self) -> u64 {
        self.inserted + self.updated
    }
}

impl fmt::Display for ReconcileSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  processed: {}", self.processed)?;
        writeln!(f, "  inserted: {}", self.inserted)?;
        writeln!(f, "  updated: {}", self.updated)?;
        writeln!(f, "  skipped (unchanged): {}", self.skipped)?;
        writeln!(f, "  failed: {}", self.failed)?;
        if self.indexed > 0 {
            writeln!(f, "  new datasheets indexed: {}", self.indexed)?;
        }
        if !self.errors.is_empty() {
            writeln!(f, "  errors:")?;
            for error in self.errors.iter().take(MAX_SHOWN_ERRORS) {
                writeln!(f, "    {}", error)?;
            }
            if self.errors.len() > MAX_SHOWN_ERRORS {
                writeln!(
                    f,
                    "    … and {} more",
                    self.errors.len() - MAX_SHOWN_ERRORS
                )?;
            }
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Generic natural-key upsert
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy)]
enum Col<'a> {
    Text(Option<&'a str>),
    Int(Option<i64>),
}

fn text(value: &str) -> Col<'_> {
    Col::Text(Some(value))
}

fn opt(value: &Option<String>) -> Col<'_> {
    Col::Text(value.as_deref())
}

fn int(value: Option<i64>) -> Col<'static> {
    Col::Int(value)
}

fn flag(value: bool) -> Col<'static> {
    Col::Int(Some(value as i64))
}

struct Row<'a> {
    table: &'static str,
    keys: Vec<(&'static str, Col<'a>)>,
    fields: Vec<(&'static str, Col<'a>)>,
    /// Extra content folded into the digest but not stored as a column.
    digest_extra: String,
}

impl<'a> Row<'a> {
    fn new(
        table: &'static str,
        keys: Vec<(&'static str, Col<'a>)>,
        fields: Vec<(&'static str, Col<'a>)>,
    ) -> Self {
        Self {
            table,
            keys,
            fields,
            digest_extra: String::new(),
        }
    }

    fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        for (name, col) in &self.fields {
            hasher.update(name.as_bytes());
            hasher.update(b"=");
            match col {
                Col::Text(Some(v)) => hasher.update(format!("s{}", v).as_bytes()),
                Col::Int(Some(v)) => hasher.update(format!("i{}", v).as_bytes()),
                Col::Text(None) | Col::Int(None) => hasher.update(b"\0"),
            }
            hasher.update(b"\x1e");
        }
        hasher.update(self.digest_extra.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

type SqliteQuery<'q> = sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>;

fn bind<'q>(query: SqliteQuery<'q>, col: Col<'q>) -> SqliteQuery<'q> {
    match col {
        Col::Text(v) => query.bind(v),
        Col::Int(v) => query.bind(v),
    }
}

#[derive(Debug)]
struct Written {
    id: String,
    outcome: WriteOutcome,
}

async fn upsert(conn: &mut SqliteConnection, row: &Row<'_>) -> Result<Written, sqlx::Error> {
    let digest = row.digest();
    let now = chrono::Utc::now().timestamp();

    let key_clause = row
        .keys
        .iter()
        .map(|(name, _)| format!("{} = ?", name))
        .collect::<Vec<_>>()
        .join(" AND ");
    let select = format!(
        "SELECT id, content_hash FROM {} WHERE {}",
        row.table, key_clause
    );
    let mut query = sqlx::query_as::<_, (String, String)>(&select);
    for (_, col) in &row.keys {
        query = match *col {
            Col::Text(v) => query.bind(v),
            Col::Int(v) => query.bind(v),
        };
    }
    let existing = query.fetch_optional(&mut *conn).await?;

    if let Some((id, stored)) = existing {
        if stored == digest {
            return Ok(Written {
                id,
                outcome: WriteOutcome::Unchanged,
            });
        }
        let assignments = row
            .fields
            .iter()
            .map(|(name, _)| format!("{} = ?", name))
            .collect::<Vec<_>>()
            .join(", ");
        let update = format!(
            "UPDATE {} SET {}, content_hash = ?, updated_at = ? WHERE id = ?",
            row.table, assignments
        );
        let mut query = sqlx::query(&update);
        for (_, col) in &row.fields {
            query = bind(query, *col);
        }
        query
            .bind(&digest)
            .bind(now)
            .bind(&id)
            .execute(&mut *conn)
            .await?;
        return Ok(Written {
            id,
            outcome: WriteOutcome::Updated,
        });
    }

    let id = Uuid::new_v4().to_string();
    let columns: Vec<&str> = row
        .keys
        .iter()
        .chain(&row.fields)
        .map(|(name, _)| *name)
        .collect();
    let placeholders = vec!["?"; columns.len() + 4].join(", ");
    let conflict_keys = row
        .keys
        .iter()
        .map(|(name, _)| *name)
        .collect::<Vec<_>>()
        .join(", ");
    let insert = format!(
        "INSERT INTO {} (id, {}, content_hash, created_at, updated_at) VALUES ({}) \
         ON CONFLICT({}) DO NOTHING",
        row.table,
        columns.join(", "),
        placeholders,
        conflict_keys
    );
    let mut query = sqlx::query(&insert).bind(&id);
    for (_, col) in row.keys.iter().chain(&row.fields) {
        query = bind(query, *col);
    }
    query
        .bind(&digest)
        .bind(now)
        .bind(now)
        .execute(&mut *conn)
        .await?;

    Ok(Written {
        id,
        outcome: WriteOutcome::Inserted,
    })
}

async fn faction_id(conn: &mut SqliteConnection, slug: &str) -> Result<Option<String>, sqlx::Error> {
    sqlx::query_scalar("SELECT id FROM factions WHERE slug = ?")
        .bind(slug)
        .fetch_optional(&mut *conn)
        .await
}

/// Classify a failure from something other than a single-row write.
fn collect(
    summary: &mut ReconcileSummary,
    kind: &'static str,
    slug: &str,
    result: Result<(), sqlx::Error>,
) -> Result<()> {
    match result {
        Ok(()) => Ok(()),
        Err(e) if is_connectivity_error(&e) => Err(anyhow::Error::new(e)
            .context(format!("Store unavailable while writing {} '{}'", kind, slug))),
        Err(e) => {
            summary.fail(kind, slug, e.to_string());
            Ok(())
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Entity writers
// ═══════════════════════════════════════════════════════════════════════

pub async fn reconcile_rules(pool: &SqlitePool, rules: &[CoreRule]) -> Result<ReconcileSummary> {
    let mut summary = ReconcileSummary::default();
    let mut conn = pool.acquire().await?;

    for rule in rules {
        let row = Row::new(
            "core_rules",
            vec![("slug", text(&rule.slug))],
            vec![
                ("title", text(&rule.title)),
                ("category", text(&rule.category)),
                ("subcategory", opt(&rule.subcategory)),
                ("content", text(&rule.content)),
                ("order_index", int(Some(rule.order_index))),
                ("source_url", text(&rule.source_url)),
            ],
        );
        let result = upsert(&mut conn, &row).await;
        summary.record("rule", &rule.slug, result)?;
    }

    Ok(summary)
}

/// Write a faction page: the faction, its detachments, stratagems and
/// enhancements, and register its datasheet links in the unit index.
///
/// Stratagems and enhancements are attached to detachments written in this
/// same call, matched by slug. A stratagem naming an unknown detachment is
/// stored at faction level; an enhancement, whose detachment is mandatory,
/// is reported as failed.
pub async fn reconcile_faction(
    pool: &SqlitePool,
    faction_slug: &str,
    page: &FactionPage,
) -> Result<ReconcileSummary> {
    let mut summary = ReconcileSummary::default();
    let mut conn = pool.acquire().await?;

    let faction_id = match &page.faction {
        Some(faction) => {
            let row = Row::new(
                "factions",
                vec![("slug", text(faction_slug))],
                vec![
                    ("name", text(&faction.name)),
                    ("army_rules_text", opt(&faction.army_rules_text)),
                    ("lore_text", opt(&faction.lore_text)),
                    ("source_url", text(&faction.source_url)),
                ],
            );
            let result = upsert(&mut conn, &row).await;
            summary.record("faction", faction_slug, result)?
        }
        None => match faction_id(&mut conn, faction_slug).await {
            Ok(Some(id)) => Some(id),
            Ok(None) => {
                summary.fail(
                    "faction",
                    faction_slug,
                    "page has no faction heading and the faction is not stored yet",
                );
                None
            }
            Err(e) => {
                collect(&mut summary, "faction", faction_slug, Err(e))?;
                None
            }
        },
    };
    let Some(faction_id) = faction_id else {
        return Ok(summary);
    };

    // Detachments persisted this run, by slug.
    let mut persisted: HashMap<String, String> = HashMap::new();
    for detachment in &page.detachments {
        let row = Row::new(
            "detachments",
            vec![
                ("slug", text(&detachment.slug)),
                ("faction_id", text(&faction_id)),
            ],
            vec![
                ("name", text(&detachment.name)),
                ("rule_name", opt(&detachment.rule_name)),
                ("rule_text", opt(&detachment.rule_text)),
                ("lore_text", opt(&detachment.lore_text)),
            ],
        );
        let result = upsert(&mut conn, &row).await;
        if let Some(id) = summary.record("detachment", &detachment.slug, result)? {
            persisted.insert(detachment.slug.clone(), id);
        }
    }

    for (named, stratagems) in &page.stratagems_by_detachment {
        let detachment_id = match named {
            Some(name) => {
                let found = persisted.get(&slugify(name)).map(String::as_str);
                if found.is_none() {
                    debug!(
                        faction = faction_slug,
                        detachment = %name,
                        count = stratagems.len(),
                        "No matching detachment; storing stratagems at faction level"
                    );
                }
                found
            }
            None => None,
        };
        for stratagem in stratagems {
            let row = Row::new(
                "stratagems",
                vec![
                    ("slug", text(&stratagem.slug)),
                    ("faction_id", text(&faction_id)),
                ],
                vec![
                    ("detachment_id", Col::Text(detachment_id)),
                    ("name", text(&stratagem.name)),
                    ("cp_cost", int(stratagem.cp_cost)),
                    ("phase", opt(&stratagem.phase)),
                    ("when_text", opt(&stratagem.when)),
                    ("target", opt(&stratagem.target)),
                    ("effect", opt(&stratagem.effect)),
                    ("restrictions", opt(&stratagem.restrictions)),
                ],
            );
            let result = upsert(&mut conn, &row).await;
            summary.record("stratagem", &stratagem.slug, result)?;
        }
    }

    for (named, enhancements) in &page.enhancements_by_detachment {
        let Some(detachment_id) = persisted.get(&slugify(named)) else {
            for enhancement in enhancements {
                summary.fail(
                    "enhancement",
                    &enhancement.slug,
                    format!("no detachment '{}' in faction '{}'", named, faction_slug),
                );
            }
            continue;
        };
        for enhancement in enhancements {
            let row = Row::new(
                "enhancements",
                vec![
                    ("slug", text(&enhancement.slug)),
                    ("detachment_id", text(detachment_id)),
                ],
                vec![
                    ("name", text(&enhancement.name)),
                    ("points_cost", int(enhancement.points_cost)),
                    ("description", opt(&enhancement.description)),
                    ("restrictions", opt(&enhancement.restrictions)),
                ],
            );
            let result = upsert(&mut conn, &row).await;
            summary.record("enhancement", &enhancement.slug, result)?;
        }
    }

    for link in &page.unit_links {
        match index::register(&mut conn, &faction_id, link).await {
            Ok(true) => summary.indexed += 1,
            Ok(false) => {}
            Err(e) => collect(&mut summary, "datasheet link", &link.slug, Err(e))?,
        }
    }

    Ok(summary)
}

fn unit_row<'a>(faction_id: &'a str, unit: &'a Unit, unknown_json: &'a str) -> Row<'a> {
    let s = &unit.statline;
    let mut row = Row::new(
        "units",
        vec![("slug", text(&unit.slug)), ("faction_id", text(faction_id))],
        vec![
            ("name", text(&unit.name)),
            ("movement", opt(&s.movement)),
            ("toughness", opt(&s.toughness)),
            ("save", opt(&s.save)),
            ("invulnerable_save", opt(&s.invulnerable_save)),
            ("wounds", opt(&s.wounds)),
            ("leadership", opt(&s.leadership)),
            ("objective_control", opt(&s.objective_control)),
            ("unknown_stats_json", text(unknown_json)),
            ("points_cost", int(unit.points_cost)),
            ("composition_text", opt(&unit.composition_text)),
            ("is_epic_hero", flag(unit.flags.is_epic_hero)),
            ("is_battleline", flag(unit.flags.is_battleline)),
            (
                "is_dedicated_transport",
                flag(unit.flags.is_dedicated_transport),
            ),
            ("source_url", text(&unit.source_url)),
        ],
    );
    // Association content participates in the digest so a changed weapon
    // list triggers a rebuild even when the statline did not move.
    row.digest_extra = serde_json::to_string(&(&unit.weapons, &unit.abilities, &unit.keywords))
        .unwrap_or_default();
    row
}

/// Write one unit and, when it changed, rebuild its associations from
/// scratch. The unit row and its associations commit together.
async fn write_unit(
    pool: &SqlitePool,
    faction_id: &str,
    unit: &Unit,
) -> Result<Written, sqlx::Error> {
    let unknown_json =
        serde_json::to_string(&unit.statline.unknown).unwrap_or_else(|_| "[]".to_string());
    let mut tx = pool.begin().await?;

    let written = upsert(&mut tx, &unit_row(faction_id, unit, &unknown_json)).await?;
    if written.outcome == WriteOutcome::Unchanged {
        tx.commit().await?;
        return Ok(written);
    }

    for table in ["unit_weapons", "unit_abilities", "unit_keywords"] {
        sqlx::query(&format!("DELETE FROM {} WHERE unit_id = ?", table))
            .bind(&written.id)
            .execute(&mut *tx)
            .await?;
    }

    for (position, weapon) in unit.weapons.iter().enumerate() {
        let row = Row::new(
            "weapons",
            vec![("slug", text(&weapon.slug))],
            vec![
                ("name", text(&weapon.name)),
                ("kind", text(weapon.kind.as_str())),
                ("range", opt(&weapon.range)),
                ("attacks", opt(&weapon.attacks)),
                ("skill", opt(&weapon.skill)),
                ("strength", opt(&weapon.strength)),
                ("armour_penetration", opt(&weapon.armour_penetration)),
                ("damage", opt(&weapon.damage)),
                ("abilities", opt(&weapon.abilities)),
            ],
        );
        let catalog = upsert(&mut tx, &row).await?;
        link(&mut tx, "unit_weapons", "weapon_id", &written.id, &catalog.id, position).await?;
    }

    for (position, ability) in unit.abilities.iter().enumerate() {
        let row = Row::new(
            "abilities",
            vec![("slug", text(&ability.slug))],
            vec![
                ("name", text(&ability.name)),
                ("kind", text(ability.kind.as_str())),
                ("description", opt(&ability.description)),
            ],
        );
        let catalog = upsert(&mut tx, &row).await?;
        link(&mut tx, "unit_abilities", "ability_id", &written.id, &catalog.id, position).await?;
    }

    for (position, keyword) in unit.keywords.iter().enumerate() {
        let row = Row::new(
            "keywords",
            vec![("slug", text(&keyword.slug))],
            vec![
                ("name", text(&keyword.name)),
                ("is_faction_keyword", flag(keyword.is_faction_keyword)),
            ],
        );
        let catalog = upsert(&mut tx, &row).await?;
        link(&mut tx, "unit_keywords", "keyword_id", &written.id, &catalog.id, position).await?;
    }

    tx.commit().await?;
    Ok(written)
}

async fn link(
    conn: &mut SqliteConnection,
    table: &str,
    column: &str,
    unit_id: &str,
    target_id: &str,
    position: usize,
) -> Result<(), sqlx::Error> {
    sqlx::query(&format!(
        "INSERT OR IGNORE INTO {} (unit_id, {}, position) VALUES (?, ?, ?)",
        table, column
    ))
    .bind(unit_id)
    .bind(target_id)
    .bind(position as i64)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Write parsed units of one faction. The faction must already be stored.
pub async fn reconcile_units(
    pool: &SqlitePool,
    faction_slug: &str,
    units: &[Unit],
) -> Result<ReconcileSummary> {
    let mut summary = ReconcileSummary::default();
    if units.is_empty() {
        return Ok(summary);
    }

    let mut conn = pool.acquire().await?;
    let lookup = faction_id(&mut conn, faction_slug).await;
    drop(conn);
    let faction_id = match lookup {
        Ok(Some(id)) => id,
        Ok(None) => {
            for unit in units {
                summary.fail(
                    "unit",
                    &unit.slug,
                    format!("faction '{}' is not stored", faction_slug),
                );
            }
            return Ok(summary);
        }
        Err(e) => {
            collect(&mut summary, "faction", faction_slug, Err(e))?;
            return Ok(summary);
        }
    };

    for unit in units {
        let result = write_unit(pool, &faction_id, unit).await;
        summary.record("unit", &unit.slug, result)?;
    }

    Ok(summary)
}

/// Reconcile a mixed batch of extracted records for one faction.
///
/// Rules are faction-independent; faction pages and units are written
/// under `faction_slug`.
pub async fn reconcile(
    pool: &SqlitePool,
    faction_slug: &str,
    records: &[ExtractedRecord],
) -> Result<ReconcileSummary> {
    let mut rules = Vec::new();
    let mut pages = Vec::new();
    let mut units = Vec::new();
    for record in records {
        match record {
            ExtractedRecord::Rule(rule) => rules.push(rule.clone()),
            ExtractedRecord::FactionPage(page) => pages.push(page.as_ref()),
            ExtractedRecord::Unit(unit) => units.push(unit.as_ref().clone()),
        }
    }

    let mut summary = ReconcileSummary::default();
    if !rules.is_empty() {
        summary.merge(reconcile_rules(pool, &rules).await?);
    }
    for page in pages {
        summary.merge(reconcile_faction(pool, faction_slug, page).await?);
    }
    summary.merge(reconcile_units(pool, faction_slug, &units).await?);
    Ok(summary)
}
