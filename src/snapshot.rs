//! Snapshot and drift auditing.
//!
//! A [`Snapshot`] is a point-in-time summary of the store: for every
//! faction, its detachments with their stratagem and enhancement names,
//! its faction-level stratagems, and its unit names. Snapshots are saved
//! as named JSON files and never overwritten.
//!
//! [`diff`] compares two snapshots by slug, never by position. A faction or
//! detachment counts as *changed* when any of its counts moved; for those
//! the report also lists which names appeared and disappeared, so a rename
//! shows up as one added plus one removed name.
//!
//! Only [`capture`] touches the store; [`diff`] is a pure function.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::Write as _;
use std::io::Write as _;
use std::path::{Path, PathBuf};

/// Names shown per list in a rendered diff before the "+N more" tail.
pub const MAX_SHOWN_NAMES: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub name: String,
    pub taken_at: DateTime<Utc>,
    pub factions: Vec<FactionSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactionSummary {
    pub slug: String,
    pub name: String,
    pub detachments: Vec<DetachmentSummary>,
    /// Stratagems with no detachment association.
    #[serde(default)]
    pub faction_stratagems: Vec<String>,
    #[serde(default)]
    pub units: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetachmentSummary {
    pub slug: String,
    pub name: String,
    #[serde(default)]
    pub stratagems: Vec<String>,
    #[serde(default)]
    pub enhancements: Vec<String>,
}

impl FactionSummary {
    /// Every stratagem name of the faction, with or without a detachment.
    pub fn all_stratagems(&self) -> Vec<&str> {
        self.detachments
            .iter()
            .flat_map(|d| d.stratagems.iter())
            .chain(self.faction_stratagems.iter())
            .map(String::as_str)
            .collect()
    }

    fn counts(&self) -> [usize; 4] {
        [
            self.detachments.len(),
            self.all_stratagems().len(),
            self.detachments.iter().map(|d| d.enhancements.len()).sum(),
            self.units.len(),
        ]
    }
}

/// Listing entry for a saved snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotInfo {
    pub name: String,
    pub taken_at: DateTime<Utc>,
    pub factions: usize,
}

// ═══════════════════════════════════════════════════════════════════════
// Capture
// ═══════════════════════════════════════════════════════════════════════

/// Summarize the current store contents.
pub async fn capture(pool: &SqlitePool, name: &str) -> Result<Snapshot> {
    let factions: Vec<(String, String, String)> =
        sqlx::query_as("SELECT id, slug, name FROM factions ORDER BY slug")
            .fetch_all(pool)
            .await
            .context("Failed to read factions")?;
    let detachments: Vec<(String, String, String, String)> = sqlx::query_as(
        "SELECT id, faction_id, slug, name FROM detachments ORDER BY slug",
    )
    .fetch_all(pool)
    .await?;
    let stratagems: Vec<(String, Option<String>, String)> = sqlx::query_as(
        "SELECT faction_id, detachment_id, name FROM stratagems ORDER BY name",
    )
    .fetch_all(pool)
    .await?;
    let enhancements: Vec<(String, String)> =
        sqlx::query_as("SELECT detachment_id, name FROM enhancements ORDER BY name")
            .fetch_all(pool)
            .await?;
    let units: Vec<(String, String)> =
        sqlx::query_as("SELECT faction_id, name FROM units ORDER BY name")
            .fetch_all(pool)
            .await?;

    let mut strats_by_detachment: HashMap<String, Vec<String>> = HashMap::new();
    let mut strats_by_faction: HashMap<String, Vec<String>> = HashMap::new();
    for (faction_id, detachment_id, name) in stratagems {
        match detachment_id {
            Some(id) => strats_by_detachment.entry(id).or_default().push(name),
            None => strats_by_faction.entry(faction_id).or_default().push(name),
        }
    }
    let mut enh_by_detachment: HashMap<String, Vec<String>> = HashMap::new();
    for (detachment_id, name) in enhancements {
        enh_by_detachment.entry(detachment_id).or_default().push(name);
    }
    let mut units_by_faction: HashMap<String, Vec<String>> = HashMap::new();
    for (faction_id, name) in units {
        units_by_faction.entry(faction_id).or_default().push(name);
    }
    let mut detachments_by_faction: HashMap<String, Vec<DetachmentSummary>> = HashMap::new();
    for (id, faction_id, slug, name) in detachments {
        detachments_by_faction
            .entry(faction_id)
            .or_default()
            .push(DetachmentSummary {
                slug,
                name,
                stratagems: strats_by_detachment.remove(&id).unwrap_or_default(),
                enhancements: enh_by_detachment.remove(&id).unwrap_or_default(),
            });
    }

    let factions = factions
        .into_iter()
        .map(|(id, slug, name)| FactionSummary {
            slug,
            name,
            detachments: detachments_by_faction.remove(&id).unwrap_or_default(),
            faction_stratagems: strats_by_faction.remove(&id).unwrap_or_default(),
            units: units_by_faction.remove(&id).unwrap_or_default(),
        })
        .collect();

    Ok(Snapshot {
        name: name.to_string(),
        taken_at: Utc::now(),
        factions,
    })
}

// ═══════════════════════════════════════════════════════════════════════
// Persistence
// ═══════════════════════════════════════════════════════════════════════

fn snapshot_path(dir: &Path, name: &str) -> Result<PathBuf> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && !name.starts_with('.');
    if !valid {
        bail!(
            "Invalid snapshot name '{}': use letters, digits, '-', '_' or '.'",
            name
        );
    }
    Ok(dir.join(format!("{}.json", name)))
}

/// Persist a snapshot under its name. Refuses to replace an existing one.
pub fn save(dir: &Path, snapshot: &Snapshot) -> Result<PathBuf> {
    let path = snapshot_path(dir, &snapshot.name)?;
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create snapshot dir: {}", dir.display()))?;
    let json = serde_json::to_string_pretty(snapshot)?;
    let mut file = match std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)
    {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            bail!("Snapshot '{}' already exists", snapshot.name)
        }
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to create {}", path.display()));
        }
    };
    file.write_all(json.as_bytes())
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}

pub fn load(dir: &Path, name: &str) -> Result<Snapshot> {
    let path = snapshot_path(dir, name)?;
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read snapshot: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Malformed snapshot: {}", path.display()))
}

/// Saved snapshots, oldest first. Unreadable files are skipped.
pub fn list(dir: &Path) -> Result<Vec<SnapshotInfo>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut infos = Vec::new();
    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("Failed to list snapshots in {}", dir.display()))?
    {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let parsed = std::fs::read_to_string(&path)
            .ok()
            .and_then(|c| serde_json::from_str::<Snapshot>(&c).ok());
        match parsed {
            Some(s) => infos.push(SnapshotInfo {
                name: s.name,
                taken_at: s.taken_at,
                factions: s.factions.len(),
            }),
            None => tracing::warn!(path = %path.display(), "Skipping unreadable snapshot"),
        }
    }
    infos.sort_by(|a, b| a.taken_at.cmp(&b.taken_at).then(a.name.cmp(&b.name)));
    Ok(infos)
}

// ═══════════════════════════════════════════════════════════════════════
// Diff
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountDelta {
    pub before: usize,
    pub after: usize,
}

impl CountDelta {
    pub fn delta(&self) -> i64 {
        self.after as i64 - self.before as i64
    }

    pub fn moved(&self) -> bool {
        self.before != self.after
    }
}

/// Names present only after (`added`) or only before (`removed`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NameChanges {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl NameChanges {
    fn between<'a>(
        before: impl IntoIterator<Item = &'a str>,
        after: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        let before: BTreeSet<&str> = before.into_iter().collect();
        let after: BTreeSet<&str> = after.into_iter().collect();
        Self {
            added: after.difference(&before).map(|s| s.to_string()).collect(),
            removed: before.difference(&after).map(|s| s.to_string()).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FactionChange {
    pub slug: String,
    pub name: String,
    pub detachments: CountDelta,
    pub stratagems: CountDelta,
    pub enhancements: CountDelta,
    pub units: CountDelta,
    pub stratagem_names: NameChanges,
    pub unit_names: NameChanges,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetachmentRef {
    pub faction: String,
    pub slug: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetachmentChange {
    pub faction: String,
    pub slug: String,
    pub name: String,
    pub stratagems: CountDelta,
    pub enhancements: CountDelta,
    pub stratagem_names: NameChanges,
    pub enhancement_names: NameChanges,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotDiff {
    pub added_factions: Vec<String>,
    pub removed_factions: Vec<String>,
    pub changed_factions: Vec<FactionChange>,
    pub added_detachments: Vec<DetachmentRef>,
    pub removed_detachments: Vec<DetachmentRef>,
    pub changed_detachments: Vec<DetachmentChange>,
}

impl SnapshotDiff {
    pub fn is_empty(&self) -> bool {
        self.added_factions.is_empty()
            && self.removed_factions.is_empty()
            && self.changed_factions.is_empty()
            && self.added_detachments.is_empty()
            && self.removed_detachments.is_empty()
            && self.changed_detachments.is_empty()
    }
}

fn by_slug<'a, T>(items: &'a [T], slug: impl Fn(&'a T) -> &'a str) -> BTreeMap<&'a str, &'a T> {
    items.iter().map(|item| (slug(item), item)).collect()
}

pub fn diff(before: &Snapshot, after: &Snapshot) -> SnapshotDiff {
    let mut out = SnapshotDiff::default();
    let old = by_slug(&before.factions, |f| f.slug.as_str());
    let new = by_slug(&after.factions, |f| f.slug.as_str());

    out.added_factions = new
        .keys()
        .filter(|slug| !old.contains_key(*slug))
        .map(|slug| slug.to_string())
        .collect();
    out.removed_factions = old
        .keys()
        .filter(|slug| !new.contains_key(*slug))
        .map(|slug| slug.to_string())
        .collect();

    for (slug, was) in &old {
        let Some(now) = new.get(slug) else {
            continue;
        };

        let [d0, s0, e0, u0] = was.counts();
        let [d1, s1, e1, u1] = now.counts();
        let change = FactionChange {
            slug: slug.to_string(),
            name: now.name.clone(),
            detachments: CountDelta { before: d0, after: d1 },
            stratagems: CountDelta { before: s0, after: s1 },
            enhancements: CountDelta { before: e0, after: e1 },
            units: CountDelta { before: u0, after: u1 },
            stratagem_names: NameChanges::between(was.all_stratagems(), now.all_stratagems()),
            unit_names: NameChanges::between(
                was.units.iter().map(String::as_str),
                now.units.iter().map(String::as_str),
            ),
        };
        if change.detachments.moved()
            || change.stratagems.moved()
            || change.enhancements.moved()
            || change.units.moved()
        {
            out.changed_factions.push(change);
        }

        let old_d = by_slug(&was.detachments, |d| d.slug.as_str());
        let new_d = by_slug(&now.detachments, |d| d.slug.as_str());
        let reference = |d: &DetachmentSummary| DetachmentRef {
            faction: slug.to_string(),
            slug: d.slug.clone(),
            name: d.name.clone(),
        };
        for (dslug, d) in &new_d {
            if !old_d.contains_key(dslug) {
                out.added_detachments.push(reference(*d));
            }
        }
        for (dslug, d) in &old_d {
            let Some(nd) = new_d.get(dslug) else {
                out.removed_detachments.push(reference(*d));
                continue;
            };
            let stratagems = CountDelta {
                before: d.stratagems.len(),
                after: nd.stratagems.len(),
            };
            let enhancements = CountDelta {
                before: d.enhancements.len(),
                after: nd.enhancements.len(),
            };
            if stratagems.moved() || enhancements.moved() {
                out.changed_detachments.push(DetachmentChange {
                    faction: slug.to_string(),
                    slug: dslug.to_string(),
                    name: nd.name.clone(),
                    stratagems,
                    enhancements,
                    stratagem_names: NameChanges::between(
                        d.stratagems.iter().map(String::as_str),
                        nd.stratagems.iter().map(String::as_str),
                    ),
                    enhancement_names: NameChanges::between(
                        d.enhancements.iter().map(String::as_str),
                        nd.enhancements.iter().map(String::as_str),
                    ),
                });
            }
        }
    }

    out
}

/// Compare a stored snapshot against the live store.
pub async fn diff_live(pool: &SqlitePool, stored: &Snapshot) -> Result<SnapshotDiff> {
    let live = capture(pool, "live").await?;
    Ok(diff(stored, &live))
}

// ═══════════════════════════════════════════════════════════════════════
// Rendering
// ═══════════════════════════════════════════════════════════════════════

/// `"A, B, C, D, E (+2 more)"`.
pub fn capped(names: &[String]) -> String {
    let shown = names
        .iter()
        .take(MAX_SHOWN_NAMES)
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(", ");
    if names.len() > MAX_SHOWN_NAMES {
        format!("{} (+{} more)", shown, names.len() - MAX_SHOWN_NAMES)
    } else {
        shown
    }
}

fn delta_text(label: &str, d: &CountDelta) -> String {
    format!("{} {} → {} ({:+})", label, d.before, d.after, d.delta())
}

fn names_text(out: &mut String, label: &str, changes: &NameChanges) {
    if !changes.added.is_empty() {
        let _ = writeln!(out, "      {} added: {}", label, capped(&changes.added));
    }
    if !changes.removed.is_empty() {
        let _ = writeln!(out, "      {} removed: {}", label, capped(&changes.removed));
    }
}

pub fn render_diff(diff: &SnapshotDiff) -> String {
    if diff.is_empty() {
        return "No drift detected.\n".to_string();
    }
    let mut out = String::new();

    let _ = writeln!(
        out,
        "Factions: {} added, {} removed, {} changed",
        diff.added_factions.len(),
        diff.removed_factions.len(),
        diff.changed_factions.len()
    );
    for slug in &diff.added_factions {
        let _ = writeln!(out, "  + {}", slug);
    }
    for slug in &diff.removed_factions {
        let _ = writeln!(out, "  - {}", slug);
    }
    for change in &diff.changed_factions {
        let moved: Vec<String> = [
            ("detachments", &change.detachments),
            ("stratagems", &change.stratagems),
            ("enhancements", &change.enhancements),
            ("units", &change.units),
        ]
        .iter()
        .filter(|(_, d)| d.moved())
        .map(|(label, d)| delta_text(label, d))
        .collect();
        let _ = writeln!(out, "  ~ {}: {}", change.slug, moved.join(", "));
        names_text(&mut out, "stratagems", &change.stratagem_names);
        names_text(&mut out, "units", &change.unit_names);
    }

    let _ = writeln!(
        out,
        "Detachments: {} added, {} removed, {} changed",
        diff.added_detachments.len(),
        diff.removed_detachments.len(),
        diff.changed_detachments.len()
    );
    for d in &diff.added_detachments {
        let _ = writeln!(out, "  + {}/{}", d.faction, d.slug);
    }
    for d in &diff.removed_detachments {
        let _ = writeln!(out, "  - {}/{}", d.faction, d.slug);
    }
    for change in &diff.changed_detachments {
        let moved: Vec<String> = [
            ("stratagems", &change.stratagems),
            ("enhancements", &change.enhancements),
        ]
        .iter()
        .filter(|(_, d)| d.moved())
        .map(|(label, d)| delta_text(label, d))
        .collect();
        let _ = writeln!(out, "  ~ {}/{}: {}", change.faction, change.slug, moved.join(", "));
        names_text(&mut out, "stratagems", &change.stratagem_names);
        names_text(&mut out, "enhancements", &change.enhancement_names);
    }

    out
}
