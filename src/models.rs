//! Core data models used throughout the ingestion pipeline.
//!
//! Extractors produce these records from fetched pages; the reconciliation
//! writer persists them keyed by slug. None of them carry database ids:
//! identity is always the natural key.

use serde::{Deserialize, Serialize};

/// A section or subsection of the core rules document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreRule {
    pub slug: String,
    pub title: String,
    pub category: String,
    pub subcategory: Option<String>,
    pub content: String,
    /// Position in document order within one extraction run.
    pub order_index: i64,
    pub source_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Faction {
    pub slug: String,
    pub name: String,
    pub army_rules_text: Option<String>,
    pub lore_text: Option<String>,
    pub source_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Detachment {
    pub slug: String,
    pub name: String,
    pub rule_name: Option<String>,
    pub rule_text: Option<String>,
    pub lore_text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stratagem {
    pub slug: String,
    pub name: String,
    pub cp_cost: Option<i64>,
    pub phase: Option<String>,
    pub when: Option<String>,
    pub target: Option<String>,
    pub effect: Option<String>,
    pub restrictions: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enhancement {
    pub slug: String,
    pub name: String,
    pub points_cost: Option<i64>,
    pub description: Option<String>,
    pub restrictions: Option<String>,
}

/// A link from a faction page to one of its datasheets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitLink {
    pub slug: String,
    pub name: String,
    pub source_url: String,
}

/// Everything extracted from a single faction page.
///
/// Stratagems and enhancements are keyed by the detachment name *as
/// displayed where they were found*, which is not guaranteed to match the
/// detachment heading byte for byte. The writer joins on slugs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactionPage {
    pub faction: Option<Faction>,
    pub detachments: Vec<Detachment>,
    pub stratagems_by_detachment: Vec<(Option<String>, Vec<Stratagem>)>,
    pub enhancements_by_detachment: Vec<(String, Vec<Enhancement>)>,
    pub unit_links: Vec<UnitLink>,
}

/// Characteristic codes printed in a datasheet's statline header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatCode {
    Movement,
    Toughness,
    Save,
    Wounds,
    Leadership,
    ObjectiveControl,
    InvulnerableSave,
}

impl StatCode {
    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim().to_ascii_uppercase().as_str() {
            "M" => Some(StatCode::Movement),
            "T" => Some(StatCode::Toughness),
            "SV" => Some(StatCode::Save),
            "W" => Some(StatCode::Wounds),
            "LD" => Some(StatCode::Leadership),
            "OC" => Some(StatCode::ObjectiveControl),
            "INV" | "INVSV" | "INVULNERABLE SAVE" => Some(StatCode::InvulnerableSave),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statline {
    pub movement: Option<String>,
    pub toughness: Option<String>,
    pub save: Option<String>,
    pub invulnerable_save: Option<String>,
    pub wounds: Option<String>,
    pub leadership: Option<String>,
    pub objective_control: Option<String>,
    /// Characteristic codes the datasheet printed that have no field here.
    pub unknown: Vec<(String, String)>,
}

impl Statline {
    /// Record a raw `(code, value)` pair from the page.
    pub fn set(&mut self, code: &str, value: &str) {
        let value = value.trim().to_string();
        let Some(stat) = StatCode::from_code(code) else {
            self.unknown.push((code.trim().to_string(), value));
            return;
        };
        let slot = match stat {
            StatCode::Movement => &mut self.movement,
            StatCode::Toughness => &mut self.toughness,
            StatCode::Save => &mut self.save,
            StatCode::Wounds => &mut self.wounds,
            StatCode::Leadership => &mut self.leadership,
            StatCode::ObjectiveControl => &mut self.objective_control,
            StatCode::InvulnerableSave => &mut self.invulnerable_save,
        };
        *slot = Some(value);
    }

    /// A statline is usable once its core survivability stats are present.
    pub fn is_complete(&self) -> bool {
        self.toughness.is_some() && self.wounds.is_some() && self.save.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeaponKind {
    Ranged,
    Melee,
}

impl WeaponKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WeaponKind::Ranged => "ranged",
            WeaponKind::Melee => "melee",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeaponProfile {
    pub slug: String,
    pub name: String,
    pub kind: WeaponKind,
    pub range: Option<String>,
    pub attacks: Option<String>,
    /// Ballistic skill for ranged weapons, weapon skill for melee.
    pub skill: Option<String>,
    pub strength: Option<String>,
    pub armour_penetration: Option<String>,
    pub damage: Option<String>,
    /// Bracketed ability annotation, e.g. `[RAPID FIRE 1, LETHAL HITS]`.
    pub abilities: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AbilityKind {
    Core,
    Faction,
    Datasheet,
}

impl AbilityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AbilityKind::Core => "core",
            AbilityKind::Faction => "faction",
            AbilityKind::Datasheet => "datasheet",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ability {
    pub slug: String,
    pub name: String,
    pub kind: AbilityKind,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Keyword {
    pub slug: String,
    pub name: String,
    pub is_faction_keyword: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitFlags {
    pub is_epic_hero: bool,
    pub is_battleline: bool,
    pub is_dedicated_transport: bool,
}

/// A fully parsed unit datasheet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unit {
    pub slug: String,
    pub name: String,
    pub statline: Statline,
    pub points_cost: Option<i64>,
    pub composition_text: Option<String>,
    pub flags: UnitFlags,
    pub weapons: Vec<WeaponProfile>,
    pub abilities: Vec<Ability>,
    pub keywords: Vec<Keyword>,
    pub source_url: String,
}

/// Typed output of the structural extractors, one variant per category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractedRecord {
    Rule(CoreRule),
    FactionPage(Box<FactionPage>),
    Unit(Box<Unit>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrapeStatus {
    Pending,
    Success,
    Failed,
}

impl ScrapeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScrapeStatus::Pending => "pending",
            ScrapeStatus::Success => "success",
            ScrapeStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ScrapeStatus::Pending),
            "success" => Some(ScrapeStatus::Success),
            "failed" => Some(ScrapeStatus::Failed),
            _ => None,
        }
    }
}

/// One row of the per-faction datasheet index that drives unit scraping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitIndexEntry {
    pub faction_id: String,
    pub slug: String,
    pub name: String,
    pub source_url: String,
    pub scrape_status: ScrapeStatus,
    pub last_attempt_at: Option<i64>,
    pub last_error: Option<String>,
}
