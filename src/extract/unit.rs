//! Unit datasheet extraction.

use scraper::{ElementRef, Html};
use sha2::{Digest, Sha256};

use super::consts;
use super::normalize::Normalizer;
use super::weapon::clean_weapon_name;
use super::{first_text, normalized_text};
use crate::models::{
    Ability, AbilityKind, Keyword, Statline, Unit, UnitFlags, WeaponKind, WeaponProfile,
};
use crate::slug::slugify;

/// Parse one datasheet page.
///
/// Returns an empty list when the page has no unit name or its statline is
/// missing toughness, wounds or save; callers count that as a parse failure.
pub fn extract_unit(html: &str, source_url: &str, normalizer: &Normalizer) -> Vec<Unit> {
    let document = Html::parse_document(html);
    let root = document.root_element();

    let Some(name) = first_text(&root, &consts::UNIT_NAME, normalizer) else {
        return Vec::new();
    };
    let slug = slugify(&name);
    if slug.is_empty() {
        return Vec::new();
    }

    let statline = statline(&root, normalizer);
    if !statline.is_complete() {
        return Vec::new();
    }

    let keywords = keywords(&root, normalizer);
    let flags = flags(&keywords);

    vec![Unit {
        weapons: weapons(&root, normalizer),
        abilities: abilities(&root, &slug, normalizer),
        points_cost: points_cost(&root, normalizer),
        composition_text: first_text(&root, &consts::COMPOSITION, normalizer),
        slug,
        name,
        statline,
        flags,
        keywords,
        source_url: source_url.to_string(),
    }]
}

fn statline(root: &ElementRef, normalizer: &Normalizer) -> Statline {
    let mut statline = Statline::default();
    for wrap in root.select(&consts::CHAR_WRAP) {
        let code = first_text(&wrap, &consts::CHAR_NAME, normalizer);
        let value = first_text(&wrap, &consts::CHAR_VALUE, normalizer);
        if let (Some(code), Some(value)) = (code, value) {
            statline.set(&code, &value);
        }
    }
    if statline.invulnerable_save.is_none() {
        if let Some(invul) = first_text(root, &consts::CHAR_INVUL, normalizer) {
            statline.invulnerable_save = Some(invul);
        }
    }
    statline
}

/// Profile identity: the same weapon name may carry different profiles on
/// different datasheets, so the catalog slug includes a profile digest.
fn weapon_slug(name: &str, fields: &[&Option<String>], kind: WeaponKind) -> String {
    let mut hasher = Sha256::new();
    hasher.update(kind.as_str().as_bytes());
    for field in fields {
        hasher.update(b"\x1f");
        hasher.update(field.as_deref().unwrap_or("").as_bytes());
    }
    let digest = format!("{:x}", hasher.finalize());
    format!("{}-{}", slugify(name), &digest[..8])
}

fn weapons(root: &ElementRef, normalizer: &Normalizer) -> Vec<WeaponProfile> {
    let mut weapons: Vec<WeaponProfile> = Vec::new();
    let mut kind: Option<WeaponKind> = None;

    for table in root.select(&consts::WEAPON_TABLE) {
        for row in table.select(&consts::ROW) {
            let row_text = normalized_text(&row, normalizer).to_uppercase();
            if row_text.contains("RANGED WEAPONS") {
                kind = Some(WeaponKind::Ranged);
                continue;
            }
            if row_text.contains("MELEE WEAPONS") {
                kind = Some(WeaponKind::Melee);
                continue;
            }
            let Some(kind) = kind else {
                continue;
            };
            let cells: Vec<String> = row
                .select(&consts::CELL)
                .map(|cell| normalized_text(&cell, normalizer))
                .collect();
            if cells.len() != 7 || cells[0].is_empty() {
                continue;
            }
            let cell = |i: usize| {
                let text = cells[i].trim();
                (!text.is_empty()).then(|| text.to_string())
            };
            let cleaned = clean_weapon_name(&cells[0]);
            let (range, attacks, skill, strength, ap, damage) =
                (cell(1), cell(2), cell(3), cell(4), cell(5), cell(6));
            let slug = weapon_slug(
                &cleaned.name,
                &[&range, &attacks, &skill, &strength, &ap, &damage, &cleaned.abilities],
                kind,
            );
            if weapons.iter().any(|w| w.slug == slug) {
                continue;
            }
            weapons.push(WeaponProfile {
                slug,
                name: cleaned.name,
                kind,
                range,
                attacks,
                skill,
                strength,
                armour_penetration: ap,
                damage,
                abilities: cleaned.abilities,
            });
        }
    }
    weapons
}

fn strip_label<'a>(text: &'a str, label: &str) -> Option<&'a str> {
    let head = text.get(..label.len())?;
    head.eq_ignore_ascii_case(label)
        .then(|| text[label.len()..].trim())
}

fn split_list(text: &str) -> impl Iterator<Item = &str> {
    text.split(',').map(str::trim).filter(|s| !s.is_empty())
}

fn abilities(root: &ElementRef, unit_slug: &str, normalizer: &Normalizer) -> Vec<Ability> {
    let mut abilities: Vec<Ability> = Vec::new();
    let mut push = |ability: Ability| {
        if !ability.slug.is_empty() && !abilities.iter().any(|a| a.slug == ability.slug) {
            abilities.push(ability);
        }
    };

    for block in root.select(&consts::ABILITY_BLOCK) {
        let text = normalized_text(&block, normalizer);
        let listed = strip_label(&text, "CORE:")
            .map(|rest| (AbilityKind::Core, rest))
            .or_else(|| strip_label(&text, "FACTION:").map(|rest| (AbilityKind::Faction, rest)));
        if let Some((kind, rest)) = listed {
            for name in split_list(rest) {
                push(Ability {
                    slug: slugify(name),
                    name: name.to_string(),
                    kind,
                    description: None,
                });
            }
            continue;
        }

        let Some(name) = first_text(&block, &consts::BOLD, normalizer) else {
            continue;
        };
        let name = name.trim_end_matches(':').trim().to_string();
        let description = text
            .strip_prefix(name.as_str())
            .unwrap_or(&text)
            .trim_start_matches(':')
            .trim();
        push(Ability {
            slug: format!("{}-{}", unit_slug, slugify(&name)),
            description: (!description.is_empty()).then(|| description.to_string()),
            name,
            kind: AbilityKind::Datasheet,
        });
    }
    abilities
}

fn keywords(root: &ElementRef, normalizer: &Normalizer) -> Vec<Keyword> {
    let mut keywords: Vec<Keyword> = Vec::new();
    let sources = [
        (&consts::KEYWORDS, "KEYWORDS:", false),
        (&consts::FACTION_KEYWORDS, "FACTION KEYWORDS:", true),
    ];
    for (selector, label, is_faction_keyword) in sources {
        let Some(text) = first_text(root, selector, normalizer) else {
            continue;
        };
        let list = strip_label(&text, label).unwrap_or(&text);
        for name in split_list(list) {
            let slug = slugify(name);
            if slug.is_empty() || keywords.iter().any(|k| k.slug == slug) {
                continue;
            }
            keywords.push(Keyword {
                slug,
                name: name.to_string(),
                is_faction_keyword,
            });
        }
    }
    keywords
}

fn flags(keywords: &[Keyword]) -> UnitFlags {
    let has = |slug: &str| keywords.iter().any(|k| k.slug == slug);
    UnitFlags {
        is_epic_hero: has("epic-hero"),
        is_battleline: has("battleline"),
        is_dedicated_transport: has("dedicated-transport"),
    }
}

fn points_cost(root: &ElementRef, normalizer: &Normalizer) -> Option<i64> {
    root.select(&consts::POINTS_ROWS).find_map(|row| {
        let cells: Vec<String> = row
            .select(&consts::CELL)
            .map(|cell| normalized_text(&cell, normalizer))
            .collect();
        let cost = cells.get(1)?;
        consts::POINTS_COST
            .captures(cost)
            .and_then(|c| c[1].parse().ok())
    })
}
