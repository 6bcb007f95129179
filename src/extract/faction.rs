//! Faction page extraction: army rules, detachments, stratagems,
//! enhancements, and datasheet links.
//!
//! The page is walked once in document order. `h2` headings open sections:
//! "Army Rules", a handful of index-style headings that are ignored, and
//! otherwise one section per detachment. Stratagem and enhancement cards
//! are collected under the detachment *name they display*; the writer
//! resolves those names to persisted detachments by slug.

use scraper::{ElementRef, Html};

use super::consts;
use super::normalize::{collapse_ws, Normalizer};
use super::{first_text, normalized_text, resolve_href};
use crate::models::{Detachment, Enhancement, Faction, FactionPage, Stratagem, UnitLink};
use crate::slug::slugify;

const IGNORED_SECTIONS: &[&str] = &[
    "stratagems",
    "enhancements",
    "datasheets",
    "contents",
    "introduction",
    "books",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Preamble,
    ArmyRules,
    Detachment(usize),
    Ignored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DetachmentPart {
    Lore,
    RuleHeading,
    RuleText,
    Other,
}

fn in_card(el: &ElementRef) -> bool {
    el.ancestors().any(|node| {
        node.value()
            .as_element()
            .map(|e| e.classes().any(|c| c == "str10Wrap" || c == "enhWrap"))
            .unwrap_or(false)
    })
}

fn push_keyed<K: PartialEq, V>(groups: &mut Vec<(K, Vec<V>)>, key: K, value: V) {
    match groups.iter_mut().find(|(k, _)| *k == key) {
        Some((_, values)) => values.push(value),
        None => groups.push((key, vec![value])),
    }
}

fn append(slot: &mut Option<String>, text: String) {
    if text.is_empty() {
        return;
    }
    match slot {
        Some(existing) => {
            existing.push_str("\n\n");
            existing.push_str(&text);
        }
        None => *slot = Some(text),
    }
}

pub fn extract_faction(
    html: &str,
    faction_slug: &str,
    source_url: &str,
    normalizer: &Normalizer,
) -> FactionPage {
    let document = Html::parse_document(html);
    let mut page = FactionPage::default();

    let mut faction_name: Option<String> = None;
    let mut lore: Option<String> = None;
    let mut army_rules: Option<String> = None;
    let mut section = Section::Preamble;
    let mut part = DetachmentPart::Lore;

    for el in document.select(&consts::FACTION_BLOCKS) {
        if in_card(&el) {
            continue;
        }
        let tag = el.value().name();
        match tag {
            "h1" => {
                if faction_name.is_none() {
                    let name = normalized_text(&el, normalizer);
                    if !name.is_empty() {
                        faction_name = Some(name);
                    }
                }
            }
            "h2" => {
                let title = normalized_text(&el, normalizer);
                let lowered = title.to_lowercase();
                section = if lowered == "army rules" || lowered == "army rule" {
                    Section::ArmyRules
                } else if title.is_empty() || IGNORED_SECTIONS.contains(&lowered.as_str()) {
                    Section::Ignored
                } else {
                    page.detachments.push(Detachment {
                        slug: slugify(&title),
                        name: title,
                        rule_name: None,
                        rule_text: None,
                        lore_text: None,
                    });
                    part = DetachmentPart::Lore;
                    Section::Detachment(page.detachments.len() - 1)
                };
            }
            "h3" | "h4" => {
                let title = normalized_text(&el, normalizer);
                match section {
                    Section::ArmyRules => append(&mut army_rules, title),
                    Section::Detachment(idx) => {
                        if tag == "h3" {
                            part = if title.eq_ignore_ascii_case("detachment rule") {
                                DetachmentPart::RuleHeading
                            } else {
                                DetachmentPart::Other
                            };
                        } else if part == DetachmentPart::RuleHeading {
                            page.detachments[idx].rule_name = Some(title);
                            part = DetachmentPart::RuleText;
                        }
                    }
                    Section::Preamble | Section::Ignored => {}
                }
            }
            "p" => {
                let text = normalized_text(&el, normalizer);
                match section {
                    Section::Preamble => append(&mut lore, text),
                    Section::ArmyRules => append(&mut army_rules, text),
                    Section::Detachment(idx) => match part {
                        DetachmentPart::Lore => append(&mut page.detachments[idx].lore_text, text),
                        DetachmentPart::RuleHeading | DetachmentPart::RuleText => {
                            append(&mut page.detachments[idx].rule_text, text)
                        }
                        DetachmentPart::Other => {}
                    },
                    Section::Ignored => {}
                }
            }
            "div" => {
                let current = match section {
                    Section::Detachment(idx) => Some(page.detachments[idx].name.clone()),
                    _ => None,
                };
                if el.value().classes().any(|c| c == "str10Wrap") {
                    if let Some((named, stratagem)) = parse_stratagem(&el, normalizer) {
                        push_keyed(
                            &mut page.stratagems_by_detachment,
                            named.or(current),
                            stratagem,
                        );
                    }
                } else if let Some(enhancement) = parse_enhancement(&el, normalizer) {
                    let key = el
                        .value()
                        .attr("data-detachment")
                        .map(collapse_ws)
                        .or(current)
                        .unwrap_or_default();
                    push_keyed(&mut page.enhancements_by_detachment, key, enhancement);
                }
            }
            _ => {}
        }
    }

    page.unit_links = unit_links(&document, source_url, normalizer);
    page.faction = faction_name.map(|name| Faction {
        slug: faction_slug.to_string(),
        name,
        army_rules_text: army_rules,
        lore_text: lore,
        source_url: source_url.to_string(),
    });
    page
}

/// Parse a stratagem card. Returns the detachment named on its type line
/// (if any) alongside the record.
fn parse_stratagem(card: &ElementRef, normalizer: &Normalizer) -> Option<(Option<String>, Stratagem)> {
    let name = first_text(card, &consts::STRAT_NAME, normalizer)?;
    let slug = slugify(&name);
    if slug.is_empty() {
        return None;
    }

    let cp_cost = first_text(card, &consts::STRAT_CP, normalizer)
        .and_then(|cp| consts::CP_COST.captures(&cp).and_then(|c| c[1].parse().ok()));

    let (detachment, category) = match first_text(card, &consts::STRAT_TYPE, normalizer) {
        Some(type_line) => split_type_line(&type_line),
        None => (None, None),
    };

    let body = first_text(card, &consts::STRAT_TEXT, normalizer).unwrap_or_default();
    let segments = split_segments(&body);
    let when = segments.get("WHEN").cloned();
    let phase = when
        .as_deref()
        .and_then(|w| consts::PHASE.captures(w))
        .map(|c| capitalize(&format!("{} phase", c[1].to_lowercase())))
        .or(category);

    Some((
        detachment,
        Stratagem {
            slug,
            name,
            cp_cost,
            phase,
            when,
            target: segments.get("TARGET").cloned(),
            effect: segments.get("EFFECT").cloned(),
            restrictions: segments.get("RESTRICTIONS").cloned(),
        },
    ))
}

/// `"Gladius Task Force – Battle Tactic Stratagem"` →
/// `(Some("Gladius Task Force"), Some("Battle Tactic"))`.
fn split_type_line(type_line: &str) -> (Option<String>, Option<String>) {
    let strip = |s: &str| {
        let s = s.trim();
        let s = s
            .strip_suffix("Stratagem")
            .or_else(|| s.strip_suffix("stratagem"))
            .unwrap_or(s)
            .trim();
        (!s.is_empty()).then(|| s.to_string())
    };
    match consts::TYPE_SEPARATOR.find(type_line) {
        Some(m) => {
            let detachment = type_line[..m.start()].trim();
            (
                (!detachment.is_empty()).then(|| detachment.to_string()),
                strip(&type_line[m.end()..]),
            )
        }
        None => (None, strip(type_line)),
    }
}

fn split_segments(body: &str) -> std::collections::HashMap<&'static str, String> {
    let mut segments = std::collections::HashMap::new();
    let labels: Vec<_> = consts::STRAT_LABEL.captures_iter(body).collect();
    for (i, caps) in labels.iter().enumerate() {
        let whole = caps.get(0).map(|m| m.end()).unwrap_or(0);
        let end = labels
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map(|m| m.start())
            .unwrap_or(body.len());
        let label = match &caps[1] {
            "WHEN" => "WHEN",
            "TARGET" => "TARGET",
            "EFFECT" => "EFFECT",
            _ => "RESTRICTIONS",
        };
        let text = body[whole..end].trim().to_string();
        if !text.is_empty() {
            segments.insert(label, text);
        }
    }
    segments
}

fn parse_enhancement(card: &ElementRef, normalizer: &Normalizer) -> Option<Enhancement> {
    let name = first_text(card, &consts::ENH_NAME, normalizer)?;
    let slug = slugify(&name);
    if slug.is_empty() {
        return None;
    }
    let points_cost = first_text(card, &consts::ENH_COST, normalizer)
        .and_then(|c| consts::POINTS_COST.captures(&c).and_then(|c| c[1].parse().ok()));
    let description = first_text(card, &consts::ENH_TEXT, normalizer);
    let restrictions = description.as_deref().and_then(|d| {
        let found: Vec<&str> = d
            .split_inclusive(". ")
            .map(str::trim)
            .filter(|s| {
                let lower = s.to_lowercase();
                lower.contains("model only") || lower.contains("cannot be")
            })
            .collect();
        (!found.is_empty()).then(|| found.join(" "))
    });
    Some(Enhancement {
        slug,
        name,
        points_cost,
        description,
        restrictions,
    })
}

fn unit_links(document: &Html, source_url: &str, normalizer: &Normalizer) -> Vec<UnitLink> {
    let mut links: Vec<UnitLink> = Vec::new();
    for a in document.select(&consts::DATASHEET_LINK) {
        let Some(href) = a.value().attr("href") else {
            continue;
        };
        let mut name = normalized_text(&a, normalizer);
        if name.is_empty() {
            name = href
                .trim_end_matches('/')
                .rsplit('/')
                .next()
                .unwrap_or_default()
                .replace(['-', '_'], " ");
        }
        let slug = slugify(&name);
        if slug.is_empty() || links.iter().any(|l| l.slug == slug) {
            continue;
        }
        links.push(UnitLink {
            slug,
            name,
            source_url: resolve_href(source_url, href),
        });
    }
    links
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
<html><body>
<h1>Necrons</h1>
<p>The Necrons are an ancient race.</p>
<h2>Army Rules</h2>
<h3>Reanimation Protocols</h3>
<p>At the end of your Command phase, each unit <b>reanimates</b>.</p>
<h2>Awakened Dynasty</h2>
<p>Nobles lead from the front.</p>
<h3>Detachment Rule</h3>
<h4>Command Protocols</h4>
<p>Units gain a protocol each round.</p>
<h3>Enhancements</h3>
<div class="enhWrap">
  <div class="enhName">Enaegic Dermal Bond</div>
  <div class="enhCost">20 pts</div>
  <div class="enhText">NECRONS model only. The bearer has a 4+ invulnerable save.</div>
</div>
<h2>Hypercrypt Légion</h2>
<h3>Detachment Rule</h3>
<h4>Hyperphasing</h4>
<p>Units can be removed and set up again.</p>
<h2>Stratagems</h2>
<div class="str10Wrap">
  <div class="str10Name">PROTOCOL OF THE HUNGRY VOID</div>
  <div class="str10CP">1CP</div>
  <div class="str10Type">Awakened Dynasty – Strategic Ploy Stratagem</div>
  <div class="str10Text">WHEN:Fight phase.TARGET:One NECRONS unit.EFFECT:Add 1 to the Strength characteristic.</div>
</div>
<div class="str10Wrap">
  <div class="str10Name">DIMENSIONAL CORRIDOR</div>
  <div class="str10CP">1CP</div>
  <div class="str10Type">Hypercrypt Legion – Strategic Ploy Stratagem</div>
  <div class="str10Text">WHEN: Your Movement phase. TARGET: One unit. EFFECT: Set it up again. RESTRICTIONS: Not for MONSTERS.</div>
</div>
<div class="str10Wrap">
  <div class="str10Name">COMMAND RE-ROLL</div>
  <div class="str10CP">1CP</div>
  <div class="str10Type">Core – Battle Tactic Stratagem</div>
  <div class="str10Text">WHEN: Any phase. EFFECT: Re-roll.</div>
</div>
<h2>Datasheets</h2>
<a href="/wh40k10ed/factions/necrons/datasheets/Overlord">Overlord</a>
<a href="https://example.test/factions/necrons/datasheets/Warriors">NecronWarriors</a>
<a href="/wh40k10ed/factions/necrons/datasheets/Overlord">Overlord</a>
</body></html>
"#;

    fn page() -> FactionPage {
        extract_faction(
            PAGE,
            "necrons",
            "https://example.test/wh40k10ed/factions/necrons/",
            &Normalizer::builtin(),
        )
    }

    #[test]
    fn test_faction_fields() {
        let page = page();
        let faction = page.faction.unwrap();
        assert_eq!(faction.slug, "necrons");
        assert_eq!(faction.name, "Necrons");
        assert_eq!(faction.lore_text.as_deref(), Some("The Necrons are an ancient race."));
        let army = faction.army_rules_text.unwrap();
        assert!(army.starts_with("Reanimation Protocols"));
        assert!(army.contains("reanimates"));
    }

    #[test]
    fn test_detachments() {
        let page = page();
        let names: Vec<&str> = page.detachments.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["Awakened Dynasty", "Hypercrypt Légion"]);
        let dynasty = &page.detachments[0];
        assert_eq!(dynasty.slug, "awakened-dynasty");
        assert_eq!(dynasty.rule_name.as_deref(), Some("Command Protocols"));
        assert_eq!(dynasty.rule_text.as_deref(), Some("Units gain a protocol each round."));
        assert_eq!(dynasty.lore_text.as_deref(), Some("Nobles lead from the front."));
        assert_eq!(page.detachments[1].slug, "hypercrypt-legion");
    }

    #[test]
    fn test_stratagems_keyed_by_type_line() {
        let page = page();
        let keys: Vec<Option<&str>> = page
            .stratagems_by_detachment
            .iter()
            .map(|(k, _)| k.as_deref())
            .collect();
        assert_eq!(
            keys,
            vec![Some("Awakened Dynasty"), Some("Hypercrypt Legion"), Some("Core")]
        );

        let hungry = &page.stratagems_by_detachment[0].1[0];
        assert_eq!(hungry.slug, "protocol-of-the-hungry-void");
        assert_eq!(hungry.cp_cost, Some(1));
        assert_eq!(hungry.when.as_deref(), Some("Fight phase."));
        assert_eq!(hungry.target.as_deref(), Some("One NECRONS unit."));
        assert_eq!(hungry.phase.as_deref(), Some("Fight phase"));

        let corridor = &page.stratagems_by_detachment[1].1[0];
        assert_eq!(corridor.restrictions.as_deref(), Some("Not for MONSTERS."));
        assert_eq!(corridor.phase.as_deref(), Some("Movement phase"));
    }

    #[test]
    fn test_enhancements_keyed_by_section() {
        let page = page();
        assert_eq!(page.enhancements_by_detachment.len(), 1);
        let (key, enhancements) = &page.enhancements_by_detachment[0];
        assert_eq!(key, "Awakened Dynasty");
        let bond = &enhancements[0];
        assert_eq!(bond.points_cost, Some(20));
        assert_eq!(bond.restrictions.as_deref(), Some("NECRONS model only."));
    }

    #[test]
    fn test_unit_links_resolved_and_deduped() {
        let page = page();
        assert_eq!(page.unit_links.len(), 2);
        assert_eq!(
            page.unit_links[0].source_url,
            "https://example.test/wh40k10ed/factions/necrons/datasheets/Overlord"
        );
        assert_eq!(page.unit_links[1].name, "Necron Warriors");
        assert_eq!(page.unit_links[1].slug, "necron-warriors");
    }

    #[test]
    fn test_page_without_heading_has_no_faction() {
        let page = extract_faction("<p>nothing</p>", "x", "u", &Normalizer::builtin());
        assert!(page.faction.is_none());
    }
}
