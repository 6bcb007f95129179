//! Core rules extraction from the markdown form of the rules page.

use crate::models::CoreRule;
use crate::slug::{child_slug, slugify};
use std::collections::HashMap;

/// Sections whose trimmed body is this short are boilerplate.
const MIN_BODY_CHARS: usize = 10;

/// Ordered heading-keyword → category table; the first hit wins.
const CATEGORY_TABLE: &[(&str, &str)] = &[
    ("command", "command"),
    ("battle-shock", "battle-shock"),
    ("morale", "battle-shock"),
    ("movement", "movement"),
    ("move", "movement"),
    ("shoot", "shooting"),
    ("charge", "charge"),
    ("fight", "fight"),
    ("stratagem", "stratagems"),
    ("terrain", "terrain"),
    ("transport", "transports"),
    ("aircraft", "aircraft"),
    ("weapon", "weapons"),
    ("abilit", "abilities"),
    ("deploy", "missions"),
    ("mission", "missions"),
];

const FALLBACK_CATEGORY: &str = "general";

pub fn infer_category(heading: &str) -> &'static str {
    let heading = heading.to_lowercase();
    CATEGORY_TABLE
        .iter()
        .find(|(keyword, _)| heading.contains(keyword))
        .map(|(_, category)| *category)
        .unwrap_or(FALLBACK_CATEGORY)
}

#[derive(Debug, Default)]
struct Section {
    title: String,
    body: Vec<String>,
    subsections: Vec<(String, Vec<String>)>,
}

fn heading(line: &str, level: usize) -> Option<String> {
    let marker = "#".repeat(level);
    let rest = line.strip_prefix(&marker)?;
    if !rest.starts_with(' ') {
        return None;
    }
    let title = rest
        .trim()
        .trim_end_matches('#')
        .trim()
        .trim_matches('*')
        .trim();
    Some(title.to_string())
}

/// Split the rules markdown into sections and subsections.
///
/// A `# ` heading opens a major section and a `## ` heading opens a
/// subsection of it. Records come out in document order, each major
/// section before its subsections.
pub fn extract_rules(markdown: &str, source_url: &str) -> Vec<CoreRule> {
    let mut sections: Vec<Section> = Vec::new();

    for line in markdown.lines() {
        if let Some(title) = heading(line, 1) {
            sections.push(Section {
                title,
                ..Section::default()
            });
        } else if let Some(title) = heading(line, 2) {
            match sections.last_mut() {
                Some(section) => section.subsections.push((title, Vec::new())),
                // A subsection before any major heading stands on its own.
                None => sections.push(Section {
                    title,
                    ..Section::default()
                }),
            }
        } else if let Some(section) = sections.last_mut() {
            match section.subsections.last_mut() {
                Some((_, body)) => body.push(line.to_string()),
                None => section.body.push(line.to_string()),
            }
        }
    }

    let mut rules = Vec::new();
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut order_index = 0i64;
    let mut emit = |slug: String,
                    title: &str,
                    category: &str,
                    subcategory: Option<String>,
                    body: &[String],
                    rules: &mut Vec<CoreRule>| {
        let content = body.join("\n").trim().to_string();
        if content.chars().count() <= MIN_BODY_CHARS {
            return;
        }
        let count = seen.entry(slug.clone()).or_insert(0);
        *count += 1;
        let slug = if *count > 1 {
            format!("{}-{}", slug, count)
        } else {
            slug
        };
        rules.push(CoreRule {
            slug,
            title: title.to_string(),
            category: category.to_string(),
            subcategory,
            content,
            order_index,
            source_url: source_url.to_string(),
        });
        order_index += 1;
    };

    for section in &sections {
        let parent_slug = slugify(&section.title);
        let category = infer_category(&section.title);
        emit(
            parent_slug.clone(),
            &section.title,
            category,
            None,
            &section.body,
            &mut rules,
        );
        for (title, body) in &section.subsections {
            emit(
                child_slug(&parent_slug, title),
                title,
                category,
                Some(section.title.clone()),
                body,
                &mut rules,
            );
        }
    }

    rules
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = "\
Preamble text that is not under any heading.

# Core Concepts

Warhammer is played with models and dice on a battlefield.

## Dice Rolls

Roll a D6. Re-rolls happen before modifiers.

## Empty

tiny

# Movement Phase

## Normal Moves

A unit can move up to its Move characteristic.

## Advance Moves

Roll a D6 and add it to the Move characteristic.

# Shooting Phase

Select a unit and shoot with it.
";

    #[test]
    fn test_sections_and_subsections_in_order() {
        let rules = extract_rules(DOC, "https://example.test/rules");
        let slugs: Vec<&str> = rules.iter().map(|r| r.slug.as_str()).collect();
        assert_eq!(
            slugs,
            vec![
                "core-concepts",
                "core-concepts-dice-rolls",
                "movement-phase-normal-moves",
                "movement-phase-advance-moves",
                "shooting-phase",
            ]
        );
        let indices: Vec<i64> = rules.iter().map(|r| r.order_index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_short_bodies_filtered() {
        let rules = extract_rules(DOC, "u");
        assert!(rules.iter().all(|r| r.title != "Empty"));
        // Movement Phase has no body of its own
        assert!(rules.iter().all(|r| r.slug != "movement-phase"));
    }

    #[test]
    fn test_categories_and_subcategories() {
        let rules = extract_rules(DOC, "u");
        let normal = rules.iter().find(|r| r.title == "Normal Moves").unwrap();
        assert_eq!(normal.category, "movement");
        assert_eq!(normal.subcategory.as_deref(), Some("Movement Phase"));
        let core = rules.iter().find(|r| r.slug == "core-concepts").unwrap();
        assert_eq!(core.category, "general");
        assert_eq!(core.subcategory, None);
        assert_eq!(infer_category("Shooting Phase"), "shooting");
        assert_eq!(infer_category("Command Phase Movement"), "command");
    }

    #[test]
    fn test_duplicate_titles_get_suffix() {
        let doc = "# Terrain\n\nSome terrain text here.\n\n# Terrain\n\nMore terrain text here.\n";
        let rules = extract_rules(doc, "u");
        assert_eq!(rules[0].slug, "terrain");
        assert_eq!(rules[1].slug, "terrain-2");
    }

    #[test]
    fn test_deterministic() {
        assert_eq!(extract_rules(DOC, "u"), extract_rules(DOC, "u"));
    }
}
