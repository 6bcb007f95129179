//! Weapon name cleanup.
//!
//! Datasheet markup prints weapon abilities as tags right after the weapon
//! name, and text extraction glues them on: `"Lascannon heavy"`,
//! `"Boltgunrapid fire 1, lethal hits"`. [`clean_weapon_name`] strips a tail
//! made only of known ability keywords and returns it as a bracketed
//! annotation.

use regex::Regex;
use std::sync::LazyLock;

const ABILITY: &str = r"(?:assault|heavy|pistol|torrent|blast|lance|precision|hazardous|psychic|ignores cover|indirect fire|lethal hits|devastating wounds|twin-linked|extra attacks|one shot|conversion|rapid fire (?:\d+|d\d+(?:\+\d+)?)|sustained hits (?:\d+|d\d+)|melta (?:\d+|d\d+)|anti-[a-z]+(?:[ -][a-z]+)? \d\+)";

static ABILITY_ONE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!(r"^{}$", ABILITY)).unwrap());

/// Abilities that double as weapon nouns ("Plasma pistol", "Power lance").
/// They are only stripped when glued directly onto the previous word.
const NOUN_ABILITIES: &[&str] = &["pistol", "lance"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanedWeapon {
    pub name: String,
    pub abilities: Option<String>,
}

pub fn clean_weapon_name(raw: &str) -> CleanedWeapon {
    let raw = raw.trim();
    let lower = raw.to_lowercase();
    let unchanged = || CleanedWeapon {
        name: raw.to_string(),
        abilities: None,
    };
    // Byte offsets stay aligned only if lowercasing kept the length.
    if lower.len() != raw.len() {
        return unchanged();
    }

    // Peel tokens off the right end. A token separated by whitespace or a
    // comma may have more before it; a token glued onto a word ends the tail.
    let mut tokens: Vec<&str> = Vec::new();
    let mut cut = None;
    let mut end = lower.len();
    while let Some(pos) = last_token_start(&lower, end) {
        // An ability word at the very start is part of the name ("Assault cannon").
        if pos == 0 || !raw.is_char_boundary(pos) {
            break;
        }
        let token = &lower[pos..end];
        let prev = lower[..pos].chars().next_back().unwrap_or(' ');
        if prev.is_alphanumeric() {
            tokens.push(token);
            cut = Some(pos);
            break;
        }
        if !(prev.is_whitespace() || prev == ',') || NOUN_ABILITIES.contains(&token) {
            break;
        }
        let rest = lower[..pos].trim_end_matches(|c: char| c.is_whitespace() || c == ',');
        if rest.is_empty() {
            break;
        }
        tokens.push(token);
        end = rest.len();
        cut = Some(end);
    }

    let Some(cut) = cut else {
        return unchanged();
    };
    let name = raw[..cut].trim_end().trim_end_matches([',', '-']).trim_end();
    if name.is_empty() {
        return unchanged();
    }
    let annotation = tokens
        .iter()
        .rev()
        .map(|t| t.to_uppercase())
        .collect::<Vec<_>>()
        .join(", ");
    CleanedWeapon {
        name: name.to_string(),
        abilities: Some(format!("[{}]", annotation)),
    }
}

/// Start of the shortest ability token ending exactly at `end`.
fn last_token_start(lower: &str, end: usize) -> Option<usize> {
    let head = &lower[..end];
    head.char_indices()
        .rev()
        .map(|(i, _)| i)
        .find(|&i| ABILITY_ONE.is_match(&head[i..]))
}
