//! Text normalization applied before any pattern matching.
//!
//! Page text comes from concatenating adjacent markup nodes, which glues
//! labels and values together ("HeroicIntervention", "INFANTRY INFANTRY").
//! [`Normalizer::normalize`] undoes this in three fixed steps:
//!
//! 1. insert a space at every lowercase→uppercase boundary;
//! 2. expand glued terms from the glossary (data, loadable from TOML);
//! 3. collapse immediately repeated uppercase words or phrases.

use anyhow::{Context, Result};
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::LazyLock;

const BUILTIN_GLOSSARY: &str = include_str!("../../data/glossary.toml");

static CASE_BOUNDARY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\p{Ll})(\p{Lu})").unwrap());

/// Longest repeated phrase, in words, that step 3 looks for.
const MAX_REPEAT_WORDS: usize = 4;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Glossary {
    #[serde(default)]
    pub terms: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct Normalizer {
    terms: Vec<(Regex, String)>,
}

impl Normalizer {
    pub fn new(glossary: &Glossary) -> Result<Self> {
        let mut terms = Vec::with_capacity(glossary.terms.len());
        // Longer keys first so a term never pre-empts one that contains it.
        let mut entries: Vec<_> = glossary.terms.iter().collect();
        entries.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then(a.0.cmp(b.0)));
        for (glued, spaced) in entries {
            let pattern = format!(r"(?i)\b{}\b", regex::escape(glued));
            let re = Regex::new(&pattern)
                .with_context(|| format!("Invalid glossary term: '{}'", glued))?;
            terms.push((re, spaced.clone()));
        }
        Ok(Self { terms })
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let glossary: Glossary = toml::from_str(text).context("Failed to parse glossary")?;
        Self::new(&glossary)
    }

    pub fn builtin() -> Self {
        // The embedded table is covered by tests.
        Self::from_toml(BUILTIN_GLOSSARY).unwrap_or_else(|_| Self { terms: Vec::new() })
    }

    /// Load an external glossary, or the built-in one when `path` is `None`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read glossary: {}", path.display()))?;
                Self::from_toml(&text)
            }
            None => Ok(Self::builtin()),
        }
    }

    pub fn term_count(&self) -> usize {
        self.terms.len()
    }

    pub fn normalize(&self, text: &str) -> String {
        let split = CASE_BOUNDARY.replace_all(text, "$1 $2");
        let mut expanded = split.into_owned();
        for (re, spaced) in &self.terms {
            if re.is_match(&expanded) {
                // All-caps matches stay all caps ("DEEPSTRIKE" → "DEEP STRIKE").
                expanded = re
                    .replace_all(&expanded, |caps: &regex::Captures| {
                        if is_upper_word(&caps[0]) {
                            spaced.to_uppercase()
                        } else {
                            spaced.clone()
                        }
                    })
                    .into_owned();
            }
        }
        expanded
            .lines()
            .map(collapse_repeats)
            .collect::<Vec<_>>()
            .join("\n")
            .trim()
            .to_string()
    }
}

fn is_upper_word(word: &str) -> bool {
    word.chars().any(|c| c.is_alphabetic()) && !word.chars().any(|c| c.is_lowercase())
}

fn bare(word: &str) -> &str {
    word.trim_end_matches([',', ';', '.', ':'])
}

/// `"INFANTRYINFANTRY"` → `"INFANTRY"`.
fn undouble(word: &str) -> &str {
    let len = word.len();
    if len >= 4 && len % 2 == 0 && word.is_char_boundary(len / 2) && is_upper_word(word) {
        let (a, b) = word.split_at(len / 2);
        if a == b {
            return a;
        }
    }
    word
}

fn collapse_repeats(line: &str) -> String {
    let words: Vec<&str> = line.split_whitespace().map(undouble).collect();
    let mut out: Vec<&str> = Vec::with_capacity(words.len());
    let mut i = 0;
    while i < words.len() {
        let mut skipped = false;
        for n in (1..=MAX_REPEAT_WORDS).rev() {
            if i + 2 * n > words.len() {
                continue;
            }
            let phrase = &words[i..i + n];
            let next = &words[i + n..i + 2 * n];
            if phrase.iter().all(|w| is_upper_word(w))
                && phrase.iter().zip(next).all(|(a, b)| bare(a) == bare(b))
            {
                // Drop the first copy; the second is considered again.
                i += n;
                skipped = true;
                break;
            }
        }
        if !skipped {
            out.push(words[i]);
            i += 1;
        }
    }
    out.join(" ")
}

/// Collapse all whitespace runs to single spaces.
pub fn collapse_ws(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
