//! Slug derivation for natural keys.
//!
//! Every persisted entity is identified by a slug derived from its display
//! name: lowercase, runs of non-alphanumeric characters collapsed into a
//! single `-`, leading and trailing hyphens trimmed. Accented letters are
//! transliterated first, so `"Détachment"` and `"Detachment"` share a slug.

mod transliterate {
    use rslug::slugify;

    pub(super) fn run(input: &str) -> String {
        slugify!(input)
    }
}

/// Derive the natural-key slug for a display name.
pub fn slugify(input: &str) -> String {
    let slug = transliterate::run(input);
    // Transliteration can leave non-ASCII symbols behind; fold them too.
    let mut out = String::with_capacity(slug.len());
    let mut pending_hyphen = false;
    for c in slug.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_hyphen && !out.is_empty() {
                out.push('-');
            }
            pending_hyphen = false;
            out.push(c.to_ascii_lowercase());
        } else {
            pending_hyphen = true;
        }
    }
    out
}

/// Join a parent slug and a child title into a prefixed slug.
pub fn child_slug(parent: &str, title: &str) -> String {
    let child = slugify(title);
    if parent.is_empty() {
        child
    } else if child.is_empty() {
        parent.to_string()
    } else {
        format!("{}-{}", parent, child)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_punctuation_runs_collapse() {
        assert_eq!(
            slugify("T'au Empire's Rules & Regulations"),
            "t-au-empire-s-rules-regulations"
        );
    }

    #[test]
    fn test_edges_trimmed() {
        assert_eq!(slugify("---Test---"), "test");
        assert_eq!(slugify("   "), "");
    }

    #[test]
    fn test_diacritics_fold() {
        assert_eq!(slugify("Détachment"), slugify("Detachment"));
    }

    #[test]
    fn test_child_slug_prefix() {
        assert_eq!(child_slug("core-concepts", "Dice Rolls"), "core-concepts-dice-rolls");
        assert_eq!(child_slug("", "Dice Rolls"), "dice-rolls");
    }
}
