//! Structural extraction: fetched pages in, typed records out.
//!
//! Every extractor is a pure function of its input document. No I/O, no
//! clock, no randomness: identical input always yields identical records.
//!
//! | Page kind | Body used | Extractor |
//! |-----------|-----------|-----------|
//! | Rules     | markdown  | [`rules::extract_rules`] |
//! | Faction   | HTML      | [`faction::extract_faction`] |
//! | Unit      | HTML      | [`unit::extract_unit`] |
//!
//! HTML-derived text passes through [`normalize::Normalizer`] before any
//! pattern matching.

pub(crate) mod consts;
pub mod faction;
pub mod normalize;
pub mod rules;
pub mod unit;
pub mod weapon;

use scraper::{ElementRef, Selector};

use crate::cache::CacheEntry;
use crate::models::ExtractedRecord;
use normalize::{collapse_ws, Normalizer};

/// Which extractor a fetched page is routed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageKind {
    Rules,
    Faction { slug: String },
    Unit,
}

/// Run the extractor for `kind` over a fetched page.
///
/// An HTML page without an HTML body yields nothing; the fetcher never
/// hands out such entries, but a caller may build one by hand.
pub fn extract(kind: &PageKind, entry: &CacheEntry, normalizer: &Normalizer) -> Vec<ExtractedRecord> {
    let url = entry.request_url.as_str();
    match kind {
        PageKind::Rules => rules::extract_rules(&entry.markdown_body, url)
            .into_iter()
            .map(ExtractedRecord::Rule)
            .collect(),
        PageKind::Faction { slug } => match entry.html() {
            Some(html) => {
                let page = faction::extract_faction(html, slug, url, normalizer);
                if page.faction.is_none() && page.detachments.is_empty() {
                    Vec::new()
                } else {
                    vec![ExtractedRecord::FactionPage(Box::new(page))]
                }
            }
            None => Vec::new(),
        },
        PageKind::Unit => match entry.html() {
            Some(html) => unit::extract_unit(html, url, normalizer)
                .into_iter()
                .map(|u| ExtractedRecord::Unit(Box::new(u)))
                .collect(),
            None => Vec::new(),
        },
    }
}

/// Whitespace-collapsed, normalized text content of an element.
pub(crate) fn normalized_text(el: &ElementRef, normalizer: &Normalizer) -> String {
    normalizer.normalize(&collapse_ws(&el.text().collect::<String>()))
}

/// Normalized text of the first descendant matching `selector`, if non-empty.
pub(crate) fn first_text(
    el: &ElementRef,
    selector: &Selector,
    normalizer: &Normalizer,
) -> Option<String> {
    el.select(selector)
        .next()
        .map(|found| normalized_text(&found, normalizer))
        .filter(|text| !text.is_empty())
}

/// Resolve a link target against the page it was found on.
pub(crate) fn resolve_href(base: &str, href: &str) -> String {
    let href = href.trim();
    if href.starts_with("http://") || href.starts_with("https://") {
        return href.to_string();
    }
    let Some(scheme_end) = base.find("://") else {
        return href.to_string();
    };
    if let Some(rest) = href.strip_prefix("//") {
        return format!("{}://{}", &base[..scheme_end], rest);
    }
    let host_end = base[scheme_end + 3..]
        .find('/')
        .map(|i| scheme_end + 3 + i)
        .unwrap_or(base.len());
    if href.starts_with('/') {
        return format!("{}{}", &base[..host_end], href);
    }
    let dir_end = base.rfind('/').filter(|&i| i >= host_end).unwrap_or(base.len());
    let dir = &base[..dir_end];
    format!("{}/{}", dir, href)
}
