//! Candidate classification: separates plausible store names from the UI
//! noise that DOM text extraction inevitably drags along.

use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;
use tracing::debug;

use super::block_list::BlockList;
use super::name::{display_form, normalize};

pub const MIN_NAME_CHARS: usize = 2;
pub const MAX_NAME_CHARS: usize = 80;

static PRICE_LIKE: OnceLock<Regex> = OnceLock::new();
static URL_LIKE: OnceLock<Regex> = OnceLock::new();

fn price_like() -> &'static Regex {
    PRICE_LIKE.get_or_init(|| {
        Regex::new(r"^[\p{N}\p{Sc}\p{P}\s]+$").expect("price pattern is a valid regex")
    })
}

fn url_like() -> &'static Regex {
    URL_LIKE.get_or_init(|| {
        Regex::new(r"^(?:[a-z][a-z0-9+.\-]*://|www\.)").expect("url pattern is a valid regex")
    })
}

/// Outcome of a single DOM extraction attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extraction {
    /// Text was read from the element.
    Found(String),
    /// The element carried no usable text.
    NotFound,
    /// The lookup itself failed; the reason is kept for diagnostics.
    Malformed(String),
}

/// Why a candidate was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rejection {
    Length,
    Blocked,
    OwnBrand,
    PriceLike,
    Url,
}

impl Rejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Rejection::Length => "length",
            Rejection::Blocked => "blocked",
            Rejection::OwnBrand => "own_brand",
            Rejection::PriceLike => "price_like",
            Rejection::Url => "url",
        }
    }
}

/// Pure predicate over candidate display names.
#[derive(Debug, Clone)]
pub struct CandidateFilter {
    block_list: BlockList,
    exclude_prefix: String,
}

impl CandidateFilter {
    pub fn new(block_list: BlockList, exclude_prefix: &str) -> Self {
        Self {
            block_list,
            exclude_prefix: exclude_prefix.to_string(),
        }
    }

    pub fn exclude_prefix(&self) -> &str {
        &self.exclude_prefix
    }

    /// Classify `display_name` against this filter's block list and the given
    /// reserved brand prefix. `None` means the name is plausible.
    pub fn rejection(&self, display_name: &str, exclude_prefix: &str) -> Option<Rejection> {
        let display = display_form(display_name);
        let chars = display.chars().count();
        if !(MIN_NAME_CHARS..=MAX_NAME_CHARS).contains(&chars) {
            return Some(Rejection::Length);
        }

        let key = normalize(&display);
        if self.block_list.contains_key(&key) {
            return Some(Rejection::Blocked);
        }

        let prefix = normalize(exclude_prefix);
        if !prefix.is_empty() && key.starts_with(&prefix) {
            return Some(Rejection::OwnBrand);
        }

        if price_like().is_match(&display) {
            return Some(Rejection::PriceLike);
        }

        if url_like().is_match(&key) {
            return Some(Rejection::Url);
        }

        None
    }

    pub fn is_plausible_entity_name(&self, display_name: &str, exclude_prefix: &str) -> bool {
        self.rejection(display_name, exclude_prefix).is_none()
    }

    /// Same as [`is_plausible_entity_name`](Self::is_plausible_entity_name)
    /// with the prefix this filter was configured with.
    pub fn is_plausible(&self, display_name: &str) -> bool {
        self.is_plausible_entity_name(display_name, &self.exclude_prefix)
    }

    /// Fold a page's extraction attempts into a deduplicated list of store
    /// display names. The first display form seen for a key wins and page
    /// order is preserved.
    pub fn reduce<I>(&self, extractions: I) -> CandidateReport
    where
        I: IntoIterator<Item = Extraction>,
    {
        let mut report = CandidateReport::default();
        let mut seen: HashSet<String> = HashSet::new();
        for extraction in extractions {
            match extraction {
                Extraction::Found(text) => {
                    if let Some(reason) = self.rejection(&text, &self.exclude_prefix) {
                        debug!(candidate = %text, reason = reason.as_str(), "candidate rejected");
                        report.rejected += 1;
                        continue;
                    }
                    let display = display_form(&text);
                    if seen.insert(normalize(&display)) {
                        report.accepted.push(display);
                    } else {
                        report.duplicates += 1;
                    }
                }
                Extraction::NotFound => report.not_found += 1,
                Extraction::Malformed(reason) => {
                    debug!(%reason, "extraction failed; skipping element");
                    report.malformed += 1;
                }
            }
        }
        report
    }
}

impl Default for CandidateFilter {
    fn default() -> Self {
        Self::new(BlockList::with_defaults(), "")
    }
}

/// Result of reducing one page's candidates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CandidateReport {
    pub accepted: Vec<String>,
    pub rejected: usize,
    pub duplicates: usize,
    pub not_found: usize,
    pub malformed: usize,
}

impl CandidateReport {
    pub fn attempts(&self) -> usize {
        self.found() + self.not_found + self.malformed
    }

    /// Attempts that produced text, whether or not it was kept.
    pub fn found(&self) -> usize {
        self.accepted.len() + self.rejected + self.duplicates
    }

    /// Extraction failed on the page and nothing was read at all; the page
    /// is unreadable, not empty.
    pub fn only_failures(&self) -> bool {
        self.malformed > 0 && self.found() == 0
    }
}
