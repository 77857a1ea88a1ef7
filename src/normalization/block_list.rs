//! Known non-entity strings harvested alongside real store names: navigation
//! labels, footer/legal links, generic UI affordances and category labels.
//!
//! The table is data, not code. `BlockList::from_json_file` swaps in a
//! source-specific table; `with_defaults` covers the Hebrew/English gift-card
//! marketplace this crate was first pointed at.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;

use super::name::normalize;

const DEFAULT_ENTRIES: &[&str] = &[
    // navigation / affordances
    "close",
    "menu",
    "search",
    "home",
    "back",
    "next",
    "previous",
    "more",
    "show more",
    "load more",
    "read more",
    "see all",
    "view all",
    "all",
    "login",
    "log in",
    "sign in",
    "sign up",
    "register",
    "logout",
    "cart",
    "checkout",
    "share",
    "buy now",
    "gift card",
    "gift cards",
    "categories",
    "all categories",
    "סגור",
    "תפריט",
    "חיפוש",
    "דף הבית",
    "חזרה",
    "הבא",
    "הקודם",
    "עוד",
    "הצג עוד",
    "טען עוד",
    "לכל העסקים",
    "לכל הקטגוריות",
    "קטגוריות",
    "התחברות",
    "הרשמה",
    "התנתקות",
    "עגלה",
    "לתשלום",
    "שתף",
    "לרכישה",
    "קנה עכשיו",
    "כרטיס מתנה",
    "גיפט קארד",
    "איפה מממשים",
    "רשימת בתי העסק",
    // legal / footer
    "terms of use",
    "terms and conditions",
    "privacy policy",
    "accessibility",
    "accessibility statement",
    "contact us",
    "about",
    "about us",
    "faq",
    "help",
    "customer service",
    "careers",
    "blog",
    "תקנון",
    "תנאי שימוש",
    "מדיניות פרטיות",
    "הצהרת נגישות",
    "נגישות",
    "צור קשר",
    "צרו קשר",
    "אודות",
    "מי אנחנו",
    "שאלות נפוצות",
    "שירות לקוחות",
    "עזרה",
    "דרושים",
    "בלוג",
    // category labels
    "restaurants",
    "fashion",
    "spa",
    "vacations",
    "attractions",
    "beauty",
    "home design",
    "electronics",
    "kids",
    "sports",
    "מסעדות",
    "אופנה",
    "ספא",
    "ספא ופינוק",
    "חופשות",
    "אטרקציות",
    "טיפוח",
    "יופי וטיפוח",
    "עיצוב הבית",
    "אלקטרוניקה",
    "ילדים",
    "ספורט",
    "בתי קפה",
    "קולינריה",
    "הופעות",
    "חוויות",
];

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum BlockListFile {
    Plain(Vec<String>),
    Keyed { entries: Vec<String> },
}

/// Set of normalized strings that are never store names.
#[derive(Debug, Clone, Default)]
pub struct BlockList {
    entries: HashSet<String>,
}

impl BlockList {
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::default().extend(entries)
    }

    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_ENTRIES.iter().copied())
    }

    /// Load a block list from JSON: either a bare array of strings or an
    /// object with an `entries` array.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let parsed: BlockListFile =
            serde_json::from_str(raw).context("block list must be a JSON array or {\"entries\": [..]}")?;
        let entries = match parsed {
            BlockListFile::Plain(v) => v,
            BlockListFile::Keyed { entries } => entries,
        };
        Ok(Self::new(entries))
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading block list {}", path.display()))?;
        Self::from_json_str(&raw).with_context(|| format!("parsing block list {}", path.display()))
    }

    /// Add entries, normalizing them the same way candidates are compared.
    pub fn extend<I, S>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for entry in entries {
            let key = normalize(entry.as_ref());
            if !key.is_empty() {
                self.entries.insert(key);
            }
        }
        self
    }

    /// Membership by normalized key.
    pub fn contains_key(&self, normalized: &str) -> bool {
        self.entries.contains(normalized)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
