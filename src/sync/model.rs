use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::crawl::completeness::ConfidenceBand;

/// What a product page yielded.
///
/// `NotScraped` and `Empty` must stay distinct: an empty listing prunes
/// every link of the product, a failed scrape must not touch them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "stores", rename_all = "snake_case")]
pub enum ScrapeOutcome {
    NotScraped,
    Empty,
    Stores(BTreeSet<String>),
}

impl ScrapeOutcome {
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let set: BTreeSet<String> = names.into_iter().map(Into::into).collect();
        if set.is_empty() {
            ScrapeOutcome::Empty
        } else {
            ScrapeOutcome::Stores(set)
        }
    }

    pub fn is_scraped(&self) -> bool {
        !matches!(self, ScrapeOutcome::NotScraped)
    }

    pub fn store_count(&self) -> usize {
        match self {
            ScrapeOutcome::Stores(s) => s.len(),
            _ => 0,
        }
    }

    /// Observed store names; empty for both `Empty` and `NotScraped`.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        let set = match self {
            ScrapeOutcome::Stores(s) => Some(s),
            _ => None,
        };
        set.into_iter().flat_map(|s| s.iter().map(String::as_str))
    }
}

/// One product as handed from the crawler to the reconciliation engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapedProduct {
    pub name: String,
    pub source_url: String,
    pub stores: ScrapeOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<ConfidenceBand>,
}

impl ScrapedProduct {
    pub fn new<I, S>(name: &str, source_url: &str, stores: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.to_string(),
            source_url: source_url.to_string(),
            stores: ScrapeOutcome::from_names(stores),
            confidence: None,
        }
    }

    pub fn not_scraped(name: &str, source_url: &str) -> Self {
        Self {
            name: name.to_string(),
            source_url: source_url.to_string(),
            stores: ScrapeOutcome::NotScraped,
            confidence: None,
        }
    }

    pub fn with_confidence(mut self, band: Option<ConfidenceBand>) -> Self {
        self.confidence = band;
        self
    }
}
