use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use super::model::ScrapedProduct;

/// Scrape results saved to disk so crawling and reconciliation can run
/// separately.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub issuer_id: String,
    pub scraped_at: DateTime<Utc>,
    pub products: Vec<ScrapedProduct>,
}

impl Snapshot {
    pub fn new(issuer_id: &str, products: Vec<ScrapedProduct>) -> Self {
        Self {
            issuer_id: issuer_id.to_string(),
            scraped_at: Utc::now(),
            products,
        }
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).with_context(|| format!("writing snapshot {}", path.display()))
    }

    pub fn read_from(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).with_context(|| format!("reading snapshot {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing snapshot {}", path.display()))
    }
}
