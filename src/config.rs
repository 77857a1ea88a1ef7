use anyhow::{Context, Result};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

use crate::crawl::{HarvestSettings, HtmlSourceConfig, LoadLimits, Renderer, SelectorSet};
use crate::database_ops::Issuer;
use crate::normalization::{BlockList, CandidateFilter};
use crate::sync::engine::CommitScope;
use crate::util::env::{env_opt, init_env};

const DEFAULT_ISSUER_ID: &str = "buyme";
const DEFAULT_ISSUER_NAME: &str = "Buyme";
const DEFAULT_WEBSITE_URL: &str = "https://buyme.co.il/";
const DEFAULT_LOGO_URL: &str = "https://buyme.co.il/logo.png";

/// Keys echoed (redacted) by the CLI preflight.
pub const LOGGED_KEYS: &[&str] = &[
    "DATABASE_URL",
    "ISSUER_ID",
    "CATALOG_URL",
    "EXCLUDE_PREFIX",
    "BLOCK_LIST_PATH",
    "BROWSERLESS_URL",
    "BROWSERLESS_TOKEN",
    "PAGE_PARAM",
    "PAGE_DELAY_MS",
    "SETTLE_DELAY_MS",
    "COMMIT_SCOPE",
    "AUTO_MIGRATE",
];

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub max_connections: u32,
    pub issuer: Issuer,
    pub catalog_url: String,
    /// Store candidates starting with this (normalized) prefix are the
    /// issuer's own branding.
    pub exclude_prefix: String,
    /// JSON block list replacing the built-in one.
    pub block_list_path: Option<PathBuf>,
    pub html: HtmlSourceConfig,
    pub harvest: HarvestSettings,
    pub commit_scope: CommitScope,
}

impl SyncConfig {
    pub fn from_env() -> Result<Self> {
        init_env();
        Self::from_lookup(env_opt)
    }

    /// Build from any key lookup; missing and blank values fall back to
    /// defaults, malformed ones are errors.
    pub fn from_lookup<F>(get: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |k: &str| get(k).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let issuer_id = get("ISSUER_ID").unwrap_or_else(|| DEFAULT_ISSUER_ID.to_string());
        let website_url = get("ISSUER_WEBSITE_URL").unwrap_or_else(|| DEFAULT_WEBSITE_URL.to_string());
        let issuer = Issuer {
            name: get("ISSUER_NAME").unwrap_or_else(|| DEFAULT_ISSUER_NAME.to_string()),
            website_url: Some(website_url.clone()),
            logo_url: Some(get("ISSUER_LOGO_URL").unwrap_or_else(|| DEFAULT_LOGO_URL.to_string())),
            id: issuer_id.clone(),
        };
        let catalog_url = get("CATALOG_URL").unwrap_or(website_url);
        url::Url::parse(&catalog_url).with_context(|| format!("CATALOG_URL is not a valid URL: {catalog_url}"))?;

        let renderer = match get("BROWSERLESS_URL") {
            Some(base_url) => Renderer::Browserless {
                base_url,
                token: get("BROWSERLESS_TOKEN"),
            },
            None => Renderer::Direct,
        };
        let defaults = SelectorSet::default();
        let selectors = SelectorSet {
            product_link: get("PRODUCT_LINK_SELECTOR").unwrap_or(defaults.product_link),
            store_link: get("STORE_LINK_SELECTOR").unwrap_or(defaults.store_link),
            store_heading: get("STORE_HEADING_SELECTOR").unwrap_or(defaults.store_heading),
            expected_count: get("EXPECTED_COUNT_SELECTOR").or(defaults.expected_count),
        };
        selectors.validate()?;
        let html = HtmlSourceConfig {
            renderer,
            selectors,
            page_param: get("PAGE_PARAM"),
            ..HtmlSourceConfig::default()
        };

        let harvest = HarvestSettings {
            limits: LoadLimits::default(),
            settle_delay: Duration::from_millis(parse_or(&get, "SETTLE_DELAY_MS", 2000u64)?),
            page_delay: Duration::from_millis(parse_or(&get, "PAGE_DELAY_MS", 2000u64)?),
        };

        Ok(Self {
            max_connections: parse_or(&get, "DB_MAX_CONNECTIONS", 5u32)?,
            exclude_prefix: get("EXCLUDE_PREFIX").unwrap_or_else(|| issuer_id.clone()),
            block_list_path: get("BLOCK_LIST_PATH").map(PathBuf::from),
            commit_scope: parse_or(&get, "COMMIT_SCOPE", CommitScope::Run)?,
            issuer,
            catalog_url,
            html,
            harvest,
        })
    }

    pub fn block_list(&self) -> Result<BlockList> {
        match &self.block_list_path {
            Some(path) => {
                let list = BlockList::from_json_file(path)?;
                info!(path = %path.display(), entries = list.len(), "loaded block list");
                Ok(list)
            }
            None => Ok(BlockList::with_defaults()),
        }
    }

    pub fn candidate_filter(&self) -> Result<CandidateFilter> {
        Ok(CandidateFilter::new(self.block_list()?, &self.exclude_prefix))
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("invalid {key}={raw:?}: {e}")),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> Result<SyncConfig> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        SyncConfig::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults_target_buyme() {
        let c = config(&[]).unwrap();
        assert_eq!(c.issuer.id, "buyme");
        assert_eq!(c.catalog_url, "https://buyme.co.il/");
        assert_eq!(c.exclude_prefix, "buyme");
        assert_eq!(c.commit_scope, CommitScope::Run);
        assert_eq!(c.harvest.page_delay, Duration::from_millis(2000));
        assert_eq!(c.html.renderer, Renderer::Direct);
        assert_eq!(c.max_connections, 5);
    }

    #[test]
    fn overrides_are_applied() {
        let c = config(&[
            ("ISSUER_ID", "giftly"),
            ("CATALOG_URL", "https://giftly.test/all"),
            ("BROWSERLESS_URL", "https://chrome.test"),
            ("BROWSERLESS_TOKEN", "t0k"),
            ("PAGE_DELAY_MS", "0"),
            ("COMMIT_SCOPE", "product"),
            ("PAGE_PARAM", "page"),
            ("STORE_LINK_SELECTOR", "a.store"),
            ("EXCLUDE_PREFIX", "   "),
        ])
        .unwrap();
        assert_eq!(c.exclude_prefix, "giftly");
        assert_eq!(c.catalog_url, "https://giftly.test/all");
        assert_eq!(c.harvest.page_delay, Duration::ZERO);
        assert_eq!(c.commit_scope, CommitScope::PerProduct);
        assert_eq!(c.html.page_param.as_deref(), Some("page"));
        assert_eq!(c.html.selectors.store_link, "a.store");
        assert_eq!(
            c.html.renderer,
            Renderer::Browserless {
                base_url: "https://chrome.test".into(),
                token: Some("t0k".into())
            }
        );
    }

    #[test]
    fn malformed_values_are_errors() {
        assert!(config(&[("PAGE_DELAY_MS", "soon")]).is_err());
        assert!(config(&[("COMMIT_SCOPE", "weekly")]).is_err());
        assert!(config(&[("CATALOG_URL", "not a url")]).is_err());
        assert!(config(&[("STORE_LINK_SELECTOR", "a[")]).is_err());
    }

    #[test]
    fn block_list_file_replaces_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("block.json");
        std::fs::write(&path, r#"["Promo", "Sale"]"#).unwrap();
        let c = config(&[("BLOCK_LIST_PATH", path.to_str().unwrap())]).unwrap();
        let filter = c.candidate_filter().unwrap();
        assert!(!filter.is_plausible("Promo"));
        assert!(filter.is_plausible("Golda"));
        assert_eq!(c.block_list().unwrap().len(), 2);
    }
}
