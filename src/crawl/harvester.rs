//! Drives a [`PageSource`] across the catalog: discovers products, runs the
//! completeness-gated reveal loop on each product page and reduces the raw
//! candidates to a clean store set.

use anyhow::{bail, Context, Result};
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

use super::completeness::{CompletenessDetector, ConfidenceBand, LoadLimits, LoadState, StopReason};
use super::page_source::{PageSource, ProductLink};
use crate::normalization::{display_form, CandidateFilter};
use crate::sync::model::ScrapedProduct;

#[derive(Debug, Clone)]
pub struct HarvestSettings {
    pub limits: LoadLimits,
    /// Wait after each reveal before measuring.
    pub settle_delay: Duration,
    /// Politeness delay between product pages.
    pub page_delay: Duration,
}

impl Default for HarvestSettings {
    fn default() -> Self {
        Self {
            limits: LoadLimits::default(),
            settle_delay: Duration::from_millis(2000),
            page_delay: Duration::from_millis(2000),
        }
    }
}

/// How the reveal loop ended on one page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageLoad {
    pub steps: u32,
    pub final_extent: u64,
    pub expected: Option<u32>,
    pub stop_reason: Option<StopReason>,
}

pub struct Harvester<P> {
    source: P,
    filter: CandidateFilter,
    settings: HarvestSettings,
}

impl<P: PageSource> Harvester<P> {
    pub fn new(source: P, filter: CandidateFilter, settings: HarvestSettings) -> Self {
        Self {
            source,
            filter,
            settings,
        }
    }

    pub fn source(&self) -> &P {
        &self.source
    }

    pub fn into_source(self) -> P {
        self.source
    }

    /// Product links on the catalog landing page, first URL per name.
    #[instrument(skip(self))]
    pub async fn discover_products(&mut self, catalog_url: &str) -> Result<Vec<ProductLink>> {
        self.source
            .navigate(catalog_url)
            .await
            .with_context(|| format!("loading catalog page {catalog_url}"))?;
        let raw = self.source.product_links().await?;

        let mut seen: HashSet<String> = HashSet::new();
        let mut out = Vec::with_capacity(raw.len());
        for link in raw {
            let name = display_form(&link.name);
            let url = link.url.trim();
            if name.is_empty() || url.is_empty() {
                continue;
            }
            if seen.insert(name.clone()) {
                info!(product = %name, url, "found product");
                out.push(ProductLink {
                    name,
                    url: url.to_string(),
                });
            }
        }
        info!(count = out.len(), "discovered products");
        Ok(out)
    }

    /// Reveal content until the completeness detector allows stopping.
    pub async fn load_all(&mut self) -> Result<PageLoad> {
        let expected = match self.source.declared_expected_count().await {
            Ok(n) => n,
            Err(e) => {
                debug!(error = %e, "no declared item count");
                None
            }
        };

        let mut detector = CompletenessDetector::new(self.settings.limits);
        let mut before = self.source.measure_extent().await?;
        let mut step = 0u32;
        loop {
            step += 1;
            self.source.reveal_more().await?;
            if !self.settings.settle_delay.is_zero() {
                sleep(self.settings.settle_delay).await;
            }
            let after = self.source.measure_extent().await?;
            let state = LoadState {
                step,
                extent_before: before,
                extent_after: after,
                expected_count: expected,
            };
            if detector.should_stop_loading(&state) {
                return Ok(PageLoad {
                    steps: step,
                    final_extent: after,
                    expected,
                    stop_reason: detector.stop_reason(),
                });
            }
            if detector.confirming() {
                debug!(step, extent = after, "extent unchanged; confirming");
            }
            before = after;
        }
    }

    /// Scrape one product page. Failures are reported as `NotScraped`,
    /// never as an empty store set.
    #[instrument(skip(self, link), fields(product = %link.name))]
    pub async fn harvest_product(&mut self, link: &ProductLink) -> ScrapedProduct {
        match self.try_harvest(link).await {
            Ok(product) => product,
            Err(e) => {
                warn!(url = %link.url, error = %e, "product page could not be scraped");
                ScrapedProduct::not_scraped(&link.name, &link.url)
            }
        }
    }

    async fn try_harvest(&mut self, link: &ProductLink) -> Result<ScrapedProduct> {
        self.source.navigate(&link.url).await?;
        let load = self.load_all().await?;
        let extractions = self.source.extract_candidates().await?;
        let report = self.filter.reduce(extractions);
        if report.only_failures() {
            bail!("all {} extraction attempts failed", report.malformed);
        }

        let band = ConfidenceBand::classify(load.expected, report.accepted.len());
        info!(
            steps = load.steps,
            stop = load.stop_reason.map(|r| r.as_str()).unwrap_or("none"),
            found = report.accepted.len(),
            rejected = report.rejected,
            duplicates = report.duplicates,
            failed = report.malformed,
            "found stores"
        );
        match (band, load.expected) {
            (Some(ConfidenceBand::High), Some(expected)) => {
                info!(expected, found = report.accepted.len(), "listing looks complete")
            }
            (Some(b), Some(expected)) => warn!(
                expected,
                found = report.accepted.len(),
                confidence = b.as_str(),
                "listing may be incomplete"
            ),
            _ => {}
        }

        Ok(ScrapedProduct::new(&link.name, &link.url, report.accepted).with_confidence(band))
    }

    /// Scrape every product in order, pausing between pages.
    pub async fn harvest_all(&mut self, links: &[ProductLink]) -> Vec<ScrapedProduct> {
        let mut out = Vec::with_capacity(links.len());
        for (i, link) in links.iter().enumerate() {
            if i > 0 && !self.settings.page_delay.is_zero() {
                sleep(self.settings.page_delay).await;
            }
            info!(product = %link.name, "processing product");
            out.push(self.harvest_product(link).await);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawl::page_source::scripted::{ScriptedPage, ScriptedSource};
    use crate::normalization::{BlockList, Extraction};
    use crate::sync::model::ScrapeOutcome;

    fn settings() -> HarvestSettings {
        HarvestSettings {
            limits: LoadLimits::default(),
            settle_delay: Duration::ZERO,
            page_delay: Duration::ZERO,
        }
    }

    fn harvester(source: ScriptedSource) -> Harvester<ScriptedSource> {
        Harvester::new(source, CandidateFilter::new(BlockList::with_defaults(), "buyme"), settings())
    }

    fn link(name: &str, url: &str) -> ProductLink {
        ProductLink {
            name: name.into(),
            url: url.into(),
        }
    }

    #[tokio::test]
    async fn discovery_keeps_first_url_per_name() {
        let home = ScriptedPage {
            links: vec![
                link(" Spa ", "https://x.test/categories/spa"),
                link("", "https://x.test/categories/blank"),
                link("Spa", "https://x.test/categories/spa-2"),
                link("Food", "https://x.test/categories/food"),
            ],
            ..Default::default()
        };
        let mut h = harvester(ScriptedSource::default().with_page("https://x.test/", home));
        let links = h.discover_products("https://x.test/").await.unwrap();
        assert_eq!(
            links,
            vec![
                link("Spa", "https://x.test/categories/spa"),
                link("Food", "https://x.test/categories/food"),
            ]
        );
    }

    #[tokio::test]
    async fn load_loop_stops_on_confirmed_stagnation() {
        let page = ScriptedPage {
            extents: vec![100, 250, 400, 400, 400],
            ..Default::default()
        };
        let mut h = harvester(ScriptedSource::default().with_page("p", page));
        h.source.navigate("p").await.unwrap();
        let load = h.load_all().await.unwrap();
        assert_eq!(load.steps, 4);
        assert_eq!(load.final_extent, 400);
        assert_eq!(load.stop_reason, Some(StopReason::Stagnated));
        assert_eq!(h.source().total_reveals, 4);
    }

    #[tokio::test]
    async fn harvest_filters_and_dedupes_candidates() {
        let page = ScriptedPage {
            extents: vec![10, 10, 10],
            candidates: vec![
                Extraction::Found("Acme Café".into()),
                Extraction::Found("acme   café".into()),
                Extraction::Found("Close".into()),
                Extraction::Found("₪120".into()),
                Extraction::Malformed("detached".into()),
                Extraction::Found("Golda".into()),
            ],
            expected: Some(2),
            ..Default::default()
        };
        let mut h = harvester(ScriptedSource::default().with_page("https://x.test/spa", page));
        let product = h.harvest_product(&link("Spa", "https://x.test/spa")).await;
        assert_eq!(product.stores, ScrapeOutcome::from_names(["Acme Café", "Golda"]));
        assert_eq!(product.confidence, Some(ConfidenceBand::High));
    }

    #[tokio::test]
    async fn failed_page_is_not_scraped_rather_than_empty() {
        let broken = ScriptedPage {
            fail_navigation: true,
            ..Default::default()
        };
        let empty = ScriptedPage {
            extents: vec![5],
            ..Default::default()
        };
        let mut h = harvester(
            ScriptedSource::default()
                .with_page("https://x.test/a", broken)
                .with_page("https://x.test/b", empty),
        );
        let out = h
            .harvest_all(&[link("A", "https://x.test/a"), link("B", "https://x.test/b")])
            .await;
        assert_eq!(out[0].stores, ScrapeOutcome::NotScraped);
        assert_eq!(out[1].stores, ScrapeOutcome::Empty);
        assert_eq!(h.source().visited, vec!["https://x.test/a", "https://x.test/b"]);
    }

    #[tokio::test]
    async fn page_of_failed_extractions_is_not_scraped() {
        let drifted = ScriptedPage {
            extents: vec![40],
            candidates: (0..40).map(|_| Extraction::Malformed("selector drift".into())).collect(),
            ..Default::default()
        };
        let mixed = ScriptedPage {
            extents: vec![3],
            candidates: vec![
                Extraction::Malformed("stale".into()),
                Extraction::Found("Close".into()),
                Extraction::NotFound,
            ],
            ..Default::default()
        };
        let mut h = harvester(
            ScriptedSource::default()
                .with_page("https://x.test/drift", drifted)
                .with_page("https://x.test/mixed", mixed),
        );
        let out = h
            .harvest_all(&[link("Drift", "https://x.test/drift"), link("Mixed", "https://x.test/mixed")])
            .await;
        assert_eq!(out[0].stores, ScrapeOutcome::NotScraped);
        // something was read, it just did not survive filtering
        assert_eq!(out[1].stores, ScrapeOutcome::Empty);
    }
}
