//! End-to-end pipelines: crawl the catalog, reconcile into storage, or both.

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

use crate::config::SyncConfig;
use crate::crawl::{Harvester, HtmlPageSource, PageSource};
use crate::database_ops::{catalog_counts, CatalogStore, Db, Issuer, MemoryCatalog, PgCatalog};
use crate::sync::engine::{CommitScope, ReconciliationEngine, SyncSummary};
use crate::sync::model::ScrapedProduct;
use crate::sync::snapshot::Snapshot;

/// Discover every product on the catalog page and harvest its stores.
/// Finding no products at all aborts before anything is written.
pub async fn crawl<P: PageSource>(
    harvester: &mut Harvester<P>,
    catalog_url: &str,
    issuer_id: &str,
) -> Result<Snapshot> {
    let links = harvester.discover_products(catalog_url).await?;
    if links.is_empty() {
        bail!("no products found on {catalog_url}; website structure may have changed");
    }
    let products = harvester.harvest_all(&links).await;
    let snapshot = Snapshot::new(issuer_id, products);
    log_snapshot(&snapshot);
    Ok(snapshot)
}

/// Crawl with the HTML page source described by `cfg`.
pub async fn scrape(cfg: &SyncConfig) -> Result<Snapshot> {
    let source = HtmlPageSource::new(cfg.html.clone())?;
    let mut harvester = Harvester::new(source, cfg.candidate_filter()?, cfg.harvest.clone());
    crawl(&mut harvester, &cfg.catalog_url, &cfg.issuer.id).await
}

/// Ensure the issuer exists, then reconcile `products` under it.
pub async fn reconcile<S: CatalogStore>(
    store: S,
    issuer: &Issuer,
    scope: CommitScope,
    products: &[ScrapedProduct],
) -> Result<(S, SyncSummary)> {
    let mut engine = ReconciliationEngine::new(store, &issuer.id, scope);
    engine.ensure_issuer(issuer).await?;
    let summary = engine.sync(products).await?;
    Ok((engine.into_store(), summary))
}

pub async fn sync_to_db(cfg: &SyncConfig, db: &Db, products: &[ScrapedProduct]) -> Result<SyncSummary> {
    let (_, summary) = reconcile(PgCatalog::new(db.clone()), &cfg.issuer, cfg.commit_scope, products).await?;
    log_summary(&summary);
    match catalog_counts(db).await {
        Ok(counts) => info!(
            issuers = counts.issuers,
            products = counts.products,
            stores = counts.stores,
            links = counts.links,
            "catalog totals"
        ),
        Err(e) => warn!(error = %e, "could not read catalog totals"),
    }
    Ok(summary)
}

/// Reconcile against an empty in-memory catalog; nothing leaves the process.
pub async fn dry_run(cfg: &SyncConfig, products: &[ScrapedProduct]) -> Result<SyncSummary> {
    let (catalog, summary) = reconcile(MemoryCatalog::new(), &cfg.issuer, cfg.commit_scope, products).await?;
    let counts = catalog.counts();
    info!(
        products = counts.products,
        stores = counts.stores,
        links = counts.links,
        "dry run: catalog would contain"
    );
    log_summary(&summary);
    Ok(summary)
}

/// Load a saved snapshot, refusing one taken for a different issuer.
pub fn load_snapshot(cfg: &SyncConfig, path: &std::path::Path) -> Result<Snapshot> {
    let snapshot = Snapshot::read_from(path)?;
    if snapshot.issuer_id != cfg.issuer.id {
        bail!(
            "snapshot {} belongs to issuer {:?}, configured issuer is {:?}",
            path.display(),
            snapshot.issuer_id,
            cfg.issuer.id
        );
    }
    info!(path = %path.display(), scraped_at = %snapshot.scraped_at, products = snapshot.products.len(), "loaded snapshot");
    Ok(snapshot)
}

/// Full run: crawl, optionally save the snapshot, then reconcile (or dry run
/// when `db` is `None`).
pub async fn run_catalog_sync(
    cfg: &SyncConfig,
    db: Option<&Db>,
    snapshot_out: Option<&std::path::Path>,
) -> Result<SyncSummary> {
    let snapshot = scrape(cfg).await.context("crawling catalog")?;
    if let Some(path) = snapshot_out {
        snapshot.write_to(path)?;
        info!(path = %path.display(), "wrote snapshot");
    }
    match db {
        Some(db) => sync_to_db(cfg, db, &snapshot.products).await,
        None => dry_run(cfg, &snapshot.products).await,
    }
}

pub fn log_snapshot(snapshot: &Snapshot) {
    let scraped = snapshot.products.iter().filter(|p| p.stores.is_scraped()).count();
    let stores: usize = snapshot.products.iter().map(|p| p.stores.store_count()).sum();
    info!(
        products = snapshot.products.len(),
        scraped,
        not_scraped = snapshot.products.len() - scraped,
        store_mentions = stores,
        "crawl finished"
    );
}

pub fn log_summary(summary: &SyncSummary) {
    info!(
        products = summary.products_synced,
        products_created = summary.products_created,
        stores_created = summary.stores_created,
        links_created = summary.links_created,
        links_removed = summary.links_removed,
        "sync summary"
    );
    if !summary.skipped.is_empty() {
        warn!(skipped = ?summary.skipped, "products left untouched because their page was not scraped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawl::page_source::scripted::{ScriptedPage, ScriptedSource};
    use crate::crawl::{HarvestSettings, LoadLimits, ProductLink};
    use crate::normalization::{BlockList, CandidateFilter, Extraction};
    use std::time::Duration;

    fn harvester(source: ScriptedSource) -> Harvester<ScriptedSource> {
        let settings = HarvestSettings {
            limits: LoadLimits::default(),
            settle_delay: Duration::ZERO,
            page_delay: Duration::ZERO,
        };
        Harvester::new(source, CandidateFilter::new(BlockList::with_defaults(), "buyme"), settings)
    }

    fn issuer() -> Issuer {
        Issuer {
            id: "buyme".into(),
            name: "Buyme".into(),
            website_url: None,
            logo_url: None,
        }
    }

    fn found(names: &[&str]) -> Vec<Extraction> {
        names.iter().map(|n| Extraction::Found(n.to_string())).collect()
    }

    #[tokio::test]
    async fn crawl_then_reconcile_end_to_end() {
        let home = ScriptedPage {
            links: vec![
                ProductLink {
                    name: "Food".into(),
                    url: "https://x.test/food".into(),
                },
                ProductLink {
                    name: "Spa".into(),
                    url: "https://x.test/spa".into(),
                },
                ProductLink {
                    name: "Kids".into(),
                    url: "https://x.test/kids".into(),
                },
            ],
            ..Default::default()
        };
        let food = ScriptedPage {
            extents: vec![3, 3, 3],
            candidates: found(&["Acme Café", "Golda", "Buyme Deluxe", "Close"]),
            ..Default::default()
        };
        let spa = ScriptedPage {
            extents: vec![1, 1, 1],
            candidates: found(&["acme   café"]),
            ..Default::default()
        };
        let kids = ScriptedPage {
            fail_navigation: true,
            ..Default::default()
        };
        let mut h = harvester(
            ScriptedSource::default()
                .with_page("https://x.test/", home)
                .with_page("https://x.test/food", food)
                .with_page("https://x.test/spa", spa)
                .with_page("https://x.test/kids", kids),
        );

        let snapshot = crawl(&mut h, "https://x.test/", "buyme").await.unwrap();
        assert_eq!(snapshot.products.len(), 3);

        let (cat, summary) = reconcile(MemoryCatalog::new(), &issuer(), CommitScope::Run, &snapshot.products)
            .await
            .unwrap();
        assert_eq!(summary.products_synced, 2);
        assert_eq!(summary.skipped, vec!["Kids".to_string()]);
        assert_eq!(summary.stores_created, 2);
        let food_id = cat.product("buyme", "Food").unwrap().id;
        assert_eq!(cat.linked_store_names(food_id), vec!["Acme Café", "Golda"]);
        assert!(cat.product("buyme", "Kids").is_none());
    }

    #[tokio::test]
    async fn empty_catalog_aborts_before_any_write() {
        let mut h = harvester(ScriptedSource::default().with_page("https://x.test/", ScriptedPage::default()));
        let err = crawl(&mut h, "https://x.test/", "buyme").await.unwrap_err();
        assert!(err.to_string().contains("website structure may have changed"));
    }
}
