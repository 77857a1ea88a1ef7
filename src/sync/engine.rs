use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::collections::BTreeSet;
use std::str::FromStr;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::model::ScrapedProduct;
use super::resolver::StoreResolver;
use crate::database_ops::{CatalogStore, Issuer, DEFAULT_LINK_KIND};
use crate::normalization::display_form;

/// Where commit boundaries fall during a sync pass. Each product is atomic
/// under both.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CommitScope {
    #[default]
    Run,
    PerProduct,
}

impl FromStr for CommitScope {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "run" => Ok(CommitScope::Run),
            "product" | "per_product" | "per-product" => Ok(CommitScope::PerProduct),
            other => bail!("unknown commit scope {other:?} (expected run or product)"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProductSyncReport {
    pub name: String,
    pub product_id: Uuid,
    pub created: bool,
    pub stores: usize,
    pub stores_created: usize,
    pub links_created: usize,
    pub links_removed: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
    pub products_synced: usize,
    pub products_created: usize,
    pub stores_created: usize,
    pub links_created: usize,
    pub links_removed: u64,
    /// Products whose page could not be scraped; their links were left alone.
    pub skipped: Vec<String>,
}

impl SyncSummary {
    fn record(&mut self, r: &ProductSyncReport) {
        self.products_synced += 1;
        if r.created {
            self.products_created += 1;
        }
        self.stores_created += r.stores_created;
        self.links_created += r.links_created;
        self.links_removed += r.links_removed;
    }
}

/// Applies scraped products to the catalog: upsert product, resolve stores,
/// link, prune links that were not observed again.
pub struct ReconciliationEngine<S> {
    store: S,
    resolver: StoreResolver,
    issuer_id: String,
    scope: CommitScope,
}

impl<S: CatalogStore> ReconciliationEngine<S> {
    pub fn new(store: S, issuer_id: &str, scope: CommitScope) -> Self {
        Self {
            store,
            resolver: StoreResolver::new(),
            issuer_id: issuer_id.to_string(),
            scope,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn resolver(&self) -> &StoreResolver {
        &self.resolver
    }

    pub fn into_store(self) -> S {
        self.store
    }

    /// Create the issuer row if it does not exist yet, in its own transaction.
    #[instrument(skip(self, issuer), fields(issuer_id = %issuer.id))]
    pub async fn ensure_issuer(&mut self, issuer: &Issuer) -> Result<bool> {
        self.store.begin().await?;
        match self.store.upsert_issuer(issuer).await {
            Ok(created) => {
                self.store.commit().await?;
                if created {
                    info!(name = %issuer.name, "created issuer");
                }
                Ok(created)
            }
            Err(e) => {
                self.abort().await;
                Err(e.context(format!("ensuring issuer {}", issuer.id)))
            }
        }
    }

    /// Reconcile `products` in input order. Any storage error rolls back the
    /// uncommitted work and ends the pass.
    #[instrument(skip(self, products), fields(issuer_id = %self.issuer_id, products = products.len()))]
    pub async fn sync(&mut self, products: &[ScrapedProduct]) -> Result<SyncSummary> {
        if let Err(e) = self.store.begin().await {
            return Err(e.context("starting sync transaction"));
        }
        match self.run(products).await {
            Ok(summary) => {
                info!(
                    synced = summary.products_synced,
                    created = summary.products_created,
                    skipped = summary.skipped.len(),
                    stores_created = summary.stores_created,
                    links_created = summary.links_created,
                    links_removed = summary.links_removed,
                    "sync complete"
                );
                Ok(summary)
            }
            Err(e) => {
                error!(error = %format!("{e:#}"), "sync failed; rolling back");
                self.abort().await;
                Err(e)
            }
        }
    }

    async fn run(&mut self, products: &[ScrapedProduct]) -> Result<SyncSummary> {
        self.resolver.preload(&mut self.store).await?;
        let mut summary = SyncSummary::default();
        for product in products {
            if !product.stores.is_scraped() {
                warn!(product = %product.name, "page was not scraped; leaving links untouched");
                summary.skipped.push(product.name.clone());
                continue;
            }
            let report = self
                .sync_product(product)
                .await
                .with_context(|| format!("syncing product {:?}", product.name))?;
            summary.record(&report);
            if self.scope == CommitScope::PerProduct {
                self.store.commit().await?;
                self.store.begin().await?;
            }
        }
        self.store.commit().await?;
        Ok(summary)
    }

    async fn sync_product(&mut self, product: &ScrapedProduct) -> Result<ProductSyncReport> {
        let name = display_form(&product.name);
        if name.is_empty() {
            bail!("product name is blank");
        }
        let upsert = self
            .store
            .upsert_product(&self.issuer_id, &name, &product.source_url)
            .await?;
        info!(
            product = %name,
            id = %upsert.id,
            action = if upsert.created { "created" } else { "updated" },
            "upserted product"
        );

        let mut active: BTreeSet<Uuid> = BTreeSet::new();
        let mut stores_created = 0usize;
        for store_name in product.stores.names() {
            if display_form(store_name).is_empty() {
                warn!(product = %name, "ignoring blank store name");
                continue;
            }
            let resolved = self.resolver.resolve_or_create(&mut self.store, store_name).await?;
            if resolved.created {
                stores_created += 1;
            }
            active.insert(resolved.id);
        }

        let mut links_created = 0usize;
        for store_id in &active {
            if self.store.upsert_link(upsert.id, *store_id, DEFAULT_LINK_KIND).await? {
                links_created += 1;
            }
        }

        let keep: Vec<Uuid> = active.iter().copied().collect();
        let links_removed = if keep.is_empty() {
            self.store.delete_all_links(upsert.id).await?
        } else {
            self.store.delete_links_except(upsert.id, &keep).await?
        };
        if links_removed > 0 {
            info!(product = %name, removed = links_removed, "removed outdated store links");
        }

        Ok(ProductSyncReport {
            name,
            product_id: upsert.id,
            created: upsert.created,
            stores: keep.len(),
            stores_created,
            links_created,
            links_removed,
        })
    }

    /// Roll back and drop cached ids that may point at discarded rows.
    async fn abort(&mut self) {
        if let Err(e) = self.store.rollback().await {
            error!(error = %e, "rollback failed");
        }
        self.resolver.clear();
    }
}
