//! In-process [`CatalogStore`] used for dry runs and tests.
//!
//! `begin` snapshots the committed state; `commit` publishes the snapshot and
//! `rollback` discards it, so readers of the committed view only ever see
//! whole transactions.

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use uuid::Uuid;

use super::catalog::{CatalogStore, Issuer, ProductUpsert, StoreRow};
use super::counts::CatalogCounts;
use crate::normalization::normalize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductRecord {
    pub id: Uuid,
    pub issuer_id: String,
    pub name: String,
    pub source_url: String,
    pub last_verified_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
struct CatalogState {
    issuers: BTreeMap<String, Issuer>,
    products: Vec<ProductRecord>,
    stores: Vec<StoreRow>,
    links: BTreeMap<(Uuid, Uuid), String>,
}

#[derive(Debug, Default)]
pub struct MemoryCatalog {
    committed: CatalogState,
    pending: Option<CatalogState>,
    fail_on_store: Option<String>,
    pub commits: usize,
    pub rollbacks: usize,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `create_store` fail for names normalizing to the same key as `name`.
    pub fn fail_on_create_store(mut self, name: &str) -> Self {
        self.fail_on_store = Some(normalize(name));
        self
    }

    /// Simulate a store written by another process: visible to committed
    /// readers and to any open transaction.
    pub fn insert_store_externally(&mut self, name: &str) -> Uuid {
        let row = StoreRow {
            id: Uuid::new_v4(),
            name: name.to_string(),
        };
        self.committed.stores.push(row.clone());
        if let Some(pending) = self.pending.as_mut() {
            pending.stores.push(row.clone());
        }
        row.id
    }

    pub fn in_transaction(&self) -> bool {
        self.pending.is_some()
    }

    pub fn issuers(&self) -> Vec<&Issuer> {
        self.committed.issuers.values().collect()
    }

    pub fn products(&self) -> &[ProductRecord] {
        &self.committed.products
    }

    pub fn product(&self, issuer_id: &str, name: &str) -> Option<&ProductRecord> {
        self.committed
            .products
            .iter()
            .find(|p| p.issuer_id == issuer_id && p.name == name)
    }

    pub fn stores(&self) -> &[StoreRow] {
        &self.committed.stores
    }

    pub fn store_id(&self, name: &str) -> Option<Uuid> {
        let key = normalize(name);
        self.committed
            .stores
            .iter()
            .find(|s| normalize(&s.name) == key)
            .map(|s| s.id)
    }

    /// Store names linked to `product_id`, sorted.
    pub fn linked_store_names(&self, product_id: Uuid) -> Vec<String> {
        let mut names: Vec<String> = self
            .committed
            .links
            .keys()
            .filter(|(p, _)| *p == product_id)
            .filter_map(|(_, s)| self.committed.stores.iter().find(|row| row.id == *s))
            .map(|row| row.name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn link_kind(&self, product_id: Uuid, store_id: Uuid) -> Option<&str> {
        self.committed.links.get(&(product_id, store_id)).map(String::as_str)
    }

    pub fn counts(&self) -> CatalogCounts {
        CatalogCounts {
            issuers: self.committed.issuers.len() as i64,
            products: self.committed.products.len() as i64,
            stores: self.committed.stores.len() as i64,
            links: self.committed.links.len() as i64,
        }
    }

    fn state(&mut self) -> Result<&mut CatalogState> {
        match self.pending.as_mut() {
            Some(s) => Ok(s),
            None => bail!("catalog operation requires an open transaction"),
        }
    }
}

#[async_trait::async_trait]
impl CatalogStore for MemoryCatalog {
    async fn begin(&mut self) -> Result<()> {
        if self.pending.is_some() {
            bail!("transaction already open");
        }
        self.pending = Some(self.committed.clone());
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        match self.pending.take() {
            Some(state) => {
                self.committed = state;
                self.commits += 1;
                Ok(())
            }
            None => bail!("commit without an open transaction"),
        }
    }

    async fn rollback(&mut self) -> Result<()> {
        if self.pending.take().is_some() {
            self.rollbacks += 1;
        }
        Ok(())
    }

    async fn upsert_issuer(&mut self, issuer: &Issuer) -> Result<bool> {
        let state = self.state()?;
        if state.issuers.contains_key(&issuer.id) {
            return Ok(false);
        }
        state.issuers.insert(issuer.id.clone(), issuer.clone());
        Ok(true)
    }

    async fn upsert_product(&mut self, issuer_id: &str, name: &str, source_url: &str) -> Result<ProductUpsert> {
        let state = self.state()?;
        if !state.issuers.contains_key(issuer_id) {
            bail!("unknown issuer {issuer_id}");
        }
        let now = Utc::now();
        if let Some(p) = state
            .products
            .iter_mut()
            .find(|p| p.issuer_id == issuer_id && p.name == name)
        {
            p.source_url = source_url.to_string();
            p.last_verified_at = now;
            return Ok(ProductUpsert {
                id: p.id,
                created: false,
            });
        }
        let id = Uuid::new_v4();
        state.products.push(ProductRecord {
            id,
            issuer_id: issuer_id.to_string(),
            name: name.to_string(),
            source_url: source_url.to_string(),
            last_verified_at: now,
        });
        Ok(ProductUpsert { id, created: true })
    }

    async fn list_stores(&mut self) -> Result<Vec<StoreRow>> {
        Ok(self.state()?.stores.clone())
    }

    async fn find_store_by_normalized_name(&mut self, normalized: &str) -> Result<Option<Uuid>> {
        let state = self.state()?;
        Ok(state
            .stores
            .iter()
            .find(|s| normalize(&s.name) == normalized)
            .map(|s| s.id))
    }

    async fn create_store(&mut self, display_name: &str) -> Result<Uuid> {
        if self.fail_on_store.as_deref() == Some(normalize(display_name).as_str()) {
            bail!("injected failure creating store {display_name:?}");
        }
        let state = self.state()?;
        let id = Uuid::new_v4();
        state.stores.push(StoreRow {
            id,
            name: display_name.to_string(),
        });
        Ok(id)
    }

    async fn upsert_link(&mut self, product_id: Uuid, store_id: Uuid, kind: &str) -> Result<bool> {
        let state = self.state()?;
        if !state.products.iter().any(|p| p.id == product_id) {
            bail!("unknown product {product_id}");
        }
        if !state.stores.iter().any(|s| s.id == store_id) {
            bail!("unknown store {store_id}");
        }
        if state.links.contains_key(&(product_id, store_id)) {
            return Ok(false);
        }
        state.links.insert((product_id, store_id), kind.to_string());
        Ok(true)
    }

    async fn delete_links_except(&mut self, product_id: Uuid, keep: &[Uuid]) -> Result<u64> {
        let state = self.state()?;
        let before = state.links.len();
        state
            .links
            .retain(|(p, s), _| *p != product_id || keep.contains(s));
        Ok((before - state.links.len()) as u64)
    }

    async fn delete_all_links(&mut self, product_id: Uuid) -> Result<u64> {
        self.delete_links_except(product_id, &[]).await
    }
}
