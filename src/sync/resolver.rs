//! Store identity cache: maps normalized store names to store ids for one run.

use anyhow::{bail, Result};
use std::collections::HashMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::database_ops::CatalogStore;
use crate::normalization::name::{NameKey, NEAR_DUPLICATE_SIMILARITY};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolverStats {
    pub cache_hits: usize,
    pub found_in_storage: usize,
    pub created: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub id: Uuid,
    pub created: bool,
}

/// Owned by the reconciliation engine; rebuilt from storage by `preload`
/// at the start of every run. Storage stays authoritative: a cache miss is
/// always checked against it before a store is created.
#[derive(Debug, Default)]
pub struct StoreResolver {
    by_key: HashMap<String, Uuid>,
    stats: ResolverStats,
}

impl StoreResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the cache with every existing store row. When two rows share a
    /// normalized name the first one listed wins.
    pub async fn preload<S: CatalogStore + ?Sized>(&mut self, store: &mut S) -> Result<usize> {
        self.by_key.clear();
        for row in store.list_stores().await? {
            let key = NameKey::new(&row.name);
            if key.is_empty() {
                continue;
            }
            match self.by_key.get(key.key()).copied() {
                Some(existing) if existing != row.id => {
                    warn!(name = %row.name, kept = %existing, ignored = %row.id, "duplicate store rows share a normalized name");
                }
                Some(_) => {}
                None => {
                    self.by_key.insert(key.key().to_string(), row.id);
                }
            }
        }
        info!(stores = self.by_key.len(), "store cache preloaded");
        Ok(self.by_key.len())
    }

    pub async fn resolve_or_create<S: CatalogStore + ?Sized>(
        &mut self,
        store: &mut S,
        display_name: &str,
    ) -> Result<Resolution> {
        let name = NameKey::new(display_name);
        if name.is_empty() {
            bail!("cannot resolve a blank store name");
        }
        if let Some(id) = self.by_key.get(name.key()) {
            self.stats.cache_hits += 1;
            return Ok(Resolution { id: *id, created: false });
        }

        if let Some(id) = store.find_store_by_normalized_name(name.key()).await? {
            debug!(store = name.display(), %id, "store found in storage, not in cache");
            self.stats.found_in_storage += 1;
            self.by_key.insert(name.key().to_string(), id);
            return Ok(Resolution { id, created: false });
        }

        if let Some((similar, score)) = self.closest(&name) {
            if score >= NEAR_DUPLICATE_SIMILARITY {
                warn!(store = name.display(), similar_to = %similar, score, "possible duplicate store");
            }
        }
        let id = store.create_store(name.display()).await?;
        info!(store = name.display(), %id, "created store");
        self.stats.created += 1;
        self.by_key.insert(name.key().to_string(), id);
        Ok(Resolution { id, created: true })
    }

    fn closest(&self, name: &NameKey) -> Option<(String, f64)> {
        self.by_key
            .keys()
            .map(|k| (k, name.similarity(k)))
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(k, s)| (k.clone(), s))
    }

    /// Forget everything; used after a rollback discarded rows the cache may
    /// point at.
    pub fn clear(&mut self) {
        self.by_key.clear();
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    pub fn stats(&self) -> ResolverStats {
        self.stats
    }
}
