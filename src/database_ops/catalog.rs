use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use sqlx::{Postgres, Row, Transaction};
use tracing::{debug, instrument};
use uuid::Uuid;

use super::db::Db;

/// Classification written on every product-store link.
pub const DEFAULT_LINK_KIND: &str = "both";

/// The catalog owner (gift-card brand).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issuer {
    pub id: String,
    pub name: String,
    pub website_url: Option<String>,
    pub logo_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreRow {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProductUpsert {
    pub id: Uuid,
    pub created: bool,
}

/// Table-level storage for issuers, products, stores and product-store links.
///
/// Every mutation runs inside the transaction opened by `begin`; calling one
/// without an open transaction is an error.
#[async_trait::async_trait]
pub trait CatalogStore: Send {
    async fn begin(&mut self) -> Result<()>;
    async fn commit(&mut self) -> Result<()>;
    /// No-op when no transaction is open.
    async fn rollback(&mut self) -> Result<()>;

    /// Insert the issuer if missing. Returns true when a row was created.
    async fn upsert_issuer(&mut self, issuer: &Issuer) -> Result<bool>;

    /// Insert-or-update keyed by `(issuer_id, name)`; refreshes the source URL
    /// and verification timestamp of an existing row.
    async fn upsert_product(&mut self, issuer_id: &str, name: &str, source_url: &str) -> Result<ProductUpsert>;

    async fn list_stores(&mut self) -> Result<Vec<StoreRow>>;
    async fn find_store_by_normalized_name(&mut self, normalized: &str) -> Result<Option<Uuid>>;
    async fn create_store(&mut self, display_name: &str) -> Result<Uuid>;

    /// Returns true when the link did not exist before.
    async fn upsert_link(&mut self, product_id: Uuid, store_id: Uuid, kind: &str) -> Result<bool>;
    /// Delete links of `product_id` whose store is not in `keep`.
    async fn delete_links_except(&mut self, product_id: Uuid, keep: &[Uuid]) -> Result<u64>;
    async fn delete_all_links(&mut self, product_id: Uuid) -> Result<u64>;
}

/// Postgres-backed catalog. One pooled connection is pinned for the lifetime
/// of each transaction.
pub struct PgCatalog {
    db: Db,
    tx: Option<Transaction<'static, Postgres>>,
}

impl PgCatalog {
    pub fn new(db: Db) -> Self {
        Self { db, tx: None }
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    fn tx(&mut self) -> Result<&mut Transaction<'static, Postgres>> {
        match self.tx.as_mut() {
            Some(tx) => Ok(tx),
            None => bail!("catalog operation requires an open transaction"),
        }
    }
}

#[async_trait::async_trait]
impl CatalogStore for PgCatalog {
    async fn begin(&mut self) -> Result<()> {
        if self.tx.is_some() {
            bail!("transaction already open");
        }
        self.tx = Some(self.db.pool.begin().await.context("begin transaction")?);
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        match self.tx.take() {
            Some(tx) => tx.commit().await.context("commit transaction"),
            None => bail!("commit without an open transaction"),
        }
    }

    async fn rollback(&mut self) -> Result<()> {
        if let Some(tx) = self.tx.take() {
            tx.rollback().await.context("rollback transaction")?;
        }
        Ok(())
    }

    #[instrument(skip(self, issuer), fields(issuer_id = %issuer.id))]
    async fn upsert_issuer(&mut self, issuer: &Issuer) -> Result<bool> {
        let tx = self.tx()?;
        let res = sqlx::query(
            "INSERT INTO issuers (id, name, website_url, logo_url) VALUES ($1, $2, $3, $4) \
             ON CONFLICT (id) DO NOTHING",
        )
        .persistent(false)
        .bind(&issuer.id)
        .bind(&issuer.name)
        .bind(issuer.website_url.as_deref())
        .bind(issuer.logo_url.as_deref())
        .execute(&mut **tx)
        .await?;
        Ok(res.rows_affected() == 1)
    }

    #[instrument(skip(self, source_url))]
    async fn upsert_product(&mut self, issuer_id: &str, name: &str, source_url: &str) -> Result<ProductUpsert> {
        let tx = self.tx()?;
        // xmax = 0 only for freshly inserted tuples
        let row = sqlx::query(
            "INSERT INTO card_products (id, issuer_id, name, source_url, last_verified_at) \
             VALUES ($1, $2, $3, $4, NOW()) \
             ON CONFLICT (issuer_id, name) \
             DO UPDATE SET source_url = EXCLUDED.source_url, last_verified_at = NOW() \
             RETURNING id, (xmax = 0) AS inserted",
        )
        .persistent(false)
        .bind(Uuid::new_v4())
        .bind(issuer_id)
        .bind(name)
        .bind(source_url)
        .fetch_one(&mut **tx)
        .await?;
        Ok(ProductUpsert {
            id: row.try_get("id")?,
            created: row.try_get("inserted")?,
        })
    }

    async fn list_stores(&mut self) -> Result<Vec<StoreRow>> {
        let tx = self.tx()?;
        let rows = sqlx::query("SELECT id, name FROM stores ORDER BY created_at, id")
            .persistent(false)
            .fetch_all(&mut **tx)
            .await?;
        let mut out = Vec::with_capacity(rows.len());
        for r in rows {
            out.push(StoreRow {
                id: r.try_get("id")?,
                name: r.try_get("name")?,
            });
        }
        Ok(out)
    }

    #[instrument(skip(self))]
    async fn find_store_by_normalized_name(&mut self, normalized: &str) -> Result<Option<Uuid>> {
        let tx = self.tx()?;
        // Mirrors normalization::normalize: NFKC, collapse whitespace, trim, lower-case.
        let row = sqlx::query(
            "SELECT id FROM stores \
             WHERE lower(btrim(regexp_replace(normalize(name, NFKC), '\\s+', ' ', 'g'))) = $1 \
             ORDER BY created_at, id LIMIT 1",
        )
        .persistent(false)
        .bind(normalized)
        .fetch_optional(&mut **tx)
        .await?;
        match row {
            Some(r) => Ok(Some(r.try_get("id")?)),
            None => Ok(None),
        }
    }

    async fn create_store(&mut self, display_name: &str) -> Result<Uuid> {
        let tx = self.tx()?;
        let id = Uuid::new_v4();
        sqlx::query("INSERT INTO stores (id, name) VALUES ($1, $2)")
            .persistent(false)
            .bind(id)
            .bind(display_name)
            .execute(&mut **tx)
            .await?;
        Ok(id)
    }

    async fn upsert_link(&mut self, product_id: Uuid, store_id: Uuid, kind: &str) -> Result<bool> {
        let tx = self.tx()?;
        let res = sqlx::query(
            "INSERT INTO card_product_stores (card_product_id, store_id, type) VALUES ($1, $2, $3) \
             ON CONFLICT (card_product_id, store_id) DO NOTHING",
        )
        .persistent(false)
        .bind(product_id)
        .bind(store_id)
        .bind(kind)
        .execute(&mut **tx)
        .await?;
        Ok(res.rows_affected() == 1)
    }

    async fn delete_links_except(&mut self, product_id: Uuid, keep: &[Uuid]) -> Result<u64> {
        let tx = self.tx()?;
        let res = sqlx::query(
            "DELETE FROM card_product_stores \
             WHERE card_product_id = $1 AND NOT (store_id = ANY($2))",
        )
        .persistent(false)
        .bind(product_id)
        .bind(keep.to_vec())
        .execute(&mut **tx)
        .await?;
        debug!(%product_id, kept = keep.len(), removed = res.rows_affected(), "pruned links");
        Ok(res.rows_affected())
    }

    async fn delete_all_links(&mut self, product_id: Uuid) -> Result<u64> {
        let tx = self.tx()?;
        let res = sqlx::query("DELETE FROM card_product_stores WHERE card_product_id = $1")
            .persistent(false)
            .bind(product_id)
            .execute(&mut **tx)
            .await?;
        Ok(res.rows_affected())
    }
}
