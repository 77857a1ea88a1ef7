use anyhow::Result;
use serde::Serialize;
use std::fmt;

use super::db::Db;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CatalogCounts {
    pub issuers: i64,
    pub products: i64,
    pub stores: i64,
    pub links: i64,
}

impl fmt::Display for CatalogCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "CATALOG COUNTS:")?;
        writeln!(f, "issuers: {}", self.issuers)?;
        writeln!(f, "card_products: {}", self.products)?;
        writeln!(f, "stores: {}", self.stores)?;
        write!(f, "card_product_stores: {}", self.links)
    }
}

/// Rows that exist but take part in no link.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OrphanCounts {
    pub products_without_stores: i64,
    pub stores_without_products: i64,
}

fn is_undefined_table_error(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().as_deref() == Some("42P01"),
        _ => false,
    }
}

/// Missing tables count as zero so the command works before migrations.
async fn count(db: &Db, sql: &str) -> Result<i64> {
    match sqlx::query_scalar::<_, i64>(sql)
        .persistent(false)
        .fetch_one(&db.pool)
        .await
    {
        Ok(val) => Ok(val),
        Err(e) if is_undefined_table_error(&e) => Ok(0),
        Err(e) => Err(e.into()),
    }
}

pub async fn catalog_counts(db: &Db) -> Result<CatalogCounts> {
    Ok(CatalogCounts {
        issuers: count(db, "SELECT count(*) FROM issuers").await?,
        products: count(db, "SELECT count(*) FROM card_products").await?,
        stores: count(db, "SELECT count(*) FROM stores").await?,
        links: count(db, "SELECT count(*) FROM card_product_stores").await?,
    })
}

pub async fn orphan_counts(db: &Db) -> Result<OrphanCounts> {
    Ok(OrphanCounts {
        products_without_stores: count(
            db,
            "SELECT count(*) FROM card_products p \
             WHERE NOT EXISTS (SELECT 1 FROM card_product_stores l WHERE l.card_product_id = p.id)",
        )
        .await?,
        stores_without_products: count(
            db,
            "SELECT count(*) FROM stores s \
             WHERE NOT EXISTS (SELECT 1 FROM card_product_stores l WHERE l.store_id = s.id)",
        )
        .await?,
    })
}
