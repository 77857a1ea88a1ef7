pub mod catalog;
pub mod counts;
pub mod db;
pub mod memory;

pub use catalog::{CatalogStore, Issuer, PgCatalog, ProductUpsert, StoreRow, DEFAULT_LINK_KIND};
pub use counts::{catalog_counts, orphan_counts, CatalogCounts, OrphanCounts};
pub use db::Db;
pub use memory::MemoryCatalog;
