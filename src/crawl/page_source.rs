use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::normalization::Extraction;

/// A product discovered on the catalog landing page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductLink {
    pub name: String,
    pub url: String,
}

/// Whatever renders pages and answers DOM queries. The crawl loop only needs
/// raw strings and a way to trigger the next chunk of lazily-loaded content.
#[async_trait::async_trait]
pub trait PageSource: Send {
    async fn navigate(&mut self, url: &str) -> Result<()>;

    /// Trigger one step of lazy loading (a scroll, a "more" click, the next page).
    async fn reveal_more(&mut self) -> Result<()>;

    /// Current content extent, e.g. document height or element count.
    async fn measure_extent(&mut self) -> Result<u64>;

    /// Raw candidate strings on the current page, one attempt per element.
    async fn extract_candidates(&mut self) -> Result<Vec<Extraction>>;

    /// Item count the page itself advertises, if any.
    async fn declared_expected_count(&mut self) -> Result<Option<u32>>;

    /// Product links on the current page, in page order.
    async fn product_links(&mut self) -> Result<Vec<ProductLink>>;
}
