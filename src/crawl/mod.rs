pub mod completeness;
pub mod harvester;
pub mod html_source;
pub mod page_source;

pub use completeness::{CompletenessDetector, ConfidenceBand, LoadLimits, LoadState, StopReason};
pub use harvester::{HarvestSettings, Harvester, PageLoad};
pub use html_source::{HtmlPageSource, HtmlSourceConfig, Renderer, SelectorSet};
pub use page_source::{PageSource, ProductLink};
