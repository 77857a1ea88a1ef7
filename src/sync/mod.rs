pub mod engine;
pub mod model;
pub mod resolver;
pub mod snapshot;

pub use engine::{CommitScope, ProductSyncReport, ReconciliationEngine, SyncSummary};
pub use model::{ScrapeOutcome, ScrapedProduct};
pub use resolver::{Resolution, ResolverStats, StoreResolver};
pub use snapshot::Snapshot;
