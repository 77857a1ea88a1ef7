pub mod config;
pub mod crawl;
pub mod database_ops;
pub mod normalization;
pub mod orchestrator;
pub mod sync;
pub mod tracing;

pub mod util {
    pub mod env;
}

pub use config::SyncConfig;
pub use orchestrator::run_catalog_sync;
