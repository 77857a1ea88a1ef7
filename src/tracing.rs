use tracing_subscriber::{fmt::SubscriberBuilder, EnvFilter};

/// Default filter when `RUST_LOG` is unset: crate at info, noisy HTTP and
/// SQL internals at warn.
pub const DEFAULT_FILTER: &str = "info,giftcard_catalog_sync=info,sqlx=warn,hyper=warn,reqwest=warn,html5ever=error,selectors=error";

/// Sets up the global tracing subscriber with a fmt formatter and env filter.
///
/// `default_filter` applies when `RUST_LOG` is not set.
pub fn init_tracing(default_filter: &str) -> Result<(), anyhow::Error> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    SubscriberBuilder::default()
        .with_env_filter(filter)
        .with_target(true)
        .with_line_number(true)
        .with_file(true)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {}", e))
}
