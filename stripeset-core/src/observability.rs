//! Structured logging setup and span helpers

use tracing::Span;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

use crate::config::LoggingConfig;
use crate::error::{StripesetError, StripesetResult};

/// Initialize tracing; `RUST_LOG` takes precedence over the configured filter
pub fn init_tracing(config: &LoggingConfig) -> StripesetResult<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .map_err(|e| StripesetError::configuration("logging.filter", e.to_string()))?;

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(config.thread_ids);

    Registry::default()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| StripesetError::internal(format!("tracing already initialized: {}", e)))
}

/// Create a span for one operation
#[inline]
pub fn fop_span(fop: u64, name: &str) -> Span {
    tracing::debug_span!(
        "fop",
        id = fop,
        name = %name,
        state = tracing::field::Empty,
    )
}
