//! Observability infrastructure.
//!
//! One tracing subscriber for the whole process, initialized once at
//! startup. Log filtering follows `RUST_LOG` with an info-level default.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the global tracing subscriber.
///
/// Must be called once at application startup before any other operations.
pub fn init() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .with(tracing_subscriber::fmt::layer().with_target(true).with_level(true))
        .try_init()?;
    Ok(())
}
