//! Process-wide `tracing` subscriber setup.
//!
//! The library never installs a subscriber on its own. Binaries embedding the
//! broker or an endpoint call [`init_tracing`] once at startup.

use serde::{Deserialize, Serialize};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

/// Installs a global fmt subscriber filtered by `RUST_LOG`, falling back to
/// `default_directives` (e.g. `"info"` or `"majordomo_runtime=debug"`).
///
/// # Errors
///
/// Returns an error if the fallback directives do not parse or a global
/// subscriber is already installed.
pub fn init_tracing(format: LogFormat, default_directives: &str) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_directives)?,
    };

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Compact => registry
            .with(tracing_subscriber::fmt::layer().compact())
            .try_init()?,
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()?,
    }
    Ok(())
}
