//! Tracing subscriber setup.
//!
//! `RUST_LOG` wins over `logging.level`. Output goes to stderr so that
//! CLI output on stdout stays clean.

use anyhow::Result;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

pub fn init(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| anyhow::anyhow!("invalid log filter '{}': {}", config.level, e))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    let installed = match config.format.as_str() {
        "json" => builder.json().try_init(),
        _ => builder.try_init(),
    };
    // A subscriber may already be installed (tests); keep it.
    if let Err(e) = installed {
        tracing::debug!("tracing subscriber already set: {}", e);
    }
    Ok(())
}
