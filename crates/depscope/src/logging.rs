//! Tracing setup for the CLI

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Environment variable overriding the log filter
pub const LOG_ENV: &str = "DEPSCOPE_LOG";

/// Default filter for a number of `-v` flags
pub fn default_filter(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

/// Install the global subscriber; logs go to stderr
///
/// `DEPSCOPE_LOG` takes precedence over the `-v` level.
pub fn init(verbosity: u8) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(verbosity >= 2)
        .with_level(true)
        .compact();

    let filter_layer =
        EnvFilter::try_from_env(LOG_ENV).or_else(|_| EnvFilter::try_new(default_filter(verbosity)))?;

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .try_init()?;

    Ok(())
}
