//! Process-wide tracing setup.
//!
//! Metric-like counters (batch sessions, reality walks) are plain `tracing` events under the
//! `adsync::metrics` target, so they can be routed or silenced with the usual filter syntax,
//! e.g. `RUST_LOG=info,adsync::metrics=off`.

use crate::{Error, Result};
use std::str::FromStr;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

pub const METRICS_TARGET: &str = "adsync::metrics";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// One JSON object per event.
    #[default]
    Json,
    /// Human-readable lines.
    Pretty,
}

impl FromStr for LogFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" | "text" => Ok(LogFormat::Pretty),
            other => Err(Error::Validation(format!(
                "ADSYNC_LOG_FORMAT must be 'json' or 'pretty', got '{other}'"
            ))),
        }
    }
}

impl LogFormat {
    pub fn from_env() -> Result<Self> {
        match std::env::var("ADSYNC_LOG_FORMAT") {
            Ok(raw) => raw.parse(),
            Err(_) => Ok(LogFormat::default()),
        }
    }
}

#[tracing::instrument(level = "info", skip_all)]
pub fn init_from_env() -> Result<()> {
    init(LogFormat::from_env()?)
}

/// Install the global subscriber: `RUST_LOG` filter (default `info`) plus a fmt layer.
///
/// Fails with `Error::Conflict` if a global subscriber is already set.
#[tracing::instrument(level = "info")]
pub fn init(format: LogFormat) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    let installed = match format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .try_init(),
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init(),
    };
    installed.map_err(|e| Error::Conflict(format!("tracing already initialized: {e}")))
}
