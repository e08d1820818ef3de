//! Process-wide tracing subscriber.

use crate::error::{TelemetryError, TelemetryResult};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "info,obsync=debug";

/// Output format of the log layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per event, with span context.
    Json,
    /// Multi-line human output for local runs.
    Pretty,
}

impl LogFormat {
    /// `OBSYNC_LOG_FORMAT` (`json` / `pretty`) wins; otherwise
    /// `RUST_ENV=production` selects JSON.
    pub fn from_env() -> Self {
        Self::resolve(
            std::env::var("OBSYNC_LOG_FORMAT").ok().as_deref(),
            std::env::var("RUST_ENV").ok().as_deref(),
        )
    }

    fn resolve(explicit: Option<&str>, rust_env: Option<&str>) -> Self {
        match explicit.map(str::trim) {
            Some(f) if f.eq_ignore_ascii_case("json") => Self::Json,
            Some(f) if f.eq_ignore_ascii_case("pretty") => Self::Pretty,
            _ if rust_env == Some("production") => Self::Json,
            _ => Self::Pretty,
        }
    }
}

/// Install the global subscriber. `RUST_LOG` replaces the default filter.
///
/// Fails if a subscriber is already installed.
pub fn init_logging() -> TelemetryResult<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let registry = tracing_subscriber::registry().with(filter);

    let installed = match LogFormat::from_env() {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_current_span(true).with_span_list(true))
            .try_init(),
        LogFormat::Pretty => registry
            .with(fmt::layer().pretty().with_target(true).with_thread_names(true))
            .try_init(),
    };

    installed.map_err(|e| TelemetryError::LoggingInit(e.to_string()))
}
