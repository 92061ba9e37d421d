//! Tracing and logging support.
//!
//! The runtime only emits `tracing` events; the launcher owns the subscriber.
//! Logs go to stderr so that listings on stdout stay machine readable.

use tracing::Subscriber;
use tracing_subscriber::{
    layer::SubscriberExt, registry::LookupSpan, util::SubscriberInitExt, util::TryInitError,
    EnvFilter, Layer,
};

/// Tracing output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TracingFormat {
    /// Human-readable multi-line format (default for development).
    Pretty,

    /// Compact single-line format.
    Compact,

    /// JSON format (recommended for production).
    Json,
}

/// Tracing configuration.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Log level filter.
    ///
    /// If None, uses RUST_LOG environment variable or defaults to "info".
    pub level: Option<tracing::Level>,

    /// Output format.
    pub format: TracingFormat,

    /// Include timestamps in output.
    pub timestamps: bool,

    /// Include target module names in output.
    pub target: bool,

    /// Include thread IDs in output.
    pub thread_ids: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            level: None,
            format: TracingFormat::Pretty,
            timestamps: true,
            target: true,
            thread_ids: false,
        }
    }
}

impl TracingConfig {
    /// Filter implied by `level`, falling back to `RUST_LOG` and then "info"
    pub fn filter(&self) -> EnvFilter {
        match self.level {
            Some(level) => EnvFilter::new(level.to_string()),
            None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        }
    }
}

/// Initialize the global subscriber with default settings.
///
/// # Environment Variables
///
/// - `RUST_LOG=debug` - Enable debug logs
/// - `RUST_LOG=mosaic_runtime=trace` - Per-crate filtering
pub fn init_subscriber() -> Result<(), TryInitError> {
    init_subscriber_with_config(TracingConfig::default())
}

/// Initialize the global subscriber with custom configuration.
///
/// Fails if a global subscriber is already installed.
pub fn init_subscriber_with_config(config: TracingConfig) -> Result<(), TryInitError> {
    tracing_subscriber::registry()
        .with(fmt_layer(&config))
        .with(config.filter())
        .try_init()
}

fn fmt_layer<S>(config: &TracingConfig) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    let base = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(config.target)
        .with_thread_ids(config.thread_ids);

    match (config.format, config.timestamps) {
        (TracingFormat::Pretty, true) => base.pretty().boxed(),
        (TracingFormat::Pretty, false) => base.pretty().without_time().boxed(),
        (TracingFormat::Compact, true) => base.compact().boxed(),
        (TracingFormat::Compact, false) => base.compact().without_time().boxed(),
        (TracingFormat::Json, true) => base.json().boxed(),
        (TracingFormat::Json, false) => base.json().without_time().boxed(),
    }
}
