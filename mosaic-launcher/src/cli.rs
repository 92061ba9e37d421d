use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::tracing_support::{TracingConfig, TracingFormat};

#[derive(Debug, Parser, Clone)]
#[command(name = "mosaic-launcher")]
#[command(author, version, about = "Discover, start and inspect mosaic modules", long_about = None)]
pub struct Cli {
    /// Launch profile (JSON).
    #[arg(short, long, env = "MOSAIC_PROFILE", value_name = "FILE")]
    pub profile: Option<PathBuf>,

    /// Module directory to scan. May be repeated.
    #[arg(short, long = "modules", value_name = "DIR")]
    pub modules: Vec<PathBuf>,

    /// Module to start after discovery. May be repeated.
    #[arg(short, long, value_name = "ID")]
    pub start: Vec<String>,

    /// Module to disable after discovery. May be repeated.
    #[arg(long, value_name = "ID")]
    pub disable: Vec<String>,

    /// Print every registered module before shutting down.
    #[arg(short, long)]
    pub list: bool,

    /// Print the listing as JSON.
    #[arg(long, requires = "list")]
    pub json: bool,

    /// Append lifecycle events to this file as JSON lines.
    #[arg(long, value_name = "FILE")]
    pub events: Option<PathBuf>,

    /// Unload native libraries when their module stops.
    #[arg(long)]
    pub unload_on_stop: bool,

    /// Log output format.
    #[arg(long, value_enum, default_value_t = LogFormat::Pretty, env = "MOSAIC_LOG_FORMAT")]
    pub log_format: LogFormat,

    /// Log level; overrides RUST_LOG.
    #[arg(long, env = "MOSAIC_LOG_LEVEL")]
    pub log_level: Option<tracing::Level>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Pretty,
    Compact,
    Json,
}

impl From<LogFormat> for TracingFormat {
    fn from(format: LogFormat) -> Self {
        match format {
            LogFormat::Pretty => TracingFormat::Pretty,
            LogFormat::Compact => TracingFormat::Compact,
            LogFormat::Json => TracingFormat::Json,
        }
    }
}

impl Cli {
    pub fn tracing_config(&self) -> TracingConfig {
        TracingConfig {
            level: self.log_level,
            format: self.log_format.into(),
            ..Default::default()
        }
    }
}
