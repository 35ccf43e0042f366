//! Structured logging for the client and the bundled tool servers.
//!
//! Everything goes to **stderr**: when a tool server is spoken to over stdio,
//! stdout carries protocol frames and nothing else.
//!
//! ## Environment Variables
//!
//! - `TOOLRELAY_LOG` or `RUST_LOG`: filter directive (e.g. `toolrelay=debug,warn`)
//! - `TOOLRELAY_LOG_FORMAT`: `pretty`, `compact` or `json`
//!
//! ```bash
//! TOOLRELAY_LOG=toolrelay::mcp=debug toolrelay tools --url http://127.0.0.1:8000/mcp
//! TOOLRELAY_LOG_FORMAT=json toolrelay scheduler --tasks-file tasks.json
//! ```

use std::str::FromStr;

use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    prelude::*,
};

const DEFAULT_FILTER: &str = "toolrelay=info,warn";

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    /// One JSON object per line
    Json,
}

impl FromStr for LogFormat {
    type Err = std::convert::Infallible;

    /// Case-insensitive; anything unrecognised falls back to pretty.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "json" => Self::Json,
            "compact" => Self::Compact,
            _ => Self::Pretty,
        })
    }
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub filter: String,
    pub format: LogFormat,
    /// Emit span open/close events
    pub with_spans: bool,
    /// Include file and line
    pub with_file: bool,
    pub with_target: bool,
    /// Disable ANSI colours (forced for JSON)
    pub ansi: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_FILTER.to_string(),
            format: LogFormat::Pretty,
            with_spans: false,
            with_file: false,
            with_target: true,
            ansi: true,
        }
    }
}

impl LogConfig {
    /// Build from `TOOLRELAY_LOG` / `RUST_LOG` / `TOOLRELAY_LOG_FORMAT`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let filter = lookup("TOOLRELAY_LOG")
            .or_else(|| lookup("RUST_LOG"))
            .unwrap_or_else(|| DEFAULT_FILTER.to_string());
        let format = lookup("TOOLRELAY_LOG_FORMAT")
            .and_then(|s| s.parse().ok())
            .unwrap_or_default();
        Self {
            filter,
            format,
            ..Default::default()
        }
    }

    /// Raise the crate's own level to debug, keeping the rest of the filter.
    pub fn verbose(mut self) -> Self {
        self.filter = format!("toolrelay=debug,{}", self.filter);
        self.with_file = true;
        self
    }

    /// Compact output without colours; used by the stdio tool servers whose
    /// stderr usually ends up in another program's debug log.
    pub fn for_stdio_server(mut self) -> Self {
        if self.format == LogFormat::Pretty {
            self.format = LogFormat::Compact;
        }
        self.ansi = false;
        self
    }
}

/// Install the global subscriber. Later calls are ignored.
pub fn init(config: LogConfig) {
    let env_filter =
        EnvFilter::try_new(&config.filter).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let span_events = if config.with_spans {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let base = fmt::layer()
        .with_writer(std::io::stderr)
        .with_span_events(span_events)
        .with_file(config.with_file)
        .with_line_number(config.with_file)
        .with_target(config.with_target);

    let layer = match config.format {
        LogFormat::Json => base.json().with_ansi(false).boxed(),
        LogFormat::Compact => base.compact().with_ansi(config.ansi).boxed(),
        LogFormat::Pretty => base.pretty().with_ansi(config.ansi).boxed(),
    };

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(layer)
        .try_init();
}
