//! Logging initialization using `tracing` and `tracing-subscriber`.
//!
//! The configuration is static and controlled by two environment variables:
//! - `RUST_LOG` selects what is logged (standard `EnvFilter` syntax)
//! - `OFFMAP_FORMAT` selects the output format (`full`, `compact`, `bare`, `pretty`, `json`)

use std::str::FromStr;

use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;
use tracing_subscriber::{EnvFilter, Layer as _, Registry};

/// Log output format, see `OFFMAP_FORMAT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable single-line logs with timestamps and targets.
    Full,
    /// A variant of [`LogFormat::Full`] optimized for short line lengths.
    Compact,
    /// Only level and message, handy when another tool adds timestamps (e.g. systemd or docker).
    Bare,
    /// Multi-line logs for local development.
    Pretty,
    /// Newline-delimited JSON.
    Json,
}

impl Default for LogFormat {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            Self::Pretty
        } else {
            Self::Compact
        }
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "full" => Ok(Self::Full),
            "compact" => Ok(Self::Compact),
            "bare" => Ok(Self::Bare),
            "pretty" | "verbose" => Ok(Self::Pretty),
            "json" | "jsonl" => Ok(Self::Json),
            _ => Err(format!(
                "Invalid log format '{s}'. Valid options: full, compact, bare, pretty, json"
            )),
        }
    }
}

/// Install the global subscriber.
///
/// `log` records emitted by `offmap-mbtiles` are bridged into `tracing` first,
/// so a single filter controls both crates.
pub fn init_tracing(filter: &str, format: Option<String>) {
    // a second initialization (e.g. in tests) is not an error worth reporting
    let _ = tracing_log::LogTracer::builder()
        .with_interest_cache(tracing_log::InterestCacheConfig::default())
        .init();

    let env_filter = EnvFilter::from_str(filter).unwrap_or_else(|_| {
        eprintln!("Warning: Invalid filter string '{filter}', falling back to 'debug'");
        EnvFilter::new("debug")
    });

    let format = format
        .and_then(|s| {
            s.parse::<LogFormat>()
                .map_err(|e| eprintln!("Warning: {e}. Using the default format."))
                .ok()
        })
        .unwrap_or_default();

    let layer = match format {
        LogFormat::Full => tracing_subscriber::fmt::layer()
            .with_span_events(FmtSpan::NONE)
            .with_filter(env_filter)
            .boxed(),
        LogFormat::Compact => tracing_subscriber::fmt::layer()
            .compact()
            .with_span_events(FmtSpan::NONE)
            .with_filter(env_filter)
            .boxed(),
        LogFormat::Bare => tracing_subscriber::fmt::layer()
            .compact()
            .without_time()
            .with_target(false)
            .with_filter(env_filter)
            .boxed(),
        LogFormat::Pretty => tracing_subscriber::fmt::layer()
            .pretty()
            .with_filter(env_filter)
            .boxed(),
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_span_events(FmtSpan::NONE)
            .with_filter(env_filter)
            .boxed(),
    };
    let _ = Registry::default().with(layer).try_init();
}

/// Build the filter string from `RUST_LOG`.
///
/// When `RUST_LOG` sets a level for `offmap=` but says nothing about
/// `offmap_mbtiles=`, the archive crate gets the same level.
#[must_use]
pub fn ensure_mbtiles_log_level_matches(env_filter: Option<String>) -> String {
    const SERVER: &str = "offmap=";
    let Some(rust_log) = env_filter else {
        return "offmap=info,offmap_mbtiles=info".to_string();
    };
    if rust_log.contains("offmap_mbtiles=") {
        return rust_log;
    }
    match rust_log.split(',').find_map(|s| s.strip_prefix(SERVER)) {
        Some(level) => format!("{rust_log},offmap_mbtiles={level}"),
        None => rust_log,
    }
}
