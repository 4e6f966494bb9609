use std::env::var;

use tracing::level_filters::LevelFilter;
use tracing_subscriber::{Layer, filter::EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Output format of log lines, selected through `RUST_LOG_FORMAT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

impl LogFormat {
    /// Read the format from the environment, defaulting to compact text.
    pub fn from_env() -> Self {
        var("RUST_LOG_FORMAT").map(|value| Self::parse(&value)).unwrap_or(Self::Compact)
    }

    fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" => Self::Json,
            _ => Self::Compact,
        }
    }
}

/// Initialize tracing with `level` as the default directive.
///
/// `RUST_LOG` still takes precedence; an unparsable level falls back to `info`.
pub fn init_with_level(level: &str) {
    let level = level.parse::<LevelFilter>().unwrap_or(LevelFilter::INFO);
    initialize_tracing(level, LogFormat::from_env());
}

fn initialize_tracing(level: LevelFilter, format: LogFormat) {
    let env_filter = EnvFilter::builder().with_default_directive(level.into()).from_env_lossy();

    let log_layer = match format {
        LogFormat::Json => tracing_subscriber::fmt::layer().json().with_filter(env_filter).boxed(),
        LogFormat::Compact => tracing_subscriber::fmt::layer()
            .compact()
            .with_target(true)
            .with_filter(env_filter)
            .boxed(),
    };

    // A second initialisation (tests, embedded use) keeps the first subscriber.
    let _ = tracing_subscriber::registry().with(log_layer).try_init();
}
