use std::env;

use tracing::level_filters::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

use crate::{LogConfig, LogFormat};

// Import CRATE_NAMES, which lists all crates in the workspace.
include!(concat!(env!("OUT_DIR"), "/constants.gen.rs"));

/// Builds the default filter: `info` for third-party crates, the configured level for ours.
fn default_filter(level: LevelFilter) -> EnvFilter {
    let mut filter = EnvFilter::default().add_directive(LevelFilter::INFO.into());

    for name in CRATE_NAMES {
        if let Ok(directive) = format!("{name}={level}").parse() {
            filter = filter.add_directive(directive);
        }
    }

    // hyper and h2 are very chatty on debug.
    for name in ["hyper", "h2", "tower"] {
        if let Ok(directive) = format!("{name}=warn").parse() {
            filter = filter.add_directive(directive);
        }
    }

    filter
}

/// Initializes the logging system.
///
/// `RUST_LOG` takes precedence over the configured level when set. Calling this function more
/// than once has no effect.
///
/// # Example
///
/// ```
/// let config = meter_log::LogConfig {
///     enable_backtraces: true,
///     ..Default::default()
/// };
///
/// meter_log::init(&config);
/// ```
pub fn init(config: &LogConfig) {
    if config.enable_backtraces {
        // SAFETY: called once during startup before any worker threads are spawned.
        unsafe { env::set_var("RUST_BACKTRACE", "full") };
    }

    let filter = match env::var(EnvFilter::DEFAULT_ENV) {
        Ok(directives) => EnvFilter::new(directives),
        Err(_) => default_filter(config.level.level_filter()),
    };

    let format = match (config.format, console::user_attended()) {
        (LogFormat::Auto, true) | (LogFormat::Pretty, _) => fmt::layer()
            .compact()
            .with_ansi(true)
            .without_time()
            .boxed(),
        (LogFormat::Auto, false) | (LogFormat::Simplified, _) => {
            fmt::layer().with_ansi(false).with_target(true).boxed()
        }
        (LogFormat::Json, _) => fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_list(false)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(format.with_filter(filter))
        .try_init()
        .ok();
}
