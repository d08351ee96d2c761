//! Logging setup for Zero services.
//!
//! Two output formats are supported:
//! - `pretty`: human-readable, ANSI colored, target shown
//! - `json`: one structured object per line with file/line info
//!
//! # Noise Filtering
//!
//! HTTP client internals (hyper, reqwest, h2, rustls) are pinned to `warn`
//! so that per-request chatter from hundreds of enrichment calls does not
//! drown the pipeline's own progress lines. `RUST_LOG` overrides everything.

use crate::config::ObservabilityConfig;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Library modules forced to `warn`.
pub const NOISY_MODULES: &[&str] = &[
    "hyper",
    "hyper_util",
    "reqwest",
    "h2",
    "rustls",
    "tokio_util",
];

/// Build the filter directive string for a base level plus extra exclusions.
pub fn filter_directives(log_level: &str, excluded_targets: &[String]) -> String {
    let mut directives = String::from(log_level);

    for module in NOISY_MODULES {
        directives.push_str(&format!(",{}=warn", module));
    }
    for target in excluded_targets {
        directives.push_str(&format!(",{}=warn", target));
    }

    directives
}

/// Initialize logging with a level and format.
///
/// Safe to call more than once; later calls are ignored.
pub fn init_logging(log_level: &str, log_format: &str) {
    init_with_directives(log_level, log_format, &filter_directives(log_level, &[]));
}

/// Initialize logging from the observability section of the config.
pub fn init_from_config(config: &ObservabilityConfig) {
    let directives = filter_directives(&config.log_level, &config.excluded_targets);
    init_with_directives(&config.log_level, &config.log_format, &directives);
}

fn init_with_directives(log_level: &str, log_format: &str, directives: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directives));
    let subscriber = tracing_subscriber::registry().with(filter);

    if log_format == "json" {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_file(true)
            .with_line_number(true);
        let _ = subscriber.with(fmt_layer).try_init();
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_ansi(true)
            .with_target(true)
            .with_file(false)
            .with_line_number(false);
        let _ = subscriber.with(fmt_layer).try_init();
    }

    tracing::debug!(
        log_level = %log_level,
        log_format = %log_format,
        "Logging initialized"
    );
}
