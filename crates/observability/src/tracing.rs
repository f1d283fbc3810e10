//! JSON log output for the worker process.

use tracing_subscriber::EnvFilter;

/// Used when `RUST_LOG` is unset or unparsable. Driver crates are noisy at
/// `info` (one line per query / SMTP exchange).
pub const DEFAULT_DIRECTIVES: &str = "info,sqlx=warn,lettre=warn,hyper=warn";

/// `RUST_LOG` if it parses, else `default_directives`.
pub fn env_filter(default_directives: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives))
}

/// Install the global subscriber.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init() {
    init_with(DEFAULT_DIRECTIVES);
}

pub fn init_with(default_directives: &str) {
    // Event fields at the top level; the enclosing span (dispatcher, job) alongside.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter(default_directives))
        .json()
        .flatten_event(true)
        .with_current_span(true)
        .with_span_list(false)
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false)
        .try_init();
}
