use tracing_subscriber::{fmt, EnvFilter};

/// Initializes tracing/logging based on environment variables.
///
/// `RUST_LOG` controls the filter; without it everything at `info` and above is shown.
/// Pass `json = true` for line-delimited JSON output when running the evaluation
/// harness under a log collector.
pub fn init_tracing(json: bool) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(false);

    let result = if json {
        subscriber.json().try_init()
    } else {
        subscriber.try_init()
    };

    if let Err(e) = result {
        eprintln!("tracing already initialized: {}", e);
    }
}

/// Picks the output flavour from the configured `log_format` value.
pub fn wants_json(log_format: &str) -> bool {
    log_format.trim().eq_ignore_ascii_case("json")
}
