use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{EnvFilter, fmt};

const DEFAULT_DIRECTIVE: &str = "linecount_rs=info";

/// Install the global tracing subscriber.
///
/// Filtering follows `RUST_LOG`, falling back to `linecount_rs=info`.
/// `LOG_FORMAT=json` switches to JSON lines.
pub fn init_tracing() -> Result<(), TryInitError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().json().with_current_span(false).with_thread_names(true))
            .try_init()
    } else {
        registry.with(fmt::layer().with_thread_names(true)).try_init()
    }
}
