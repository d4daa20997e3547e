//! Tracing initialisation for Talon binaries.
//!
//! Call [`init_tracing`] once at startup. Respects `RUST_LOG` for
//! fine-grained filtering; without it, `verbose` selects debug over info.
//! Calling again is a no-op (the global subscriber is set once per process).

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Initialise the global tracing subscriber.
///
/// * `verbose` - default to `debug` level when `RUST_LOG` is unset.
/// * `json` - emit newline-delimited JSON log lines for aggregation.
pub fn init_tracing(verbose: bool, json: bool) {
    let fallback = if verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false).json())
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false))
            .try_init()
            .ok();
    }
}
