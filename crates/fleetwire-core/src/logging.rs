//! Logging initialisation.

use tracing_subscriber::EnvFilter;

use crate::config::env_vars;

/// Install the global tracing subscriber.
///
/// Honors `RUST_LOG` (default `fleetwire=info`) and switches to JSON output
/// when `FLEETWIRE_LOG_JSON=true`. Calling it more than once is harmless.
pub fn init_logging() {
    let json_logging = std::env::var(env_vars::LOG_JSON)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(false);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("fleetwire=info").add_directive(tracing::Level::WARN.into())
    });

    let result = if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .try_init()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .compact()
            .try_init()
    };

    // Already installed by a previous call or by the host application
    let _ = result;
}
