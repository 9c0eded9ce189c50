//! Log output for the `releasegate` binary.
//!
//! Verification runs report through `tracing` events tagged
//! `event = "verification.*"` (see [`crate::obs`]). This module decides
//! where those land: human-readable or JSON lines on stderr, filtered by
//! `RUST_LOG` when set. Library users that install their own subscriber
//! never need it.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the process-wide subscriber for a verification run.
///
/// `json` switches to one JSON object per line for log shippers; `level`
/// is the floor used when `RUST_LOG` is absent or unparsable. Stdout is
/// left to command output such as `verify --format json`. A second call
/// is a no-op.
pub fn init_tracing(json: bool, level: Level) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));
    let lines = fmt::layer().with_target(false).with_writer(std::io::stderr);

    let installed = if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(lines.json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(lines)
            .try_init()
    };
    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repeated_init_is_harmless() {
        init_tracing(false, Level::WARN);
        init_tracing(true, Level::DEBUG);
        tracing::info!(event = "verification.test", "still logging");
    }
}
