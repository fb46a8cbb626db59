//! Tracing initialisation for the `appfactory` binary.
//!
//! Filter precedence: `APPFACTORY_LOG`, then `RUST_LOG`, then the level
//! chosen by `--verbose`. JSON lines carry the fields of the enclosing
//! [`run_span`](crate::obs::run_span) (`pipeline`, `run_id`) so audit log
//! entries and log lines can be joined per run.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

pub const LOG_ENV: &str = "APPFACTORY_LOG";

/// Pick the filter directive: tool-specific override, then `RUST_LOG`,
/// then `level`. Blank values are ignored.
fn filter_directive(app: Option<String>, rust_log: Option<String>, level: Level) -> String {
    [app, rust_log]
        .into_iter()
        .flatten()
        .find(|d| !d.trim().is_empty())
        .unwrap_or_else(|| level.as_str().to_string())
}

/// Install the global subscriber, writing to stderr so stdout stays free
/// for command output (gate JSON, rendered reports). Only the first call
/// takes effect.
pub fn init_tracing(json: bool, level: Level) {
    let directive = filter_directive(
        std::env::var(LOG_ENV).ok(),
        std::env::var(EnvFilter::DEFAULT_ENV).ok(),
        level,
    );
    let env_filter =
        EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(false)
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_writer(std::io::stderr),
            )
            .try_init()
            .ok();
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init()
            .ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_precedence() {
        let app = Some("appfactory_core=trace".to_string());
        let rust = Some("warn".to_string());
        assert_eq!(
            filter_directive(app.clone(), rust.clone(), Level::INFO),
            "appfactory_core=trace"
        );
        assert_eq!(filter_directive(None, rust, Level::INFO), "warn");
        assert_eq!(filter_directive(Some("  ".to_string()), None, Level::DEBUG), "debug");
    }

    #[test]
    fn test_init_tracing_twice_is_harmless() {
        init_tracing(false, Level::INFO);
        init_tracing(true, Level::DEBUG);
    }
}
