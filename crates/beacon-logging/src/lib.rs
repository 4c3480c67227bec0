//! # beacon-logging
//!
//! Structured logging with `tracing`.
//!
//! Connection context (connection ID, peer address, protocol mode) is carried
//! by tracing spans opened in the server crate; this crate only installs the
//! global subscriber.

#![deny(unsafe_code)]

pub mod types;

pub use types::{LogFormat, LogLevel};

use tracing_subscriber::EnvFilter;

fn env_filter(level: LogLevel) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_filter_str()))
}

/// Initialize the global tracing subscriber writing to stderr.
///
/// `RUST_LOG` takes precedence over `level`. Call once at application
/// startup; subsequent calls are no-ops.
pub fn init_subscriber(level: LogLevel, format: LogFormat) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter(level))
        .with_target(true)
        .with_writer(std::io::stderr);

    // try_init is a no-op if a global subscriber is already set
    let _ = match format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Json => builder.json().with_current_span(true).try_init(),
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn re_exports_work() {
        let _level = LogLevel::Info;
        let _format = LogFormat::Json;
    }

    #[test]
    fn init_subscriber_does_not_panic() {
        // Multiple calls should be safe (no-op after first)
        init_subscriber(LogLevel::Warn, LogFormat::Compact);
        init_subscriber(LogLevel::Debug, LogFormat::Json);
    }
}
