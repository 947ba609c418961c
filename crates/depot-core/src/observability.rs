//! Observability infrastructure for Depot.
//!
//! Structured logging with consistent spans across all store components.
//! This module provides the subscriber bootstrap and span constructors used
//! by maintenance operations.

use std::sync::Once;

use tracing::Span;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default)]
pub enum LogFormat {
    /// JSON structured logs (for production).
    Json,
    /// Pretty-printed logs (for development).
    #[default]
    Pretty,
}

/// Initializes the logging subsystem.
///
/// Call once at application startup. Safe to call multiple times;
/// subsequent calls are no-ops.
///
/// # Environment Variables
///
/// - `RUST_LOG`: Controls log levels (e.g., `info`, `depot_store=debug`)
///
/// # Example
///
/// ```rust
/// use depot_core::observability::{init_logging, LogFormat};
///
/// init_logging(LogFormat::Pretty);
/// ```
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        match format {
            LogFormat::Json => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().json())
                    .init();
            }
            LogFormat::Pretty => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().pretty())
                    .init();
            }
        }
    });
}

/// Creates a span for store maintenance operations with standard fields.
///
/// # Example
///
/// ```rust
/// use depot_core::observability::maintenance_span;
///
/// let span = maintenance_span("repack", "repo-7f3a");
/// let _guard = span.enter();
/// // ... run the operation
/// ```
#[must_use]
pub fn maintenance_span(operation: &str, repository: &str) -> Span {
    tracing::info_span!("maintenance", op = operation, repository = repository)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_logging_is_idempotent() {
        init_logging(LogFormat::Pretty);
        init_logging(LogFormat::Pretty);
    }

    #[test]
    fn span_helper_creates_span() {
        let span = maintenance_span("repack", "repo-1");
        let _guard = span.enter();
        tracing::info!("message in span");
    }
}
