//! Observability infrastructure for cover.run.
//!
//! Structured logging with consistent spans. This module provides the
//! initialization helper and the span constructor shared by the orchestrator,
//! the dispatcher and the HTTP layer.

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
/// - `RUST_LOG`: Controls log levels (e.g., `info`, `cover_flow=debug`)
///
/// # Example
///
/// ```rust
/// use cover_core::observability::{init_logging, LogFormat};
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

/// Creates a span for work on a single coverage job.
///
/// # Example
///
/// ```rust
/// use cover_core::observability::job_span;
///
/// let span = job_span("resolve", "github.com/acme/widget", "golang-1.10");
/// let _guard = span.enter();
/// ```
#[must_use]
pub fn job_span(operation: &str, repository: &str, tag: &str) -> Span {
    tracing::info_span!(
        "coverage_job",
        op = operation,
        repository = repository,
        tag = tag,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_succeeds() {
        // Uses Once internally
        init_logging(LogFormat::Pretty);
        init_logging(LogFormat::Pretty);
    }

    #[test]
    fn test_job_span_creates_span() {
        let span = job_span("cover", "github.com/acme/widget", "golang-1.10");
        let _guard = span.enter();
        tracing::info!("message in job span");
    }
}
