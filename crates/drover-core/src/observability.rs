//! Observability infrastructure for drover.
//!
//! Structured logging with consistent spans. This module provides
//! initialization helpers and span constructors so every component logs
//! with the same fields.

use std::sync::Once;
use tracing::Span;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::id::{JobId, TaskId};

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
/// - `RUST_LOG`: Controls log levels (e.g., `info`, `drover_exec=debug`)
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let output = match format {
            LogFormat::Json => fmt::layer().json().boxed(),
            LogFormat::Pretty => fmt::layer().pretty().boxed(),
        };
        tracing_subscriber::registry().with(filter).with(output).init();
    });
}

/// Creates a span for job-level scheduler operations.
#[must_use]
pub fn job_span(operation: &str, job_id: JobId) -> Span {
    tracing::info_span!(
        "job",
        op = operation,
        job_id = %job_id,
    )
}

/// Creates a span for task-level scheduler operations.
#[must_use]
pub fn task_span(operation: &str, job_id: JobId, task_id: TaskId) -> Span {
    tracing::info_span!(
        "task",
        op = operation,
        job_id = %job_id,
        task_id = %task_id,
    )
}
