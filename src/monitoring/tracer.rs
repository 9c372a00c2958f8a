/*!
 * Structured Tracing
 * Tracing setup and lifecycle operation spans using the tracing crate
 *
 * Features:
 * - Trace ID per lifecycle operation for log correlation
 * - JSON-formatted logs for structured parsing
 * - Slow-operation warnings when a span closes
 */

use std::time::{Duration, Instant};
use tracing::{debug, info, span, warn, Level};
use tracing_subscriber::{
    fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};
use uuid::Uuid;

/// Initialize structured tracing
///
/// Environment variables:
/// - RUST_LOG: Set log level (default: info)
/// - MODVISOR_TRACE_JSON: Enable JSON output (default: false)
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let use_json = std::env::var("MODVISOR_TRACE_JSON")
        .map(|v| v == "1" || v == "true")
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(env_filter);

    let result = if use_json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .try_init()
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_span_events(FmtSpan::CLOSE)
                    .compact(),
            )
            .try_init()
    };

    match result {
        Ok(()) => info!(json = use_json, "Structured tracing initialized"),
        Err(e) => debug!(error = %e, "Tracing subscriber already installed"),
    }
}

/// Generate a unique trace ID for log correlation
pub fn generate_trace_id() -> String {
    Uuid::new_v4().to_string()
}

/// Span around one lifecycle operation (switch, cleanup, refresh)
///
/// Logs a warning when dropped after `slow_after`.
pub struct OperationSpan {
    span: tracing::Span,
    start: Instant,
    trace_id: String,
    operation: &'static str,
    slow_after: Duration,
}

impl OperationSpan {
    pub fn new(operation: &'static str, module_id: &str, slow_after: Duration) -> Self {
        let trace_id = generate_trace_id();

        let span = span!(
            Level::DEBUG,
            "lifecycle",
            trace_id = %trace_id,
            operation = operation,
            module_id = module_id,
            duration_ms = tracing::field::Empty,
            result = tracing::field::Empty,
            error = tracing::field::Empty,
        );

        span.in_scope(|| debug!(operation, module_id, "operation started"));

        Self {
            span,
            start: Instant::now(),
            trace_id,
            operation,
            slow_after,
        }
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    /// Record the operation result
    pub fn record_result(&self, result: &str) {
        self.span.record("result", result);
    }

    /// Record an error
    pub fn record_error(&self, error: &str) {
        self.span.record("error", error);
        self.span.record("result", "error");
    }

    /// Span handle for instrumenting futures
    pub fn span(&self) -> &tracing::Span {
        &self.span
    }
}

impl Drop for OperationSpan {
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        self.span.record("duration_ms", duration.as_millis() as u64);
        let _entered = self.span.enter();

        if duration > self.slow_after {
            warn!(
                trace_id = %self.trace_id,
                operation = self.operation,
                duration_ms = duration.as_millis() as u64,
                slow = true,
                "slow lifecycle operation"
            );
        } else {
            debug!(
                trace_id = %self.trace_id,
                operation = self.operation,
                duration_us = duration.as_micros() as u64,
                "operation completed"
            );
        }
    }
}

/// Helper to create an operation span
#[inline]
pub fn span_operation(operation: &'static str, module_id: &str, slow_after: Duration) -> OperationSpan {
    OperationSpan::new(operation, module_id, slow_after)
}
