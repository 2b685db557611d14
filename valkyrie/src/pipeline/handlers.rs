//! Observability handlers.
//!
//! These handlers work with any payload that can describe itself through
//! [`CallInfo`], so the same tracing, metrics and logging behaviour can be
//! attached to PAM calls and to raw HTTP exchanges.

use super::{Handler, PipelineContext};
use crate::error::{BoxError, find_valkyrie};
use async_trait::async_trait;
use std::time::{Duration, Instant};
use tracing::Instrument;

/// Describes the call a pipeline is wrapping.
pub trait CallInfo: Send + Sync + 'static {
    /// Call family, e.g. `"pam"` or `"http"`. Used as a metric label.
    fn kind(&self) -> &'static str;

    /// Operation name, e.g. `"get_balance"`.
    fn operation(&self) -> &str;

    /// What the call is sent to: a backend name or a host.
    fn target(&self) -> &str;
}

/// Label for the outcome of a call: `"ok"`, the domain error code, or
/// `"error"` for failures without one.
pub fn status_label(result: &Result<(), BoxError>) -> &'static str {
    match result {
        Ok(()) => "ok",
        Err(error) => {
            let chain: &(dyn std::error::Error + 'static) = error.as_ref();
            find_valkyrie(chain).map_or("error", |e| e.code().as_str())
        }
    }
}

/// Runs the rest of the chain inside a `tracing` span.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingHandler;

#[async_trait]
impl<P: CallInfo> Handler<P> for TracingHandler {
    async fn handle(&self, ctx: &mut PipelineContext<'_, P>) -> Result<(), BoxError> {
        let call = ctx.payload();
        let span = tracing::info_span!(
            "valkyrie_call",
            kind = call.kind(),
            operation = call.operation(),
            target = call.target(),
            request_id = ctx.context().request_id(),
            status = tracing::field::Empty,
        );
        let result = ctx.next().instrument(span.clone()).await;
        span.record("status", status_label(&result));
        result
    }
}

/// Records call counts and latencies through the `metrics` facade.
#[derive(Clone, Copy, Debug, Default)]
pub struct MetricsHandler;

#[async_trait]
impl<P: CallInfo> Handler<P> for MetricsHandler {
    async fn handle(&self, ctx: &mut PipelineContext<'_, P>) -> Result<(), BoxError> {
        let call = ctx.payload();
        let start = Instant::now();
        let result = ctx.next().await;
        let operation = call.operation().to_string();

        metrics::counter!("valkyrie_calls_total",
            "kind" => call.kind(),
            "operation" => operation.clone(),
            "status" => status_label(&result)
        )
        .increment(1);
        metrics::histogram!("valkyrie_call_duration_seconds",
            "kind" => call.kind(),
            "operation" => operation
        )
        .record(start.elapsed().as_secs_f64());

        result
    }
}

/// Logs failed and slow calls.
#[derive(Clone, Copy, Debug)]
pub struct LoggingHandler {
    slow_threshold: Duration,
}

impl LoggingHandler {
    pub fn new(slow_threshold: Duration) -> Self {
        Self { slow_threshold }
    }
}

impl Default for LoggingHandler {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

#[async_trait]
impl<P: CallInfo> Handler<P> for LoggingHandler {
    async fn handle(&self, ctx: &mut PipelineContext<'_, P>) -> Result<(), BoxError> {
        let call = ctx.payload();
        let request_id = ctx.context().request_id().to_string();
        let start = Instant::now();
        let result = ctx.next().await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match &result {
            Err(error) => tracing::warn!(
                kind = call.kind(),
                operation = call.operation(),
                target = call.target(),
                request_id = %request_id,
                duration_ms = duration_ms,
                status = status_label(&result),
                "call failed: {}",
                error
            ),
            Ok(()) if start.elapsed() > self.slow_threshold => tracing::warn!(
                kind = call.kind(),
                operation = call.operation(),
                target = call.target(),
                request_id = %request_id,
                duration_ms = duration_ms,
                "slow call"
            ),
            Ok(()) => tracing::debug!(
                kind = call.kind(),
                operation = call.operation(),
                request_id = %request_id,
                duration_ms = duration_ms,
                "call completed"
            ),
        }

        result
    }
}
