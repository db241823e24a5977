use opentelemetry::trace::TraceId;

/// Fetch the opentelemetry::trace::TraceId as hex through the full tracing stack
#[must_use]
pub fn get_trace_id() -> TraceId {
    use opentelemetry::trace::TraceContextExt as _;
    use tracing_opentelemetry::OpenTelemetrySpanExt as _;

    tracing::Span::current()
        .context()
        .span()
        .span_context()
        .trace_id()
}
