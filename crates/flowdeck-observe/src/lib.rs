//! Observability setup for Flowdeck: the tracing subscriber (human or JSON
//! output, optional OpenTelemetry stdout export).

pub mod tracing_setup;
