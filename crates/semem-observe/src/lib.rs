//! Observability setup for semem: structured logging with optional
//! OpenTelemetry span export.

pub mod tracing_setup;
