//! Telemetry bootstrap for relay processes and tests.

pub mod tracing;
