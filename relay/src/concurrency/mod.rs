//! Concurrency utilities for coordinating stage workers.
//!
//! The engine keeps its cross-worker coordination narrow: a broadcast
//! [`shutdown`] channel that tells every worker in a pipeline to wind down,
//! and a per-stage [`signal`] channel used to interrupt workers blocked in
//! extraction when a cancellation must take effect immediately. All other
//! cross-worker state lives behind the progress tracker's single lock.

pub mod shutdown;
pub mod signal;
