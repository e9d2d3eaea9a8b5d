//! Configuration types for relay replication pipelines.

pub mod shared;
