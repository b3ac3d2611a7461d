//! Time subsystem.
//!
//! Converts raw GPU timestamps reported by a backend into the per-submission
//! [`ExecutionInfo`] consumed by the display/reporting layer.
//! Intended usage:
//! - backends fill a [`GpuTimestamps`] when a command buffer completes
//! - the session turns it into an `ExecutionInfo` exactly once

mod execution;

pub use execution::{format_millis, ExecutionInfo, GpuTimestamps};
