//! `coda-perf` — latency markers, per-component timing statistics, and
//! resource sampling.
//!
//! [`PerfTracker`] is the one sanctioned process-wide singleton in the
//! workspace (install once at startup, fetch via [`global`]); everything
//! else receives its services explicitly. The [`monitor`] task samples
//! CPU and resident memory on an interval and feeds `system_metrics`
//! events into the bus.

pub mod monitor;
pub mod tracker;

pub use monitor::ResourceMonitor;
pub use tracker::{global, install_global, PerfTracker};
