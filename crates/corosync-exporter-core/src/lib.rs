//! corosync-exporter-core — translation and collection engine for the
//! corosync statistics exporter.
//!
//! Provides:
//! - `stats` — parser for `corosync-cmapctl` text records
//! - `nodemap` — one-time node slot → node name resolution
//! - `namespace` — dotted statistic key → metric name + labels
//! - `registry` — typed metric registry and text exposition
//! - `collector` — statistics source, memory probe, refresh orchestration
//! - `util` — helper utilities

pub mod collector;
pub mod namespace;
pub mod nodemap;
pub mod registry;
pub mod stats;
pub mod util;

/// Crate version, reported by the exporter at startup.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
