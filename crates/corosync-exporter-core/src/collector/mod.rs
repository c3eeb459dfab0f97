//! Statistics collection for corosync.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          Collector                           │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────┐  │
//! │  │  StatsSource   │  │  MemoryProbe   │  │   Classifier   │  │
//! │  │  (trait)       │  │  /proc/[pid]/* │  │  + NodeMap     │  │
//! │  └───────┬────────┘  └───────┬────────┘  └───────┬────────┘  │
//! │          │    StatLine       │    StatLine       │ MetricKey │
//! │          └─────────┬─────────┘                   │           │
//! │                    └──────────────┬──────────────┘           │
//! │                            ┌──────▼──────┐                   │
//! │                            │  Registry   │                   │
//! │                            └─────────────┘                   │
//! └──────────────────────────────────────────────────────────────┘
//!        │                          │
//!  ┌─────▼────────┐          ┌──────▼──────┐
//!  │ CmapctlSource│          │ RealFs      │
//!  │ MockSource   │          │ MockFs      │
//!  └──────────────┘          └─────────────┘
//! ```
//!
//! # Usage
//!
//! ```
//! use corosync_exporter_core::collector::procfs::MemoryProbe;
//! use corosync_exporter_core::collector::{Collector, MockFs, MockSource};
//!
//! let source = MockSource::new()
//!     .with_output("nodelist.node", "nodelist.node.0.name (str) = a\nnodelist.node.0.nodeid (u32) = 1\n")
//!     .with_output("stats", "stats.srp.rx_data (u64) = 42\n");
//! let probe = MemoryProbe::new(MockFs::new(), "/proc");
//!
//! let mut collector = Collector::new(source, probe, "host").unwrap();
//! collector.refresh().unwrap();
//! assert!(collector.render().unwrap().contains("srp_rx_data"));
//! ```

pub mod cmapctl;
#[allow(clippy::module_inception)]
mod collector;
pub mod mock;
pub mod procfs;
pub mod traits;

pub use cmapctl::CmapctlSource;
pub use collector::{CollectError, Collector, RefreshSummary, resolve_node_map};
pub use mock::{MockFs, MockSource};
pub use procfs::MemoryProbe;
pub use traits::{FileSystem, RealFs, STATS_PREFIX, SourceError, StatsSource};
