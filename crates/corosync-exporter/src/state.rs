//! Shared application state.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use std::sync::atomic::AtomicU64;
use std::sync::{Arc, Mutex};

use corosync_exporter_core::collector::{
    CollectError, Collector, FileSystem, RefreshSummary, StatsSource,
};
use corosync_exporter_core::registry::RegistryError;

/// What the endpoint needs from the collector: refresh, then render.
pub(crate) trait Exporter: Send {
    fn refresh(&mut self) -> Result<RefreshSummary, CollectError>;
    fn render(&self) -> Result<String, RegistryError>;
}

impl<S: StatsSource, F: FileSystem> Exporter for Collector<S, F> {
    fn refresh(&mut self) -> Result<RefreshSummary, CollectError> {
        Collector::refresh(self)
    }

    fn render(&self) -> Result<String, RegistryError> {
        Collector::render(self)
    }
}

/// The collector behind a single lock: refresh and render never interleave.
pub(crate) type SharedState = Arc<Mutex<Box<dyn Exporter>>>;

pub(crate) static SCRAPES: AtomicU64 = AtomicU64::new(0);

pub(crate) fn shared<E: Exporter + 'static>(exporter: E) -> SharedState {
    Arc::new(Mutex::new(Box::new(exporter)))
}
