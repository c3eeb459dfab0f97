//! Resident memory of the corosync daemon.
//!
//! Produces the synthetic `stats.corosync.rss (u64)` record appended to every
//! refresh. A daemon that is not running is reported as 0 bytes: a down
//! daemon is itself useful scrape data, not a collection fault.

use std::path::PathBuf;

use tracing::{debug, trace};

use crate::collector::procfs::parser::{parse_pid, parse_vm_rss_kb};
use crate::collector::traits::FileSystem;
use crate::stats::{StatLine, ValueType};

/// Key of the synthetic memory record.
pub const RSS_KEY: &str = "stats.corosync.rss";

/// Default daemon process name, as reported by `/proc/[pid]/comm`.
pub const DEFAULT_PROCESS_NAME: &str = "corosync";

/// Samples the resident set size of a named process from `/proc`.
pub struct MemoryProbe<F: FileSystem> {
    fs: F,
    proc_path: PathBuf,
    process_name: String,
}

impl<F: FileSystem> MemoryProbe<F> {
    /// Creates a probe for the default `corosync` process.
    ///
    /// # Arguments
    /// * `fs` - Filesystem implementation (real or mock)
    /// * `proc_path` - Base path to proc filesystem (usually "/proc")
    pub fn new(fs: F, proc_path: impl Into<PathBuf>) -> Self {
        Self {
            fs,
            proc_path: proc_path.into(),
            process_name: DEFAULT_PROCESS_NAME.to_string(),
        }
    }

    pub fn with_process_name(mut self, name: impl Into<String>) -> Self {
        self.process_name = name.into();
        self
    }

    /// Finds the lowest pid whose `comm` matches the process name.
    pub fn find_pid(&self) -> Option<u32> {
        let entries = self.fs.read_dir(&self.proc_path).ok()?;
        entries
            .iter()
            .filter_map(|path| {
                let pid = parse_pid(path.file_name()?.to_str()?)?;
                let comm = self.fs.read_to_string(&path.join("comm")).ok()?;
                (comm.trim() == self.process_name).then_some(pid)
            })
            .min()
    }

    /// Resident memory of the process in bytes, if it can be determined.
    pub fn resident_bytes(&self) -> Option<u64> {
        let pid = self.find_pid()?;
        let status_path = self.proc_path.join(pid.to_string()).join("status");
        let status = self.fs.read_to_string(&status_path).ok()?;
        let kb = parse_vm_rss_kb(&status)?;
        trace!(pid, rss_kb = kb, "sampled daemon memory");
        Some(kb.saturating_mul(1024))
    }

    /// Returns the synthetic memory record; 0 when the daemon is absent.
    pub fn sample(&self) -> StatLine {
        let bytes = self.resident_bytes().unwrap_or_else(|| {
            debug!(process = %self.process_name, "daemon not found, reporting rss 0");
            0
        });
        StatLine::new(RSS_KEY, ValueType::U64, bytes.to_string())
    }
}
