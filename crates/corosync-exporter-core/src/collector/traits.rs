//! Seams between the collector and the outside world.
//!
//! `StatsSource` abstracts the statistics CLI so the collector can run
//! against scripted output in tests. `FileSystem` abstracts `/proc` access
//! for the memory probe in the same way.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::time::Duration;

/// Key prefix of the runtime statistics map.
pub const STATS_PREFIX: &str = "stats";

/// Error returned by a statistics source.
#[derive(Debug)]
pub enum SourceError {
    /// The command could not be started.
    Spawn(io::Error),
    /// Reading the command output failed.
    Io(io::Error),
    /// The command did not finish in time and was killed.
    Timeout(Duration),
    /// The command exited unsuccessfully.
    Failed { status: ExitStatus, stderr: String },
    /// Scripted failure from a mock source.
    Unavailable(String),
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceError::Spawn(e) => write!(f, "failed to start statistics command: {}", e),
            SourceError::Io(e) => write!(f, "I/O error reading statistics: {}", e),
            SourceError::Timeout(t) => {
                write!(f, "statistics command timed out after {:?}", t)
            }
            SourceError::Failed { status, stderr } => {
                if stderr.is_empty() {
                    write!(f, "statistics command failed ({})", status)
                } else {
                    write!(f, "statistics command failed ({}): {}", status, stderr)
                }
            }
            SourceError::Unavailable(msg) => write!(f, "statistics unavailable: {}", msg),
        }
    }
}

impl std::error::Error for SourceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SourceError::Spawn(e) | SourceError::Io(e) => Some(e),
            _ => None,
        }
    }
}

/// Producer of `<key> (<type>) = <value>` listings.
pub trait StatsSource: Send {
    /// Returns the raw listing for every key under `prefix`.
    fn list(&self, prefix: &str) -> Result<String, SourceError>;
}

/// Abstraction for filesystem operations.
pub trait FileSystem: Send + Sync {
    /// Reads the entire contents of a file as a string.
    fn read_to_string(&self, path: &Path) -> io::Result<String>;

    /// Lists entries in a directory.
    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>>;
}

/// Real filesystem implementation that delegates to `std::fs`.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealFs;

impl RealFs {
    pub fn new() -> Self {
        Self
    }
}

impl FileSystem for RealFs {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(path)
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        let entries = std::fs::read_dir(path)?;
        let mut paths = Vec::new();
        for entry in entries {
            paths.push(entry?.path());
        }
        Ok(paths)
    }
}
