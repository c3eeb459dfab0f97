//! `corosync-cmapctl` subprocess source.
//!
//! The statistics map is listed with `corosync-cmapctl -m stats`, any other
//! prefix (e.g. `nodelist.node`) with `corosync-cmapctl <prefix>`. Every
//! invocation is bounded by a timeout: a hung command is killed and reported
//! as [`SourceError::Timeout`] so that scrapes fall back to stale data instead
//! of piling up behind it.

use std::io::Read;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::collector::traits::{STATS_PREFIX, SourceError, StatsSource};

/// Default command name, resolved through `PATH`.
pub const DEFAULT_CMAPCTL: &str = "corosync-cmapctl";

/// Default bound on a single invocation.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Poll interval while waiting for the child to exit.
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Statistics source backed by the `corosync-cmapctl` binary.
#[derive(Debug, Clone)]
pub struct CmapctlSource {
    program: PathBuf,
    timeout: Duration,
}

impl Default for CmapctlSource {
    fn default() -> Self {
        Self::new(DEFAULT_CMAPCTL)
    }
}

impl CmapctlSource {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Builds the argument list for a key prefix.
    fn args_for(prefix: &str) -> Vec<String> {
        if prefix == STATS_PREFIX {
            vec!["-m".into(), "stats".into()]
        } else if prefix.starts_with("stats.") {
            vec!["-m".into(), "stats".into(), prefix.into()]
        } else {
            vec![prefix.into()]
        }
    }
}

impl StatsSource for CmapctlSource {
    fn list(&self, prefix: &str) -> Result<String, SourceError> {
        let args = Self::args_for(prefix);
        debug!(program = %self.program.display(), ?args, "running cmapctl");
        run_command(&self.program, &args, self.timeout)
    }
}

/// Runs `program` with `args`, returning stdout as text.
///
/// stdout and stderr are drained on helper threads so a large listing cannot
/// block the child on a full pipe while we wait for it. Invalid UTF-8 is
/// replaced with U+FFFD, so a bad byte in one value only touches its own line.
pub(crate) fn run_command(
    program: &std::path::Path,
    args: &[String],
    timeout: Duration,
) -> Result<String, SourceError> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(SourceError::Spawn)?;

    let stdout = child.stdout.take().map(drain);
    let stderr = child.stderr.take().map(drain);

    let start = Instant::now();
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {
                if start.elapsed() >= timeout {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(SourceError::Timeout(timeout));
                }
                thread::sleep(POLL_INTERVAL);
            }
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(SourceError::Io(e));
            }
        }
    };
    trace!(elapsed_ms = start.elapsed().as_millis() as u64, %status, "command exited");

    let stdout = join_drain(stdout)?;
    let stderr = join_drain(stderr).unwrap_or_default();

    if !status.success() {
        return Err(SourceError::Failed {
            status,
            stderr: String::from_utf8_lossy(&stderr).trim().to_string(),
        });
    }

    Ok(decode(stdout))
}

fn decode(stdout: Vec<u8>) -> String {
    match String::from_utf8(stdout) {
        Ok(text) => text,
        Err(e) => {
            debug!(
                valid_up_to = e.utf8_error().valid_up_to(),
                "command output is not valid UTF-8, decoding lossily"
            );
            String::from_utf8_lossy(e.as_bytes()).into_owned()
        }
    }
}

fn drain<R: Read + Send + 'static>(mut reader: R) -> thread::JoinHandle<std::io::Result<Vec<u8>>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf)?;
        Ok(buf)
    })
}

fn join_drain(
    handle: Option<thread::JoinHandle<std::io::Result<Vec<u8>>>>,
) -> Result<Vec<u8>, SourceError> {
    match handle {
        None => Ok(Vec::new()),
        Some(h) => h
            .join()
            .map_err(|_| SourceError::Io(std::io::Error::other("output reader panicked")))?
            .map_err(SourceError::Io),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::path::Path;

    fn sh(script: &str, timeout: Duration) -> Result<String, SourceError> {
        run_command(
            Path::new("/bin/sh"),
            &["-c".to_string(), script.to_string()],
            timeout,
        )
    }

    #[test]
    fn test_args_for_prefixes() {
        assert_eq!(CmapctlSource::args_for("stats"), vec!["-m", "stats"]);
        assert_eq!(
            CmapctlSource::args_for("stats.knet"),
            vec!["-m", "stats", "stats.knet"]
        );
        assert_eq!(
            CmapctlSource::args_for("nodelist.node"),
            vec!["nodelist.node"]
        );
    }

    #[test]
    fn test_run_command_captures_stdout() {
        let out = sh("printf 'stats.srp.rx_data (u64) = 1\\n'", Duration::from_secs(5)).unwrap();
        assert_eq!(out, "stats.srp.rx_data (u64) = 1\n");
    }

    #[test]
    fn test_run_command_keeps_lines_around_invalid_utf8() {
        let out = sh(
            "printf 'stats.srp.rx_data (u64) = 1\\nstats.ipcs.service0.1.0x1.procname (str) = bad\\377name\\n'",
            Duration::from_secs(5),
        )
        .unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "stats.srp.rx_data (u64) = 1");
        assert_eq!(
            lines[1],
            "stats.ipcs.service0.1.0x1.procname (str) = bad\u{FFFD}name"
        );
    }

    #[test]
    fn test_decode_valid_output_unchanged() {
        assert_eq!(decode(b"a (u8) = 1\n".to_vec()), "a (u8) = 1\n");
        assert_eq!(decode(vec![b'x', 0xff, b'y']), "x\u{FFFD}y");
    }

    #[test]
    fn test_run_command_large_output() {
        let out = sh("seq 1 100000", Duration::from_secs(10)).unwrap();
        assert_eq!(out.lines().count(), 100000);
    }

    #[test]
    fn test_run_command_failure_status() {
        let err = sh("echo 'Failed to initialize the cmap API' >&2; exit 1", Duration::from_secs(5))
            .unwrap_err();
        match err {
            SourceError::Failed { status, stderr } => {
                assert_eq!(status.code(), Some(1));
                assert_eq!(stderr, "Failed to initialize the cmap API");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_run_command_timeout() {
        let start = Instant::now();
        let err = sh("sleep 5", Duration::from_millis(100)).unwrap_err();
        assert!(matches!(err, SourceError::Timeout(_)));
        assert!(start.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn test_missing_binary_is_spawn_error() {
        let source = CmapctlSource::new("/nonexistent/corosync-cmapctl");
        assert!(matches!(source.list("stats"), Err(SourceError::Spawn(_))));
    }
}
