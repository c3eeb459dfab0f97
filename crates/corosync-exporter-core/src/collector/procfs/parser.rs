//! Parsers for `/proc/[pid]/` files.

/// Extracts the `VmRSS` figure (kB) from `/proc/[pid]/status`.
///
/// Kernel threads have no `VmRSS` line; those return `None`.
pub fn parse_vm_rss_kb(status: &str) -> Option<u64> {
    status.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        if key.trim() != "VmRSS" {
            return None;
        }
        // Format: "VmRSS:	   20480 kB"
        value.split_whitespace().next()?.parse().ok()
    })
}

/// Returns the pid encoded in a `/proc` entry name, if it is numeric.
pub fn parse_pid(entry_name: &str) -> Option<u32> {
    if entry_name.is_empty() || !entry_name.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    entry_name.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_vm_rss() {
        let status = "Name:\tcorosync\nVmPeak:\t  300000 kB\nVmRSS:\t   20480 kB\nThreads:\t9\n";
        assert_eq!(parse_vm_rss_kb(status), Some(20480));
    }

    #[test]
    fn test_parse_vm_rss_missing() {
        assert_eq!(parse_vm_rss_kb("Name:\tkthreadd\nThreads:\t1\n"), None);
        assert_eq!(parse_vm_rss_kb("VmRSS:\tgarbage kB\n"), None);
    }

    #[test]
    fn test_parse_pid() {
        assert_eq!(parse_pid("812"), Some(812));
        assert_eq!(parse_pid("self"), None);
        assert_eq!(parse_pid(""), None);
        assert_eq!(parse_pid("12a"), None);
    }
}
