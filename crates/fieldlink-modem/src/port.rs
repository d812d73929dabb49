//! Heuristic check for another process holding the control tty open.
//!
//! Some holders (ModemManager in particular) open the port without
//! `TIOCEXCL`, which is invisible to an exclusive open but visible in
//! `/proc/<pid>/fd`. The scan is advisory: a process may open the port
//! between the check and our own open.

use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct PortExclusivityChecker {
    proc_root: PathBuf,
}

impl PortExclusivityChecker {
    pub fn new(proc_root: impl Into<PathBuf>) -> Self {
        Self {
            proc_root: proc_root.into(),
        }
    }

    /// Returns the pid of the first process found holding `device` open.
    pub fn find_holder(&self, device: &Path) -> Option<u32> {
        // A missing device node cannot be held; compare the raw path anyway.
        let target = std::fs::canonicalize(device).unwrap_or_else(|_| device.to_path_buf());

        let procs = match std::fs::read_dir(&self.proc_root) {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!(root = %self.proc_root.display(), error = %e, "cannot list processes");
                return None;
            }
        };

        for entry in procs.flatten() {
            let Some(pid) = entry.file_name().to_str().and_then(|s| s.parse::<u32>().ok()) else {
                continue;
            };

            // Permission denied or the process exited: skip it.
            let fds = match std::fs::read_dir(entry.path().join("fd")) {
                Ok(d) => d,
                Err(_) => continue,
            };

            for fd in fds.flatten() {
                // The descriptor may close mid-scan.
                let Ok(resolved) = std::fs::canonicalize(fd.path()) else {
                    continue;
                };
                if resolved == target {
                    tracing::info!(device = %device.display(), pid, "device is in use");
                    return Some(pid);
                }
            }
        }
        None
    }

    pub fn is_in_use(&self, device: &Path) -> bool {
        self.find_holder(device).is_some()
    }
}
