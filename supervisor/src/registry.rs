//! ProcessRegistry: discovery and termination of OS processes.
//!
//! Liveness is decided by command-line inspection. [`ProcTable`] reads
//! `/proc/<pid>/cmdline` and kills with `kill -9`.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

/// Errors from process termination.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// `kill` could not be run.
    #[error("failed to run kill for pid {pid}: {source}")]
    Spawn {
        /// Target pid.
        pid: u32,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// `kill` reported failure (process gone or not permitted).
    #[error("kill failed for pid {pid}")]
    Refused {
        /// Target pid.
        pid: u32,
    },
}

/// Snapshot of one running process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    /// OS process id.
    pub pid: u32,
    /// Argument vector, `argv[0]` first.
    pub cmdline: Vec<String>,
}

impl ProcessInfo {
    /// Whether any argument contains `needle` as a substring.
    pub fn mentions(&self, needle: &str) -> bool {
        self.cmdline.iter().any(|arg| arg.contains(needle))
    }

    /// Basename of `argv[0]`.
    pub fn executable_name(&self) -> Option<&str> {
        let argv0 = self.cmdline.first()?;
        Path::new(argv0).file_name().and_then(|n| n.to_str())
    }
}

/// Capability over the OS process table.
pub trait ProcessRegistry: Send + Sync {
    /// All visible processes, excluding the caller itself.
    fn list(&self) -> Vec<ProcessInfo>;

    /// Processes matching `predicate`.
    fn find(&self, predicate: &dyn Fn(&ProcessInfo) -> bool) -> Vec<ProcessInfo> {
        self.list().into_iter().filter(|p| predicate(p)).collect()
    }

    /// Forcibly terminate a process.
    ///
    /// # Errors
    ///
    /// Returns an error if the process could not be killed.
    fn terminate(&self, process: &ProcessInfo) -> Result<(), RegistryError>;
}

/// `/proc`-backed registry.
#[derive(Debug, Clone)]
pub struct ProcTable {
    root: PathBuf,
    own_pid: u32,
}

impl Default for ProcTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcTable {
    /// Registry over the host `/proc`.
    pub fn new() -> Self {
        Self::with_root(PathBuf::from("/proc"))
    }

    /// Registry over an alternative procfs root.
    pub fn with_root(root: PathBuf) -> Self {
        Self {
            root,
            own_pid: std::process::id(),
        }
    }
}

impl ProcessRegistry for ProcTable {
    fn list(&self) -> Vec<ProcessInfo> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(root = %self.root.display(), error = %e, "cannot read process table");
                return Vec::new();
            }
        };

        let mut processes = Vec::new();
        for entry in entries.flatten() {
            let Ok(pid) = entry.file_name().to_string_lossy().parse::<u32>() else {
                continue;
            };
            if pid == self.own_pid {
                continue;
            }
            // Processes can exit between read_dir and read; skip them.
            let Ok(raw) = std::fs::read(entry.path().join("cmdline")) else {
                continue;
            };
            let cmdline = parse_cmdline(&raw);
            if cmdline.is_empty() {
                continue;
            }
            processes.push(ProcessInfo { pid, cmdline });
        }
        processes.sort_by_key(|p| p.pid);
        processes
    }

    fn terminate(&self, process: &ProcessInfo) -> Result<(), RegistryError> {
        info!(pid = process.pid, "killing process");
        let pid = process.pid.to_string();
        let status = std::process::Command::new("kill")
            .args(["-9", pid.as_str()])
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .map_err(|source| RegistryError::Spawn {
                pid: process.pid,
                source,
            })?;
        if !status.success() {
            debug!(pid = process.pid, %status, "kill reported failure");
            return Err(RegistryError::Refused { pid: process.pid });
        }
        Ok(())
    }
}

/// Split a NUL-separated `/proc/<pid>/cmdline` blob into arguments.
pub fn parse_cmdline(raw: &[u8]) -> Vec<String> {
    raw.split(|&b| b == 0)
        .filter(|part| !part.is_empty())
        .map(|part| String::from_utf8_lossy(part).into_owned())
        .collect()
}
