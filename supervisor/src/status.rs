//! Status extraction from worker logs.

use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

/// Status reported when a worker has not written its log yet.
pub const NO_LOG_FILE: &str = "No log file found";

/// Bytes read from the end of the log when looking for the last line.
const TAIL_WINDOW: u64 = 4096;

/// Last non-empty line of the log at `path`, or [`NO_LOG_FILE`].
///
/// Only the final few kilobytes are read, so a long-running worker's log
/// size does not matter.
pub fn tail_line(path: &Path) -> String {
    let Ok(mut file) = std::fs::File::open(path) else {
        return NO_LOG_FILE.to_owned();
    };

    let len = file.metadata().map(|m| m.len()).unwrap_or(0);
    let start = len.saturating_sub(TAIL_WINDOW);
    if file.seek(SeekFrom::Start(start)).is_err() {
        return String::new();
    }

    let mut buf = Vec::new();
    if file.read_to_end(&mut buf).is_err() {
        return String::new();
    }

    let text = String::from_utf8_lossy(&buf);
    text.lines()
        .rev()
        .map(str::trim_end)
        .find(|line| !line.is_empty())
        .unwrap_or_default()
        .to_owned()
}
