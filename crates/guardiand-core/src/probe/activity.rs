//! Activity probe: newest log mtime across the watched tree plus the
//! CPU-active flag.
//!
//! The walk is shallow and bounded: only the top-K most recently
//! modified files are considered, by explicit mtime rather than
//! directory-iteration order.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use walkdir::WalkDir;

use crate::types::{ActivitySignals, ProcessSample};

/// How many recently-modified files the walk keeps.
pub const RECENT_FILE_LIMIT: usize = 200;

/// How deep the walk descends (projects/<project>/<session files>).
const MAX_WALK_DEPTH: usize = 3;

/// The `limit` most recently modified files under `dir`, newest first.
pub fn recent_files(dir: &Path, limit: usize) -> Vec<(PathBuf, SystemTime)> {
    let mut files: Vec<(PathBuf, SystemTime)> = WalkDir::new(dir)
        .max_depth(MAX_WALK_DEPTH)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| {
            let mtime = entry.metadata().ok()?.modified().ok()?;
            Some((entry.into_path(), mtime))
        })
        .collect();
    files.sort_by(|a, b| b.1.cmp(&a.1));
    files.truncate(limit);
    files
}

/// Seconds since the newest mtime under `dir`, or -1 when the tree is
/// missing, empty, or unreadable.
pub fn scan_log_age_seconds(dir: &Path, now: SystemTime) -> i64 {
    let newest = recent_files(dir, RECENT_FILE_LIMIT);
    match newest.first() {
        Some((_, mtime)) => match now.duration_since(*mtime) {
            Ok(age) => age.as_secs() as i64,
            // mtime in the future counts as activity right now.
            Err(_) => 0,
        },
        None => -1,
    }
}

/// Fuse the log-mtime signal with per-process CPU into one record.
pub fn compose_signals(
    log_age_seconds: i64,
    processes: &[ProcessSample],
    cpu_low_percent: f32,
) -> ActivitySignals {
    let cpu_active = processes.iter().any(|p| p.cpu_percent > cpu_low_percent);
    let mut sources = Vec::new();
    if log_age_seconds >= 0 {
        sources.push("log-mtime".to_string());
    }
    if cpu_active {
        sources.push("cpu".to_string());
    }
    ActivitySignals {
        log_last_modified_seconds_ago: log_age_seconds,
        cpu_active,
        sources,
    }
}
