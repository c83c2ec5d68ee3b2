//! Bundle writer: one zip archive with everything a bug report needs.
//!
//! Contents: a system-info summary, the process snapshot, the current
//! persisted state, both journals, and the trailing lines of the most
//! recent log files. Nothing is mutated; the bundle is evidence only.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use sysinfo::System;
use zip::write::SimpleFileOptions;
use zip::CompressionMethod;

use crate::config::Thresholds;
use crate::error::GuardianError;
use crate::probe::recent_files;
use crate::store::GuardianStore;
use crate::types::GuardianState;

/// How many recent log files get their tails bundled.
const TAIL_FILE_LIMIT: usize = 10;

#[derive(Debug, Clone, PartialEq)]
pub struct BundleSummary {
    pub path: PathBuf,
    pub entries: usize,
    pub archive_bytes: u64,
}

pub struct BundleWriter {
    watch_dir: PathBuf,
    thresholds: Thresholds,
}

impl BundleWriter {
    pub fn new(watch_dir: impl Into<PathBuf>, thresholds: Thresholds) -> Self {
        BundleWriter {
            watch_dir: watch_dir.into(),
            thresholds,
        }
    }

    /// Write `bundle-<timestamp>.zip` into the data directory (or to an
    /// explicit path).
    pub fn write(
        &self,
        store: &GuardianStore,
        state: Option<&GuardianState>,
        output: Option<PathBuf>,
        now: i64,
    ) -> Result<BundleSummary, GuardianError> {
        let path = output.unwrap_or_else(|| store.data_dir().join(format!("bundle-{now}.zip")));
        let file = fs::File::create(&path).map_err(|e| GuardianError::BundleFailed {
            detail: format!("create {}: {e}", path.display()),
        })?;
        let mut zip = zip::ZipWriter::new(file);
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        let mut entries = 0usize;

        let fail = |detail: String| GuardianError::BundleFailed { detail };

        zip.start_file("system-info.txt", options)
            .map_err(|e| fail(e.to_string()))?;
        zip.write_all(self.system_info(state, now).as_bytes())
            .map_err(|e| fail(e.to_string()))?;
        entries += 1;

        if let Some(state) = state {
            let processes = serde_json::to_string_pretty(&state.processes)
                .map_err(|e| fail(e.to_string()))?;
            zip.start_file("processes.json", options)
                .map_err(|e| fail(e.to_string()))?;
            zip.write_all(processes.as_bytes())
                .map_err(|e| fail(e.to_string()))?;
            entries += 1;

            let snapshot =
                serde_json::to_string_pretty(state).map_err(|e| fail(e.to_string()))?;
            zip.start_file("state.json", options)
                .map_err(|e| fail(e.to_string()))?;
            zip.write_all(snapshot.as_bytes())
                .map_err(|e| fail(e.to_string()))?;
            entries += 1;
        }

        for (name, source) in [
            ("journal.jsonl", store.journal_path()),
            ("incidents.jsonl", store.incidents_path()),
        ] {
            if let Ok(bytes) = fs::read(&source) {
                zip.start_file(name, options).map_err(|e| fail(e.to_string()))?;
                zip.write_all(&bytes).map_err(|e| fail(e.to_string()))?;
                entries += 1;
            }
        }

        for (index, (log_path, _)) in recent_files(&self.watch_dir, TAIL_FILE_LIMIT)
            .into_iter()
            .enumerate()
        {
            let Some(tail) = tail_lines(&log_path, self.thresholds.tail_lines) else {
                continue;
            };
            let base = log_path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| format!("log-{index}"));
            zip.start_file(format!("logs/{index:02}-{base}.tail.txt"), options)
                .map_err(|e| fail(e.to_string()))?;
            zip.write_all(tail.as_bytes())
                .map_err(|e| fail(e.to_string()))?;
            entries += 1;
        }

        zip.finish().map_err(|e| fail(e.to_string()))?;
        let archive_bytes = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        Ok(BundleSummary {
            path,
            entries,
            archive_bytes,
        })
    }

    fn system_info(&self, state: Option<&GuardianState>, now: i64) -> String {
        let mut out = String::new();
        out.push_str(&format!("guardiand {}\n", env!("CARGO_PKG_VERSION")));
        out.push_str(&format!("captured-at: {now}\n"));
        out.push_str(&format!(
            "host: {}\n",
            System::host_name().unwrap_or_else(|| "unknown".to_string())
        ));
        out.push_str(&format!(
            "os: {} {}\n",
            System::name().unwrap_or_else(|| "unknown".to_string()),
            System::os_version().unwrap_or_default()
        ));
        out.push_str(&format!("watch-dir: {}\n", self.watch_dir.display()));
        if let Some(state) = state {
            out.push_str(&format!("risk: {}\n", state.hang_risk.level.as_str()));
            out.push_str(&format!("attention: {}\n", state.attention.level.as_str()));
            out.push_str(&format!("disk-free-gb: {:.1}\n", state.disk_free_gb));
            out.push_str(&format!("log-tree-mb: {:.1}\n", state.log_tree_size_mb));
            if let Some(incident) = &state.active_incident {
                out.push_str(&format!(
                    "incident: {} peak={} since={}\n",
                    incident.id,
                    incident.peak_level.as_str(),
                    incident.started_at
                ));
            }
        }
        out.push_str(&format!(
            "thresholds: hang-grace={}s critical-after={}s bundle-cooldown={}s\n",
            self.thresholds.grace_window_seconds,
            self.thresholds.critical_after_seconds,
            self.thresholds.bundle_cooldown_seconds,
        ));
        out
    }
}

/// Trailing `limit` lines of a file, or None for unreadable/binary-ish
/// content.
fn tail_lines(path: &Path, limit: usize) -> Option<String> {
    let contents = fs::read_to_string(path).ok()?;
    let lines: Vec<&str> = contents.lines().collect();
    let start = lines.len().saturating_sub(limit);
    let mut out = lines[start..].join("\n");
    out.push('\n');
    Some(out)
}
