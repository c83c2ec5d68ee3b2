//! Log manager: scan the watched tree, compress old session logs, trim
//! oversized text files to their tail, delete stale session artifacts.
//!
//! Rotation never discards content (compression only) and trimming
//! keeps the tail lines, so nothing a user wrote disappears wholesale.
//! `memory` and `sessions-index.json` are never touched.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::config::Thresholds;
use crate::error::GuardianError;
use crate::store::GuardianStore;
use crate::types::{now_epoch, JournalEntry};

/// Session artifact names: `<uuid>.jsonl`, `<uuid>.jsonl.gz`, or a bare
/// `<uuid>` directory (canonical 8-4-4-4-12 hex).
static SESSION_ARTIFACT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}(\.jsonl(\.gz)?)?$",
    )
    .expect("session artifact pattern")
});

/// Names that are never rotated, trimmed, or deleted.
const PROTECTED_NAMES: &[&str] = &["memory", "sessions-index.json"];

/// Extensions eligible for tail-trimming when oversized.
const TEXT_EXTENSIONS: &[&str] = &["jsonl", "log", "txt"];

/// Scan result: what the tree looks like and what a fix would touch.
#[derive(Debug, Clone, Default)]
pub struct LogScan {
    pub file_count: usize,
    pub total_size_bytes: u64,
    /// Uncompressed session logs past the retention window.
    pub compressible: Vec<PathBuf>,
    /// Text files over the size limit.
    pub oversized: Vec<PathBuf>,
    /// Session artifacts past the stale window.
    pub stale_sessions: Vec<PathBuf>,
}

impl LogScan {
    pub fn total_size_mb(&self) -> f64 {
        self.total_size_bytes as f64 / (1024.0 * 1024.0)
    }

    pub fn needs_fix(&self) -> bool {
        !self.compressible.is_empty() || !self.oversized.is_empty() || !self.stale_sessions.is_empty()
    }
}

/// What a fix pass actually did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FixReport {
    pub compressed: usize,
    pub trimmed: usize,
    pub deleted: usize,
    pub bytes_before: u64,
    pub bytes_after: u64,
}

impl FixReport {
    pub fn reclaimed_bytes(&self) -> u64 {
        self.bytes_before.saturating_sub(self.bytes_after)
    }
}

pub struct LogManager {
    watch_dir: PathBuf,
    thresholds: Thresholds,
}

impl LogManager {
    pub fn new(watch_dir: impl Into<PathBuf>, thresholds: Thresholds) -> Self {
        LogManager {
            watch_dir: watch_dir.into(),
            thresholds,
        }
    }

    /// Windows and limits for one pass. Aggressive mode halves all of
    /// them.
    fn limits(&self, aggressive: bool) -> (Duration, Duration, u64) {
        let divisor = if aggressive { 2 } else { 1 };
        let retain = Duration::from_secs(self.thresholds.retain_days as u64 * 86_400 / divisor);
        let stale = Duration::from_secs(self.thresholds.stale_session_days as u64 * 86_400 / divisor);
        let max_bytes = self.thresholds.max_file_size_mb * 1024 * 1024 / divisor;
        (retain, stale, max_bytes)
    }

    /// Walk the tree and classify, without touching anything.
    pub fn scan(&self, aggressive: bool, now: SystemTime) -> Result<LogScan, GuardianError> {
        if !self.watch_dir.exists() {
            // An absent tree scans empty; the assistant may simply not
            // have run yet.
            return Ok(LogScan::default());
        }
        let (retain, stale, max_bytes) = self.limits(aggressive);
        let mut scan = LogScan::default();

        let walker = WalkDir::new(&self.watch_dir)
            .into_iter()
            // Pruning here keeps protected subtrees entirely out of reach.
            .filter_entry(|e| !is_protected(&e.file_name().to_string_lossy()));
        for entry in walker.filter_map(|e| e.ok()) {
            let name = entry.file_name().to_string_lossy().to_string();
            let Ok(meta) = entry.metadata() else { continue };
            let age = meta
                .modified()
                .ok()
                .and_then(|m| now.duration_since(m).ok())
                .unwrap_or_default();

            if entry.file_type().is_dir() {
                if entry.depth() > 0 && is_session_artifact(&name) && age > stale {
                    scan.stale_sessions.push(entry.path().to_path_buf());
                }
                continue;
            }
            if !entry.file_type().is_file() {
                continue;
            }

            scan.file_count += 1;
            scan.total_size_bytes += meta.len();

            if is_session_artifact(&name) && age > stale {
                scan.stale_sessions.push(entry.path().to_path_buf());
                continue;
            }
            if name.ends_with(".jsonl") && age > retain {
                scan.compressible.push(entry.path().to_path_buf());
                continue;
            }
            if meta.len() > max_bytes && is_text_file(&name) {
                scan.oversized.push(entry.path().to_path_buf());
            }
        }
        Ok(scan)
    }

    /// Apply the scan: compress, trim, delete. Each mutation is
    /// journaled; a failure on one file is recorded and the pass
    /// continues.
    pub fn fix(
        &self,
        aggressive: bool,
        store: &GuardianStore,
        now: SystemTime,
    ) -> Result<FixReport, GuardianError> {
        let scan = self.scan(aggressive, now)?;
        let mut report = FixReport {
            bytes_before: scan.total_size_bytes,
            ..FixReport::default()
        };

        for path in &scan.compressible {
            match compress_file(path) {
                Ok((before, after)) => {
                    report.compressed += 1;
                    journal(store, "compress", path, "gzipped session log", before, after);
                }
                Err(e) => debug!(path = %path.display(), error = %e, "compress skipped"),
            }
        }

        for path in &scan.oversized {
            match trim_to_tail(path, self.thresholds.tail_lines) {
                Ok((before, after)) => {
                    report.trimmed += 1;
                    journal(store, "trim", path, "kept trailing lines", before, after);
                }
                Err(e) => debug!(path = %path.display(), error = %e, "trim skipped"),
            }
        }

        for path in &scan.stale_sessions {
            match remove_artifact(path) {
                Ok(before) => {
                    report.deleted += 1;
                    journal(store, "delete-stale", path, "stale session artifact", before, 0);
                }
                Err(e) => debug!(path = %path.display(), error = %e, "delete skipped"),
            }
        }

        let after = self.scan(aggressive, now)?;
        report.bytes_after = after.total_size_bytes;
        info!(
            compressed = report.compressed,
            trimmed = report.trimmed,
            deleted = report.deleted,
            reclaimed = report.reclaimed_bytes(),
            aggressive,
            "Log fix pass finished"
        );
        Ok(report)
    }
}

pub fn is_protected(name: &str) -> bool {
    PROTECTED_NAMES.contains(&name)
}

pub fn is_session_artifact(name: &str) -> bool {
    SESSION_ARTIFACT.is_match(name)
}

fn is_text_file(name: &str) -> bool {
    Path::new(name)
        .extension()
        .map_or(false, |ext| TEXT_EXTENSIONS.iter().any(|t| ext == *t))
}

/// Gzip `path` to a `.gz` sibling; the original is removed only once the
/// compressed copy is fully written.
fn compress_file(path: &Path) -> std::io::Result<(u64, u64)> {
    let before = fs::metadata(path)?.len();
    let gz_path = path.with_file_name(format!(
        "{}.gz",
        path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default()
    ));

    let mut input = fs::File::open(path)?;
    let output = fs::File::create(&gz_path)?;
    let mut encoder = flate2::write::GzEncoder::new(output, flate2::Compression::default());
    std::io::copy(&mut input, &mut encoder)?;
    encoder.finish()?;

    let after = fs::metadata(&gz_path)?.len();
    fs::remove_file(path)?;
    Ok((before, after))
}

/// Rewrite `path` keeping only its trailing `tail_lines` lines, via a
/// sibling-then-rename so a crash cannot leave a truncated file.
fn trim_to_tail(path: &Path, tail_lines: usize) -> std::io::Result<(u64, u64)> {
    let before = fs::metadata(path)?.len();
    let contents = fs::read_to_string(path)?;
    let lines: Vec<&str> = contents.lines().collect();
    let keep = if lines.len() > tail_lines {
        &lines[lines.len() - tail_lines..]
    } else {
        &lines[..]
    };

    let name = path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
    let tmp = path.with_file_name(format!("{name}.tmp"));
    {
        let mut file = fs::File::create(&tmp)?;
        for line in keep {
            file.write_all(line.as_bytes())?;
            file.write_all(b"\n")?;
        }
    }
    fs::rename(&tmp, path)?;
    let after = fs::metadata(path)?.len();
    Ok((before, after))
}

fn remove_artifact(path: &Path) -> std::io::Result<u64> {
    let meta = fs::metadata(path)?;
    if meta.is_dir() {
        fs::remove_dir_all(path)?;
    } else {
        fs::remove_file(path)?;
    }
    Ok(meta.len())
}

fn journal(store: &GuardianStore, action: &str, target: &Path, detail: &str, before: u64, after: u64) {
    let entry = JournalEntry {
        timestamp: now_epoch(),
        action: action.to_string(),
        target: Some(target.display().to_string()),
        detail: detail.to_string(),
        size_before: Some(before),
        size_after: Some(after),
    };
    if let Err(e) = store.append_journal(&entry) {
        debug!(error = %e, "journal append failed");
    }
}
