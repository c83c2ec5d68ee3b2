//! Process probe: enumerate assistant processes, sample CPU and memory,
//! lazily count open handles.
//!
//! CPU% is the short-window utilization between two refreshes of one
//! persistent `sysinfo::System`; the first observation of a PID reports
//! zero and settles on the next poll. Handle counting is a separate,
//! slower call with per-OS dispatch and a hard timeout.

#[cfg(not(target_os = "linux"))]
use std::time::Duration;

use sysinfo::{ProcessStatus, System};

use crate::types::ProcessSample;

/// Hard deadline for shelling out per PID (macOS `lsof`).
#[cfg(not(target_os = "linux"))]
const HANDLE_PROBE_TIMEOUT: Duration = Duration::from_secs(3);

pub struct ProcessProbe {
    system: System,
    prefix: String,
}

impl ProcessProbe {
    pub fn new(prefix: impl Into<String>) -> Self {
        ProcessProbe {
            system: System::new_all(),
            prefix: prefix.into(),
        }
    }

    /// Sample all watched processes. Fresh records each call; nothing is
    /// retained across polls.
    pub fn sample(&mut self) -> Vec<ProcessSample> {
        self.system.refresh_all();
        let mut samples: Vec<ProcessSample> = self
            .system
            .processes()
            .iter()
            .filter_map(|(pid, process)| {
                let name = process.name().to_string_lossy().to_string();
                if !name_matches(&name, &self.prefix) {
                    return None;
                }
                if matches!(process.status(), ProcessStatus::Zombie | ProcessStatus::Dead) {
                    return None;
                }
                Some(ProcessSample {
                    pid: pid.as_u32(),
                    name,
                    cpu_percent: process.cpu_usage(),
                    memory_mb: process.memory() / (1024 * 1024),
                    uptime_seconds: process.run_time(),
                    handle_count: None,
                })
            })
            .collect();
        samples.sort_by_key(|s| s.pid);
        samples
    }

    /// Attach handle counts to already-sampled processes. Best-effort:
    /// a per-PID failure leaves that sample's count as None.
    pub async fn attach_handle_counts(&self, samples: &mut [ProcessSample]) {
        for sample in samples.iter_mut() {
            sample.handle_count = handle_count(sample.pid).await;
        }
    }
}

/// Watched processes are selected by name prefix ("claude" matches
/// claude, claude-code, claude-helper, ...).
pub fn name_matches(name: &str, prefix: &str) -> bool {
    name.starts_with(prefix)
}

/// Open handle / fd count for one PID, or None when unavailable.
#[cfg(target_os = "linux")]
pub async fn handle_count(pid: u32) -> Option<u32> {
    // /proc reads do not need a subprocess or a timeout.
    let dir = format!("/proc/{pid}/fd");
    match std::fs::read_dir(dir) {
        Ok(entries) => Some(entries.count() as u32),
        Err(_) => None,
    }
}

#[cfg(target_os = "macos")]
pub async fn handle_count(pid: u32) -> Option<u32> {
    let output = tokio::time::timeout(
        HANDLE_PROBE_TIMEOUT,
        tokio::process::Command::new("lsof")
            .arg("-p")
            .arg(pid.to_string())
            .kill_on_drop(true)
            .output(),
    )
    .await
    .ok()?
    .ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout);
    // First line is the header.
    Some(text.lines().count().saturating_sub(1) as u32)
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
pub async fn handle_count(_pid: u32) -> Option<u32> {
    let _ = HANDLE_PROBE_TIMEOUT;
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_matching_selects_assistant_processes() {
        assert!(name_matches("claude", "claude"));
        assert!(name_matches("claude-code", "claude"));
        assert!(!name_matches("cargo", "claude"));
        assert!(!name_matches("xclaude", "claude"));
    }

    #[test]
    fn sample_returns_sorted_fresh_records() {
        let mut probe = ProcessProbe::new("definitely-not-a-real-process-name");
        let samples = probe.sample();
        assert!(samples.is_empty());
    }

    #[tokio::test]
    async fn handle_count_of_missing_pid_is_none() {
        // PID 0 is never an inspectable userland process.
        #[cfg(target_os = "linux")]
        assert_eq!(handle_count(0).await, None);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn handle_count_of_self_is_positive() {
        let count = handle_count(std::process::id()).await;
        assert!(count.unwrap_or(0) > 0);
    }
}
