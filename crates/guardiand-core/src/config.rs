//! Configuration: the hardcoded threshold table plus the few user knobs.

use std::path::PathBuf;

/// Hardcoded operating thresholds.
///
/// These are deliberately not user-configurable; the tuned values encode
/// the detector's false-positive guarantees. The user knobs live on
/// [`GuardianConfig`].
#[derive(Debug, Clone, PartialEq)]
pub struct Thresholds {
    pub poll_interval_ms: u64,
    pub disk_free_warning_gb: f64,
    pub max_file_size_mb: u64,
    pub retain_days: i64,
    pub stale_session_days: i64,
    pub tail_lines: usize,
    pub cpu_low_percent: f32,
    pub cpu_hot_percent: f32,
    pub memory_high_mb: u64,
    pub grace_window_seconds: i64,
    pub critical_after_seconds: i64,
    pub bundle_cooldown_seconds: i64,
    pub hysteresis_seconds: i64,
    pub base_cap: u32,
    pub warn_cap: u32,
    pub critical_cap: u32,
    pub state_staleness_seconds: i64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Thresholds {
            poll_interval_ms: 2000,
            disk_free_warning_gb: 5.0,
            max_file_size_mb: 25,
            retain_days: 7,
            stale_session_days: 30,
            tail_lines: 500,
            cpu_low_percent: 5.0,
            cpu_hot_percent: 95.0,
            memory_high_mb: 4096,
            grace_window_seconds: 60,
            critical_after_seconds: 600,
            bundle_cooldown_seconds: 300,
            hysteresis_seconds: 60,
            base_cap: 4,
            warn_cap: 2,
            critical_cap: 1,
            state_staleness_seconds: 10,
        }
    }
}

/// Runtime configuration for the daemon and the tool handlers.
#[derive(Debug, Clone)]
pub struct GuardianConfig {
    /// Where state.json, budget.json, journals and bundles live.
    pub data_dir: PathBuf,
    /// The assistant's log tree (session artifacts).
    pub watch_dir: PathBuf,
    /// Process-name prefix selecting the watched processes.
    pub process_prefix: String,
    /// Hang threshold: seconds of composite quiet before warn.
    pub hang_threshold_seconds: i64,
    /// Log-tree size above which preflight recommends a fix.
    pub max_log_dir_mb: u64,
    /// Let the polling loop run the log manager aggressively under disk
    /// pressure.
    pub auto_fix: bool,
    /// Reserved for a future watchdog mode; never read by the daemon.
    pub auto_restart: bool,
    pub thresholds: Thresholds,
}

impl Default for GuardianConfig {
    fn default() -> Self {
        GuardianConfig {
            data_dir: default_data_dir(),
            watch_dir: default_watch_dir(),
            process_prefix: "claude".to_string(),
            hang_threshold_seconds: 300,
            max_log_dir_mb: 200,
            auto_fix: true,
            auto_restart: false,
            thresholds: Thresholds::default(),
        }
    }
}

impl GuardianConfig {
    /// Build a config from the environment, falling back to defaults.
    ///
    /// Recognized variables: `GUARDIAN_HOME`, `GUARDIAN_WATCH_DIR`,
    /// `GUARDIAN_HANG_SECONDS`, `GUARDIAN_MAX_LOG_MB`,
    /// `GUARDIAN_AUTO_FIX` (0/false to disable).
    pub fn from_env() -> Self {
        let mut config = GuardianConfig::default();
        if let Some(home) = env_path("GUARDIAN_HOME") {
            config.data_dir = home;
        }
        if let Some(dir) = env_path("GUARDIAN_WATCH_DIR") {
            config.watch_dir = dir;
        }
        if let Ok(v) = std::env::var("GUARDIAN_HANG_SECONDS") {
            if let Ok(secs) = v.parse::<i64>() {
                if secs > 0 {
                    config.hang_threshold_seconds = secs;
                }
            }
        }
        if let Ok(v) = std::env::var("GUARDIAN_MAX_LOG_MB") {
            if let Ok(mb) = v.parse::<u64>() {
                if mb > 0 {
                    config.max_log_dir_mb = mb;
                }
            }
        }
        if let Ok(v) = std::env::var("GUARDIAN_AUTO_FIX") {
            config.auto_fix = !matches!(v.as_str(), "0" | "false" | "off");
        }
        config
    }
}

fn env_path(var: &str) -> Option<PathBuf> {
    std::env::var(var).ok().filter(|v| !v.is_empty()).map(PathBuf::from)
}

/// `$GUARDIAN_HOME` or `~/.claude-guardian`.
pub fn default_data_dir() -> PathBuf {
    if let Some(home) = env_path("GUARDIAN_HOME") {
        return home;
    }
    dirs::home_dir()
        .map(|h| h.join(".claude-guardian"))
        .unwrap_or_else(|| PathBuf::from(".claude-guardian"))
}

/// `$GUARDIAN_WATCH_DIR` or `~/.claude/projects`.
pub fn default_watch_dir() -> PathBuf {
    if let Some(dir) = env_path("GUARDIAN_WATCH_DIR") {
        return dir;
    }
    dirs::home_dir()
        .map(|h| h.join(".claude").join("projects"))
        .unwrap_or_else(|| PathBuf::from(".claude/projects"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_table_matches_contract() {
        let t = Thresholds::default();
        assert_eq!(t.poll_interval_ms, 2000);
        assert_eq!(t.disk_free_warning_gb, 5.0);
        assert_eq!(t.grace_window_seconds, 60);
        assert_eq!(t.critical_after_seconds, 600);
        assert_eq!(t.bundle_cooldown_seconds, 300);
        assert_eq!(t.hysteresis_seconds, 60);
        assert_eq!((t.base_cap, t.warn_cap, t.critical_cap), (4, 2, 1));
        assert_eq!(t.state_staleness_seconds, 10);
        assert_eq!(t.tail_lines, 500);
    }

    #[test]
    fn default_config_knobs() {
        let c = GuardianConfig::default();
        assert_eq!(c.process_prefix, "claude");
        assert_eq!(c.hang_threshold_seconds, 300);
        assert_eq!(c.max_log_dir_mb, 200);
        assert!(c.auto_fix);
        assert!(!c.auto_restart);
    }
}
