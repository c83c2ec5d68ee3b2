//! Hang-risk detector.
//!
//! Pure function over the current poll's signals: no clock reads, no
//! side effects. Escalation to critical requires the composite signal
//! (log-quiet AND cpu-low, sustained); no single signal can produce it.

use crate::config::Thresholds;
use crate::types::{ActivitySignals, HangRisk, ProcessSample, RiskLevel};

/// Everything the detector is allowed to look at.
#[derive(Debug, Clone)]
pub struct DetectorInput<'a> {
    pub processes: &'a [ProcessSample],
    pub activity: &'a ActivitySignals,
    /// -1.0 means the disk probe failed; treated as not-low.
    pub disk_free_gb: f64,
    pub hang_threshold_seconds: i64,
    pub process_age_seconds: i64,
    pub composite_quiet_seconds: i64,
}

/// Evaluate the rule table in its fixed order.
pub fn assess(input: &DetectorInput<'_>, thresholds: &Thresholds) -> HangRisk {
    let grace_remaining = (thresholds.grace_window_seconds - input.process_age_seconds).max(0);

    let cpu_hot = input
        .processes
        .iter()
        .any(|p| p.cpu_percent > thresholds.cpu_hot_percent);
    let memory_high = input
        .processes
        .iter()
        .any(|p| p.memory_mb > thresholds.memory_high_mb);
    let disk_low =
        input.disk_free_gb >= 0.0 && input.disk_free_gb < thresholds.disk_free_warning_gb;

    let log_age = input.activity.log_last_modified_seconds_ago;
    let log_quiet = log_age < 0 || log_age > input.hang_threshold_seconds;
    let cpu_low = !input.activity.cpu_active;
    let quiet = input.composite_quiet_seconds;

    let hang_warn = log_quiet && cpu_low && quiet > input.hang_threshold_seconds;
    let hang_critical =
        hang_warn && quiet > input.hang_threshold_seconds + thresholds.critical_after_seconds;

    let level = if grace_remaining > 0 {
        // Grace shields hang-based escalation only; disk pressure bypasses it.
        if disk_low {
            RiskLevel::Warn
        } else {
            RiskLevel::Ok
        }
    } else if hang_critical {
        RiskLevel::Critical
    } else if hang_warn {
        RiskLevel::Warn
    } else if disk_low {
        RiskLevel::Warn
    } else if cpu_hot && memory_high {
        RiskLevel::Warn
    } else {
        RiskLevel::Ok
    };

    let mut reasons = Vec::new();
    if grace_remaining > 0 {
        reasons.push(format!("Startup grace: {grace_remaining}s remaining"));
    }
    if hang_warn {
        reasons.push(format!("No activity for {quiet}s"));
    }
    if disk_low {
        reasons.push(format!("Low disk space: {:.1}GB free", input.disk_free_gb));
    }
    if cpu_hot {
        reasons.push(format!(
            "CPU above {:.0}% on a watched process",
            thresholds.cpu_hot_percent
        ));
    }
    if memory_high {
        reasons.push(format!(
            "Resident memory above {}MB on a watched process",
            thresholds.memory_high_mb
        ));
    }

    HangRisk {
        level,
        no_activity_seconds: quiet,
        cpu_low_seconds: if cpu_low { quiet } else { 0 },
        cpu_hot,
        memory_high,
        disk_low,
        grace_remaining_seconds: grace_remaining,
        reasons,
    }
}
