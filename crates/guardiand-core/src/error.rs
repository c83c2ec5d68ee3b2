//! Error type shared across the daemon, the tool handlers and the CLI.
//!
//! Every variant carries a stable code and a one-line operator hint; the
//! RPC boundary renders them as `{code, message, hint, cause}` and the
//! CLI maps them to exit codes.

use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum GuardianError {
    #[error("state file is corrupt: {detail}")]
    StateCorrupt { detail: String },

    #[error("failed to write state: {detail}")]
    StateWriteFailed {
        detail: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("budget file is corrupt: {detail}")]
    BudgetCorrupt { detail: String },

    #[error("failed to write budget: {detail}")]
    BudgetWriteFailed {
        detail: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("bundle capture failed: {detail}")]
    BundleFailed { detail: String },

    #[error("log scan failed: {detail}")]
    ScanFailed { detail: String },

    #[error("log fix failed: {detail}")]
    FixFailed { detail: String },

    #[error("process scan failed: {detail}")]
    ProcessScanFailed { detail: String },

    #[error("disk check failed: {detail}")]
    DiskCheckFailed { detail: String },

    #[error("{detail}")]
    Unknown { detail: String },
}

impl GuardianError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            GuardianError::StateCorrupt { .. } => "STATE_CORRUPT",
            GuardianError::StateWriteFailed { .. } => "STATE_WRITE_FAILED",
            GuardianError::BudgetCorrupt { .. } => "BUDGET_CORRUPT",
            GuardianError::BudgetWriteFailed { .. } => "BUDGET_WRITE_FAILED",
            GuardianError::BundleFailed { .. } => "BUNDLE_FAILED",
            GuardianError::ScanFailed { .. } => "SCAN_FAILED",
            GuardianError::FixFailed { .. } => "FIX_FAILED",
            GuardianError::ProcessScanFailed { .. } => "PROCESS_SCAN_FAILED",
            GuardianError::DiskCheckFailed { .. } => "DISK_CHECK_FAILED",
            GuardianError::Unknown { .. } => "UNKNOWN",
        }
    }

    /// One-line operator directive.
    pub fn hint(&self) -> &'static str {
        match self {
            GuardianError::StateCorrupt { .. } => {
                "A corruption backup was kept next to state.json; the next poll repopulates it"
            }
            GuardianError::StateWriteFailed { .. } => {
                "Check free space and permissions on the guardian data directory"
            }
            GuardianError::BudgetCorrupt { .. } => {
                "The budget was reset to defaults; re-acquire any leases you still need"
            }
            GuardianError::BudgetWriteFailed { .. } => {
                "Check free space and permissions on the guardian data directory"
            }
            GuardianError::BundleFailed { .. } => {
                "Retry doctor with an explicit --output path on a writable disk"
            }
            GuardianError::ScanFailed { .. } => {
                "Verify the watched log directory exists and is readable"
            }
            GuardianError::FixFailed { .. } => {
                "Re-run preflight_fix; partially fixed files are safe to fix again"
            }
            GuardianError::ProcessScanFailed { .. } => {
                "Process enumeration is best-effort; the next poll retries"
            }
            GuardianError::DiskCheckFailed { .. } => {
                "Disk probing is best-effort; the next poll retries"
            }
            GuardianError::Unknown { .. } => "See the daemon log for details",
        }
    }

    /// Structured payload for the RPC boundary. Never a stack trace.
    pub fn payload(&self) -> serde_json::Value {
        let cause = std::error::Error::source(self).map(|s| s.to_string());
        json!({
            "code": self.code(),
            "message": self.to_string(),
            "hint": self.hint(),
            "cause": cause,
        })
    }

    pub fn unknown(detail: impl Into<String>) -> Self {
        GuardianError::Unknown { detail: detail.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        let e = GuardianError::BudgetCorrupt { detail: "bad json".into() };
        assert_eq!(e.code(), "BUDGET_CORRUPT");
        let e = GuardianError::ScanFailed { detail: "gone".into() };
        assert_eq!(e.code(), "SCAN_FAILED");
    }

    #[test]
    fn payload_is_structured() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let e = GuardianError::StateWriteFailed {
            detail: "state.json".into(),
            source: Some(io),
        };
        let p = e.payload();
        assert_eq!(p["code"], "STATE_WRITE_FAILED");
        assert!(p["message"].as_str().unwrap().contains("state.json"));
        assert!(!p["hint"].as_str().unwrap().is_empty());
        assert_eq!(p["cause"], "denied");
    }
}
