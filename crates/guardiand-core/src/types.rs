//! Core types for guardiand
//!
//! Every record that crosses a file or RPC boundary lives here and
//! serializes camelCase.

use serde::{Deserialize, Serialize};

// ============ Risk ============

/// Hang-risk level produced by the detector.
///
/// Ordering matters: `Ok < Warn < Critical`, so peak-level escalation is
/// a plain `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Ok,
    Warn,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Ok => "ok",
            RiskLevel::Warn => "warn",
            RiskLevel::Critical => "critical",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "ok" => Some(RiskLevel::Ok),
            "warn" => Some(RiskLevel::Warn),
            "critical" => Some(RiskLevel::Critical),
            _ => None,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, RiskLevel::Ok)
    }
}

/// Composite hang-risk record. Pure output of the detector; `reasons`
/// carries one line per true condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HangRisk {
    pub level: RiskLevel,
    /// Seconds both log-quiet and cpu-low have held (the composite counter).
    pub no_activity_seconds: i64,
    /// Same accrual as `no_activity_seconds`; zeroed while CPU is active.
    pub cpu_low_seconds: i64,
    pub cpu_hot: bool,
    pub memory_high: bool,
    pub disk_low: bool,
    pub grace_remaining_seconds: i64,
    pub reasons: Vec<String>,
}

impl HangRisk {
    /// A neutral record for degraded snapshots (no daemon context).
    pub fn quiet_ok() -> Self {
        HangRisk {
            level: RiskLevel::Ok,
            no_activity_seconds: 0,
            cpu_low_seconds: 0,
            cpu_hot: false,
            memory_high: false,
            disk_low: false,
            grace_remaining_seconds: 0,
            reasons: Vec::new(),
        }
    }
}

// ============ Probes ============

/// One watched process, sampled fresh each poll and never retained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessSample {
    pub pid: u32,
    pub name: String,
    pub cpu_percent: f32,
    pub memory_mb: u64,
    pub uptime_seconds: u64,
    /// Open handle / fd count. Lazy and best-effort; None when the
    /// platform call failed or timed out.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handle_count: Option<u32>,
}

/// Derived activity signals for the current poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivitySignals {
    /// Seconds since the newest mtime in the log tree; -1 when unknown.
    pub log_last_modified_seconds_ago: i64,
    pub cpu_active: bool,
    /// Which signals contributed: "log-mtime" and/or "cpu".
    pub sources: Vec<String>,
}

impl ActivitySignals {
    pub fn unknown() -> Self {
        ActivitySignals {
            log_last_modified_seconds_ago: -1,
            cpu_active: false,
            sources: Vec::new(),
        }
    }
}

// ============ Incident ============

/// A window from the first non-ok risk observation to the first
/// subsequent ok. At most one is active at any time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Incident {
    pub id: String,
    pub started_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<i64>,
    pub reason: String,
    /// Monotone: once critical, never demoted.
    pub peak_level: RiskLevel,
    pub bundle_captured: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bundle_path: Option<String>,
}

// ============ Budget ============

/// A time-bounded grant of concurrency slots. Immutable once granted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lease {
    pub id: String,
    pub slots: u32,
    pub reason: String,
    pub granted_at: i64,
    pub expires_at: i64,
}

/// Persisted budget record. Operations live in `crate::budget`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Budget {
    pub current_cap: u32,
    pub base_cap: u32,
    #[serde(default)]
    pub leases: Vec<Lease>,
    /// Which risk level set the current (reduced) cap, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cap_set_by_risk: Option<RiskLevel>,
    pub cap_changed_at: i64,
    /// Set while the cap is reduced and the most recent risk was ok;
    /// drives the hysteresis clock.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ok_since_at: Option<i64>,
}

/// Point-in-time view of the budget for RPC and the persisted snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetSummary {
    pub current_cap: u32,
    pub base_cap: u32,
    pub slots_in_use: u32,
    pub slots_available: u32,
    pub active_leases: Vec<Lease>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cap_set_by_risk: Option<RiskLevel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ok_since_at: Option<i64>,
    pub hysteresis_remaining_seconds: i64,
}

// ============ Attention ============

/// Operator-visible urgency level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttentionLevel {
    None,
    Info,
    Warn,
    Critical,
}

impl AttentionLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttentionLevel::None => "none",
            AttentionLevel::Info => "info",
            AttentionLevel::Warn => "warn",
            AttentionLevel::Critical => "critical",
        }
    }
}

/// Fused risk + incident + budget + disk signal. `since` is preserved
/// across polls while the level is unchanged, so dwell time is
/// observable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attention {
    pub level: AttentionLevel,
    pub since: i64,
    pub reason: String,
    pub recommended_actions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub incident_id: Option<String>,
}

impl Attention {
    pub fn none(now: i64) -> Self {
        Attention {
            level: AttentionLevel::None,
            since: now,
            reason: "healthy".to_string(),
            recommended_actions: Vec::new(),
            incident_id: None,
        }
    }
}

// ============ Persisted snapshot ============

/// The full persisted snapshot, rewritten atomically on each poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuardianState {
    pub updated_at: i64,
    pub daemon_running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub daemon_pid: Option<u32>,
    pub processes: Vec<ProcessSample>,
    pub activity: ActivitySignals,
    pub hang_risk: HangRisk,
    pub recommended_actions: Vec<String>,
    /// -1.0 when the disk probe failed this poll.
    pub disk_free_gb: f64,
    pub log_tree_size_mb: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_incident: Option<Incident>,
    pub process_age_seconds: i64,
    pub composite_quiet_seconds: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub budget_summary: Option<BudgetSummary>,
    pub attention: Attention,
}

impl GuardianState {
    /// An empty snapshot, used when nothing has ever been persisted.
    pub fn empty(now: i64) -> Self {
        GuardianState {
            updated_at: now,
            daemon_running: false,
            daemon_pid: None,
            processes: Vec::new(),
            activity: ActivitySignals::unknown(),
            hang_risk: HangRisk::quiet_ok(),
            recommended_actions: Vec::new(),
            disk_free_gb: -1.0,
            log_tree_size_mb: 0.0,
            active_incident: None,
            process_age_seconds: 0,
            composite_quiet_seconds: 0,
            budget_summary: None,
            attention: Attention::none(now),
        }
    }
}

// ============ Journal ============

/// One line of the append-only action journal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalEntry {
    pub timestamp: i64,
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_before: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_after: Option<u64>,
}

// ============ Recovery plan ============

/// Top-level recovery plan status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Healthy,
    ActionNeeded,
    Urgent,
}

impl PlanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanStatus::Healthy => "healthy",
            PlanStatus::ActionNeeded => "action_needed",
            PlanStatus::Urgent => "urgent",
        }
    }
}

/// One ordered step of the recovery plan. `tool` names an RPC tool when
/// the step is tool-addressable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanStep {
    pub order: u32,
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryPlan {
    pub status: PlanStatus,
    pub steps: Vec<PlanStep>,
}

// ============ Helpers ============

/// Current wall-clock time as epoch seconds.
pub fn now_epoch() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Fresh 8-char opaque id for incidents and leases.
pub fn short_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    id[..8].to_string()
}
