//! Recovery planner: a deterministic, ordered step list naming the RPC
//! tools to call, derived entirely from the persisted snapshot.

use crate::types::{GuardianState, PlanStatus, PlanStep, RecoveryPlan, RiskLevel};

/// Build the plan for a snapshot. Same snapshot, same plan.
pub fn build_plan(state: &GuardianState) -> RecoveryPlan {
    let risk = &state.hang_risk;
    let mut steps = StepList::new();

    let status = match risk.level {
        RiskLevel::Critical => {
            steps.add(
                "Capture diagnostics and run safe remediation",
                Some("nudge"),
                "Compress old logs, trim oversized files, capture a bundle if one is missing",
            );
            steps.add(
                "Release concurrency",
                Some("budget_get"),
                "Inspect held leases; release what is no longer needed",
            );
            if risk.disk_low {
                steps.add(
                    "Free disk space",
                    Some("preflight_fix"),
                    "Run in aggressive mode to halve retention windows",
                );
            }
            steps.add(
                "Verify status",
                Some("status"),
                "Confirm whether composite quiet is still accruing",
            );
            steps.add(
                "Reduce workload",
                None,
                "Pause new heavy tasks until the risk level drops",
            );
            let missing_bundle = state
                .active_incident
                .as_ref()
                .map_or(false, |i| !i.bundle_captured);
            if missing_bundle {
                steps.add(
                    "Force a diagnostic bundle",
                    Some("doctor"),
                    "Evidence for this incident has not been captured yet",
                );
            }
            PlanStatus::Urgent
        }
        RiskLevel::Warn => {
            steps.add(
                "Run safe remediation",
                Some("nudge"),
                "Idempotent log hygiene; never escalates on its own",
            );
            if risk.disk_low {
                steps.add(
                    "Reclaim log space",
                    Some("preflight_fix"),
                    "Compress and trim the watched log tree",
                );
            }
            if risk.no_activity_seconds > 0 {
                steps.add(
                    "Check activity",
                    Some("status"),
                    "The assistant has been quiet; watch for recovery",
                );
            }
            if risk.cpu_hot || risk.memory_high {
                steps.add(
                    "Check the concurrency budget",
                    Some("budget_get"),
                    "Resource pressure; avoid stacking more heavy work",
                );
            }
            steps.add(
                "Monitor",
                Some("status"),
                "Re-check in a minute; warn either clears or escalates",
            );
            PlanStatus::ActionNeeded
        }
        RiskLevel::Ok => {
            let cap_reduced = state
                .budget_summary
                .as_ref()
                .map_or(false, |b| b.current_cap < b.base_cap);
            if cap_reduced {
                steps.add(
                    "Budget recovering",
                    Some("budget_get"),
                    "Cap restores after sustained ok; check hysteresisRemainingSeconds",
                );
            } else if state.active_incident.is_some() {
                steps.add(
                    "Incident resolving",
                    Some("status"),
                    "Risk is ok; the incident closes on the next poll",
                );
            } else {
                steps.add("No action needed", None, "All signals healthy");
            }
            PlanStatus::Healthy
        }
    };

    RecoveryPlan {
        status,
        steps: steps.into_inner(),
    }
}

struct StepList {
    steps: Vec<PlanStep>,
}

impl StepList {
    fn new() -> Self {
        StepList { steps: Vec::new() }
    }

    fn add(&mut self, action: &str, tool: Option<&str>, detail: &str) {
        self.steps.push(PlanStep {
            order: self.steps.len() as u32 + 1,
            action: action.to_string(),
            tool: tool.map(str::to_string),
            detail: detail.to_string(),
        });
    }

    fn into_inner(self) -> Vec<PlanStep> {
        self.steps
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BudgetSummary, Incident};

    fn state_with_level(level: RiskLevel) -> GuardianState {
        let mut state = GuardianState::empty(100);
        state.hang_risk.level = level;
        state
    }

    fn tools(plan: &RecoveryPlan) -> Vec<Option<&str>> {
        plan.steps.iter().map(|s| s.tool.as_deref()).collect()
    }

    #[test]
    fn healthy_snapshot_needs_nothing() {
        let plan = build_plan(&state_with_level(RiskLevel::Ok));
        assert_eq!(plan.status, PlanStatus::Healthy);
        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.steps[0].action, "No action needed");
        assert!(plan.steps[0].tool.is_none());
    }

    #[test]
    fn ok_with_reduced_cap_points_at_the_budget() {
        let mut state = state_with_level(RiskLevel::Ok);
        state.budget_summary = Some(BudgetSummary {
            current_cap: 2,
            base_cap: 4,
            slots_in_use: 0,
            slots_available: 2,
            active_leases: Vec::new(),
            cap_set_by_risk: None,
            ok_since_at: Some(90),
            hysteresis_remaining_seconds: 50,
        });
        let plan = build_plan(&state);
        assert_eq!(plan.status, PlanStatus::Healthy);
        assert_eq!(tools(&plan), vec![Some("budget_get")]);
    }

    #[test]
    fn ok_with_open_incident_watches_status() {
        let mut state = state_with_level(RiskLevel::Ok);
        state.active_incident = Some(Incident {
            id: "ab12cd34".to_string(),
            started_at: 1,
            closed_at: None,
            reason: "quiet".to_string(),
            peak_level: RiskLevel::Warn,
            bundle_captured: false,
            bundle_path: None,
        });
        let plan = build_plan(&state);
        assert_eq!(tools(&plan), vec![Some("status")]);
    }

    #[test]
    fn warn_plan_is_ordered_and_conditional() {
        let mut state = state_with_level(RiskLevel::Warn);
        state.hang_risk.no_activity_seconds = 305;
        state.hang_risk.disk_low = true;
        let plan = build_plan(&state);
        assert_eq!(plan.status, PlanStatus::ActionNeeded);
        assert_eq!(
            tools(&plan),
            vec![
                Some("nudge"),
                Some("preflight_fix"),
                Some("status"),
                Some("status"),
            ]
        );
        let orders: Vec<u32> = plan.steps.iter().map(|s| s.order).collect();
        assert_eq!(orders, vec![1, 2, 3, 4]);
    }

    #[test]
    fn warn_with_resource_pressure_adds_budget_step() {
        let mut state = state_with_level(RiskLevel::Warn);
        state.hang_risk.cpu_hot = true;
        let plan = build_plan(&state);
        assert!(tools(&plan).contains(&Some("budget_get")));
    }

    #[test]
    fn critical_plan_forces_a_bundle_when_missing() {
        let mut state = state_with_level(RiskLevel::Critical);
        state.hang_risk.disk_low = true;
        state.active_incident = Some(Incident {
            id: "ab12cd34".to_string(),
            started_at: 1,
            closed_at: None,
            reason: "hung".to_string(),
            peak_level: RiskLevel::Critical,
            bundle_captured: false,
            bundle_path: None,
        });
        let plan = build_plan(&state);
        assert_eq!(plan.status, PlanStatus::Urgent);
        assert_eq!(
            tools(&plan),
            vec![
                Some("nudge"),
                Some("budget_get"),
                Some("preflight_fix"),
                Some("status"),
                None,
                Some("doctor"),
            ]
        );
    }

    #[test]
    fn critical_plan_skips_bundle_when_already_captured() {
        let mut state = state_with_level(RiskLevel::Critical);
        state.active_incident = Some(Incident {
            id: "ab12cd34".to_string(),
            started_at: 1,
            closed_at: None,
            reason: "hung".to_string(),
            peak_level: RiskLevel::Critical,
            bundle_captured: true,
            bundle_path: Some("/tmp/b.zip".to_string()),
        });
        let plan = build_plan(&state);
        assert!(!tools(&plan).contains(&Some("doctor")));
    }

    #[test]
    fn same_snapshot_same_plan() {
        let state = state_with_level(RiskLevel::Warn);
        assert_eq!(build_plan(&state), build_plan(&state));
    }
}
