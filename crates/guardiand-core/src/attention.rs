//! Attention synthesizer: fuse risk, incident, budget and disk into one
//! operator-visible level with a stable `since`.

use crate::types::{
    Attention, AttentionLevel, BudgetSummary, HangRisk, Incident, RiskLevel,
};

/// Pure function of the current tick's outputs plus the previous
/// attention (for `since` stability).
pub fn synthesize(
    risk: &HangRisk,
    budget: Option<&BudgetSummary>,
    incident: Option<&Incident>,
    previous: Option<&Attention>,
    now: i64,
) -> Attention {
    let cap_reduced = budget.map_or(false, |b| b.current_cap < b.base_cap);

    // First match wins for the level.
    let level = match risk.level {
        RiskLevel::Critical => AttentionLevel::Critical,
        RiskLevel::Warn => AttentionLevel::Warn,
        RiskLevel::Ok if risk.disk_low => AttentionLevel::Warn,
        RiskLevel::Ok if cap_reduced => AttentionLevel::Info,
        RiskLevel::Ok if incident.is_some() => AttentionLevel::Info,
        RiskLevel::Ok => AttentionLevel::None,
    };

    // Reasons aggregate every matching condition, not just the winner.
    let mut reasons = Vec::new();
    if !risk.level.is_ok() {
        if risk.reasons.is_empty() {
            reasons.push(format!("hang risk {}", risk.level.as_str()));
        } else {
            reasons.extend(risk.reasons.iter().cloned());
        }
    } else if risk.disk_low {
        reasons.push("low disk space".to_string());
    }
    if cap_reduced {
        if let Some(b) = budget {
            reasons.push(format!(
                "concurrency cap reduced to {} of {}",
                b.current_cap, b.base_cap
            ));
        }
    }
    if let Some(inc) = incident {
        reasons.push(format!("incident {} open", inc.id));
    }
    let reason = if reasons.is_empty() {
        "healthy".to_string()
    } else {
        reasons.join("; ")
    };

    let no_bundle_yet = incident.map_or(false, |i| !i.bundle_captured);
    let recommended_actions = actions_for(level, risk, cap_reduced, no_bundle_yet);

    // Dwell time stays observable: `since` survives while the level holds.
    let since = match previous {
        Some(prev) if prev.level == level => prev.since,
        _ => now,
    };

    Attention {
        level,
        since,
        reason,
        recommended_actions,
        incident_id: incident.map(|i| i.id.clone()),
    }
}

/// Fixed action table keyed by level and contributing conditions.
fn actions_for(
    level: AttentionLevel,
    risk: &HangRisk,
    cap_reduced: bool,
    no_bundle_yet: bool,
) -> Vec<String> {
    let mut actions = Vec::new();
    match level {
        AttentionLevel::Critical => {
            actions.push("Run the nudge tool for safe remediation".to_string());
            actions.push("Release held concurrency and check budget_get".to_string());
            if risk.disk_low {
                actions.push("Free log space with preflight_fix aggressive".to_string());
            }
            if no_bundle_yet {
                actions.push("Run the recovery tool (doctor) to capture a bundle".to_string());
            }
            actions.push("Reduce concurrent workload until status recovers".to_string());
        }
        AttentionLevel::Warn => {
            actions.push("Run the nudge tool for safe remediation".to_string());
            if risk.disk_low {
                actions.push("Reclaim log space with preflight_fix".to_string());
            }
            if risk.cpu_hot || risk.memory_high {
                actions.push("Check budget_get before scheduling heavy work".to_string());
            }
            actions.push("Watch status for escalation".to_string());
        }
        AttentionLevel::Info => {
            if cap_reduced {
                actions.push("Check budget before heavy work (budget_get)".to_string());
            } else {
                actions.push("Incident resolving; monitor status".to_string());
            }
        }
        AttentionLevel::None => {}
    }
    actions
}
