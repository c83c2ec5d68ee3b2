//! Incident tracker: one optional active incident driven by risk
//! transitions, plus the exactly-once bundle-capture gate.

use std::collections::HashMap;

use crate::types::{short_id, GuardianState, HangRisk, Incident, RiskLevel};

/// What a risk observation did to the tracked incident.
#[derive(Debug, Clone, PartialEq)]
pub enum IncidentEvent {
    /// Nothing tracked, risk ok.
    Idle,
    /// A new incident was opened.
    Opened,
    /// The active incident escalated to critical.
    Escalated,
    /// The active incident's reason was refreshed.
    Updated,
    /// The active incident closed; the closed record is returned for the
    /// incidents log.
    Closed(Incident),
}

#[derive(Debug, Default)]
pub struct IncidentTracker {
    active: Option<Incident>,
    /// Last bundle capture per PID, for the cooldown gate.
    last_bundle_at: HashMap<u32, i64>,
}

impl IncidentTracker {
    pub fn new() -> Self {
        IncidentTracker::default()
    }

    /// Resume from a persisted snapshot so a daemon restart does not
    /// open a duplicate incident.
    pub fn seed_from_state(state: &GuardianState) -> Self {
        IncidentTracker {
            active: state.active_incident.clone(),
            last_bundle_at: HashMap::new(),
        }
    }

    pub fn active(&self) -> Option<&Incident> {
        self.active.as_ref()
    }

    /// Merge bundle flags written out-of-band (the nudge handler
    /// read-modify-writes the persisted state when it captures).
    pub fn absorb_persisted_bundle(&mut self, persisted: Option<&Incident>) {
        let (Some(active), Some(seen)) = (self.active.as_mut(), persisted) else {
            return;
        };
        if active.id == seen.id && seen.bundle_captured && !active.bundle_captured {
            active.bundle_captured = true;
            active.bundle_path = seen.bundle_path.clone();
        }
    }

    /// Feed one risk observation through the transition table.
    pub fn observe(&mut self, risk: &HangRisk, now: i64) -> IncidentEvent {
        let reason = summarize_reason(risk);

        if risk.level == RiskLevel::Ok {
            return match self.active.take() {
                Some(mut incident) => {
                    incident.closed_at = Some(now);
                    IncidentEvent::Closed(incident)
                }
                None => IncidentEvent::Idle,
            };
        }

        if let Some(incident) = self.active.as_mut() {
            incident.reason = reason;
            if risk.level > incident.peak_level {
                incident.peak_level = risk.level;
                IncidentEvent::Escalated
            } else {
                IncidentEvent::Updated
            }
        } else {
            self.active = Some(Incident {
                id: short_id(),
                started_at: now,
                closed_at: None,
                reason,
                peak_level: risk.level,
                bundle_captured: false,
                bundle_path: None,
            });
            IncidentEvent::Opened
        }
    }

    /// True iff an incident is active at critical peak, no bundle has
    /// been captured for it, and every given PID is clear of the
    /// per-process cooldown.
    pub fn should_capture_bundle(&self, pids: &[u32], now: i64, cooldown_seconds: i64) -> bool {
        let Some(incident) = &self.active else {
            return false;
        };
        if incident.peak_level != RiskLevel::Critical || incident.bundle_captured {
            return false;
        }
        pids.iter().all(|pid| match self.last_bundle_at.get(pid) {
            Some(last) => now - last >= cooldown_seconds,
            None => true,
        })
    }

    /// Mark the active incident's bundle as captured and stamp the
    /// cooldown for every involved PID.
    pub fn record_bundle(&mut self, path: &str, pids: &[u32], now: i64) {
        if let Some(incident) = self.active.as_mut() {
            incident.bundle_captured = true;
            incident.bundle_path = Some(path.to_string());
        }
        for pid in pids {
            self.last_bundle_at.insert(*pid, now);
        }
    }
}

fn summarize_reason(risk: &HangRisk) -> String {
    if risk.reasons.is_empty() {
        format!("risk level {}", risk.level.as_str())
    } else {
        risk.reasons.join("; ")
    }
}
