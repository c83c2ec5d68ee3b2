//! Concurrency budget controller.
//!
//! Risk reduces the cap (warn -> 2, critical -> 1); recovery back to the
//! base cap is gated on a sustained-ok hysteresis window so a flapping
//! detector cannot flap the cap. Leases are advisory, time-bounded
//! grants; nothing here blocks or kills work.

use crate::config::Thresholds;
use crate::types::{short_id, Budget, BudgetSummary, Lease, RiskLevel};

impl Budget {
    /// A fresh budget at the base cap with no leases.
    pub fn fresh(base_cap: u32, now: i64) -> Self {
        Budget {
            current_cap: base_cap,
            base_cap,
            leases: Vec::new(),
            cap_set_by_risk: None,
            cap_changed_at: now,
            ok_since_at: None,
        }
    }

    pub fn slots_in_use(&self) -> u32 {
        self.leases.iter().map(|l| l.slots).sum()
    }

    /// Adjust the cap from the current risk level. Returns true iff the
    /// cap changed.
    pub fn adjust_cap(&mut self, risk: RiskLevel, now: i64, thresholds: &Thresholds) -> bool {
        match risk {
            RiskLevel::Critical => {
                self.ok_since_at = None;
                self.set_cap(thresholds.critical_cap, Some(RiskLevel::Critical), now)
            }
            RiskLevel::Warn => {
                self.ok_since_at = None;
                self.set_cap(thresholds.warn_cap, Some(RiskLevel::Warn), now)
            }
            RiskLevel::Ok => {
                if self.current_cap >= self.base_cap {
                    self.ok_since_at = None;
                    return false;
                }
                match self.ok_since_at {
                    None => {
                        self.ok_since_at = Some(now);
                        false
                    }
                    Some(since) if now - since >= thresholds.hysteresis_seconds => {
                        self.ok_since_at = None;
                        self.set_cap(self.base_cap, None, now)
                    }
                    Some(_) => false,
                }
            }
        }
    }

    fn set_cap(&mut self, cap: u32, set_by: Option<RiskLevel>, now: i64) -> bool {
        let changed = self.current_cap != cap;
        if changed {
            self.current_cap = cap;
            self.cap_changed_at = now;
        }
        self.cap_set_by_risk = set_by;
        changed
    }

    /// Mint a lease under the current cap, or explain the denial.
    pub fn acquire(
        &mut self,
        slots: u32,
        ttl_seconds: i64,
        reason: &str,
        now: i64,
    ) -> Result<Lease, String> {
        if slots == 0 {
            return Err("denied: slots must be at least 1".to_string());
        }
        if ttl_seconds <= 0 {
            return Err("denied: ttlSeconds must be positive".to_string());
        }
        let in_use = self.slots_in_use();
        let available = self.current_cap.saturating_sub(in_use);
        if slots > available {
            return Err(format!(
                "denied: requested {slots} slot(s) but only {available} available (cap {}, in use {in_use})",
                self.current_cap
            ));
        }
        let lease = Lease {
            id: short_id(),
            slots,
            reason: reason.to_string(),
            granted_at: now,
            expires_at: now + ttl_seconds,
        };
        self.leases.push(lease.clone());
        Ok(lease)
    }

    /// Remove a lease by id; false when it was not held.
    pub fn release(&mut self, lease_id: &str) -> bool {
        let before = self.leases.len();
        self.leases.retain(|l| l.id != lease_id);
        self.leases.len() != before
    }

    /// Drop expired leases; returns how many were removed.
    pub fn expire_leases(&mut self, now: i64) -> usize {
        let before = self.leases.len();
        self.leases.retain(|l| l.expires_at > now);
        before - self.leases.len()
    }

    pub fn summarize(&self, now: i64, thresholds: &Thresholds) -> BudgetSummary {
        let slots_in_use = self.slots_in_use();
        let hysteresis_remaining = match (self.current_cap < self.base_cap, self.ok_since_at) {
            (true, Some(since)) => (thresholds.hysteresis_seconds - (now - since)).max(0),
            _ => 0,
        };
        BudgetSummary {
            current_cap: self.current_cap,
            base_cap: self.base_cap,
            slots_in_use,
            slots_available: self.current_cap.saturating_sub(slots_in_use),
            active_leases: self.leases.clone(),
            cap_set_by_risk: self.cap_set_by_risk,
            ok_since_at: self.ok_since_at,
            hysteresis_remaining_seconds: hysteresis_remaining,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thresholds() -> Thresholds {
        Thresholds::default()
    }

    #[test]
    fn warn_and_critical_reduce_the_cap() {
        let t = thresholds();
        let mut budget = Budget::fresh(4, 0);

        assert!(budget.adjust_cap(RiskLevel::Warn, 10, &t));
        assert_eq!(budget.current_cap, 2);
        assert_eq!(budget.cap_set_by_risk, Some(RiskLevel::Warn));
        assert_eq!(budget.cap_changed_at, 10);

        assert!(budget.adjust_cap(RiskLevel::Critical, 20, &t));
        assert_eq!(budget.current_cap, 1);
        assert_eq!(budget.cap_set_by_risk, Some(RiskLevel::Critical));
    }

    #[test]
    fn recovery_needs_sustained_ok() {
        let t = thresholds();
        let mut budget = Budget::fresh(4, 0);
        budget.adjust_cap(RiskLevel::Critical, 0, &t);

        // First ok starts the clock, cap unchanged.
        assert!(!budget.adjust_cap(RiskLevel::Ok, 100, &t));
        assert_eq!(budget.current_cap, 1);
        assert_eq!(budget.ok_since_at, Some(100));

        // Not enough dwell yet.
        assert!(!budget.adjust_cap(RiskLevel::Ok, 159, &t));
        assert_eq!(budget.current_cap, 1);

        // Exactly at the hysteresis boundary the cap restores.
        assert!(budget.adjust_cap(RiskLevel::Ok, 160, &t));
        assert_eq!(budget.current_cap, 4);
        assert_eq!(budget.cap_set_by_risk, None);
        assert_eq!(budget.ok_since_at, None);
    }

    #[test]
    fn any_non_ok_restarts_the_hysteresis_clock() {
        let t = thresholds();
        let mut budget = Budget::fresh(4, 0);
        budget.adjust_cap(RiskLevel::Warn, 0, &t);
        budget.adjust_cap(RiskLevel::Ok, 10, &t);
        assert_eq!(budget.ok_since_at, Some(10));

        budget.adjust_cap(RiskLevel::Warn, 30, &t);
        assert_eq!(budget.ok_since_at, None);

        budget.adjust_cap(RiskLevel::Ok, 40, &t);
        assert_eq!(budget.ok_since_at, Some(40));
        assert!(!budget.adjust_cap(RiskLevel::Ok, 95, &t));
        assert!(budget.adjust_cap(RiskLevel::Ok, 100, &t));
        assert_eq!(budget.current_cap, 4);
    }

    #[test]
    fn acquire_deny_release_wording_and_accounting() {
        let t = thresholds();
        let mut budget = Budget::fresh(4, 0);
        budget.adjust_cap(RiskLevel::Warn, 0, &t);
        assert_eq!(budget.current_cap, 2);

        let lease = budget.acquire(2, 60, "batch", 0).unwrap();
        assert_eq!(budget.slots_in_use(), 2);

        let denial = budget.acquire(1, 60, "extra", 1).unwrap_err();
        assert!(denial.contains("only 0 available"), "got: {denial}");

        assert!(budget.release(&lease.id));
        assert_eq!(budget.slots_in_use(), 0);
        assert!(!budget.release(&lease.id), "double release reports not found");
        assert_eq!(budget.current_cap, 2, "cap waits for hysteresis");
    }

    #[test]
    fn acquire_of_exactly_remaining_slots_is_granted() {
        let mut budget = Budget::fresh(4, 0);
        budget.acquire(3, 60, "three", 0).unwrap();
        assert!(budget.acquire(1, 60, "last", 0).is_ok());
        assert!(budget.acquire(1, 60, "over", 0).is_err());
    }

    #[test]
    fn zero_slots_and_zero_ttl_are_denied() {
        let mut budget = Budget::fresh(4, 0);
        assert!(budget.acquire(0, 60, "none", 0).is_err());
        assert!(budget.acquire(1, 0, "no ttl", 0).is_err());
        assert!(budget.acquire(1, -5, "negative", 0).is_err());
    }

    #[test]
    fn expire_drops_only_due_leases() {
        let mut budget = Budget::fresh(4, 0);
        budget.acquire(1, 10, "short", 0).unwrap();
        budget.acquire(1, 100, "long", 0).unwrap();

        // expiresAt <= now is expired: boundary at exactly 10.
        assert_eq!(budget.expire_leases(10), 1);
        assert_eq!(budget.leases.len(), 1);
        assert!(budget.leases.iter().all(|l| l.expires_at > 10));
        assert_eq!(budget.expire_leases(10), 0);
    }

    #[test]
    fn cap_reduction_below_in_use_refuses_new_acquires() {
        let t = thresholds();
        let mut budget = Budget::fresh(4, 0);
        budget.acquire(3, 600, "busy", 0).unwrap();

        budget.adjust_cap(RiskLevel::Critical, 1, &t);
        assert_eq!(budget.current_cap, 1);
        // Transiently over cap; acquires must heal it by refusal.
        assert!(budget.slots_in_use() > budget.current_cap);
        let denial = budget.acquire(1, 60, "more", 2).unwrap_err();
        assert!(denial.contains("only 0 available"));
    }

    #[test]
    fn summary_reports_hysteresis_remaining() {
        let t = thresholds();
        let mut budget = Budget::fresh(4, 0);
        budget.adjust_cap(RiskLevel::Warn, 0, &t);
        budget.adjust_cap(RiskLevel::Ok, 100, &t);

        let summary = budget.summarize(130, &t);
        assert_eq!(summary.hysteresis_remaining_seconds, 30);
        assert_eq!(summary.slots_available, 2);

        budget.adjust_cap(RiskLevel::Ok, 160, &t);
        let summary = budget.summarize(160, &t);
        assert_eq!(summary.hysteresis_remaining_seconds, 0);
        assert_eq!(summary.current_cap, 4);
    }
}
