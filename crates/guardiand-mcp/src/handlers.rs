//! The eight guardiand tool handlers.
//!
//! Handlers share nothing with the polling daemon except the files in
//! the data directory: they read the last persisted snapshot when it is
//! fresh and compute a degraded one-shot snapshot when it is not. Every
//! handler body runs inside an error boundary that renders failures as
//! a structured `{code, message, hint, cause}` payload.

use std::path::PathBuf;
use std::time::SystemTime;

use serde_json::{json, Value};
use tracing::{info, warn};

use guardiand_core::attention::synthesize;
use guardiand_core::detector::{assess, DetectorInput};
use guardiand_core::probe::{
    compose_signals, disk_free_gb, scan_log_age_seconds, tree_size_mb, ProcessProbe,
};
use guardiand_core::{
    build_plan, now_epoch, BundleWriter, GuardianConfig, GuardianError, GuardianState,
    GuardianStore, JournalEntry, LogManager, LogScan, RiskLevel,
};

use crate::server::ToolHandler;
use crate::tools::ToolResult;

pub struct GuardianToolHandler {
    config: GuardianConfig,
    store: GuardianStore,
}

impl GuardianToolHandler {
    pub fn new(config: GuardianConfig) -> Result<Self, GuardianError> {
        let store = GuardianStore::open(&config.data_dir, config.thresholds.base_cap)?;
        Ok(GuardianToolHandler { config, store })
    }

    fn log_manager(&self) -> LogManager {
        LogManager::new(self.config.watch_dir.clone(), self.config.thresholds.clone())
    }

    fn bundle_writer(&self) -> BundleWriter {
        BundleWriter::new(self.config.watch_dir.clone(), self.config.thresholds.clone())
    }

    /// The freshest view available: the persisted snapshot when recent,
    /// otherwise a one-shot degraded snapshot (no grace shield, no quiet
    /// accrual, daemon reported not running).
    fn current_state(&self) -> (GuardianState, bool) {
        let now = now_epoch();
        if let Some(state) = self.store.load_state() {
            if GuardianStore::is_fresh(&state, now, self.config.thresholds.state_staleness_seconds)
            {
                return (state, true);
            }
        }
        (self.degraded_snapshot(now), false)
    }

    fn degraded_snapshot(&self, now: i64) -> GuardianState {
        let thresholds = &self.config.thresholds;
        let mut probe = ProcessProbe::new(self.config.process_prefix.clone());
        let processes = probe.sample();
        let log_age = scan_log_age_seconds(&self.config.watch_dir, SystemTime::now());
        let tree_mb = tree_size_mb(&self.config.watch_dir);
        let disk_free = disk_free_gb(&self.config.data_dir);
        let activity = compose_signals(log_age, &processes, thresholds.cpu_low_percent);

        // Without the daemon's carried counters we assume grace has
        // expired and no quiet has accrued.
        let risk = assess(
            &DetectorInput {
                processes: &processes,
                activity: &activity,
                disk_free_gb: disk_free,
                hang_threshold_seconds: self.config.hang_threshold_seconds,
                process_age_seconds: thresholds.grace_window_seconds,
                composite_quiet_seconds: 0,
            },
            thresholds,
        );

        let mut budget = self.store.load_budget();
        budget.expire_leases(now);
        let budget_summary = budget.summarize(now, thresholds);
        let attention = synthesize(&risk, Some(&budget_summary), None, None, now);

        GuardianState {
            updated_at: now,
            daemon_running: false,
            daemon_pid: None,
            recommended_actions: attention.recommended_actions.clone(),
            processes,
            activity,
            hang_risk: risk,
            disk_free_gb: disk_free,
            log_tree_size_mb: tree_mb,
            active_incident: None,
            process_age_seconds: 0,
            composite_quiet_seconds: 0,
            budget_summary: Some(budget_summary),
            attention,
        }
    }

    // ============ Tools ============

    fn status(&self) -> Result<ToolResult, GuardianError> {
        let (state, fresh) = self.current_state();
        if !fresh {
            info!("Persisted snapshot stale, served a degraded live snapshot");
        }
        Ok(ToolResult::json(&state))
    }

    fn preflight_fix(&self, arguments: &Value) -> Result<ToolResult, GuardianError> {
        let aggressive = arguments
            .get("aggressive")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let manager = self.log_manager();
        let before = manager.scan(aggressive, SystemTime::now())?;
        let report = manager.fix(aggressive, &self.store, SystemTime::now())?;
        let after = manager.scan(aggressive, SystemTime::now())?;

        let mut out = String::new();
        out.push_str(&banner("before", &before));
        out.push_str(&format!(
            "fixed: compressed {} file(s), trimmed {} file(s), deleted {} stale session(s), reclaimed {} KB (aggressive={})\n",
            report.compressed,
            report.trimmed,
            report.deleted,
            report.reclaimed_bytes() / 1024,
            aggressive,
        ));
        out.push_str(&banner("after", &after));
        Ok(ToolResult::text(out))
    }

    fn doctor(&self, arguments: &Value) -> Result<ToolResult, GuardianError> {
        let output = arguments
            .get("outputPath")
            .and_then(Value::as_str)
            .map(PathBuf::from);
        let now = now_epoch();
        let (state, _) = self.current_state();
        let summary = self
            .bundle_writer()
            .write(&self.store, Some(&state), output, now)?;
        let entry = JournalEntry {
            timestamp: now,
            action: "bundle".to_string(),
            target: Some(summary.path.display().to_string()),
            detail: "doctor capture".to_string(),
            size_before: None,
            size_after: Some(summary.archive_bytes),
        };
        if let Err(e) = self.store.append_journal(&entry) {
            warn!(error = %e, "journal append failed");
        }
        Ok(ToolResult::text(format!(
            "Bundle written: {} ({} entries, {} KB)\nrisk: {}, attention: {}\n",
            summary.path.display(),
            summary.entries,
            summary.archive_bytes / 1024,
            state.hang_risk.level.as_str(),
            state.attention.level.as_str(),
        )))
    }

    /// Safe remediation only. Reads state, fixes what is objectively
    /// over threshold, captures a missing incident bundle. Running it
    /// twice in a row does nothing the second time.
    fn nudge(&self) -> Result<ToolResult, GuardianError> {
        let mut actions: Vec<String> = Vec::new();
        let now = now_epoch();

        let tree_mb = tree_size_mb(&self.config.watch_dir);
        let disk_free = disk_free_gb(&self.config.data_dir);
        let disk_low = disk_free >= 0.0 && disk_free < self.config.thresholds.disk_free_warning_gb;
        if disk_low || tree_mb > self.config.max_log_dir_mb as f64 {
            let report = self
                .log_manager()
                .fix(disk_low, &self.store, SystemTime::now())?;
            actions.push(format!(
                "log fix: compressed {}, trimmed {}, deleted {}, reclaimed {} KB",
                report.compressed,
                report.trimmed,
                report.deleted,
                report.reclaimed_bytes() / 1024
            ));
        }

        // Capture the missing bundle for an open warn/critical incident,
        // then publish the flag through the persisted state so neither we
        // nor the daemon capture it twice.
        if let Some(mut state) = self.store.load_state() {
            let needs_bundle = state
                .active_incident
                .as_ref()
                .map_or(false, |i| !i.bundle_captured && i.peak_level >= RiskLevel::Warn);
            if needs_bundle {
                let summary = self
                    .bundle_writer()
                    .write(&self.store, Some(&state), None, now)?;
                let path = summary.path.display().to_string();
                if let Some(incident) = state.active_incident.as_mut() {
                    incident.bundle_captured = true;
                    incident.bundle_path = Some(path.clone());
                }
                self.store.save_state(&state)?;
                actions.push(format!("captured incident bundle: {path}"));
            }
        }

        if actions.is_empty() {
            Ok(ToolResult::text("No action needed; all signals within thresholds\n"))
        } else {
            Ok(ToolResult::text(format!("Nudge applied:\n  {}\n", actions.join("\n  "))))
        }
    }

    fn budget_get(&self) -> Result<ToolResult, GuardianError> {
        let now = now_epoch();
        let mut budget = self.store.load_budget();
        budget.expire_leases(now);
        self.store.save_budget(&budget)?;
        Ok(ToolResult::json(
            &budget.summarize(now, &self.config.thresholds),
        ))
    }

    fn budget_acquire(&self, arguments: &Value) -> Result<ToolResult, GuardianError> {
        let slots = arguments.get("slots").and_then(Value::as_u64).unwrap_or(0) as u32;
        let ttl_seconds = arguments
            .get("ttlSeconds")
            .and_then(Value::as_i64)
            .unwrap_or(0);
        let reason = arguments
            .get("reason")
            .and_then(Value::as_str)
            .unwrap_or("unspecified");

        let now = now_epoch();
        let mut budget = self.store.load_budget();
        budget.expire_leases(now);
        let outcome = budget.acquire(slots, ttl_seconds, reason, now);
        self.store.save_budget(&budget)?;

        match outcome {
            Ok(lease) => Ok(ToolResult::json(&json!({
                "granted": true,
                "lease": lease,
                "summary": budget.summarize(now, &self.config.thresholds),
            }))),
            Err(denied) => Ok(ToolResult::json(&json!({
                "granted": false,
                "reason": denied,
                "summary": budget.summarize(now, &self.config.thresholds),
            }))),
        }
    }

    fn budget_release(&self, arguments: &Value) -> Result<ToolResult, GuardianError> {
        let Some(lease_id) = arguments.get("leaseId").and_then(Value::as_str) else {
            return Err(GuardianError::unknown("budget_release requires leaseId"));
        };
        let now = now_epoch();
        let mut budget = self.store.load_budget();
        budget.expire_leases(now);
        let released = budget.release(lease_id);
        self.store.save_budget(&budget)?;
        Ok(ToolResult::json(&json!({
            "released": released,
            "leaseId": lease_id,
            "summary": budget.summarize(now, &self.config.thresholds),
        })))
    }

    fn recovery_plan(&self) -> Result<ToolResult, GuardianError> {
        let (state, _) = self.current_state();
        Ok(ToolResult::json(&build_plan(&state)))
    }
}

fn banner(label: &str, scan: &LogScan) -> String {
    format!(
        "{label}: {} file(s), {:.1} MB ({} compressible, {} oversized, {} stale)\n",
        scan.file_count,
        scan.total_size_mb(),
        scan.compressible.len(),
        scan.oversized.len(),
        scan.stale_sessions.len(),
    )
}

#[async_trait::async_trait]
impl ToolHandler for GuardianToolHandler {
    async fn call(&self, name: &str, arguments: Value) -> ToolResult {
        let outcome = match name {
            "status" => self.status(),
            "preflight_fix" => self.preflight_fix(&arguments),
            "doctor" => self.doctor(&arguments),
            "nudge" => self.nudge(),
            "budget_get" => self.budget_get(),
            "budget_acquire" => self.budget_acquire(&arguments),
            "budget_release" => self.budget_release(&arguments),
            "recovery_plan" => self.recovery_plan(),
            other => {
                return ToolResult::error(
                    json!({
                        "code": "UNKNOWN",
                        "message": format!("Unknown tool: {other}"),
                        "hint": "Call tools/list for the available tools",
                    })
                    .to_string(),
                )
            }
        };
        match outcome {
            Ok(result) => result,
            Err(e) => {
                warn!(tool = %name, code = e.code(), error = %e, "Tool call failed");
                ToolResult::error(
                    serde_json::to_string_pretty(&e.payload()).unwrap_or_else(|_| e.to_string()),
                )
            }
        }
    }
}
