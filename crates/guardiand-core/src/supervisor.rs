//! Polling supervisor: the 2-second loop that drives probes, detector,
//! incident tracker, budget controller and attention, then persists the
//! snapshot.
//!
//! Every step is individually fenced. A failing probe, collaborator or
//! write is logged at one line and the loop moves on; the tick never
//! panics and never stops.

use std::time::{Duration, SystemTime};

use tracing::{debug, info, warn};

use crate::attention::synthesize;
use crate::bundle::BundleWriter;
use crate::config::GuardianConfig;
use crate::detector::{assess, DetectorInput};
use crate::error::GuardianError;
use crate::incident::{IncidentEvent, IncidentTracker};
use crate::logtree::LogManager;
use crate::probe::{compose_signals, disk_free_gb, scan_log_age_seconds, tree_size_mb, ProcessProbe};
use crate::store::GuardianStore;
use crate::types::{now_epoch, Attention, GuardianState, JournalEntry, ProcessSample};

/// One tick's sampled inputs, separated from the loop so the state
/// machine is drivable with synthetic signals.
#[derive(Debug, Clone)]
pub struct TickInput {
    pub now: i64,
    pub processes: Vec<ProcessSample>,
    /// Seconds since newest log mtime, -1 unknown.
    pub log_age_seconds: i64,
    pub disk_free_gb: f64,
    pub log_tree_size_mb: f64,
}

pub struct Supervisor {
    config: GuardianConfig,
    store: GuardianStore,
    probe: ProcessProbe,
    log_manager: LogManager,
    bundle_writer: BundleWriter,
    tracker: IncidentTracker,
    process_first_seen_at: Option<i64>,
    composite_quiet_since: Option<i64>,
    previous_attention: Option<Attention>,
}

impl Supervisor {
    pub fn new(config: GuardianConfig) -> Result<Self, GuardianError> {
        let store = GuardianStore::open(&config.data_dir, config.thresholds.base_cap)?;
        // Resume the open incident (if any) so a restart does not
        // double-open.
        let tracker = match store.load_state() {
            Some(state) => IncidentTracker::seed_from_state(&state),
            None => IncidentTracker::new(),
        };
        let probe = ProcessProbe::new(config.process_prefix.clone());
        let log_manager = LogManager::new(config.watch_dir.clone(), config.thresholds.clone());
        let bundle_writer = BundleWriter::new(config.watch_dir.clone(), config.thresholds.clone());
        Ok(Supervisor {
            config,
            store,
            probe,
            log_manager,
            bundle_writer,
            tracker,
            process_first_seen_at: None,
            composite_quiet_since: None,
            previous_attention: None,
        })
    }

    pub fn store(&self) -> &GuardianStore {
        &self.store
    }

    /// Run until ctrl-c. Nothing needs flushing on the way out; every
    /// tick already persisted atomically.
    pub async fn run(&mut self) -> anyhow::Result<()> {
        let period = Duration::from_millis(self.config.thresholds.poll_interval_ms);
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(
            data_dir = %self.config.data_dir.display(),
            watch_dir = %self.config.watch_dir.display(),
            poll_ms = self.config.thresholds.poll_interval_ms,
            "guardiand polling loop started"
        );

        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let input = self.sample().await;
                    self.advance(input);
                }
                _ = &mut ctrl_c => {
                    info!("Shutdown signal received, stopping polling loop");
                    break;
                }
            }
        }
        Ok(())
    }

    /// Gather this tick's signals. Walk-heavy probes run on the
    /// blocking pool so the RPC side never starves behind a slow disk.
    async fn sample(&mut self) -> TickInput {
        let now = now_epoch();
        let mut processes = self.probe.sample();
        // Handle counts are the lazier, per-OS call; still best-effort.
        self.probe.attach_handle_counts(&mut processes).await;

        let watch_dir = self.config.watch_dir.clone();
        let data_dir = self.config.data_dir.clone();
        let (log_age_seconds, log_tree_size_mb, disk_free) =
            tokio::task::spawn_blocking(move || {
                let log_age = scan_log_age_seconds(&watch_dir, SystemTime::now());
                let tree_mb = tree_size_mb(&watch_dir);
                let free = disk_free_gb(&data_dir);
                (log_age, tree_mb, free)
            })
            .await
            .unwrap_or((-1, 0.0, -1.0));

        TickInput {
            now,
            processes,
            log_age_seconds,
            disk_free_gb: disk_free,
            log_tree_size_mb,
        }
    }

    /// One full pipeline pass over sampled inputs. Synchronous and
    /// deterministic given the input, which is what the scenario tests
    /// drive.
    pub fn advance(&mut self, input: TickInput) -> GuardianState {
        let thresholds = self.config.thresholds.clone();
        let now = input.now;

        // An out-of-band nudge may have captured this incident's bundle.
        let persisted = self.store.load_state();
        self.tracker
            .absorb_persisted_bundle(persisted.as_ref().and_then(|s| s.active_incident.as_ref()));

        // Process-first-seen bookkeeping; losing all processes resets
        // the composite counter too.
        if input.processes.is_empty() {
            self.process_first_seen_at = None;
            self.composite_quiet_since = None;
        } else if self.process_first_seen_at.is_none() {
            self.process_first_seen_at = Some(now);
        }
        let process_age_seconds = self
            .process_first_seen_at
            .map(|t| (now - t).max(0))
            .unwrap_or(0);

        let activity = compose_signals(
            input.log_age_seconds,
            &input.processes,
            thresholds.cpu_low_percent,
        );
        let log_quiet = input.log_age_seconds < 0
            || input.log_age_seconds > self.config.hang_threshold_seconds;
        let cpu_low = !activity.cpu_active;
        if log_quiet && cpu_low {
            if self.composite_quiet_since.is_none() {
                self.composite_quiet_since = Some(now);
            }
        } else {
            self.composite_quiet_since = None;
        }
        let composite_quiet_seconds = self
            .composite_quiet_since
            .map(|t| (now - t).max(0))
            .unwrap_or(0);

        let risk = assess(
            &DetectorInput {
                processes: &input.processes,
                activity: &activity,
                disk_free_gb: input.disk_free_gb,
                hang_threshold_seconds: self.config.hang_threshold_seconds,
                process_age_seconds,
                composite_quiet_seconds,
            },
            &thresholds,
        );

        match self.tracker.observe(&risk, now) {
            IncidentEvent::Opened => {
                if let Some(incident) = self.tracker.active() {
                    info!(incident = %incident.id, level = risk.level.as_str(), "Incident opened");
                }
            }
            IncidentEvent::Escalated => {
                if let Some(incident) = self.tracker.active() {
                    warn!(incident = %incident.id, "Incident escalated to critical");
                }
            }
            IncidentEvent::Closed(closed) => {
                info!(incident = %closed.id, "Incident closed");
                if let Err(e) = self.store.append_incident(&closed) {
                    warn!(error = %e, "Failed to append closed incident");
                }
            }
            IncidentEvent::Updated | IncidentEvent::Idle => {}
        }

        // Exactly-once evidence capture, gated by the tracker.
        let pids: Vec<u32> = input.processes.iter().map(|p| p.pid).collect();
        if self
            .tracker
            .should_capture_bundle(&pids, now, thresholds.bundle_cooldown_seconds)
        {
            match self
                .bundle_writer
                .write(&self.store, persisted.as_ref(), None, now)
            {
                Ok(summary) => {
                    let path = summary.path.display().to_string();
                    info!(path = %path, "Diagnostic bundle captured");
                    self.tracker.record_bundle(&path, &pids, now);
                    let entry = JournalEntry {
                        timestamp: now,
                        action: "bundle".to_string(),
                        target: Some(path),
                        detail: "incident evidence captured".to_string(),
                        size_before: None,
                        size_after: Some(summary.archive_bytes),
                    };
                    if let Err(e) = self.store.append_journal(&entry) {
                        warn!(error = %e, "Failed to journal bundle capture");
                    }
                }
                Err(e) => warn!(error = %e, "Bundle capture failed"),
            }
        }

        // Disk pressure with auto-fix on: run the log manager hard.
        if risk.disk_low && self.config.auto_fix {
            match self
                .log_manager
                .fix(true, &self.store, SystemTime::now())
            {
                Ok(report) => debug!(
                    reclaimed = report.reclaimed_bytes(),
                    "Aggressive log fix under disk pressure"
                ),
                Err(e) => warn!(error = %e, "Aggressive log fix failed"),
            }
        }

        // Budget: re-read before write so RPC acquire/release survive.
        let mut budget = self.store.load_budget();
        let expired = budget.expire_leases(now);
        if expired > 0 {
            debug!(expired, "Expired leases collected");
        }
        if budget.adjust_cap(risk.level, now, &thresholds) {
            info!(cap = budget.current_cap, risk = risk.level.as_str(), "Concurrency cap adjusted");
        }
        if let Err(e) = self.store.save_budget(&budget) {
            warn!(error = %e, "Failed to persist budget");
        }
        let budget_summary = budget.summarize(now, &thresholds);

        let attention = synthesize(
            &risk,
            Some(&budget_summary),
            self.tracker.active(),
            self.previous_attention.as_ref(),
            now,
        );
        self.previous_attention = Some(attention.clone());

        let state = GuardianState {
            updated_at: now,
            daemon_running: true,
            daemon_pid: Some(std::process::id()),
            recommended_actions: attention.recommended_actions.clone(),
            processes: input.processes,
            activity,
            hang_risk: risk,
            disk_free_gb: input.disk_free_gb,
            log_tree_size_mb: input.log_tree_size_mb,
            active_incident: self.tracker.active().cloned(),
            process_age_seconds,
            composite_quiet_seconds,
            budget_summary: Some(budget_summary),
            attention,
        };
        if let Err(e) = self.store.save_state(&state) {
            warn!(error = %e, "Failed to persist state snapshot");
        }
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AttentionLevel, RiskLevel};
    use std::fs;
    use tempfile::TempDir;

    struct Fixture {
        supervisor: Supervisor,
        _root: TempDir,
    }

    fn fixture() -> Fixture {
        let root = tempfile::tempdir().unwrap();
        let mut config = GuardianConfig::default();
        config.data_dir = root.path().join("data");
        config.watch_dir = root.path().join("logs");
        fs::create_dir_all(&config.watch_dir).unwrap();
        let supervisor = Supervisor::new(config).unwrap();
        Fixture {
            supervisor,
            _root: root,
        }
    }

    fn proc(pid: u32, cpu: f32, mem: u64, uptime: u64) -> ProcessSample {
        ProcessSample {
            pid,
            name: "claude".to_string(),
            cpu_percent: cpu,
            memory_mb: mem,
            uptime_seconds: uptime,
            handle_count: None,
        }
    }

    fn input(now: i64, processes: Vec<ProcessSample>, log_age: i64, disk: f64) -> TickInput {
        TickInput {
            now,
            processes,
            log_age_seconds: log_age,
            disk_free_gb: disk,
            log_tree_size_mb: 1.0,
        }
    }

    #[test]
    fn cold_start_healthy() {
        let mut f = fixture();
        let state = f
            .supervisor
            .advance(input(1000, vec![proc(100, 12.0, 300, 10)], 3, 100.0));

        assert_eq!(state.hang_risk.level, RiskLevel::Ok);
        assert_eq!(state.attention.level, AttentionLevel::None);
        assert!(state.active_incident.is_none());
        assert!(state.daemon_running);
        assert_eq!(state.budget_summary.as_ref().unwrap().current_cap, 4);
        assert_eq!(f.supervisor.store().load_budget().current_cap, 4);
        // The snapshot was persisted.
        assert_eq!(f.supervisor.store().load_state().unwrap(), state);
    }

    #[test]
    fn grace_shields_a_quiet_new_process() {
        let mut f = fixture();
        f.supervisor
            .advance(input(1000, vec![proc(100, 0.0, 300, 0)], 900, 100.0));
        let state = f
            .supervisor
            .advance(input(1015, vec![proc(100, 0.0, 300, 15)], 900, 100.0));

        assert_eq!(state.hang_risk.level, RiskLevel::Ok);
        assert_eq!(state.hang_risk.grace_remaining_seconds, 45);
        assert_eq!(state.process_age_seconds, 15);
        assert_eq!(state.composite_quiet_seconds, 15);
    }

    #[test]
    fn composite_quiet_opens_an_incident_and_reduces_the_cap() {
        let mut f = fixture();
        // Establish the process at t=0 (busy, logs fresh).
        f.supervisor
            .advance(input(0, vec![proc(100, 12.0, 300, 1)], 3, 100.0));
        // Quiet starts at t=3295.
        f.supervisor
            .advance(input(3295, vec![proc(100, 0.0, 300, 3295)], 400, 100.0));
        // 305 seconds of composite quiet at t=3600.
        let state = f
            .supervisor
            .advance(input(3600, vec![proc(100, 0.0, 300, 3600)], 705, 100.0));

        assert_eq!(state.hang_risk.level, RiskLevel::Warn);
        assert_eq!(state.composite_quiet_seconds, 305);
        assert!(state
            .hang_risk
            .reasons
            .iter()
            .any(|r| r == "No activity for 305s"));

        let incident = state.active_incident.as_ref().unwrap();
        assert_eq!(incident.peak_level, RiskLevel::Warn);
        assert!(!incident.bundle_captured);

        assert_eq!(f.supervisor.store().load_budget().current_cap, 2);
        assert_eq!(state.attention.level, AttentionLevel::Warn);
    }

    #[test]
    fn escalation_captures_one_bundle_then_close_and_recover() {
        let mut f = fixture();
        f.supervisor
            .advance(input(0, vec![proc(100, 12.0, 300, 1)], 3, 100.0));
        f.supervisor
            .advance(input(3295, vec![proc(100, 0.0, 300, 3295)], 400, 100.0));
        let warn_state = f
            .supervisor
            .advance(input(3600, vec![proc(100, 0.0, 300, 3600)], 705, 100.0));
        let incident_id = warn_state.active_incident.as_ref().unwrap().id.clone();

        // 905 seconds of composite quiet: critical, same incident,
        // exactly-once bundle.
        let critical_state = f
            .supervisor
            .advance(input(4200, vec![proc(100, 0.0, 300, 4200)], 1305, 100.0));
        let incident = critical_state.active_incident.as_ref().unwrap();
        assert_eq!(critical_state.hang_risk.level, RiskLevel::Critical);
        assert_eq!(incident.id, incident_id);
        assert_eq!(incident.peak_level, RiskLevel::Critical);
        assert!(incident.bundle_captured);
        let bundle_path = incident.bundle_path.clone().unwrap();
        assert!(std::path::Path::new(&bundle_path).exists());
        assert_eq!(f.supervisor.store().load_budget().current_cap, 1);

        // Next critical tick does not produce a second bundle.
        let again = f
            .supervisor
            .advance(input(4202, vec![proc(100, 0.0, 300, 4202)], 1307, 100.0));
        assert_eq!(again.active_incident.as_ref().unwrap().bundle_path.as_deref(), Some(bundle_path.as_str()));
        let bundles = fs::read_dir(f.supervisor.store().data_dir())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with("bundle-"))
            .count();
        assert_eq!(bundles, 1);

        // Activity returns: quiet resets, incident closes.
        let recovered = f
            .supervisor
            .advance(input(4210, vec![proc(100, 50.0, 300, 4210)], 1, 100.0));
        assert_eq!(recovered.hang_risk.level, RiskLevel::Ok);
        assert_eq!(recovered.composite_quiet_seconds, 0);
        assert!(recovered.active_incident.is_none());

        let incidents = fs::read_to_string(f.supervisor.store().incidents_path()).unwrap();
        assert_eq!(incidents.lines().count(), 1);
        let closed: crate::types::Incident =
            serde_json::from_str(incidents.lines().next().unwrap()).unwrap();
        assert_eq!(closed.id, incident_id);
        assert_eq!(closed.closed_at, Some(4210));

        // Cap stays reduced until 60s of sustained ok.
        assert_eq!(f.supervisor.store().load_budget().current_cap, 1);
        f.supervisor
            .advance(input(4269, vec![proc(100, 50.0, 300, 4269)], 1, 100.0));
        assert_eq!(f.supervisor.store().load_budget().current_cap, 1);
        f.supervisor
            .advance(input(4270, vec![proc(100, 50.0, 300, 4270)], 1, 100.0));
        assert_eq!(f.supervisor.store().load_budget().current_cap, 4);
    }

    #[test]
    fn losing_all_processes_resets_first_seen_and_quiet() {
        let mut f = fixture();
        f.supervisor
            .advance(input(0, vec![proc(100, 0.0, 300, 1)], 400, 100.0));
        let state = f
            .supervisor
            .advance(input(100, vec![proc(100, 0.0, 300, 100)], 500, 100.0));
        assert_eq!(state.composite_quiet_seconds, 100);
        assert_eq!(state.process_age_seconds, 100);

        let empty = f.supervisor.advance(input(200, vec![], 600, 100.0));
        assert_eq!(empty.process_age_seconds, 0);
        assert_eq!(empty.composite_quiet_seconds, 0);

        // Re-appearing starts a fresh grace window.
        let back = f
            .supervisor
            .advance(input(300, vec![proc(101, 0.0, 300, 1)], 700, 100.0));
        assert_eq!(back.hang_risk.grace_remaining_seconds, 60);
        assert_eq!(back.hang_risk.level, RiskLevel::Ok);
    }

    #[test]
    fn attention_since_survives_across_ticks_at_the_same_level() {
        let mut f = fixture();
        f.supervisor
            .advance(input(0, vec![proc(100, 12.0, 300, 1)], 3, 100.0));
        f.supervisor
            .advance(input(3295, vec![proc(100, 0.0, 300, 3295)], 400, 100.0));
        let first = f
            .supervisor
            .advance(input(3600, vec![proc(100, 0.0, 300, 3600)], 705, 100.0));
        let second = f
            .supervisor
            .advance(input(3602, vec![proc(100, 0.0, 300, 3602)], 707, 100.0));
        assert_eq!(first.attention.level, AttentionLevel::Warn);
        assert_eq!(second.attention.level, AttentionLevel::Warn);
        assert_eq!(second.attention.since, first.attention.since);
    }

    #[test]
    fn budget_mutations_from_rpc_side_survive_the_next_tick() {
        let mut f = fixture();
        f.supervisor
            .advance(input(0, vec![proc(100, 12.0, 300, 1)], 3, 100.0));

        // Simulate a concurrent RPC acquire between ticks.
        let mut budget = f.supervisor.store().load_budget();
        let lease = budget.acquire(2, 600, "batch", 1).unwrap();
        f.supervisor.store().save_budget(&budget).unwrap();

        let state = f
            .supervisor
            .advance(input(2, vec![proc(100, 12.0, 300, 2)], 3, 100.0));
        let summary = state.budget_summary.unwrap();
        assert_eq!(summary.slots_in_use, 2);
        assert_eq!(summary.active_leases[0].id, lease.id);
    }

    #[test]
    fn expired_leases_are_collected_before_cap_adjustment() {
        let mut f = fixture();
        let mut budget = f.supervisor.store().load_budget();
        budget.acquire(2, 10, "short", 0).unwrap();
        f.supervisor.store().save_budget(&budget).unwrap();

        let state = f
            .supervisor
            .advance(input(20, vec![proc(100, 12.0, 300, 1)], 3, 100.0));
        let summary = state.budget_summary.unwrap();
        assert_eq!(summary.slots_in_use, 0);
        assert!(summary.active_leases.is_empty());
    }

    #[test]
    fn nudge_written_bundle_flag_is_absorbed() {
        let mut f = fixture();
        f.supervisor
            .advance(input(0, vec![proc(100, 12.0, 300, 1)], 3, 100.0));
        f.supervisor
            .advance(input(3295, vec![proc(100, 0.0, 300, 3295)], 400, 100.0));
        f.supervisor
            .advance(input(3600, vec![proc(100, 0.0, 300, 3600)], 705, 100.0));

        // Out-of-band handler marks the bundle as captured.
        let mut persisted = f.supervisor.store().load_state().unwrap();
        if let Some(incident) = persisted.active_incident.as_mut() {
            incident.bundle_captured = true;
            incident.bundle_path = Some("/tmp/nudged.zip".to_string());
        }
        f.supervisor.store().save_state(&persisted).unwrap();

        // Escalation to critical must not capture a second bundle.
        let state = f
            .supervisor
            .advance(input(4200, vec![proc(100, 0.0, 300, 4200)], 1305, 100.0));
        let incident = state.active_incident.unwrap();
        assert!(incident.bundle_captured);
        assert_eq!(incident.bundle_path.as_deref(), Some("/tmp/nudged.zip"));
    }
}
