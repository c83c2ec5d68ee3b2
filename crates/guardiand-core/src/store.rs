//! File-backed persisted store.
//!
//! Two JSON records (`state.json`, `budget.json`) and two append-only
//! logs (`journal.jsonl`, `incidents.jsonl`). Writes are always
//! write-sibling-then-rename; unreadable records are backed up as
//! `<name>.corrupt.<epoch>` and replaced by defaults, never treated as
//! fatal.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use crate::error::GuardianError;
use crate::types::{now_epoch, Budget, GuardianState, Incident, JournalEntry};

pub const STATE_FILE: &str = "state.json";
pub const BUDGET_FILE: &str = "budget.json";
pub const JOURNAL_FILE: &str = "journal.jsonl";
pub const INCIDENTS_FILE: &str = "incidents.jsonl";

#[derive(Debug, Clone)]
pub struct GuardianStore {
    data_dir: PathBuf,
    base_cap: u32,
}

impl GuardianStore {
    /// Open (and create) the data directory.
    pub fn open(data_dir: impl Into<PathBuf>, base_cap: u32) -> Result<Self, GuardianError> {
        let data_dir = data_dir.into();
        fs::create_dir_all(&data_dir).map_err(|e| GuardianError::StateWriteFailed {
            detail: format!("create {}", data_dir.display()),
            source: Some(e),
        })?;
        Ok(GuardianStore { data_dir, base_cap })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn state_path(&self) -> PathBuf {
        self.data_dir.join(STATE_FILE)
    }

    pub fn budget_path(&self) -> PathBuf {
        self.data_dir.join(BUDGET_FILE)
    }

    pub fn journal_path(&self) -> PathBuf {
        self.data_dir.join(JOURNAL_FILE)
    }

    pub fn incidents_path(&self) -> PathBuf {
        self.data_dir.join(INCIDENTS_FILE)
    }

    // ============ Records ============

    /// Load the last persisted snapshot. None when missing or corrupt
    /// (a corrupt file is backed up first).
    pub fn load_state(&self) -> Option<GuardianState> {
        self.read_record(&self.state_path())
    }

    pub fn save_state(&self, state: &GuardianState) -> Result<(), GuardianError> {
        self.write_record(&self.state_path(), state)
            .map_err(|e| GuardianError::StateWriteFailed {
                detail: STATE_FILE.to_string(),
                source: Some(e),
            })
    }

    /// Load the budget, falling back to a default (base cap, no leases)
    /// when missing or corrupt. In-flight leases do not survive
    /// corruption.
    pub fn load_budget(&self) -> Budget {
        self.read_record(&self.budget_path())
            .unwrap_or_else(|| self.default_budget())
    }

    pub fn save_budget(&self, budget: &Budget) -> Result<(), GuardianError> {
        self.write_record(&self.budget_path(), budget)
            .map_err(|e| GuardianError::BudgetWriteFailed {
                detail: BUDGET_FILE.to_string(),
                source: Some(e),
            })
    }

    fn default_budget(&self) -> Budget {
        Budget::fresh(self.base_cap, now_epoch())
    }

    /// A snapshot is fresh while `now - updatedAt` is under the
    /// staleness threshold.
    pub fn is_fresh(state: &GuardianState, now: i64, staleness_seconds: i64) -> bool {
        now - state.updated_at < staleness_seconds
    }

    // ============ Journals ============

    pub fn append_journal(&self, entry: &JournalEntry) -> Result<(), GuardianError> {
        self.append_line(&self.journal_path(), entry)
            .map_err(|e| GuardianError::StateWriteFailed {
                detail: JOURNAL_FILE.to_string(),
                source: Some(e),
            })
    }

    pub fn append_incident(&self, incident: &Incident) -> Result<(), GuardianError> {
        self.append_line(&self.incidents_path(), incident)
            .map_err(|e| GuardianError::StateWriteFailed {
                detail: INCIDENTS_FILE.to_string(),
                source: Some(e),
            })
    }

    fn append_line<T: Serialize>(&self, path: &Path, record: &T) -> std::io::Result<()> {
        let mut line = serde_json::to_string(record).map_err(std::io::Error::other)?;
        line.push('\n');
        let mut file = fs::OpenOptions::new().create(true).append(true).open(path)?;
        // One write call per line keeps concurrent appends line-atomic.
        file.write_all(line.as_bytes())
    }

    // ============ Read / write discipline ============

    fn read_record<T: DeserializeOwned>(&self, path: &Path) -> Option<T> {
        let contents = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read record, using defaults");
                return None;
            }
        };
        match serde_json::from_str::<T>(&contents) {
            Ok(record) => Some(record),
            Err(e) => {
                let backup = self.backup_corrupt(path);
                warn!(
                    path = %path.display(),
                    backup = %backup.as_deref().map(Path::display).map(|d| d.to_string()).unwrap_or_default(),
                    error = %e,
                    "Corrupt record backed up, using defaults"
                );
                None
            }
        }
    }

    fn backup_corrupt(&self, path: &Path) -> Option<PathBuf> {
        let name = path.file_name()?.to_string_lossy().to_string();
        let backup = path.with_file_name(format!("{}.corrupt.{}", name, now_epoch()));
        match fs::copy(path, &backup) {
            Ok(_) => Some(backup),
            Err(_) => None,
        }
    }

    fn write_record<T: Serialize>(&self, path: &Path, record: &T) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(record).map_err(std::io::Error::other)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "record".to_string());
        let tmp = path.with_file_name(format!("{}.tmp", name));
        fs::write(&tmp, json)?;
        fs::rename(&tmp, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{GuardianState, Lease};
    use tempfile::tempdir;

    fn store(dir: &Path) -> GuardianStore {
        GuardianStore::open(dir, 4).unwrap()
    }

    #[test]
    fn state_write_then_read_round_trips() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        let mut state = GuardianState::empty(1234);
        state.daemon_running = true;
        state.daemon_pid = Some(42);
        store.save_state(&state).unwrap();
        let back = store.load_state().unwrap();
        assert_eq!(back, state);
        // Byte-equivalence: a second save of the re-read record is identical.
        let first = fs::read(store.state_path()).unwrap();
        store.save_state(&back).unwrap();
        let second = fs::read(store.state_path()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn missing_files_are_defaults_not_errors() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        assert!(store.load_state().is_none());
        let budget = store.load_budget();
        assert_eq!(budget.current_cap, 4);
        assert_eq!(budget.base_cap, 4);
        assert!(budget.leases.is_empty());
    }

    #[test]
    fn corrupt_budget_is_backed_up_and_reset() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        fs::write(store.budget_path(), "{malformed").unwrap();

        let budget = store.load_budget();
        assert_eq!(budget.current_cap, 4);
        assert!(budget.leases.is_empty());

        let backups: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.file_name()
                    .to_string_lossy()
                    .starts_with("budget.json.corrupt.")
            })
            .collect();
        assert_eq!(backups.len(), 1);
        assert_eq!(fs::read_to_string(backups[0].path()).unwrap(), "{malformed");
    }

    #[test]
    fn budget_round_trip_keeps_leases() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        let mut budget = store.load_budget();
        budget.leases.push(Lease {
            id: "deadbeef".to_string(),
            slots: 2,
            reason: "batch".to_string(),
            granted_at: 10,
            expires_at: 70,
        });
        store.save_budget(&budget).unwrap();
        assert_eq!(store.load_budget(), budget);
    }

    #[test]
    fn journal_appends_one_line_per_entry() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        for i in 0..3 {
            store
                .append_journal(&JournalEntry {
                    timestamp: i,
                    action: "rotate".to_string(),
                    target: Some(format!("file-{i}.jsonl")),
                    detail: "compressed".to_string(),
                    size_before: Some(100),
                    size_after: Some(10),
                })
                .unwrap();
        }
        let text = fs::read_to_string(store.journal_path()).unwrap();
        assert_eq!(text.lines().count(), 3);
        let entry: JournalEntry = serde_json::from_str(text.lines().next().unwrap()).unwrap();
        assert_eq!(entry.action, "rotate");
    }

    #[test]
    fn freshness_uses_strict_window() {
        let state = GuardianState::empty(100);
        assert!(GuardianStore::is_fresh(&state, 109, 10));
        assert!(!GuardianStore::is_fresh(&state, 110, 10));
    }

    #[test]
    fn atomic_write_leaves_no_tmp_behind() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        store.save_state(&GuardianState::empty(1)).unwrap();
        assert!(!dir.path().join("state.json.tmp").exists());
    }
}
