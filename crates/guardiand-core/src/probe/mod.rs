//! Signal acquisition: process, activity and disk probes.
//!
//! Every probe is best-effort. A probe failure yields a null-ish value
//! for its field and never fails the poll that asked for it.

pub mod activity;
pub mod disk;
pub mod process;

pub use activity::{compose_signals, recent_files, scan_log_age_seconds};
pub use disk::{disk_free_gb, tree_size_mb};
pub use process::ProcessProbe;
