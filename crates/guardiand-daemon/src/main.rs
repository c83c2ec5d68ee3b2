//! guardiand - local reliability daemon for a coding assistant
//!
//! Usage:
//!   guardiand run                      # foreground polling daemon
//!   guardiand status                   # human-readable snapshot
//!   guardiand preflight [--aggressive] [--fix]
//!   guardiand doctor [--output <path>]
//!   guardiand plan
//!
//! Exit codes: 0 success, 1 operator error, 2 runtime error.

use std::path::PathBuf;
use std::time::SystemTime;

use clap::{Parser, Subcommand};
use tracing::error;

use guardiand_core::{
    build_plan, now_epoch, BundleWriter, GuardianConfig, GuardianState, GuardianStore, LogManager,
    Supervisor,
};

#[derive(Parser, Debug)]
#[command(name = "guardiand")]
#[command(about = "Local reliability daemon and diagnostics for a coding assistant")]
#[command(version)]
struct Cli {
    /// Guardian data directory (default: $GUARDIAN_HOME or ~/.claude-guardian)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Watched log tree (default: $GUARDIAN_WATCH_DIR or ~/.claude/projects)
    #[arg(long, global = true)]
    watch_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the polling daemon in the foreground
    Run {
        /// Log-tree size (MB) above which preflight recommends fixing
        #[arg(long, default_value_t = 200)]
        max_log_mb: u64,

        /// Seconds of composite quiet before hang risk is raised
        #[arg(long, default_value_t = 300)]
        hang_seconds: i64,

        /// Disable the aggressive log fix under disk pressure
        #[arg(long)]
        no_auto_fix: bool,

        /// Reserved for a future watchdog mode; never touches the daemon
        #[arg(long, hide = true)]
        auto_restart: bool,
    },

    /// Print the current snapshot
    Status,

    /// Scan the log tree; optionally fix it
    Preflight {
        /// Halve retention windows and tolerated file sizes
        #[arg(long)]
        aggressive: bool,

        /// Apply the fix instead of only reporting
        #[arg(long)]
        fix: bool,
    },

    /// Capture a diagnostic bundle
    Doctor {
        /// Where to write the bundle (default: data dir, timestamped)
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Print the recovery plan for the current snapshot
    Plan,
}

/// Operator mistakes exit 1; everything else that fails exits 2.
enum CliError {
    Operator(String),
    Runtime(anyhow::Error),
}

impl From<guardiand_core::GuardianError> for CliError {
    fn from(e: guardiand_core::GuardianError) -> Self {
        CliError::Runtime(e.into())
    }
}

impl From<anyhow::Error> for CliError {
    fn from(e: anyhow::Error) -> Self {
        CliError::Runtime(e)
    }
}

fn build_config(cli: &Cli) -> GuardianConfig {
    let mut config = GuardianConfig::from_env();
    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.clone();
    }
    if let Some(dir) = &cli.watch_dir {
        config.watch_dir = dir.clone();
    }
    config
}

fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    // Usage mistakes are operator errors (exit 1); --help and --version
    // are successes.
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = if e.use_stderr() { 1 } else { 0 };
            let _ = e.print();
            std::process::exit(code);
        }
    };
    init_logging();

    let code = match dispatch(cli).await {
        Ok(()) => 0,
        Err(CliError::Operator(message)) => {
            eprintln!("error: {message}");
            1
        }
        Err(CliError::Runtime(e)) => {
            error!(error = %e, "Command failed");
            eprintln!("error: {e}");
            2
        }
    };
    std::process::exit(code);
}

async fn dispatch(cli: Cli) -> Result<(), CliError> {
    let mut config = build_config(&cli);
    match cli.command {
        Command::Run {
            max_log_mb,
            hang_seconds,
            no_auto_fix,
            auto_restart,
        } => {
            if hang_seconds <= 0 {
                return Err(CliError::Operator(
                    "--hang-seconds must be positive".to_string(),
                ));
            }
            config.max_log_dir_mb = max_log_mb;
            config.hang_threshold_seconds = hang_seconds;
            config.auto_fix = !no_auto_fix;
            config.auto_restart = auto_restart;

            let mut supervisor = Supervisor::new(config)?;
            supervisor.run().await?;
            Ok(())
        }

        Command::Status => {
            let store = GuardianStore::open(&config.data_dir, config.thresholds.base_cap)?;
            match store.load_state() {
                Some(state) => {
                    let fresh = GuardianStore::is_fresh(
                        &state,
                        now_epoch(),
                        config.thresholds.state_staleness_seconds,
                    );
                    print_status(&state, fresh);
                    Ok(())
                }
                None => {
                    println!("No snapshot yet. Start the daemon with: guardiand run");
                    Ok(())
                }
            }
        }

        Command::Preflight { aggressive, fix } => {
            let store = GuardianStore::open(&config.data_dir, config.thresholds.base_cap)?;
            let manager = LogManager::new(config.watch_dir.clone(), config.thresholds.clone());
            let scan = manager.scan(aggressive, SystemTime::now())?;
            println!(
                "{} file(s), {:.1} MB in {}",
                scan.file_count,
                scan.total_size_mb(),
                config.watch_dir.display()
            );
            println!(
                "  compressible: {}, oversized: {}, stale sessions: {}",
                scan.compressible.len(),
                scan.oversized.len(),
                scan.stale_sessions.len()
            );
            if scan.total_size_mb() > config.max_log_dir_mb as f64 {
                println!(
                    "  tree is over the {} MB budget",
                    config.max_log_dir_mb
                );
            }
            if fix {
                let report = manager.fix(aggressive, &store, SystemTime::now())?;
                println!(
                    "fixed: compressed {}, trimmed {}, deleted {}, reclaimed {} KB",
                    report.compressed,
                    report.trimmed,
                    report.deleted,
                    report.reclaimed_bytes() / 1024
                );
            } else if scan.needs_fix() {
                println!("run again with --fix to apply");
            }
            Ok(())
        }

        Command::Doctor { output } => {
            if let Some(path) = &output {
                if let Some(parent) = path.parent() {
                    if !parent.as_os_str().is_empty() && !parent.exists() {
                        return Err(CliError::Operator(format!(
                            "output directory does not exist: {}",
                            parent.display()
                        )));
                    }
                }
            }
            let store = GuardianStore::open(&config.data_dir, config.thresholds.base_cap)?;
            let writer = BundleWriter::new(config.watch_dir.clone(), config.thresholds.clone());
            let state = store.load_state();
            let summary = writer.write(&store, state.as_ref(), output, now_epoch())?;
            println!(
                "Bundle written: {} ({} entries, {} KB)",
                summary.path.display(),
                summary.entries,
                summary.archive_bytes / 1024
            );
            Ok(())
        }

        Command::Plan => {
            let store = GuardianStore::open(&config.data_dir, config.thresholds.base_cap)?;
            let state = store
                .load_state()
                .unwrap_or_else(|| GuardianState::empty(now_epoch()));
            let plan = build_plan(&state);
            println!("status: {}", plan.status.as_str());
            for step in &plan.steps {
                match &step.tool {
                    Some(tool) => println!("  {}. {} [{}]", step.order, step.action, tool),
                    None => println!("  {}. {}", step.order, step.action),
                }
                println!("     {}", step.detail);
            }
            Ok(())
        }
    }
}

fn print_status(state: &GuardianState, fresh: bool) {
    if !fresh {
        println!("(snapshot is stale; the daemon may not be running)");
    }
    println!(
        "attention: {} ({})",
        state.attention.level.as_str(),
        state.attention.reason
    );
    println!(
        "risk: {} (quiet {}s, grace {}s remaining)",
        state.hang_risk.level.as_str(),
        state.composite_quiet_seconds,
        state.hang_risk.grace_remaining_seconds
    );
    println!(
        "processes: {} watched, disk free: {:.1} GB, log tree: {:.1} MB",
        state.processes.len(),
        state.disk_free_gb,
        state.log_tree_size_mb
    );
    for p in &state.processes {
        let handles = p
            .handle_count
            .map(|h| h.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  pid {:>7}  {:<20} cpu {:>5.1}%  mem {:>5} MB  up {:>6}s  fds {}",
            p.pid, p.name, p.cpu_percent, p.memory_mb, p.uptime_seconds, handles
        );
    }
    if let Some(incident) = &state.active_incident {
        println!(
            "incident: {} (peak {}, bundle {})",
            incident.id,
            incident.peak_level.as_str(),
            if incident.bundle_captured {
                incident.bundle_path.as_deref().unwrap_or("captured")
            } else {
                "not captured"
            }
        );
    }
    if let Some(budget) = &state.budget_summary {
        println!(
            "budget: {}/{} slots in use (cap {} of {})",
            budget.slots_in_use, budget.current_cap, budget.current_cap, budget.base_cap
        );
        for lease in &budget.active_leases {
            println!(
                "  lease {}  {} slot(s)  expires {}  reason: {}",
                lease.id, lease.slots, lease.expires_at, lease.reason
            );
        }
    }
    if !state.recommended_actions.is_empty() {
        println!("recommended:");
        for action in &state.recommended_actions {
            println!("  - {action}");
        }
    }
}
