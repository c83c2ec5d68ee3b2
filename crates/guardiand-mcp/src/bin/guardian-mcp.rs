//! guardian-mcp - MCP stdio server for guardiand
//!
//! Launched by the coding assistant as an MCP server (one session per
//! child process). Serves the eight guardian tools straight off the
//! persisted state; if the polling daemon is not running it is started
//! detached first, so `status` has something fresh to read.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use anyhow::Result;
use tokio::time::sleep;
use tracing::{info, warn};

use guardiand_core::{now_epoch, GuardianConfig, GuardianStore};
use guardiand_mcp::{GuardianToolHandler, McpServer};

fn log_filter() -> tracing_subscriber::EnvFilter {
    let level = if let Ok(v) = std::env::var("RUST_LOG") {
        v
    } else if let Ok(v) = std::env::var("GUARDIAN_LOG_LEVEL") {
        match v.as_str() {
            "silent" => "off".to_string(),
            "fatal" => "error".to_string(),
            other => other.to_string(),
        }
    } else {
        "warn".to_string()
    };
    tracing_subscriber::EnvFilter::try_new(level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"))
}

fn guardiand_binary_path() -> PathBuf {
    // Prefer a sibling `guardiand` binary next to this executable
    // (dev / cargo build layouts).
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            let candidate = dir.join("guardiand");
            if candidate.exists() {
                return candidate;
            }
        }
    }
    PathBuf::from("guardiand")
}

fn spawn_daemon() -> Result<()> {
    let bin = guardiand_binary_path();
    let mut cmd = std::process::Command::new(&bin);
    cmd.arg("run")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .envs(std::env::vars());
    cmd.spawn()
        .map_err(|e| anyhow::anyhow!("Failed to spawn daemon {}: {e}", bin.display()))?;
    Ok(())
}

/// Make sure a polling daemon is keeping state.json fresh. Best-effort:
/// the tools degrade gracefully without one.
async fn ensure_daemon(config: &GuardianConfig) {
    if std::env::var("GUARDIAN_NO_AUTOSTART").map_or(false, |v| v == "1") {
        return;
    }
    let Ok(store) = GuardianStore::open(&config.data_dir, config.thresholds.base_cap) else {
        return;
    };
    let staleness = config.thresholds.state_staleness_seconds;
    let fresh = |now: i64| {
        store
            .load_state()
            .map_or(false, |s| GuardianStore::is_fresh(&s, now, staleness))
    };
    if fresh(now_epoch()) {
        return;
    }

    warn!("Persisted state is stale, starting the guardiand daemon");
    if let Err(e) = spawn_daemon() {
        warn!(error = %e, "Daemon autostart failed; tools will serve degraded snapshots");
        return;
    }
    for _ in 0..25 {
        if fresh(now_epoch()) {
            info!("Daemon is keeping state fresh");
            return;
        }
        sleep(Duration::from_millis(200)).await;
    }
    warn!("Daemon did not freshen state in time; tools will serve degraded snapshots");
}

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries JSON-RPC frames; all logging goes to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(log_filter())
        .with_writer(std::io::stderr)
        .init();

    let config = GuardianConfig::from_env();
    ensure_daemon(&config).await;

    let handler = GuardianToolHandler::new(config)?;
    let mut server = McpServer::new(handler);
    server.run().await?;
    Ok(())
}
