//! trace-hook: Claude Code hook handler that reports sessions to Langfuse.
//!
//! Called directly by Claude Code hooks configured in ~/.claude/settings.json.
//!
//! ## Subcommands
//!
//! - `handle`: Main hook handler, reads one event as JSON from stdin
//! - `sweep`: Marks idle sessions stale and deletes old ones
//! - `status`: Prints configuration and stored session counts
//!
//! Every subcommand exits 0. A tracing problem must never fail the hook that triggered it.

mod handle;
mod logging;

use std::collections::BTreeMap;

use chrono::Utc;
use clap::{Parser, Subcommand};
use trace_core::{SessionRegistry, SessionStatus, TraceConfig};

#[derive(Parser)]
#[command(name = "trace-hook")]
#[command(about = "Langfuse tracing for Claude Code sessions")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Handle a hook event (reads JSON from stdin)
    Handle,

    /// Mark idle sessions stale and delete long-stopped ones
    Sweep {
        /// Idle hours before an active session is marked stale (defaults to LANGFUSE_STALE_HOURS)
        #[arg(long)]
        max_age_hours: Option<u64>,
    },

    /// Show whether tracing is configured and what the registry holds
    Status,
}

fn main() {
    let config = TraceConfig::from_env();
    let _logging_guard = logging::init(&config);
    let cli = Cli::parse();

    match cli.command {
        Commands::Handle => {
            let tracer = trace_core::init(&config);
            if let Err(e) = handle::run(tracer.as_ref()) {
                tracing::warn!(error = %e, "trace-hook handle failed");
            }
        }
        Commands::Sweep { max_age_hours } => sweep(&config, max_age_hours),
        Commands::Status => status(&config),
    }
}

fn registry(config: &TraceConfig) -> Option<SessionRegistry> {
    match config.storage() {
        Ok(storage) => Some(SessionRegistry::new(storage, config.lock_timeout)),
        Err(e) => {
            eprintln!("trace-hook: {}", e);
            None
        }
    }
}

fn sweep(config: &TraceConfig, max_age_hours: Option<u64>) {
    let Some(registry) = registry(config) else {
        return;
    };
    let hours = max_age_hours.unwrap_or(config.stale_hours);
    let stats = registry.cleanup_stale_sessions(hours);

    println!("marked stale: {}", stats.marked_stale);
    println!("removed:      {}", stats.removed);
    for error in &stats.errors {
        println!("error:        {}", error);
    }
}

fn status(config: &TraceConfig) {
    println!("tracing:   {}", if config.is_available() { "enabled" } else { "disabled" });
    println!("host:      {}", config.host);

    let Some(registry) = registry(config) else {
        return;
    };
    let store = registry.store();
    println!("state dir: {}", store.storage().root().display());

    let records: Vec<_> = store
        .list_session_ids()
        .iter()
        .filter_map(|id| store.load(id))
        .collect();

    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for status in [SessionStatus::Active, SessionStatus::Stopped, SessionStatus::Stale] {
        counts.insert(status.as_str(), 0);
    }
    for record in &records {
        *counts.entry(record.status.as_str()).or_default() += 1;
    }
    for (status, count) in &counts {
        println!("{:<10} {}", format!("{}:", status), count);
    }

    if let Some(latest) = records.iter().max_by_key(|r| r.last_activity) {
        let idle = latest.idle_for(Utc::now());
        println!(
            "latest:    {} ({}m ago)",
            latest.session_id,
            idle.num_minutes()
        );
    }
}
