//! helmsync - declarative Helm release reconciler CLI
//!
//! ## Commands
//!
//! - `reconcile`: drive one or more releases to the state in their config files
//! - `diff`: show what `reconcile` would do for a config file
//! - `status`: show the deployed revision of a release
//! - `history`: list the revision history of a release
//! - `rollback`: re-deploy an earlier revision
//!
//! State lives in a local directory (`--state-dir`, `HELMSYNC_STATE_DIR`).
//! The process exit code reflects the worst outcome: 0 ok, 2 validation,
//! 3 cluster unreachable, 4 apply failed, 5 fatal inconsistency, 6 timeout.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use helmsync_core::metrics::METRICS;
use helmsync_core::{
    aggregate_exit_code, load_release_config, release_id, ReconcileAction, ReconcileError,
    ReconcileReport, Reconciler, ReconcilerConfig, RetryPolicy,
};
use helmsync_state::{FsReleaseBackend, ReleaseRevision};
use serde::Serialize;
use tracing::{debug, Level};

#[derive(Parser)]
#[command(name = "helmsync")]
#[command(author = "Stevedores Org")]
#[command(version = helmsync_core::VERSION)]
#[command(about = "Declarative Helm release reconciler", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true, env = "HELMSYNC_LOG_JSON")]
    json: bool,

    /// Directory holding release state
    #[arg(long, global = true, env = "HELMSYNC_STATE_DIR", default_value = ".helmsync")]
    state_dir: PathBuf,

    /// Attempts for reads that fail as unreachable
    #[arg(long, global = true, default_value = "5")]
    max_attempts: u32,

    /// Deadline in milliseconds for waiting on the release lock and reads
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconcile releases described by config files (.json or .toml)
    Reconcile {
        /// Release config files
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Print reports as a JSON array instead of text
        #[arg(long)]
        report_json: bool,
    },

    /// Show the changes `reconcile` would make, without applying
    Diff {
        /// Release config file
        file: PathBuf,
    },

    /// Show the deployed revision of a release
    Status {
        /// Release name
        name: String,

        /// Release namespace
        #[arg(short, long)]
        namespace: Option<String>,
    },

    /// Show revision history of a release (oldest first)
    History {
        /// Release name
        name: String,

        /// Release namespace
        #[arg(short, long)]
        namespace: Option<String>,

        /// Print revisions as JSON
        #[arg(long)]
        output_json: bool,
    },

    /// Re-deploy an earlier revision of a release
    Rollback {
        /// Release name
        name: String,

        /// Release namespace
        #[arg(short, long)]
        namespace: Option<String>,

        /// Revision to roll back to (default: the previously deployed one)
        #[arg(long)]
        to: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    helmsync_core::telemetry::init_tracing(cli.json, level);

    let backend = FsReleaseBackend::new(&cli.state_dir).with_context(|| {
        format!(
            "Failed to open state directory {}",
            cli.state_dir.display()
        )
    })?;
    debug!(state_dir = %backend.root().display(), "state backend ready");

    let config = ReconcilerConfig {
        retry: RetryPolicy {
            max_attempts: cli.max_attempts,
            ..RetryPolicy::default()
        },
        pre_apply_timeout_ms: cli.timeout_ms,
    };
    let reconciler = Reconciler::with_config(Arc::new(backend), config);

    let code = match cli.command {
        Commands::Reconcile { files, report_json } => {
            cmd_reconcile(&reconciler, &files, report_json).await?
        }
        Commands::Diff { file } => cmd_diff(&reconciler, &file).await,
        Commands::Status { name, namespace } => cmd_status(&reconciler, &name, namespace).await,
        Commands::History {
            name,
            namespace,
            output_json,
        } => cmd_history(&reconciler, &name, namespace, output_json).await?,
        Commands::Rollback {
            name,
            namespace,
            to,
        } => cmd_rollback(&reconciler, &name, namespace.as_deref(), to).await,
    };

    METRICS.flush();
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

fn report_error(err: &ReconcileError) -> i32 {
    eprintln!("error: {}", err);
    err.kind().exit_code()
}

/// Reconcile every config file; unreadable files become failed reports.
async fn cmd_reconcile(reconciler: &Reconciler, files: &[PathBuf], report_json: bool) -> Result<i32> {
    let mut reports = Vec::with_capacity(files.len());
    let mut raws = Vec::with_capacity(files.len());
    for path in files {
        match load_release_config(path) {
            Ok(raw) => raws.push(raw),
            Err(e) => {
                let mut report = ReconcileReport::new(path.display().to_string());
                report.fail(&e.into());
                reports.push(report);
            }
        }
    }
    reports.extend(reconciler.reconcile_many(raws).await);

    if report_json {
        println!(
            "{}",
            serde_json::to_string_pretty(&reports).context("Failed to serialize reports")?
        );
    } else {
        for report in &reports {
            println!("{}", report);
        }
    }
    Ok(aggregate_exit_code(&reports))
}

async fn cmd_diff(reconciler: &Reconciler, file: &Path) -> i32 {
    let raw = match load_release_config(file) {
        Ok(raw) => raw,
        Err(e) => return report_error(&e.into()),
    };
    let release = raw.display_id();
    match reconciler.plan(raw).await {
        Ok(plan) => {
            println!("{} action={}", release, ReconcileAction::from(plan.action));
            if plan.chart_changed {
                println!("  chart changed");
            }
            for key in &plan.changed_keys {
                println!("  ~ {}", key);
            }
            0
        }
        Err(e) => report_error(&e),
    }
}

async fn cmd_status(reconciler: &Reconciler, name: &str, namespace: Option<String>) -> i32 {
    let id = match release_id(name, namespace.as_deref()) {
        Ok(id) => id,
        Err(e) => return report_error(&e.into()),
    };
    match reconciler.status(&id).await {
        Ok(Some(rev)) => {
            println!(
                "{} revision={} status={} chart={} digest={} updated={}",
                id,
                rev.revision,
                rev.status,
                rev.spec.chart_ref,
                rev.spec.digest().short(),
                rev.updated_at.to_rfc3339()
            );
            0
        }
        Ok(None) => {
            println!("No deployed revision for {}", id);
            0
        }
        Err(e) => report_error(&e),
    }
}

#[derive(Serialize)]
struct HistoryEntry<'a> {
    revision: u64,
    status: String,
    chart: &'a str,
    digest: String,
    applied_at: String,
    description: &'a str,
}

impl<'a> From<&'a ReleaseRevision> for HistoryEntry<'a> {
    fn from(rev: &'a ReleaseRevision) -> Self {
        Self {
            revision: rev.revision,
            status: rev.status.to_string(),
            chart: &rev.spec.chart_ref,
            digest: rev.spec.digest().to_string(),
            applied_at: rev.applied_at.to_rfc3339(),
            description: &rev.description,
        }
    }
}

async fn cmd_history(
    reconciler: &Reconciler,
    name: &str,
    namespace: Option<String>,
    output_json: bool,
) -> Result<i32> {
    let id = match release_id(name, namespace.as_deref()) {
        Ok(id) => id,
        Err(e) => return Ok(report_error(&e.into())),
    };
    let history = match reconciler.history(&id).await {
        Ok(history) => history,
        Err(e) => return Ok(report_error(&e)),
    };

    if output_json {
        let entries: Vec<HistoryEntry> = history.iter().map(HistoryEntry::from).collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&entries).context("Failed to serialize history")?
        );
        return Ok(0);
    }

    if history.is_empty() {
        println!("No release history for {}", id);
        return Ok(0);
    }
    for rev in &history {
        println!(
            "{:>4} {:<12} {} {} {}",
            rev.revision,
            rev.status.as_str(),
            rev.applied_at.to_rfc3339(),
            rev.spec.digest().short(),
            rev.description
        );
    }
    Ok(0)
}

async fn cmd_rollback(
    reconciler: &Reconciler,
    name: &str,
    namespace: Option<&str>,
    to: Option<u64>,
) -> i32 {
    let report = reconciler.rollback(name, namespace, to).await;
    println!("{}", report);
    report.exit_code()
}
