//! CLI entrypoint: wires [`clap`] subcommands to the `guardian` library.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};

use guardian::engine;
use guardian::error::GuardianError;
use guardian::output::{alert_block, drift_summary_line};
use guardian::state::GuardianPaths;

#[derive(Parser)]
#[command(
    name = "soul-guardian",
    about = "Workspace file integrity guard with alerting support.",
    after_help = "For easy setup, run: soul-guardian enable-monitoring"
)]
struct Cli {
    /// Directory holding policy.json, baselines.json and audit.jsonl.
    /// Defaults to <workspace>/memory/soul-guardian.
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,

    /// Workspace root whose files are protected. Defaults to the current
    /// working directory.
    #[arg(long, global = true)]
    workspace: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Initialize policy + baselines.
    Init {
        #[arg(long, default_value = "unknown")]
        actor: String,
        #[arg(long, default_value = "")]
        note: String,
        /// Overwrite policy.json with defaults.
        #[arg(long)]
        force_policy: bool,
    },
    /// Print status JSON.
    Status,
    /// Check for drift; restore restore-mode targets by default.
    Check {
        #[arg(long, default_value = "unknown")]
        actor: String,
        #[arg(long, default_value = "")]
        note: String,
        /// Never restore during check (alert-only run).
        #[arg(long)]
        no_restore: bool,
        #[arg(long, value_enum, default_value = "json")]
        output_format: OutputFormat,
    },
    /// Approve current contents as baselines.
    Approve {
        #[arg(long, default_value = "unknown")]
        actor: String,
        #[arg(long, default_value = "")]
        note: String,
        /// Relative file path to approve (repeatable).
        #[arg(long = "file")]
        files: Vec<String>,
        /// Approve all non-ignored policy targets.
        #[arg(long)]
        all: bool,
    },
    /// Restore restore-mode files to approved baselines.
    Restore {
        #[arg(long, default_value = "unknown")]
        actor: String,
        #[arg(long, default_value = "")]
        note: String,
        /// Relative file path to restore (repeatable).
        #[arg(long = "file")]
        files: Vec<String>,
        /// Restore all restore-mode targets.
        #[arg(long)]
        all: bool,
    },
    /// Verify audit log hash chain.
    VerifyAudit,
    /// Continuous watch mode - monitors and alerts on drift.
    Watch {
        #[arg(long, default_value = "unknown")]
        actor: String,
        #[arg(long, default_value = "")]
        note: String,
        /// Check interval in seconds.
        #[arg(long, default_value_t = 30)]
        interval: u64,
    },
    /// Show instructions for enabling automatic monitoring and alerts.
    EnableMonitoring,
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum OutputFormat {
    Json,
    Alert,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("soul_guardian=info,guardian=info")),
        )
        .init();

    let cli = Cli::parse();
    let workspace_root = cli
        .workspace
        .clone()
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
    let state_dir = cli
        .state_dir
        .clone()
        .unwrap_or_else(|| GuardianPaths::default_state_dir(&workspace_root));
    let paths = GuardianPaths::new(workspace_root, state_dir);

    match run(&paths, cli.command) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("ERROR: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(paths: &GuardianPaths, command: Command) -> Result<ExitCode, GuardianError> {
    match command {
        Command::Init {
            actor,
            note,
            force_policy,
        } => {
            let count = engine::init(paths, &actor, &note, force_policy)?;
            println!("Initialized {count} baseline(s) at {}", paths.state_dir.display());
            Ok(ExitCode::SUCCESS)
        }

        Command::Status => {
            let report = engine::status(paths)?;
            println!("{}", serde_json::to_string_pretty(&report).unwrap_or_default());
            Ok(ExitCode::SUCCESS)
        }

        Command::Check {
            actor,
            note,
            no_restore,
            output_format,
        } => run_check(paths, &actor, &note, no_restore, output_format),

        Command::Approve {
            actor,
            note,
            files,
            all,
        } => {
            let approved = engine::approve(paths, &actor, &note, &files, all)?;
            for path in &approved {
                println!("Approved {path}");
            }
            Ok(ExitCode::SUCCESS)
        }

        Command::Restore {
            actor,
            note,
            files,
            all,
        } => {
            let results = engine::restore_cmd(paths, &actor, &note, &files, all)?;
            let mut any = false;
            for r in &results {
                if r.restored {
                    println!("RESTORED {}", r.path);
                    any = true;
                } else {
                    println!("No drift for {}; nothing to restore.", r.path);
                }
            }
            if !any {
                println!("No restores performed.");
            }
            Ok(ExitCode::SUCCESS)
        }

        Command::VerifyAudit => {
            if !paths.audit_path().exists() {
                println!("No audit log present.");
                return Ok(ExitCode::SUCCESS);
            }
            let report = engine::verify_audit(paths)?;
            println!("OK: audit log hash chain verified ({} lines)", report.lines_verified);
            Ok(ExitCode::SUCCESS)
        }

        Command::Watch { actor, note, interval } => {
            watch(paths, &actor, &note, interval);
            Ok(ExitCode::SUCCESS)
        }

        Command::EnableMonitoring => {
            enable_monitoring(paths);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn run_check(
    paths: &GuardianPaths,
    actor: &str,
    note: &str,
    no_restore: bool,
    output_format: OutputFormat,
) -> Result<ExitCode, GuardianError> {
    let outcome = engine::check(paths, actor, note, no_restore)?;
    if !outcome.drifted {
        return Ok(ExitCode::SUCCESS);
    }

    match output_format {
        OutputFormat::Alert => println!("{}", alert_block(&outcome.files)),
        OutputFormat::Json => println!("{}", drift_summary_line(&outcome.files)),
    }

    // Drift occurred, even if auto-restored.
    Ok(ExitCode::from(2))
}

fn watch(paths: &GuardianPaths, actor: &str, note: &str, interval: u64) {
    println!("Soul Guardian watching... (interval: {interval}s)");
    println!("Press Ctrl+C to stop.\n");

    let stop = Arc::new(AtomicBool::new(false));
    let stop_handler = stop.clone();
    let _ = ctrlc::set_handler(move || stop_handler.store(true, Ordering::SeqCst));

    while !stop.load(Ordering::SeqCst) {
        match engine::check(paths, actor, note, false) {
            Ok(outcome) if outcome.drifted => println!("{}", alert_block(&outcome.files)),
            Ok(_) => {}
            Err(err) => eprintln!("ERROR: {err}"),
        }

        let mut waited = 0;
        while waited < interval && !stop.load(Ordering::SeqCst) {
            std::thread::sleep(Duration::from_secs(1));
            waited += 1;
        }
    }

    println!("\nSoul Guardian stopped.");
}

fn enable_monitoring(paths: &GuardianPaths) {
    let workspace = paths.workspace_root.display();
    println!(
        r#"
================================================================
           SOUL GUARDIAN - ENABLE MONITORING
================================================================

To enable automatic drift detection and alerting, you have two
options:

----------------------------------------------------------------
OPTION 1: Heartbeat Integration (recommended)
----------------------------------------------------------------

Add the following to your HEARTBEAT.md file:

## Soul Guardian Check
- Run `cd {workspace} && soul-guardian check --actor heartbeat --output-format alert`
- If any output is produced, relay it to the user immediately as a security alert
- This checks for unauthorized changes to SOUL.md, AGENTS.md, and other protected files

----------------------------------------------------------------
OPTION 2: Watch Mode (foreground)
----------------------------------------------------------------

Run this in a terminal to continuously monitor:

    soul-guardian watch --interval 30

----------------------------------------------------------------
OPTION 3: Manual Check
----------------------------------------------------------------

Run a one-time check with human-readable output:

    soul-guardian check --output-format alert

----------------------------------------------------------------

The guardian will:
- Detect unauthorized changes to protected files
- Auto-restore restore-mode files to their approved baselines
- Alert you immediately when drift is detected
- Save diffs and quarantine modified files for review
"#
    );
    println!("State directory: {}", paths.state_dir.display());
    println!("Workspace: {workspace}");
    println!();
}
