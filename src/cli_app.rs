//! Top-level CLI definition and dispatch.

use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use serde_json::{Value, json};
use thiserror::Error;

use drop_intake::core::config::Config;
use drop_intake::core::errors::{DeadLetterReason, IntakeError};
use drop_intake::daemon::loop_main::IntakeWatcher;
use drop_intake::daemon::signals::SignalHandler;
use drop_intake::db::IntakeDb;

/// Drop-folder intake watcher.
#[derive(Debug, Parser)]
#[command(
    name = "intake",
    author,
    version,
    about = "Stabilize, fingerprint, snapshot and register dropped files",
    long_about = None,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Override config file path.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Force JSON output mode.
    #[arg(long, global = true)]
    json: bool,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Run the intake watcher.
    Run(RunArgs),
    /// Create the database schema.
    InitDb,
    /// Manage tenants.
    Tenant(TenantArgs),
    /// Manage cases.
    Case(CaseArgs),
    /// List recent dead-letter rows.
    DeadLetters(DeadLettersArgs),
    /// Print the effective configuration and its hash.
    Config,
}

#[derive(Debug, Clone, Args)]
struct RunArgs {
    /// Make one observe-and-process pass over the inbox and exit.
    #[arg(long)]
    once: bool,
}

#[derive(Debug, Clone, Args)]
struct TenantArgs {
    #[command(subcommand)]
    command: TenantCommand,
}

#[derive(Debug, Clone, Subcommand)]
enum TenantCommand {
    /// Register a tenant slug.
    Add {
        /// Lowercase slug used as the first path segment of drops.
        #[arg(value_name = "SLUG")]
        slug: String,
        /// Display name.
        #[arg(long)]
        name: Option<String>,
    },
}

#[derive(Debug, Clone, Args)]
struct CaseArgs {
    #[command(subcommand)]
    command: CaseCommand,
}

#[derive(Debug, Clone, Subcommand)]
enum CaseCommand {
    /// Create a case and print its id.
    Add {
        /// Owning tenant slug; omit for an unassigned case.
        #[arg(long, value_name = "SLUG")]
        tenant: Option<String>,
        /// Free-form label.
        #[arg(long)]
        label: Option<String>,
    },
}

#[derive(Debug, Clone, Args)]
struct DeadLettersArgs {
    /// Maximum rows to print, newest first.
    #[arg(long, default_value_t = 20, value_name = "N")]
    limit: u32,
    /// Only rows with this reason code.
    #[arg(long, value_name = "REASON")]
    reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Human,
    Json,
}

/// CLI error type with explicit exit-code mapping.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid user input at runtime.
    #[error("{0}")]
    User(String),
    /// Environment/runtime failure.
    #[error("{0}")]
    Runtime(String),
    /// JSON serialization failed.
    #[error("failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
    /// Output write failed.
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

impl CliError {
    /// Process exit code contract for the CLI.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::User(_) => 1,
            Self::Runtime(_) | Self::Io(_) => 2,
            Self::Json(_) => 3,
        }
    }
}

impl From<IntakeError> for CliError {
    fn from(err: IntakeError) -> Self {
        match err {
            IntakeError::InvalidConfig { .. }
            | IntakeError::MissingConfig { .. }
            | IntakeError::ConfigParse { .. } => Self::User(err.to_string()),
            other => Self::Runtime(other.to_string()),
        }
    }
}

/// Dispatch CLI commands.
pub fn run(cli: &Cli) -> Result<(), CliError> {
    let config = Config::load(cli.config.as_deref())?;

    match &cli.command {
        Command::Run(args) => run_watcher(&config, args),
        Command::InitDb => run_init_db(cli, &config),
        Command::Tenant(args) => run_tenant(cli, &config, args),
        Command::Case(args) => run_case(cli, &config, args),
        Command::DeadLetters(args) => run_dead_letters(&config, args),
        Command::Config => run_config(cli, &config),
    }
}

fn run_watcher(config: &Config, args: &RunArgs) -> Result<(), CliError> {
    let mut watcher = IntakeWatcher::init(config.clone())?;
    eprintln!(
        "[INTAKE-WATCHER] run {} watching {}",
        watcher.run_id(),
        watcher.inbox_root().display()
    );

    if args.once {
        let report = watcher.pass_once();
        watcher.stop("single pass");
        let report = report?;
        let payload = json!({
            "command": "run",
            "candidates": report.candidates,
            "ignored": report.ignored,
            "submitted": report.submitted,
            "created": report.created,
            "duplicates": report.duplicates,
            "dead_lettered": report.dead_lettered,
            "change_retries": report.change_retries,
            "deferred": report.deferred,
            "elapsed_seconds": report.duration.as_secs_f64(),
        });
        return write_json_line(&payload);
    }

    let signals = SignalHandler::new();
    watcher.run(&signals)?;
    Ok(())
}

fn run_init_db(cli: &Cli, config: &Config) -> Result<(), CliError> {
    let db = IntakeDb::initialize(&config.paths.database)?;
    match output_mode(cli) {
        OutputMode::Human => {
            println!("Initialized {}", db.path().display());
            if !db.is_wal_mode() {
                println!("  (WAL journal unavailable; using default journal mode)");
            }
        }
        OutputMode::Json => write_json_line(&json!({
            "command": "init-db",
            "database": db.path().to_string_lossy(),
            "wal": db.is_wal_mode(),
        }))?,
    }
    Ok(())
}

fn run_tenant(cli: &Cli, config: &Config, args: &TenantArgs) -> Result<(), CliError> {
    let TenantCommand::Add { slug, name } = &args.command;
    let db = IntakeDb::initialize(&config.paths.database)?;
    if db.tenant_id_by_slug(slug)?.is_some() {
        return Err(CliError::User(format!("tenant {slug:?} already exists")));
    }
    let row = db.insert_tenant(slug, name.as_deref())?;

    match output_mode(cli) {
        OutputMode::Human => println!("Tenant {} created (id {})", row.slug, row.id),
        OutputMode::Json => write_json_line(&json!({
            "command": "tenant add",
            "tenant": serde_json::to_value(&row)?,
        }))?,
    }
    Ok(())
}

fn run_case(cli: &Cli, config: &Config, args: &CaseArgs) -> Result<(), CliError> {
    let CaseCommand::Add { tenant, label } = &args.command;
    let db = IntakeDb::initialize(&config.paths.database)?;
    let row = db.insert_case(tenant.as_deref(), label.as_deref())?;

    match output_mode(cli) {
        OutputMode::Human => {
            println!("{}", row.id);
            if row.tenant_id.is_none() {
                println!("  (unassigned: visible to every tenant)");
            }
        }
        OutputMode::Json => write_json_line(&json!({
            "command": "case add",
            "case": serde_json::to_value(&row)?,
        }))?,
    }
    Ok(())
}

fn run_dead_letters(config: &Config, args: &DeadLettersArgs) -> Result<(), CliError> {
    let reason = match args.reason.as_deref() {
        Some(raw) => Some(DeadLetterReason::parse(raw).ok_or_else(|| {
            let known: Vec<&str> = DeadLetterReason::ALL.iter().map(|r| r.as_str()).collect();
            CliError::User(format!(
                "unknown reason {raw:?}; expected one of {}",
                known.join(", ")
            ))
        })?),
        None => None,
    };

    let db = IntakeDb::open(&config.paths.database)?;
    let rows = db.recent_dead_letters(args.limit, reason)?;
    let total = db.dead_letter_count(reason)?;

    write_json_line(&json!({
        "command": "dead-letters",
        "total": total,
        "rows": serde_json::to_value(&rows)?,
    }))
}

fn run_config(cli: &Cli, config: &Config) -> Result<(), CliError> {
    let hash = config.stable_hash()?;
    match output_mode(cli) {
        OutputMode::Human => {
            let toml_str = toml::to_string_pretty(config)
                .map_err(|e| CliError::Runtime(format!("serialize config: {e}")))?;
            println!("# hash: {hash}");
            println!("{toml_str}");
        }
        OutputMode::Json => write_json_line(&json!({
            "command": "config",
            "hash": hash,
            "config": serde_json::to_value(config)?,
        }))?,
    }
    Ok(())
}

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    writeln!(stdout)?;
    Ok(())
}

fn output_mode(cli: &Cli) -> OutputMode {
    let env_mode = std::env::var("INTAKE_OUTPUT_FORMAT").ok();
    resolve_output_mode(cli.json, env_mode.as_deref(), io::stdout().is_terminal())
}

fn resolve_output_mode(json_flag: bool, env_mode: Option<&str>, stdout_is_tty: bool) -> OutputMode {
    if json_flag {
        return OutputMode::Json;
    }

    let fallback = if stdout_is_tty {
        OutputMode::Human
    } else {
        OutputMode::Json
    };

    match env_mode.map(str::to_ascii_lowercase).as_deref() {
        Some("json") => OutputMode::Json,
        Some("human") => OutputMode::Human,
        _ => fallback,
    }
}
