//! Membank CLI
//!
//! Builds memory banks from the command line. Every build runs as a tracked
//! job whose log is persisted next to the output; the final `BuildResult` is
//! printed as JSON on stdout.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use membank_core::cost::estimate_cost;
use membank_core::invoker::{AgentInvoker, ClaudeCliInvoker, OfflineInvoker};
use membank_core::models::ClaudeModel;
use membank_core::state::{BuildConfig, BuildJob, BuildMode, JobStatus, JobType, PersistedSettings, ValidationMode};
use membank_core::swarm::{run_job, ProgressReporter, TracingReporter};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Membank - documentation memory banks written by LLM agents")]
struct Args {
    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Build a memory bank for a repository
    Build(BuildArgs),
    /// Estimate the cost of a token budget
    Estimate {
        /// Total tokens expected
        #[arg(long)]
        tokens: u64,
        #[arg(long)]
        model: Option<ClaudeModel>,
    },
    /// Show or change persisted settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Args)]
struct BuildArgs {
    /// Repository to document
    repo: PathBuf,
    /// Output directory (default: ./<repo-name>-memory-bank)
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// full, incremental or multi-agent
    #[arg(long)]
    mode: Option<BuildMode>,
    #[arg(long)]
    max_turns: Option<u32>,
    /// Concurrent component agents
    #[arg(long)]
    concurrency: Option<usize>,
    /// Concurrent validators
    #[arg(long)]
    validators: Option<usize>,
    #[arg(long)]
    skip_validation: bool,
    /// Diagnose first, then repair, in separate validator sessions
    #[arg(long)]
    two_pass: bool,
    /// Wall-clock limit for the whole build, in seconds
    #[arg(long)]
    timeout: Option<u64>,
    #[arg(long)]
    model: Option<ClaudeModel>,
    /// Path of the claude executable
    #[arg(long)]
    claude_bin: Option<PathBuf>,
    /// Use the offline backend instead of a live agent
    #[arg(long)]
    dry_run: bool,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the persisted settings
    Show,
    /// Update one setting, e.g. `config set max_turns 400`
    Set { key: String, value: String },
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "membank=debug,membank_core=debug"
    } else {
        "membank=info,membank_core=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

fn default_output(repo: &Path) -> PathBuf {
    let name = repo
        .canonicalize()
        .ok()
        .and_then(|p| p.file_name().map(|n| n.to_string_lossy().to_string()))
        .unwrap_or_else(|| "repository".to_string());
    PathBuf::from(format!("{}-memory-bank", name))
}

/// Defaults, then persisted settings, then flags
fn build_config(args: &BuildArgs, settings: &PersistedSettings) -> BuildConfig {
    let output = args
        .output
        .clone()
        .unwrap_or_else(|| default_output(&args.repo));
    let mut config = BuildConfig::new(&args.repo, output);
    settings.apply_to(&mut config);

    if let Some(mode) = args.mode {
        config.mode = mode;
    }
    if let Some(max_turns) = args.max_turns {
        config.max_turns = max_turns;
    }
    if let Some(n) = args.concurrency {
        config.max_concurrent_agents = n;
    }
    if let Some(n) = args.validators {
        config.max_concurrent_validators = n;
    }
    if args.skip_validation {
        config.skip_validation = true;
    }
    if args.two_pass {
        config.validation_mode = ValidationMode::TwoPass;
    }
    if args.timeout.is_some() {
        config.build_timeout_secs = args.timeout;
    }
    if let Some(model) = args.model {
        config.model = model;
    }
    config
}

async fn run_build_command(args: BuildArgs) -> Result<bool> {
    let settings = PersistedSettings::load().await;
    let config = build_config(&args, &settings);
    config.validate().context("Invalid build configuration")?;

    let invoker: Arc<dyn AgentInvoker> = if args.dry_run {
        tracing::info!("Dry run: using the offline backend");
        Arc::new(OfflineInvoker::new())
    } else {
        let binary = args
            .claude_bin
            .clone()
            .or_else(|| settings.claude_binary.as_ref().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("claude"));
        Arc::new(ClaudeCliInvoker::new(binary))
    };

    tracing::info!(
        "Building {} memory bank for {:?} into {:?}",
        config.mode,
        config.repo_path,
        config.output_path
    );

    let job_type = if config.mode == BuildMode::Incremental {
        JobType::Update
    } else {
        JobType::Build
    };
    let job = BuildJob::new(config, job_type);
    let console: Arc<dyn ProgressReporter> = Arc::new(TracingReporter);
    let finished = run_job(job, invoker, Some(console))
        .await
        .context("Build job failed to run")?;

    let output = serde_json::to_string_pretty(&finished.result)?;
    println!("{}", output);
    Ok(finished.status == JobStatus::Completed)
}

async fn run_config_command(action: ConfigAction) -> Result<()> {
    let path = PersistedSettings::default_path();
    let mut settings = PersistedSettings::load_from(&path).await;
    match action {
        ConfigAction::Show => {
            eprintln!("Settings file: {}", path.display());
            println!("{}", serde_json::to_string_pretty(&settings)?);
        }
        ConfigAction::Set { key, value } => {
            settings.set(&key, &value)?;
            settings.save_to(&path).await?;
            eprintln!("Saved {} = {} to {}", key, value, path.display());
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine
    let _ = dotenvy::dotenv();
    let args = Args::parse();
    init_tracing(args.verbose);

    match args.command {
        CliCommand::Build(build) => {
            if !run_build_command(build).await? {
                std::process::exit(1);
            }
        }
        CliCommand::Estimate { tokens, model } => {
            let estimate = estimate_cost(tokens, model.unwrap_or_default());
            println!("{}", serde_json::to_string_pretty(&estimate)?);
        }
        CliCommand::Config { action } => run_config_command(action).await?,
    }
    Ok(())
}
