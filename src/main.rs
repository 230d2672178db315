use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use phasegate::model::PartId;
use std::path::{Path, PathBuf};
use tracing_subscriber::{EnvFilter, Layer, Registry, layer::SubscriberExt, util::SubscriberInitExt};

mod cmd;

#[derive(Parser)]
#[command(name = "phasegate")]
#[command(version, about = "Phase-gated multi-worker orchestration engine")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Log format on stderr
    #[arg(long, value_enum, default_value = "text", global = true)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a project and lock its original requirement
    Init {
        /// Project name (defaults to the directory name)
        #[arg(long)]
        name: Option<String>,
        /// Requirement text, one scope entry per non-empty line
        #[arg(long, conflicts_with = "requirement_file")]
        requirement: Option<String>,
        /// Read the requirement from a file
        #[arg(long)]
        requirement_file: Option<PathBuf>,
        /// Part to create (repeatable)
        #[arg(long = "part")]
        parts: Vec<String>,
        /// Complexity budget per part
        #[arg(long)]
        budget: Option<u32>,
    },
    /// Drive parts through their phases until they complete or halt
    Run {
        /// Only this part (e.g. 1 or part-01)
        #[arg(short, long)]
        part: Option<PartId>,
        /// Run a single phase attempt and stop
        #[arg(long)]
        step: bool,
    },
    /// Show parts, phases, budgets and pending halts
    Status {
        #[arg(short, long)]
        part: Option<PartId>,
    },
    /// Show the status transition log
    History {
        #[arg(short, long)]
        part: Option<PartId>,
        /// Most recent entries to show
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },
    /// Show task outcomes, most recent first
    Tasks {
        #[arg(short, long)]
        part: Option<PartId>,
        /// Most recent tasks to show per part (0 shows all)
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },
    /// Show gate verdicts in evaluation order
    Gates {
        #[arg(short, long)]
        part: Option<PartId>,
    },
    /// List audit runs or show one
    Audit {
        #[command(subcommand)]
        command: Option<AuditCommands>,
    },
    /// Attach an authorization to a halted part
    Authorize {
        #[command(subcommand)]
        command: AuthorizeCommands,
    },
    /// Supply missing information to a part halted on an information gap
    Clarify {
        #[arg(short, long)]
        part: PartId,
        #[arg(long, conflicts_with = "file")]
        text: Option<String>,
        #[arg(long)]
        file: Option<PathBuf>,
        #[arg(long, default_value = "operator")]
        author: String,
    },
    /// Send a part halted on a scope violation back to planning
    Revert {
        #[arg(short, long)]
        part: PartId,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum AuditCommands {
    /// List recorded runs, most recent first
    List,
    /// Show one run (defaults to the most recent)
    Show { run: Option<PathBuf> },
}

/// Fields shared by every authorization.
#[derive(clap::Args, Clone, Debug)]
pub struct GrantArgs {
    #[arg(short, long)]
    pub part: PartId,
    /// Unique authorization id
    #[arg(long)]
    pub id: String,
    #[arg(long = "by")]
    pub granted_by: String,
    #[arg(long, default_value = "")]
    pub reason: String,
}

#[derive(Subcommand, Clone)]
pub enum AuthorizeCommands {
    /// Permit a task outside the scope boundary
    Scope {
        #[command(flatten)]
        grant: GrantArgs,
        /// Task key to authorize
        #[arg(long)]
        task: String,
    },
    /// Permit consumption past the complexity budget
    Budget {
        #[command(flatten)]
        grant: GrantArgs,
    },
    /// Resume a part after an escalation
    Escalation {
        #[command(flatten)]
        grant: GrantArgs,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Initialize a starter phasegate.toml file
    Init,
}

/// Log to stderr, and to a daily file under `.phasegate/logs` once it exists.
fn init_tracing(cli: &Cli, project_dir: &Path) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let default = if cli.verbose { "phasegate=debug" } else { "phasegate=info" };
    let filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let stderr: Box<dyn Layer<Registry> + Send + Sync> = match cli.log_format {
        LogFormat::Text => tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .boxed(),
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .boxed(),
    };
    let registry = tracing_subscriber::registry().with(stderr.with_filter(filter()));

    let logs_dir = phasegate::init::get_state_dir(project_dir).join("logs");
    if logs_dir.is_dir() {
        let appender = tracing_appender::rolling::daily(&logs_dir, "phasegate.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let file = tracing_subscriber::fmt::layer()
            .json()
            .with_writer(writer)
            .with_filter(filter());
        registry.with(file).init();
        Some(guard)
    } else {
        registry.init();
        None
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };
    let _guard = init_tracing(&cli, &project_dir);

    match &cli.command {
        Commands::Init {
            name,
            requirement,
            requirement_file,
            parts,
            budget,
        } => cmd::cmd_init(
            &project_dir,
            name.clone(),
            requirement.clone(),
            requirement_file.as_deref(),
            parts.clone(),
            *budget,
        )?,
        Commands::Run { part, step } => cmd::cmd_run(&project_dir, *part, *step).await?,
        Commands::Status { part } => cmd::cmd_status(&project_dir, *part)?,
        Commands::History { part, limit } => cmd::cmd_history(&project_dir, *part, *limit)?,
        Commands::Tasks { part, limit } => cmd::cmd_tasks(&project_dir, *part, *limit)?,
        Commands::Gates { part } => cmd::cmd_gates(&project_dir, *part)?,
        Commands::Audit { command } => cmd::cmd_audit(&project_dir, command.clone())?,
        Commands::Authorize { command } => cmd::cmd_authorize(&project_dir, command.clone())?,
        Commands::Clarify {
            part,
            text,
            file,
            author,
        } => cmd::cmd_clarify(&project_dir, *part, text.clone(), file.as_deref(), author).await?,
        Commands::Revert { part } => cmd::cmd_revert(&project_dir, *part)?,
        Commands::Config { command } => cmd::cmd_config(&project_dir, command.clone())?,
    }

    Ok(())
}
