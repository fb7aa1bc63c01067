use std::env;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};

use crate::deployment::DEFAULT_STREAM_BUFFER;
use crate::error::{DeployerError, Result};

/// Available CLI actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Plan,
    Up,
    Down,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Plan => "plan",
            Action::Up => "up",
            Action::Down => "down",
        }
    }
}

/// Supported deployment targets.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Provider {
    Aws,
    Azure,
    Gcp,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Aws => "aws",
            Provider::Azure => "azure",
            Provider::Gcp => "gcp",
        }
    }
}

/// Output format for CLI commands.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    Yaml,
}

/// Log line format written to stderr.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Per-command configuration helpers.
#[derive(Debug, Args)]
pub struct ActionArgs {
    /// Deployment target (aws|azure|gcp).
    #[arg(long, value_enum)]
    pub provider: Provider,

    /// Project name, used for stack-level physical names.
    #[arg(long)]
    pub project: String,

    /// Stack name (defaults to $CLOUD_DEPLOYER_STACK or \"dev\").
    #[arg(long)]
    pub stack: Option<String>,

    /// Path to the resource graph (.yaml, .yml or .json).
    #[arg(long)]
    pub graph: PathBuf,

    /// Output format for plan and progress rendering (text|json|yaml).
    #[arg(long, value_enum, default_value = "text")]
    pub output: OutputFormat,

    /// Log format on stderr (text|json).
    #[arg(long, value_enum, env = "CLOUD_DEPLOYER_LOG_FORMAT", default_value = "text")]
    pub log_format: LogFormat,

    /// Number of progress messages buffered for a slow consumer.
    #[arg(long, default_value_t = DEFAULT_STREAM_BUFFER)]
    pub buffer: usize,

    /// Physical resource names the local engine reports as failed (repeatable).
    #[arg(long = "fail", value_name = "NAME")]
    pub fail: Vec<String>,
}

/// Top-level CLI structure.
#[derive(Debug, Parser)]
#[command(
    name = "cloud-deployer",
    version,
    about = "Deploy a declarative resource graph to a cloud backend and stream per-resource progress.",
    long_about = "Resources are ordered by the provider's kind priority, dispatched to the provider's handlers and realised by the provisioning engine. Engine progress is correlated back to the logical resources of the graph and rendered as it arrives."
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the deployment order without provisioning anything.
    Plan(ActionArgs),
    /// Create or update every resource in the graph.
    Up(ActionArgs),
    /// Delete every resource in the graph.
    Down(ActionArgs),
}

/// Complete configuration used by the deployer.
#[derive(Debug, Clone)]
pub struct DeployerConfig {
    pub action: Action,
    pub provider: Provider,
    pub project: String,
    pub stack: String,
    pub graph_path: PathBuf,
    pub output: OutputFormat,
    pub log_format: LogFormat,
    pub buffer: usize,
    pub fail_names: Vec<String>,
}

impl DeployerConfig {
    pub fn from_env_and_args(cli: CliArgs) -> Result<Self> {
        let (action, args) = match cli.command {
            Command::Plan(args) => (Action::Plan, args),
            Command::Up(args) => (Action::Up, args),
            Command::Down(args) => (Action::Down, args),
        };

        let stack = args
            .stack
            .clone()
            .or_else(|| env::var("CLOUD_DEPLOYER_STACK").ok())
            .unwrap_or_else(|| "dev".to_string());

        if args.project.trim().is_empty() {
            return Err(DeployerError::Config("--project must not be empty".into()));
        }
        if stack.trim().is_empty() {
            return Err(DeployerError::Config("stack name must not be empty".into()));
        }
        if !args.graph.exists() {
            return Err(DeployerError::Config(format!(
                "resource graph {} does not exist",
                args.graph.display()
            )));
        }
        if args.buffer == 0 {
            return Err(DeployerError::Config("--buffer must be at least 1".into()));
        }

        Ok(Self {
            action,
            provider: args.provider,
            project: args.project,
            stack,
            graph_path: args.graph,
            output: args.output,
            log_format: args.log_format,
            buffer: args.buffer,
            fail_names: args.fail,
        })
    }
}
