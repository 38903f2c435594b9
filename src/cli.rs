use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "stagehand")]
#[command(version)]
#[command(about = "Converge remote hosts to a declarative scenario over SSH", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Converge one or more hosts to a scenario
    Apply(ApplyArgs),

    /// Validate a scenario and show its phases without contacting any host
    Check {
        /// Scenario file (YAML)
        #[arg(short, long)]
        scenario: PathBuf,
    },

    /// Run the dispatcher on stdin/stdout (started on the target host)
    #[command(hide = true)]
    Agent,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Args)]
pub struct ApplyArgs {
    /// Scenario file (YAML)
    #[arg(short, long)]
    pub scenario: PathBuf,

    /// Comma-separated hosts, each user@hostname[:port]
    #[arg(short, long)]
    pub locations: String,

    /// Report what would change without changing anything
    #[arg(short, long)]
    pub rehearsal: bool,

    /// Trace every message exchanged with the dispatcher
    #[arg(short, long)]
    pub debug: bool,

    /// Prompt for an SSH password instead of relying on keys
    #[arg(short, long)]
    pub password: bool,

    /// Seconds to wait for each dispatcher response
    #[arg(long, env = "STAGEHAND_TIMEOUT")]
    pub timeout: Option<u64>,

    /// Agent binary to upload (defaults to this executable)
    #[arg(long)]
    pub agent_binary: Option<PathBuf>,
}
