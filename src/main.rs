mod cli;
mod config;
mod location;
mod paths;
mod runner;
mod session;
mod transport;
mod ui;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Commands};
use std::io;
use std::process::ExitCode;

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let mut log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    if let Commands::Apply(args) = &cli.command
        && args.debug
    {
        log_level = log_level.max(log::LevelFilter::Debug);
    }

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .init();

    match cli.command {
        Commands::Apply(args) => {
            let config = config::Config::load()?;
            let request = runner::ApplyRequest {
                scenario: args.scenario,
                locations: args.locations,
                rehearsal: args.rehearsal,
                password: args.password,
                timeout: args.timeout,
                agent_binary: args.agent_binary,
            };
            if runner::apply(&config, &request)? {
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::FAILURE)
            }
        }
        Commands::Check { scenario } => {
            runner::check(&scenario)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Agent => {
            let workdir = std::env::current_dir().context("Could not determine working directory")?;
            agent::serve(&workdir)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "stagehand", &mut io::stdout());
            Ok(ExitCode::SUCCESS)
        }
    }
}
