mod completion;
mod config;
mod flows;
mod logging;
mod render;

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::completion::{write_completions_script, CliCompletionShell};
use crate::config::UpdraftConfig;
use crate::flows::{run_apply, run_backup_info, run_backups, run_history, run_rollback, Console};
use crate::logging::init_logging;
use crate::render::current_output_style;

#[derive(Parser, Debug)]
#[command(name = "updraft")]
#[command(about = "Apply, back up and roll back application update packages", long_about = None)]
struct Cli {
    /// Configuration file (defaults to ./updraft.toml when present).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Apply an update package.
    Apply {
        archive: PathBuf,
        #[arg(long, short)]
        yes: bool,
    },
    /// Restore a backup; the latest update's backup when no id is given.
    Rollback {
        backup_id: Option<String>,
        #[arg(long, short)]
        yes: bool,
    },
    /// List backups.
    Backups,
    BackupInfo {
        backup_id: String,
    },
    /// List recorded updates and rollbacks.
    History,
    Completions {
        #[arg(value_enum)]
        shell: CliCompletionShell,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run_cli(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run_cli(cli: Cli) -> Result<bool> {
    let stdin = io::stdin();
    let mut console = Console::new(stdin.lock(), io::stdout().lock(), current_output_style());

    if let Commands::Completions { shell } = cli.command {
        write_completions_script(shell, console.output_mut())?;
        return Ok(true);
    }

    let config = UpdraftConfig::load(cli.config.as_deref())?;
    init_logging(config.logging.format);

    match cli.command {
        Commands::Apply { archive, yes } => run_apply(&config, &mut console, &archive, yes),
        Commands::Rollback { backup_id, yes } => {
            run_rollback(&config, &mut console, backup_id.as_deref(), yes)
        }
        Commands::Backups => run_backups(&config, &mut console),
        Commands::BackupInfo { backup_id } => run_backup_info(&config, &mut console, &backup_id),
        Commands::History => run_history(&config, &mut console),
        Commands::Completions { .. } => Ok(true),
    }
}

#[cfg(test)]
mod tests;
