use std::path::PathBuf;
use std::process::Command;

use anyhow::{anyhow, Context, Result};

/// Applies pending database migrations of the host application.
pub trait MigrationRunner {
    /// Returns whatever the migration tool printed.
    fn run_pending(&self) -> Result<String>;
}

/// Runs a named post-update command and reports its exit code.
pub trait CommandRunner {
    fn run(&self, command: &str) -> Result<i32>;
}

/// Identifies who is applying an update, if anyone can be identified.
pub trait ActorResolver {
    fn current_actor(&self) -> Option<String>;
}

/// Runs a configured migration program such as `php artisan migrate --force`.
#[derive(Debug, Clone)]
pub struct ProcessMigrationRunner {
    argv: Vec<String>,
    working_dir: PathBuf,
}

impl ProcessMigrationRunner {
    pub fn new(argv: Vec<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            argv,
            working_dir: working_dir.into(),
        }
    }
}

impl MigrationRunner for ProcessMigrationRunner {
    fn run_pending(&self) -> Result<String> {
        let (program, args) = self
            .argv
            .split_first()
            .ok_or_else(|| anyhow!("no migration command is configured"))?;
        let mut command = Command::new(program);
        command.args(args).current_dir(&self.working_dir);
        run_command(&mut command, "migration command failed")
    }
}

/// Runs post-update commands as `<prefix...> <command words...>`.
#[derive(Debug, Clone)]
pub struct ProcessCommandRunner {
    prefix: Vec<String>,
    working_dir: PathBuf,
}

impl ProcessCommandRunner {
    pub fn new(prefix: Vec<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            prefix,
            working_dir: working_dir.into(),
        }
    }

    fn argv(&self, command: &str) -> Vec<String> {
        self.prefix
            .iter()
            .cloned()
            .chain(command.split_whitespace().map(str::to_string))
            .collect()
    }
}

impl CommandRunner for ProcessCommandRunner {
    fn run(&self, command: &str) -> Result<i32> {
        let argv = self.argv(command);
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| anyhow!("post-update command is empty"))?;
        let status = Command::new(program)
            .args(args)
            .current_dir(&self.working_dir)
            .status()
            .with_context(|| format!("failed to start post-update command '{command}'"))?;
        // Signal-terminated processes have no code.
        Ok(status.code().unwrap_or(-1))
    }
}

/// Reads the actor from `UPDRAFT_ACTOR`, then the login name.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvActorResolver;

impl ActorResolver for EnvActorResolver {
    fn current_actor(&self) -> Option<String> {
        ["UPDRAFT_ACTOR", "USER", "USERNAME"]
            .into_iter()
            .filter_map(|key| std::env::var(key).ok())
            .map(|value| value.trim().to_string())
            .find(|value| !value.is_empty())
    }
}

fn run_command(command: &mut Command, context_message: &str) -> Result<String> {
    let output = command
        .output()
        .with_context(|| format!("{context_message}: command failed to start"))?;
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if output.status.success() {
        return Ok(stdout);
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    Err(anyhow!(
        "{context_message}: status={} stdout='{}' stderr='{}'",
        output.status,
        stdout,
        stderr.trim()
    ))
}
