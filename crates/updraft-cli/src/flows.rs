use std::io::{BufRead, Write};
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tracing::warn;
use updraft_installer::{
    get_backup_info, list_backups, process_update, try_rollback_to_backup, EnvActorResolver,
    HistoryStore, JsonlHistoryStore, ProcessCommandRunner, ProcessMigrationRunner, UpdateOutcome,
    UpdateServices, UpdateStage,
};

use crate::config::UpdraftConfig;
use crate::render::{
    format_backup_info_lines, format_backup_lines, format_failure_lines, format_history_lines,
    format_rollback_lines, format_update_report_lines, render_section_header, render_status_line,
    OutputStyle, StageProgress,
};

/// Terminal input and output for one command.
pub struct Console<R, W> {
    input: R,
    output: W,
    style: OutputStyle,
}

impl<R: BufRead, W: Write> Console<R, W> {
    pub fn new(input: R, output: W, style: OutputStyle) -> Self {
        Self {
            input,
            output,
            style,
        }
    }

    pub fn style(&self) -> OutputStyle {
        self.style
    }

    pub fn output_mut(&mut self) -> &mut W {
        &mut self.output
    }

    pub fn print_lines(&mut self, lines: &[String]) -> Result<()> {
        for line in lines {
            writeln!(self.output, "{line}").context("failed writing output")?;
        }
        Ok(())
    }

    pub fn print_section(&mut self, title: &str) -> Result<()> {
        if let Some(header) = render_section_header(self.style, title) {
            writeln!(self.output).context("failed writing output")?;
            writeln!(self.output, "{header}").context("failed writing output")?;
        }
        Ok(())
    }

    /// Anything but `y`/`yes` (including end of input) declines.
    pub fn confirm(&mut self, prompt: &str) -> Result<bool> {
        write!(self.output, "{prompt} [y/N] ").context("failed writing prompt")?;
        self.output.flush().context("failed flushing prompt")?;
        let mut answer = String::new();
        self.input
            .read_line(&mut answer)
            .context("failed reading confirmation")?;
        Ok(matches!(
            answer.trim().to_ascii_lowercase().as_str(),
            "y" | "yes"
        ))
    }
}

pub fn run_apply<R: BufRead, W: Write>(
    config: &UpdraftConfig,
    console: &mut Console<R, W>,
    archive: &Path,
    yes: bool,
) -> Result<bool> {
    if !archive.is_file() {
        return Err(anyhow!("update package not found: {}", archive.display()));
    }
    let layout = config.layout();
    layout.ensure_base_dirs()?;
    let (host, version_configured) = config.host_environment();
    if !version_configured {
        warn!(
            assumed_version = %host.app_version,
            "app.version is not configured; version requirements are checked against the fallback"
        );
    }

    if !yes
        && !console.confirm(&format!(
            "Apply {} to {} (current version {})?",
            archive.display(),
            layout.root().display(),
            host.app_version
        ))?
    {
        console.print_lines(&["Update cancelled".to_string()])?;
        return Ok(true);
    }

    let history = JsonlHistoryStore::new(layout.history_path());
    let migrations = ProcessMigrationRunner::new(config.migrations.command.clone(), layout.root());
    let commands = ProcessCommandRunner::new(config.commands.prefix.clone(), layout.root());
    let progress = StageProgress::start(console.style(), "update");
    let observe = |stage: UpdateStage| progress.observe(stage);
    let services = UpdateServices {
        history: &history,
        migrations: &migrations,
        commands: &commands,
        actor: &EnvActorResolver,
        signature: config.signature_policy(),
        observer: Some(&observe),
    };

    let outcome = process_update(&layout, &host, &services, archive);
    let elapsed = progress.finish();

    let style = console.style();
    match &outcome {
        UpdateOutcome::Applied(report) => {
            console.print_lines(&format_update_report_lines(report, style, Some(elapsed)))?
        }
        UpdateOutcome::Failed(failure) => {
            console.print_lines(&format_failure_lines(failure, style))?
        }
    }
    Ok(outcome.is_success())
}

pub fn run_rollback<R: BufRead, W: Write>(
    config: &UpdraftConfig,
    console: &mut Console<R, W>,
    backup_id: Option<&str>,
    yes: bool,
) -> Result<bool> {
    let layout = config.layout();
    let history = JsonlHistoryStore::new(layout.history_path());
    let backup_id = match backup_id {
        Some(backup_id) => backup_id.to_string(),
        None => history
            .latest_backup_id()?
            .ok_or_else(|| anyhow!("no successful update with a backup to roll back to"))?,
    };
    let info = get_backup_info(&layout, &backup_id)?;
    let (host, _) = config.host_environment();

    console.print_section("rollback")?;
    console.print_lines(&format_backup_info_lines(&backup_id, &info))?;
    if !yes
        && !console.confirm(&format!(
            "Roll back from {} to {} using backup {backup_id}?",
            host.app_version, info.version
        ))?
    {
        console.print_lines(&["Rollback cancelled".to_string()])?;
        return Ok(true);
    }

    let style = console.style();
    match try_rollback_to_backup(&layout, &host, &history, &EnvActorResolver, &backup_id) {
        Ok(report) => {
            console.print_lines(&format_rollback_lines(&report, style))?;
            Ok(true)
        }
        Err(err) => {
            console.print_lines(&[render_status_line(
                style,
                "err",
                &format!("rollback failed ({}): {err}", err.code()),
            )])?;
            Ok(false)
        }
    }
}

pub fn run_backups<R: BufRead, W: Write>(
    config: &UpdraftConfig,
    console: &mut Console<R, W>,
) -> Result<bool> {
    let backups = list_backups(&config.layout())?;
    console.print_lines(&format_backup_lines(&backups))?;
    Ok(true)
}

pub fn run_backup_info<R: BufRead, W: Write>(
    config: &UpdraftConfig,
    console: &mut Console<R, W>,
    backup_id: &str,
) -> Result<bool> {
    let info = get_backup_info(&config.layout(), backup_id)?;
    console.print_lines(&format_backup_info_lines(backup_id, &info))?;
    Ok(true)
}

pub fn run_history<R: BufRead, W: Write>(
    config: &UpdraftConfig,
    console: &mut Console<R, W>,
) -> Result<bool> {
    let history = JsonlHistoryStore::new(config.layout().history_path());
    let records = history.records()?;
    let style = console.style();
    console.print_lines(&format_history_lines(&records, style))?;
    Ok(true)
}
