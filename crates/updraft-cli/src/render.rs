use std::io::IsTerminal;
use std::time::{Duration, Instant};

use anstyle::{AnsiColor, Effects, Style};
use indicatif::{ProgressBar, ProgressStyle};
use updraft_installer::{
    BackupEntry, BackupInfo, RestoreStatus, RollbackReport, UpdateFailure, UpdateHistoryRecord,
    UpdateReport, UpdateStage,
};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum OutputStyle {
    Plain,
    Rich,
}

pub fn current_output_style() -> OutputStyle {
    output_style_for(
        std::io::stdout().is_terminal(),
        std::env::var_os("NO_COLOR").is_some(),
    )
}

pub fn output_style_for(is_terminal: bool, no_color: bool) -> OutputStyle {
    if is_terminal && !no_color {
        OutputStyle::Rich
    } else {
        OutputStyle::Plain
    }
}

/// Rich output prefixes an ASCII badge; plain output is the bare message.
pub fn render_status_line(style: OutputStyle, status: &str, message: &str) -> String {
    match style {
        OutputStyle::Plain => message.to_string(),
        OutputStyle::Rich => {
            let badge = match status {
                "ok" => "[OK]",
                "warn" => "[WARN]",
                "err" => "[ERR]",
                _ => "[..]",
            };
            format!("{badge} {message}")
        }
    }
}

pub fn render_section_header(style: OutputStyle, title: &str) -> Option<String> {
    match style {
        OutputStyle::Plain => None,
        OutputStyle::Rich => Some(colorize(section_style(), &format!("== {title} =="))),
    }
}

/// Spinner that follows the update state machine.
pub struct StageProgress {
    progress_bar: Option<ProgressBar>,
    started_at: Instant,
}

impl StageProgress {
    pub fn start(style: OutputStyle, label: &str) -> Self {
        let progress_bar = if style == OutputStyle::Rich {
            let progress_bar = ProgressBar::new_spinner();
            if let Ok(spinner) = ProgressStyle::with_template("{spinner:.cyan.bold} {prefix} {msg}")
            {
                progress_bar.set_style(spinner.tick_chars("<^>v "));
            }
            progress_bar.set_prefix(label.to_string());
            progress_bar.enable_steady_tick(Duration::from_millis(80));
            Some(progress_bar)
        } else {
            None
        };

        Self {
            progress_bar,
            started_at: Instant::now(),
        }
    }

    pub fn observe(&self, stage: UpdateStage) {
        if let Some(progress_bar) = &self.progress_bar {
            progress_bar.set_message(stage_label(stage));
        }
    }

    pub fn finish(mut self) -> Duration {
        if let Some(progress_bar) = self.progress_bar.take() {
            progress_bar.finish_and_clear();
        }
        self.started_at.elapsed()
    }
}

pub fn stage_label(stage: UpdateStage) -> &'static str {
    match stage {
        UpdateStage::Extracting => "extracting package",
        UpdateStage::Validating => "validating package",
        UpdateStage::CheckingVersion => "checking version requirements",
        UpdateStage::CheckingDuplicate => "checking update history",
        UpdateStage::BackingUp => "backing up files",
        UpdateStage::ApplyingFiles => "applying file changes",
        UpdateStage::RunningMigrations => "running migrations",
        UpdateStage::ApplyingConfig => "applying config files",
        UpdateStage::RunningCommands => "running post-update commands",
        UpdateStage::RestoringBackup => "restoring backup",
        UpdateStage::Succeeded => "done",
        UpdateStage::Failed => "failed",
    }
}

pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    let millis = elapsed.subsec_millis();
    format!("{secs}.{millis:03}s")
}

pub fn format_update_report_lines(
    report: &UpdateReport,
    style: OutputStyle,
    elapsed: Option<Duration>,
) -> Vec<String> {
    let suffix = elapsed
        .map(|value| format!(" in {}", format_elapsed(value)))
        .unwrap_or_default();
    let mut lines = vec![
        render_status_line(
            style,
            "ok",
            &format!("applied {} ({}){suffix}", report.version, report.name),
        ),
        format!(
            "files: added={} modified={} deleted={} vendor={}",
            report.files.added, report.files.modified, report.files.deleted, report.files.vendor
        ),
        format!(
            "migrations={} config_files={}",
            report.migrations, report.config_files
        ),
        format!("backup: {}", report.backup_id),
    ];
    if let Some(vendor_backup) = &report.files.vendor_backup {
        lines.push(render_status_line(
            style,
            "warn",
            &format!("vendor files modified; originals in {}", vendor_backup.display()),
        ));
    }
    for path in &report.files.already_absent {
        lines.push(render_status_line(
            style,
            "warn",
            &format!("not deleted (absent): {}", path.display()),
        ));
    }
    for command in &report.failed_commands {
        lines.push(render_status_line(
            style,
            "warn",
            &format!("post-update command failed: {command}"),
        ));
    }
    if report.history_id.is_none() {
        lines.push(render_status_line(
            style,
            "warn",
            "update applied but could not be written to history",
        ));
    }
    lines
}

pub fn format_failure_lines(failure: &UpdateFailure, style: OutputStyle) -> Vec<String> {
    let mut lines = vec![render_status_line(
        style,
        "err",
        &format!(
            "update failed during {}: {}",
            failure.stage.as_str(),
            failure.composed_message()
        ),
    )];
    lines.push(format!("code: {}", failure.code));
    match (&failure.backup_id, &failure.restore) {
        (Some(backup_id), RestoreStatus::Restored { files }) => lines.push(render_status_line(
            style,
            "warn",
            &format!("restored {files} file(s) from backup {backup_id}"),
        )),
        (Some(backup_id), RestoreStatus::Failed(_)) => lines.push(render_status_line(
            style,
            "err",
            &format!("manual restore required from backup {backup_id}"),
        )),
        _ => {}
    }
    lines
}

pub fn format_rollback_lines(report: &RollbackReport, style: OutputStyle) -> Vec<String> {
    vec![
        render_status_line(
            style,
            "ok",
            &format!(
                "rolled back to {} from {} (backup {})",
                report.target_version, report.previous_version, report.backup_id
            ),
        ),
        format!("restored files: {}", report.restored_files),
        format!("safety backup: {}", report.safety_backup_id),
    ]
}

pub fn format_backup_lines(backups: &[BackupEntry]) -> Vec<String> {
    if backups.is_empty() {
        return vec!["No backups found".to_string()];
    }
    backups
        .iter()
        .map(|entry| format!("{} {}", entry.id, describe_backup(&entry.info)))
        .collect()
}

pub fn format_backup_info_lines(backup_id: &str, info: &BackupInfo) -> Vec<String> {
    let mut lines = vec![
        format!("id: {backup_id}"),
        format!("timestamp: {}", info.timestamp),
        format!("version: {}", info.version),
    ];
    if let Some(updated_to) = &info.updated_to {
        lines.push(format!("updated_to: {updated_to}"));
    }
    if let Some(rollback_to) = &info.rollback_to {
        lines.push(format!("rollback_to: {rollback_to}"));
    }
    if let Some(kind) = info.kind {
        lines.push(format!("type: {}", kind.as_str()));
    }
    lines
}

pub fn format_history_lines(records: &[UpdateHistoryRecord], style: OutputStyle) -> Vec<String> {
    if records.is_empty() {
        return vec!["No updates recorded".to_string()];
    }
    records
        .iter()
        .map(|record| {
            let status = if record.successful { "ok" } else { "err" };
            let actor = record.applied_by.as_deref().unwrap_or("unknown");
            render_status_line(
                style,
                status,
                &format!(
                    "#{} {} {} {} by {}",
                    record.id,
                    record.applied_at.format("%Y-%m-%d %H:%M:%S"),
                    record.version,
                    record.name,
                    actor
                ),
            )
        })
        .collect()
}

fn describe_backup(info: &BackupInfo) -> String {
    match (&info.updated_to, &info.rollback_to) {
        (Some(updated_to), _) => format!("{} -> {updated_to}", info.version),
        (None, Some(rollback_to)) => format!("{} (before rollback to {rollback_to})", info.version),
        (None, None) => info.version.clone(),
    }
}

fn section_style() -> Style {
    Style::new()
        .fg_color(Some(AnsiColor::BrightBlue.into()))
        .effects(Effects::BOLD)
}

fn colorize(style: Style, text: &str) -> String {
    format!("{}{}{}", style.render(), text, style.render_reset())
}
