use std::fs;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use clap::error::ErrorKind;
use updraft_installer::{
    BackupInfo, BackupKind, RestoreStatus, SignaturePolicy, UpdateFailure, UpdateStage,
};
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use super::*;
use crate::logging::LogFormat;
use crate::render::{
    format_backup_info_lines, format_failure_lines, output_style_for, render_status_line,
    OutputStyle,
};

static TEST_DIR_COUNTER: AtomicU64 = AtomicU64::new(0);

fn test_dir(label: &str) -> PathBuf {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system time")
        .as_nanos();
    let mut path = std::env::temp_dir();
    path.push(format!(
        "updraft-cli-tests-{label}-{}-{}-{}",
        std::process::id(),
        nanos,
        TEST_DIR_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));
    fs::create_dir_all(&path).expect("must create test dir");
    path
}

fn write_zip(path: &Path, entries: &[(&str, &str)]) {
    let file = fs::File::create(path).expect("must create zip");
    let mut zip = ZipWriter::new(file);
    for (name, contents) in entries {
        zip.start_file(*name, SimpleFileOptions::default())
            .expect("must start entry");
        zip.write_all(contents.as_bytes()).expect("must write entry");
    }
    zip.finish().expect("must finish zip");
}

fn plain_console(input: &str) -> Console<Cursor<Vec<u8>>, Vec<u8>> {
    Console::new(
        Cursor::new(input.as_bytes().to_vec()),
        Vec::new(),
        OutputStyle::Plain,
    )
}

fn console_output(console: &mut Console<Cursor<Vec<u8>>, Vec<u8>>) -> String {
    String::from_utf8(console.output_mut().clone()).expect("output must be utf-8")
}

fn config_for(root: &Path, version: &str) -> UpdraftConfig {
    let mut config = UpdraftConfig::default();
    config.app.root = root.to_path_buf();
    config.app.version = Some(version.to_string());
    config
}

#[test]
fn cli_parses_apply_with_yes_flag() {
    let cli = Cli::try_parse_from(["updraft", "apply", "update.zip", "--yes"])
        .expect("apply must parse");
    match cli.command {
        Commands::Apply { archive, yes } => {
            assert_eq!(archive, PathBuf::from("update.zip"));
            assert!(yes);
        }
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
fn cli_parses_rollback_without_backup_id() {
    let cli = Cli::try_parse_from(["updraft", "--config", "custom.toml", "rollback"])
        .expect("rollback must parse");
    assert_eq!(cli.config, Some(PathBuf::from("custom.toml")));
    match cli.command {
        Commands::Rollback { backup_id, yes } => {
            assert!(backup_id.is_none());
            assert!(!yes);
        }
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
fn cli_rejects_unknown_completion_shell() {
    let err = Cli::try_parse_from(["updraft", "completions", "tcsh"])
        .expect_err("unknown shell must be rejected");
    assert_eq!(err.kind(), ErrorKind::InvalidValue);
}

#[test]
fn completions_script_mentions_binary_name() {
    let mut output = Vec::new();
    write_completions_script(CliCompletionShell::Bash, &mut output)
        .expect("must generate completions");
    let script = String::from_utf8(output).expect("script must be utf-8");
    assert!(script.contains("updraft"));
    assert!(script.contains("rollback"));
}

#[test]
fn config_defaults_when_sections_are_missing() {
    let config = UpdraftConfig::from_toml_str("").expect("empty config must parse");

    assert_eq!(config.app.root, PathBuf::from("."));
    assert!(config.app.version.is_none());
    assert_eq!(config.logging.format, LogFormat::Pretty);
    assert!(!config.verification.verify_updates);
    let layout = config.layout();
    assert_eq!(
        layout.backups_dir(),
        Path::new(".").join("storage").join("updraft").join("backups")
    );
    let (host, configured) = config.host_environment();
    assert_eq!(host.app_version, "0.0.0");
    assert!(!configured);
}

#[test]
fn config_parses_every_section() {
    let raw = r#"
[app]
root = "/srv/app"
version = "1.5.0"
runtime_version = "8.2.0"

[paths]
storage = "var/updraft"
backups = "/mnt/backups"

[migrations]
command = ["php", "artisan", "migrate", "--force"]

[commands]
prefix = ["php", "artisan"]

[verification]
verify_updates = true
public_key = "abcd"

[logging]
format = "json"
"#;
    let config = UpdraftConfig::from_toml_str(raw).expect("config must parse");

    assert_eq!(config.migrations.command.len(), 4);
    assert_eq!(config.commands.prefix, vec!["php", "artisan"]);
    assert_eq!(config.logging.format, LogFormat::Json);
    let layout = config.layout();
    assert_eq!(layout.storage_dir(), Path::new("/srv/app/var/updraft"));
    assert_eq!(layout.updates_dir(), Path::new("/srv/app/var/updraft/updates"));
    assert_eq!(layout.backups_dir(), Path::new("/mnt/backups"));
    assert_eq!(layout.config_dir(), Path::new("/srv/app/config"));
    let (host, configured) = config.host_environment();
    assert!(configured);
    assert_eq!(host.runtime_version.as_deref(), Some("8.2.0"));
    assert_eq!(
        config.signature_policy(),
        SignaturePolicy::Required {
            public_key_hex: "abcd".to_string()
        }
    );
}

#[test]
fn config_rejects_unknown_keys() {
    let err = UpdraftConfig::from_toml_str("[app]\nversoin = \"1.0.0\"\n")
        .expect_err("typo must be rejected");
    assert!(format!("{err:#}").contains("versoin"));
}

#[test]
fn env_override_replaces_app_version() {
    let mut config = UpdraftConfig::from_toml_str("[app]\nversion = \"1.0.0\"\n")
        .expect("config must parse");
    config.apply_env_overrides(|key| (key == "UPDRAFT_APP_VERSION").then(|| " 2.1.0 ".to_string()));
    assert_eq!(config.app.version.as_deref(), Some("2.1.0"));

    config.apply_env_overrides(|_| Some("   ".to_string()));
    assert_eq!(config.app.version.as_deref(), Some("2.1.0"));
}

#[test]
fn explicit_missing_config_file_is_an_error() {
    let dir = test_dir("missing-config");
    let missing = dir.join("absent.toml");
    let err = UpdraftConfig::load(Some(missing.as_path()))
        .expect_err("explicit config must exist");
    assert!(format!("{err:#}").contains("absent.toml"));
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn render_status_line_plain_is_unadorned() {
    assert_eq!(
        render_status_line(OutputStyle::Plain, "ok", "applied 2.0.0"),
        "applied 2.0.0"
    );
}

#[test]
fn render_status_line_rich_includes_ascii_badge() {
    assert_eq!(
        render_status_line(OutputStyle::Rich, "ok", "applied 2.0.0"),
        "[OK] applied 2.0.0"
    );
    assert_eq!(
        render_status_line(OutputStyle::Rich, "err", "update failed"),
        "[ERR] update failed"
    );
}

#[test]
fn output_style_is_plain_off_terminal_or_with_no_color() {
    assert_eq!(output_style_for(true, false), OutputStyle::Rich);
    assert_eq!(output_style_for(false, false), OutputStyle::Plain);
    assert_eq!(output_style_for(true, true), OutputStyle::Plain);
}

#[test]
fn failure_lines_include_restore_outcome() {
    let failure = UpdateFailure {
        message: "failed to run migrations: boom".to_string(),
        code: "migration_error",
        stage: UpdateStage::RunningMigrations,
        version: Some("2.0.0".to_string()),
        backup_id: Some("20240101000000_abcdef012345".to_string()),
        restore: RestoreStatus::Failed("disk full".to_string()),
    };

    let lines = format_failure_lines(&failure, OutputStyle::Plain);
    assert_eq!(
        lines[0],
        "update failed during running_migrations: failed to run migrations: boom; backup restore also failed: disk full"
    );
    assert_eq!(lines[1], "code: migration_error");
    assert_eq!(
        lines[2],
        "manual restore required from backup 20240101000000_abcdef012345"
    );
}

#[test]
fn backup_info_lines_show_safety_marker() {
    let info = BackupInfo {
        timestamp: 1_700_000_000,
        version: "2.0.0".to_string(),
        updated_to: None,
        rollback_to: Some("1.5.0".to_string()),
        kind: Some(BackupKind::SafetyBeforeRollback),
    };
    let lines = format_backup_info_lines("20240101000000_abcdef012345", &info);
    assert!(lines.contains(&"rollback_to: 1.5.0".to_string()));
    assert!(lines.contains(&"type: safety_backup_before_rollback".to_string()));
}

#[test]
fn confirm_accepts_only_yes() {
    assert!(plain_console("y\n").confirm("Apply?").expect("must read"));
    assert!(plain_console("YES\n").confirm("Apply?").expect("must read"));
    assert!(!plain_console("n\n").confirm("Apply?").expect("must read"));
    assert!(!plain_console("").confirm("Apply?").expect("must read"));
}

#[test]
fn apply_history_and_rollback_flow_end_to_end() {
    let dir = test_dir("flow");
    let root = dir.join("app");
    fs::create_dir_all(&root).expect("must create root");
    fs::write(root.join("a.txt"), "a v1").expect("must seed host");
    let archive = dir.join("update-2.0.0.zip");
    write_zip(
        &archive,
        &[
            (
                "update-manifest.json",
                r#"{"version": "2.0.0", "name": "Spring release"}"#,
            ),
            ("manifests/file-manifest.json", r#"{"modified": ["a.txt"]}"#),
            ("files/a.txt", "a v2"),
        ],
    );
    let config = config_for(&root, "1.5.0");

    let mut console = plain_console("");
    let applied = run_apply(&config, &mut console, &archive, true).expect("apply must run");
    assert!(applied);
    assert!(console_output(&mut console).starts_with("applied 2.0.0 (Spring release)"));
    assert_eq!(
        fs::read_to_string(root.join("a.txt")).expect("must read host file"),
        "a v2"
    );

    let mut console = plain_console("");
    let applied = run_apply(&config, &mut console, &archive, true).expect("apply must run");
    assert!(!applied);
    assert!(console_output(&mut console).contains("Version 2.0.0 has already been applied"));

    let mut console = plain_console("");
    assert!(run_backups(&config, &mut console).expect("backups must run"));
    assert!(console_output(&mut console).contains("1.5.0 -> 2.0.0"));

    let config = config_for(&root, "2.0.0");
    let mut console = plain_console("no\n");
    assert!(run_rollback(&config, &mut console, None, false).expect("rollback must run"));
    assert!(console_output(&mut console).contains("Rollback cancelled"));
    assert_eq!(
        fs::read_to_string(root.join("a.txt")).expect("must read host file"),
        "a v2"
    );

    let mut console = plain_console("y\n");
    assert!(run_rollback(&config, &mut console, None, false).expect("rollback must run"));
    assert!(console_output(&mut console).contains("rolled back to 1.5.0 from 2.0.0"));
    assert_eq!(
        fs::read_to_string(root.join("a.txt")).expect("must read host file"),
        "a v1"
    );

    let mut console = plain_console("");
    assert!(run_history(&config, &mut console).expect("history must run"));
    let history = console_output(&mut console);
    assert_eq!(history.lines().count(), 3);
    assert!(history.contains("Rollback to backup: "));

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn apply_declined_leaves_host_untouched() {
    let dir = test_dir("declined");
    let root = dir.join("app");
    fs::create_dir_all(&root).expect("must create root");
    let archive = dir.join("update.zip");
    write_zip(
        &archive,
        &[
            ("update-manifest.json", r#"{"version": "1.1.0"}"#),
            ("manifests/file-manifest.json", r#"{"added": ["new.txt"]}"#),
            ("files/new.txt", "new"),
        ],
    );

    let mut console = plain_console("n\n");
    let applied = run_apply(&config_for(&root, "1.0.0"), &mut console, &archive, false)
        .expect("apply must run");

    assert!(applied);
    assert!(console_output(&mut console).contains("Update cancelled"));
    assert!(!root.join("new.txt").exists());

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn apply_missing_archive_is_an_error() {
    let dir = test_dir("missing-archive");
    let mut console = plain_console("");
    let err = run_apply(
        &config_for(&dir, "1.0.0"),
        &mut console,
        &dir.join("absent.zip"),
        true,
    )
    .expect_err("missing archive must error");
    assert!(err.to_string().contains("update package not found"));
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn backup_info_for_unknown_id_is_an_error() {
    let dir = test_dir("backup-info");
    let mut console = plain_console("");
    let err = run_backup_info(&config_for(&dir, "1.0.0"), &mut console, "nope")
        .expect_err("unknown backup must error");
    assert!(err.to_string().contains("backup not found: nope"));
    let _ = fs::remove_dir_all(&dir);
}
