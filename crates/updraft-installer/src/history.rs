use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::fs_utils::append_json_line;

/// Durable record of one update or rollback attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateHistoryRecord {
    /// Assigned by the store; any value passed to [`HistoryStore::record`] is replaced.
    #[serde(default)]
    pub id: u64,
    pub version: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub applied_by: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
    pub applied_at: DateTime<Utc>,
    pub successful: bool,
    #[serde(default)]
    pub backup_id: Option<String>,
}

impl UpdateHistoryRecord {
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }
}

pub trait HistoryStore {
    /// Persists the record and returns it with its assigned id.
    fn record(&self, record: UpdateHistoryRecord) -> Result<UpdateHistoryRecord>;

    /// Every record in insertion order.
    fn records(&self) -> Result<Vec<UpdateHistoryRecord>>;

    fn has_successful_version(&self, version: &str) -> Result<bool> {
        Ok(self
            .records()?
            .iter()
            .any(|record| record.successful && record.version == version))
    }

    fn latest_successful(&self) -> Result<Option<UpdateHistoryRecord>> {
        Ok(self
            .records()?
            .into_iter()
            .filter(|record| record.successful)
            .max_by(|left, right| {
                left.applied_at
                    .cmp(&right.applied_at)
                    .then(left.id.cmp(&right.id))
            }))
    }

    /// Backup id of the most recent successful record that has one.
    fn latest_backup_id(&self) -> Result<Option<String>> {
        let mut records = self.records()?;
        records.retain(|record| record.successful && record.backup_id.is_some());
        records.sort_by(|left, right| {
            left.applied_at
                .cmp(&right.applied_at)
                .then(left.id.cmp(&right.id))
        });
        Ok(records.pop().and_then(|record| record.backup_id))
    }
}

/// Append-only JSON lines history file.
#[derive(Debug, Clone)]
pub struct JsonlHistoryStore {
    path: PathBuf,
}

impl JsonlHistoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl HistoryStore for JsonlHistoryStore {
    fn record(&self, mut record: UpdateHistoryRecord) -> Result<UpdateHistoryRecord> {
        record.id = self
            .records()?
            .iter()
            .map(|existing| existing.id)
            .max()
            .unwrap_or(0)
            + 1;
        let line = serde_json::to_string(&record).context("failed to serialize history record")?;
        append_json_line(&self.path, &line)?;
        Ok(record)
    }

    fn records(&self) -> Result<Vec<UpdateHistoryRecord>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to read {}", self.path.display()));
            }
        };

        raw.lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(index, line)| {
                serde_json::from_str(line).with_context(|| {
                    format!(
                        "invalid history record at {}:{}",
                        self.path.display(),
                        index + 1
                    )
                })
            })
            .collect()
    }
}
