use std::cmp::Reverse;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::naming::{self, ArchiveName, BackupKind};

const SIZE_UNITS: [&str; 4] = ["Bytes", "KB", "MB", "GB"];

/// One archive in the backup folder, as seen at the time of the scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupRecord {
    pub filename: String,
    #[serde(rename = "type")]
    pub kind: BackupKind,
    pub timestamp: DateTime<Utc>,
    pub size_bytes: u64,
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupStatus {
    pub total_backups: usize,
    pub total_size: u64,
    pub total_size_formatted: String,
    pub last_backup_time: Option<DateTime<Utc>>,
    pub last_backup_path: Option<PathBuf>,
    pub oldest_backup_time: Option<DateTime<Utc>>,
    pub newest_backup_time: Option<DateTime<Utc>>,
    pub backups_list: Vec<BackupRecord>,
    pub backup_folder: PathBuf,
}

/// Scan `root` for archives, newest first.
///
/// Anything that does not follow the archive naming grammar is skipped. A
/// folder that cannot be read is reported as empty.
pub fn list_backups(root: &Path) -> Vec<BackupRecord> {
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(err) => {
            tracing::warn!(
                target: "carelink",
                error = %err,
                path = %root.display(),
                "backup_dir_unreadable"
            );
            return Vec::new();
        }
    };

    let mut found: Vec<(ArchiveName, BackupRecord)> = Vec::new();
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                tracing::warn!(target: "carelink", error = %err, "skip_invalid_backup_entry");
                continue;
            }
        };
        let Some(filename) = entry.file_name().to_str().map(str::to_owned) else {
            continue;
        };
        if !filename.starts_with(naming::ARCHIVE_PREFIX) {
            continue;
        }
        let meta = match entry.metadata() {
            Ok(meta) if meta.is_file() => meta,
            Ok(_) => continue,
            Err(err) => {
                tracing::warn!(
                    target: "carelink",
                    error = %err,
                    filename = %filename,
                    "skip_backup_unreadable_metadata"
                );
                continue;
            }
        };
        let written = meta.modified().ok().map(DateTime::<Utc>::from);
        let Ok(parsed) = naming::parse_archive_name_near(&filename, written) else {
            continue;
        };

        let record = BackupRecord {
            path: entry.path(),
            kind: parsed.kind,
            timestamp: parsed.timestamp,
            size_bytes: meta.len(),
            filename,
        };
        found.push((parsed, record));
    }

    found.sort_by_key(|(parsed, _)| Reverse((parsed.timestamp, parsed.sequence)));
    found.into_iter().map(|(_, record)| record).collect()
}

/// Aggregate a listing produced by [`list_backups`].
pub fn summarize(records: Vec<BackupRecord>, backup_folder: &Path) -> BackupStatus {
    let total_size: u64 = records.iter().map(|record| record.size_bytes).sum();
    let newest = records.iter().map(|record| record.timestamp).max();
    let oldest = records.iter().map(|record| record.timestamp).min();
    let latest = records.first();

    BackupStatus {
        total_backups: records.len(),
        total_size,
        total_size_formatted: format_bytes(total_size),
        last_backup_time: latest.map(|record| record.timestamp),
        last_backup_path: latest.map(|record| record.path.clone()),
        oldest_backup_time: oldest,
        newest_backup_time: newest,
        backup_folder: backup_folder.to_path_buf(),
        backups_list: records,
    }
}

/// Human readable size with 1024-based units, at most two decimals.
pub fn format_bytes(bytes: u64) -> String {
    if bytes == 0 {
        return "0 Bytes".to_string();
    }
    let mut unit = 0;
    let mut value = bytes as f64;
    while value >= 1024.0 && unit < SIZE_UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    let rounded = (value * 100.0).round() / 100.0;
    format!("{rounded} {}", SIZE_UNITS[unit])
}
