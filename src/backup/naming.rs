//! File naming rules for everything the engine writes into the backup folder.
//!
//! The archive name is the only place a backup's type and creation time are
//! recorded, so the catalog is rebuilt from these names alone.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Local, LocalResult, NaiveDate, NaiveDateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const ARCHIVE_PREFIX: &str = "carelink_backup_";
pub const ARCHIVE_EXTENSION: &str = "zip";
pub const SAFETY_BACKUP_PREFIX: &str = "carelink_security_backup_";
pub const SAFETY_BACKUP_EXTENSION: &str = "db";
pub const RESTORE_TEMP_PREFIX: &str = "temp_restore_";
pub const PARTIAL_SUFFIX: &str = ".partial";

/// Entry names inside an archive.
pub const DATABASE_ENTRY: &str = "database.db";
pub const METADATA_ENTRY: &str = "metadata.json";

static TYPED_ARCHIVE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^carelink_backup_(manual|auto|close)_(\d{4})-(\d{2})-(\d{2})_(\d{2})-(\d{2})-(\d{2})\.zip$",
    )
    .expect("typed archive pattern compiles")
});

static IMPORT_ARCHIVE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^carelink_backup_(import)_(\d{4})-(\d{2})-(\d{2})T(\d{2})-(\d{2})-(\d{2})(?:-(\d{1,3}))?\.zip$",
    )
    .expect("import archive pattern compiles")
});

static SAFETY_BACKUP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^carelink_security_backup_(\d+)\.db$").expect("safety backup pattern compiles")
});

/// Why a backup was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupKind {
    Manual,
    Auto,
    Close,
    Import,
}

impl BackupKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupKind::Manual => "manual",
            BackupKind::Auto => "auto",
            BackupKind::Close => "close",
            BackupKind::Import => "import",
        }
    }

    /// Import archives are copied in from elsewhere, never built locally.
    pub fn is_buildable(&self) -> bool {
        !matches!(self, BackupKind::Import)
    }
}

impl fmt::Display for BackupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackupKind {
    type Err = FilenameError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "manual" => Ok(BackupKind::Manual),
            "auto" => Ok(BackupKind::Auto),
            "close" => Ok(BackupKind::Close),
            "import" => Ok(BackupKind::Import),
            other => Err(FilenameError::UnknownKind(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilenameError {
    #[error("not a CareLink backup archive name")]
    Unrecognized,
    #[error("unknown backup type `{0}`")]
    UnknownKind(String),
    #[error("archive name encodes an impossible date or time")]
    InvalidTimestamp,
}

/// What an archive name decodes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveName {
    pub kind: BackupKind,
    pub timestamp: DateTime<Utc>,
    /// Disambiguates imports taken within the same second; `0` otherwise.
    pub sequence: u32,
}

/// Name of an archive created at `at`.
///
/// Manual, auto and close archives carry the local wall-clock time; import
/// archives carry UTC with a `T` separator.
pub fn archive_name(kind: BackupKind, at: DateTime<Utc>) -> String {
    match kind {
        BackupKind::Import => import_archive_name(at, 0),
        _ => format!(
            "{ARCHIVE_PREFIX}{}_{}.{ARCHIVE_EXTENSION}",
            kind.as_str(),
            at.with_timezone(&Local).format("%Y-%m-%d_%H-%M-%S")
        ),
    }
}

pub fn import_archive_name(at: DateTime<Utc>, sequence: u32) -> String {
    let stamp = at.format("%Y-%m-%dT%H-%M-%S");
    if sequence == 0 {
        format!("{ARCHIVE_PREFIX}import_{stamp}.{ARCHIVE_EXTENSION}")
    } else {
        format!("{ARCHIVE_PREFIX}import_{stamp}-{sequence}.{ARCHIVE_EXTENSION}")
    }
}

pub fn parse_archive_name(name: &str) -> Result<ArchiveName, FilenameError> {
    parse_archive_name_near(name, None)
}

/// Like [`parse_archive_name`], with a hint for when the archive was written
/// (usually the file's modification time). Typed names stamped during a
/// repeated wall-clock hour resolve to the reading closest to the hint.
pub fn parse_archive_name_near(
    name: &str,
    hint: Option<DateTime<Utc>>,
) -> Result<ArchiveName, FilenameError> {
    if let Some(caps) = TYPED_ARCHIVE.captures(name) {
        let kind = caps[1].parse::<BackupKind>()?;
        let naive = naive_from_captures(&caps)?;
        return Ok(ArchiveName {
            kind,
            timestamp: resolve_wall_clock(&Local, &naive, hint),
            sequence: 0,
        });
    }

    if let Some(caps) = IMPORT_ARCHIVE.captures(name) {
        let naive = naive_from_captures(&caps)?;
        let sequence = caps
            .get(8)
            .map(|m| m.as_str().parse::<u32>())
            .transpose()
            .map_err(|_| FilenameError::Unrecognized)?
            .unwrap_or(0);
        return Ok(ArchiveName {
            kind: BackupKind::Import,
            timestamp: Utc.from_utc_datetime(&naive),
            sequence,
        });
    }

    Err(FilenameError::Unrecognized)
}

/// Map a wall-clock stamp in `tz` to an instant.
///
/// Ambiguous stamps take the earlier reading unless `hint` is closer to the
/// later one. Stamps skipped by a DST jump are read as UTC.
pub fn resolve_wall_clock<Tz: TimeZone>(
    tz: &Tz,
    naive: &NaiveDateTime,
    hint: Option<DateTime<Utc>>,
) -> DateTime<Utc> {
    match tz.from_local_datetime(naive) {
        LocalResult::Single(at) => at.with_timezone(&Utc),
        LocalResult::Ambiguous(earlier, later) => {
            let earlier = earlier.with_timezone(&Utc);
            let later = later.with_timezone(&Utc);
            let distance =
                |at: DateTime<Utc>, hint: DateTime<Utc>| (at - hint).num_seconds().abs();
            match hint {
                Some(hint) if distance(later, hint) < distance(earlier, hint) => later,
                _ => earlier,
            }
        }
        LocalResult::None => Utc.from_utc_datetime(naive),
    }
}

fn naive_from_captures(caps: &Captures<'_>) -> Result<NaiveDateTime, FilenameError> {
    let field = |index: usize| -> Result<u32, FilenameError> {
        caps[index]
            .parse::<u32>()
            .map_err(|_| FilenameError::InvalidTimestamp)
    };
    let year = caps[2]
        .parse::<i32>()
        .map_err(|_| FilenameError::InvalidTimestamp)?;
    let (month, day) = (field(3)?, field(4)?);
    let (hour, minute, second) = (field(5)?, field(6)?, field(7)?);
    NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|date| date.and_hms_opt(hour, minute, second))
        .ok_or(FilenameError::InvalidTimestamp)
}

pub fn safety_backup_name(at: DateTime<Utc>) -> String {
    format!(
        "{SAFETY_BACKUP_PREFIX}{}.{SAFETY_BACKUP_EXTENSION}",
        at.timestamp_millis()
    )
}

/// Unix milliseconds encoded in a safety backup name.
pub fn parse_safety_backup_name(name: &str) -> Option<i64> {
    SAFETY_BACKUP
        .captures(name)
        .and_then(|caps| caps[1].parse::<i64>().ok())
}

pub fn is_restore_temp_dir(name: &str) -> bool {
    name.starts_with(RESTORE_TEMP_PREFIX)
}
