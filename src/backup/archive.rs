use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use fs2::available_space;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::{codes, AppError, AppResult};

use super::naming::{self, BackupKind, DATABASE_ENTRY, METADATA_ENTRY, PARTIAL_SUFFIX};
use super::store::{self, BackupStore};

const REQUIRED_FREE_MULTIPLIER: f64 = 1.2;
const COPY_BUFFER_BYTES: usize = 64 * 1024;
const COMPRESSION_LEVEL: i32 = 9;

/// Contents of the `metadata.json` entry written next to the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupMetadata {
    #[serde(rename = "type")]
    pub kind: BackupKind,
    pub timestamp: String,
    pub app_version: String,
    pub platform: String,
    pub database_size: u64,
    pub description: String,
    /// Digest of the `database.db` entry. Absent in archives produced by
    /// older builds, in which case restore skips the integrity check.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

impl BackupMetadata {
    pub fn new(kind: BackupKind, at: DateTime<Utc>, database_size: u64, sha256: String) -> Self {
        Self {
            kind,
            timestamp: at.to_rfc3339_opts(SecondsFormat::Millis, true),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            platform: std::env::consts::OS.to_string(),
            database_size,
            description: format!("Backup {kind} de CareLink"),
            sha256: Some(sha256),
        }
    }
}

pub fn read_metadata(path: &Path) -> AppResult<BackupMetadata> {
    let bytes = fs::read(path).map_err(|err| {
        AppError::from(err)
            .with_context("operation", "read_metadata")
            .with_context("path", path.display().to_string())
    })?;
    serde_json::from_slice(&bytes).map_err(|err| {
        AppError::from(err)
            .with_context("operation", "parse_metadata")
            .with_context("path", path.display().to_string())
    })
}

/// Snapshot the live database into a new archive named after `kind` and `at`.
///
/// The archive is assembled under a `.partial` name and only renamed into the
/// catalog once it has been fully written and flushed.
pub fn create_archive(
    store: &BackupStore,
    kind: BackupKind,
    at: DateTime<Utc>,
) -> AppResult<PathBuf> {
    if !kind.is_buildable() {
        return Err(AppError::new(
            codes::INVALID_KIND,
            "Import backups can only be created by importing a file.",
        ));
    }

    let db_size = store.require_database()?;
    store.ensure_root()?;

    let required = required_free_bytes(db_size);
    let available = available_space(store.root()).map_err(|err| {
        AppError::from(err)
            .with_context("operation", "available_space")
            .with_context("path", store.root().display().to_string())
    })?;
    if available < required {
        return Err(AppError::new(
            codes::LOW_DISK,
            "Not enough disk space to create a backup.",
        )
        .with_context("available_bytes", available.to_string())
        .with_context("required_bytes", required.to_string()));
    }

    let filename = naming::archive_name(kind, at);
    let final_path = store.root().join(&filename);
    if final_path.exists() {
        return Err(AppError::new(
            codes::ALREADY_EXISTS,
            "A backup of this type was already created this second.",
        )
        .with_context("filename", filename));
    }

    let partial = store.root().join(format!("{filename}{PARTIAL_SUFFIX}"));
    let result = (|| -> AppResult<()> {
        write_archive(store.db_path(), &partial, kind, at)?;
        store::sync_file(&partial).map_err(|err| {
            AppError::from(err)
                .with_context("operation", "sync_archive")
                .with_context("path", partial.display().to_string())
        })?;
        fs::rename(&partial, &final_path).map_err(|err| {
            AppError::from(err)
                .with_context("operation", "finalize_archive")
                .with_context("from", partial.display().to_string())
                .with_context("to", final_path.display().to_string())
        })?;
        store::sync_dir(store.root()).ok();
        Ok(())
    })();

    if let Err(err) = result {
        let _ = fs::remove_file(&partial);
        return Err(err);
    }

    Ok(final_path)
}

fn write_archive(
    db_path: &Path,
    dest: &Path,
    kind: BackupKind,
    at: DateTime<Utc>,
) -> AppResult<BackupMetadata> {
    let mut source = File::open(db_path).map_err(|err| {
        AppError::from(err)
            .with_context("operation", "open_database")
            .with_context("path", db_path.display().to_string())
    })?;
    let source_len = source.metadata().map(|meta| meta.len()).unwrap_or(0);
    let out = File::create(dest).map_err(|err| {
        AppError::from(err)
            .with_context("operation", "create_archive")
            .with_context("path", dest.display().to_string())
    })?;

    let mut writer = ZipWriter::new(out);
    let options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(COMPRESSION_LEVEL))
        .large_file(source_len >= u64::from(u32::MAX));

    writer
        .start_file(DATABASE_ENTRY, options)
        .map_err(|err| AppError::from(err).with_context("operation", "archive_database_entry"))?;

    let mut hasher = Sha256::new();
    let mut buf = vec![0_u8; COPY_BUFFER_BYTES];
    let mut copied = 0_u64;
    loop {
        let read = source.read(&mut buf).map_err(|err| {
            AppError::from(err)
                .with_context("operation", "read_database")
                .with_context("path", db_path.display().to_string())
        })?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
        writer
            .write_all(&buf[..read])
            .map_err(|err| AppError::from(err).with_context("operation", "archive_database_copy"))?;
        copied += read as u64;
    }

    let metadata = BackupMetadata::new(kind, at, copied, format!("{:x}", hasher.finalize()));
    let payload = serde_json::to_vec_pretty(&metadata)
        .map_err(|err| AppError::from(err).with_context("operation", "serialize_metadata"))?;
    writer
        .start_file(METADATA_ENTRY, FileOptions::default())
        .map_err(|err| AppError::from(err).with_context("operation", "archive_metadata_entry"))?;
    writer
        .write_all(&payload)
        .map_err(|err| AppError::from(err).with_context("operation", "archive_metadata_write"))?;

    let mut out = writer
        .finish()
        .map_err(|err| AppError::from(err).with_context("operation", "archive_finish"))?;
    out.flush()
        .map_err(|err| AppError::from(err).with_context("operation", "archive_flush"))?;

    Ok(metadata)
}

pub fn file_sha256(path: &Path) -> AppResult<String> {
    let mut file = File::open(path).map_err(|err| {
        AppError::from(err)
            .with_context("operation", "open_for_hash")
            .with_context("path", path.display().to_string())
    })?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0_u8; COPY_BUFFER_BYTES];
    loop {
        let read = file
            .read(&mut buf)
            .map_err(|err| AppError::from(err).with_context("operation", "hash_read"))?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

fn required_free_bytes(db_size: u64) -> u64 {
    ((db_size as f64) * REQUIRED_FREE_MULTIPLIER).ceil() as u64
}
