use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::config::BackupConfig;
use crate::error::{codes, AppError, AppResult};

use super::naming;

const SWAP_SUFFIX: &str = ".carelink-swap";
const MAX_SAFETY_NAME_ATTEMPTS: u32 = 1000;

/// The backup folder plus the live database it protects.
///
/// Clones share one lock: every mutation of the folder or of the live
/// database holds the write half, catalog reads hold the read half.
#[derive(Debug, Clone)]
pub struct BackupStore {
    root: PathBuf,
    db_path: PathBuf,
    lock: Arc<RwLock<()>>,
}

impl BackupStore {
    pub fn new(db_path: impl Into<PathBuf>, root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            db_path: db_path.into(),
            lock: Arc::new(RwLock::new(())),
        }
    }

    pub fn from_config(config: &BackupConfig) -> Self {
        Self::new(config.db_path.clone(), config.backup_dir())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub async fn read(&self) -> RwLockReadGuard<'_, ()> {
        self.lock.read().await
    }

    pub async fn write(&self) -> RwLockWriteGuard<'_, ()> {
        self.lock.write().await
    }

    pub fn ensure_root(&self) -> AppResult<()> {
        fs::create_dir_all(&self.root).map_err(|err| {
            AppError::from(err)
                .with_context("operation", "create_backups_dir")
                .with_context("path", self.root.display().to_string())
        })
    }

    /// Size of the live database, or `NotFound` when it is missing.
    pub fn require_database(&self) -> AppResult<u64> {
        match fs::metadata(&self.db_path) {
            Ok(meta) if meta.is_file() => Ok(meta.len()),
            Ok(_) => Err(AppError::not_found("The database path is not a file.")
                .with_context("path", self.db_path.display().to_string())),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                Err(AppError::not_found("The database does not exist.")
                    .with_context("path", self.db_path.display().to_string()))
            }
            Err(err) => Err(AppError::from(err)
                .with_context("operation", "db_metadata")
                .with_context("path", self.db_path.display().to_string())),
        }
    }

    /// Location of `filename` inside the store. Only bare file names are
    /// accepted so callers cannot reach outside the backup folder.
    pub fn entry_path(&self, filename: &str) -> AppResult<PathBuf> {
        let candidate = Path::new(filename);
        let is_plain = !filename.is_empty()
            && filename != "."
            && filename != ".."
            && candidate.file_name().map(|name| name == candidate.as_os_str()) == Some(true)
            && !filename.contains(['/', '\\']);
        if !is_plain {
            return Err(
                AppError::new(codes::INVALID_NAME, "Backup names cannot contain a path.")
                    .with_context("filename", filename),
            );
        }
        Ok(self.root.join(filename))
    }

    /// Like [`BackupStore::entry_path`] but the archive must already exist.
    pub fn existing_archive(&self, filename: &str) -> AppResult<PathBuf> {
        let path = self.entry_path(filename)?;
        if !path.is_file() {
            return Err(AppError::not_found("The backup does not exist.")
                .with_context("filename", filename));
        }
        Ok(path)
    }

    /// First free safety copy name at or after `at`, stepping a millisecond
    /// at a time so an earlier copy is never overwritten.
    pub fn safety_backup_path(&self, at: DateTime<Utc>) -> AppResult<PathBuf> {
        let mut candidate_at = at;
        for _ in 0..MAX_SAFETY_NAME_ATTEMPTS {
            let candidate = self.root.join(naming::safety_backup_name(candidate_at));
            if !candidate.exists() {
                return Ok(candidate);
            }
            candidate_at += Duration::milliseconds(1);
        }
        Err(AppError::new(
            codes::ALREADY_EXISTS,
            "Could not find a free name for the safety backup.",
        )
        .with_context("at", at.to_rfc3339()))
    }

    /// Staging file used to replace the live database with a rename.
    /// It sits next to the database so the rename never crosses volumes.
    pub fn swap_path(&self) -> PathBuf {
        let name = self
            .db_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "database".to_string());
        let parent = self.db_path.parent().unwrap_or_else(|| Path::new("."));
        parent.join(format!(".{name}{SWAP_SUFFIX}"))
    }

    /// Atomically overwrite the live database with the bytes of `source`.
    pub fn replace_database_from(&self, source: &Path) -> AppResult<u64> {
        replace_file_atomic(source, &self.db_path, &self.swap_path())
    }
}

/// Copy `source` over `dest` without ever exposing a half-written `dest`:
/// the bytes go to `staging` first, are flushed, then renamed into place.
pub fn replace_file_atomic(source: &Path, dest: &Path, staging: &Path) -> AppResult<u64> {
    let result = (|| -> AppResult<u64> {
        let copied = fs::copy(source, staging).map_err(|err| {
            AppError::from(err)
                .with_context("operation", "stage_copy")
                .with_context("from", source.display().to_string())
                .with_context("to", staging.display().to_string())
        })?;
        sync_file(staging).map_err(|err| {
            AppError::from(err)
                .with_context("operation", "sync_staged_file")
                .with_context("path", staging.display().to_string())
        })?;
        fs::rename(staging, dest).map_err(|err| {
            AppError::from(err)
                .with_context("operation", "promote_staged_file")
                .with_context("from", staging.display().to_string())
                .with_context("to", dest.display().to_string())
        })?;
        if let Some(parent) = dest.parent() {
            sync_dir(parent).ok();
        }
        Ok(copied)
    })();

    if result.is_err() {
        let _ = fs::remove_file(staging);
    }
    result
}

/// Plain durable copy, used for the pre-restore safety net.
pub fn copy_durable(source: &Path, dest: &Path) -> AppResult<u64> {
    let result = fs::copy(source, dest)
        .and_then(|copied| sync_file(dest).map(|_| copied))
        .map_err(|err| {
            AppError::from(err)
                .with_context("operation", "copy_file")
                .with_context("from", source.display().to_string())
                .with_context("to", dest.display().to_string())
        });
    if result.is_err() {
        let _ = fs::remove_file(dest);
    }
    result
}

pub fn sync_file(path: &Path) -> io::Result<()> {
    OpenOptions::new().write(true).open(path)?.sync_all()
}

pub fn sync_dir(path: &Path) -> io::Result<()> {
    File::open(path)?.sync_all()
}
