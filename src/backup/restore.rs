use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use zip::ZipArchive;

use crate::error::{codes, AppError, AppResult};

use super::archive::{self, BackupMetadata};
use super::naming::{DATABASE_ENTRY, METADATA_ENTRY, RESTORE_TEMP_PREFIX};
use super::store::{self, BackupStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RestorePhase {
    Idle,
    SafetyBackedUp,
    Extracting,
    Validating,
    Swapping,
    Committed,
    RolledBack,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreOutcome {
    pub filename: String,
    pub phase: RestorePhase,
    pub safety_backup_path: PathBuf,
    pub restored_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BackupMetadata>,
    pub duration_ms: u64,
}

struct RestoreRun<'a> {
    filename: &'a str,
    phase: RestorePhase,
}

impl RestoreRun<'_> {
    fn advance(&mut self, next: RestorePhase) {
        tracing::debug!(
            target: "carelink",
            filename = %self.filename,
            from = ?self.phase,
            to = ?next,
            "restore_phase"
        );
        self.phase = next;
    }
}

struct Staged {
    temp_dir: TempDir,
    restored_bytes: u64,
    metadata: Option<BackupMetadata>,
}

/// Replace the live database with the payload of `filename`.
///
/// A raw copy of the live database is taken first and nothing else happens if
/// that copy fails. Any failure after it puts the copy back, so on return the
/// live file holds either the archive's payload or its previous bytes.
pub fn restore_archive(
    store: &BackupStore,
    filename: &str,
    cancel: &CancellationToken,
) -> AppResult<RestoreOutcome> {
    let start = Instant::now();
    let archive_path = store.existing_archive(filename)?;
    store.require_database()?;

    let mut run = RestoreRun {
        filename,
        phase: RestorePhase::Idle,
    };

    let safety_path = store
        .safety_backup_path(Utc::now())
        .map_err(|err| err.with_context("phase", "safety_backup"))?;
    store::copy_durable(store.db_path(), &safety_path).map_err(|err| {
        tracing::error!(
            target: "carelink",
            error = %err,
            filename,
            "restore_safety_backup_failed"
        );
        err.with_context("phase", "safety_backup")
    })?;
    run.advance(RestorePhase::SafetyBackedUp);
    tracing::info!(
        target: "carelink",
        path = %safety_path.display(),
        "restore_safety_backup_created"
    );

    match stage_and_swap(store, &archive_path, cancel, &mut run) {
        Ok(staged) => {
            let Staged {
                temp_dir,
                restored_bytes,
                metadata,
            } = staged;
            run.advance(RestorePhase::Committed);
            let temp_path = temp_dir.path().to_path_buf();
            if let Err(err) = temp_dir.close() {
                tracing::warn!(
                    target: "carelink",
                    error = %err,
                    path = %temp_path.display(),
                    "restore_temp_cleanup_failed"
                );
            }
            tracing::info!(target: "carelink", filename, restored_bytes, "backup_restored");
            Ok(RestoreOutcome {
                filename: filename.to_string(),
                phase: run.phase,
                safety_backup_path: safety_path,
                restored_bytes,
                metadata,
                duration_ms: start.elapsed().as_millis() as u64,
            })
        }
        Err(err) => {
            let failed_in = run.phase;
            let err = err.with_context("phase", format!("{failed_in:?}"));
            let rollback = store.replace_database_from(&safety_path);
            run.advance(RestorePhase::RolledBack);
            match rollback {
                Ok(_) => {
                    tracing::error!(
                        target: "carelink",
                        error = %err,
                        filename,
                        phase = ?failed_in,
                        "restore_rolled_back"
                    );
                    Err(err)
                }
                Err(rollback_err) => {
                    tracing::error!(
                        target: "carelink",
                        error = %err,
                        rollback_error = %rollback_err,
                        safety_backup = %safety_path.display(),
                        "restore_rollback_failed"
                    );
                    Err(err
                        .with_context("safety_backup", safety_path.display().to_string())
                        .with_cause(rollback_err))
                }
            }
        }
    }
}

fn stage_and_swap(
    store: &BackupStore,
    archive_path: &Path,
    cancel: &CancellationToken,
    run: &mut RestoreRun<'_>,
) -> AppResult<Staged> {
    run.advance(RestorePhase::Extracting);
    let temp_dir = tempfile::Builder::new()
        .prefix(RESTORE_TEMP_PREFIX)
        .tempdir_in(store.root())
        .map_err(|err| {
            AppError::from(err)
                .with_context("operation", "create_restore_dir")
                .with_context("path", store.root().display().to_string())
        })?;
    extract_archive(archive_path, temp_dir.path(), cancel)?;

    run.advance(RestorePhase::Validating);
    let payload = temp_dir.path().join(DATABASE_ENTRY);
    if !payload.is_file() {
        return Err(AppError::corrupt_archive(
            "The backup does not contain a database.",
        )
        .with_context("archive", archive_path.display().to_string()));
    }
    let metadata = read_extracted_metadata(&temp_dir.path().join(METADATA_ENTRY));
    if let Some(expected) = metadata.as_ref().and_then(|meta| meta.sha256.as_deref()) {
        let actual = archive::file_sha256(&payload)?;
        if !actual.eq_ignore_ascii_case(expected) {
            return Err(AppError::corrupt_archive(
                "The database inside the backup is damaged.",
            )
            .with_context("expected_sha256", expected)
            .with_context("actual_sha256", actual));
        }
    }

    if cancel.is_cancelled() {
        return Err(AppError::new(codes::CANCELLED, "The restore was cancelled."));
    }

    run.advance(RestorePhase::Swapping);
    let restored_bytes = store.replace_database_from(&payload)?;

    Ok(Staged {
        temp_dir,
        restored_bytes,
        metadata,
    })
}

/// Unpack every entry of `archive_path` below `dest`. Entries whose names
/// would land outside `dest` are skipped.
fn extract_archive(archive_path: &Path, dest: &Path, cancel: &CancellationToken) -> AppResult<()> {
    let file = File::open(archive_path).map_err(|err| {
        AppError::from(err)
            .with_context("operation", "open_archive")
            .with_context("path", archive_path.display().to_string())
    })?;
    let mut archive = ZipArchive::new(file)
        .map_err(|err| AppError::from(err).with_context("operation", "read_archive"))?;

    for index in 0..archive.len() {
        if cancel.is_cancelled() {
            return Err(AppError::new(codes::CANCELLED, "The restore was cancelled."));
        }
        let mut entry = archive
            .by_index(index)
            .map_err(|err| AppError::from(err).with_context("operation", "read_archive_entry"))?;
        let Some(relative) = entry.enclosed_name().map(Path::to_path_buf) else {
            tracing::warn!(
                target: "carelink",
                entry = %entry.name(),
                "skip_unsafe_archive_entry"
            );
            continue;
        };
        let out_path = dest.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&out_path).map_err(|err| {
                AppError::from(err)
                    .with_context("operation", "extract_dir")
                    .with_context("path", out_path.display().to_string())
            })?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent).map_err(|err| {
                AppError::from(err)
                    .with_context("operation", "extract_parent_dir")
                    .with_context("path", parent.display().to_string())
            })?;
        }
        let mut out = File::create(&out_path).map_err(|err| {
            AppError::from(err)
                .with_context("operation", "extract_create")
                .with_context("path", out_path.display().to_string())
        })?;
        io::copy(&mut entry, &mut out).map_err(|err| {
            AppError::from(err)
                .with_context("operation", "extract_copy")
                .with_context("path", out_path.display().to_string())
        })?;
    }

    Ok(())
}

/// Metadata is advisory: archives imported from elsewhere may lack it or
/// carry a different shape.
fn read_extracted_metadata(path: &Path) -> Option<BackupMetadata> {
    if !path.is_file() {
        return None;
    }
    match archive::read_metadata(path) {
        Ok(meta) => Some(meta),
        Err(err) => {
            tracing::warn!(target: "carelink", error = %err, "restore_metadata_ignored");
            None
        }
    }
}
