use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};

use crate::error::{codes, AppError, AppResult};

use super::naming::{self, PARTIAL_SUFFIX};
use super::store::{self, BackupStore};

/// Highest numeric suffix tried when several imports land in the same second.
const MAX_IMPORT_SEQUENCE: u32 = 99;

/// Copy the archive `filename` to `dest`, creating parent folders on the way.
/// The bytes are copied as-is; nothing checks that they form an archive.
pub fn export_archive(store: &BackupStore, filename: &str, dest: &Path) -> AppResult<u64> {
    let source = store.existing_archive(filename)?;

    if let Some(parent) = dest.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|err| {
            AppError::from(err)
                .with_context("operation", "create_export_dir")
                .with_context("path", parent.display().to_string())
        })?;
    }

    let copied = fs::copy(&source, dest).map_err(|err| {
        AppError::from(err)
            .with_context("operation", "export_copy")
            .with_context("from", source.display().to_string())
            .with_context("to", dest.display().to_string())
    })?;
    tracing::info!(
        target: "carelink",
        filename,
        dest = %dest.display(),
        bytes = copied,
        "backup_exported"
    );
    Ok(copied)
}

/// Copy an external file into the store as an import archive and return its
/// new name. Like export, the content is taken on trust.
pub fn import_archive(store: &BackupStore, source: &Path, at: DateTime<Utc>) -> AppResult<String> {
    if !source.is_file() {
        return Err(AppError::not_found("The file to import does not exist.")
            .with_context("path", source.display().to_string()));
    }
    store.ensure_root()?;

    let filename = (0..=MAX_IMPORT_SEQUENCE)
        .map(|sequence| naming::import_archive_name(at, sequence))
        .find(|candidate| !store.root().join(candidate).exists())
        .ok_or_else(|| {
            AppError::new(
                codes::ALREADY_EXISTS,
                "Too many backups were imported in the same second.",
            )
        })?;
    let final_path = store.root().join(&filename);
    let partial = store.root().join(format!("{filename}{PARTIAL_SUFFIX}"));

    let result = (|| -> AppResult<u64> {
        let copied = store::copy_durable(source, &partial)?;
        fs::rename(&partial, &final_path).map_err(|err| {
            AppError::from(err)
                .with_context("operation", "finalize_import")
                .with_context("from", partial.display().to_string())
                .with_context("to", final_path.display().to_string())
        })?;
        Ok(copied)
    })();

    match result {
        Ok(copied) => {
            tracing::info!(
                target: "carelink",
                source = %source.display(),
                filename = %filename,
                bytes = copied,
                "backup_imported"
            );
            Ok(filename)
        }
        Err(err) => {
            let _ = fs::remove_file(&partial);
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::catalog;
    use crate::backup::naming::BackupKind;
    use tempfile::tempdir;

    fn store(dir: &Path) -> BackupStore {
        let store = BackupStore::new(dir.join("carelink.db"), dir.join("backups"));
        store.ensure_root().unwrap();
        store
    }

    #[test]
    fn export_creates_missing_parents() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        let name = "carelink_backup_manual_2024-02-02_08-00-00.zip";
        fs::write(store.root().join(name), b"archive bytes").unwrap();

        let dest = dir.path().join("usb").join("carelink").join("copy.zip");
        assert_eq!(export_archive(&store, name, &dest).unwrap(), 13);
        assert_eq!(fs::read(&dest).unwrap(), b"archive bytes");
        assert!(store.root().join(name).exists(), "export copies, never moves");
    }

    #[test]
    fn export_of_unknown_archive_is_not_found() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        let err = export_archive(&store, "nope.zip", &dir.path().join("out.zip")).unwrap_err();
        assert_eq!(err.code(), codes::NOT_FOUND);
    }

    #[test]
    fn imports_in_one_second_get_distinct_names() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        let source = dir.path().join("external.zip");
        fs::write(&source, b"whatever the user picked").unwrap();
        let at = Utc::now();

        let first = import_archive(&store, &source, at).unwrap();
        let second = import_archive(&store, &source, at).unwrap();

        assert_ne!(first, second);
        let records = catalog::list_backups(store.root());
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|record| record.kind == BackupKind::Import));
        assert_eq!(records[0].filename, second);
    }

    #[test]
    fn import_of_missing_file_is_not_found() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        let err = import_archive(&store, &dir.path().join("ghost.zip"), Utc::now()).unwrap_err();
        assert_eq!(err.code(), codes::NOT_FOUND);
    }
}
