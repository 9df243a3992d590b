use std::fs;

use serde::Serialize;

use super::naming::{self, PARTIAL_SUFFIX};
use super::retention;
use super::store::BackupStore;

/// What the start-up sweep found and cleaned.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryReport {
    pub removed_temp_dirs: usize,
    pub removed_partial_archives: usize,
    pub removed_swap_files: usize,
    /// Safety copies are kept; only counted here.
    pub safety_backups: usize,
}

/// Remove what an interrupted create or restore leaves behind.
///
/// Must run before any other operation on the store: it assumes nothing is
/// in flight.
pub fn sweep_orphans(store: &BackupStore) -> RecoveryReport {
    let mut report = RecoveryReport::default();

    if let Ok(entries) = fs::read_dir(store.root()) {
        for entry in entries.filter_map(|entry| entry.ok()) {
            let name = entry.file_name().to_string_lossy().into_owned();
            let path = entry.path();
            if path.is_dir() && naming::is_restore_temp_dir(&name) {
                match fs::remove_dir_all(&path) {
                    Ok(()) => report.removed_temp_dirs += 1,
                    Err(err) => tracing::warn!(
                        target: "carelink",
                        error = %err,
                        path = %path.display(),
                        "orphan_restore_dir_not_removed"
                    ),
                }
            } else if path.is_file() && name.ends_with(PARTIAL_SUFFIX) {
                match fs::remove_file(&path) {
                    Ok(()) => report.removed_partial_archives += 1,
                    Err(err) => tracing::warn!(
                        target: "carelink",
                        error = %err,
                        path = %path.display(),
                        "orphan_partial_archive_not_removed"
                    ),
                }
            }
        }
    }

    // A staged swap file means the process died before or during the final
    // rename. The rename is atomic, so the live file is intact either way.
    let swap = store.swap_path();
    if swap.is_file() {
        match fs::remove_file(&swap) {
            Ok(()) => report.removed_swap_files += 1,
            Err(err) => tracing::warn!(
                target: "carelink",
                error = %err,
                path = %swap.display(),
                "orphan_swap_file_not_removed"
            ),
        }
    }

    report.safety_backups = retention::list_safety_backups(store.root()).len();

    if report != RecoveryReport::default() {
        tracing::info!(
            target: "carelink",
            removed_temp_dirs = report.removed_temp_dirs,
            removed_partial_archives = report.removed_partial_archives,
            removed_swap_files = report.removed_swap_files,
            safety_backups = report.safety_backups,
            "backup_store_recovered"
        );
    }
    report
}
