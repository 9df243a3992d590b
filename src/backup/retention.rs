use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};

use super::catalog::{self, BackupRecord};
use super::naming;

pub const DEFAULT_MAX_AGE_DAYS: u32 = 30;

/// Delete every archive older than `max_age_days` relative to `now`.
///
/// Each deletion stands on its own: a failure is logged and the remaining
/// archives are still processed. Returns how many archives were removed.
pub fn rotate(root: &Path, max_age_days: u32, now: DateTime<Utc>) -> usize {
    let Some(cutoff) = now.checked_sub_signed(Duration::days(i64::from(max_age_days))) else {
        // The window reaches past the earliest representable date.
        tracing::debug!(target: "carelink", max_age_days, "backup_rotation_window_unbounded");
        return 0;
    };

    let deleted = remove_expired(catalog::list_backups(root), cutoff);
    if deleted > 0 {
        tracing::info!(target: "carelink", deleted, max_age_days, "backup_rotation_complete");
    }
    deleted
}

fn remove_expired(records: Vec<BackupRecord>, cutoff: DateTime<Utc>) -> usize {
    let mut deleted = 0;
    for record in records {
        if record.timestamp >= cutoff {
            continue;
        }
        match fs::remove_file(&record.path) {
            Ok(()) => {
                deleted += 1;
                tracing::debug!(
                    target: "carelink",
                    filename = %record.filename,
                    "backup_rotated"
                );
            }
            Err(err) => {
                tracing::warn!(
                    target: "carelink",
                    error = %err,
                    filename = %record.filename,
                    "failed_to_remove_old_backup"
                );
            }
        }
    }
    deleted
}

/// Keep the `keep` most recent pre-restore safety copies and delete the rest.
pub fn prune_safety_backups(root: &Path, keep: usize) -> usize {
    let mut safety = list_safety_backups(root);
    if safety.len() <= keep {
        return 0;
    }
    safety.sort_by(|a, b| b.0.cmp(&a.0));

    let mut deleted = 0;
    for (_, path) in safety.into_iter().skip(keep) {
        match fs::remove_file(&path) {
            Ok(()) => deleted += 1,
            Err(err) => tracing::warn!(
                target: "carelink",
                error = %err,
                path = %path.display(),
                "failed_to_remove_safety_backup"
            ),
        }
    }
    deleted
}

/// Safety copies in `root` with the millisecond stamp from their name.
pub fn list_safety_backups(root: &Path) -> Vec<(i64, PathBuf)> {
    let Ok(entries) = fs::read_dir(root) else {
        return Vec::new();
    };
    entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let name = entry.file_name();
            let millis = naming::parse_safety_backup_name(name.to_str()?)?;
            entry.path().is_file().then(|| (millis, entry.path()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::naming::BackupKind;
    use chrono::TimeZone;
    use tempfile::tempdir;

    #[test]
    fn rotation_removes_only_expired_archives() {
        let dir = tempdir().unwrap();
        let now = Utc::now();
        let expired = [31, 45, 400];
        let fresh = [0, 1, 29];

        for days in expired.iter().chain(fresh.iter()) {
            let at = now - Duration::days(*days) - Duration::minutes(1);
            fs::write(
                dir.path().join(naming::archive_name(BackupKind::Auto, at)),
                b"zip",
            )
            .unwrap();
        }
        fs::write(dir.path().join("unrelated.zip"), b"keep me").unwrap();

        let deleted = rotate(dir.path(), DEFAULT_MAX_AGE_DAYS, now);

        assert_eq!(deleted, expired.len());
        let remaining = catalog::list_backups(dir.path());
        assert_eq!(remaining.len(), fresh.len());
        assert!(remaining
            .iter()
            .all(|record| record.timestamp >= now - Duration::days(30)));
        assert!(dir.path().join("unrelated.zip").exists());
    }

    #[test]
    fn rotation_on_missing_folder_is_a_no_op() {
        let dir = tempdir().unwrap();
        assert_eq!(rotate(&dir.path().join("absent"), 30, Utc::now()), 0);
    }

    #[test]
    fn oversized_window_deletes_nothing() {
        let dir = tempdir().unwrap();
        let now = Utc::now();
        let old = naming::archive_name(BackupKind::Auto, now - Duration::days(4000));
        fs::write(dir.path().join(&old), b"zip").unwrap();

        assert_eq!(rotate(dir.path(), u32::MAX, now), 0);
        assert!(dir.path().join(&old).exists());
    }

    #[test]
    fn failed_deletion_does_not_stop_the_batch() {
        let dir = tempdir().unwrap();
        let now = Utc::now();
        let record = |days: i64, path: PathBuf| {
            let timestamp = now - Duration::days(days);
            BackupRecord {
                filename: naming::archive_name(BackupKind::Auto, timestamp),
                path,
                kind: BackupKind::Auto,
                timestamp,
                size_bytes: 3,
            }
        };

        let first = dir.path().join("first.zip");
        let last = dir.path().join("last.zip");
        let fresh = dir.path().join("fresh.zip");
        for path in [&first, &last, &fresh] {
            fs::write(path, b"zip").unwrap();
        }
        // A directory cannot be removed with `remove_file`, even by root.
        let stubborn = dir.path().join("stubborn.zip");
        fs::create_dir(&stubborn).unwrap();
        fs::write(stubborn.join("inner"), b"x").unwrap();
        let vanished = dir.path().join("vanished.zip");

        let records = vec![
            record(2, fresh.clone()),
            record(40, first.clone()),
            record(50, stubborn.clone()),
            record(60, vanished),
            record(70, last.clone()),
        ];
        let deleted = remove_expired(records, now - Duration::days(30));

        assert_eq!(deleted, 2);
        assert!(!first.exists());
        assert!(!last.exists());
        assert!(stubborn.is_dir());
        assert!(fresh.exists());
    }

    #[test]
    fn safety_pruning_keeps_newest() {
        let dir = tempdir().unwrap();
        for millis in [1_000_i64, 5_000, 3_000, 4_000] {
            let at = Utc.timestamp_millis_opt(millis).unwrap();
            fs::write(dir.path().join(naming::safety_backup_name(at)), b"raw").unwrap();
        }

        assert_eq!(prune_safety_backups(dir.path(), 2), 2);
        let mut left: Vec<i64> = list_safety_backups(dir.path())
            .into_iter()
            .map(|(millis, _)| millis)
            .collect();
        left.sort();
        assert_eq!(left, vec![4_000, 5_000]);
        assert_eq!(prune_safety_backups(dir.path(), 2), 0);
    }
}
