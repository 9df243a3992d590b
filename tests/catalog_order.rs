#![allow(clippy::unwrap_used, clippy::expect_used)]

mod util;

use std::fs;
use std::time::Duration;

use anyhow::Result;
use carelink_backup::backup::naming::{archive_name, import_archive_name};
use carelink_backup::BackupKind;
use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use util::{Fixture, SAMPLE_DB};

#[tokio::test]
async fn list_is_strictly_descending_whatever_the_write_order() -> Result<()> {
    let fx = Fixture::new(SAMPLE_DB);
    let service = fx.service().await;
    let base = Utc.with_ymd_and_hms(2025, 3, 10, 9, 30, 0).unwrap();

    let offsets_in_write_order = [5_i64, -40, 17, 0, -3, 90, 12];
    for (index, minutes) in offsets_in_write_order.iter().enumerate() {
        let at = base + ChronoDuration::minutes(*minutes);
        let name = match index % 3 {
            0 => archive_name(BackupKind::Manual, at),
            1 => archive_name(BackupKind::Auto, at),
            _ => import_archive_name(at, 0),
        };
        fs::write(fx.backup_dir().join(name), vec![1_u8; index + 1])?;
    }

    let records = service.list_backups().await?;
    assert_eq!(records.len(), offsets_in_write_order.len());
    assert!(records
        .windows(2)
        .all(|pair| pair[0].timestamp > pair[1].timestamp));
    assert_eq!(records[0].timestamp, base + ChronoDuration::minutes(90));
    service.cleanup().await;
    Ok(())
}

#[tokio::test]
async fn auto_one_second_after_manual_lists_first() -> Result<()> {
    let fx = Fixture::new(SAMPLE_DB);
    let service = fx.service().await;

    service.create_backup(BackupKind::Manual).await?;
    tokio::time::sleep(Duration::from_millis(1100)).await;
    service.create_backup(BackupKind::Auto).await?;

    let records = service.list_backups().await?;
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].kind, BackupKind::Auto);
    assert_eq!(records[1].kind, BackupKind::Manual);
    service.cleanup().await;
    Ok(())
}

#[tokio::test]
async fn empty_store_status_is_zeroed() -> Result<()> {
    let fx = Fixture::new(SAMPLE_DB);
    let service = fx.service().await;

    let status = service.backup_status().await?;
    assert_eq!(status.total_backups, 0);
    assert_eq!(status.total_size, 0);
    assert_eq!(status.total_size_formatted, "0 Bytes");
    assert!(status.last_backup_time.is_none());
    assert!(status.oldest_backup_time.is_none());
    assert!(status.newest_backup_time.is_none());
    assert!(status.backups_list.is_empty());
    assert_eq!(status.backup_folder, fx.backup_dir());

    let json = serde_json::to_value(&status)?;
    assert!(json["lastBackupTime"].is_null());
    assert_eq!(json["totalBackups"], 0);
    service.cleanup().await;
    Ok(())
}

#[tokio::test]
async fn status_follows_the_folder() -> Result<()> {
    let fx = Fixture::new(SAMPLE_DB);
    let service = fx.service().await;

    let first = service.create_backup(BackupKind::Manual).await?;
    let second = service.create_backup(BackupKind::Close).await?;
    fs::write(fx.backup_dir().join("notes.txt"), b"not an archive")?;

    let status = service.backup_status().await?;
    assert_eq!(status.total_backups, 2);
    assert_eq!(
        status.total_size,
        fs::metadata(&first)?.len() + fs::metadata(&second)?.len()
    );
    assert_eq!(status.backups_list.len(), 2);

    let deleted = status.backups_list[0].filename.clone();
    service.delete_backup(&deleted).await?;
    let status = service.backup_status().await?;
    assert_eq!(status.total_backups, 1);
    assert!(status.backups_list.iter().all(|record| record.filename != deleted));
    service.cleanup().await;
    Ok(())
}
