#![allow(clippy::unwrap_used, clippy::expect_used)]

mod util;

use std::fs::File;
use std::io::Read;

use anyhow::Result;
use carelink_backup::backup::naming::parse_archive_name;
use carelink_backup::error::codes;
use carelink_backup::{BackupConfig, BackupKind, BackupService};
use chrono::{TimeZone, Utc};
use util::{archive_payload, Fixture, SAMPLE_DB};
use zip::ZipArchive;

#[tokio::test]
async fn each_buildable_kind_yields_one_decodable_archive() -> Result<()> {
    let fx = Fixture::new(SAMPLE_DB);
    let service = fx.service().await;

    for kind in [BackupKind::Manual, BackupKind::Auto, BackupKind::Close] {
        let window_start = Utc.timestamp_opt(Utc::now().timestamp(), 0).unwrap();
        let path = service.create_backup(kind).await?;
        let window_end = Utc::now();

        let filename = path.file_name().unwrap().to_string_lossy().into_owned();
        let decoded = parse_archive_name(&filename)?;
        assert_eq!(decoded.kind, kind);
        assert!(
            decoded.timestamp >= window_start && decoded.timestamp <= window_end,
            "{filename} decodes outside the test window"
        );
        assert_eq!(path.parent(), Some(fx.backup_dir().as_path()));
        assert_eq!(archive_payload(&path), SAMPLE_DB);
    }

    let records = service.list_backups().await?;
    assert_eq!(records.len(), 3);
    service.cleanup().await;
    Ok(())
}

#[tokio::test]
async fn metadata_entry_describes_the_snapshot() -> Result<()> {
    let fx = Fixture::new(SAMPLE_DB);
    let service = fx.service().await;

    let path = service.create_backup(BackupKind::Auto).await?;
    let mut archive = ZipArchive::new(File::open(&path)?)?;
    let mut raw = String::new();
    archive.by_name("metadata.json")?.read_to_string(&mut raw)?;
    let meta: serde_json::Value = serde_json::from_str(&raw)?;

    assert_eq!(meta["type"], "auto");
    assert_eq!(meta["databaseSize"], SAMPLE_DB.len() as u64);
    assert_eq!(meta["platform"], std::env::consts::OS);
    assert_eq!(meta["description"], "Backup auto de CareLink");
    assert_eq!(meta["sha256"].as_str().map(str::len), Some(64));
    assert!(chrono::DateTime::parse_from_rfc3339(meta["timestamp"].as_str().unwrap()).is_ok());
    service.cleanup().await;
    Ok(())
}

#[tokio::test]
async fn create_records_last_backup_time() -> Result<()> {
    let fx = Fixture::new(SAMPLE_DB);
    let service = fx.service().await;
    assert!(service.last_backup_time().is_none());

    let before = Utc::now();
    service.create_backup(BackupKind::Manual).await?;
    let last = service.last_backup_time().expect("last backup time recorded");
    assert!(last >= before && last <= Utc::now());
    service.cleanup().await;
    Ok(())
}

#[tokio::test]
async fn missing_database_is_not_found_and_writes_nothing() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let appdata = dir.path().join("appdata");
    let service =
        BackupService::initialize(BackupConfig::new(appdata.join("carelink.db"), &appdata))
            .await?;

    let err = service.create_backup(BackupKind::Manual).await.unwrap_err();
    assert_eq!(err.code(), codes::NOT_FOUND);
    assert!(service.list_backups().await?.is_empty());
    assert!(service.last_backup_time().is_none());
    assert_eq!(std::fs::read_dir(service.backup_folder())?.count(), 0);
    service.cleanup().await;
    Ok(())
}

#[tokio::test]
async fn import_kind_is_rejected() -> Result<()> {
    let fx = Fixture::new(SAMPLE_DB);
    let service = fx.service().await;
    let err = service.create_backup(BackupKind::Import).await.unwrap_err();
    assert_eq!(err.code(), codes::INVALID_KIND);
    service.cleanup().await;
    Ok(())
}
