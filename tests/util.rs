#![allow(clippy::unwrap_used, clippy::expect_used, dead_code)]

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use carelink_backup::{BackupConfig, BackupService};
use tempfile::TempDir;
use zip::write::FileOptions;
use zip::{ZipArchive, ZipWriter};

pub const SAMPLE_DB: &[u8] = b"SQLite format 3\0patients: 2; prescriptions: 5";

/// A throwaway app data directory with a live database in it.
pub struct Fixture {
    pub dir: TempDir,
    pub appdata: PathBuf,
    pub db_path: PathBuf,
}

impl Fixture {
    pub fn new(contents: &[u8]) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let appdata = dir.path().join("appdata");
        fs::create_dir_all(&appdata).unwrap();
        let db_path = appdata.join("carelink.db");
        fs::write(&db_path, contents).unwrap();
        Self {
            dir,
            appdata,
            db_path,
        }
    }

    pub fn config(&self) -> BackupConfig {
        BackupConfig::new(&self.db_path, &self.appdata)
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.appdata.join("backups")
    }

    pub async fn service(&self) -> BackupService {
        BackupService::initialize(self.config())
            .await
            .expect("initialize backup service")
    }

    pub fn live_bytes(&self) -> Vec<u8> {
        fs::read(&self.db_path).unwrap()
    }

    pub fn set_live_bytes(&self, contents: &[u8]) {
        fs::write(&self.db_path, contents).unwrap();
    }
}

/// The `database.db` payload of an archive.
pub fn archive_payload(path: &Path) -> Vec<u8> {
    let mut archive = ZipArchive::new(File::open(path).unwrap()).unwrap();
    let mut entry = archive.by_name("database.db").unwrap();
    let mut payload = Vec::new();
    entry.read_to_end(&mut payload).unwrap();
    payload
}

pub fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
    let mut writer = ZipWriter::new(File::create(path).unwrap());
    for (name, contents) in entries {
        writer.start_file(*name, FileOptions::default()).unwrap();
        writer.write_all(contents).unwrap();
    }
    writer.finish().unwrap();
}

pub fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}
