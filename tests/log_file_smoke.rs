#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::{fs, thread::sleep, time::Duration};

#[test]
fn file_sink_writes_json_lines() {
    let tmp = tempfile::tempdir().unwrap();
    let logs_dir = tmp.path().join("logs");

    let guard = carelink_backup::init_file_logging(&logs_dir).expect("file logging to initialize");
    assert!(logs_dir.is_dir(), "logs dir missing: {:?}", logs_dir);

    tracing::info!(target: "carelink", marker = "first", "smoke_test");
    drop(guard);

    let log_path = wait_for_log(&logs_dir);
    let contents = fs::read_to_string(&log_path).expect("read log file");
    let last_line = contents
        .lines()
        .filter(|line| !line.trim().is_empty())
        .last()
        .expect("log line present");
    let value: serde_json::Value = serde_json::from_str(last_line).expect("json log line");

    assert_eq!(value["fields"]["message"], "smoke_test");
    assert_eq!(value["fields"]["marker"], "first");
    assert_eq!(value["level"], "INFO");
    assert_eq!(value["target"], "carelink");
    assert!(value["timestamp"].as_str().is_some());
}

fn wait_for_log(dir: &std::path::Path) -> std::path::PathBuf {
    for _ in 0..20 {
        let found = fs::read_dir(dir)
            .unwrap()
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .find(|path| {
                path.file_name()
                    .map(|name| name.to_string_lossy().starts_with("carelink-backup.log"))
                    .unwrap_or(false)
                    && fs::metadata(path).map(|meta| meta.len() > 0).unwrap_or(false)
            });
        if let Some(path) = found {
            return path;
        }
        sleep(Duration::from_millis(50));
    }
    panic!("log file did not appear in {:?}", dir);
}
