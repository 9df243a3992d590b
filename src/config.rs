use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

const BACKUP_DIR_NAME: &str = "backups";
const DEFAULT_RETENTION_DAYS: u32 = 30;
const HARD_MAX_RETENTION_DAYS: u32 = 3650;
const DEFAULT_AUTO_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);
/// Anything shorter would turn the scheduler into a busy loop of full snapshots.
const MIN_AUTO_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_SAFETY_BACKUP_KEEP: usize = 3;
const HARD_MAX_SAFETY_BACKUP_KEEP: usize = 50;

/// Everything the engine needs from the host, supplied once at start-up.
#[derive(Debug, Clone)]
pub struct BackupConfig {
    /// The live database file.
    pub db_path: PathBuf,
    /// The application's data directory; archives live in its `backups/` child.
    pub app_data_dir: PathBuf,
    /// Age window used by rotation after each successful backup.
    pub retention_days: u32,
    /// Period of the automatic backup timer.
    pub auto_interval: Duration,
    /// Number of pre-restore safety copies to keep.
    pub safety_backup_keep: usize,
}

impl BackupConfig {
    pub fn new(db_path: impl Into<PathBuf>, app_data_dir: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            app_data_dir: app_data_dir.into(),
            retention_days: DEFAULT_RETENTION_DAYS,
            auto_interval: DEFAULT_AUTO_INTERVAL,
            safety_backup_keep: DEFAULT_SAFETY_BACKUP_KEEP,
        }
    }

    /// Like [`BackupConfig::new`] but honours the `CARELINK_BACKUP_*`
    /// environment overrides. Out of range values are clamped, unparsable
    /// ones ignored.
    pub fn load(db_path: impl Into<PathBuf>, app_data_dir: impl Into<PathBuf>) -> Self {
        let mut config = Self::new(db_path, app_data_dir);

        config.retention_days = env::var("CARELINK_BACKUP_RETENTION_DAYS")
            .ok()
            .and_then(|value| value.parse::<u32>().ok())
            .filter(|value| *value > 0)
            .map(|value| value.min(HARD_MAX_RETENTION_DAYS))
            .unwrap_or(DEFAULT_RETENTION_DAYS);

        config.auto_interval = env::var("CARELINK_BACKUP_INTERVAL_SECS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .map(Duration::from_secs)
            .map(|value| value.max(MIN_AUTO_INTERVAL))
            .unwrap_or(DEFAULT_AUTO_INTERVAL);

        config.safety_backup_keep = env::var("CARELINK_BACKUP_SAFETY_KEEP")
            .ok()
            .and_then(|value| value.parse::<usize>().ok())
            .filter(|value| *value > 0)
            .map(|value| value.min(HARD_MAX_SAFETY_BACKUP_KEEP))
            .unwrap_or(DEFAULT_SAFETY_BACKUP_KEEP);

        config
    }

    pub fn with_retention_days(mut self, days: u32) -> Self {
        self.retention_days = days;
        self
    }

    pub fn with_auto_interval(mut self, interval: Duration) -> Self {
        self.auto_interval = interval;
        self
    }

    pub fn with_safety_backup_keep(mut self, keep: usize) -> Self {
        self.safety_backup_keep = keep;
        self
    }

    pub fn backup_dir(&self) -> PathBuf {
        backup_dir_for(&self.app_data_dir)
    }
}

pub fn backup_dir_for(app_data_dir: &Path) -> PathBuf {
    app_data_dir.join(BACKUP_DIR_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_daily_schedule_and_monthly_window() {
        let cfg = BackupConfig::new("/data/carelink.db", "/data");
        assert_eq!(cfg.retention_days, 30);
        assert_eq!(cfg.auto_interval, Duration::from_secs(86_400));
        assert_eq!(cfg.safety_backup_keep, 3);
        assert_eq!(cfg.backup_dir(), PathBuf::from("/data/backups"));
    }

    #[test]
    fn builders_override_defaults() {
        let cfg = BackupConfig::new("db", "appdata")
            .with_retention_days(7)
            .with_auto_interval(Duration::from_secs(120))
            .with_safety_backup_keep(1);
        assert_eq!(cfg.retention_days, 7);
        assert_eq!(cfg.auto_interval, Duration::from_secs(120));
        assert_eq!(cfg.safety_backup_keep, 1);
    }

    #[test]
    fn load_clamps_environment_overrides() {
        env::set_var("CARELINK_BACKUP_RETENTION_DAYS", "999999");
        env::set_var("CARELINK_BACKUP_INTERVAL_SECS", "5");
        env::set_var("CARELINK_BACKUP_SAFETY_KEEP", "not-a-number");
        let cfg = BackupConfig::load("db", "appdata");
        env::remove_var("CARELINK_BACKUP_RETENTION_DAYS");
        env::remove_var("CARELINK_BACKUP_INTERVAL_SECS");
        env::remove_var("CARELINK_BACKUP_SAFETY_KEEP");

        assert_eq!(cfg.retention_days, HARD_MAX_RETENTION_DAYS);
        assert_eq!(cfg.auto_interval, MIN_AUTO_INTERVAL);
        assert_eq!(cfg.safety_backup_keep, DEFAULT_SAFETY_BACKUP_KEEP);
    }
}
