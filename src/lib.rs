pub mod backup;
pub mod config;
pub mod error;
pub mod logging;

pub use backup::{
    BackupKind, BackupMetadata, BackupRecord, BackupService, BackupStatus, CloseHook,
    CloseSignal, RecoveryReport, RestoreOutcome, RestorePhase, SchedulerState,
};
pub use config::BackupConfig;
pub use error::{AppError, AppResult};
pub use logging::{init_file_logging, init_logging};
