//! Snapshots of the live database: creation, catalog, retention, restore,
//! and the timers that drive them.

pub mod archive;
pub mod catalog;
pub mod naming;
pub mod recovery;
pub mod restore;
pub mod retention;
pub mod scheduler;
pub mod service;
pub mod store;
pub mod transfer;
pub mod window;

pub use archive::BackupMetadata;
pub use catalog::{BackupRecord, BackupStatus};
pub use naming::BackupKind;
pub use recovery::RecoveryReport;
pub use restore::{RestoreOutcome, RestorePhase};
pub use scheduler::SchedulerState;
pub use service::BackupService;
pub use store::BackupStore;
pub use window::{CloseHook, CloseSignal};
