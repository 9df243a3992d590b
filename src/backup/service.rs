use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::BackupConfig;
use crate::error::{codes, AppError, AppResult};

use super::archive;
use super::catalog::{self, BackupRecord, BackupStatus};
use super::naming::BackupKind;
use super::recovery::{self, RecoveryReport};
use super::restore::{self, RestoreOutcome};
use super::retention;
use super::scheduler::{Scheduler, SchedulerState};
use super::store::BackupStore;
use super::transfer;
use super::window::CloseSignal;

/// The backup engine as the host sees it.
///
/// Built once with [`BackupService::initialize`] and shared by cloning; all
/// clones drive the same store, lock, and scheduler. [`BackupService::cleanup`]
/// stops the timer and waits for background work before the host exits.
#[derive(Clone)]
pub struct BackupService {
    inner: Arc<ServiceInner>,
}

struct ServiceInner {
    config: BackupConfig,
    store: BackupStore,
    recovery: RecoveryReport,
    last_backup_time: Mutex<Option<DateTime<Utc>>>,
    scheduler: Mutex<Scheduler>,
    shutdown: CancellationToken,
    runtime: Handle,
    tasks: TaskTracker,
}

impl BackupService {
    /// Create the backup folder if needed and clear whatever an interrupted
    /// run left in it. Must be called from within a tokio runtime.
    pub async fn initialize(config: BackupConfig) -> AppResult<Self> {
        let store = BackupStore::from_config(&config);
        let sweep_store = store.clone();
        let recovery = run_blocking(move || {
            sweep_store.ensure_root()?;
            Ok(recovery::sweep_orphans(&sweep_store))
        })
        .await?;

        tracing::info!(
            target: "carelink",
            backup_dir = %store.root().display(),
            db_path = %store.db_path().display(),
            retention_days = config.retention_days,
            "backup_service_initialized"
        );

        Ok(Self {
            inner: Arc::new(ServiceInner {
                config,
                store,
                recovery,
                last_backup_time: Mutex::new(None),
                scheduler: Mutex::new(Scheduler::new()),
                shutdown: CancellationToken::new(),
                runtime: Handle::current(),
                tasks: TaskTracker::new(),
            }),
        })
    }

    pub fn config(&self) -> &BackupConfig {
        &self.inner.config
    }

    /// What the start-up sweep cleaned.
    pub fn recovery_report(&self) -> &RecoveryReport {
        &self.inner.recovery
    }

    pub fn backup_folder(&self) -> PathBuf {
        self.inner.store.root().to_path_buf()
    }

    /// When this process last finished an archive, if it has.
    pub fn last_backup_time(&self) -> Option<DateTime<Utc>> {
        *lock(&self.inner.last_backup_time)
    }

    pub fn scheduler_state(&self) -> SchedulerState {
        lock(&self.inner.scheduler).state()
    }

    /// Snapshot the live database into a new archive of type `kind`.
    ///
    /// Rotation is kicked off in the background once the archive is in place;
    /// its outcome never affects this call.
    pub async fn create_backup(&self, kind: BackupKind) -> AppResult<PathBuf> {
        let at = Utc::now();
        let path = {
            let _guard = self.inner.store.write().await;
            let store = self.inner.store.clone();
            let path = run_blocking(move || archive::create_archive(&store, kind, at)).await?;
            *lock(&self.inner.last_backup_time) = Some(at);
            path
        };

        self.spawn_rotation();
        Ok(path)
    }

    pub async fn list_backups(&self) -> AppResult<Vec<BackupRecord>> {
        let _guard = self.inner.store.read().await;
        let root = self.inner.store.root().to_path_buf();
        run_blocking(move || Ok(catalog::list_backups(&root))).await
    }

    pub async fn backup_status(&self) -> AppResult<BackupStatus> {
        let _guard = self.inner.store.read().await;
        let root = self.inner.store.root().to_path_buf();
        run_blocking(move || Ok(catalog::summarize(catalog::list_backups(&root), &root))).await
    }

    pub async fn delete_backup(&self, filename: &str) -> AppResult<()> {
        let _guard = self.inner.store.write().await;
        let store = self.inner.store.clone();
        let filename = filename.to_string();
        run_blocking(move || {
            let path = store.existing_archive(&filename)?;
            fs::remove_file(&path).map_err(|err| {
                AppError::from(err)
                    .with_context("operation", "delete_backup")
                    .with_context("path", path.display().to_string())
            })?;
            tracing::info!(target: "carelink", filename = %filename, "backup_deleted");
            Ok(())
        })
        .await
    }

    /// Replace the live database with the payload of `filename`.
    ///
    /// Holds the store lock for the whole run, so no catalog read observes
    /// the swap half way. Old safety copies are pruned after a commit.
    pub async fn restore_backup(&self, filename: &str) -> AppResult<RestoreOutcome> {
        let _guard = self.inner.store.write().await;
        let store = self.inner.store.clone();
        let filename = filename.to_string();
        let cancel = self.inner.shutdown.child_token();
        let keep = self.inner.config.safety_backup_keep;
        run_blocking(move || {
            let outcome = restore::restore_archive(&store, &filename, &cancel)?;
            retention::prune_safety_backups(store.root(), keep);
            Ok(outcome)
        })
        .await
    }

    /// Delete archives older than `max_age_days`.
    pub async fn rotate(&self, max_age_days: u32) -> AppResult<usize> {
        let _guard = self.inner.store.write().await;
        let root = self.inner.store.root().to_path_buf();
        run_blocking(move || Ok(retention::rotate(&root, max_age_days, Utc::now()))).await
    }

    pub async fn prune_safety_backups(&self, keep: usize) -> AppResult<usize> {
        let _guard = self.inner.store.write().await;
        let root = self.inner.store.root().to_path_buf();
        run_blocking(move || Ok(retention::prune_safety_backups(&root, keep))).await
    }

    pub async fn export_backup(&self, filename: &str, dest: &Path) -> AppResult<u64> {
        let _guard = self.inner.store.write().await;
        let store = self.inner.store.clone();
        let filename = filename.to_string();
        let dest = dest.to_path_buf();
        run_blocking(move || transfer::export_archive(&store, &filename, &dest)).await
    }

    /// Copy an external file into the backup folder. Returns the new name.
    pub async fn import_backup(&self, source: &Path) -> AppResult<String> {
        let _guard = self.inner.store.write().await;
        let store = self.inner.store.clone();
        let source = source.to_path_buf();
        run_blocking(move || transfer::import_archive(&store, &source, Utc::now())).await
    }

    /// Arm the recurring Auto backup. The first backup runs straight away.
    pub fn start_automatic_backups(&self) -> AppResult<()> {
        let weak = Arc::downgrade(&self.inner);
        let inner = &self.inner;
        lock(&inner.scheduler).start(
            &inner.runtime,
            &inner.tasks,
            &inner.shutdown,
            inner.config.auto_interval,
            move || {
                let weak = weak.clone();
                async move {
                    if let Some(inner) = weak.upgrade() {
                        BackupService { inner }
                            .best_effort_backup(BackupKind::Auto)
                            .await;
                    }
                }
            },
        )
    }

    pub fn stop_automatic_backups(&self) -> AppResult<()> {
        lock(&self.inner.scheduler).stop()
    }

    /// Take a Close backup when the host shuts down.
    ///
    /// With a window the backup is deferred to its first close request and
    /// the window closes once the backup settles. Without one the backup runs
    /// now. Failures are logged, never returned.
    pub async fn backup_on_close(&self, window: Option<&dyn CloseSignal>) {
        match window {
            Some(window) => {
                let service = self.clone();
                window.on_close_requested(Box::new(move || {
                    Box::pin(async move {
                        service.best_effort_backup(BackupKind::Close).await;
                    })
                }));
                tracing::debug!(target: "carelink", "close_backup_armed");
            }
            None => self.best_effort_backup(BackupKind::Close).await,
        }
    }

    /// Stop the timer, cancel in-flight restores, and wait for background
    /// rotations and ticks to settle.
    pub async fn cleanup(&self) {
        let _ = lock(&self.inner.scheduler).stop();
        self.inner.shutdown.cancel();
        self.inner.tasks.close();
        self.inner.tasks.wait().await;
        tracing::info!(target: "carelink", "backup_service_stopped");
    }

    async fn best_effort_backup(&self, kind: BackupKind) {
        match self.create_backup(kind).await {
            Ok(path) => tracing::info!(
                target: "carelink",
                kind = %kind,
                path = %path.display(),
                "scheduled_backup_created"
            ),
            Err(err) => tracing::warn!(
                target: "carelink",
                kind = %kind,
                code = %err.code(),
                error = %err,
                "scheduled_backup_failed"
            ),
        }
    }

    fn spawn_rotation(&self) {
        let inner = self.inner.clone();
        self.inner.tasks.spawn_on(
            async move {
                let _guard = inner.store.write().await;
                let root = inner.store.root().to_path_buf();
                let max_age_days = inner.config.retention_days;
                let rotation = tokio::task::spawn_blocking(move || {
                    retention::rotate(&root, max_age_days, Utc::now())
                });
                if let Err(err) = rotation.await {
                    tracing::warn!(target: "carelink", error = %err, "backup_rotation_failed");
                }
            },
            &self.inner.runtime,
        );
    }
}

async fn run_blocking<T, F>(work: F) -> AppResult<T>
where
    F: FnOnce() -> AppResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work).await.map_err(|err| {
        AppError::new(codes::TASK, "Background backup task failed.")
            .with_context("error", err.to_string())
    })?
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
