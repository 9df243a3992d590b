use std::future::Future;
use std::time::Duration;

use serde::Serialize;
use tokio::runtime::Handle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::error::{codes, AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerState {
    Stopped,
    Running,
}

/// Two-state recurring timer.
///
/// The first tick fires as soon as the timer is armed, later ones every
/// `period` on the monotonic clock. A tick that overruns its slot delays the
/// next one rather than bunching them up.
#[derive(Default)]
pub struct Scheduler {
    timer: Option<CancellationToken>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SchedulerState {
        match self.timer {
            Some(_) => SchedulerState::Running,
            None => SchedulerState::Stopped,
        }
    }

    pub fn start<F, Fut>(
        &mut self,
        runtime: &Handle,
        tasks: &TaskTracker,
        parent: &CancellationToken,
        period: Duration,
        tick: F,
    ) -> AppResult<()>
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.timer.is_some() {
            tracing::warn!(target: "carelink", "automatic_backups_already_running");
            return Err(AppError::new(
                codes::ALREADY_RUNNING,
                "Automatic backups are already running.",
            ));
        }
        if period.is_zero() {
            return Err(AppError::new(
                codes::INVALID_INTERVAL,
                "The automatic backup interval must be longer than zero.",
            ));
        }

        let cancel = parent.child_token();
        let timer_cancel = cancel.clone();
        tasks.spawn_on(
            async move {
                let mut interval = tokio::time::interval(period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        biased;
                        _ = timer_cancel.cancelled() => break,
                        _ = interval.tick() => tick().await,
                    }
                }
                tracing::debug!(target: "carelink", "automatic_backup_timer_stopped");
            },
            runtime,
        );

        self.timer = Some(cancel);
        tracing::info!(
            target: "carelink",
            interval_secs = period.as_secs(),
            "automatic_backups_started"
        );
        Ok(())
    }

    /// Disarm the timer. A tick already in progress runs to completion.
    pub fn stop(&mut self) -> AppResult<()> {
        let Some(cancel) = self.timer.take() else {
            return Err(AppError::new(
                codes::NOT_RUNNING,
                "Automatic backups are not running.",
            ));
        };
        cancel.cancel();
        tracing::info!(target: "carelink", "automatic_backups_stopped");
        Ok(())
    }
}
