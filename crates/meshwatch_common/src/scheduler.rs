//! Fixed-interval recurring jobs.
//!
//! A job runs its task strictly sequentially: when a run overruns the
//! interval the next tick is delayed, never doubled up or caught up.
//! Stopping a job lets a run in progress finish.

use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::debug;

const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Handle to a scheduled job. Dropping the handle stops the job as well.
pub struct JobHandle {
    name: String,
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl JobHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Cancel future ticks. A run already in progress is not interrupted.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    /// Stop and wait until the job loop has exited.
    pub async fn shutdown(self) {
        self.stop();
        let _ = self.task.await;
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Run `task` every `interval`, first run immediately when `fire_now` is set.
///
/// Must be called from within a tokio runtime.
pub fn schedule<F, Fut>(name: &str, interval: Duration, fire_now: bool, mut task: F) -> JobHandle
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let interval = interval.max(MIN_INTERVAL);
    let (stop_tx, mut stop_rx) = watch::channel(false);
    let job_name = name.to_string();

    let handle = tokio::spawn(async move {
        let start = if fire_now {
            Instant::now()
        } else {
            Instant::now() + interval
        };
        let mut ticker = interval_at(start, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                // Err means the handle was dropped, which also stops the job.
                _ = stop_rx.changed() => break,
                _ = ticker.tick() => {
                    debug!(job = %job_name, "Running scheduled job");
                    task().await;
                }
            }
        }
        debug!(job = %job_name, "Scheduled job stopped");
    });

    JobHandle {
        name: name.to_string(),
        stop_tx,
        task: handle,
    }
}
