//! Background work spawned off the receive loop.

use std::future::Future;
use std::mem;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{info, warn};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub completed: usize,
    pub abandoned: usize,
}

/// Tracks event and filing tasks so shutdown can wait for them.
#[derive(Clone, Default)]
pub struct InFlightTasks {
    tasks: Arc<Mutex<JoinSet<()>>>,
}

impl InFlightTasks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut tasks = self.lock();
        while let Some(finished) = tasks.try_join_next() {
            if let Err(error) = finished {
                if error.is_panic() {
                    warn!(event_name = "tasks.panicked", error = %error, "background task panicked");
                }
            }
        }
        tasks.spawn(task);
    }

    /// Number of tasks not yet reaped. Finished tasks linger until the next
    /// spawn or drain.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Waits up to `grace` for every tracked task, then aborts the rest.
    pub async fn drain(&self, grace: Duration) -> DrainReport {
        let mut tasks = mem::take(&mut *self.lock());
        let outstanding = tasks.len();
        if outstanding == 0 {
            return DrainReport::default();
        }

        info!(
            event_name = "system.shutdown.draining",
            outstanding,
            grace_secs = grace.as_secs(),
            "waiting for in-flight tasks"
        );

        let mut completed = 0;
        let waited = tokio::time::timeout(grace, async {
            while tasks.join_next().await.is_some() {
                completed += 1;
            }
        })
        .await;

        let mut abandoned = 0;
        if waited.is_err() {
            abandoned = tasks.len();
            tasks.abort_all();
            while tasks.join_next().await.is_some() {}
            warn!(
                event_name = "system.shutdown.abandoned",
                abandoned,
                "grace period elapsed; aborting in-flight tasks"
            );
        }

        DrainReport { completed, abandoned }
    }

    fn lock(&self) -> MutexGuard<'_, JoinSet<()>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
