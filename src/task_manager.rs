//! Lifecycle of the background loops (sensor sampling, disk standby).

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use log::{debug, error, info, warn};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Time given to every loop to notice cancellation at shutdown.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Owns the spawned loops and the token that stops them.
///
/// Every task gets a child of the global token: cancelling the global token
/// stops all of them, a task ending on its own (a sensor that fail-stops)
/// leaves the others running.
pub struct TaskManager {
    tasks: HashMap<String, JoinHandle<Result<()>>>,
    pub global_token: CancellationToken,
}

impl TaskManager {
    pub fn new() -> Self {
        Self {
            tasks: HashMap::new(),
            global_token: CancellationToken::new(),
        }
    }

    /// Spawns a named task. Names must be unique.
    pub async fn spawn_task<F, Fut>(&mut self, name: String, task_fn: F) -> Result<()>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        if self.tasks.contains_key(&name) {
            bail!("Task '{name}' already exists");
        }

        let token = self.global_token.child_token();
        let task_name = name.clone();
        let handle = tokio::spawn(async move {
            debug!("Starting task: {task_name}");
            let result = task_fn(token).await;
            match &result {
                Ok(()) => debug!("Task '{task_name}' completed"),
                Err(e) => error!("Task '{task_name}' stopped: {e:#}"),
            }
            result
        });

        self.tasks.insert(name, handle);
        Ok(())
    }

    /// Cancels every task and waits for them.
    ///
    /// Tasks that already failed are only logged: their failure was
    /// reported when it happened. Returns an error when a task panicked or
    /// did not stop within [`SHUTDOWN_TIMEOUT`].
    pub async fn shutdown_all(&mut self) -> Result<()> {
        info!("Stopping all {} tasks", self.tasks.len());
        self.global_token.cancel();

        let mut first_error = None;
        for (name, handle) in self.tasks.drain() {
            match tokio::time::timeout(SHUTDOWN_TIMEOUT, handle).await {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(e))) => {
                    warn!("Task '{name}' had failed: {e:#}");
                }
                Ok(Err(e)) => {
                    let error = anyhow::anyhow!("Task '{name}' panicked: {e}");
                    error!("{error}");
                    first_error.get_or_insert(error);
                }
                Err(_) => {
                    let error = anyhow::anyhow!("Task '{name}' did not stop in time");
                    error!("{error}");
                    first_error.get_or_insert(error);
                }
            }
        }

        if let Some(error) = first_error {
            Err(error).context("One or more tasks failed during shutdown")
        } else {
            info!("All tasks stopped");
            Ok(())
        }
    }

    /// Number of tasks still running.
    pub fn running_count(&self) -> usize {
        self.tasks.values().filter(|h| !h.is_finished()).count()
    }

    #[cfg(test)]
    pub fn active_count(&self) -> usize {
        self.tasks.len()
    }

    #[cfg(test)]
    pub fn is_running(&self, name: &str) -> bool {
        self.tasks.get(name).is_some_and(|h| !h.is_finished())
    }
}

impl Default for TaskManager {
    fn default() -> Self {
        Self::new()
    }
}
