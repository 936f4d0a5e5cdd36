//! Detached background work whose outcome is only ever logged.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::error::Result;

/// Tracks fire-and-forget tasks so they can be drained at shutdown.
#[derive(Clone, Default)]
pub struct BackgroundTasks {
  tasks: Arc<Mutex<JoinSet<()>>>,
}

impl BackgroundTasks {
  pub fn new() -> Self {
    Self::default()
  }

  /// Spawn `task` without waiting for it. Errors are logged at debug level.
  pub fn spawn<F>(&self, label: &'static str, task: F)
  where
    F: Future<Output = Result<()>> + Send + 'static,
  {
    let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);

    // Reap whatever already finished
    while let Some(finished) = tasks.try_join_next() {
      log_join(finished);
    }

    tasks.spawn(async move {
      if let Err(e) = task.await {
        debug!(task = label, error = %e, "Background task failed");
      }
    });
  }

  /// Number of tasks not yet reaped.
  pub fn pending(&self) -> usize {
    self
      .tasks
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .len()
  }

  /// Wait for every task spawned so far.
  pub async fn drain(&self) {
    let mut tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
    while let Some(finished) = tasks.join_next().await {
      log_join(finished);
    }
  }
}

fn log_join(result: std::result::Result<(), tokio::task::JoinError>) {
  if let Err(e) = result {
    warn!(error = %e, "Background task panicked or was cancelled");
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::RelayError;
  use std::sync::atomic::{AtomicUsize, Ordering};

  #[tokio::test]
  async fn test_drain_waits_for_spawned_tasks() {
    let tasks = BackgroundTasks::new();
    let done = Arc::new(AtomicUsize::new(0));

    for _ in 0..3 {
      let done = Arc::clone(&done);
      tasks.spawn("count", async move {
        tokio::task::yield_now().await;
        done.fetch_add(1, Ordering::SeqCst);
        Ok(())
      });
    }

    tasks.drain().await;
    assert_eq!(done.load(Ordering::SeqCst), 3);
    assert_eq!(tasks.pending(), 0);
  }

  #[tokio::test]
  async fn test_failures_are_swallowed() {
    let tasks = BackgroundTasks::new();
    tasks.spawn("fail", async { Err(RelayError::NetworkFailure("down".to_string())) });
    tasks.drain().await;
  }
}
