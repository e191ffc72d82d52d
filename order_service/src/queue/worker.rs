// medflow-orders/src/queue/worker.rs

use super::{RetryPolicy, Task, TaskError, TaskQueue};
use crate::errors::Result as AppResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn, Instrument};

#[async_trait]
pub trait TaskHandler: Send + Sync {
  async fn handle(&self, task: &Task) -> Result<(), TaskError>;
}

/// Maps task kinds to their handlers.
#[derive(Default, Clone)]
pub struct TaskRouter {
  handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl TaskRouter {
  pub fn new() -> Self {
    Self::default()
  }

  /// Registers `handler` for `kind`, replacing any earlier one.
  pub fn register(&mut self, kind: impl Into<String>, handler: Arc<dyn TaskHandler>) -> &mut Self {
    let kind = kind.into();
    debug!(%kind, "Registering task handler.");
    self.handlers.insert(kind, handler);
    self
  }

  pub fn handler(&self, kind: &str) -> Option<Arc<dyn TaskHandler>> {
    self.handlers.get(kind).cloned()
  }

  pub fn kinds(&self) -> Vec<&str> {
    let mut kinds: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
    kinds.sort_unstable();
    kinds
  }
}

/// What one pass of [`Worker::run_once`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
  /// Nothing was due.
  Idle,
  Completed { task_id: i64 },
  Retried { task_id: i64, run_at: DateTime<Utc> },
  Buried { task_id: i64, reason: String },
  /// The lease ran out before the result was recorded; a later delivery owns the task now.
  LeaseLost { task_id: i64 },
}

pub struct Worker {
  queue: Arc<dyn TaskQueue>,
  router: Arc<TaskRouter>,
  policy: RetryPolicy,
  poll_interval: Duration,
}

impl Worker {
  pub fn new(queue: Arc<dyn TaskQueue>, router: TaskRouter, policy: RetryPolicy, poll_interval: Duration) -> Self {
    Self {
      queue,
      router: Arc::new(router),
      policy,
      poll_interval,
    }
  }

  /// Claims at most one task, runs its handler and records the result.
  pub async fn run_once(&self) -> AppResult<TaskOutcome> {
    let Some(task) = self.queue.claim().await? else {
      return Ok(TaskOutcome::Idle);
    };
    let span = tracing::info_span!("task", task_id = task.id, kind = %task.kind, attempt = task.attempts);
    self.process(task).instrument(span).await
  }

  async fn process(&self, task: Task) -> AppResult<TaskOutcome> {
    let Some(handler) = self.router.handler(&task.kind) else {
      let reason = format!("no handler registered for task kind '{}'", task.kind);
      error!(%reason, "Burying task.");
      return self.bury(&task, reason).await;
    };

    match handler.handle(&task).await {
      Ok(()) => {
        if !self.queue.complete(&task).await? {
          return Ok(lease_lost(&task));
        }
        info!("Task completed.");
        Ok(TaskOutcome::Completed { task_id: task.id })
      }
      Err(TaskError::Retry(message)) if !task.attempts_exhausted() => {
        let delay = self.policy.backoff(task.attempts);
        let run_at = Utc::now() + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
        warn!(error = %message, ?delay, "Task failed, retrying later.");
        if !self.queue.retry(&task, &message, run_at).await? {
          return Ok(lease_lost(&task));
        }
        Ok(TaskOutcome::Retried { task_id: task.id, run_at })
      }
      Err(TaskError::Retry(message)) => {
        let reason = format!("gave up after {} attempts: {}", task.attempts, message);
        error!(%reason, "Task exhausted its attempts.");
        self.bury(&task, reason).await
      }
      Err(TaskError::Permanent(reason)) => {
        error!(%reason, "Task failed permanently.");
        self.bury(&task, reason).await
      }
    }
  }

  async fn bury(&self, task: &Task, reason: String) -> AppResult<TaskOutcome> {
    if !self.queue.bury(task, &reason).await? {
      return Ok(lease_lost(task));
    }
    Ok(TaskOutcome::Buried { task_id: task.id, reason })
  }

  /// Drains every due task; returns how many were handled.
  pub async fn drain(&self) -> AppResult<usize> {
    let mut handled = 0;
    while self.run_once().await? != TaskOutcome::Idle {
      handled += 1;
    }
    Ok(handled)
  }

  /// Spawns `workers` polling loops. Each stops after its current task once `shutdown` turns true.
  pub fn spawn(self: Arc<Self>, workers: usize, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
    info!(workers, kinds = ?self.router.kinds(), "Starting task workers.");
    (0..workers)
      .map(|worker_id| {
        let worker = Arc::clone(&self);
        let shutdown = shutdown.clone();
        tokio::spawn(async move { worker.poll_loop(worker_id, shutdown).await })
      })
      .collect()
  }

  #[instrument(name = "task_worker", skip(self, shutdown))]
  async fn poll_loop(&self, worker_id: usize, mut shutdown: watch::Receiver<bool>) {
    while !*shutdown.borrow() {
      let idle = match self.run_once().await {
        Ok(TaskOutcome::Idle) => true,
        Ok(_) => false,
        Err(e) => {
          error!(error = %e, "Task queue unavailable.");
          true
        }
      };
      if idle {
        tokio::select! {
          _ = tokio::time::sleep(self.poll_interval) => {}
          changed = shutdown.changed() => {
            if changed.is_err() {
              break;
            }
          }
        }
      }
    }
    info!("Task worker stopped.");
  }
}

fn lease_lost(task: &Task) -> TaskOutcome {
  warn!("Lease expired before the result was recorded; leaving the task to its current delivery.");
  TaskOutcome::LeaseLost { task_id: task.id }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::queue::{MemoryQueue, NewTask};
  use parking_lot::Mutex;
  use serde_json::json;

  /// Fails with the queued errors first, then succeeds.
  struct Scripted {
    failures: Mutex<Vec<TaskError>>,
    calls: Mutex<usize>,
  }

  impl Scripted {
    fn new(mut failures: Vec<TaskError>) -> Arc<Self> {
      failures.reverse();
      Arc::new(Self {
        failures: Mutex::new(failures),
        calls: Mutex::new(0),
      })
    }
  }

  #[async_trait]
  impl TaskHandler for Scripted {
    async fn handle(&self, _task: &Task) -> Result<(), TaskError> {
      *self.calls.lock() += 1;
      match self.failures.lock().pop() {
        Some(err) => Err(err),
        None => Ok(()),
      }
    }
  }

  fn worker(queue: Arc<MemoryQueue>, handler: Arc<Scripted>) -> Worker {
    let mut router = TaskRouter::new();
    router.register("job", handler);
    Worker::new(
      queue,
      router,
      RetryPolicy::new(Duration::from_secs(10), Duration::from_secs(25)),
      Duration::from_millis(10),
    )
  }

  #[tokio::test]
  async fn transient_failures_back_off_then_dead_letter() {
    let queue = Arc::new(MemoryQueue::new(3, Duration::from_secs(30)));
    let handler = Scripted::new(vec![
      TaskError::Retry("db down".into()),
      TaskError::Retry("db down".into()),
      TaskError::Retry("db down".into()),
    ]);
    let worker = worker(Arc::clone(&queue), Arc::clone(&handler));
    let id = queue.enqueue(NewTask::new("job", &json!({})).unwrap()).await.unwrap();

    let before = Utc::now();
    let TaskOutcome::Retried { run_at, .. } = worker.run_once().await.unwrap() else {
      panic!("expected a retry");
    };
    assert!(run_at >= before + chrono::Duration::seconds(10));
    assert_eq!(worker.run_once().await.unwrap(), TaskOutcome::Idle);

    queue.make_all_due();
    let TaskOutcome::Retried { run_at, .. } = worker.run_once().await.unwrap() else {
      panic!("expected a second retry");
    };
    assert!(run_at >= before + chrono::Duration::seconds(20));

    queue.make_all_due();
    assert!(matches!(worker.run_once().await.unwrap(), TaskOutcome::Buried { task_id, .. } if task_id == id));
    let dead = queue.dead_letters().await.unwrap();
    assert_eq!(dead.len(), 1);
    assert!(dead[0].last_error.as_deref().unwrap_or_default().contains("gave up after 3 attempts"));
    assert_eq!(*handler.calls.lock(), 3);
  }

  #[tokio::test]
  async fn permanent_failures_skip_retries() {
    let queue = Arc::new(MemoryQueue::new(5, Duration::from_secs(30)));
    let handler = Scripted::new(vec![TaskError::Permanent("order vanished".into())]);
    let worker = worker(Arc::clone(&queue), handler);
    queue.enqueue(NewTask::new("job", &json!({})).unwrap()).await.unwrap();

    assert!(matches!(worker.run_once().await.unwrap(), TaskOutcome::Buried { .. }));
    assert_eq!(queue.dead_letters().await.unwrap()[0].attempts, 1);
  }

  #[tokio::test]
  async fn retried_task_eventually_completes() {
    let queue = Arc::new(MemoryQueue::new(5, Duration::from_secs(30)));
    let handler = Scripted::new(vec![TaskError::Retry("upload timeout".into())]);
    let worker = worker(Arc::clone(&queue), handler);
    queue.enqueue(NewTask::new("job", &json!({})).unwrap()).await.unwrap();

    assert!(matches!(worker.run_once().await.unwrap(), TaskOutcome::Retried { .. }));
    queue.make_all_due();
    assert!(matches!(worker.run_once().await.unwrap(), TaskOutcome::Completed { .. }));
    assert!(queue.is_empty());
  }

  /// Re-claims its own task mid-run, as a second worker would after the lease ran out.
  struct Overtaken {
    queue: Arc<MemoryQueue>,
  }

  #[async_trait]
  impl TaskHandler for Overtaken {
    async fn handle(&self, task: &Task) -> Result<(), TaskError> {
      let again = self.queue.claim().await.unwrap().unwrap();
      assert_eq!(again.id, task.id);
      Ok(())
    }
  }

  #[tokio::test]
  async fn results_of_an_overtaken_delivery_are_dropped() {
    let queue = Arc::new(MemoryQueue::new(5, Duration::ZERO));
    let mut router = TaskRouter::new();
    router.register("job", Arc::new(Overtaken { queue: Arc::clone(&queue) }));
    let worker = Worker::new(
      Arc::clone(&queue) as Arc<dyn TaskQueue>,
      router,
      RetryPolicy::new(Duration::from_secs(10), Duration::from_secs(25)),
      Duration::from_millis(10),
    );
    let id = queue.enqueue(NewTask::new("job", &json!({})).unwrap()).await.unwrap();

    assert_eq!(worker.run_once().await.unwrap(), TaskOutcome::LeaseLost { task_id: id });
    // still there for the delivery that holds the lease
    assert_eq!(queue.len(), 1);
    assert_eq!(queue.pending().await.unwrap()[0].attempts, 2);
  }

  #[tokio::test]
  async fn unknown_kinds_are_buried() {
    let queue = Arc::new(MemoryQueue::new(5, Duration::from_secs(30)));
    let worker = worker(Arc::clone(&queue), Scripted::new(vec![]));
    queue.enqueue(NewTask::new("mystery", &json!({})).unwrap()).await.unwrap();

    assert!(matches!(worker.run_once().await.unwrap(), TaskOutcome::Buried { reason, .. } if reason.contains("mystery")));
  }

  #[tokio::test]
  async fn spawned_workers_drain_and_stop_on_shutdown() {
    let queue = Arc::new(MemoryQueue::new(5, Duration::from_secs(30)));
    let handler = Scripted::new(vec![]);
    let worker = Arc::new(worker(Arc::clone(&queue), Arc::clone(&handler)));
    for _ in 0..4 {
      queue.enqueue(NewTask::new("job", &json!({})).unwrap()).await.unwrap();
    }

    let (tx, rx) = watch::channel(false);
    let handles = worker.spawn(2, rx);
    for _ in 0..100 {
      if queue.is_empty() {
        break;
      }
      tokio::time::sleep(Duration::from_millis(10)).await;
    }
    tx.send(true).unwrap();
    for handle in handles {
      handle.await.unwrap();
    }
    assert!(queue.is_empty());
    assert_eq!(*handler.calls.lock(), 4);
  }
}
