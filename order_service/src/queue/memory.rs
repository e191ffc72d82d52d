// medflow-orders/src/queue/memory.rs

use super::{NewTask, Task, TaskQueue, TaskState};
use crate::errors::{AppError, Result as AppResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::time::Duration;

struct Entry {
  task: Task,
  locked_until: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct Inner {
  entries: BTreeMap<i64, Entry>,
  next_id: i64,
}

/// Queue kept in process memory. Same lease and ordering rules as the Postgres queue.
pub struct MemoryQueue {
  inner: Mutex<Inner>,
  max_attempts: i32,
  lease: chrono::Duration,
}

impl MemoryQueue {
  pub fn new(max_attempts: i32, lease: Duration) -> Self {
    Self {
      inner: Mutex::new(Inner::default()),
      max_attempts,
      lease: chrono::Duration::from_std(lease).unwrap_or_else(|_| chrono::Duration::seconds(60)),
    }
  }

  pub fn len(&self) -> usize {
    self.inner.lock().entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Makes every pending task due now; lets tests skip over backoff delays.
  pub fn make_all_due(&self) {
    let now = Utc::now();
    for entry in self.inner.lock().entries.values_mut() {
      if entry.task.state == TaskState::Pending {
        entry.task.run_at = now;
        entry.locked_until = None;
      }
    }
  }

  /// Runs `f` only while `delivery` still holds its lease.
  fn with_lease(&self, delivery: &Task, f: impl FnOnce(&mut Inner)) -> bool {
    let mut inner = self.inner.lock();
    let held = inner
      .entries
      .get(&delivery.id)
      .map_or(false, |e| e.task.attempts == delivery.attempts && e.locked_until.is_some());
    if held {
      f(&mut *inner);
    }
    held
  }

  fn tasks_in(&self, state: TaskState) -> Vec<Task> {
    self
      .inner
      .lock()
      .entries
      .values()
      .filter(|e| e.task.state == state)
      .map(|e| e.task.clone())
      .collect()
  }
}

#[async_trait]
impl TaskQueue for MemoryQueue {
  async fn enqueue(&self, new: NewTask) -> AppResult<i64> {
    let now = Utc::now();
    let delay = chrono::Duration::from_std(new.delay).map_err(|e| AppError::Queue(e.to_string()))?;
    let mut inner = self.inner.lock();
    inner.next_id += 1;
    let id = inner.next_id;
    let task = Task {
      id,
      kind: new.kind,
      payload: new.payload,
      attempts: 0,
      max_attempts: self.max_attempts,
      run_at: now + delay,
      last_error: None,
      state: TaskState::Pending,
      created_at: now,
    };
    inner.entries.insert(id, Entry { task, locked_until: None });
    Ok(id)
  }

  async fn claim(&self) -> AppResult<Option<Task>> {
    let now = Utc::now();
    let mut inner = self.inner.lock();
    let due = inner
      .entries
      .values_mut()
      .filter(|e| {
        e.task.state == TaskState::Pending && e.task.run_at <= now && e.locked_until.map_or(true, |until| until <= now)
      })
      .min_by_key(|e| (e.task.run_at, e.task.id));
    Ok(due.map(|entry| {
      entry.task.attempts += 1;
      entry.locked_until = Some(now + self.lease);
      entry.task.clone()
    }))
  }

  async fn complete(&self, delivery: &Task) -> AppResult<bool> {
    Ok(self.with_lease(delivery, |inner| {
      inner.entries.remove(&delivery.id);
    }))
  }

  async fn retry(&self, delivery: &Task, error: &str, run_at: DateTime<Utc>) -> AppResult<bool> {
    Ok(self.with_lease(delivery, |inner| {
      if let Some(entry) = inner.entries.get_mut(&delivery.id) {
        entry.task.run_at = run_at;
        entry.task.last_error = Some(error.to_string());
        entry.locked_until = None;
      }
    }))
  }

  async fn bury(&self, delivery: &Task, error: &str) -> AppResult<bool> {
    Ok(self.with_lease(delivery, |inner| {
      if let Some(entry) = inner.entries.get_mut(&delivery.id) {
        entry.task.state = TaskState::Dead;
        entry.task.last_error = Some(error.to_string());
        entry.locked_until = None;
      }
    }))
  }

  async fn dead_letters(&self) -> AppResult<Vec<Task>> {
    Ok(self.tasks_in(TaskState::Dead))
  }

  async fn pending(&self) -> AppResult<Vec<Task>> {
    Ok(self.tasks_in(TaskState::Pending))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn queue() -> MemoryQueue {
    MemoryQueue::new(3, Duration::from_secs(30))
  }

  fn task(kind: &str) -> NewTask {
    NewTask::new(kind, &json!({"n": 1})).unwrap()
  }

  #[tokio::test]
  async fn claims_in_due_order_and_leases() {
    let q = queue();
    let first = q.enqueue(task("a")).await.unwrap();
    let second = q.enqueue(task("b")).await.unwrap();
    q.enqueue(task("later").with_delay(Duration::from_secs(3600))).await.unwrap();

    let claimed = q.claim().await.unwrap().unwrap();
    assert_eq!(claimed.id, first);
    assert_eq!(claimed.attempts, 1);
    assert_eq!(q.claim().await.unwrap().unwrap().id, second);
    // the first two are leased, the third is not due yet
    assert!(q.claim().await.unwrap().is_none());
  }

  #[tokio::test]
  async fn retry_releases_the_lease() {
    let q = queue();
    let id = q.enqueue(task("a")).await.unwrap();
    let delivery = q.claim().await.unwrap().unwrap();
    assert!(q.retry(&delivery, "boom", Utc::now()).await.unwrap());

    let again = q.claim().await.unwrap().unwrap();
    assert_eq!(again.id, id);
    assert_eq!(again.attempts, 2);
    assert_eq!(again.last_error.as_deref(), Some("boom"));
  }

  #[tokio::test]
  async fn buried_tasks_are_dead_letters() {
    let q = queue();
    q.enqueue(task("a")).await.unwrap();
    let delivery = q.claim().await.unwrap().unwrap();
    assert!(q.bury(&delivery, "gone").await.unwrap());

    assert!(q.claim().await.unwrap().is_none());
    let dead = q.dead_letters().await.unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].state, TaskState::Dead);
    assert!(q.pending().await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn complete_removes_and_settled_tasks_are_left_alone() {
    let q = queue();
    q.enqueue(task("a")).await.unwrap();
    let delivery = q.claim().await.unwrap().unwrap();
    assert!(q.complete(&delivery).await.unwrap());
    assert!(q.is_empty());
    assert!(!q.bury(&delivery, "x").await.unwrap());
    assert!(q.dead_letters().await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn an_expired_delivery_cannot_settle_a_reclaimed_task() {
    let q = MemoryQueue::new(3, Duration::ZERO);
    let id = q.enqueue(task("a")).await.unwrap();
    let stale = q.claim().await.unwrap().unwrap();
    // zero lease: the task is claimable again at once
    let current = q.claim().await.unwrap().unwrap();
    assert_eq!((stale.id, current.id), (id, id));
    assert_eq!(current.attempts, 2);

    assert!(!q.complete(&stale).await.unwrap());
    assert!(!q.bury(&stale, "late").await.unwrap());
    assert_eq!(q.len(), 1);
    assert!(q.dead_letters().await.unwrap().is_empty());

    assert!(q.complete(&current).await.unwrap());
    assert!(q.is_empty());
  }
}
