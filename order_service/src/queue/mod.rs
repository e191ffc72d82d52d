// medflow-orders/src/queue/mod.rs

//! Durable, at-least-once task queue.
//!
//! A claimed task is leased to one worker for a while; if the worker dies
//! before completing, retrying or burying it, the lease runs out and another
//! worker picks it up. Handlers therefore have to tolerate redelivery.

pub mod memory;
pub mod postgres;
pub mod tasks;
pub mod worker;

use crate::errors::{AppError, ErrorKind, Result as AppResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub use memory::MemoryQueue;
pub use postgres::PgQueue;
pub use worker::{TaskHandler, TaskOutcome, TaskRouter, Worker};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
  Pending,
  Dead,
}

impl TaskState {
  pub fn as_str(&self) -> &'static str {
    match self {
      TaskState::Pending => "pending",
      TaskState::Dead => "dead",
    }
  }
}

impl FromStr for TaskState {
  type Err = AppError;

  fn from_str(s: &str) -> AppResult<Self> {
    match s {
      "pending" => Ok(TaskState::Pending),
      "dead" => Ok(TaskState::Dead),
      other => Err(AppError::Queue(format!("unknown task state '{}'", other))),
    }
  }
}

#[derive(Debug, Clone, Serialize)]
pub struct Task {
  pub id: i64,
  pub kind: String,
  pub payload: serde_json::Value,
  /// Deliveries so far, counting the current one once claimed.
  pub attempts: i32,
  pub max_attempts: i32,
  pub run_at: DateTime<Utc>,
  pub last_error: Option<String>,
  pub state: TaskState,
  pub created_at: DateTime<Utc>,
}

impl Task {
  /// A payload that does not parse will never parse, so it is a permanent failure.
  pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, TaskError> {
    serde_json::from_value(self.payload.clone())
      .map_err(|e| TaskError::Permanent(format!("malformed {} payload: {}", self.kind, e)))
  }

  pub fn attempts_exhausted(&self) -> bool {
    self.attempts >= self.max_attempts
  }
}

/// A task about to be enqueued.
#[derive(Debug, Clone)]
pub struct NewTask {
  pub kind: String,
  pub payload: serde_json::Value,
  /// How long to wait before the first delivery.
  pub delay: Duration,
}

impl NewTask {
  pub fn new<P: Serialize>(kind: impl Into<String>, payload: &P) -> AppResult<Self> {
    let kind = kind.into();
    let payload =
      serde_json::to_value(payload).map_err(|e| AppError::Queue(format!("cannot encode {} payload: {}", kind, e)))?;
    Ok(Self {
      kind,
      payload,
      delay: Duration::ZERO,
    })
  }

  pub fn with_delay(mut self, delay: Duration) -> Self {
    self.delay = delay;
    self
  }
}

/// How a handler failed, which decides between another delivery and the dead-letter list.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
  /// Infrastructure trouble; worth another attempt.
  #[error("transient failure: {0}")]
  Retry(String),
  /// The task can never succeed.
  #[error("permanent failure: {0}")]
  Permanent(String),
}

impl From<AppError> for TaskError {
  fn from(err: AppError) -> Self {
    match err.kind() {
      ErrorKind::Server => TaskError::Retry(err.to_string()),
      _ => TaskError::Permanent(err.to_string()),
    }
  }
}

/// Exponential backoff: `base * 2^(attempt - 1)`, never more than `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
  pub base: Duration,
  pub max: Duration,
}

impl RetryPolicy {
  pub fn new(base: Duration, max: Duration) -> Self {
    Self { base, max }
  }

  pub fn backoff(&self, attempt: i32) -> Duration {
    let exponent = attempt.saturating_sub(1).clamp(0, 31) as u32;
    self
      .base
      .checked_mul(1u32 << exponent)
      .map_or(self.max, |delay| delay.min(self.max))
  }
}

#[async_trait]
pub trait TaskQueue: Send + Sync {
  /// Stores the task and returns its id.
  async fn enqueue(&self, task: NewTask) -> AppResult<i64>;

  /// Leases the oldest due task, bumping its attempt count. `None` when nothing is due.
  async fn claim(&self) -> AppResult<Option<Task>>;

  // The three calls below settle one claimed delivery. Each returns `false`
  // and changes nothing once that delivery no longer holds the lease (the
  // task was re-claimed or already settled).

  /// Removes a successfully handled task.
  async fn complete(&self, delivery: &Task) -> AppResult<bool>;

  /// Releases the lease and schedules the next delivery.
  async fn retry(&self, delivery: &Task, error: &str, run_at: DateTime<Utc>) -> AppResult<bool>;

  /// Moves the task to the dead-letter list.
  async fn bury(&self, delivery: &Task, error: &str) -> AppResult<bool>;

  async fn dead_letters(&self) -> AppResult<Vec<Task>>;

  async fn pending(&self) -> AppResult<Vec<Task>>;
}
