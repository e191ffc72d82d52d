// medflow-orders/src/queue/postgres.rs

//! `tasks` table queue. Claims use `FOR UPDATE SKIP LOCKED` so concurrent
//! workers never block on, or double-claim, the same row.

use super::{NewTask, Task, TaskQueue, TaskState};
use crate::errors::{AppError, Result as AppResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use std::time::Duration;
use tracing::instrument;

const TASK_COLUMNS: &str = "id, kind, payload, attempts, max_attempts, run_at, last_error, state, created_at";

#[derive(FromRow)]
struct TaskRow {
  id: i64,
  kind: String,
  payload: serde_json::Value,
  attempts: i32,
  max_attempts: i32,
  run_at: DateTime<Utc>,
  last_error: Option<String>,
  state: String,
  created_at: DateTime<Utc>,
}

impl TryFrom<TaskRow> for Task {
  type Error = AppError;

  fn try_from(row: TaskRow) -> AppResult<Self> {
    Ok(Task {
      state: row.state.parse::<TaskState>()?,
      id: row.id,
      kind: row.kind,
      payload: row.payload,
      attempts: row.attempts,
      max_attempts: row.max_attempts,
      run_at: row.run_at,
      last_error: row.last_error,
      created_at: row.created_at,
    })
  }
}

#[derive(Clone)]
pub struct PgQueue {
  pool: PgPool,
  max_attempts: i32,
  lease: Duration,
}

impl PgQueue {
  pub fn new(pool: PgPool, max_attempts: i32, lease: Duration) -> Self {
    Self {
      pool,
      max_attempts,
      lease,
    }
  }

  async fn tasks_in(&self, state: TaskState) -> AppResult<Vec<Task>> {
    let sql = format!("SELECT {} FROM tasks WHERE state = $1 ORDER BY run_at, id", TASK_COLUMNS);
    sqlx::query_as::<_, TaskRow>(&sql)
      .bind(state.as_str())
      .fetch_all(&self.pool)
      .await?
      .into_iter()
      .map(Task::try_from)
      .collect()
  }
}

#[async_trait]
impl TaskQueue for PgQueue {
  #[instrument(skip(self, task), fields(kind = %task.kind), err)]
  async fn enqueue(&self, task: NewTask) -> AppResult<i64> {
    let id = sqlx::query_scalar::<_, i64>(
      "INSERT INTO tasks (kind, payload, max_attempts, run_at) \
       VALUES ($1, $2, $3, NOW() + make_interval(secs => $4)) RETURNING id",
    )
    .bind(&task.kind)
    .bind(&task.payload)
    .bind(self.max_attempts)
    .bind(task.delay.as_secs_f64())
    .fetch_one(&self.pool)
    .await?;
    Ok(id)
  }

  async fn claim(&self) -> AppResult<Option<Task>> {
    let sql = format!(
      "UPDATE tasks SET attempts = attempts + 1, locked_until = NOW() + make_interval(secs => $1) \
       WHERE id = ( \
         SELECT id FROM tasks \
         WHERE state = 'pending' AND run_at <= NOW() AND (locked_until IS NULL OR locked_until <= NOW()) \
         ORDER BY run_at, id \
         FOR UPDATE SKIP LOCKED \
         LIMIT 1 \
       ) RETURNING {}",
      TASK_COLUMNS
    );
    sqlx::query_as::<_, TaskRow>(&sql)
      .bind(self.lease.as_secs_f64())
      .fetch_optional(&self.pool)
      .await?
      .map(Task::try_from)
      .transpose()
  }

  async fn complete(&self, delivery: &Task) -> AppResult<bool> {
    let result = sqlx::query("DELETE FROM tasks WHERE id = $1 AND attempts = $2 AND locked_until IS NOT NULL")
      .bind(delivery.id)
      .bind(delivery.attempts)
      .execute(&self.pool)
      .await?;
    Ok(result.rows_affected() == 1)
  }

  async fn retry(&self, delivery: &Task, error: &str, run_at: DateTime<Utc>) -> AppResult<bool> {
    let result = sqlx::query(
      "UPDATE tasks SET run_at = $3, last_error = $4, locked_until = NULL \
       WHERE id = $1 AND attempts = $2 AND locked_until IS NOT NULL",
    )
    .bind(delivery.id)
    .bind(delivery.attempts)
    .bind(run_at)
    .bind(error)
    .execute(&self.pool)
    .await?;
    Ok(result.rows_affected() == 1)
  }

  async fn bury(&self, delivery: &Task, error: &str) -> AppResult<bool> {
    let result = sqlx::query(
      "UPDATE tasks SET state = 'dead', last_error = $3, locked_until = NULL \
       WHERE id = $1 AND attempts = $2 AND locked_until IS NOT NULL",
    )
    .bind(delivery.id)
    .bind(delivery.attempts)
    .bind(error)
    .execute(&self.pool)
    .await?;
    Ok(result.rows_affected() == 1)
  }

  async fn dead_letters(&self) -> AppResult<Vec<Task>> {
    self.tasks_in(TaskState::Dead).await
  }

  async fn pending(&self) -> AppResult<Vec<Task>> {
    self.tasks_in(TaskState::Pending).await
  }
}
