// medflow-orders/src/web/handlers/mod.rs

pub mod order_handlers;
pub mod pharmacy_handlers;
pub mod shipping_handlers;

use crate::errors::{AppError, Result as AppResult};
use crate::models::OrderStatus;
use crate::pipelines::contexts::{StatusChangeCtxData, TransitionKind};
use crate::state::AppState;
use medflow::{ContextData, PipelineResult};
use serde::Serialize;

/// Runs the pipeline registered for `T` and hands the finished context back.
pub(crate) async fn run_flow<T: Send + Sync + 'static>(state: &AppState, ctx: T) -> AppResult<ContextData<T>> {
  let ctx_data = ContextData::new(ctx);
  match state.flows.run(ctx_data.clone()).await? {
    PipelineResult::Completed => Ok(ctx_data),
    PipelineResult::Stopped => Err(AppError::PipelineHaltedByHandler),
  }
}

#[derive(Debug, Serialize)]
pub struct StatusChangeResponse {
  pub order_ids: Vec<i64>,
  pub status: OrderStatus,
  pub changed: u64,
  pub restored_lines: usize,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub confirmation_task_id: Option<i64>,
}

impl StatusChangeResponse {
  pub(crate) fn from_ctx<K: TransitionKind>(ctx: &StatusChangeCtxData<K>) -> Self {
    Self {
      order_ids: ctx.order_ids.clone(),
      status: K::TARGET,
      changed: ctx.changed,
      restored_lines: ctx.restored_lines,
      confirmation_task_id: ctx.confirmation_task_id,
    }
  }
}
