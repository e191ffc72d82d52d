// medflow-orders/src/pipelines/task_pipeline.rs

//! Pipelines run by queued tasks. Both may see the same task more than once
//! and must leave the same end state every time.

use crate::db::{OrderLedger, UnitOfWork};
use crate::errors::{AppError, Result as AppResult};
use crate::models::OrderStatus;
use crate::pipelines::common_steps;
use crate::pipelines::contexts::{put_uow, take_uow, ConfirmOrderCtxData, ProcessOrderCtxData};
use crate::services::payment_proof::proof_key;
use medflow::{ContextData, FlowRegistry, Pipeline, PipelineControl};
use tracing::{info, instrument};

pub fn register_process_order_pipeline(registry: &FlowRegistry<AppError>) {
  let mut p = Pipeline::<ProcessOrderCtxData, AppError>::new(&[
    ("load_order", false, None),
    ("upload_proof", false, None),
    ("open_unit_of_work", false, None),
    ("attach_proof", false, None),
    ("mark_processed", false, None),
    ("commit", false, None),
  ])
  .with_name("process_order");

  p.on("load_order", load_order);
  p.on("upload_proof", upload_proof);
  p.on("open_unit_of_work", common_steps::open_unit_of_work::<ProcessOrderCtxData>);
  p.on("attach_proof", attach_proof);
  p.on("mark_processed", mark_processed);
  p.on("commit", common_steps::commit_unit_of_work::<ProcessOrderCtxData>);
  p.on_failure(common_steps::rollback_on_failure::<ProcessOrderCtxData>);

  registry.register(p);
}

/// Stops early for orders already past PROCESSED: a late redelivery has nothing left to do.
#[instrument(skip_all, err)]
async fn load_order(ctx_data: ContextData<ProcessOrderCtxData>) -> AppResult<PipelineControl> {
  let (store, order_id, user_id) = ctx_data.with(|ctx| (ctx.app_state.store.clone(), ctx.order_id, ctx.user_id));
  let order = store
    .find_order(order_id)
    .await?
    .filter(|o| o.user_id == user_id)
    .ok_or_else(|| AppError::NotFound(format!("order {} of user {} not found", order_id, user_id)))?;

  match order.status {
    OrderStatus::Waiting | OrderStatus::Processed => {
      ctx_data.write().order = Some(order);
      Ok(PipelineControl::Continue)
    }
    OrderStatus::Sent | OrderStatus::Confirmed => {
      info!(order_id, status = %order.status, "Order already moved on, nothing to process.");
      Ok(PipelineControl::Stop)
    }
    OrderStatus::Cancelled => Err(AppError::Conflict(format!("order {} was cancelled", order_id))),
  }
}

#[instrument(skip_all, err)]
async fn upload_proof(ctx_data: ContextData<ProcessOrderCtxData>) -> AppResult<PipelineControl> {
  let (objects, key, content_type, image) = ctx_data.with(|ctx| {
    (
      ctx.app_state.objects.clone(),
      proof_key(ctx.order_id, ctx.format),
      ctx.format.content_type(),
      ctx.image.clone(),
    )
  });
  let url = objects.upload(&key, &image, content_type).await?;
  ctx_data.write().proof_url = Some(url);
  Ok(PipelineControl::Continue)
}

/// Stops like `load_order` does when the order moved on while the proof was uploading.
#[instrument(skip_all, err)]
async fn attach_proof(ctx_data: ContextData<ProcessOrderCtxData>) -> AppResult<PipelineControl> {
  let (order_id, user_id, url) = ctx_data.with(|ctx| (ctx.order_id, ctx.user_id, ctx.proof_url.clone()));
  let url = url.ok_or_else(|| AppError::Internal("proof was not uploaded".to_string()))?;

  let mut uow = take_uow(&ctx_data)?;
  let refused = attach_or_current_status(uow.as_mut(), order_id, user_id, &url).await;
  match refused {
    Ok(Some(status @ (OrderStatus::Sent | OrderStatus::Confirmed))) => {
      uow.rollback().await?;
      info!(order_id, %status, "Order moved on during the upload, nothing to process.");
      Ok(PipelineControl::Stop)
    }
    Ok(Some(status)) => {
      put_uow(&ctx_data, uow);
      Err(AppError::Conflict(format!(
        "order {} is {} and no longer accepts a payment proof",
        order_id, status
      )))
    }
    Ok(None) => {
      put_uow(&ctx_data, uow);
      Ok(PipelineControl::Continue)
    }
    Err(e) => {
      put_uow(&ctx_data, uow);
      Err(e)
    }
  }
}

/// `None` once the proof is attached, otherwise the status that refused it.
async fn attach_or_current_status(
  uow: &mut dyn UnitOfWork,
  order_id: i64,
  user_id: i64,
  url: &str,
) -> AppResult<Option<OrderStatus>> {
  if uow.attach_payment_proof(order_id, user_id, url).await? {
    return Ok(None);
  }
  let order = uow
    .lock_orders(&[order_id])
    .await?
    .pop()
    .filter(|o| o.user_id == user_id)
    .ok_or_else(|| AppError::NotFound(format!("order {} of user {} not found", order_id, user_id)))?;
  Ok(Some(order.status))
}

#[instrument(skip_all, err)]
async fn mark_processed(ctx_data: ContextData<ProcessOrderCtxData>) -> AppResult<PipelineControl> {
  let order_id = ctx_data.read().order_id;
  let mut uow = take_uow(&ctx_data)?;
  let outcome = move_to_processed(uow.as_mut(), order_id).await;
  put_uow(&ctx_data, uow);
  ctx_data.write().marked_processed = outcome?;
  Ok(PipelineControl::Continue)
}

/// `Ok(false)` when the order was already PROCESSED.
async fn move_to_processed(uow: &mut dyn UnitOfWork, order_id: i64) -> AppResult<bool> {
  let order = uow
    .lock_orders(&[order_id])
    .await?
    .pop()
    .ok_or_else(|| AppError::NotFound(format!("order {} not found", order_id)))?;
  if order.status == OrderStatus::Processed {
    return Ok(false);
  }
  order
    .status
    .check_transition(OrderStatus::Processed)
    .map_err(|source| AppError::InvalidTransition { order_id, source })?;
  if order.payment_image_url.is_none() {
    return Err(AppError::Conflict(format!("order {} has no payment proof", order_id)));
  }
  let affected = uow
    .transition_orders(&[order_id], &[order.status], OrderStatus::Processed)
    .await?;
  if affected != 1 {
    return Err(AppError::StaleTransition { expected: 1, affected });
  }
  Ok(true)
}

pub fn register_confirm_order_pipeline(registry: &FlowRegistry<AppError>) {
  let mut p = Pipeline::<ConfirmOrderCtxData, AppError>::new(&[
    ("open_unit_of_work", false, None),
    ("confirm_sent", false, None),
    ("commit", false, None),
  ])
  .with_name("confirm_order");

  p.on("open_unit_of_work", common_steps::open_unit_of_work::<ConfirmOrderCtxData>);
  // Orders the buyer confirmed (or that were never sent) simply do not match.
  p.on("confirm_sent", |ctx_data: ContextData<ConfirmOrderCtxData>| async move {
    let order_ids = ctx_data.read().order_ids.clone();
    let mut uow = take_uow(&ctx_data)?;
    let confirmed = uow
      .transition_orders(&order_ids, &[OrderStatus::Sent], OrderStatus::Confirmed)
      .await;
    put_uow(&ctx_data, uow);
    let confirmed = confirmed?;
    info!(orders = ?order_ids, confirmed, "Auto-confirmed sent orders.");
    ctx_data.write().confirmed = confirmed;
    Ok::<_, AppError>(PipelineControl::Continue)
  });
  p.on("commit", common_steps::commit_unit_of_work::<ConfirmOrderCtxData>);
  p.on_failure(common_steps::rollback_on_failure::<ConfirmOrderCtxData>);

  registry.register(p);
}
