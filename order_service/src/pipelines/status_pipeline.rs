// medflow-orders/src/pipelines/status_pipeline.rs

//! Order status changes, one pipeline per [`TransitionKind`].
//!
//! The batch is all-or-nothing: ownership is checked before any row is
//! touched, every order is row-locked and checked against the transition
//! table, and the guarded UPDATE must hit exactly the locked rows.

use crate::db::{CatalogReader, OrderLedger, StockLedger, UnitOfWork};
use crate::errors::{AppError, Result as AppResult};
use crate::models::{Order, OrderLine, TransitionError};
use crate::pipelines::common_steps;
use crate::pipelines::contexts::{put_uow, take_uow, Actor, StatusChangeCtxData, TransitionKind};
use crate::queue::NewTask;
use medflow::{ContextData, FlowRegistry, Pipeline, PipelineControl, SkipCondition};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, instrument};

/// Upper bound on one batch.
pub const MAX_BATCH: usize = 100;

pub fn register_status_pipeline<K: TransitionKind>(registry: &FlowRegistry<AppError>) {
  let skip_unless = |enabled: bool| -> Option<SkipCondition<StatusChangeCtxData<K>>> {
    if enabled {
      return None;
    }
    let always: SkipCondition<StatusChangeCtxData<K>> = Arc::new(|_: ContextData<StatusChangeCtxData<K>>| true);
    Some(always)
  };

  let mut p = Pipeline::<StatusChangeCtxData<K>, AppError>::new(&[
    ("validate_request", false, None),
    ("open_unit_of_work", false, None),
    ("check_ownership", false, None),
    ("lock_orders", false, None),
    ("check_transitions", false, None),
    ("apply_transition", false, None),
    ("restore_stock", false, skip_unless(K::RESTORES_STOCK)),
    // Enqueued before commit: if the commit then fails, the task finds no SENT order and does nothing.
    ("schedule_confirmation", false, skip_unless(K::SCHEDULES_CONFIRMATION)),
    ("commit", false, None),
  ])
  .with_name(K::NAME);

  p.on("validate_request", validate_request::<K>);
  p.on("open_unit_of_work", common_steps::open_unit_of_work::<StatusChangeCtxData<K>>);
  p.on("check_ownership", check_ownership::<K>);
  p.on("lock_orders", lock_orders::<K>);
  p.on("check_transitions", check_transitions::<K>);
  p.on("apply_transition", apply_transition::<K>);
  p.on("restore_stock", restore_stock::<K>);
  p.on("schedule_confirmation", schedule_confirmation::<K>);
  p.on("commit", common_steps::commit_unit_of_work::<StatusChangeCtxData<K>>);
  p.after("commit", |ctx_data: ContextData<StatusChangeCtxData<K>>| async move {
    ctx_data.with(|ctx| {
      info!(
        flow = K::NAME,
        actor_id = ctx.actor_id,
        orders = ?ctx.order_ids,
        to = %K::TARGET,
        restored_lines = ctx.restored_lines,
        confirmation_task = ?ctx.confirmation_task_id,
        "Order status changed."
      )
    });
    Ok::<_, AppError>(PipelineControl::Continue)
  });

  p.on_failure(common_steps::rollback_on_failure::<StatusChangeCtxData<K>>);

  registry.register(p);
}

async fn validate_request<K: TransitionKind>(ctx_data: ContextData<StatusChangeCtxData<K>>) -> AppResult<PipelineControl> {
  let mut ctx = ctx_data.write();
  if ctx.order_ids.is_empty() {
    return Err(AppError::validation("at least one order id is required"));
  }
  if ctx.order_ids.len() > MAX_BATCH {
    return Err(AppError::validation(format!("at most {} orders can change at once", MAX_BATCH)));
  }
  if K::ACTOR == Actor::Pharmacist && ctx.pharmacy_id.is_none() {
    return Err(AppError::Internal(format!("{} needs a pharmacy", K::NAME)));
  }
  ctx.order_ids.sort_unstable();
  ctx.order_ids.dedup();
  Ok(PipelineControl::Continue)
}

/// Pharmacists may only touch their own pharmacy's orders. Buyer ownership is
/// checked per order in `lock_orders`.
#[instrument(skip_all, fields(flow = K::NAME), err)]
async fn check_ownership<K: TransitionKind>(ctx_data: ContextData<StatusChangeCtxData<K>>) -> AppResult<PipelineControl> {
  let (actor_id, pharmacy_id) = ctx_data.with(|ctx| (ctx.actor_id, ctx.pharmacy_id));
  let Some(pharmacy_id) = pharmacy_id else {
    return Ok(PipelineControl::Continue);
  };

  let mut uow = take_uow(&ctx_data)?;
  let found = uow.find_pharmacy(pharmacy_id).await;
  put_uow(&ctx_data, uow);

  let pharmacy = found?.ok_or_else(|| AppError::NotFound(format!("pharmacy {} not found", pharmacy_id)))?;
  if pharmacy.pharmacist_id != actor_id {
    return Err(AppError::Forbidden(format!(
      "user {} is not the pharmacist of pharmacy {}",
      actor_id, pharmacy_id
    )));
  }
  Ok(PipelineControl::Continue)
}

fn belongs_to_actor<K: TransitionKind>(order: &Order, actor_id: i64, pharmacy_id: Option<i64>) -> bool {
  match K::ACTOR {
    Actor::Pharmacist => Some(order.pharmacy_id) == pharmacy_id,
    Actor::Buyer => order.user_id == actor_id,
  }
}

#[instrument(skip_all, fields(flow = K::NAME), err)]
async fn lock_orders<K: TransitionKind>(ctx_data: ContextData<StatusChangeCtxData<K>>) -> AppResult<PipelineControl> {
  let (actor_id, pharmacy_id, order_ids) = ctx_data.with(|ctx| (ctx.actor_id, ctx.pharmacy_id, ctx.order_ids.clone()));

  let mut uow = take_uow(&ctx_data)?;
  let locked = uow.lock_orders(&order_ids).await;
  put_uow(&ctx_data, uow);

  let orders: Vec<Order> = locked?
    .into_iter()
    .filter(|o| belongs_to_actor::<K>(o, actor_id, pharmacy_id))
    .collect();
  let missing: Vec<i64> = order_ids
    .iter()
    .copied()
    .filter(|id| !orders.iter().any(|o| o.id == *id))
    .collect();
  if !missing.is_empty() {
    return Err(AppError::NotFound(format!("orders not found: {:?}", missing)));
  }
  ctx_data.write().orders = orders;
  Ok(PipelineControl::Continue)
}

fn check_order<K: TransitionKind>(order: &Order) -> AppResult<()> {
  let invalid = |source| AppError::InvalidTransition {
    order_id: order.id,
    source,
  };
  order.status.check_transition(K::TARGET).map_err(invalid)?;
  if !K::allowed_sources().contains(&order.status) {
    return Err(invalid(TransitionError::NotAllowed {
      from: order.status,
      to: K::TARGET,
    }));
  }
  if K::REQUIRES_PROOF && order.payment_image_url.is_none() {
    return Err(AppError::Conflict(format!("order {} has no payment proof", order.id)));
  }
  Ok(())
}

async fn check_transitions<K: TransitionKind>(ctx_data: ContextData<StatusChangeCtxData<K>>) -> AppResult<PipelineControl> {
  ctx_data.with(|ctx| ctx.orders.iter().try_for_each(check_order::<K>))?;
  Ok(PipelineControl::Continue)
}

#[instrument(skip_all, fields(flow = K::NAME), err)]
async fn apply_transition<K: TransitionKind>(ctx_data: ContextData<StatusChangeCtxData<K>>) -> AppResult<PipelineControl> {
  let (order_ids, expected) = ctx_data.with(|ctx| (ctx.order_ids.clone(), ctx.orders.len() as u64));

  let mut uow = take_uow(&ctx_data)?;
  let changed = uow.transition_orders(&order_ids, &K::allowed_sources(), K::TARGET).await;
  put_uow(&ctx_data, uow);

  let affected = changed?;
  if affected != expected {
    return Err(AppError::StaleTransition { expected, affected });
  }
  ctx_data.write().changed = affected;
  Ok(PipelineControl::Continue)
}

#[instrument(skip_all, fields(flow = K::NAME), err)]
async fn restore_stock<K: TransitionKind>(ctx_data: ContextData<StatusChangeCtxData<K>>) -> AppResult<PipelineControl> {
  let order_ids = ctx_data.read().order_ids.clone();
  let mut uow = take_uow(&ctx_data)?;
  let restored = restore_lines(uow.as_mut(), &order_ids).await;
  put_uow(&ctx_data, uow);
  ctx_data.write().restored_lines = restored?;
  Ok(PipelineControl::Continue)
}

async fn restore_lines(uow: &mut dyn UnitOfWork, order_ids: &[i64]) -> AppResult<usize> {
  let lines: Vec<OrderLine> = uow.order_lines(order_ids).await?;
  for (offer_id, quantity) in quantities_by_offer(&lines)? {
    uow.restore(offer_id, quantity).await?;
  }
  Ok(lines.len())
}

/// Sums line quantities per offer, ascending by offer id (the lock order
/// checkout uses as well).
fn quantities_by_offer(lines: &[OrderLine]) -> AppResult<BTreeMap<i64, i32>> {
  let mut totals = BTreeMap::new();
  for line in lines {
    let total: &mut i32 = totals.entry(line.offer_id).or_insert(0);
    *total = total
      .checked_add(line.quantity)
      .ok_or_else(|| AppError::Internal(format!("restored quantity of offer {} overflows", line.offer_id)))?;
  }
  Ok(totals)
}

#[instrument(skip_all, fields(flow = K::NAME), err)]
async fn schedule_confirmation<K: TransitionKind>(
  ctx_data: ContextData<StatusChangeCtxData<K>>,
) -> AppResult<PipelineControl> {
  let (queue, delay, order_ids) = ctx_data.with(|ctx| {
    (
      ctx.app_state.queue.clone(),
      ctx.app_state.config.auto_confirm_after,
      ctx.order_ids.clone(),
    )
  });
  let task_id = queue.enqueue(NewTask::confirm_orders(order_ids)?.with_delay(delay)).await?;
  ctx_data.write().confirmation_task_id = Some(task_id);
  Ok(PipelineControl::Continue)
}
