// medflow-orders/src/pipelines/common_steps.rs

//! Steps shared by every transactional pipeline: open the unit of work,
//! commit it, and roll it back when a later step fails.

use crate::errors::Result as AppResult;
use crate::pipelines::contexts::{take_uow, FlowContext};
use medflow::{ContextData, PipelineControl, StepFailure};
use tracing::{debug, error, instrument, warn};

#[instrument(name = "common_step::open_unit_of_work", skip_all, err)]
pub async fn open_unit_of_work<T: FlowContext>(ctx_data: ContextData<T>) -> AppResult<PipelineControl> {
  let store = ctx_data.with(|ctx| ctx.app_state().store.clone());
  let uow = store.begin().await?;
  ctx_data.with(|ctx| ctx.uow_slot().put(uow));
  debug!("Unit of work opened.");
  Ok(PipelineControl::Continue)
}

#[instrument(name = "common_step::commit", skip_all, err)]
pub async fn commit_unit_of_work<T: FlowContext>(ctx_data: ContextData<T>) -> AppResult<PipelineControl> {
  let uow = take_uow(&ctx_data)?;
  uow.commit().await?;
  debug!("Unit of work committed.");
  Ok(PipelineControl::Continue)
}

/// Failure hook: rolls back whatever unit of work the failed step left open.
pub async fn rollback_on_failure<T: FlowContext>(ctx_data: ContextData<T>, failure: StepFailure) {
  let open = ctx_data.with(|ctx| ctx.uow_slot().take_open());
  match open {
    Some(uow) => match uow.rollback().await {
      Ok(()) => warn!(step = %failure.step_name, reason = %failure.message, "Rolled back unit of work."),
      Err(e) => error!(step = %failure.step_name, error = %e, "Rollback failed; the transaction is dropped."),
    },
    None => debug!(step = %failure.step_name, reason = %failure.message, "Step failed with no open unit of work."),
  }
}
