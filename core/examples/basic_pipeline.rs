// medflow/examples/basic_pipeline.rs
//
// A reserve/charge/confirm flow whose failure hook gives the reservation back.

use medflow::{ContextData, FlowError, Pipeline, PipelineControl, PipelineResult, StepFailure};
use tracing::info;

#[derive(Clone, Debug, Default)]
struct ReservationContext {
  requested: u32,
  available: u32,
  reserved: u32,
  charge_fails: bool,
  log: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
enum DemoError {
  #[error("flow: {0}")]
  Flow(#[from] FlowError),
  #[error("not enough stock: wanted {wanted}, have {have}")]
  NotEnough { wanted: u32, have: u32 },
  #[error("payment declined")]
  Declined,
}

fn build() -> Pipeline<ReservationContext, DemoError> {
  let mut pipeline =
    Pipeline::<ReservationContext, DemoError>::new(&[("reserve", false, None), ("charge", false, None), ("confirm", true, None)])
      .with_name("reservation_demo");

  pipeline.on("reserve", |ctx: ContextData<ReservationContext>| async move {
    let mut data = ctx.write();
    if data.available < data.requested {
      return Err(DemoError::NotEnough {
        wanted: data.requested,
        have: data.available,
      });
    }
    data.available -= data.requested;
    data.reserved = data.requested;
    let entry = format!("reserved {}", data.reserved);
    data.log.push(entry);
    Ok(PipelineControl::Continue)
  });

  pipeline.on("charge", |ctx: ContextData<ReservationContext>| async move {
    if ctx.with(|d| d.charge_fails) {
      return Err(DemoError::Declined);
    }
    ctx.update(|d| d.log.push("charged".to_string()));
    Ok(PipelineControl::Continue)
  });

  pipeline.on_failure(|ctx: ContextData<ReservationContext>, failure: StepFailure| async move {
    let mut data = ctx.write();
    data.available += data.reserved;
    data.reserved = 0;
    data.log.push(format!("released after '{}' failed: {}", failure.step_name, failure.message));
  });

  pipeline
}

#[tokio::main]
async fn main() -> Result<(), DemoError> {
  tracing_subscriber::fmt().with_max_level(tracing::Level::INFO).init();
  let pipeline = build();

  let happy = ContextData::new(ReservationContext {
    requested: 3,
    available: 10,
    ..Default::default()
  });
  let result = pipeline.run(happy.clone()).await?;
  assert_eq!(result, PipelineResult::Completed);
  info!(log = ?happy.read().log, available = happy.read().available, "Happy path done.");

  let declined = ContextData::new(ReservationContext {
    requested: 3,
    available: 10,
    charge_fails: true,
    ..Default::default()
  });
  let err = pipeline.run(declined.clone()).await.unwrap_err();
  info!(error = %err, log = ?declined.read().log, "Declined path done.");
  assert_eq!(declined.read().available, 10);

  Ok(())
}
