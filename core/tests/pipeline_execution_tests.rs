// tests/pipeline_execution_tests.rs
mod common;

use common::*;
use medflow::{ContextData, FlowError, Pipeline, PipelineControl, PipelineResult};
use serial_test::serial;
use std::sync::Arc;

fn checkout_steps() -> Pipeline<TestContext, TestError> {
  Pipeline::<TestContext, TestError>::new(&[("reserve", false, None), ("charge", false, None), ("ship", false, None)])
    .with_name("checkout")
}

#[tokio::test]
#[serial]
async fn steps_run_in_definition_order() {
  setup_tracing();
  let mut pipeline = checkout_steps();
  // handlers registered backwards; the step list decides
  pipeline.on("ship", create_simple_handler("ship", "[ship]"));
  pipeline.on("charge", create_simple_handler("charge", "[charge]"));
  pipeline.on("reserve", create_simple_handler("reserve", "[reserve]"));

  let ctx = ContextData::new(TestContext::default());
  assert_eq!(pipeline.run(ctx.clone()).await.unwrap(), PipelineResult::Completed);

  let data = ctx.read();
  assert_eq!(data.counter, 3);
  assert_eq!(data.message, "[reserve][charge][ship]");
  assert_eq!(data.steps_executed, vec!["reserve", "charge", "ship"]);
}

#[tokio::test]
#[serial]
async fn stop_ends_the_run_without_error() {
  setup_tracing();
  let mut pipeline = checkout_steps();
  pipeline.on("reserve", create_simple_handler("reserve", "R"));
  pipeline.on("charge", |ctx: ContextData<TestContext>| async move {
    ctx.write().steps_executed.push("charge".to_string());
    Ok::<PipelineControl, FlowError>(PipelineControl::Stop)
  });
  pipeline.on("ship", create_simple_handler("ship", "S"));

  let ctx = ContextData::new(TestContext::default());
  assert_eq!(pipeline.run(ctx.clone()).await.unwrap(), PipelineResult::Stopped);

  let data = ctx.read();
  assert_eq!(data.counter, 1);
  assert_eq!(data.steps_executed, vec!["reserve", "charge"]);
}

#[tokio::test]
#[serial]
async fn handler_can_stop_based_on_context() {
  setup_tracing();
  let mut pipeline = checkout_steps();
  for step in ["reserve", "charge", "ship"] {
    pipeline.on(step, create_simple_handler(step, step));
  }

  let ctx = ContextData::new(TestContext {
    should_stop_at: Some("reserve".to_string()),
    ..Default::default()
  });
  let result = pipeline.run(ctx.clone()).await.unwrap();

  assert!(!result.is_completed());
  assert_eq!(ctx.read().message, "reserve");
}

#[tokio::test]
#[serial]
async fn first_error_aborts_remaining_steps() {
  setup_tracing();
  let mut pipeline = checkout_steps();
  pipeline.on("reserve", create_simple_handler("reserve", "ok"));
  pipeline.on("charge", create_failing_handler("charge", "card declined"));
  pipeline.on("ship", create_simple_handler("ship", "never"));

  let ctx = ContextData::new(TestContext::default());
  let err = pipeline.run(ctx.clone()).await.unwrap_err();

  assert_eq!(err, TestError::Handler("card declined".to_string()));
  let data = ctx.read();
  assert_eq!(data.message, "ok");
  assert_eq!(data.steps_executed, vec!["reserve", "charge"]);
}

#[tokio::test]
#[serial]
async fn skip_condition_sees_earlier_writes() {
  setup_tracing();
  let mut pipeline = Pipeline::<TestContext, TestError>::new(&[
    ("reserve", false, None),
    (
      "restock_alert",
      false,
      Some(Arc::new(|ctx: ContextData<TestContext>| ctx.read().counter > 0)),
    ),
    ("ship", false, None),
  ]);
  pipeline.on("reserve", create_simple_handler("reserve", "R"));
  pipeline.on("restock_alert", create_simple_handler("restock_alert", "!"));
  pipeline.on("ship", create_simple_handler("ship", "S"));

  let ctx = ContextData::new(TestContext::default());
  assert_eq!(pipeline.run(ctx.clone()).await.unwrap(), PipelineResult::Completed);
  assert_eq!(ctx.read().steps_executed, vec!["reserve", "ship"]);
}

#[tokio::test]
#[serial]
async fn skipped_step_needs_no_handler() {
  setup_tracing();
  let pipeline = Pipeline::<TestContext, TestError>::new(&[(
    "unwired",
    false,
    Some(Arc::new(|_: ContextData<TestContext>| true)),
  )]);
  let result = pipeline.run(ContextData::new(TestContext::default())).await;
  assert_eq!(result.unwrap(), PipelineResult::Completed);
}

#[tokio::test]
#[serial]
async fn required_step_without_handler_is_an_error() {
  setup_tracing();
  let pipeline = Pipeline::<TestContext, TestError>::new(&[("unwired", false, None)]);

  match pipeline.run(ContextData::new(TestContext::default())).await {
    Err(TestError::Flow(s)) => {
      assert!(s.contains("HandlerMissing"));
      assert!(s.contains("unwired"));
    }
    other => panic!("expected a missing-handler error, got {:?}", other),
  }
}

#[tokio::test]
#[serial]
async fn optional_step_without_handler_is_fine() {
  setup_tracing();
  let pipeline = Pipeline::<TestContext, TestError>::new(&[("notify", true, None)]);
  let result = pipeline.run(ContextData::new(TestContext::default())).await;
  assert_eq!(result.unwrap(), PipelineResult::Completed);
}

#[tokio::test]
#[serial]
async fn phases_run_before_on_after() {
  setup_tracing();
  let mut pipeline = Pipeline::<TestContext, TestError>::new(&[("commit", false, None)]);
  pipeline.after("commit", create_simple_handler("audit", "a"));
  pipeline.on("commit", create_simple_handler("commit", "c"));
  pipeline.before("commit", create_simple_handler("lock", "l"));

  let ctx = ContextData::new(TestContext::default());
  pipeline.run(ctx.clone()).await.unwrap();

  let data = ctx.read();
  assert_eq!(data.message, "lca");
  assert_eq!(data.steps_executed, vec!["lock", "commit", "audit"]);
}

#[tokio::test]
#[serial]
async fn handlers_within_a_phase_keep_registration_order() {
  setup_tracing();
  let mut pipeline = Pipeline::<TestContext, TestError>::new(&[("lines", false, None)]);
  pipeline.on("lines", create_simple_handler("line_1", "1"));
  pipeline.on("lines", create_simple_handler("line_2", "2"));
  pipeline.on("lines", create_simple_handler("line_3", "3"));

  let ctx = ContextData::new(TestContext::default());
  pipeline.run(ctx.clone()).await.unwrap();
  assert_eq!(ctx.read().message, "123");
}

#[test]
fn step_metadata_is_exposed() {
  let pipeline = checkout_steps();
  assert_eq!(pipeline.step_names(), vec!["reserve", "charge", "ship"]);
  assert_eq!(pipeline.name(), "checkout");
  assert!(pipeline.has_step("charge"));
  assert!(!pipeline.has_step("refund"));
}

#[test]
#[should_panic(expected = "step 'refund' is not defined")]
fn wiring_an_unknown_step_panics() {
  let mut pipeline = checkout_steps();
  pipeline.on("refund", create_simple_handler("refund", ""));
}
