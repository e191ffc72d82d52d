// medflow/src/pipeline/hooks.rs

//! Handler and failure-hook registration.

use crate::core::context_data::ContextData;
use crate::core::control::PipelineControl;
use crate::core::handler::{FailureHook, Handler, Phase, StepFailure};
use crate::error::FlowError;
use crate::pipeline::definition::Pipeline;
use std::future::Future;
use tracing::{event, Level};

impl<TData, Err> Pipeline<TData, Err>
where
  TData: 'static + Send + Sync,
  Err: std::error::Error + From<FlowError> + Send + Sync + 'static,
{
  /// Adds a handler that runs before the step's `on` handlers.
  pub fn before<F, HandlerErr>(
    &mut self,
    step_name: &str,
    handler_fn: impl Fn(ContextData<TData>) -> F + Send + Sync + 'static,
  ) where
    F: Future<Output = Result<PipelineControl, HandlerErr>> + Send + 'static,
    HandlerErr: Into<Err> + Send + Sync + 'static,
  {
    self.add_handler(step_name, Phase::Before, handler_fn);
  }

  /// Adds a main handler for the step.
  pub fn on<F, HandlerErr>(
    &mut self,
    step_name: &str,
    handler_fn: impl Fn(ContextData<TData>) -> F + Send + Sync + 'static,
  ) where
    F: Future<Output = Result<PipelineControl, HandlerErr>> + Send + 'static,
    HandlerErr: Into<Err> + Send + Sync + 'static,
  {
    self.add_handler(step_name, Phase::On, handler_fn);
  }

  /// Adds a handler that runs after the step's `on` handlers.
  pub fn after<F, HandlerErr>(
    &mut self,
    step_name: &str,
    handler_fn: impl Fn(ContextData<TData>) -> F + Send + Sync + 'static,
  ) where
    F: Future<Output = Result<PipelineControl, HandlerErr>> + Send + 'static,
    HandlerErr: Into<Err> + Send + Sync + 'static,
  {
    self.add_handler(step_name, Phase::After, handler_fn);
  }

  /// Adds a hook that runs when any handler of any step fails.
  ///
  /// Hooks run in registration order.
  pub fn on_failure<F>(&mut self, hook_fn: impl Fn(ContextData<TData>, StepFailure) -> F + Send + Sync + 'static)
  where
    F: Future<Output = ()> + Send + 'static,
  {
    let hook: FailureHook<TData> = Box::new(move |ctx_data, failure| Box::pin(hook_fn(ctx_data, failure)));
    self.failure_hooks.push(hook);
    event!(Level::TRACE, pipeline = %self.name, "Failure hook registered.");
  }

  fn add_handler<F, HandlerErr>(
    &mut self,
    step_name: &str,
    phase: Phase,
    handler_fn: impl Fn(ContextData<TData>) -> F + Send + Sync + 'static,
  ) where
    F: Future<Output = Result<PipelineControl, HandlerErr>> + Send + 'static,
    HandlerErr: Into<Err> + Send + Sync + 'static,
  {
    let handler: Handler<TData, Err> = Box::new(move |ctx_data| {
      let fut = handler_fn(ctx_data);
      Box::pin(async move { fut.await.map_err(Into::into) })
    });
    self.push_handler(step_name, phase, handler);
    event!(Level::TRACE, pipeline = %self.name, step = step_name, %phase, "Handler registered.");
  }
}
