// medflow/src/pipeline/execution.rs

//! `Pipeline::run()`: walks the steps in order and runs their handlers.

use crate::core::context_data::ContextData;
use crate::core::control::{PipelineControl, PipelineResult};
use crate::core::handler::{Phase, StepFailure};
use crate::error::FlowError;
use crate::pipeline::definition::Pipeline;
use tracing::{event, instrument, span, Instrument, Level};

const PHASES: [Phase; 3] = [Phase::Before, Phase::On, Phase::After];

impl<TData, Err> Pipeline<TData, Err>
where
  TData: 'static + Send + Sync,
  Err: std::error::Error + From<FlowError> + Send + Sync + 'static,
{
  /// Executes the pipeline against `ctx_data`.
  ///
  /// Steps run in definition order; within a step, `before` then `on` then
  /// `after` handlers, each list in registration order. A handler returning
  /// `PipelineControl::Stop` ends the run with `PipelineResult::Stopped`
  /// without invoking failure hooks. A handler error (or a non-optional step
  /// with no handlers) invokes every failure hook and is then returned.
  #[instrument(
    name = "Pipeline::run",
    skip_all,
    fields(pipeline = %self.name, num_steps = self.steps.len()),
    err(Display)
  )]
  pub async fn run(&self, ctx_data: ContextData<TData>) -> Result<PipelineResult, Err> {
    event!(Level::DEBUG, "Pipeline execution starting.");

    for (step_idx, step_def) in self.steps.iter().enumerate() {
      let step_name = step_def.name.as_str();
      let step_span = span!(
        Level::INFO,
        "pipeline_step",
        step_name = step_name,
        step_index = step_idx,
        optional = step_def.optional
      );

      if step_def.should_skip(&ctx_data) {
        event!(parent: &step_span, Level::INFO, "Step skipped by its skip condition.");
        continue;
      }

      let handlers = match self.handlers.get(step_name).filter(|h| !h.is_empty()) {
        Some(handlers) => handlers,
        None if step_def.optional => {
          event!(parent: &step_span, Level::DEBUG, "Optional step has no handlers, passing over.");
          continue;
        }
        None => {
          event!(parent: &step_span, Level::ERROR, "Non-optional step has no handlers.");
          let err = Err::from(FlowError::HandlerMissing {
            step_name: step_def.name.clone(),
          });
          self.fail(&ctx_data, step_name, Phase::On, &err).await;
          return Err(err);
        }
      };

      for phase in PHASES {
        for (handler_idx, handler_fn) in handlers.phase(phase).iter().enumerate() {
          let handler_span = span!(parent: &step_span, Level::DEBUG, "handler", %phase, handler_index = handler_idx);
          match handler_fn(ctx_data.clone()).instrument(handler_span).await {
            Ok(PipelineControl::Continue) => {}
            Ok(PipelineControl::Stop) => {
              event!(parent: &step_span, Level::INFO, %phase, "Pipeline stopped by handler.");
              return Ok(PipelineResult::Stopped);
            }
            Err(err) => {
              event!(parent: &step_span, Level::WARN, %phase, error = %err, "Handler failed.");
              self.fail(&ctx_data, step_name, phase, &err).await;
              return Err(err);
            }
          }
        }
      }
      event!(parent: &step_span, Level::DEBUG, "Step finished.");
    }

    event!(Level::DEBUG, "Pipeline execution completed.");
    Ok(PipelineResult::Completed)
  }

  async fn fail(&self, ctx_data: &ContextData<TData>, step_name: &str, phase: Phase, err: &Err) {
    if self.failure_hooks.is_empty() {
      return;
    }
    let failure = StepFailure {
      step_name: step_name.to_string(),
      phase,
      message: err.to_string(),
    };
    for hook in &self.failure_hooks {
      hook(ctx_data.clone(), failure.clone()).await;
    }
  }
}
