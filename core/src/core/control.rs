// medflow/src/core/control.rs

//! Flow-control signals returned by handlers and the outcome of a whole run.

/// Returned by a handler to tell the pipeline what to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineControl {
  /// Run the remaining handlers of this step, then the following steps.
  Continue,
  /// Halt immediately. No further handler of any step runs and failure hooks
  /// are NOT invoked; stopping is a normal outcome.
  Stop,
}

/// Outcome of a run that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineResult {
  /// Every non-skipped step ran to the end.
  Completed,
  /// A handler returned `PipelineControl::Stop`.
  Stopped,
}

impl PipelineResult {
  pub fn is_completed(&self) -> bool {
    matches!(self, PipelineResult::Completed)
  }
}
