// medflow/src/core/handler.rs

//! Handler and failure-hook types.

use crate::core::context_data::ContextData;
use crate::core::control::PipelineControl;
use std::fmt;
use std::future::Future;
use std::pin::Pin;

/// A boxed, type-erased step handler.
///
/// Takes a clone of the pipeline's `ContextData<TData>` and resolves to
/// `Result<PipelineControl, Err>`. Handlers must release every lock guard
/// before their first `.await`.
pub type Handler<TData, Err> = Box<
  dyn Fn(ContextData<TData>) -> Pin<Box<dyn Future<Output = Result<PipelineControl, Err>> + Send>>
    + Send
    + Sync,
>;

/// Invoked once per failed run, after the failing handler returned its error
/// and before that error is returned from `Pipeline::run`.
///
/// Hooks cannot change the outcome; they release resources held in the
/// context (open transactions, reservations) and record what happened.
pub type FailureHook<TData> =
  Box<dyn Fn(ContextData<TData>, StepFailure) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Which handler list of a step is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
  Before,
  On,
  After,
}

impl fmt::Display for Phase {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let label = match self {
      Phase::Before => "before",
      Phase::On => "on",
      Phase::After => "after",
    };
    f.write_str(label)
  }
}

/// Where and why a run failed, handed to failure hooks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepFailure {
  pub step_name: String,
  pub phase: Phase,
  pub message: String,
}
