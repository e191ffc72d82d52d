// medflow/src/pipeline/definition.rs

//! The `Pipeline<TData, Err>` struct and its construction.

use crate::core::handler::{FailureHook, Handler, Phase};
use crate::core::step::{SkipCondition, StepDef};
use crate::error::FlowError;
use std::collections::HashMap;

/// Handler lists of one step, by phase.
pub(crate) struct StepHandlers<TData, Err>
where
  TData: 'static + Send + Sync,
{
  pub(crate) before: Vec<Handler<TData, Err>>,
  pub(crate) on: Vec<Handler<TData, Err>>,
  pub(crate) after: Vec<Handler<TData, Err>>,
}

impl<TData, Err> StepHandlers<TData, Err>
where
  TData: 'static + Send + Sync,
{
  fn empty() -> Self {
    Self {
      before: Vec::new(),
      on: Vec::new(),
      after: Vec::new(),
    }
  }

  pub(crate) fn phase(&self, phase: Phase) -> &[Handler<TData, Err>] {
    match phase {
      Phase::Before => &self.before,
      Phase::On => &self.on,
      Phase::After => &self.after,
    }
  }

  pub(crate) fn phase_mut(&mut self, phase: Phase) -> &mut Vec<Handler<TData, Err>> {
    match phase {
      Phase::Before => &mut self.before,
      Phase::On => &mut self.on,
      Phase::After => &mut self.after,
    }
  }

  pub(crate) fn is_empty(&self) -> bool {
    self.before.is_empty() && self.on.is_empty() && self.after.is_empty()
  }
}

/// An ordered set of named steps run against a `ContextData<TData>`.
///
/// `Err` is the error type every handler of the pipeline resolves to. It must
/// be constructible from `FlowError` so that engine-level failures (a
/// non-optional step without handlers, say) come back in the caller's type.
pub struct Pipeline<TData, Err>
where
  TData: 'static + Send + Sync,
  Err: std::error::Error + From<FlowError> + Send + Sync + 'static,
{
  pub(crate) name: String,
  pub(crate) steps: Vec<StepDef<TData>>,
  pub(crate) handlers: HashMap<String, StepHandlers<TData, Err>>,
  pub(crate) failure_hooks: Vec<FailureHook<TData>>,
}

impl<TData, Err> Pipeline<TData, Err>
where
  TData: 'static + Send + Sync,
  Err: std::error::Error + From<FlowError> + Send + Sync + 'static,
{
  /// Creates a pipeline from `(step name, optional, skip_if)` tuples.
  pub fn new(step_defs: &[(&str, bool, Option<SkipCondition<TData>>)]) -> Self {
    let steps = step_defs
      .iter()
      .map(|(name, optional, skip_if)| StepDef::new(*name, *optional, skip_if.clone()))
      .collect();

    Self {
      name: std::any::type_name::<TData>().to_string(),
      steps,
      handlers: HashMap::new(),
      failure_hooks: Vec::new(),
    }
  }

  /// Names the pipeline for logs; defaults to the context type name.
  pub fn with_name(mut self, name: impl Into<String>) -> Self {
    self.name = name.into();
    self
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn step_names(&self) -> Vec<&str> {
    self.steps.iter().map(|s| s.name.as_str()).collect()
  }

  pub fn has_step(&self, step_name: &str) -> bool {
    self.steps.iter().any(|s| s.name == step_name)
  }

  /// Registering a handler for an unknown step is a wiring bug, not a runtime
  /// condition, so it panics at setup time.
  pub(crate) fn ensure_step_exists(&self, step_name: &str) {
    if !self.has_step(step_name) {
      panic!(
        "medflow setup error: step '{}' is not defined in pipeline '{}'.",
        step_name, self.name
      );
    }
  }

  pub(crate) fn push_handler(&mut self, step_name: &str, phase: Phase, handler: Handler<TData, Err>) {
    self.ensure_step_exists(step_name);
    self
      .handlers
      .entry(step_name.to_string())
      .or_insert_with(StepHandlers::empty)
      .phase_mut(phase)
      .push(handler);
  }
}
