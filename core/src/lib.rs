// src/lib.rs

//! medflow: an async, type-safe step pipeline engine.
//!
//! A pipeline is an ordered list of named steps run against one shared context
//! (`ContextData<TData>`). Every step can carry `before`, `on` and `after`
//! handlers; a handler either continues or stops the run, or fails it. When a
//! handler fails, the pipeline's failure hooks run before the error is handed
//! back to the caller, which is where the order services release their open
//! database transaction.
//!
//! Pipelines are registered in a [`FlowRegistry`], keyed by their context data
//! type, so callers only need to build the context and call `run`.

pub mod core;
pub mod error;
pub mod pipeline;
pub mod registry;

pub use crate::core::context_data::ContextData;
pub use crate::core::control::{PipelineControl, PipelineResult};
pub use crate::core::handler::{FailureHook, Handler, Phase, StepFailure};
pub use crate::core::step::{SkipCondition, StepDef};

pub use crate::pipeline::definition::Pipeline;

pub use crate::error::{FlowError, FlowResult};

pub use crate::registry::FlowRegistry;

/*
    Typical use:
    1. Define a context struct `MyCtx` holding the inputs, the collaborators the
       handlers need and the slots the steps fill in.
    2. Build a `Pipeline<MyCtx, MyError>` from `(name, optional, skip_if)` tuples.
    3. Attach handlers with `.on()`, `.before()`, `.after()`; attach cleanup with
       `.on_failure()`.
    4. Register the pipeline with a `FlowRegistry<MyError>`.
    5. Run: `registry.run(ContextData::new(my_ctx)).await`.
*/
