// medflow-orders/src/pipelines/mod.rs

//! Defines and registers every medflow pipeline of the order service.

use crate::errors::AppError;
use medflow::FlowRegistry;

pub mod common_steps;
pub mod contexts;

pub mod place_order_pipeline;
pub mod status_pipeline;
pub mod task_pipeline;

use contexts::{BuyerCancel, CancelOrders, ConfirmReceipt, SendOrders};

/// Registers all pipelines. Called once while building the `AppState`.
pub fn register_all_pipelines(registry: &FlowRegistry<AppError>) {
  tracing::info!("Registering order pipelines...");

  place_order_pipeline::register_place_order_pipeline(registry);
  status_pipeline::register_status_pipeline::<SendOrders>(registry);
  status_pipeline::register_status_pipeline::<CancelOrders>(registry);
  status_pipeline::register_status_pipeline::<ConfirmReceipt>(registry);
  status_pipeline::register_status_pipeline::<BuyerCancel>(registry);
  task_pipeline::register_process_order_pipeline(registry);
  task_pipeline::register_confirm_order_pipeline(registry);

  tracing::info!(pipelines = registry.len(), "All order pipelines registered.");
}
