// medflow-orders/src/queue/tasks.rs

//! The service's task kinds: payloads, constructors and handlers.

use super::worker::{TaskHandler, TaskRouter};
use super::{NewTask, Task, TaskError};
use crate::errors::Result as AppResult;
use crate::pipelines::contexts::{ConfirmOrderCtxData, ProcessOrderCtxData};
use crate::services::payment_proof::ImageFormat;
use crate::state::AppState;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use medflow::ContextData;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const PROCESS_ORDER: &str = "process_order";
pub const CONFIRM_ORDER: &str = "confirm_order";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessOrderPayload {
  pub order_id: i64,
  pub user_id: i64,
  pub content_type: String,
  /// Base64 of the image bytes.
  pub image: String,
}

impl ProcessOrderPayload {
  pub fn new(order_id: i64, user_id: i64, format: ImageFormat, bytes: &[u8]) -> Self {
    Self {
      order_id,
      user_id,
      content_type: format.content_type().to_string(),
      image: STANDARD.encode(bytes),
    }
  }

  pub fn decode_image(&self) -> Result<(ImageFormat, Vec<u8>), TaskError> {
    let format = ImageFormat::from_content_type(&self.content_type)
      .ok_or_else(|| TaskError::Permanent(format!("unsupported content type '{}'", self.content_type)))?;
    let bytes = STANDARD
      .decode(&self.image)
      .map_err(|e| TaskError::Permanent(format!("image is not valid base64: {}", e)))?;
    Ok((format, bytes))
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmOrderPayload {
  pub order_ids: Vec<i64>,
}

impl NewTask {
  pub fn process_order(payload: &ProcessOrderPayload) -> AppResult<Self> {
    NewTask::new(PROCESS_ORDER, payload)
  }

  pub fn confirm_orders(order_ids: Vec<i64>) -> AppResult<Self> {
    NewTask::new(CONFIRM_ORDER, &ConfirmOrderPayload { order_ids })
  }
}

/// Uploads a payment proof and moves the order to PROCESSED.
pub struct ProcessOrderTask {
  state: AppState,
}

#[async_trait]
impl TaskHandler for ProcessOrderTask {
  async fn handle(&self, task: &Task) -> Result<(), TaskError> {
    let payload: ProcessOrderPayload = task.payload_as()?;
    let (format, image) = payload.decode_image()?;
    let ctx = ProcessOrderCtxData::new(self.state.clone(), payload.order_id, payload.user_id, format, image);
    self.state.flows.run(ContextData::new(ctx)).await?;
    Ok(())
  }
}

/// Confirms orders still SENT once the buyer's confirmation window has passed.
pub struct ConfirmOrderTask {
  state: AppState,
}

#[async_trait]
impl TaskHandler for ConfirmOrderTask {
  async fn handle(&self, task: &Task) -> Result<(), TaskError> {
    let payload: ConfirmOrderPayload = task.payload_as()?;
    let ctx = ConfirmOrderCtxData::new(self.state.clone(), payload.order_ids);
    self.state.flows.run(ContextData::new(ctx)).await?;
    Ok(())
  }
}

pub fn build_router(state: &AppState) -> TaskRouter {
  let mut router = TaskRouter::new();
  router
    .register(PROCESS_ORDER, Arc::new(ProcessOrderTask { state: state.clone() }))
    .register(CONFIRM_ORDER, Arc::new(ConfirmOrderTask { state: state.clone() }));
  router
}
