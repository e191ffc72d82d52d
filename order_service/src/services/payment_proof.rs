// medflow-orders/src/services/payment_proof.rs

//! Accepting a buyer's payment proof: sniff the image, check the order, queue the upload.

use crate::errors::{AppError, Result as AppResult};
use crate::models::OrderStatus;
use crate::queue::tasks::ProcessOrderPayload;
use crate::queue::NewTask;
use crate::state::AppState;
use tracing::{info, instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
  Jpeg,
  Png,
  Webp,
}

impl ImageFormat {
  /// Identifies the format from the leading magic bytes; the client's content type is not trusted.
  pub fn sniff(bytes: &[u8]) -> Option<Self> {
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
      Some(ImageFormat::Jpeg)
    } else if bytes.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
      Some(ImageFormat::Png)
    } else if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
      Some(ImageFormat::Webp)
    } else {
      None
    }
  }

  pub fn from_content_type(content_type: &str) -> Option<Self> {
    match content_type {
      "image/jpeg" => Some(ImageFormat::Jpeg),
      "image/png" => Some(ImageFormat::Png),
      "image/webp" => Some(ImageFormat::Webp),
      _ => None,
    }
  }

  pub fn content_type(&self) -> &'static str {
    match self {
      ImageFormat::Jpeg => "image/jpeg",
      ImageFormat::Png => "image/png",
      ImageFormat::Webp => "image/webp",
    }
  }

  pub fn extension(&self) -> &'static str {
    match self {
      ImageFormat::Jpeg => "jpg",
      ImageFormat::Png => "png",
      ImageFormat::Webp => "webp",
    }
  }
}

/// Same order, same key: a redelivered upload overwrites instead of piling up.
pub fn proof_key(order_id: i64, format: ImageFormat) -> String {
  format!("payment-proofs/order-{}.{}", order_id, format.extension())
}

pub fn check_image(bytes: &[u8], max_bytes: usize) -> AppResult<ImageFormat> {
  if bytes.is_empty() {
    return Err(AppError::validation("payment proof image is empty"));
  }
  if bytes.len() > max_bytes {
    return Err(AppError::validation(format!(
      "payment proof image is {} bytes, the limit is {}",
      bytes.len(),
      max_bytes
    )));
  }
  ImageFormat::sniff(bytes).ok_or_else(|| AppError::validation("payment proof must be a JPEG, PNG or WebP image"))
}

/// Validates the proof against the order and enqueues a `process_order` task. Returns the task id.
#[instrument(name = "payment_proof::submit", skip(state, bytes), fields(size = bytes.len()), err)]
pub async fn submit_payment_proof(state: &AppState, user_id: i64, order_id: i64, bytes: &[u8]) -> AppResult<i64> {
  let format = check_image(bytes, state.config.max_payment_proof_bytes)?;

  let order = state
    .store
    .find_order(order_id)
    .await?
    .filter(|o| o.user_id == user_id)
    .ok_or_else(|| AppError::NotFound(format!("order {} not found", order_id)))?;
  if order.status != OrderStatus::Waiting {
    return Err(AppError::Conflict(format!(
      "order {} is {}, payment proof can only be sent while WAITING",
      order_id, order.status
    )));
  }

  let payload = ProcessOrderPayload::new(order_id, user_id, format, bytes);
  let task_id = state.queue.enqueue(NewTask::process_order(&payload)?).await?;
  info!(order_id, task_id, "Payment proof queued for processing.");
  Ok(task_id)
}
