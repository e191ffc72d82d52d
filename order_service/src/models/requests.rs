// medflow-orders/src/models/requests.rs

//! Inbound command payloads, validated before any pipeline touches the store.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use validator::{Validate, ValidationError};

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PlaceOrderRequest {
  pub address_id: i64,
  pub pharmacy_id: i64,
  #[serde(default)]
  #[validate(length(max = 500, message = "description must be at most 500 characters"))]
  pub description: String,
  #[validate(range(min = 0, message = "ship_cost must not be negative"))]
  pub ship_cost: i64,
  #[validate(length(min = 1, message = "at least one line is required"))]
  #[validate(custom(function = "unique_offers"))]
  #[validate(nested)]
  pub lines: Vec<OrderLineRequest>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct OrderLineRequest {
  pub offer_id: i64,
  #[validate(range(min = 1, message = "quantity must be at least 1"))]
  pub quantity: i32,
  #[validate(range(min = 0, message = "price must not be negative"))]
  pub price: i64,
}

fn unique_offers(lines: &[OrderLineRequest]) -> Result<(), ValidationError> {
  let mut seen = HashSet::new();
  if lines.iter().all(|line| seen.insert(line.offer_id)) {
    Ok(())
  } else {
    let mut err = ValidationError::new("duplicate_offer");
    err.message = Some("each offer may appear only once".into());
    Err(err)
  }
}

/// Batch status change issued by a pharmacist.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct OrderBatchRequest {
  #[validate(length(min = 1, max = 100, message = "between 1 and 100 order ids are required"))]
  pub order_ids: Vec<i64>,
}
