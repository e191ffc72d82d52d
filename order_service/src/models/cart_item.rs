// medflow-orders/src/models/cart_item.rs

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Unique per `(user_id, offer_id)`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq, Eq)]
pub struct CartItem {
  pub id: i64,
  pub user_id: i64,
  pub offer_id: i64,
  pub quantity: i32,
}
