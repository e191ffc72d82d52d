// medflow-orders/src/models/order_line.rs

use serde::Serialize;
use sqlx::FromRow;

/// Immutable once written; `price` is the offer price at checkout time.
#[derive(Debug, Clone, Serialize, FromRow, PartialEq, Eq)]
pub struct OrderLine {
  pub id: i64,
  pub order_id: i64,
  pub offer_id: i64,
  pub quantity: i32,
  pub price: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewOrderLine {
  pub offer_id: i64,
  pub quantity: i32,
  pub price: i64,
}

impl NewOrderLine {
  pub fn subtotal(&self) -> i64 {
    self.price * i64::from(self.quantity)
  }
}
