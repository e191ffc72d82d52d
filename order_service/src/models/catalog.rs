// medflow-orders/src/models/catalog.rs

//! Rows owned by the catalog, pharmacy and profile services. Checkout reads
//! them and only ever writes the stock and sold counters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq, Eq)]
pub struct Pharmacy {
  pub id: i64,
  pub pharmacist_id: i64,
  pub name: String,
  pub is_active: bool,
  pub city: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq, Eq)]
pub struct Product {
  pub id: i64,
  pub name: String,
  pub sold_amount: i64,
}

/// A pharmacy's listing of a product. `stock_quantity` never drops below zero.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq, Eq)]
pub struct Offer {
  pub id: i64,
  pub pharmacy_id: i64,
  pub product_id: i64,
  pub stock_quantity: i32,
  pub price: i64,
  pub sold_amount: i64,
  pub is_active: bool,
  pub stock_last_manual_update_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq, Eq)]
pub struct Address {
  pub id: i64,
  pub user_id: i64,
  pub recipient_name: String,
  pub phone: String,
  pub street: String,
  pub city: String,
  pub province: String,
  pub postal_code: String,
}
