// medflow-orders/src/models/order.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type as SqlxType};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, SqlxType)]
#[sqlx(type_name = "order_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
  Waiting,
  Processed,
  Sent,
  Confirmed,
  Cancelled,
}

/// Every legal `(from, to)` move. Anything not listed is rejected.
const TRANSITIONS: &[(OrderStatus, OrderStatus)] = &[
  (OrderStatus::Waiting, OrderStatus::Processed),
  (OrderStatus::Waiting, OrderStatus::Sent),
  (OrderStatus::Processed, OrderStatus::Sent),
  (OrderStatus::Sent, OrderStatus::Confirmed),
  (OrderStatus::Waiting, OrderStatus::Cancelled),
  (OrderStatus::Processed, OrderStatus::Cancelled),
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
  #[error("order is already {0}")]
  AlreadyInStatus(OrderStatus),
  #[error("order is {0}, which is final")]
  Terminal(OrderStatus),
  #[error("order cannot move from {from} to {to}")]
  NotAllowed { from: OrderStatus, to: OrderStatus },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown order status '{0}'")]
pub struct UnknownStatus(pub String);

impl OrderStatus {
  pub const ALL: [OrderStatus; 5] = [
    OrderStatus::Waiting,
    OrderStatus::Processed,
    OrderStatus::Sent,
    OrderStatus::Confirmed,
    OrderStatus::Cancelled,
  ];

  pub fn as_str(&self) -> &'static str {
    match self {
      OrderStatus::Waiting => "WAITING",
      OrderStatus::Processed => "PROCESSED",
      OrderStatus::Sent => "SENT",
      OrderStatus::Confirmed => "CONFIRMED",
      OrderStatus::Cancelled => "CANCELLED",
    }
  }

  pub fn is_terminal(&self) -> bool {
    matches!(self, OrderStatus::Confirmed | OrderStatus::Cancelled)
  }

  pub fn can_transition_to(self, to: OrderStatus) -> bool {
    TRANSITIONS.contains(&(self, to))
  }

  pub fn check_transition(self, to: OrderStatus) -> Result<(), TransitionError> {
    if self == to {
      return Err(TransitionError::AlreadyInStatus(self));
    }
    if self.is_terminal() {
      return Err(TransitionError::Terminal(self));
    }
    if !self.can_transition_to(to) {
      return Err(TransitionError::NotAllowed { from: self, to });
    }
    Ok(())
  }

  /// Statuses an order may be in for a move to `to`; used to pin guarded UPDATEs.
  pub fn sources_of(to: OrderStatus) -> Vec<OrderStatus> {
    TRANSITIONS
      .iter()
      .filter(|(_, target)| *target == to)
      .map(|(from, _)| *from)
      .collect()
  }
}

impl fmt::Display for OrderStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for OrderStatus {
  type Err = UnknownStatus;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    OrderStatus::ALL
      .into_iter()
      .find(|status| status.as_str().eq_ignore_ascii_case(s))
      .ok_or_else(|| UnknownStatus(s.to_string()))
  }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Order {
  pub id: i64,
  pub user_id: i64,
  pub pharmacy_id: i64,
  pub status: OrderStatus,
  pub voice_number: String,
  pub total_product_price: i64,
  pub ship_cost: i64,
  pub total_payment: i64,
  pub payment_image_url: Option<String>,
  pub description: String,
  pub recipient_name: String,
  pub phone: String,
  pub street: String,
  pub city: String,
  pub province: String,
  pub postal_code: String,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

/// Everything needed to insert an order row; ids and timestamps come from the store.
#[derive(Debug, Clone)]
pub struct NewOrder {
  pub user_id: i64,
  pub pharmacy_id: i64,
  pub voice_number: String,
  pub total_product_price: i64,
  pub ship_cost: i64,
  pub total_payment: i64,
  pub description: String,
  pub recipient_name: String,
  pub phone: String,
  pub street: String,
  pub city: String,
  pub province: String,
  pub postal_code: String,
}

/// `INV/<yyyymmdd>/<user>/<8 hex>`
pub fn generate_voice_number(user_id: i64, now: DateTime<Utc>) -> String {
  let suffix = uuid::Uuid::new_v4().simple().to_string();
  format!("INV/{}/{}/{}", now.format("%Y%m%d"), user_id, &suffix[..8])
}
