// medflow-orders/src/db/mod.rs

//! Persistence seams. Every write path goes through a [`UnitOfWork`], which
//! wraps exactly one database transaction: `commit` makes its writes durable,
//! dropping it (or `rollback`) discards them.

pub mod memory;
pub mod postgres;

use crate::errors::Result;
use crate::models::{Address, CartItem, NewOrder, NewOrderLine, Offer, Order, OrderDetails, OrderLine, OrderStatus, Pharmacy};
use async_trait::async_trait;

pub use memory::{MemoryState, MemoryStore};
pub use postgres::PgStore;

/// Authoritative per-offer stock and sold counters.
#[async_trait]
pub trait StockLedger: Send {
  /// Point-in-time read of an offer inside the current transaction.
  async fn check_active_and_quantity(&mut self, offer_id: i64) -> Result<Option<Offer>>;

  /// Takes `quantity` off the offer's stock and adds it to the offer's and the
  /// product's sold amounts. Returns `false` (and changes nothing) when the
  /// offer is inactive or holds less than `quantity`.
  async fn decrement_and_record_sale(&mut self, offer_id: i64, quantity: i32) -> Result<bool>;

  /// Compensates an earlier decrement. Sold amounts never drop below zero.
  async fn restore(&mut self, offer_id: i64, quantity: i32) -> Result<()>;
}

#[async_trait]
pub trait CartStore: Send {
  async fn cart_item(&mut self, user_id: i64, offer_id: i64) -> Result<Option<CartItem>>;
  async fn delete_cart_line(&mut self, user_id: i64, offer_id: i64) -> Result<()>;
}

#[async_trait]
pub trait CatalogReader: Send {
  async fn find_pharmacy(&mut self, pharmacy_id: i64) -> Result<Option<Pharmacy>>;
  /// Only returns the address when it belongs to `user_id`.
  async fn find_address(&mut self, address_id: i64, user_id: i64) -> Result<Option<Address>>;
}

#[async_trait]
pub trait OrderLedger: Send {
  async fn insert_order(&mut self, order: &NewOrder) -> Result<Order>;
  async fn insert_order_line(&mut self, order_id: i64, line: &NewOrderLine) -> Result<OrderLine>;

  /// Reads and row-locks the given orders, ordered by id. Missing ids are absent from the result.
  async fn lock_orders(&mut self, order_ids: &[i64]) -> Result<Vec<Order>>;
  async fn order_lines(&mut self, order_ids: &[i64]) -> Result<Vec<OrderLine>>;

  /// Moves every listed order currently in one of `from` to `to`; returns the number of rows changed.
  async fn transition_orders(&mut self, order_ids: &[i64], from: &[OrderStatus], to: OrderStatus) -> Result<u64>;

  /// Stores the proof URL if the order belongs to `user_id` and is WAITING or PROCESSED.
  async fn attach_payment_proof(&mut self, order_id: i64, user_id: i64, url: &str) -> Result<bool>;
}

#[async_trait]
pub trait UnitOfWork: StockLedger + CartStore + CatalogReader + OrderLedger {
  async fn commit(self: Box<Self>) -> Result<()>;
  async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Entry point to persistence: opens units of work and serves read-only queries.
#[async_trait]
pub trait Store: Send + Sync {
  async fn begin(&self) -> Result<Box<dyn UnitOfWork>>;

  async fn find_order(&self, order_id: i64) -> Result<Option<Order>>;
  async fn find_pharmacy(&self, pharmacy_id: i64) -> Result<Option<Pharmacy>>;
  async fn order_details(&self, order_id: i64) -> Result<Option<OrderDetails>>;
  async fn pharmacy_orders(&self, pharmacy_id: i64, status: Option<OrderStatus>) -> Result<Vec<Order>>;
}
