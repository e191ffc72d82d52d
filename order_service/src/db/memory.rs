// medflow-orders/src/db/memory.rs

//! In-process store used by tests and `STORE_BACKEND=memory`.
//!
//! A unit of work holds the store's mutex for its whole life and mutates a
//! private copy of the state; `commit` swaps the copy in. Units of work are
//! therefore fully serialized, which is stricter than the Postgres row locks
//! but gives the same observable outcomes.

use super::{CartStore, CatalogReader, OrderLedger, StockLedger, Store, UnitOfWork};
use crate::errors::{AppError, Result};
use crate::models::{
  Address, CartItem, NewOrder, NewOrderLine, Offer, Order, OrderDetails, OrderLine, OrderStatus, Pharmacy, Product,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Clone, Default)]
pub struct MemoryState {
  pub pharmacies: BTreeMap<i64, Pharmacy>,
  pub products: BTreeMap<i64, Product>,
  pub offers: BTreeMap<i64, Offer>,
  pub addresses: BTreeMap<i64, Address>,
  /// Keyed by `(user_id, offer_id)`.
  pub cart_items: BTreeMap<(i64, i64), CartItem>,
  pub orders: BTreeMap<i64, Order>,
  pub order_lines: Vec<OrderLine>,
  next_id: i64,
}

impl MemoryState {
  fn next_id(&mut self) -> i64 {
    self.next_id += 1;
    self.next_id
  }

  pub fn add_cart_item(&mut self, user_id: i64, offer_id: i64, quantity: i32) -> CartItem {
    let item = CartItem {
      id: self.next_id(),
      user_id,
      offer_id,
      quantity,
    };
    self.cart_items.insert((user_id, offer_id), item.clone());
    item
  }

  pub fn lines_of(&self, order_id: i64) -> Vec<OrderLine> {
    self.order_lines.iter().filter(|l| l.order_id == order_id).cloned().collect()
  }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
  state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Runs `f` against the committed state, e.g. to seed fixtures or inspect results.
  pub async fn with_state<R>(&self, f: impl FnOnce(&mut MemoryState) -> R) -> R {
    let mut guard = self.state.lock().await;
    f(&mut guard)
  }

  pub async fn snapshot(&self) -> MemoryState {
    self.state.lock().await.clone()
  }
}

#[async_trait]
impl Store for MemoryStore {
  async fn begin(&self) -> Result<Box<dyn UnitOfWork>> {
    let guard = Arc::clone(&self.state).lock_owned().await;
    let working = guard.clone();
    Ok(Box::new(MemoryUnitOfWork { guard, working }))
  }

  async fn find_order(&self, order_id: i64) -> Result<Option<Order>> {
    Ok(self.state.lock().await.orders.get(&order_id).cloned())
  }

  async fn find_pharmacy(&self, pharmacy_id: i64) -> Result<Option<Pharmacy>> {
    Ok(self.state.lock().await.pharmacies.get(&pharmacy_id).cloned())
  }

  async fn order_details(&self, order_id: i64) -> Result<Option<OrderDetails>> {
    let state = self.state.lock().await;
    let Some(order) = state.orders.get(&order_id).cloned() else {
      return Ok(None);
    };
    let pharmacy = state
      .pharmacies
      .get(&order.pharmacy_id)
      .cloned()
      .ok_or_else(|| AppError::Internal(format!("order {} references a missing pharmacy", order_id)))?;
    Ok(Some(OrderDetails {
      lines: state.lines_of(order_id),
      order,
      pharmacy,
    }))
  }

  async fn pharmacy_orders(&self, pharmacy_id: i64, status: Option<OrderStatus>) -> Result<Vec<Order>> {
    let state = self.state.lock().await;
    let mut orders: Vec<Order> = state
      .orders
      .values()
      .filter(|o| o.pharmacy_id == pharmacy_id && status.map_or(true, |s| o.status == s))
      .cloned()
      .collect();
    orders.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
    Ok(orders)
  }
}

pub struct MemoryUnitOfWork {
  guard: OwnedMutexGuard<MemoryState>,
  working: MemoryState,
}

#[async_trait]
impl StockLedger for MemoryUnitOfWork {
  async fn check_active_and_quantity(&mut self, offer_id: i64) -> Result<Option<Offer>> {
    Ok(self.working.offers.get(&offer_id).cloned())
  }

  async fn decrement_and_record_sale(&mut self, offer_id: i64, quantity: i32) -> Result<bool> {
    let product_id = match self.working.offers.get_mut(&offer_id) {
      Some(offer) if offer.is_active && offer.stock_quantity >= quantity => {
        offer.stock_quantity -= quantity;
        offer.sold_amount += i64::from(quantity);
        offer.product_id
      }
      _ => return Ok(false),
    };
    if let Some(product) = self.working.products.get_mut(&product_id) {
      product.sold_amount += i64::from(quantity);
    }
    Ok(true)
  }

  async fn restore(&mut self, offer_id: i64, quantity: i32) -> Result<()> {
    let Some(offer) = self.working.offers.get_mut(&offer_id) else {
      return Err(AppError::Internal(format!("cannot restore stock of missing offer {}", offer_id)));
    };
    offer.stock_quantity += quantity;
    offer.sold_amount = (offer.sold_amount - i64::from(quantity)).max(0);
    let product_id = offer.product_id;
    if let Some(product) = self.working.products.get_mut(&product_id) {
      product.sold_amount = (product.sold_amount - i64::from(quantity)).max(0);
    }
    Ok(())
  }
}

#[async_trait]
impl CartStore for MemoryUnitOfWork {
  async fn cart_item(&mut self, user_id: i64, offer_id: i64) -> Result<Option<CartItem>> {
    Ok(self.working.cart_items.get(&(user_id, offer_id)).cloned())
  }

  async fn delete_cart_line(&mut self, user_id: i64, offer_id: i64) -> Result<()> {
    self.working.cart_items.remove(&(user_id, offer_id));
    Ok(())
  }
}

#[async_trait]
impl CatalogReader for MemoryUnitOfWork {
  async fn find_pharmacy(&mut self, pharmacy_id: i64) -> Result<Option<Pharmacy>> {
    Ok(self.working.pharmacies.get(&pharmacy_id).cloned())
  }

  async fn find_address(&mut self, address_id: i64, user_id: i64) -> Result<Option<Address>> {
    Ok(self
      .working
      .addresses
      .get(&address_id)
      .filter(|a| a.user_id == user_id)
      .cloned())
  }
}

#[async_trait]
impl OrderLedger for MemoryUnitOfWork {
  async fn insert_order(&mut self, new: &NewOrder) -> Result<Order> {
    if self.working.orders.values().any(|o| o.voice_number == new.voice_number) {
      return Err(AppError::Conflict(format!("voice number {} already used", new.voice_number)));
    }
    let now = Utc::now();
    let order = Order {
      id: self.working.next_id(),
      user_id: new.user_id,
      pharmacy_id: new.pharmacy_id,
      status: OrderStatus::Waiting,
      voice_number: new.voice_number.clone(),
      total_product_price: new.total_product_price,
      ship_cost: new.ship_cost,
      total_payment: new.total_payment,
      payment_image_url: None,
      description: new.description.clone(),
      recipient_name: new.recipient_name.clone(),
      phone: new.phone.clone(),
      street: new.street.clone(),
      city: new.city.clone(),
      province: new.province.clone(),
      postal_code: new.postal_code.clone(),
      created_at: now,
      updated_at: now,
    };
    self.working.orders.insert(order.id, order.clone());
    Ok(order)
  }

  async fn insert_order_line(&mut self, order_id: i64, line: &NewOrderLine) -> Result<OrderLine> {
    let row = OrderLine {
      id: self.working.next_id(),
      order_id,
      offer_id: line.offer_id,
      quantity: line.quantity,
      price: line.price,
    };
    self.working.order_lines.push(row.clone());
    Ok(row)
  }

  async fn lock_orders(&mut self, order_ids: &[i64]) -> Result<Vec<Order>> {
    let mut orders: Vec<Order> = order_ids
      .iter()
      .filter_map(|id| self.working.orders.get(id).cloned())
      .collect();
    orders.sort_by_key(|o| o.id);
    orders.dedup_by_key(|o| o.id);
    Ok(orders)
  }

  async fn order_lines(&mut self, order_ids: &[i64]) -> Result<Vec<OrderLine>> {
    Ok(self
      .working
      .order_lines
      .iter()
      .filter(|l| order_ids.contains(&l.order_id))
      .cloned()
      .collect())
  }

  async fn transition_orders(&mut self, order_ids: &[i64], from: &[OrderStatus], to: OrderStatus) -> Result<u64> {
    let now = Utc::now();
    let mut changed = 0;
    for order in self.working.orders.values_mut() {
      if order_ids.contains(&order.id) && from.contains(&order.status) {
        order.status = to;
        order.updated_at = now;
        changed += 1;
      }
    }
    Ok(changed)
  }

  async fn attach_payment_proof(&mut self, order_id: i64, user_id: i64, url: &str) -> Result<bool> {
    match self.working.orders.get_mut(&order_id) {
      Some(order)
        if order.user_id == user_id && matches!(order.status, OrderStatus::Waiting | OrderStatus::Processed) =>
      {
        order.payment_image_url = Some(url.to_string());
        order.updated_at = Utc::now();
        Ok(true)
      }
      _ => Ok(false),
    }
  }
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
  async fn commit(self: Box<Self>) -> Result<()> {
    let MemoryUnitOfWork { mut guard, working } = *self;
    *guard = working;
    Ok(())
  }

  async fn rollback(self: Box<Self>) -> Result<()> {
    Ok(())
  }
}
