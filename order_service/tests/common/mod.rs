// tests/common/mod.rs
#![allow(dead_code)]

use medflow::{ContextData, PipelineResult};
use medflow_orders::config::AppConfig;
use medflow_orders::db::{MemoryState, MemoryStore};
use medflow_orders::errors::AppError;
use medflow_orders::models::{Address, Offer, OrderDetails, OrderLineRequest, Pharmacy, PlaceOrderRequest, Product};
use medflow_orders::pipelines::contexts::{PlaceOrderCtxData, StatusChangeCtxData, TransitionKind};
use medflow_orders::queue::MemoryQueue;
use medflow_orders::services::object_store::MemoryObjectStore;
use medflow_orders::state::AppState;
use once_cell::sync::Lazy;
use std::sync::Arc;
use std::time::Duration;

pub const BUYER: i64 = 1;
pub const OTHER_BUYER: i64 = 2;
pub const PHARMACIST: i64 = 30;
pub const OTHER_PHARMACIST: i64 = 50;

pub const PHARMACY: i64 = 3;
pub const INACTIVE_PHARMACY: i64 = 4;
pub const OTHER_PHARMACY: i64 = 5;

pub const ADDRESS: i64 = 7;
pub const OTHER_ADDRESS: i64 = 8;

/// Pharmacy 3, price 1000, stock 10.
pub const OFFER: i64 = 10;
/// Pharmacy 3, price 2500, stock 7.
pub const SECOND_OFFER: i64 = 5;
/// Pharmacy 3, inactive.
pub const INACTIVE_OFFER: i64 = 11;
/// Pharmacy 5.
pub const FOREIGN_OFFER: i64 = 20;

pub const PRODUCT: i64 = 100;
pub const SECOND_PRODUCT: i64 = 101;

pub const PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 13];

static TRACING: Lazy<()> = Lazy::new(|| {
  let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".to_string());
  tracing_subscriber::fmt()
    .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
    .with_test_writer()
    .init();
});

pub fn setup_tracing() {
  Lazy::force(&TRACING);
}

pub struct TestApp {
  pub state: AppState,
  pub store: MemoryStore,
  pub queue: Arc<MemoryQueue>,
  pub objects: Arc<MemoryObjectStore>,
}

pub fn test_config() -> AppConfig {
  AppConfig {
    task_max_attempts: 3,
    task_retry_base: Duration::from_secs(1),
    task_retry_max: Duration::from_secs(8),
    auto_confirm_after: Duration::from_secs(3600),
    max_payment_proof_bytes: 1024,
    ..AppConfig::default()
  }
}

pub async fn test_app() -> TestApp {
  setup_tracing();
  let config = test_config();
  let store = MemoryStore::new();
  store.with_state(seed).await;
  let queue = Arc::new(MemoryQueue::new(config.task_max_attempts, config.task_lease));
  let objects = Arc::new(MemoryObjectStore::new());
  let state = AppState::new(config, Arc::new(store.clone()), queue.clone(), objects.clone());
  TestApp {
    state,
    store,
    queue,
    objects,
  }
}

fn pharmacy(id: i64, pharmacist_id: i64, is_active: bool) -> Pharmacy {
  Pharmacy {
    id,
    pharmacist_id,
    name: format!("Apotek {}", id),
    is_active,
    city: "Bandung".to_string(),
  }
}

fn offer(id: i64, pharmacy_id: i64, product_id: i64, stock_quantity: i32, price: i64, is_active: bool) -> Offer {
  Offer {
    id,
    pharmacy_id,
    product_id,
    stock_quantity,
    price,
    sold_amount: 0,
    is_active,
    stock_last_manual_update_at: None,
  }
}

fn address(id: i64, user_id: i64) -> Address {
  Address {
    id,
    user_id,
    recipient_name: format!("Recipient {}", user_id),
    phone: "0812000000".to_string(),
    street: "Jl. Merdeka 1".to_string(),
    city: "Bandung".to_string(),
    province: "Jawa Barat".to_string(),
    postal_code: "40111".to_string(),
  }
}

fn seed(state: &mut MemoryState) {
  for p in [
    pharmacy(PHARMACY, PHARMACIST, true),
    pharmacy(INACTIVE_PHARMACY, 40, false),
    pharmacy(OTHER_PHARMACY, OTHER_PHARMACIST, true),
  ] {
    state.pharmacies.insert(p.id, p);
  }
  for (id, name) in [(PRODUCT, "Paracetamol 500mg"), (SECOND_PRODUCT, "Vitamin C 1000mg")] {
    state.products.insert(
      id,
      Product {
        id,
        name: name.to_string(),
        sold_amount: 0,
      },
    );
  }
  for o in [
    offer(OFFER, PHARMACY, PRODUCT, 10, 1000, true),
    offer(SECOND_OFFER, PHARMACY, SECOND_PRODUCT, 7, 2500, true),
    offer(INACTIVE_OFFER, PHARMACY, PRODUCT, 5, 800, false),
    offer(FOREIGN_OFFER, OTHER_PHARMACY, PRODUCT, 3, 900, true),
  ] {
    state.offers.insert(o.id, o);
  }
  for a in [address(ADDRESS, BUYER), address(OTHER_ADDRESS, OTHER_BUYER)] {
    state.addresses.insert(a.id, a);
  }
}

pub fn line(offer_id: i64, quantity: i32, price: i64) -> OrderLineRequest {
  OrderLineRequest {
    offer_id,
    quantity,
    price,
  }
}

pub fn order_request(lines: Vec<OrderLineRequest>) -> PlaceOrderRequest {
  PlaceOrderRequest {
    address_id: ADDRESS,
    pharmacy_id: PHARMACY,
    description: "please deliver before noon".to_string(),
    ship_cost: 500,
    lines,
  }
}

impl TestApp {
  pub async fn add_to_cart(&self, user_id: i64, offer_id: i64, quantity: i32) {
    self
      .store
      .with_state(|s| {
        s.add_cart_item(user_id, offer_id, quantity);
      })
      .await;
  }

  pub async fn place(&self, user_id: i64, request: PlaceOrderRequest) -> Result<OrderDetails, AppError> {
    let ctx_data = ContextData::new(PlaceOrderCtxData::new(self.state.clone(), user_id, request));
    self.state.flows.run(ctx_data.clone()).await?;
    ctx_data.with(|ctx| ctx.details())
  }

  /// Cart plus checkout of `quantity` units of `offer_id` at its seeded price.
  pub async fn place_simple(&self, offer_id: i64, quantity: i32, price: i64) -> OrderDetails {
    self.add_to_cart(BUYER, offer_id, quantity).await;
    self
      .place(BUYER, order_request(vec![line(offer_id, quantity, price)]))
      .await
      .expect("checkout should succeed")
  }

  pub async fn change_status<K: TransitionKind>(
    &self,
    ctx: StatusChangeCtxData<K>,
  ) -> Result<ContextData<StatusChangeCtxData<K>>, AppError> {
    let ctx_data = ContextData::new(ctx);
    let result = self.state.flows.run(ctx_data.clone()).await?;
    assert_eq!(result, PipelineResult::Completed);
    Ok(ctx_data)
  }

  pub async fn offer(&self, offer_id: i64) -> Offer {
    self.store.snapshot().await.offers[&offer_id].clone()
  }

  pub async fn product_sold(&self, product_id: i64) -> i64 {
    self.store.snapshot().await.products[&product_id].sold_amount
  }

  pub async fn set_proof(&self, order_id: i64) {
    self
      .store
      .with_state(|s| {
        if let Some(order) = s.orders.get_mut(&order_id) {
          order.payment_image_url = Some(format!("memory://payment-proofs/order-{}.png", order_id));
        }
      })
      .await;
  }
}
