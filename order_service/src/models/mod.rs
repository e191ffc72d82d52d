// medflow-orders/src/models/mod.rs

//! Data structures representing database rows and inbound commands.

pub mod cart_item;
pub mod catalog;
pub mod order;
pub mod order_line;
pub mod requests;

pub use cart_item::CartItem;
pub use catalog::{Address, Offer, Pharmacy, Product};
pub use order::{generate_voice_number, NewOrder, Order, OrderStatus, TransitionError};
pub use order_line::{NewOrderLine, OrderLine};
pub use requests::{OrderBatchRequest, OrderLineRequest, PlaceOrderRequest};

use serde::Serialize;

/// An order as returned to clients: the row, its lines and the pharmacy it was placed with.
#[derive(Debug, Clone, Serialize)]
pub struct OrderDetails {
  pub order: Order,
  pub lines: Vec<OrderLine>,
  pub pharmacy: Pharmacy,
}
