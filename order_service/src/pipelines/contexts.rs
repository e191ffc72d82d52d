// medflow-orders/src/pipelines/contexts.rs

//! Context data the order pipelines run against.
//! Handlers receive these wrapped in `medflow::ContextData`.

use crate::db::UnitOfWork;
use crate::errors::{AppError, Result as AppResult};
use crate::models::{Address, NewOrderLine, Order, OrderDetails, OrderLine, OrderStatus, Pharmacy, PlaceOrderRequest};
use crate::services::payment_proof::ImageFormat;
use crate::state::AppState;
use medflow::ContextData;
use parking_lot::Mutex;
use std::marker::PhantomData;

/// Holds a pipeline's open unit of work between steps.
///
/// A handler takes the unit of work out, uses it across its awaits and puts it
/// back; the context lock is never held while the database is busy.
#[derive(Default)]
pub struct UnitOfWorkSlot(Mutex<Option<Box<dyn UnitOfWork>>>);

impl UnitOfWorkSlot {
  pub fn put(&self, uow: Box<dyn UnitOfWork>) {
    *self.0.lock() = Some(uow);
  }

  pub fn take(&self) -> AppResult<Box<dyn UnitOfWork>> {
    self
      .0
      .lock()
      .take()
      .ok_or_else(|| AppError::Internal("no unit of work is open".to_string()))
  }

  /// Like `take`, for cleanup paths where an empty slot is fine.
  pub fn take_open(&self) -> Option<Box<dyn UnitOfWork>> {
    self.0.lock().take()
  }
}

/// What every transactional pipeline context exposes to the shared steps.
pub trait FlowContext: Send + Sync + 'static {
  fn app_state(&self) -> &AppState;
  fn uow_slot(&self) -> &UnitOfWorkSlot;
}

macro_rules! impl_flow_context {
  ($($ty:ty),+ $(,)?) => {
    $(
      impl FlowContext for $ty {
        fn app_state(&self) -> &AppState {
          &self.app_state
        }

        fn uow_slot(&self) -> &UnitOfWorkSlot {
          &self.uow
        }
      }
    )+
  };
}

pub fn take_uow<T: FlowContext>(ctx_data: &ContextData<T>) -> AppResult<Box<dyn UnitOfWork>> {
  ctx_data.with(|ctx| ctx.uow_slot().take())
}

pub fn put_uow<T: FlowContext>(ctx_data: &ContextData<T>, uow: Box<dyn UnitOfWork>) {
  ctx_data.with(|ctx| ctx.uow_slot().put(uow));
}

// --- Checkout ---

pub struct PlaceOrderCtxData {
  pub app_state: AppState,
  pub user_id: i64,
  pub request: PlaceOrderRequest,
  pub uow: UnitOfWorkSlot,

  pub pharmacy: Option<Pharmacy>,
  pub address: Option<Address>,
  /// Request lines priced from the live offers.
  pub priced_lines: Vec<NewOrderLine>,
  pub order: Option<Order>,
  pub lines: Vec<OrderLine>,
}

impl PlaceOrderCtxData {
  pub fn new(app_state: AppState, user_id: i64, request: PlaceOrderRequest) -> Self {
    Self {
      app_state,
      user_id,
      request,
      uow: UnitOfWorkSlot::default(),
      pharmacy: None,
      address: None,
      priced_lines: Vec::new(),
      order: None,
      lines: Vec::new(),
    }
  }

  /// The placed order, once the pipeline completed.
  pub fn details(&self) -> AppResult<OrderDetails> {
    match (&self.order, &self.pharmacy) {
      (Some(order), Some(pharmacy)) => Ok(OrderDetails {
        order: order.clone(),
        lines: self.lines.clone(),
        pharmacy: pharmacy.clone(),
      }),
      _ => Err(AppError::PipelineHaltedByHandler),
    }
  }
}

// --- Status changes ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
  Pharmacist,
  Buyer,
}

/// Compile-time description of one kind of status change.
pub trait TransitionKind: Send + Sync + 'static {
  const NAME: &'static str;
  const TARGET: OrderStatus;
  const ACTOR: Actor;
  const RESTORES_STOCK: bool = false;
  const REQUIRES_PROOF: bool = false;
  const SCHEDULES_CONFIRMATION: bool = false;

  /// Statuses this actor may move an order out of.
  fn allowed_sources() -> Vec<OrderStatus> {
    OrderStatus::sources_of(Self::TARGET)
  }
}

pub struct SendOrders;

impl TransitionKind for SendOrders {
  const NAME: &'static str = "send_orders";
  const TARGET: OrderStatus = OrderStatus::Sent;
  const ACTOR: Actor = Actor::Pharmacist;
  const SCHEDULES_CONFIRMATION: bool = true;
}

pub struct CancelOrders;

impl TransitionKind for CancelOrders {
  const NAME: &'static str = "cancel_orders";
  const TARGET: OrderStatus = OrderStatus::Cancelled;
  const ACTOR: Actor = Actor::Pharmacist;
  const RESTORES_STOCK: bool = true;
}

pub struct ConfirmReceipt;

impl TransitionKind for ConfirmReceipt {
  const NAME: &'static str = "confirm_receipt";
  const TARGET: OrderStatus = OrderStatus::Confirmed;
  const ACTOR: Actor = Actor::Buyer;
  const REQUIRES_PROOF: bool = true;
}

pub struct BuyerCancel;

impl TransitionKind for BuyerCancel {
  const NAME: &'static str = "buyer_cancel";
  const TARGET: OrderStatus = OrderStatus::Cancelled;
  const ACTOR: Actor = Actor::Buyer;
  const RESTORES_STOCK: bool = true;

  fn allowed_sources() -> Vec<OrderStatus> {
    vec![OrderStatus::Waiting]
  }
}

pub struct StatusChangeCtxData<K: TransitionKind> {
  pub app_state: AppState,
  /// Pharmacist or buyer user id, per `K::ACTOR`.
  pub actor_id: i64,
  /// Set for pharmacist batches.
  pub pharmacy_id: Option<i64>,
  pub order_ids: Vec<i64>,
  pub uow: UnitOfWorkSlot,

  pub orders: Vec<Order>,
  pub changed: u64,
  pub restored_lines: usize,
  pub confirmation_task_id: Option<i64>,
  _kind: PhantomData<K>,
}

impl<K: TransitionKind> StatusChangeCtxData<K> {
  pub fn pharmacist(app_state: AppState, pharmacist_id: i64, pharmacy_id: i64, order_ids: Vec<i64>) -> Self {
    Self::build(app_state, pharmacist_id, Some(pharmacy_id), order_ids)
  }

  pub fn buyer(app_state: AppState, user_id: i64, order_id: i64) -> Self {
    Self::build(app_state, user_id, None, vec![order_id])
  }

  fn build(app_state: AppState, actor_id: i64, pharmacy_id: Option<i64>, order_ids: Vec<i64>) -> Self {
    Self {
      app_state,
      actor_id,
      pharmacy_id,
      order_ids,
      uow: UnitOfWorkSlot::default(),
      orders: Vec::new(),
      changed: 0,
      restored_lines: 0,
      confirmation_task_id: None,
      _kind: PhantomData,
    }
  }
}

impl<K: TransitionKind> std::fmt::Debug for StatusChangeCtxData<K> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("StatusChangeCtxData")
      .field("kind", &K::NAME)
      .field("actor_id", &self.actor_id)
      .field("pharmacy_id", &self.pharmacy_id)
      .field("order_ids", &self.order_ids)
      .field("orders", &self.orders)
      .field("changed", &self.changed)
      .field("restored_lines", &self.restored_lines)
      .field("confirmation_task_id", &self.confirmation_task_id)
      .finish_non_exhaustive()
  }
}

impl<K: TransitionKind> FlowContext for StatusChangeCtxData<K> {
  fn app_state(&self) -> &AppState {
    &self.app_state
  }

  fn uow_slot(&self) -> &UnitOfWorkSlot {
    &self.uow
  }
}

pub type SendOrdersCtxData = StatusChangeCtxData<SendOrders>;
pub type CancelOrdersCtxData = StatusChangeCtxData<CancelOrders>;
pub type ConfirmReceiptCtxData = StatusChangeCtxData<ConfirmReceipt>;
pub type BuyerCancelCtxData = StatusChangeCtxData<BuyerCancel>;

// --- Queued tasks ---

pub struct ProcessOrderCtxData {
  pub app_state: AppState,
  pub order_id: i64,
  pub user_id: i64,
  pub format: ImageFormat,
  pub image: Vec<u8>,
  pub uow: UnitOfWorkSlot,

  pub order: Option<Order>,
  pub proof_url: Option<String>,
  pub marked_processed: bool,
}

impl ProcessOrderCtxData {
  pub fn new(app_state: AppState, order_id: i64, user_id: i64, format: ImageFormat, image: Vec<u8>) -> Self {
    Self {
      app_state,
      order_id,
      user_id,
      format,
      image,
      uow: UnitOfWorkSlot::default(),
      order: None,
      proof_url: None,
      marked_processed: false,
    }
  }
}

pub struct ConfirmOrderCtxData {
  pub app_state: AppState,
  pub order_ids: Vec<i64>,
  pub uow: UnitOfWorkSlot,
  pub confirmed: u64,
}

impl ConfirmOrderCtxData {
  pub fn new(app_state: AppState, order_ids: Vec<i64>) -> Self {
    Self {
      app_state,
      order_ids,
      uow: UnitOfWorkSlot::default(),
      confirmed: 0,
    }
  }
}

impl_flow_context!(PlaceOrderCtxData, ProcessOrderCtxData, ConfirmOrderCtxData);
