// medflow-orders/src/lib.rs

//! Multi-vendor pharmacy order service: cart to order checkout with a stock
//! ledger, an order status state machine and an at-least-once task queue.
//!
//! Each multi-step flow is a `medflow` pipeline registered in the
//! [`state::AppState`]'s registry; HTTP handlers and task handlers only build
//! a context and run it.

pub mod config;
pub mod db;
pub mod errors;
pub mod models;
pub mod pipelines;
pub mod queue;
pub mod services;
pub mod state;
pub mod web;

pub use errors::{AppError, ErrorKind};
pub use state::AppState;
