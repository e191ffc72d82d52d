// medflow-orders/src/web/handlers/pharmacy_handlers.rs

//! Pharmacist endpoints, scoped to one pharmacy.

use super::{run_flow, StatusChangeResponse};
use crate::errors::{AppError, Result as AppResult};
use crate::models::{OrderBatchRequest, OrderStatus};
use crate::pipelines::contexts::{CancelOrdersCtxData, SendOrdersCtxData};
use crate::state::AppState;
use crate::web::extractors::AuthenticatedUser;
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use tracing::instrument;
use validator::Validate;

#[derive(Debug, Deserialize)]
pub struct ListOrdersQuery {
  pub status: Option<String>,
}

#[instrument(name = "handler::pharmacy_orders", skip(state), fields(user_id = user.user_id))]
pub async fn list_pharmacy_orders_handler(
  state: web::Data<AppState>,
  user: AuthenticatedUser,
  path: web::Path<i64>,
  query: web::Query<ListOrdersQuery>,
) -> AppResult<HttpResponse> {
  let pharmacist_id = user.require_pharmacist()?;
  let pharmacy_id = path.into_inner();
  let status = query
    .status
    .as_deref()
    .map(str::parse::<OrderStatus>)
    .transpose()
    .map_err(|e| AppError::validation(e.to_string()))?;

  let pharmacy = state
    .store
    .find_pharmacy(pharmacy_id)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("pharmacy {} not found", pharmacy_id)))?;
  if pharmacy.pharmacist_id != pharmacist_id {
    return Err(AppError::Forbidden(format!(
      "user {} is not the pharmacist of pharmacy {}",
      pharmacist_id, pharmacy_id
    )));
  }

  let orders = state.store.pharmacy_orders(pharmacy_id, status).await?;
  Ok(HttpResponse::Ok().json(orders))
}

#[instrument(name = "handler::send_orders", skip(state, body), fields(user_id = user.user_id))]
pub async fn send_orders_handler(
  state: web::Data<AppState>,
  user: AuthenticatedUser,
  path: web::Path<i64>,
  body: web::Json<OrderBatchRequest>,
) -> AppResult<HttpResponse> {
  let pharmacist_id = user.require_pharmacist()?;
  body.validate()?;
  let ctx = SendOrdersCtxData::pharmacist(
    state.get_ref().clone(),
    pharmacist_id,
    path.into_inner(),
    body.into_inner().order_ids,
  );
  let ctx_data = run_flow(&state, ctx).await?;
  Ok(HttpResponse::Ok().json(ctx_data.with(StatusChangeResponse::from_ctx)))
}

#[instrument(name = "handler::cancel_orders", skip(state, body), fields(user_id = user.user_id))]
pub async fn cancel_orders_handler(
  state: web::Data<AppState>,
  user: AuthenticatedUser,
  path: web::Path<i64>,
  body: web::Json<OrderBatchRequest>,
) -> AppResult<HttpResponse> {
  let pharmacist_id = user.require_pharmacist()?;
  body.validate()?;
  let ctx = CancelOrdersCtxData::pharmacist(
    state.get_ref().clone(),
    pharmacist_id,
    path.into_inner(),
    body.into_inner().order_ids,
  );
  let ctx_data = run_flow(&state, ctx).await?;
  Ok(HttpResponse::Ok().json(ctx_data.with(StatusChangeResponse::from_ctx)))
}
