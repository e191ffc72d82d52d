// medflow-orders/src/web/handlers/order_handlers.rs

//! Buyer-facing order endpoints.

use super::{run_flow, StatusChangeResponse};
use crate::errors::{AppError, Result as AppResult};
use crate::models::PlaceOrderRequest;
use crate::pipelines::contexts::{BuyerCancelCtxData, ConfirmReceiptCtxData, PlaceOrderCtxData};
use crate::services::payment_proof::submit_payment_proof;
use crate::state::AppState;
use crate::web::extractors::AuthenticatedUser;
use actix_web::{web, HttpResponse};
use futures_util::StreamExt;
use serde_json::json;
use tracing::instrument;

#[instrument(name = "handler::place_order", skip(state, body), fields(user_id = user.user_id))]
pub async fn place_order_handler(
  state: web::Data<AppState>,
  user: AuthenticatedUser,
  body: web::Json<PlaceOrderRequest>,
) -> AppResult<HttpResponse> {
  let ctx = PlaceOrderCtxData::new(state.get_ref().clone(), user.user_id, body.into_inner());
  let ctx_data = run_flow(&state, ctx).await?;
  let details = ctx_data.with(|ctx| ctx.details())?;
  Ok(HttpResponse::Created().json(details))
}

#[instrument(name = "handler::get_order", skip(state), fields(user_id = user.user_id))]
pub async fn get_order_handler(
  state: web::Data<AppState>,
  user: AuthenticatedUser,
  path: web::Path<i64>,
) -> AppResult<HttpResponse> {
  let order_id = path.into_inner();
  let details = state
    .store
    .order_details(order_id)
    .await?
    .filter(|d| d.order.user_id == user.user_id)
    .ok_or_else(|| AppError::NotFound(format!("order {} not found", order_id)))?;
  Ok(HttpResponse::Ok().json(details))
}

/// Raw image body. The size limit is enforced while reading, before the bytes are inspected.
#[instrument(name = "handler::payment_proof", skip(state, payload), fields(user_id = user.user_id))]
pub async fn submit_payment_proof_handler(
  state: web::Data<AppState>,
  user: AuthenticatedUser,
  path: web::Path<i64>,
  mut payload: web::Payload,
) -> AppResult<HttpResponse> {
  let order_id = path.into_inner();
  let limit = state.config.max_payment_proof_bytes;
  let mut body = web::BytesMut::new();
  while let Some(chunk) = payload.next().await {
    let chunk = chunk.map_err(|e| AppError::validation(format!("could not read upload: {}", e)))?;
    if body.len() + chunk.len() > limit {
      return Err(AppError::validation(format!(
        "payment proof image exceeds the {} byte limit",
        limit
      )));
    }
    body.extend_from_slice(&chunk);
  }

  let task_id = submit_payment_proof(&state, user.user_id, order_id, &body).await?;
  Ok(HttpResponse::Accepted().json(json!({ "order_id": order_id, "task_id": task_id })))
}

#[instrument(name = "handler::confirm_order", skip(state), fields(user_id = user.user_id))]
pub async fn confirm_order_handler(
  state: web::Data<AppState>,
  user: AuthenticatedUser,
  path: web::Path<i64>,
) -> AppResult<HttpResponse> {
  let ctx = ConfirmReceiptCtxData::buyer(state.get_ref().clone(), user.user_id, path.into_inner());
  let ctx_data = run_flow(&state, ctx).await?;
  Ok(HttpResponse::Ok().json(ctx_data.with(StatusChangeResponse::from_ctx)))
}

#[instrument(name = "handler::cancel_order", skip(state), fields(user_id = user.user_id))]
pub async fn cancel_order_handler(
  state: web::Data<AppState>,
  user: AuthenticatedUser,
  path: web::Path<i64>,
) -> AppResult<HttpResponse> {
  let ctx = BuyerCancelCtxData::buyer(state.get_ref().clone(), user.user_id, path.into_inner());
  let ctx_data = run_flow(&state, ctx).await?;
  Ok(HttpResponse::Ok().json(ctx_data.with(StatusChangeResponse::from_ctx)))
}
