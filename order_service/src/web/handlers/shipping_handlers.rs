// medflow-orders/src/web/handlers/shipping_handlers.rs

use crate::errors::Result as AppResult;
use crate::services::shipping::{collect_quotes, QuoteRequest};
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use std::time::Duration;
use validator::Validate;

const COURIER_TIMEOUT: Duration = Duration::from_secs(3);

pub async fn shipping_quotes_handler(
  state: web::Data<AppState>,
  body: web::Json<QuoteRequest>,
) -> AppResult<HttpResponse> {
  body.validate()?;
  let summary = collect_quotes(&state.couriers, &body, COURIER_TIMEOUT).await;
  Ok(HttpResponse::Ok().json(summary))
}
