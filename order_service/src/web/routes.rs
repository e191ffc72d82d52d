// medflow-orders/src/web/routes.rs

use crate::errors::AppError;
use crate::web::handlers::{order_handlers, pharmacy_handlers, shipping_handlers};
use actix_web::{web, HttpResponse};

async fn health_check_handler() -> HttpResponse {
  HttpResponse::Ok().json(serde_json::json!({ "status": "ok" }))
}

/// Malformed bodies, paths and queries come back in the same error shape as everything else.
fn extractor_configs(cfg: &mut web::ServiceConfig) {
  cfg
    .app_data(web::JsonConfig::default().error_handler(|err, _req| AppError::validation(err.to_string()).into()))
    .app_data(web::PathConfig::default().error_handler(|err, _req| AppError::validation(err.to_string()).into()))
    .app_data(web::QueryConfig::default().error_handler(|err, _req| AppError::validation(err.to_string()).into()));
}

pub fn configure_app_routes(cfg: &mut web::ServiceConfig) {
  extractor_configs(cfg);
  cfg.service(
    web::scope("/api/v1")
      .route("/health", web::get().to(health_check_handler))
      .service(
        web::scope("/orders")
          .route("", web::post().to(order_handlers::place_order_handler))
          .route("/{order_id}", web::get().to(order_handlers::get_order_handler))
          .route(
            "/{order_id}/payment-proof",
            web::post().to(order_handlers::submit_payment_proof_handler),
          )
          .route("/{order_id}/confirm", web::post().to(order_handlers::confirm_order_handler))
          .route("/{order_id}/cancel", web::post().to(order_handlers::cancel_order_handler)),
      )
      .service(
        web::scope("/pharmacies/{pharmacy_id}/orders")
          .route("", web::get().to(pharmacy_handlers::list_pharmacy_orders_handler))
          .route("/send", web::post().to(pharmacy_handlers::send_orders_handler))
          .route("/cancel", web::post().to(pharmacy_handlers::cancel_orders_handler)),
      )
      .route("/shipping/quotes", web::post().to(shipping_handlers::shipping_quotes_handler)),
  );
}
