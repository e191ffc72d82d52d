// tests/web_tests.rs

mod common;

use actix_web::http::StatusCode;
use actix_web::{test, web, App};
use common::*;
use async_trait::async_trait;
use medflow_orders::models::OrderStatus;
use medflow_orders::services::shipping::{
  CourierQuoter, FlatRateCourier, FlatRateService, QuoteError, QuoteRequest, ShippingQuote,
};
use medflow_orders::web::configure_app_routes;
use serde_json::{json, Value};
use std::sync::Arc;

macro_rules! init_app {
  ($app:expr) => {
    test::init_service(
      App::new()
        .app_data(web::Data::new($app.state.clone()))
        .configure(configure_app_routes),
    )
    .await
  };
}

fn checkout_body(quantity: i32, price: i64) -> Value {
  json!({
    "address_id": ADDRESS,
    "pharmacy_id": PHARMACY,
    "description": "",
    "ship_cost": 500,
    "lines": [{ "offer_id": OFFER, "quantity": quantity, "price": price }],
  })
}

#[actix_web::test]
async fn health_check_works() {
  let app = test_app().await;
  let service = init_app!(app);
  let resp = test::call_service(&service, test::TestRequest::get().uri("/api/v1/health").to_request()).await;
  assert_eq!(resp.status(), StatusCode::OK);
  let body: Value = test::read_body_json(resp).await;
  assert_eq!(body["status"], "ok");
}

#[actix_web::test]
async fn checkout_requires_a_user() {
  let app = test_app().await;
  let service = init_app!(app);
  let req = test::TestRequest::post()
    .uri("/api/v1/orders")
    .set_json(checkout_body(1, 1000))
    .to_request();
  let resp = test::call_service(&service, req).await;
  assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
  let body: Value = test::read_body_json(resp).await;
  assert_eq!(body["error"]["kind"], "unauthorized");
}

#[actix_web::test]
async fn checkout_over_http() {
  let app = test_app().await;
  app.add_to_cart(BUYER, OFFER, 2).await;
  let service = init_app!(app);

  let req = test::TestRequest::post()
    .uri("/api/v1/orders")
    .insert_header(("X-User-ID", BUYER.to_string()))
    .set_json(checkout_body(2, 1000))
    .to_request();
  let resp = test::call_service(&service, req).await;
  assert_eq!(resp.status(), StatusCode::CREATED);
  let body: Value = test::read_body_json(resp).await;
  assert_eq!(body["order"]["status"], "WAITING");
  assert_eq!(body["order"]["total_payment"], 2500);
  assert_eq!(body["lines"].as_array().map(Vec::len), Some(1));
  let order_id = body["order"]["id"].as_i64().unwrap();

  let req = test::TestRequest::get()
    .uri(&format!("/api/v1/orders/{}", order_id))
    .insert_header(("X-User-ID", BUYER.to_string()))
    .to_request();
  assert_eq!(test::call_service(&service, req).await.status(), StatusCode::OK);

  let req = test::TestRequest::get()
    .uri(&format!("/api/v1/orders/{}", order_id))
    .insert_header(("X-User-ID", OTHER_BUYER.to_string()))
    .to_request();
  assert_eq!(test::call_service(&service, req).await.status(), StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn validation_errors_list_fields() {
  let app = test_app().await;
  let service = init_app!(app);
  let req = test::TestRequest::post()
    .uri("/api/v1/orders")
    .insert_header(("X-User-ID", BUYER.to_string()))
    .set_json(checkout_body(0, 1000))
    .to_request();
  let resp = test::call_service(&service, req).await;
  assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
  let body: Value = test::read_body_json(resp).await;
  assert_eq!(body["error"]["kind"], "validation");
  assert_eq!(body["error"]["fields"][0]["field"], "lines[0].quantity");

  let req = test::TestRequest::post()
    .uri("/api/v1/orders")
    .insert_header(("X-User-ID", BUYER.to_string()))
    .set_json(json!({ "address_id": "seven" }))
    .to_request();
  assert_eq!(test::call_service(&service, req).await.status(), StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn refused_checkout_is_a_conflict() {
  let app = test_app().await;
  app.add_to_cart(BUYER, OFFER, 2).await;
  let service = init_app!(app);
  let req = test::TestRequest::post()
    .uri("/api/v1/orders")
    .insert_header(("X-User-ID", BUYER.to_string()))
    .set_json(checkout_body(2, 1))
    .to_request();
  let resp = test::call_service(&service, req).await;
  assert_eq!(resp.status(), StatusCode::CONFLICT);
  let body: Value = test::read_body_json(resp).await;
  assert_eq!(body["error"]["kind"], "conflict");
  assert!(body["error"]["message"].as_str().unwrap().contains("price"));
}

#[actix_web::test]
async fn pharmacy_endpoints_need_the_pharmacist_role() {
  let app = test_app().await;
  let order_id = app.place_simple(OFFER, 1, 1000).await.order.id;
  let service = init_app!(app);

  let req = test::TestRequest::post()
    .uri(&format!("/api/v1/pharmacies/{}/orders/send", PHARMACY))
    .insert_header(("X-User-ID", PHARMACIST.to_string()))
    .set_json(json!({ "order_ids": [order_id] }))
    .to_request();
  assert_eq!(test::call_service(&service, req).await.status(), StatusCode::FORBIDDEN);

  let req = test::TestRequest::post()
    .uri(&format!("/api/v1/pharmacies/{}/orders/send", PHARMACY))
    .insert_header(("X-User-ID", PHARMACIST.to_string()))
    .insert_header(("X-User-Role", "pharmacist"))
    .set_json(json!({ "order_ids": [order_id] }))
    .to_request();
  let resp = test::call_service(&service, req).await;
  assert_eq!(resp.status(), StatusCode::OK);
  let body: Value = test::read_body_json(resp).await;
  assert_eq!(body["status"], "SENT");
  assert_eq!(body["changed"], 1);
  assert!(body["confirmation_task_id"].is_i64());

  let req = test::TestRequest::get()
    .uri(&format!("/api/v1/pharmacies/{}/orders?status=sent", PHARMACY))
    .insert_header(("X-User-ID", PHARMACIST.to_string()))
    .insert_header(("X-User-Role", "pharmacist"))
    .to_request();
  let resp = test::call_service(&service, req).await;
  assert_eq!(resp.status(), StatusCode::OK);
  let body: Value = test::read_body_json(resp).await;
  assert_eq!(body.as_array().map(Vec::len), Some(1));

  let req = test::TestRequest::get()
    .uri(&format!("/api/v1/pharmacies/{}/orders?status=lost", PHARMACY))
    .insert_header(("X-User-ID", PHARMACIST.to_string()))
    .insert_header(("X-User-Role", "pharmacist"))
    .to_request();
  assert_eq!(test::call_service(&service, req).await.status(), StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn payment_proof_upload_is_accepted_then_processed() {
  let app = test_app().await;
  let order_id = app.place_simple(OFFER, 1, 1000).await.order.id;
  let service = init_app!(app);

  let req = test::TestRequest::post()
    .uri(&format!("/api/v1/orders/{}/payment-proof", order_id))
    .insert_header(("X-User-ID", BUYER.to_string()))
    .insert_header(("Content-Type", "image/png"))
    .set_payload(PNG.to_vec())
    .to_request();
  let resp = test::call_service(&service, req).await;
  assert_eq!(resp.status(), StatusCode::ACCEPTED);
  let body: Value = test::read_body_json(resp).await;
  assert_eq!(body["order_id"], order_id);

  assert_eq!(app.state.worker().drain().await.unwrap(), 1);
  assert_eq!(app.store.snapshot().await.orders[&order_id].status, OrderStatus::Processed);

  let req = test::TestRequest::post()
    .uri(&format!("/api/v1/orders/{}/payment-proof", order_id))
    .insert_header(("X-User-ID", BUYER.to_string()))
    .set_payload(vec![0u8; 4096])
    .to_request();
  assert_eq!(test::call_service(&service, req).await.status(), StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn shipping_quotes_are_sorted() {
  let app = test_app().await;
  let service = init_app!(app);
  let req = test::TestRequest::post()
    .uri("/api/v1/shipping/quotes")
    .set_json(json!({ "origin_city": "Bandung", "destination_city": "bandung", "weight_grams": 1200 }))
    .to_request();
  let resp = test::call_service(&service, req).await;
  assert_eq!(resp.status(), StatusCode::OK);
  let body: Value = test::read_body_json(resp).await;
  let costs: Vec<i64> = body["quotes"]
    .as_array()
    .unwrap()
    .iter()
    .map(|q| q["cost"].as_i64().unwrap())
    .collect();
  assert_eq!(costs, vec![17000, 19000, 30000]);

  let req = test::TestRequest::post()
    .uri("/api/v1/shipping/quotes")
    .set_json(json!({ "origin_city": "", "destination_city": "Jakarta", "weight_grams": 0 }))
    .to_request();
  assert_eq!(test::call_service(&service, req).await.status(), StatusCode::BAD_REQUEST);
}

struct OfflineCourier;

#[async_trait]
impl CourierQuoter for OfflineCourier {
  fn name(&self) -> &str {
    "offline"
  }

  async fn quote(&self, _request: &QuoteRequest) -> Result<Vec<ShippingQuote>, QuoteError> {
    Err(QuoteError::Unavailable("maintenance window".to_string()))
  }
}

#[actix_web::test]
async fn failing_couriers_are_listed_beside_quotes() {
  let app = test_app().await;
  let cargo = FlatRateCourier::new(
    "cargo",
    vec![FlatRateService {
      service: "economy".to_string(),
      base: 5_000,
      per_kg: 1_000,
      etd_days: 5,
      same_city_only: false,
    }],
  );
  let couriers: Vec<Arc<dyn CourierQuoter>> = vec![Arc::new(OfflineCourier), Arc::new(cargo)];
  let state = app.state.clone().with_couriers(couriers);
  let service = test::init_service(
    App::new()
      .app_data(web::Data::new(state))
      .configure(configure_app_routes),
  )
  .await;

  let req = test::TestRequest::post()
    .uri("/api/v1/shipping/quotes")
    .set_json(json!({ "origin_city": "Bandung", "destination_city": "Jakarta", "weight_grams": 2500 }))
    .to_request();
  let resp = test::call_service(&service, req).await;
  assert_eq!(resp.status(), StatusCode::OK);
  let body: Value = test::read_body_json(resp).await;
  assert_eq!(body["quotes"].as_array().unwrap().len(), 1);
  assert_eq!(body["quotes"][0]["courier"], "cargo");
  assert_eq!(body["quotes"][0]["cost"], 8000);
  assert_eq!(body["failures"][0]["courier"], "offline");
  assert_eq!(body["failures"][0]["message"], "courier unavailable: maintenance window");
}
