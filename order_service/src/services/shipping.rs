// medflow-orders/src/services/shipping.rs

//! Shipping quotes gathered from several couriers at once.
//!
//! Checkout takes the ship cost as an input; this only helps the client pick one.
//! Every courier is asked concurrently, and a courier that errors or times out
//! is reported next to the quotes that did arrive.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{instrument, warn};
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct QuoteRequest {
  #[validate(length(min = 1, message = "origin_city is required"))]
  pub origin_city: String,
  #[validate(length(min = 1, message = "destination_city is required"))]
  pub destination_city: String,
  #[validate(range(min = 1, max = 100_000, message = "weight_grams must be between 1 and 100000"))]
  pub weight_grams: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShippingQuote {
  pub courier: String,
  pub service: String,
  pub cost: i64,
  pub etd_days: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CourierFailure {
  pub courier: String,
  pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct QuoteSummary {
  /// Cheapest first.
  pub quotes: Vec<ShippingQuote>,
  pub failures: Vec<CourierFailure>,
}

#[derive(Debug, Error)]
pub enum QuoteError {
  #[error("route not served")]
  Unserved,
  #[error("courier unavailable: {0}")]
  Unavailable(String),
}

#[async_trait]
pub trait CourierQuoter: Send + Sync {
  fn name(&self) -> &str;
  async fn quote(&self, request: &QuoteRequest) -> Result<Vec<ShippingQuote>, QuoteError>;
}

/// A courier priced by a fixed table: base fare plus a per-started-kilogram rate.
#[derive(Debug, Clone)]
pub struct FlatRateCourier {
  pub name: String,
  pub services: Vec<FlatRateService>,
}

#[derive(Debug, Clone)]
pub struct FlatRateService {
  pub service: String,
  pub base: i64,
  pub per_kg: i64,
  pub etd_days: u32,
  pub same_city_only: bool,
}

impl FlatRateCourier {
  pub fn new(name: impl Into<String>, services: Vec<FlatRateService>) -> Self {
    Self {
      name: name.into(),
      services,
    }
  }
}

#[async_trait]
impl CourierQuoter for FlatRateCourier {
  fn name(&self) -> &str {
    &self.name
  }

  async fn quote(&self, request: &QuoteRequest) -> Result<Vec<ShippingQuote>, QuoteError> {
    let same_city = request.origin_city.eq_ignore_ascii_case(&request.destination_city);
    let kilograms = (request.weight_grams.max(1) + 999) / 1000;
    let quotes: Vec<ShippingQuote> = self
      .services
      .iter()
      .filter(|s| same_city || !s.same_city_only)
      .map(|s| ShippingQuote {
        courier: self.name.clone(),
        service: s.service.clone(),
        cost: s.base + s.per_kg * kilograms,
        etd_days: s.etd_days,
      })
      .collect();
    if quotes.is_empty() {
      return Err(QuoteError::Unserved);
    }
    Ok(quotes)
  }
}

/// Couriers available out of the box.
pub fn default_couriers() -> Vec<Arc<dyn CourierQuoter>> {
  vec![
    Arc::new(FlatRateCourier::new(
      "instant",
      vec![FlatRateService {
        service: "same-day".to_string(),
        base: 15_000,
        per_kg: 2_000,
        etd_days: 0,
        same_city_only: true,
      }],
    )),
    Arc::new(FlatRateCourier::new(
      "regular",
      vec![
        FlatRateService {
          service: "reg".to_string(),
          base: 9_000,
          per_kg: 4_000,
          etd_days: 3,
          same_city_only: false,
        },
        FlatRateService {
          service: "yes".to_string(),
          base: 18_000,
          per_kg: 6_000,
          etd_days: 1,
          same_city_only: false,
        },
      ],
    )),
  ]
}

#[instrument(skip(couriers), fields(couriers = couriers.len()))]
pub async fn collect_quotes(
  couriers: &[Arc<dyn CourierQuoter>],
  request: &QuoteRequest,
  per_courier_timeout: Duration,
) -> QuoteSummary {
  let mut set = JoinSet::new();
  for courier in couriers {
    let courier = Arc::clone(courier);
    let request = request.clone();
    set.spawn(async move {
      let name = courier.name().to_string();
      let outcome = match tokio::time::timeout(per_courier_timeout, courier.quote(&request)).await {
        Ok(Ok(quotes)) => Ok(quotes),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err(format!("timed out after {:?}", per_courier_timeout)),
      };
      (name, outcome)
    });
  }

  let mut summary = QuoteSummary::default();
  while let Some(joined) = set.join_next().await {
    match joined {
      Ok((_, Ok(quotes))) => summary.quotes.extend(quotes),
      Ok((courier, Err(message))) => {
        warn!(%courier, %message, "Courier quote failed.");
        summary.failures.push(CourierFailure { courier, message });
      }
      Err(join_err) => {
        warn!(error = %join_err, "Courier quote task panicked.");
        summary.failures.push(CourierFailure {
          courier: "unknown".to_string(),
          message: join_err.to_string(),
        });
      }
    }
  }
  summary
    .quotes
    .sort_by(|a, b| a.cost.cmp(&b.cost).then_with(|| a.courier.cmp(&b.courier)));
  summary.failures.sort_by(|a, b| a.courier.cmp(&b.courier));
  summary
}

#[cfg(test)]
mod tests {
  use super::*;

  struct SlowCourier;

  #[async_trait]
  impl CourierQuoter for SlowCourier {
    fn name(&self) -> &str {
      "slow"
    }

    async fn quote(&self, _request: &QuoteRequest) -> Result<Vec<ShippingQuote>, QuoteError> {
      tokio::time::sleep(Duration::from_secs(5)).await;
      Ok(vec![])
    }
  }

  struct BrokenCourier;

  #[async_trait]
  impl CourierQuoter for BrokenCourier {
    fn name(&self) -> &str {
      "broken"
    }

    async fn quote(&self, _request: &QuoteRequest) -> Result<Vec<ShippingQuote>, QuoteError> {
      Err(QuoteError::Unavailable("maintenance".to_string()))
    }
  }

  fn request(origin: &str, destination: &str) -> QuoteRequest {
    QuoteRequest {
      origin_city: origin.to_string(),
      destination_city: destination.to_string(),
      weight_grams: 1_200,
    }
  }

  #[tokio::test]
  async fn quotes_are_merged_and_sorted() {
    let summary = collect_quotes(&default_couriers(), &request("Bandung", "bandung"), Duration::from_secs(1)).await;
    let costs: Vec<i64> = summary.quotes.iter().map(|q| q.cost).collect();
    // 2 kg: reg 17000, same-day 19000, yes 30000
    assert_eq!(costs, vec![17_000, 19_000, 30_000]);
    assert!(summary.failures.is_empty());
  }

  #[tokio::test]
  async fn failing_couriers_are_reported_alongside_quotes() {
    let mut couriers = default_couriers();
    couriers.push(Arc::new(BrokenCourier));
    couriers.push(Arc::new(SlowCourier));

    let summary = collect_quotes(&couriers, &request("Bandung", "Jakarta"), Duration::from_millis(50)).await;
    assert_eq!(summary.quotes.len(), 2);
    let failed: Vec<&str> = summary.failures.iter().map(|f| f.courier.as_str()).collect();
    assert_eq!(failed, vec!["broken", "instant", "slow"]);
    assert!(summary.failures[2].message.contains("timed out"));
  }
}
