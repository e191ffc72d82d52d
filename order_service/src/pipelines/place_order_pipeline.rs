// medflow-orders/src/pipelines/place_order_pipeline.rs

//! Cart to order conversion. Every check after `open_unit_of_work` reads
//! inside the same transaction that later decrements the stock, and nothing
//! is visible to other transactions until `commit`.

use crate::db::{CartStore, CatalogReader, OrderLedger, StockLedger, UnitOfWork};
use crate::errors::{AppError, CheckoutError, Result as AppResult};
use crate::models::{generate_voice_number, NewOrder, NewOrderLine, OrderLine, OrderLineRequest};
use crate::pipelines::common_steps;
use crate::pipelines::contexts::{put_uow, take_uow, PlaceOrderCtxData};
use chrono::Utc;
use medflow::{ContextData, FlowRegistry, Pipeline, PipelineControl};
use tracing::{info, instrument, warn};
use validator::Validate;

pub fn register_place_order_pipeline(registry: &FlowRegistry<AppError>) {
  let mut p = Pipeline::<PlaceOrderCtxData, AppError>::new(&[
    ("validate_request", false, None),
    ("open_unit_of_work", false, None),
    ("check_pharmacy", false, None),
    ("snapshot_address", false, None),
    ("check_cart_lines", false, None),
    ("check_offer_stock", false, None),
    ("insert_order", false, None),
    ("decrement_stock_and_insert_lines", false, None),
    ("clear_cart_lines", false, None),
    ("commit", false, None),
  ])
  .with_name("place_order");

  p.on("validate_request", |ctx_data: ContextData<PlaceOrderCtxData>| async move {
    ctx_data.read().request.validate()?;
    Ok::<_, AppError>(PipelineControl::Continue)
  });
  p.on("open_unit_of_work", common_steps::open_unit_of_work::<PlaceOrderCtxData>);
  p.on("check_pharmacy", check_pharmacy);
  p.on("snapshot_address", snapshot_address);
  p.on("check_cart_lines", check_cart_lines);
  p.on("check_offer_stock", check_offer_stock);
  p.on("insert_order", insert_order);
  p.on("decrement_stock_and_insert_lines", decrement_stock_and_insert_lines);
  p.on("clear_cart_lines", clear_cart_lines);
  p.on("commit", common_steps::commit_unit_of_work::<PlaceOrderCtxData>);
  p.after("commit", |ctx_data: ContextData<PlaceOrderCtxData>| async move {
    ctx_data.with(|ctx| {
      if let Some(order) = &ctx.order {
        info!(
          order_id = order.id,
          voice_number = %order.voice_number,
          total_payment = order.total_payment,
          lines = ctx.lines.len(),
          "Order placed."
        );
      }
    });
    Ok::<_, AppError>(PipelineControl::Continue)
  });

  p.on_failure(common_steps::rollback_on_failure::<PlaceOrderCtxData>);
  p.on_failure(|ctx_data: ContextData<PlaceOrderCtxData>, failure| async move {
    let (user_id, pharmacy_id) = ctx_data.with(|ctx| (ctx.user_id, ctx.request.pharmacy_id));
    warn!(user_id, pharmacy_id, step = %failure.step_name, reason = %failure.message, "Checkout refused.");
  });

  registry.register(p);
}

#[instrument(skip_all, err)]
async fn check_pharmacy(ctx_data: ContextData<PlaceOrderCtxData>) -> AppResult<PipelineControl> {
  let pharmacy_id = ctx_data.read().request.pharmacy_id;
  let mut uow = take_uow(&ctx_data)?;
  let found = uow.find_pharmacy(pharmacy_id).await;
  put_uow(&ctx_data, uow);

  let pharmacy = found?.ok_or_else(|| AppError::NotFound(format!("pharmacy {} not found", pharmacy_id)))?;
  if !pharmacy.is_active {
    return Err(CheckoutError::InactivePharmacy { pharmacy_id }.into());
  }
  ctx_data.write().pharmacy = Some(pharmacy);
  Ok(PipelineControl::Continue)
}

#[instrument(skip_all, err)]
async fn snapshot_address(ctx_data: ContextData<PlaceOrderCtxData>) -> AppResult<PipelineControl> {
  let (address_id, user_id) = ctx_data.with(|ctx| (ctx.request.address_id, ctx.user_id));
  let mut uow = take_uow(&ctx_data)?;
  let found = uow.find_address(address_id, user_id).await;
  put_uow(&ctx_data, uow);

  let address = found?.ok_or(CheckoutError::AddressNotFound { address_id })?;
  ctx_data.write().address = Some(address);
  Ok(PipelineControl::Continue)
}

#[instrument(skip_all, err)]
async fn check_cart_lines(ctx_data: ContextData<PlaceOrderCtxData>) -> AppResult<PipelineControl> {
  let (user_id, lines) = ctx_data.with(|ctx| (ctx.user_id, ctx.request.lines.clone()));
  let mut uow = take_uow(&ctx_data)?;
  let checked = cart_covers_lines(uow.as_mut(), user_id, &lines).await;
  put_uow(&ctx_data, uow);
  checked?;
  Ok(PipelineControl::Continue)
}

async fn cart_covers_lines(uow: &mut dyn UnitOfWork, user_id: i64, lines: &[OrderLineRequest]) -> AppResult<()> {
  for line in lines {
    let item = uow
      .cart_item(user_id, line.offer_id)
      .await?
      .ok_or(CheckoutError::CartItemMissing { offer_id: line.offer_id })?;
    if item.quantity < line.quantity {
      return Err(
        CheckoutError::InsufficientCartQuantity {
          offer_id: line.offer_id,
          in_cart: item.quantity,
          requested: line.quantity,
        }
        .into(),
      );
    }
  }
  Ok(())
}

#[instrument(skip_all, err)]
async fn check_offer_stock(ctx_data: ContextData<PlaceOrderCtxData>) -> AppResult<PipelineControl> {
  let (pharmacy_id, mut lines) = ctx_data.with(|ctx| (ctx.request.pharmacy_id, ctx.request.lines.clone()));
  // Offer rows are locked in ascending id order.
  lines.sort_by_key(|line| line.offer_id);
  let mut uow = take_uow(&ctx_data)?;
  let priced = price_lines(uow.as_mut(), pharmacy_id, &lines).await;
  put_uow(&ctx_data, uow);
  ctx_data.write().priced_lines = priced?;
  Ok(PipelineControl::Continue)
}

/// Checks every line against its live offer and snapshots the offer price.
async fn price_lines(
  uow: &mut dyn UnitOfWork,
  pharmacy_id: i64,
  lines: &[OrderLineRequest],
) -> AppResult<Vec<NewOrderLine>> {
  let mut priced = Vec::with_capacity(lines.len());
  for line in lines {
    let offer_id = line.offer_id;
    let offer = uow
      .check_active_and_quantity(offer_id)
      .await?
      .ok_or(CheckoutError::OfferNotFound { offer_id })?;
    if offer.pharmacy_id != pharmacy_id {
      return Err(CheckoutError::OfferNotInPharmacy { offer_id, pharmacy_id }.into());
    }
    if !offer.is_active {
      return Err(CheckoutError::InactiveProduct { offer_id }.into());
    }
    if offer.stock_quantity < line.quantity {
      return Err(
        CheckoutError::InsufficientStock {
          offer_id,
          requested: line.quantity,
        }
        .into(),
      );
    }
    if offer.price != line.price {
      return Err(
        CheckoutError::PriceMismatch {
          offer_id,
          submitted: line.price,
          current: offer.price,
        }
        .into(),
      );
    }
    priced.push(NewOrderLine {
      offer_id,
      quantity: line.quantity,
      price: offer.price,
    });
  }
  Ok(priced)
}

fn order_totals(lines: &[NewOrderLine], ship_cost: i64) -> AppResult<(i64, i64)> {
  let overflow = || AppError::validation("order total is too large");
  let product_total = lines
    .iter()
    .try_fold(0i64, |acc, line| {
      line
        .price
        .checked_mul(i64::from(line.quantity))
        .and_then(|subtotal| acc.checked_add(subtotal))
    })
    .ok_or_else(overflow)?;
  let payment_total = product_total.checked_add(ship_cost).ok_or_else(overflow)?;
  Ok((product_total, payment_total))
}

#[instrument(skip_all, err)]
async fn insert_order(ctx_data: ContextData<PlaceOrderCtxData>) -> AppResult<PipelineControl> {
  let new_order = {
    let ctx = ctx_data.read();
    let address = ctx
      .address
      .as_ref()
      .ok_or_else(|| AppError::Internal("address snapshot missing".to_string()))?;
    let (total_product_price, total_payment) = order_totals(&ctx.priced_lines, ctx.request.ship_cost)?;
    NewOrder {
      user_id: ctx.user_id,
      pharmacy_id: ctx.request.pharmacy_id,
      voice_number: generate_voice_number(ctx.user_id, Utc::now()),
      total_product_price,
      ship_cost: ctx.request.ship_cost,
      total_payment,
      description: ctx.request.description.clone(),
      recipient_name: address.recipient_name.clone(),
      phone: address.phone.clone(),
      street: address.street.clone(),
      city: address.city.clone(),
      province: address.province.clone(),
      postal_code: address.postal_code.clone(),
    }
  };

  let mut uow = take_uow(&ctx_data)?;
  let inserted = uow.insert_order(&new_order).await;
  put_uow(&ctx_data, uow);
  ctx_data.write().order = Some(inserted?);
  Ok(PipelineControl::Continue)
}

#[instrument(skip_all, err)]
async fn decrement_stock_and_insert_lines(ctx_data: ContextData<PlaceOrderCtxData>) -> AppResult<PipelineControl> {
  let (order_id, priced) = ctx_data.with(|ctx| (ctx.order.as_ref().map(|o| o.id), ctx.priced_lines.clone()));
  let order_id = order_id.ok_or_else(|| AppError::Internal("order row missing".to_string()))?;

  let mut uow = take_uow(&ctx_data)?;
  let written = write_lines(uow.as_mut(), order_id, &priced).await;
  put_uow(&ctx_data, uow);
  ctx_data.write().lines = written?;
  Ok(PipelineControl::Continue)
}

/// Each decrement is paired with its line insert; a decrement that finds too
/// little stock (another checkout got there first) fails the whole order.
async fn write_lines(uow: &mut dyn UnitOfWork, order_id: i64, priced: &[NewOrderLine]) -> AppResult<Vec<OrderLine>> {
  let mut written = Vec::with_capacity(priced.len());
  for line in priced {
    if !uow.decrement_and_record_sale(line.offer_id, line.quantity).await? {
      return Err(
        CheckoutError::InsufficientStock {
          offer_id: line.offer_id,
          requested: line.quantity,
        }
        .into(),
      );
    }
    written.push(uow.insert_order_line(order_id, line).await?);
  }
  Ok(written)
}

#[instrument(skip_all, err)]
async fn clear_cart_lines(ctx_data: ContextData<PlaceOrderCtxData>) -> AppResult<PipelineControl> {
  let (user_id, offer_ids) = ctx_data.with(|ctx| {
    (
      ctx.user_id,
      ctx.priced_lines.iter().map(|l| l.offer_id).collect::<Vec<_>>(),
    )
  });
  let mut uow = take_uow(&ctx_data)?;
  let mut cleared = Ok(());
  for offer_id in offer_ids {
    if let Err(e) = uow.delete_cart_line(user_id, offer_id).await {
      cleared = Err(e);
      break;
    }
  }
  put_uow(&ctx_data, uow);
  cleared?;
  Ok(PipelineControl::Continue)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn totals_include_ship_cost() {
    let lines = [
      NewOrderLine {
        offer_id: 1,
        quantity: 2,
        price: 1000,
      },
      NewOrderLine {
        offer_id: 2,
        quantity: 1,
        price: 250,
      },
    ];
    assert_eq!(order_totals(&lines, 500).unwrap(), (2250, 2750));
  }

  #[test]
  fn overflowing_totals_are_rejected() {
    let lines = [NewOrderLine {
      offer_id: 1,
      quantity: 2,
      price: i64::MAX,
    }];
    assert!(order_totals(&lines, 0).is_err());
  }
}
