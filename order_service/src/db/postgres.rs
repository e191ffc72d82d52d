// medflow-orders/src/db/postgres.rs

use super::{CartStore, CatalogReader, OrderLedger, StockLedger, Store, UnitOfWork};
use crate::errors::{AppError, Result};
use crate::models::{Address, CartItem, NewOrder, NewOrderLine, Offer, Order, OrderDetails, OrderLine, OrderStatus, Pharmacy};
use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use std::collections::BTreeMap;
use tracing::instrument;

const ORDER_COLUMNS: &str = "id, user_id, pharmacy_id, status, voice_number, total_product_price, ship_cost, \
   total_payment, payment_image_url, description, recipient_name, phone, street, city, province, postal_code, \
   created_at, updated_at";

fn status_texts(statuses: &[OrderStatus]) -> Vec<String> {
  statuses.iter().map(|s| s.as_str().to_string()).collect()
}

#[derive(Clone)]
pub struct PgStore {
  pool: PgPool,
}

impl PgStore {
  pub fn new(pool: PgPool) -> Self {
    Self { pool }
  }

}

#[async_trait]
impl Store for PgStore {
  async fn begin(&self) -> Result<Box<dyn UnitOfWork>> {
    let tx = self.pool.begin().await?;
    Ok(Box::new(PgUnitOfWork {
      tx,
      product_sales: BTreeMap::new(),
    }))
  }

  async fn find_order(&self, order_id: i64) -> Result<Option<Order>> {
    let sql = format!("SELECT {} FROM orders WHERE id = $1", ORDER_COLUMNS);
    Ok(sqlx::query_as::<_, Order>(&sql).bind(order_id).fetch_optional(&self.pool).await?)
  }

  async fn find_pharmacy(&self, pharmacy_id: i64) -> Result<Option<Pharmacy>> {
    Ok(
      sqlx::query_as::<_, Pharmacy>("SELECT id, pharmacist_id, name, is_active, city FROM pharmacies WHERE id = $1")
        .bind(pharmacy_id)
        .fetch_optional(&self.pool)
        .await?,
    )
  }

  async fn order_details(&self, order_id: i64) -> Result<Option<OrderDetails>> {
    let Some(order) = self.find_order(order_id).await? else {
      return Ok(None);
    };
    let lines = sqlx::query_as::<_, OrderLine>(
      "SELECT id, order_id, offer_id, quantity, price FROM order_lines WHERE order_id = $1 ORDER BY id",
    )
    .bind(order_id)
    .fetch_all(&self.pool)
    .await?;
    let pharmacy = self
      .find_pharmacy(order.pharmacy_id)
      .await?
      .ok_or_else(|| AppError::Internal(format!("order {} references a missing pharmacy", order_id)))?;
    Ok(Some(OrderDetails { order, lines, pharmacy }))
  }

  async fn pharmacy_orders(&self, pharmacy_id: i64, status: Option<OrderStatus>) -> Result<Vec<Order>> {
    let sql = format!(
      "SELECT {} FROM orders WHERE pharmacy_id = $1 AND ($2::order_status IS NULL OR status = $2) \
       ORDER BY created_at DESC, id DESC",
      ORDER_COLUMNS
    );
    Ok(
      sqlx::query_as::<_, Order>(&sql)
        .bind(pharmacy_id)
        .bind(status)
        .fetch_all(&self.pool)
        .await?,
    )
  }
}

/// One Postgres transaction. Dropping it without `commit` rolls back.
pub struct PgUnitOfWork {
  tx: Transaction<'static, Postgres>,
  /// Net sold-amount change per product, written at commit. Product rows are
  /// only locked after every offer row, in ascending id order.
  product_sales: BTreeMap<i64, i64>,
}

impl PgUnitOfWork {
  fn record_product_sale(&mut self, product_id: i64, delta: i64) {
    *self.product_sales.entry(product_id).or_insert(0) += delta;
  }

  async fn flush_product_sales(&mut self) -> Result<()> {
    for (product_id, delta) in std::mem::take(&mut self.product_sales) {
      if delta == 0 {
        continue;
      }
      sqlx::query("UPDATE products SET sold_amount = GREATEST(sold_amount + $1, 0) WHERE id = $2")
        .bind(delta)
        .bind(product_id)
        .execute(&mut *self.tx)
        .await?;
    }
    Ok(())
  }
}

#[async_trait]
impl StockLedger for PgUnitOfWork {
  async fn check_active_and_quantity(&mut self, offer_id: i64) -> Result<Option<Offer>> {
    Ok(
      sqlx::query_as::<_, Offer>(
        "SELECT id, pharmacy_id, product_id, stock_quantity, price, sold_amount, is_active, stock_last_manual_update_at \
         FROM offers WHERE id = $1",
      )
      .bind(offer_id)
      .fetch_optional(&mut *self.tx)
      .await?,
    )
  }

  #[instrument(skip(self), err)]
  async fn decrement_and_record_sale(&mut self, offer_id: i64, quantity: i32) -> Result<bool> {
    // The stock guard is re-asserted here; concurrent decrements serialize on the row lock.
    let product_id: Option<i64> = sqlx::query_scalar(
      "UPDATE offers SET stock_quantity = stock_quantity - $1, sold_amount = sold_amount + $1 \
       WHERE id = $2 AND is_active AND stock_quantity >= $1 RETURNING product_id",
    )
    .bind(quantity)
    .bind(offer_id)
    .fetch_optional(&mut *self.tx)
    .await?;

    let Some(product_id) = product_id else {
      return Ok(false);
    };
    self.record_product_sale(product_id, i64::from(quantity));
    Ok(true)
  }

  #[instrument(skip(self), err)]
  async fn restore(&mut self, offer_id: i64, quantity: i32) -> Result<()> {
    let product_id: Option<i64> = sqlx::query_scalar(
      "UPDATE offers SET stock_quantity = stock_quantity + $1, sold_amount = GREATEST(sold_amount - $1, 0) \
       WHERE id = $2 RETURNING product_id",
    )
    .bind(quantity)
    .bind(offer_id)
    .fetch_optional(&mut *self.tx)
    .await?;

    let product_id =
      product_id.ok_or_else(|| AppError::Internal(format!("cannot restore stock of missing offer {}", offer_id)))?;
    self.record_product_sale(product_id, -i64::from(quantity));
    Ok(())
  }
}

#[async_trait]
impl CartStore for PgUnitOfWork {
  async fn cart_item(&mut self, user_id: i64, offer_id: i64) -> Result<Option<CartItem>> {
    Ok(
      sqlx::query_as::<_, CartItem>(
        "SELECT id, user_id, offer_id, quantity FROM cart_items WHERE user_id = $1 AND offer_id = $2 FOR UPDATE",
      )
      .bind(user_id)
      .bind(offer_id)
      .fetch_optional(&mut *self.tx)
      .await?,
    )
  }

  async fn delete_cart_line(&mut self, user_id: i64, offer_id: i64) -> Result<()> {
    sqlx::query("DELETE FROM cart_items WHERE user_id = $1 AND offer_id = $2")
      .bind(user_id)
      .bind(offer_id)
      .execute(&mut *self.tx)
      .await?;
    Ok(())
  }
}

#[async_trait]
impl CatalogReader for PgUnitOfWork {
  async fn find_pharmacy(&mut self, pharmacy_id: i64) -> Result<Option<Pharmacy>> {
    Ok(
      sqlx::query_as::<_, Pharmacy>("SELECT id, pharmacist_id, name, is_active, city FROM pharmacies WHERE id = $1")
        .bind(pharmacy_id)
        .fetch_optional(&mut *self.tx)
        .await?,
    )
  }

  async fn find_address(&mut self, address_id: i64, user_id: i64) -> Result<Option<Address>> {
    Ok(
      sqlx::query_as::<_, Address>(
        "SELECT id, user_id, recipient_name, phone, street, city, province, postal_code \
         FROM addresses WHERE id = $1 AND user_id = $2",
      )
      .bind(address_id)
      .bind(user_id)
      .fetch_optional(&mut *self.tx)
      .await?,
    )
  }
}

#[async_trait]
impl OrderLedger for PgUnitOfWork {
  async fn insert_order(&mut self, new: &NewOrder) -> Result<Order> {
    let sql = format!(
      "INSERT INTO orders (user_id, pharmacy_id, status, voice_number, total_product_price, ship_cost, total_payment, \
       description, recipient_name, phone, street, city, province, postal_code) \
       VALUES ($1, $2, 'WAITING', $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13) RETURNING {}",
      ORDER_COLUMNS
    );
    Ok(
      sqlx::query_as::<_, Order>(&sql)
        .bind(new.user_id)
        .bind(new.pharmacy_id)
        .bind(&new.voice_number)
        .bind(new.total_product_price)
        .bind(new.ship_cost)
        .bind(new.total_payment)
        .bind(&new.description)
        .bind(&new.recipient_name)
        .bind(&new.phone)
        .bind(&new.street)
        .bind(&new.city)
        .bind(&new.province)
        .bind(&new.postal_code)
        .fetch_one(&mut *self.tx)
        .await?,
    )
  }

  async fn insert_order_line(&mut self, order_id: i64, line: &NewOrderLine) -> Result<OrderLine> {
    Ok(
      sqlx::query_as::<_, OrderLine>(
        "INSERT INTO order_lines (order_id, offer_id, quantity, price) VALUES ($1, $2, $3, $4) \
         RETURNING id, order_id, offer_id, quantity, price",
      )
      .bind(order_id)
      .bind(line.offer_id)
      .bind(line.quantity)
      .bind(line.price)
      .fetch_one(&mut *self.tx)
      .await?,
    )
  }

  async fn lock_orders(&mut self, order_ids: &[i64]) -> Result<Vec<Order>> {
    let sql = format!("SELECT {} FROM orders WHERE id = ANY($1) ORDER BY id FOR UPDATE", ORDER_COLUMNS);
    Ok(sqlx::query_as::<_, Order>(&sql).bind(order_ids).fetch_all(&mut *self.tx).await?)
  }

  async fn order_lines(&mut self, order_ids: &[i64]) -> Result<Vec<OrderLine>> {
    Ok(
      sqlx::query_as::<_, OrderLine>(
        "SELECT id, order_id, offer_id, quantity, price FROM order_lines WHERE order_id = ANY($1) ORDER BY id",
      )
      .bind(order_ids)
      .fetch_all(&mut *self.tx)
      .await?,
    )
  }

  #[instrument(skip(self), err)]
  async fn transition_orders(&mut self, order_ids: &[i64], from: &[OrderStatus], to: OrderStatus) -> Result<u64> {
    let result = sqlx::query(
      "UPDATE orders SET status = $1, updated_at = NOW() WHERE id = ANY($2) AND status::text = ANY($3)",
    )
    .bind(to)
    .bind(order_ids)
    .bind(status_texts(from))
    .execute(&mut *self.tx)
    .await?;
    Ok(result.rows_affected())
  }

  async fn attach_payment_proof(&mut self, order_id: i64, user_id: i64, url: &str) -> Result<bool> {
    let result = sqlx::query(
      "UPDATE orders SET payment_image_url = $1, updated_at = NOW() \
       WHERE id = $2 AND user_id = $3 AND status::text = ANY($4)",
    )
    .bind(url)
    .bind(order_id)
    .bind(user_id)
    .bind(status_texts(&[OrderStatus::Waiting, OrderStatus::Processed]))
    .execute(&mut *self.tx)
    .await?;
    Ok(result.rows_affected() == 1)
  }
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
  async fn commit(mut self: Box<Self>) -> Result<()> {
    self.flush_product_sales().await?;
    self.tx.commit().await?;
    Ok(())
  }

  async fn rollback(self: Box<Self>) -> Result<()> {
    self.tx.rollback().await?;
    Ok(())
  }
}
