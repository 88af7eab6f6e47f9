//! PostgreSQL store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use super::{
    revenue_counts, CartRepository, OrderFilter, OrderRepository, OrderStats, StockLedger, StoreError, StoreResult,
    WebhookLogRepository,
};
use crate::domain::aggregates::{
    Cart, CartItem, LineItem, Order, OrderStatus, PaymentProvider, Product, ProviderReference, ShippingAddress,
    WebhookLog,
};
use crate::domain::value_objects::{Money, OrderId};

#[derive(Clone)]
pub struct PgStore {
    db: PgPool,
}

impl PgStore {
    pub fn new(db: PgPool) -> Self { Self { db } }
}

#[derive(Debug, sqlx::FromRow)]
struct ProductRow { id: Uuid, title: String, price: i64, stock: i64, is_active: bool }

impl From<ProductRow> for Product {
    fn from(r: ProductRow) -> Self {
        Product { id: r.id, title: r.title, price: Money::from_minor(r.price), stock: r.stock, is_active: r.is_active }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct CartItemRow { product_id: Uuid, title: String, unit_price: i64, qty: i32 }

#[derive(Debug, sqlx::FromRow)]
struct OrderRow {
    order_id: String,
    user_id: Uuid,
    items: Json<Vec<LineItem>>,
    shipping_address: Json<ShippingAddress>,
    payment_method: String,
    payment_provider: Option<String>,
    external_order_id: Option<String>,
    external_payment_id: Option<String>,
    external_signature: Option<String>,
    status: String,
    total_amount: i64,
    delivery_notes: String,
    failure_reason: Option<String>,
    completed_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    version: i64,
}

impl TryFrom<OrderRow> for Order {
    type Error = StoreError;

    fn try_from(r: OrderRow) -> Result<Self, Self::Error> {
        let corrupt = |field: &str, value: &str| StoreError::Corrupt(format!("order {}: bad {} {:?}", r.order_id, field, value));
        let payment_method = r.payment_method.parse().map_err(|_| corrupt("payment_method", &r.payment_method))?;
        let status = r.status.parse().map_err(|_| corrupt("status", &r.status))?;
        let payment_provider = match r.payment_provider.as_deref() {
            Some(p) => Some(p.parse::<PaymentProvider>().map_err(|_| corrupt("payment_provider", p))?),
            None => None,
        };
        Ok(Order {
            order_id: OrderId::from(r.order_id),
            user_id: r.user_id,
            items: r.items.0,
            shipping_address: r.shipping_address.0,
            payment_method,
            payment_provider,
            provider_reference: ProviderReference {
                external_order_id: r.external_order_id,
                external_payment_id: r.external_payment_id,
                external_signature: r.external_signature,
            },
            status,
            total_amount: Money::from_minor(r.total_amount),
            delivery_notes: r.delivery_notes,
            failure_reason: r.failure_reason,
            completed_at: r.completed_at,
            cancelled_at: r.cancelled_at,
            created_at: r.created_at,
            updated_at: r.updated_at,
            version: r.version,
            events: vec![],
        })
    }
}

#[async_trait]
impl StockLedger for PgStore {
    async fn product(&self, product_id: Uuid) -> StoreResult<Option<Product>> {
        let row = sqlx::query_as::<_, ProductRow>("SELECT id, title, price, stock, is_active FROM products WHERE id = $1")
            .bind(product_id)
            .fetch_optional(&self.db)
            .await?;
        Ok(row.map(Product::from))
    }

    async fn decrement_stock(&self, product_id: Uuid, qty: u32) -> StoreResult<()> {
        let qty = i64::from(qty);
        let updated = sqlx::query("UPDATE products SET stock = stock - $2, updated_at = NOW() WHERE id = $1 AND stock >= $2")
            .bind(product_id)
            .bind(qty)
            .execute(&self.db)
            .await?
            .rows_affected();
        if updated == 1 { return Ok(()); }
        match self.product(product_id).await? {
            Some(_) => Err(StoreError::InsufficientStock(product_id)),
            None => Err(StoreError::ProductNotFound(product_id)),
        }
    }

    async fn increment_stock(&self, product_id: Uuid, qty: u32) -> StoreResult<()> {
        let updated = sqlx::query("UPDATE products SET stock = stock + $2, updated_at = NOW() WHERE id = $1")
            .bind(product_id)
            .bind(i64::from(qty))
            .execute(&self.db)
            .await?
            .rows_affected();
        if updated == 0 { return Err(StoreError::ProductNotFound(product_id)); }
        Ok(())
    }
}

const ORDER_COLUMNS: &str = "order_id, user_id, items, shipping_address, payment_method, payment_provider, \
    external_order_id, external_payment_id, external_signature, status, total_amount, delivery_notes, \
    failure_reason, completed_at, cancelled_at, created_at, updated_at, version";

#[async_trait]
impl OrderRepository for PgStore {
    async fn insert(&self, order: &Order) -> StoreResult<()> {
        sqlx::query(&format!(
            "INSERT INTO orders ({ORDER_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)"
        ))
        .bind(order.order_id())
        .bind(order.user_id)
        .bind(Json(&order.items))
        .bind(Json(&order.shipping_address))
        .bind(order.payment_method.as_str())
        .bind(order.payment_provider.map(|p| p.as_str()))
        .bind(&order.provider_reference.external_order_id)
        .bind(&order.provider_reference.external_payment_id)
        .bind(&order.provider_reference.external_signature)
        .bind(order.status.as_str())
        .bind(order.total_amount.minor_units())
        .bind(&order.delivery_notes)
        .bind(&order.failure_reason)
        .bind(order.completed_at)
        .bind(order.cancelled_at)
        .bind(order.created_at)
        .bind(order.updated_at)
        .bind(order.version)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn find_by_order_id(&self, order_id: &str) -> StoreResult<Option<Order>> {
        sqlx::query_as::<_, OrderRow>(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE order_id = $1"))
            .bind(order_id)
            .fetch_optional(&self.db)
            .await?
            .map(Order::try_from)
            .transpose()
    }

    async fn find_by_provider_ref(&self, provider: PaymentProvider, external_order_id: &str) -> StoreResult<Option<Order>> {
        sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE payment_provider = $1 AND external_order_id = $2"
        ))
        .bind(provider.as_str())
        .bind(external_order_id)
        .fetch_optional(&self.db)
        .await?
        .map(Order::try_from)
        .transpose()
    }

    async fn update(&self, order: &Order) -> StoreResult<Order> {
        // Only mutable columns; items, totals, method and owner are frozen at insert.
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "UPDATE orders SET payment_provider = $3, external_order_id = $4, external_payment_id = $5, \
             external_signature = $6, status = $7, failure_reason = $8, completed_at = $9, cancelled_at = $10, \
             updated_at = $11, version = version + 1 \
             WHERE order_id = $1 AND version = $2 RETURNING {ORDER_COLUMNS}"
        ))
        .bind(order.order_id())
        .bind(order.version)
        .bind(order.payment_provider.map(|p| p.as_str()))
        .bind(&order.provider_reference.external_order_id)
        .bind(&order.provider_reference.external_payment_id)
        .bind(&order.provider_reference.external_signature)
        .bind(order.status.as_str())
        .bind(&order.failure_reason)
        .bind(order.completed_at)
        .bind(order.cancelled_at)
        .bind(order.updated_at)
        .fetch_optional(&self.db)
        .await?;
        match row {
            Some(row) => Order::try_from(row),
            None => match self.find_by_order_id(order.order_id()).await? {
                Some(_) => Err(StoreError::Conflict(order.order_id().to_string())),
                None => Err(StoreError::OrderNotFound(order.order_id().to_string())),
            },
        }
    }

    async fn list(&self, filter: &OrderFilter) -> StoreResult<(Vec<Order>, i64)> {
        let status = filter.status.map(|s| s.as_str());
        let rows = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE ($1::uuid IS NULL OR user_id = $1) AND ($2::text IS NULL OR status = $2) \
             ORDER BY created_at DESC LIMIT $3 OFFSET $4"
        ))
        .bind(filter.user_id)
        .bind(status)
        .bind(i64::from(filter.limit))
        .bind(filter.offset() as i64)
        .fetch_all(&self.db)
        .await?;
        let total: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM orders WHERE ($1::uuid IS NULL OR user_id = $1) AND ($2::text IS NULL OR status = $2)",
        )
        .bind(filter.user_id)
        .bind(status)
        .fetch_one(&self.db)
        .await?;
        let orders = rows.into_iter().map(Order::try_from).collect::<StoreResult<Vec<_>>>()?;
        Ok((orders, total.0))
    }

    async fn stats(&self) -> StoreResult<OrderStats> {
        let rows: Vec<(String, i64, i64)> =
            sqlx::query_as("SELECT status, COUNT(*), COALESCE(SUM(total_amount), 0)::BIGINT FROM orders GROUP BY status")
                .fetch_all(&self.db)
                .await?;
        let mut stats = OrderStats::default();
        for (status, count, revenue) in rows {
            let status: OrderStatus = status.parse().map_err(|_| StoreError::Corrupt(format!("order status {status:?}")))?;
            stats.total_orders += count;
            stats.status_counts.insert(status, count);
            if revenue_counts(status) {
                stats.total_revenue += revenue;
                stats.total_paid_orders += count;
            }
        }
        if stats.total_paid_orders > 0 {
            stats.average_order_value = stats.total_revenue / stats.total_paid_orders;
        }
        Ok(stats)
    }
}

#[async_trait]
impl CartRepository for PgStore {
    async fn cart_for(&self, user_id: Uuid) -> StoreResult<Cart> {
        let rows = sqlx::query_as::<_, CartItemRow>(
            "SELECT product_id, title, unit_price, qty FROM cart_items WHERE user_id = $1 ORDER BY added_at",
        )
        .bind(user_id)
        .fetch_all(&self.db)
        .await?;
        let items = rows
            .into_iter()
            .map(|r| {
                let qty = u32::try_from(r.qty).map_err(|_| StoreError::Corrupt(format!("cart qty {}", r.qty)))?;
                Ok(CartItem { product_id: r.product_id, title: r.title, unit_price: Money::from_minor(r.unit_price), qty })
            })
            .collect::<StoreResult<Vec<_>>>()?;
        Ok(Cart::with_items(user_id, items))
    }

    async fn clear(&self, user_id: Uuid) -> StoreResult<()> {
        sqlx::query("DELETE FROM cart_items WHERE user_id = $1").bind(user_id).execute(&self.db).await?;
        Ok(())
    }
}

#[async_trait]
impl WebhookLogRepository for PgStore {
    async fn insert(&self, log: &WebhookLog) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO webhook_logs (id, provider, event_type, provider_event_id, order_id, payment_id, signature, status, \
             raw_payload, error_message, processed_at, created_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(log.id)
        .bind(log.provider.as_str())
        .bind(&log.event_type)
        .bind(&log.provider_event_id)
        .bind(&log.order_id)
        .bind(&log.payment_id)
        .bind(&log.signature)
        .bind(log.status.as_str())
        .bind(&log.raw_payload)
        .bind(&log.error_message)
        .bind(log.processed_at)
        .bind(log.created_at)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn update(&self, log: &WebhookLog) -> StoreResult<()> {
        sqlx::query(
            "UPDATE webhook_logs SET event_type = $2, provider_event_id = $3, order_id = $4, payment_id = $5, status = $6, \
             error_message = $7, processed_at = $8 WHERE id = $1",
        )
        .bind(log.id)
        .bind(&log.event_type)
        .bind(&log.provider_event_id)
        .bind(&log.order_id)
        .bind(&log.payment_id)
        .bind(log.status.as_str())
        .bind(&log.error_message)
        .bind(log.processed_at)
        .execute(&self.db)
        .await?;
        Ok(())
    }
}
