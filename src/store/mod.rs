//! Persistence ports used by the lifecycle engine and webhook ingestion.
//!
//! Two implementations: [`postgres::PgStore`] for deployments and
//! [`memory::InMemoryStore`] for tests and database-less dev runs.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::aggregates::{Cart, Order, OrderStatus, PaymentProvider, Product, WebhookLog};

pub mod memory;
pub mod postgres;

pub use memory::InMemoryStore;
pub use postgres::PgStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Order {0} was modified concurrently")]
    Conflict(String),

    #[error("Order not found: {0}")]
    OrderNotFound(String),

    #[error("Product not found: {0}")]
    ProductNotFound(Uuid),

    #[error("Insufficient stock for product {0}")]
    InsufficientStock(Uuid),

    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Per-product stock counters. Each call is atomic for its one product.
#[async_trait]
pub trait StockLedger: Send + Sync + 'static {
    async fn product(&self, product_id: Uuid) -> StoreResult<Option<Product>>;

    /// Fails with [`StoreError::InsufficientStock`] instead of going below zero.
    async fn decrement_stock(&self, product_id: Uuid, qty: u32) -> StoreResult<()>;

    async fn increment_stock(&self, product_id: Uuid, qty: u32) -> StoreResult<()>;
}

#[derive(Clone, Debug, Default)]
pub struct OrderFilter {
    pub user_id: Option<Uuid>,
    pub status: Option<OrderStatus>,
    pub page: u32,
    pub limit: u32,
}

impl OrderFilter {
    pub fn offset(&self) -> u64 { u64::from(self.page.max(1) - 1) * u64::from(self.limit) }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderStats {
    pub total_orders: i64,
    pub status_counts: BTreeMap<OrderStatus, i64>,
    pub total_revenue: i64,
    pub average_order_value: i64,
    pub total_paid_orders: i64,
}

#[async_trait]
pub trait OrderRepository: Send + Sync + 'static {
    async fn insert(&self, order: &Order) -> StoreResult<()>;

    async fn find_by_order_id(&self, order_id: &str) -> StoreResult<Option<Order>>;

    async fn find_by_provider_ref(&self, provider: PaymentProvider, external_order_id: &str) -> StoreResult<Option<Order>>;

    /// Compare-and-set on `order.version()`. Returns the stored order with its new
    /// version, or [`StoreError::Conflict`] when another writer won.
    async fn update(&self, order: &Order) -> StoreResult<Order>;

    /// Newest first, with the total number of matches.
    async fn list(&self, filter: &OrderFilter) -> StoreResult<(Vec<Order>, i64)>;

    async fn stats(&self) -> StoreResult<OrderStats>;
}

#[async_trait]
pub trait CartRepository: Send + Sync + 'static {
    async fn cart_for(&self, user_id: Uuid) -> StoreResult<Cart>;

    async fn clear(&self, user_id: Uuid) -> StoreResult<()>;
}

#[async_trait]
pub trait WebhookLogRepository: Send + Sync + 'static {
    async fn insert(&self, log: &WebhookLog) -> StoreResult<()>;

    async fn update(&self, log: &WebhookLog) -> StoreResult<()>;
}

/// The set of repositories the service runs on.
#[derive(Clone)]
pub struct Stores {
    pub orders: Arc<dyn OrderRepository>,
    pub stock: Arc<dyn StockLedger>,
    pub carts: Arc<dyn CartRepository>,
    pub webhook_logs: Arc<dyn WebhookLogRepository>,
}

impl Stores {
    pub fn postgres(pool: sqlx::PgPool) -> Self {
        let store = Arc::new(PgStore::new(pool));
        Self { orders: store.clone(), stock: store.clone(), carts: store.clone(), webhook_logs: store }
    }

    pub fn in_memory(store: InMemoryStore) -> Self {
        let store = Arc::new(store);
        Self { orders: store.clone(), stock: store.clone(), carts: store.clone(), webhook_logs: store }
    }
}

fn revenue_counts(status: OrderStatus) -> bool { matches!(status, OrderStatus::Paid | OrderStatus::Completed) }
