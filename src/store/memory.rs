//! In-process store. All maps sit behind one lock, so every call is atomic.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use super::{
    revenue_counts, CartRepository, OrderFilter, OrderRepository, OrderStats, StockLedger, StoreError, StoreResult,
    WebhookLogRepository,
};
use crate::domain::aggregates::{Cart, Order, PaymentProvider, Product, WebhookLog};
use crate::domain::value_objects::Money;

#[derive(Default)]
struct State {
    products: HashMap<Uuid, Product>,
    carts: HashMap<Uuid, Cart>,
    orders: HashMap<String, Order>,
    webhook_logs: Vec<WebhookLog>,
}

#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryStore {
    pub fn new() -> Self { Self::default() }

    pub fn put_product(&self, product: Product) { self.state.lock().products.insert(product.id, product); }

    pub fn put_cart(&self, cart: Cart) { self.state.lock().carts.insert(cart.user_id(), cart); }

    pub fn set_product_price(&self, product_id: Uuid, price: Money) {
        if let Some(p) = self.state.lock().products.get_mut(&product_id) { p.price = price; }
    }

    pub fn stock_of(&self, product_id: Uuid) -> Option<i64> {
        self.state.lock().products.get(&product_id).map(|p| p.stock)
    }

    pub fn webhook_logs(&self) -> Vec<WebhookLog> { self.state.lock().webhook_logs.clone() }
}

#[async_trait]
impl StockLedger for InMemoryStore {
    async fn product(&self, product_id: Uuid) -> StoreResult<Option<Product>> {
        Ok(self.state.lock().products.get(&product_id).cloned())
    }

    async fn decrement_stock(&self, product_id: Uuid, qty: u32) -> StoreResult<()> {
        let mut state = self.state.lock();
        let product = state.products.get_mut(&product_id).ok_or(StoreError::ProductNotFound(product_id))?;
        if product.stock < i64::from(qty) { return Err(StoreError::InsufficientStock(product_id)); }
        product.stock -= i64::from(qty);
        Ok(())
    }

    async fn increment_stock(&self, product_id: Uuid, qty: u32) -> StoreResult<()> {
        let mut state = self.state.lock();
        let product = state.products.get_mut(&product_id).ok_or(StoreError::ProductNotFound(product_id))?;
        product.stock += i64::from(qty);
        Ok(())
    }
}

#[async_trait]
impl OrderRepository for InMemoryStore {
    async fn insert(&self, order: &Order) -> StoreResult<()> {
        let mut state = self.state.lock();
        if state.orders.contains_key(order.order_id()) {
            return Err(StoreError::Conflict(order.order_id().to_string()));
        }
        let mut stored = order.clone();
        stored.events.clear();
        state.orders.insert(order.order_id().to_string(), stored);
        Ok(())
    }

    async fn find_by_order_id(&self, order_id: &str) -> StoreResult<Option<Order>> {
        Ok(self.state.lock().orders.get(order_id).cloned())
    }

    async fn find_by_provider_ref(&self, provider: PaymentProvider, external_order_id: &str) -> StoreResult<Option<Order>> {
        Ok(self.state.lock().orders.values().find(|o| {
            o.payment_provider == Some(provider)
                && o.provider_reference.external_order_id.as_deref() == Some(external_order_id)
        }).cloned())
    }

    async fn update(&self, order: &Order) -> StoreResult<Order> {
        let mut state = self.state.lock();
        let current = state
            .orders
            .get_mut(order.order_id())
            .ok_or_else(|| StoreError::OrderNotFound(order.order_id().to_string()))?;
        if current.version != order.version {
            return Err(StoreError::Conflict(order.order_id().to_string()));
        }
        let mut stored = order.clone();
        stored.events.clear();
        stored.version += 1;
        *current = stored.clone();
        Ok(stored)
    }

    async fn list(&self, filter: &OrderFilter) -> StoreResult<(Vec<Order>, i64)> {
        let state = self.state.lock();
        let mut matching: Vec<&Order> = state
            .orders
            .values()
            .filter(|o| filter.user_id.map_or(true, |u| o.user_id == u))
            .filter(|o| filter.status.map_or(true, |s| o.status == s))
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let total = matching.len() as i64;
        let page = matching
            .into_iter()
            .skip(filter.offset() as usize)
            .take(filter.limit as usize)
            .cloned()
            .collect();
        Ok((page, total))
    }

    async fn stats(&self) -> StoreResult<OrderStats> {
        let state = self.state.lock();
        let mut stats = OrderStats { total_orders: state.orders.len() as i64, ..OrderStats::default() };
        for order in state.orders.values() {
            *stats.status_counts.entry(order.status).or_default() += 1;
            if revenue_counts(order.status) {
                stats.total_revenue += order.total_amount.minor_units();
                stats.total_paid_orders += 1;
            }
        }
        if stats.total_paid_orders > 0 {
            stats.average_order_value = stats.total_revenue / stats.total_paid_orders;
        }
        Ok(stats)
    }
}

#[async_trait]
impl CartRepository for InMemoryStore {
    async fn cart_for(&self, user_id: Uuid) -> StoreResult<Cart> {
        Ok(self.state.lock().carts.get(&user_id).cloned().unwrap_or_else(|| Cart::new(user_id)))
    }

    async fn clear(&self, user_id: Uuid) -> StoreResult<()> {
        if let Some(cart) = self.state.lock().carts.get_mut(&user_id) { cart.clear(); }
        Ok(())
    }
}

#[async_trait]
impl WebhookLogRepository for InMemoryStore {
    async fn insert(&self, log: &WebhookLog) -> StoreResult<()> {
        self.state.lock().webhook_logs.push(log.clone());
        Ok(())
    }

    async fn update(&self, log: &WebhookLog) -> StoreResult<()> {
        let mut state = self.state.lock();
        match state.webhook_logs.iter_mut().find(|l| l.id == log.id) {
            Some(existing) => { *existing = log.clone(); Ok(()) }
            None => Err(StoreError::Corrupt(format!("webhook log {} was never inserted", log.id))),
        }
    }
}
