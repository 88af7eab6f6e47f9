//! HTTP surface: checkout, order queries, admin status changes and provider webhooks.

use axum::routing::{get, patch, post};
use axum::{Json, Router};
use std::sync::Arc;

use crate::config::AppConfig;
use crate::domain::aggregates::Order;
use crate::error::{ApiError, LifecycleError};
use crate::gateway::GatewayRegistry;
use crate::lifecycle::{LifecyclePolicy, OrderLifecycle};
use crate::notify::OrderNotifier;
use crate::store::{OrderRepository, Stores};
use crate::webhooks::WebhookIngestion;

pub mod auth;
pub mod checkout;
pub mod orders;
pub mod webhooks;

pub use auth::{AdminPrincipal, Claims, JwtKeys, Principal, Role};

#[derive(Clone)]
pub struct AppState {
    pub lifecycle: Arc<OrderLifecycle>,
    pub webhooks: Arc<WebhookIngestion>,
    pub orders: Arc<dyn OrderRepository>,
    pub jwt: Arc<JwtKeys>,
}

impl AppState {
    pub fn build(config: &AppConfig, stores: Stores, notifier: Arc<dyn OrderNotifier>, http: reqwest::Client) -> Self {
        let gateways = Arc::new(GatewayRegistry::from_config(&config.payments, http));
        Self::with_gateways(config, stores, notifier, gateways)
    }

    pub fn with_gateways(config: &AppConfig, stores: Stores, notifier: Arc<dyn OrderNotifier>, gateways: Arc<GatewayRegistry>) -> Self {
        let policy = LifecyclePolicy { auto_complete_orders: config.auto_complete_orders };
        let lifecycle = Arc::new(OrderLifecycle::new(&stores, gateways.clone(), notifier, policy));
        let webhooks = Arc::new(WebhookIngestion::new(lifecycle.clone(), gateways, stores.webhook_logs.clone()));
        Self { lifecycle, webhooks, orders: stores.orders, jwt: Arc::new(JwtKeys::new(&config.jwt_secret)) }
    }

    /// The order if `principal` may see it. Other users' orders look absent.
    pub(crate) async fn visible_order(&self, principal: &Principal, order_id: &str) -> Result<Order, ApiError> {
        let order = self.lifecycle.find_order(order_id).await?;
        if principal.is_admin() || order.user_id() == principal.user_id {
            Ok(order)
        } else {
            Err(LifecycleError::OrderNotFound(order_id.to_string()).into())
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { Json(serde_json::json!({"status": "healthy", "service": "shopcore"})) }))
        .route("/checkout/create-order", post(checkout::create_order))
        .route("/checkout/confirm-cod/:order_id", post(checkout::confirm_cod))
        .route("/checkout/verify-payment/:order_id", post(checkout::verify_payment))
        .route("/orders", get(orders::list_orders))
        .route("/orders/my", get(orders::my_orders))
        .route("/orders/admin/stats", get(orders::stats))
        .route("/orders/:order_id", get(orders::get_order))
        .route("/orders/:order_id/status", patch(orders::update_status))
        .route("/webhooks/razorpay", post(webhooks::razorpay))
        .route("/webhooks/stripe", post(webhooks::stripe))
        .with_state(state)
}
