//! Order lifecycle engine.
//!
//! Owns every status change an order goes through after checkout and the
//! stock side effects attached to them. Each change is a compare-and-set on
//! the order's version: load, decide, write, and on a lost race start over
//! from a fresh read. Compensating stock restoration only runs after the
//! winning write into `CANCELLED`, and `CANCELLED` is terminal, so stock is
//! restored at most once per order.

use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::domain::aggregates::{
    Cart, LineItem, Order, OrderStatus, PaymentMethod, PaymentProvider, Placement, ShippingAddress, UnknownStatus,
};
use crate::domain::events::OrderEvent;
use crate::error::{LifecycleError, Result, StockIssue};
use crate::gateway::{GatewayRegistry, ProviderPayload};
use crate::notify::OrderNotifier;
use crate::store::{CartRepository, OrderRepository, StockLedger, StoreError, Stores};

const MAX_WRITE_ATTEMPTS: usize = 5;

#[derive(Clone, Copy, Debug, Default)]
pub struct LifecyclePolicy {
    /// Successful payments and COD checkouts go straight to `COMPLETED`.
    pub auto_complete_orders: bool,
}

#[derive(Clone, Debug)]
pub struct CheckoutRequest {
    pub user_id: Uuid,
    pub shipping_address: ShippingAddress,
    pub payment_method: PaymentMethod,
    pub delivery_notes: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutResult {
    pub order: Order,
    pub payment_data: Option<ProviderPayload>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PaymentOutcome {
    Succeeded,
    Failed { reason: String },
}

#[derive(Clone, Debug)]
pub struct OutcomeApplied {
    pub order: Order,
    /// `false` when the order had already left `PENDING` and nothing changed.
    pub applied: bool,
}

#[derive(Clone, Debug)]
pub struct ClientPaymentConfirmation {
    pub provider_order_id: String,
    pub payment_id: String,
    pub signature: String,
}

pub struct OrderLifecycle {
    orders: Arc<dyn OrderRepository>,
    stock: Arc<dyn StockLedger>,
    carts: Arc<dyn CartRepository>,
    gateways: Arc<GatewayRegistry>,
    notifier: Arc<dyn OrderNotifier>,
    policy: LifecyclePolicy,
}

impl OrderLifecycle {
    pub fn new(stores: &Stores, gateways: Arc<GatewayRegistry>, notifier: Arc<dyn OrderNotifier>, policy: LifecyclePolicy) -> Self {
        Self {
            orders: stores.orders.clone(),
            stock: stores.stock.clone(),
            carts: stores.carts.clone(),
            gateways,
            notifier,
            policy,
        }
    }

    pub fn policy(&self) -> LifecyclePolicy { self.policy }

    pub async fn find_order(&self, order_id: &str) -> Result<Order> {
        self.orders.find_by_order_id(order_id).await?.ok_or_else(|| LifecycleError::OrderNotFound(order_id.to_string()))
    }

    /// Turns the caller's cart into an order.
    ///
    /// Every line is validated before anything is touched, so a rejected
    /// checkout lists all of its problems and leaves stock as it was. Stock is
    /// then reserved line by line; if a line loses a race to a concurrent
    /// checkout the lines already reserved are handed back. A failing payment
    /// provider does not undo the order, which stays `PENDING` for a retry.
    #[instrument(skip(self, request), fields(user_id = %request.user_id, payment_method = request.payment_method.as_str()))]
    pub async fn create_order_from_cart(&self, request: CheckoutRequest) -> Result<CheckoutResult> {
        let cart = self.carts.cart_for(request.user_id).await?;
        if cart.is_empty() {
            return Err(LifecycleError::EmptyCart);
        }
        let items = self.validate_cart(&cart).await?;
        self.reserve_stock(&items).await?;

        let placement = Placement {
            user_id: request.user_id,
            shipping_address: request.shipping_address,
            payment_method: request.payment_method,
            delivery_notes: request.delivery_notes,
            auto_complete: self.policy.auto_complete_orders,
        };
        let mut order = Order::place(placement, items);
        if let Err(e) = self.orders.insert(&order).await {
            self.return_stock(order.items(), order.order_id()).await;
            return Err(e.into());
        }
        let events = order.take_events();
        if let Err(e) = self.carts.clear(request.user_id).await {
            error!(order_id = order.order_id(), error = %e, "Failed to clear cart after checkout");
        }
        info!(
            order_id = order.order_id(),
            status = %order.status(),
            total = %order.total_amount(),
            "Order created"
        );
        self.publish(events).await;

        let payment_data = match order.payment_method() {
            PaymentMethod::Online => self.open_remote_payment(&mut order).await,
            PaymentMethod::Cod => None,
        };
        Ok(CheckoutResult { order, payment_data })
    }

    /// Snapshots titles and prices from the product records, not from the cart.
    async fn validate_cart(&self, cart: &Cart) -> Result<Vec<LineItem>> {
        let mut items = Vec::with_capacity(cart.items().len());
        let mut issues = Vec::new();
        for line in cart.items() {
            match self.stock.product(line.product_id).await? {
                Some(product) if product.can_fulfil(line.qty) => {
                    items.push(LineItem::snapshot(product.id, product.title, product.price, line.qty));
                }
                Some(product) if product.is_active => {
                    issues.push(StockIssue::short(product.id, line.title.clone(), product.stock));
                }
                _ => issues.push(StockIssue::unavailable(line.product_id, line.title.clone())),
            }
        }
        if !issues.is_empty() {
            return Err(LifecycleError::StockValidationFailed(issues));
        }
        Ok(items)
    }

    async fn reserve_stock(&self, items: &[LineItem]) -> Result<()> {
        for (reserved, item) in items.iter().enumerate() {
            let Err(e) = self.stock.decrement_stock(item.product_id, item.qty).await else { continue };
            warn!(product_id = %item.product_id, error = %e, "Stock reservation failed, releasing earlier lines");
            self.return_stock(&items[..reserved], "checkout").await;
            let issue = match e {
                StoreError::InsufficientStock(_) => {
                    let available = self.stock.product(item.product_id).await.ok().flatten().map_or(0, |p| p.stock);
                    StockIssue::short(item.product_id, item.title.clone(), available)
                }
                StoreError::ProductNotFound(_) => StockIssue::unavailable(item.product_id, item.title.clone()),
                other => return Err(other.into()),
            };
            return Err(LifecycleError::StockValidationFailed(vec![issue]));
        }
        Ok(())
    }

    /// Best effort: a line that cannot be restored is logged for follow-up.
    async fn return_stock(&self, items: &[LineItem], context: &str) {
        for item in items {
            if let Err(e) = self.stock.increment_stock(item.product_id, item.qty).await {
                error!(
                    context,
                    product_id = %item.product_id,
                    qty = item.qty,
                    error = %e,
                    "Stock restoration failed; needs manual reconciliation"
                );
            }
        }
    }

    async fn restore_stock(&self, order: &Order) {
        self.return_stock(order.items(), order.order_id()).await;
        info!(order_id = order.order_id(), "Stock restored for cancelled order");
    }

    async fn open_remote_payment(&self, order: &mut Order) -> Option<ProviderPayload> {
        let Some(gateway) = self.gateways.default_gateway() else {
            warn!(order_id = order.order_id(), "No payment provider configured; order stays PENDING");
            return None;
        };
        let payload = match gateway.create_remote_order(order).await {
            Ok(payload) => payload,
            Err(e) => {
                warn!(order_id = order.order_id(), provider = %gateway.provider(), error = %e, "Payment provider order creation failed; order stays PENDING");
                return None;
            }
        };
        let provider = gateway.provider();
        let external_order_id = payload.external_order_id().to_string();
        let linked = self
            .mutate(order.order_id(), |o| {
                o.attach_provider(provider, external_order_id.clone());
                Ok(true)
            })
            .await;
        match linked {
            Ok((updated, _)) => {
                *order = updated;
                Some(payload)
            }
            Err(e) => {
                // Without the stored reference the webhook could never find this order.
                error!(order_id = order.order_id(), error = %e, "Failed to link provider order");
                None
            }
        }
    }

    #[instrument(skip(self))]
    pub async fn confirm_cod(&self, order_id: &str) -> Result<Order> {
        let (order, _) = self
            .mutate(order_id, |o| {
                o.complete_cod()?;
                Ok(true)
            })
            .await?;
        info!(order_id, "COD order completed");
        Ok(order)
    }

    #[instrument(skip(self))]
    pub async fn apply_admin_status_change(&self, order_id: &str, target: &str) -> Result<Order> {
        let target: OrderStatus = target.parse().map_err(|e: UnknownStatus| LifecycleError::UnknownStatus(e.0))?;
        let (order, _) = self
            .mutate(order_id, |o| {
                o.transition_to(target)?;
                Ok(true)
            })
            .await?;
        info!(order_id, status = %target, "Order status changed by admin");
        if target == OrderStatus::Cancelled {
            self.restore_stock(&order).await;
        }
        Ok(order)
    }

    /// Applies a verified provider outcome. Only webhook ingestion calls this.
    ///
    /// Outcomes for orders that already left `PENDING` are ignored, which makes
    /// redelivered events harmless.
    #[instrument(skip(self, outcome))]
    pub async fn apply_payment_outcome(
        &self,
        provider: PaymentProvider,
        provider_order_ref: &str,
        outcome: PaymentOutcome,
        provider_payment_ref: Option<&str>,
    ) -> Result<OutcomeApplied> {
        let order_id = self
            .orders
            .find_by_provider_ref(provider, provider_order_ref)
            .await?
            .ok_or_else(|| LifecycleError::ProviderOrderNotFound { provider, reference: provider_order_ref.to_string() })?
            .order_id()
            .to_string();

        let auto_complete = self.policy.auto_complete_orders;
        let (order, applied) = self
            .mutate(&order_id, |o| {
                let changed = match &outcome {
                    PaymentOutcome::Succeeded => o.mark_payment_succeeded(provider_payment_ref, auto_complete)?,
                    PaymentOutcome::Failed { reason } => o.mark_payment_failed(provider_payment_ref, reason.clone())?,
                };
                Ok(changed)
            })
            .await?;

        if !applied {
            match (&outcome, order.status()) {
                (PaymentOutcome::Succeeded, OrderStatus::Cancelled) => {
                    warn!(order_id, "Payment captured for a cancelled order; needs refund review")
                }
                _ => info!(order_id, status = %order.status(), "Payment outcome already applied, ignoring"),
            }
        } else {
            info!(order_id, status = %order.status(), "Payment outcome applied");
            if order.status() == OrderStatus::Cancelled {
                self.restore_stock(&order).await;
            }
        }
        Ok(OutcomeApplied { order, applied })
    }

    /// Stores a client-side payment confirmation after checking its signature.
    /// Status still moves only on the provider's webhook.
    #[instrument(skip(self, confirmation))]
    pub async fn record_client_payment(&self, order_id: &str, confirmation: ClientPaymentConfirmation) -> Result<Order> {
        let order = self.find_order(order_id).await?;
        let mismatch = || LifecycleError::PaymentMismatch(order_id.to_string());
        let provider = order.payment_provider().ok_or_else(mismatch)?;
        if order.provider_reference().external_order_id.as_deref() != Some(confirmation.provider_order_id.as_str()) {
            return Err(mismatch());
        }
        let gateway = self.gateways.get(provider).ok_or_else(mismatch)?;
        if !gateway.verify_client_payment(&confirmation.provider_order_id, &confirmation.payment_id, &confirmation.signature) {
            return Err(LifecycleError::InvalidSignature);
        }
        let (order, _) = self
            .mutate(order_id, |o| {
                o.record_client_payment(confirmation.payment_id.clone(), confirmation.signature.clone());
                Ok(true)
            })
            .await?;
        Ok(order)
    }

    /// Load, decide, compare-and-set; retried from a fresh read when another
    /// writer got in first. `decide` returns `false` to leave the order alone.
    async fn mutate<F>(&self, order_id: &str, mut decide: F) -> Result<(Order, bool)>
    where
        F: FnMut(&mut Order) -> Result<bool>,
    {
        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let mut order = self.find_order(order_id).await?;
            if !decide(&mut order)? {
                return Ok((order, false));
            }
            let events = order.take_events();
            match self.orders.update(&order).await {
                Ok(stored) => {
                    self.publish(events).await;
                    return Ok((stored, true));
                }
                Err(StoreError::Conflict(_)) => {
                    debug!(order_id, attempt, "Concurrent order update, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(LifecycleError::Contention(order_id.to_string()))
    }

    async fn publish(&self, events: Vec<OrderEvent>) {
        for event in &events {
            self.notifier.publish(event).await;
        }
    }
}
