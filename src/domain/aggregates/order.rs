//! Order Aggregate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::domain::events::OrderEvent;
use crate::domain::value_objects::{Money, OrderId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus { Pending, Paid, CodConfirmed, Completed, Cancelled }

use OrderStatus::*;

const TRANSITIONS: [(OrderStatus, &[OrderStatus]); 5] = [
    (Pending, &[Paid, CodConfirmed, Cancelled]),
    (Paid, &[Completed, Cancelled]),
    (CodConfirmed, &[Completed, Cancelled]),
    (Completed, &[]),
    (Cancelled, &[]),
];

impl OrderStatus {
    pub const ALL: [OrderStatus; 5] = [Pending, Paid, CodConfirmed, Completed, Cancelled];

    pub fn as_str(&self) -> &'static str {
        match self {
            Pending => "PENDING",
            Paid => "PAID",
            CodConfirmed => "COD_CONFIRMED",
            Completed => "COMPLETED",
            Cancelled => "CANCELLED",
        }
    }

    pub fn allowed_transitions(self) -> &'static [OrderStatus] {
        TRANSITIONS
            .iter()
            .find(|(from, _)| *from == self)
            .map(|(_, to)| *to)
            .unwrap_or(&[])
    }

    pub fn is_terminal(self) -> bool { self.allowed_transitions().is_empty() }
}

/// The one place transition legality is decided.
pub fn can_transition(from: OrderStatus, to: OrderStatus) -> bool {
    from.allowed_transitions().contains(&to)
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown order status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for OrderStatus {
    type Err = UnknownStatus;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OrderStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod { Online, Cod }

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self { Self::Online => "ONLINE", Self::Cod => "COD" }
    }
}

impl FromStr for PaymentMethod {
    type Err = UnknownStatus;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ONLINE" => Ok(Self::Online),
            "COD" => Ok(Self::Cod),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentProvider { Razorpay, Stripe }

impl PaymentProvider {
    pub fn as_str(&self) -> &'static str {
        match self { Self::Razorpay => "razorpay", Self::Stripe => "stripe" }
    }
}

impl fmt::Display for PaymentProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for PaymentProvider {
    type Err = UnknownStatus;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "razorpay" => Ok(Self::Razorpay),
            "stripe" => Ok(Self::Stripe),
            _ => Err(UnknownStatus(s.to_string())),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderReference {
    pub external_order_id: Option<String>,
    pub external_payment_id: Option<String>,
    pub external_signature: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    pub product_id: Uuid,
    pub title: String,
    pub unit_price: Money,
    pub qty: u32,
    pub line_subtotal: Money,
}

impl LineItem {
    pub fn snapshot(product_id: Uuid, title: impl Into<String>, unit_price: Money, qty: u32) -> Self {
        Self { product_id, title: title.into(), unit_price, qty, line_subtotal: unit_price.times(qty) }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ShippingAddress {
    #[validate(length(min = 2, max = 100))]
    pub full_name: String,
    #[validate(length(min = 10, max = 15))]
    pub phone: String,
    #[validate(length(min = 5, max = 200))]
    pub address_line1: String,
    #[validate(length(max = 200))]
    pub address_line2: Option<String>,
    #[validate(length(min = 2, max = 50))]
    pub city: String,
    #[validate(length(min = 2, max = 50))]
    pub state: String,
    #[validate(custom = "validate_pincode")]
    pub pincode: String,
}

fn validate_pincode(pincode: &str) -> Result<(), ValidationError> {
    if pincode.len() == 6 && pincode.chars().all(|c| c.is_ascii_digit()) {
        Ok(())
    } else {
        Err(ValidationError::new("pincode"))
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub(crate) order_id: OrderId,
    pub(crate) user_id: Uuid,
    pub(crate) items: Vec<LineItem>,
    pub(crate) shipping_address: ShippingAddress,
    pub(crate) payment_method: PaymentMethod,
    pub(crate) payment_provider: Option<PaymentProvider>,
    pub(crate) provider_reference: ProviderReference,
    pub(crate) status: OrderStatus,
    pub(crate) total_amount: Money,
    pub(crate) delivery_notes: String,
    pub(crate) failure_reason: Option<String>,
    pub(crate) completed_at: Option<DateTime<Utc>>,
    pub(crate) cancelled_at: Option<DateTime<Utc>>,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) updated_at: DateTime<Utc>,
    #[serde(skip)]
    pub(crate) version: i64,
    #[serde(skip)]
    pub(crate) events: Vec<OrderEvent>,
}

/// Everything needed to place an order besides the frozen line items.
#[derive(Clone, Debug)]
pub struct Placement {
    pub user_id: Uuid,
    pub shipping_address: ShippingAddress,
    pub payment_method: PaymentMethod,
    pub delivery_notes: Option<String>,
    pub auto_complete: bool,
}

impl Order {
    /// Builds a new order from frozen line items. COD orders skip `PENDING`.
    pub fn place(placement: Placement, items: Vec<LineItem>) -> Self {
        let now = Utc::now();
        let total_amount = items.iter().map(|i| i.line_subtotal).sum();
        let (status, completed_at) = match placement.payment_method {
            PaymentMethod::Cod if placement.auto_complete => (Completed, Some(now)),
            PaymentMethod::Cod => (CodConfirmed, None),
            PaymentMethod::Online => (Pending, None),
        };
        let mut order = Self {
            order_id: OrderId::generate(),
            user_id: placement.user_id,
            items,
            shipping_address: placement.shipping_address,
            payment_method: placement.payment_method,
            payment_provider: None,
            provider_reference: ProviderReference::default(),
            status,
            total_amount,
            delivery_notes: placement.delivery_notes.unwrap_or_default(),
            failure_reason: None,
            completed_at,
            cancelled_at: None,
            created_at: now,
            updated_at: now,
            version: 0,
            events: vec![],
        };
        order.raise_event(OrderEvent::Created {
            order_id: order.order_id.to_string(),
            user_id: order.user_id,
            status,
            total_amount,
        });
        order
    }

    pub fn order_id(&self) -> &str { self.order_id.as_str() }
    pub fn user_id(&self) -> Uuid { self.user_id }
    pub fn items(&self) -> &[LineItem] { &self.items }
    pub fn shipping_address(&self) -> &ShippingAddress { &self.shipping_address }
    pub fn payment_method(&self) -> PaymentMethod { self.payment_method }
    pub fn payment_provider(&self) -> Option<PaymentProvider> { self.payment_provider }
    pub fn provider_reference(&self) -> &ProviderReference { &self.provider_reference }
    pub fn status(&self) -> OrderStatus { self.status }
    pub fn total_amount(&self) -> Money { self.total_amount }
    pub fn delivery_notes(&self) -> &str { &self.delivery_notes }
    pub fn failure_reason(&self) -> Option<&str> { self.failure_reason.as_deref() }
    pub fn completed_at(&self) -> Option<DateTime<Utc>> { self.completed_at }
    pub fn cancelled_at(&self) -> Option<DateTime<Utc>> { self.cancelled_at }
    pub fn created_at(&self) -> DateTime<Utc> { self.created_at }
    pub fn version(&self) -> i64 { self.version }

    /// Moves the order along the transition table and stamps the matching timestamp.
    pub fn transition_to(&mut self, target: OrderStatus) -> Result<(), OrderError> {
        if !can_transition(self.status, target) {
            return Err(OrderError::InvalidTransition {
                current: self.status,
                requested: target,
                allowed: self.status.allowed_transitions().to_vec(),
            });
        }
        let from = self.status;
        let now = Utc::now();
        self.status = target;
        match target {
            Completed => self.completed_at = Some(now),
            Cancelled => self.cancelled_at = Some(now),
            _ => {}
        }
        self.updated_at = now;
        self.raise_event(OrderEvent::StatusChanged { order_id: self.order_id.to_string(), from, to: target });
        Ok(())
    }

    pub fn complete_cod(&mut self) -> Result<(), OrderError> {
        if self.payment_method != PaymentMethod::Cod { return Err(OrderError::NotCodOrder); }
        if self.status != CodConfirmed {
            return Err(OrderError::InvalidStatus { expected: CodConfirmed, current: self.status });
        }
        self.transition_to(Completed)
    }

    pub fn attach_provider(&mut self, provider: PaymentProvider, external_order_id: impl Into<String>) {
        self.payment_provider = Some(provider);
        self.provider_reference.external_order_id = Some(external_order_id.into());
        self.touch();
    }

    /// Stores the client-side payment confirmation without touching status.
    pub fn record_client_payment(&mut self, payment_id: impl Into<String>, signature: impl Into<String>) {
        self.provider_reference.external_payment_id = Some(payment_id.into());
        self.provider_reference.external_signature = Some(signature.into());
        self.touch();
    }

    /// Returns `false` when the order already left `PENDING`; the outcome is then ignored.
    pub fn mark_payment_succeeded(&mut self, payment_id: Option<&str>, auto_complete: bool) -> Result<bool, OrderError> {
        if self.status != Pending { return Ok(false); }
        self.transition_to(Paid)?;
        if auto_complete { self.transition_to(Completed)?; }
        if let Some(payment_id) = payment_id {
            self.provider_reference.external_payment_id = Some(payment_id.to_string());
        }
        Ok(true)
    }

    /// Returns `false` when the order already left `PENDING`; the outcome is then ignored.
    pub fn mark_payment_failed(&mut self, payment_id: Option<&str>, reason: impl Into<String>) -> Result<bool, OrderError> {
        if self.status != Pending { return Ok(false); }
        self.transition_to(Cancelled)?;
        self.failure_reason = Some(reason.into());
        if let Some(payment_id) = payment_id {
            self.provider_reference.external_payment_id = Some(payment_id.to_string());
        }
        Ok(true)
    }

    pub fn take_events(&mut self) -> Vec<OrderEvent> { std::mem::take(&mut self.events) }
    fn raise_event(&mut self, e: OrderEvent) { self.events.push(e); }
    fn touch(&mut self) { self.updated_at = Utc::now(); }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderError {
    #[error("Cannot transition from {current} to {requested}")]
    InvalidTransition { current: OrderStatus, requested: OrderStatus, allowed: Vec<OrderStatus> },
    #[error("This is not a COD order")]
    NotCodOrder,
    #[error("Order is not in {expected} status")]
    InvalidStatus { expected: OrderStatus, current: OrderStatus },
}
