//! Aggregates module
pub mod cart;
pub mod order;
pub mod product;
pub mod webhook_log;

pub use cart::{Cart, CartItem};
pub use order::{
    can_transition, LineItem, Order, OrderError, OrderStatus, PaymentMethod, PaymentProvider, Placement,
    ProviderReference, ShippingAddress, UnknownStatus,
};
pub use product::Product;
pub use webhook_log::{WebhookLog, WebhookStatus};
