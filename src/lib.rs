//! Shopcore: checkout and order lifecycle service
//!
//! Turns carts into orders, reserves and restores stock, talks to the
//! payment providers and applies their webhook callbacks.
//!
//! ## Features
//! - Cart checkout with per-line stock validation and reservation
//! - COD and online (Razorpay, Stripe) payments
//! - Validated order status transitions with stock restoration on cancel
//! - Signed, audited and replay-safe payment webhooks
//! - Order queries and admin statistics

pub mod api;
pub mod config;
pub mod domain;
pub mod error;
pub mod gateway;
pub mod lifecycle;
pub mod notify;
pub mod store;
pub mod webhooks;

pub use api::{router, AppState};
pub use config::AppConfig;
pub use error::{ApiError, LifecycleError};
pub use lifecycle::OrderLifecycle;
pub use webhooks::WebhookIngestion;
