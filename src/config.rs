//! Environment configuration.

use std::env;
use thiserror::Error;

use crate::domain::aggregates::PaymentProvider;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing environment variable '{0}'")]
    Missing(&'static str),

    #[error("Invalid value {value:?} for '{var}'")]
    Invalid { var: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    /// `None` runs on the in-memory store.
    pub database_url: Option<String>,
    pub nats_url: Option<String>,
    pub jwt_secret: String,
    pub auto_complete_orders: bool,
    pub payments: PaymentConfig,
}

#[derive(Debug, Clone)]
pub struct PaymentConfig {
    pub default_provider: PaymentProvider,
    pub currency: String,
    pub razorpay: RazorpayConfig,
    pub stripe: StripeConfig,
}

#[derive(Debug, Clone, Default)]
pub struct RazorpayConfig {
    pub key_id: Option<String>,
    pub key_secret: Option<String>,
    pub webhook_secret: Option<String>,
    pub api_base: String,
}

#[derive(Debug, Clone, Default)]
pub struct StripeConfig {
    pub secret_key: Option<String>,
    pub webhook_secret: Option<String>,
    pub api_base: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let config = Self::from_lookup(|var| env::var(var).ok())?;
        tracing::info!(
            port = config.port,
            default_provider = %config.payments.default_provider,
            auto_complete = config.auto_complete_orders,
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Builds the configuration from any variable source; empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

        let port = match get("PORT") {
            Some(v) => v.parse().map_err(|_| ConfigError::Invalid { var: "PORT", value: v })?,
            None => 8083,
        };
        let jwt_secret = get("JWT_ACCESS_SECRET").ok_or(ConfigError::Missing("JWT_ACCESS_SECRET"))?;
        let auto_complete_orders = get("AUTO_COMPLETE_ORDERS").map_or(false, |v| v.eq_ignore_ascii_case("true"));
        let default_provider = match get("DEFAULT_PAYMENT_PROVIDER") {
            Some(v) => v.parse().map_err(|_| ConfigError::Invalid { var: "DEFAULT_PAYMENT_PROVIDER", value: v })?,
            None => PaymentProvider::Razorpay,
        };

        let razorpay_key_secret = get("RAZORPAY_KEY_SECRET");
        let razorpay = RazorpayConfig {
            key_id: get("RAZORPAY_KEY_ID"),
            webhook_secret: get("RAZORPAY_WEBHOOK_SECRET").or_else(|| razorpay_key_secret.clone()),
            key_secret: razorpay_key_secret,
            api_base: get("RAZORPAY_API_BASE").unwrap_or_else(|| "https://api.razorpay.com".to_string()),
        };
        let stripe = StripeConfig {
            secret_key: get("STRIPE_SECRET_KEY"),
            webhook_secret: get("STRIPE_WEBHOOK_SECRET"),
            api_base: get("STRIPE_API_BASE").unwrap_or_else(|| "https://api.stripe.com".to_string()),
        };

        Ok(Self {
            port,
            database_url: get("DATABASE_URL"),
            nats_url: get("NATS_URL"),
            jwt_secret,
            auto_complete_orders,
            payments: PaymentConfig {
                default_provider,
                currency: get("ORDER_CURRENCY").unwrap_or_else(|| "INR".to_string()),
                razorpay,
                stripe,
            },
        })
    }
}
