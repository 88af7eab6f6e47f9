//! Payment provider adapters.
//!
//! Each provider implements [`PaymentGateway`]; the set in use is assembled
//! once at start-up into a [`GatewayRegistry`] and injected where needed.

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::config::PaymentConfig;
use crate::domain::aggregates::{Order, PaymentProvider};

pub mod razorpay;
pub mod stripe;

pub use razorpay::RazorpayGateway;
pub use stripe::StripeGateway;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("{0} credentials not configured")]
    NotConfigured(PaymentProvider),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{provider} rejected the request ({status}): {body}")]
    Rejected { provider: PaymentProvider, status: u16, body: String },

    #[error("Malformed provider payload: {0}")]
    Malformed(String),
}

/// Client-side data the caller needs to finish paying.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ProviderPayload {
    #[serde(rename_all = "camelCase")]
    Razorpay { order_id: String, amount: i64, currency: String, key_id: String, receipt: String },
    #[serde(rename_all = "camelCase")]
    Stripe { client_secret: String, payment_intent_id: String },
}

impl ProviderPayload {
    /// The provider-side id stored on the order and later matched by webhooks.
    pub fn external_order_id(&self) -> &str {
        match self {
            Self::Razorpay { order_id, .. } => order_id,
            Self::Stripe { payment_intent_id, .. } => payment_intent_id,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WebhookEventKind {
    PaymentSucceeded,
    PaymentFailed { reason: String },
    Other,
}

/// A webhook delivery whose signature checked out.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerifiedEvent {
    pub event_id: Option<String>,
    pub event_type: String,
    pub kind: WebhookEventKind,
    pub provider_order_ref: Option<String>,
    pub provider_payment_ref: Option<String>,
    /// Our order id as echoed back in the provider's notes/metadata.
    pub order_hint: Option<String>,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync + 'static {
    fn provider(&self) -> PaymentProvider;

    async fn create_remote_order(&self, order: &Order) -> Result<ProviderPayload, GatewayError>;

    /// `Ok(None)` means the delivery is not authentic. `Err` means it was, but
    /// the payload could not be understood.
    fn verify_webhook(&self, raw_body: &[u8], signature: Option<&str>) -> Result<Option<VerifiedEvent>, GatewayError>;

    /// Checks a client-side checkout confirmation. Providers without one reject everything.
    fn verify_client_payment(&self, _provider_order_ref: &str, _payment_ref: &str, _signature: &str) -> bool { false }

    /// Event type read from an unverified body, for the audit log only.
    fn peek_event_type(&self, raw_body: &[u8]) -> Option<String>;
}

pub struct GatewayRegistry {
    default_provider: PaymentProvider,
    adapters: HashMap<PaymentProvider, Arc<dyn PaymentGateway>>,
}

impl GatewayRegistry {
    pub fn new(default_provider: PaymentProvider) -> Self { Self { default_provider, adapters: HashMap::new() } }

    pub fn from_config(config: &PaymentConfig, http: reqwest::Client) -> Self {
        Self::new(config.default_provider)
            .with(Arc::new(RazorpayGateway::new(config.razorpay.clone(), &config.currency, http.clone())))
            .with(Arc::new(StripeGateway::new(config.stripe.clone(), &config.currency, http)))
    }

    pub fn with(mut self, adapter: Arc<dyn PaymentGateway>) -> Self {
        self.adapters.insert(adapter.provider(), adapter);
        self
    }

    pub fn get(&self, provider: PaymentProvider) -> Option<Arc<dyn PaymentGateway>> { self.adapters.get(&provider).cloned() }

    pub fn default_gateway(&self) -> Option<Arc<dyn PaymentGateway>> { self.get(self.default_provider) }
}

pub(crate) fn hmac_sha256_hex(secret: &str, message: &[u8]) -> String {
    // HMAC accepts keys of any length, so construction cannot fail.
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(message);
    hex::encode(mac.finalize().into_bytes())
}

/// Checks a hex-encoded HMAC-SHA256 tag. `verify_slice` compares in constant time.
pub(crate) fn verify_hmac_sha256_hex(secret: &str, message: &[u8], signature_hex: &str) -> bool {
    let Ok(tag) = hex::decode(signature_hex.trim()) else { return false };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else { return false };
    mac.update(message);
    mac.verify_slice(&tag).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hmac_known_vector() {
        // RFC 4231 test case 2
        assert_eq!(
            hmac_sha256_hex("Jefe", b"what do ya want for nothing?"),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn test_verify_hex_tag() {
        let tag = hmac_sha256_hex("Jefe", b"what do ya want for nothing?");
        assert!(verify_hmac_sha256_hex("Jefe", b"what do ya want for nothing?", &tag));
        assert!(verify_hmac_sha256_hex("Jefe", b"what do ya want for nothing?", &tag.to_uppercase()));
        assert!(!verify_hmac_sha256_hex("Jefe", b"what do ya want for something?", &tag));
        assert!(!verify_hmac_sha256_hex("Jefe", b"what do ya want for nothing?", &tag[..32]));
        assert!(!verify_hmac_sha256_hex("Jefe", b"what do ya want for nothing?", "not hex"));
        assert!(!verify_hmac_sha256_hex("Jefe", b"what do ya want for nothing?", ""));
    }

    #[test]
    fn test_payload_serialization() {
        let payload = ProviderPayload::Stripe { client_secret: "pi_1_secret".into(), payment_intent_id: "pi_1".into() };
        assert_eq!(serde_json::to_value(&payload).unwrap(), serde_json::json!({"clientSecret": "pi_1_secret", "paymentIntentId": "pi_1"}));
        assert_eq!(payload.external_order_id(), "pi_1");
    }
}
