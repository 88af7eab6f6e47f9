//! Stripe: payment intents, webhooks verified the way `Webhook::constructEvent` does it.

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use tracing::{error, instrument, warn};

use super::{hmac_sha256_hex, verify_hmac_sha256_hex, GatewayError, PaymentGateway, ProviderPayload, VerifiedEvent, WebhookEventKind};
use crate::config::StripeConfig;
use crate::domain::aggregates::{Order, PaymentProvider};

pub const SIGNATURE_HEADER: &str = "stripe-signature";

/// Maximum age of a signed delivery, in seconds.
const TIMESTAMP_TOLERANCE: u64 = 300;

pub struct StripeGateway {
    config: StripeConfig,
    currency: String,
    http: reqwest::Client,
}

#[derive(Deserialize)]
struct PaymentIntent { id: String, client_secret: Option<String> }

#[derive(Deserialize)]
struct Event {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: EventData,
}

#[derive(Deserialize)]
struct EventData { object: serde_json::Value }

#[derive(Deserialize)]
struct IntentObject {
    id: String,
    #[serde(default)]
    metadata: serde_json::Value,
    last_payment_error: Option<PaymentError>,
}

#[derive(Deserialize)]
struct PaymentError { message: Option<String> }

impl StripeGateway {
    pub fn new(config: StripeConfig, currency: &str, http: reqwest::Client) -> Self {
        Self { config, currency: currency.to_lowercase(), http }
    }

    fn signature_matches(&self, secret: &str, raw_body: &[u8], header: &str, now: i64) -> bool {
        let mut timestamp = None;
        let mut candidates = Vec::new();
        for part in header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", value)) => timestamp = value.parse::<i64>().ok(),
                Some(("v1", value)) => candidates.push(value),
                _ => {}
            }
        }
        let Some(timestamp) = timestamp else { return false };
        if now.abs_diff(timestamp) > TIMESTAMP_TOLERANCE { return false; }

        let mut signed = format!("{timestamp}.").into_bytes();
        signed.extend_from_slice(raw_body);
        candidates.iter().any(|c| verify_hmac_sha256_hex(secret, &signed, c))
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    fn provider(&self) -> PaymentProvider { PaymentProvider::Stripe }

    #[instrument(skip(self, order), fields(order_id = %order.order_id()))]
    async fn create_remote_order(&self, order: &Order) -> Result<ProviderPayload, GatewayError> {
        let Some(secret_key) = &self.config.secret_key else {
            return Err(GatewayError::NotConfigured(PaymentProvider::Stripe));
        };
        let user_id = order.user_id().to_string();
        let amount = order.total_amount().minor_units().to_string();
        let form = [
            ("amount", amount.as_str()),
            ("currency", self.currency.as_str()),
            ("metadata[orderId]", order.order_id()),
            ("metadata[userId]", user_id.as_str()),
            ("automatic_payment_methods[enabled]", "true"),
        ];
        let response = self
            .http
            .post(format!("{}/v1/payment_intents", self.config.api_base))
            .bearer_auth(secret_key)
            .form(&form)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(status = status.as_u16(), %body, "Stripe payment intent creation failed");
            return Err(GatewayError::Rejected { provider: PaymentProvider::Stripe, status: status.as_u16(), body });
        }
        let intent: PaymentIntent = response.json().await?;
        let client_secret = intent
            .client_secret
            .ok_or_else(|| GatewayError::Malformed(format!("payment intent {} has no client_secret", intent.id)))?;
        Ok(ProviderPayload::Stripe { client_secret, payment_intent_id: intent.id })
    }

    fn verify_webhook(&self, raw_body: &[u8], signature: Option<&str>) -> Result<Option<VerifiedEvent>, GatewayError> {
        let Some(secret) = &self.config.webhook_secret else {
            warn!("Stripe webhook secret not configured");
            return Ok(None);
        };
        let Some(signature) = signature else { return Ok(None) };
        if !self.signature_matches(secret, raw_body, signature, Utc::now().timestamp()) {
            return Ok(None);
        }

        let event: Event = serde_json::from_slice(raw_body).map_err(|e| GatewayError::Malformed(e.to_string()))?;
        let kind = match event.event_type.as_str() {
            "payment_intent.succeeded" => WebhookEventKind::PaymentSucceeded,
            "payment_intent.payment_failed" => WebhookEventKind::PaymentFailed { reason: String::new() },
            _ => WebhookEventKind::Other,
        };
        if kind == WebhookEventKind::Other {
            return Ok(Some(VerifiedEvent {
                event_id: Some(event.id),
                event_type: event.event_type,
                kind,
                provider_order_ref: None,
                provider_payment_ref: None,
                order_hint: None,
            }));
        }

        let intent: IntentObject =
            serde_json::from_value(event.data.object).map_err(|e| GatewayError::Malformed(e.to_string()))?;
        let kind = match kind {
            WebhookEventKind::PaymentFailed { .. } => WebhookEventKind::PaymentFailed {
                reason: intent
                    .last_payment_error
                    .and_then(|e| e.message)
                    .unwrap_or_else(|| "Payment failed".to_string()),
            },
            other => other,
        };
        Ok(Some(VerifiedEvent {
            event_id: Some(event.id),
            event_type: event.event_type,
            kind,
            provider_order_ref: Some(intent.id.clone()),
            provider_payment_ref: Some(intent.id),
            order_hint: intent.metadata.get("orderId").and_then(|v| v.as_str()).map(str::to_string),
        }))
    }

    fn peek_event_type(&self, raw_body: &[u8]) -> Option<String> {
        serde_json::from_slice::<serde_json::Value>(raw_body)
            .ok()
            .and_then(|v| v.get("type").and_then(|e| e.as_str()).map(str::to_string))
    }
}

/// Builds a `Stripe-Signature` header value for `raw_body` signed at `timestamp`.
pub fn sign_payload(secret: &str, raw_body: &[u8], timestamp: i64) -> String {
    let mut signed = format!("{timestamp}.").into_bytes();
    signed.extend_from_slice(raw_body);
    format!("t={timestamp},v1={}", hmac_sha256_hex(secret, &signed))
}
