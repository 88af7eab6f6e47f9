//! Razorpay: server-created orders, webhooks signed with a hex HMAC of the raw body.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{error, instrument, warn};

use super::{verify_hmac_sha256_hex, GatewayError, PaymentGateway, ProviderPayload, VerifiedEvent, WebhookEventKind};
use crate::config::RazorpayConfig;
use crate::domain::aggregates::{Order, PaymentProvider};

pub const SIGNATURE_HEADER: &str = "x-razorpay-signature";

pub struct RazorpayGateway {
    config: RazorpayConfig,
    currency: String,
    http: reqwest::Client,
}

#[derive(Deserialize)]
struct RemoteOrder { id: String, amount: i64, currency: String, receipt: Option<String> }

#[derive(Deserialize)]
struct WebhookBody {
    event: String,
    #[serde(default)]
    payload: Option<WebhookPayload>,
}

#[derive(Deserialize)]
struct WebhookPayload { payment: Option<EntityWrapper> }

#[derive(Deserialize)]
struct EntityWrapper { entity: PaymentEntity }

#[derive(Deserialize)]
struct PaymentEntity {
    id: String,
    order_id: Option<String>,
    error_description: Option<String>,
    #[serde(default)]
    notes: serde_json::Value,
}

impl RazorpayGateway {
    pub fn new(config: RazorpayConfig, currency: &str, http: reqwest::Client) -> Self {
        Self { config, currency: currency.to_uppercase(), http }
    }
}

#[async_trait]
impl PaymentGateway for RazorpayGateway {
    fn provider(&self) -> PaymentProvider { PaymentProvider::Razorpay }

    #[instrument(skip(self, order), fields(order_id = %order.order_id()))]
    async fn create_remote_order(&self, order: &Order) -> Result<ProviderPayload, GatewayError> {
        let (Some(key_id), Some(key_secret)) = (&self.config.key_id, &self.config.key_secret) else {
            return Err(GatewayError::NotConfigured(PaymentProvider::Razorpay));
        };
        let response = self
            .http
            .post(format!("{}/v1/orders", self.config.api_base))
            .basic_auth(key_id, Some(key_secret))
            .json(&json!({
                "amount": order.total_amount().minor_units(),
                "currency": self.currency,
                "receipt": order.order_id(),
                "notes": { "orderId": order.order_id(), "userId": order.user_id().to_string() },
            }))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(status = status.as_u16(), %body, "Razorpay order creation failed");
            return Err(GatewayError::Rejected { provider: PaymentProvider::Razorpay, status: status.as_u16(), body });
        }
        let remote: RemoteOrder = response.json().await?;
        Ok(ProviderPayload::Razorpay {
            order_id: remote.id,
            amount: remote.amount,
            currency: remote.currency,
            key_id: key_id.clone(),
            receipt: remote.receipt.unwrap_or_else(|| order.order_id().to_string()),
        })
    }

    fn verify_webhook(&self, raw_body: &[u8], signature: Option<&str>) -> Result<Option<VerifiedEvent>, GatewayError> {
        let Some(secret) = &self.config.webhook_secret else {
            warn!("Razorpay webhook secret not configured");
            return Ok(None);
        };
        let Some(signature) = signature else { return Ok(None) };
        if !verify_hmac_sha256_hex(secret, raw_body, signature) {
            return Ok(None);
        }

        let body: WebhookBody = serde_json::from_slice(raw_body).map_err(|e| GatewayError::Malformed(e.to_string()))?;
        let payment = body.payload.and_then(|p| p.payment).map(|w| w.entity);
        let kind = match body.event.as_str() {
            "payment.captured" => WebhookEventKind::PaymentSucceeded,
            "payment.failed" => WebhookEventKind::PaymentFailed {
                reason: payment
                    .as_ref()
                    .and_then(|p| p.error_description.clone())
                    .unwrap_or_else(|| "Payment failed".to_string()),
            },
            _ => WebhookEventKind::Other,
        };
        if kind != WebhookEventKind::Other && payment.is_none() {
            return Err(GatewayError::Malformed(format!("{} without payment entity", body.event)));
        }
        Ok(Some(VerifiedEvent {
            event_id: None,
            event_type: body.event,
            kind,
            provider_order_ref: payment.as_ref().and_then(|p| p.order_id.clone()),
            provider_payment_ref: payment.as_ref().map(|p| p.id.clone()),
            order_hint: payment.as_ref().and_then(|p| p.notes.get("orderId")).and_then(|v| v.as_str()).map(str::to_string),
        }))
    }

    fn verify_client_payment(&self, provider_order_ref: &str, payment_ref: &str, signature: &str) -> bool {
        let Some(secret) = &self.config.key_secret else { return false };
        verify_hmac_sha256_hex(secret, format!("{provider_order_ref}|{payment_ref}").as_bytes(), signature)
    }

    fn peek_event_type(&self, raw_body: &[u8]) -> Option<String> {
        serde_json::from_slice::<serde_json::Value>(raw_body)
            .ok()
            .and_then(|v| v.get("event").and_then(|e| e.as_str()).map(str::to_string))
    }
}
