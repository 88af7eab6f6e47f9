//! Inbound payment provider callbacks.
//!
//! Every delivery gets exactly one audit row, written as `pending` before the
//! signature is checked so forged deliveries are on record too. The row is
//! finalised once, after dispatch.

use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::domain::aggregates::{PaymentProvider, WebhookLog, WebhookStatus};
use crate::gateway::{GatewayRegistry, VerifiedEvent, WebhookEventKind};
use crate::lifecycle::{OrderLifecycle, PaymentOutcome};
use crate::store::WebhookLogRepository;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Webhook processing failed: {0}")]
    Processing(String),
}

#[derive(Clone, Debug)]
pub struct IngestReceipt {
    pub log_id: Uuid,
    pub event_type: String,
    /// Whether an order actually changed status.
    pub applied: bool,
}

pub struct WebhookIngestion {
    lifecycle: Arc<OrderLifecycle>,
    gateways: Arc<GatewayRegistry>,
    logs: Arc<dyn WebhookLogRepository>,
}

impl WebhookIngestion {
    pub fn new(lifecycle: Arc<OrderLifecycle>, gateways: Arc<GatewayRegistry>, logs: Arc<dyn WebhookLogRepository>) -> Self {
        Self { lifecycle, gateways, logs }
    }

    #[instrument(skip(self, raw_body, signature), fields(bytes = raw_body.len()))]
    pub async fn ingest(&self, provider: PaymentProvider, raw_body: &[u8], signature: Option<&str>) -> Result<IngestReceipt, IngestError> {
        let gateway = self.gateways.get(provider);
        let event_type = gateway
            .as_ref()
            .and_then(|g| g.peek_event_type(raw_body))
            .unwrap_or_else(|| "unknown".to_string());
        let mut log = WebhookLog::received(provider, event_type, raw_body, signature);
        if let Err(e) = self.logs.insert(&log).await {
            error!(error = %e, "Failed to record webhook delivery");
            return Err(IngestError::Processing(e.to_string()));
        }

        let verified = match gateway.map(|g| g.verify_webhook(raw_body, signature)) {
            Some(Ok(Some(event))) => event,
            Some(Err(e)) => {
                warn!(log_id = %log.id, error = %e, "Authentic webhook with unreadable payload");
                log.fail(e.to_string());
                self.finish(&log).await;
                return Err(IngestError::Processing(e.to_string()));
            }
            Some(Ok(None)) | None => {
                warn!(log_id = %log.id, "Webhook signature verification failed");
                log.fail("Invalid signature");
                self.finish(&log).await;
                return Err(IngestError::InvalidSignature);
            }
        };

        log.event_type = verified.event_type.clone();
        log.provider_event_id = verified.event_id.clone();
        log.payment_id = verified.provider_payment_ref.clone();
        log.order_id = verified.order_hint.clone();

        let dispatched = self.dispatch(provider, &verified, &mut log).await;
        match &dispatched {
            Ok(applied) => {
                log.succeed();
                info!(log_id = %log.id, event_type = %log.event_type, applied, "Webhook processed");
            }
            Err(message) => {
                error!(log_id = %log.id, event_type = %log.event_type, error = %message, "Webhook processing failed");
                log.fail(message.clone());
            }
        }
        self.finish(&log).await;

        let applied = dispatched.map_err(IngestError::Processing)?;
        Ok(IngestReceipt { log_id: log.id, event_type: log.event_type, applied })
    }

    async fn dispatch(&self, provider: PaymentProvider, event: &VerifiedEvent, log: &mut WebhookLog) -> Result<bool, String> {
        let outcome = match &event.kind {
            WebhookEventKind::PaymentSucceeded => PaymentOutcome::Succeeded,
            WebhookEventKind::PaymentFailed { reason } => PaymentOutcome::Failed { reason: reason.clone() },
            WebhookEventKind::Other => return Ok(false),
        };
        let Some(reference) = event.provider_order_ref.as_deref() else {
            return Err(format!("{} carries no provider order reference", event.event_type));
        };
        let applied = self
            .lifecycle
            .apply_payment_outcome(provider, reference, outcome, event.provider_payment_ref.as_deref())
            .await
            .map_err(|e| e.to_string())?;
        log.order_id = Some(applied.order.order_id().to_string());
        Ok(applied.applied)
    }

    async fn finish(&self, log: &WebhookLog) {
        debug_assert_ne!(log.status, WebhookStatus::Pending);
        if let Err(e) = self.logs.update(log).await {
            error!(log_id = %log.id, error = %e, "Failed to finalise webhook log");
        }
    }
}
