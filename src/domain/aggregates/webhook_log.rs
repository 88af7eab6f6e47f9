//! Webhook audit record, one per inbound delivery.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::domain::aggregates::order::{PaymentProvider, UnknownStatus};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebhookStatus { Pending, Success, Failed }

impl WebhookStatus {
    pub fn as_str(&self) -> &'static str {
        match self { Self::Pending => "pending", Self::Success => "success", Self::Failed => "failed" }
    }
}

impl fmt::Display for WebhookStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for WebhookStatus {
    type Err = UnknownStatus;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookLog {
    pub id: Uuid,
    pub provider: PaymentProvider,
    pub event_type: String,
    pub provider_event_id: Option<String>,
    pub order_id: Option<String>,
    pub payment_id: Option<String>,
    pub signature: Option<String>,
    pub status: WebhookStatus,
    /// Delivery body exactly as received, including bytes that are not UTF-8.
    pub raw_payload: Vec<u8>,
    pub error_message: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl WebhookLog {
    pub fn received(provider: PaymentProvider, event_type: impl Into<String>, raw_payload: &[u8], signature: Option<&str>) -> Self {
        Self {
            id: Uuid::now_v7(),
            provider,
            event_type: event_type.into(),
            provider_event_id: None,
            order_id: None,
            payment_id: None,
            signature: signature.map(str::to_string),
            status: WebhookStatus::Pending,
            raw_payload: raw_payload.to_vec(),
            error_message: None,
            processed_at: None,
            created_at: Utc::now(),
        }
    }

    pub fn succeed(&mut self) {
        self.status = WebhookStatus::Success;
        self.processed_at = Some(Utc::now());
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.status = WebhookStatus::Failed;
        self.error_message = Some(message.into());
        self.processed_at = Some(Utc::now());
    }
}
