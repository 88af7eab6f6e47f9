//! Domain events
use crate::domain::aggregates::OrderStatus;
use crate::domain::value_objects::Money;
use serde::Serialize;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum OrderEvent {
    #[serde(rename_all = "camelCase")]
    Created { order_id: String, user_id: Uuid, status: OrderStatus, total_amount: Money },
    #[serde(rename_all = "camelCase")]
    StatusChanged { order_id: String, from: OrderStatus, to: OrderStatus },
}

impl OrderEvent {
    pub fn order_id(&self) -> &str {
        match self {
            Self::Created { order_id, .. } | Self::StatusChanged { order_id, .. } => order_id,
        }
    }

    /// Subject suffix used when the event is published on the message bus.
    pub fn subject(&self) -> &'static str {
        match self {
            Self::Created { .. } => "created",
            Self::StatusChanged { .. } => "status_changed",
        }
    }
}
