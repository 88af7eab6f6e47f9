//! Error taxonomy and its HTTP mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use uuid::Uuid;
use validator::ValidationErrors;

use crate::domain::aggregates::{OrderError, OrderStatus, PaymentProvider};
use crate::store::StoreError;

/// One cart line that cannot be fulfilled.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StockIssue {
    pub product_id: Uuid,
    pub title: String,
    pub issue: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub available_stock: Option<i64>,
}

impl StockIssue {
    pub fn unavailable(product_id: Uuid, title: impl Into<String>) -> Self {
        Self { product_id, title: title.into(), issue: "Product not available".to_string(), available_stock: None }
    }

    pub fn short(product_id: Uuid, title: impl Into<String>, available: i64) -> Self {
        Self {
            product_id,
            title: title.into(),
            issue: format!("Only {available} items available"),
            available_stock: Some(available),
        }
    }
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Cart is empty")]
    EmptyCart,

    #[error("Stock validation failed")]
    StockValidationFailed(Vec<StockIssue>),

    #[error("Order not found: {0}")]
    OrderNotFound(String),

    #[error("No {provider} order matches reference {reference}")]
    ProviderOrderNotFound { provider: PaymentProvider, reference: String },

    #[error(transparent)]
    State(#[from] OrderError),

    #[error("Invalid status: {0}")]
    UnknownStatus(String),

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Payment details do not match order {0}")]
    PaymentMismatch(String),

    #[error("Order {0} is still contended after retries")]
    Contention(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T, E = LifecycleError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationErrors),

    #[error("Access token required")]
    MissingToken,

    #[error("Access token expired")]
    TokenExpired,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Admin access required")]
    AdminOnly,
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self { Self::Lifecycle(e.into()) }
}

fn body(message: impl ToString, code: &str) -> Value {
    json!({ "message": message.to_string(), "code": code })
}

fn merge(mut base: Value, extra: Value) -> Value {
    if let (Some(base), Value::Object(extra)) = (base.as_object_mut(), extra) {
        base.extend(extra);
    }
    base
}

fn status_names(statuses: &[OrderStatus]) -> Vec<&'static str> { statuses.iter().map(OrderStatus::as_str).collect() }

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, payload) = match &self {
            ApiError::Validation(errors) => {
                (StatusCode::BAD_REQUEST, merge(body("Validation failed", "VALIDATION_ERROR"), json!({ "details": errors })))
            }
            ApiError::MissingToken => (StatusCode::UNAUTHORIZED, body(&self, "NO_TOKEN")),
            ApiError::TokenExpired => (StatusCode::UNAUTHORIZED, body(&self, "TOKEN_EXPIRED")),
            ApiError::InvalidToken => (StatusCode::UNAUTHORIZED, body(&self, "INVALID_TOKEN")),
            ApiError::AdminOnly => (StatusCode::FORBIDDEN, body(&self, "ADMIN_ONLY")),
            ApiError::Lifecycle(e) => lifecycle_response(e),
        };
        (status, Json(payload)).into_response()
    }
}

fn lifecycle_response(e: &LifecycleError) -> (StatusCode, Value) {
    use LifecycleError::*;
    match e {
        EmptyCart => (StatusCode::BAD_REQUEST, body(e, "EMPTY_CART")),
        StockValidationFailed(issues) => {
            (StatusCode::BAD_REQUEST, merge(body(e, "STOCK_VALIDATION_FAILED"), json!({ "issues": issues })))
        }
        OrderNotFound(_) => (StatusCode::NOT_FOUND, body("Order not found", "ORDER_NOT_FOUND")),
        State(OrderError::InvalidTransition { current, allowed, .. }) => (
            StatusCode::BAD_REQUEST,
            merge(
                body(e, "INVALID_TRANSITION"),
                json!({ "currentStatus": current, "allowedTransitions": status_names(allowed) }),
            ),
        ),
        State(OrderError::NotCodOrder) => (StatusCode::BAD_REQUEST, body(e, "NOT_COD_ORDER")),
        State(OrderError::InvalidStatus { .. }) => (StatusCode::BAD_REQUEST, body(e, "INVALID_STATUS")),
        UnknownStatus(_) => (
            StatusCode::BAD_REQUEST,
            merge(body("Invalid status", "INVALID_STATUS"), json!({ "validStatuses": status_names(&OrderStatus::ALL) })),
        ),
        InvalidSignature => (StatusCode::BAD_REQUEST, body(e, "INVALID_SIGNATURE")),
        PaymentMismatch(_) => (StatusCode::BAD_REQUEST, body(e, "PAYMENT_MISMATCH")),
        Contention(_) => (StatusCode::CONFLICT, body(e, "CONFLICT")),
        ProviderOrderNotFound { .. } | Store(_) => {
            tracing::error!(error = %e, "Request failed");
            (StatusCode::INTERNAL_SERVER_ERROR, body("Internal server error", "INTERNAL_ERROR"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn json_of(response: Response) -> (StatusCode, Value) {
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_invalid_transition_body() {
        let err = LifecycleError::State(OrderError::InvalidTransition {
            current: OrderStatus::CodConfirmed,
            requested: OrderStatus::Pending,
            allowed: vec![OrderStatus::Completed, OrderStatus::Cancelled],
        });
        let (status, body) = json_of(ApiError::from(err).into_response()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "INVALID_TRANSITION");
        assert_eq!(body["currentStatus"], "COD_CONFIRMED");
        assert_eq!(body["allowedTransitions"], json!(["COMPLETED", "CANCELLED"]));
    }

    #[tokio::test]
    async fn test_stock_issue_body() {
        let product_id = Uuid::new_v4();
        let err = LifecycleError::StockValidationFailed(vec![StockIssue::short(product_id, "Widget", 1)]);
        let (status, body) = json_of(ApiError::from(err).into_response()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "STOCK_VALIDATION_FAILED");
        assert_eq!(body["issues"][0]["issue"], "Only 1 items available");
        assert_eq!(body["issues"][0]["availableStock"], 1);
    }

    #[tokio::test]
    async fn test_store_errors_are_opaque() {
        let err = LifecycleError::Store(StoreError::Corrupt("secret detail".into()));
        let (status, body) = json_of(ApiError::from(err).into_response()).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["message"], "Internal server error");
    }
}
