use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use super::{AdminPrincipal, AppState, Principal};
use crate::domain::aggregates::{Order, OrderStatus};
use crate::error::{ApiError, LifecycleError};
use crate::store::{OrderFilter, OrderStats};

#[derive(Debug, Default, Deserialize)]
pub struct ListParams { pub status: Option<String>, pub page: Option<u32>, pub limit: Option<u32> }

impl ListParams {
    fn filter(&self, user_id: Option<Uuid>) -> Result<OrderFilter, ApiError> {
        let status = match self.status.as_deref().filter(|s| !s.is_empty()) {
            Some(s) => Some(s.parse::<OrderStatus>().map_err(|e| LifecycleError::UnknownStatus(e.0))?),
            None => None,
        };
        Ok(OrderFilter {
            user_id,
            status,
            page: self.page.unwrap_or(1).max(1),
            limit: self.limit.unwrap_or(10).clamp(1, 100),
        })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginatedResponse<T> {
    pub data: Vec<T>,
    pub total: i64,
    pub page: u32,
    pub limit: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_counts: Option<BTreeMap<OrderStatus, i64>>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest { pub status: String }

pub async fn my_orders(State(s): State<AppState>, principal: Principal, Query(p): Query<ListParams>) -> Result<Json<PaginatedResponse<Order>>, ApiError> {
    let filter = p.filter(Some(principal.user_id))?;
    let (data, total) = s.orders.list(&filter).await?;
    Ok(Json(PaginatedResponse { data, total, page: filter.page, limit: filter.limit, status_counts: None }))
}

pub async fn get_order(State(s): State<AppState>, principal: Principal, Path(order_id): Path<String>) -> Result<Json<Order>, ApiError> {
    Ok(Json(s.visible_order(&principal, &order_id).await?))
}

pub async fn list_orders(State(s): State<AppState>, _: AdminPrincipal, Query(p): Query<ListParams>) -> Result<Json<PaginatedResponse<Order>>, ApiError> {
    let filter = p.filter(None)?;
    let (data, total) = s.orders.list(&filter).await?;
    let status_counts = s.orders.stats().await?.status_counts;
    Ok(Json(PaginatedResponse { data, total, page: filter.page, limit: filter.limit, status_counts: Some(status_counts) }))
}

pub async fn stats(State(s): State<AppState>, _: AdminPrincipal) -> Result<Json<OrderStats>, ApiError> {
    Ok(Json(s.orders.stats().await?))
}

pub async fn update_status(
    State(s): State<AppState>,
    AdminPrincipal(admin): AdminPrincipal,
    Path(order_id): Path<String>,
    Json(r): Json<UpdateStatusRequest>,
) -> Result<Json<Order>, ApiError> {
    tracing::info!(admin = %admin.user_id, %order_id, status = %r.status, "Admin status change requested");
    Ok(Json(s.lifecycle.apply_admin_status_change(&order_id, &r.status).await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_params() {
        let p = ListParams { status: Some("PAID".into()), page: Some(0), limit: Some(500) };
        let filter = p.filter(None).unwrap();
        assert_eq!(filter.status, Some(OrderStatus::Paid));
        assert_eq!((filter.page, filter.limit), (1, 100));

        let defaults = ListParams::default().filter(None).unwrap();
        assert_eq!((defaults.status, defaults.page, defaults.limit), (None, 1, 10));

        let bad = ListParams { status: Some("SHIPPED".into()), ..Default::default() };
        assert!(matches!(bad.filter(None), Err(ApiError::Lifecycle(LifecycleError::UnknownStatus(_)))));
    }
}
