use axum::{
    extract::{Json, Path, Query, State},
    response::IntoResponse,
    routing::{get, post, put},
    Router,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::{
    auth::AdminIdentity,
    entities::OrderStatus,
    errors::ApiError,
    handlers::common::success_response,
    services::{analytics::DashboardMetrics, order_status::OrderDetails},
    AppState,
};

/// Staff-only routes; every handler takes an [`AdminIdentity`].
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/analytics/dashboard", get(dashboard))
        .route("/orders/:id", get(get_order))
        .route("/orders/:id/status", put(update_order_status))
        .route("/orders/:id/refund", post(record_refund))
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct DashboardQuery {
    /// Window length in days (1..=365)
    pub days: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UpdateStatusRequest {
    pub status: OrderStatus,
}

#[utoipa::path(
    get,
    path = "/api/v1/admin/analytics/dashboard",
    params(DashboardQuery),
    responses(
        (status = 200, description = "Dashboard metrics", body = DashboardMetrics),
        (status = 403, description = "Administrator role required", body = crate::errors::ErrorResponse)
    ),
    tag = "Admin"
)]
pub async fn dashboard(
    State(state): State<AppState>,
    AdminIdentity(_admin): AdminIdentity,
    Query(query): Query<DashboardQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let metrics = state
        .services
        .analytics
        .dashboard(query.days.unwrap_or(30))
        .await?;
    Ok(success_response(metrics))
}

#[utoipa::path(
    get,
    path = "/api/v1/admin/orders/{id}",
    params(("id" = Uuid, Path, description = "Order id")),
    responses((status = 200, description = "Any order", body = OrderDetails)),
    tag = "Admin"
)]
pub async fn get_order(
    State(state): State<AppState>,
    AdminIdentity(_admin): AdminIdentity,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let order = state.services.orders.get_details(id).await?;
    Ok(success_response(order))
}

#[utoipa::path(
    put,
    path = "/api/v1/admin/orders/{id}/status",
    params(("id" = Uuid, Path, description = "Order id")),
    request_body = UpdateStatusRequest,
    responses(
        (status = 200, description = "Order moved", body = OrderDetails),
        (status = 409, description = "Transition not allowed", body = crate::errors::ErrorResponse)
    ),
    tag = "Admin"
)]
pub async fn update_order_status(
    State(state): State<AppState>,
    AdminIdentity(admin): AdminIdentity,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateStatusRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let order = state
        .services
        .orders
        .update_status(id, payload.status)
        .await?;
    info!(order_id = %id, admin = %admin.id, status = %payload.status, "Order status changed by admin");
    Ok(success_response(order))
}

/// Record a refund issued at the payment provider
#[utoipa::path(
    post,
    path = "/api/v1/admin/orders/{id}/refund",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Order and payment marked refunded", body = OrderDetails),
        (status = 409, description = "Nothing to refund", body = crate::errors::ErrorResponse)
    ),
    tag = "Admin"
)]
pub async fn record_refund(
    State(state): State<AppState>,
    AdminIdentity(admin): AdminIdentity,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let order = state.services.orders.record_refund(id).await?;
    info!(order_id = %id, admin = %admin.id, "Refund recorded by admin");
    Ok(success_response(order))
}
