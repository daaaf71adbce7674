use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    auth::Identity,
    entities::{OrderModel, OrderStatus},
    errors::ApiError,
    handlers::common::{success_response, PaginationParams},
    services::order_status::OrderDetails,
    AppState, PaginatedResponse,
};

/// Creates the router for a shopper's own orders
pub fn orders_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_orders))
        .route("/:id", get(get_order))
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OrderSummary {
    pub id: Uuid,
    pub order_number: String,
    pub status: OrderStatus,
    pub total_amount: Decimal,
    pub currency: String,
    pub created_at: DateTime<Utc>,
}

impl From<OrderModel> for OrderSummary {
    fn from(order: OrderModel) -> Self {
        Self {
            id: order.id,
            order_number: order.order_number,
            status: order.status,
            total_amount: order.total_amount,
            currency: order.currency,
            created_at: order.created_at,
        }
    }
}

/// Order history, newest first
#[utoipa::path(
    get,
    path = "/api/v1/orders",
    params(PaginationParams),
    responses(
        (status = 200, description = "Page of the caller's orders", body = [OrderSummary]),
        (status = 401, description = "No identity", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn list_orders(
    State(state): State<AppState>,
    identity: Identity,
    Query(params): Query<PaginationParams>,
) -> Result<impl IntoResponse, ApiError> {
    let (page, per_page) = params.clamped();
    let (orders, total) = state
        .services
        .orders
        .list_for_identity(&identity.id, page, per_page)
        .await?;

    Ok(success_response(PaginatedResponse::new(
        orders.into_iter().map(OrderSummary::from).collect(),
        total,
        page,
        per_page,
    )))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Order with lines and payment", body = OrderDetails),
        (status = 404, description = "No such order for this identity", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    identity: Identity,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let order = state
        .services
        .orders
        .get_for_identity(&identity.id, id)
        .await?;
    Ok(success_response(order))
}
