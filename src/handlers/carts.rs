use axum::{
    extract::{Json, Path, State},
    response::IntoResponse,
    routing::{get, patch, post},
    Router,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    auth::Identity,
    errors::ApiError,
    handlers::common::{created_response, no_content_response, success_response, validate_input},
    services::cart::CartView,
    AppState,
};

/// Creates the router for the signed-in identity's cart
pub fn carts_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(get_cart))
        .route("/items", post(add_to_cart))
        .route("/items/:id", patch(update_cart_item).delete(remove_cart_item))
        .route("/merge", post(merge_cart))
}

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct AddItemRequest {
    pub product_id: Uuid,
    #[validate(range(min = 1, max = 99))]
    pub quantity: i32,
}

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct UpdateQuantityRequest {
    /// Zero removes the line
    #[validate(range(min = 0, max = 99))]
    pub quantity: i32,
}

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct MergeCartRequest {
    /// Guest identity whose cart is folded into the caller's
    #[validate(length(min = 1, max = 128))]
    pub from_identity_id: String,
}

#[utoipa::path(
    get,
    path = "/api/v1/cart",
    responses(
        (status = 200, description = "Current cart", body = CartView),
        (status = 401, description = "No identity", body = crate::errors::ErrorResponse)
    ),
    tag = "Cart"
)]
pub async fn get_cart(
    State(state): State<AppState>,
    identity: Identity,
) -> Result<impl IntoResponse, ApiError> {
    let cart = state.services.cart.get_cart(&identity.id).await?;
    Ok(success_response(cart))
}

/// Add a product to the cart; repeated adds accumulate on one line
#[utoipa::path(
    post,
    path = "/api/v1/cart/items",
    request_body = AddItemRequest,
    responses(
        (status = 201, description = "Updated cart", body = CartView),
        (status = 400, description = "Invalid quantity", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown or inactive product", body = crate::errors::ErrorResponse)
    ),
    tag = "Cart"
)]
pub async fn add_to_cart(
    State(state): State<AppState>,
    identity: Identity,
    Json(payload): Json<AddItemRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;

    state
        .services
        .cart
        .add_item(&identity.id, payload.product_id, payload.quantity)
        .await?;
    let cart = state.services.cart.get_cart(&identity.id).await?;

    Ok(created_response(cart))
}

#[utoipa::path(
    patch,
    path = "/api/v1/cart/items/{id}",
    params(("id" = Uuid, Path, description = "Cart line id")),
    request_body = UpdateQuantityRequest,
    responses(
        (status = 200, description = "Updated cart", body = CartView),
        (status = 404, description = "Line not in this cart", body = crate::errors::ErrorResponse)
    ),
    tag = "Cart"
)]
pub async fn update_cart_item(
    State(state): State<AppState>,
    identity: Identity,
    Path(item_id): Path<Uuid>,
    Json(payload): Json<UpdateQuantityRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;

    state
        .services
        .cart
        .update_item_quantity(&identity.id, item_id, payload.quantity)
        .await?;
    let cart = state.services.cart.get_cart(&identity.id).await?;

    Ok(success_response(cart))
}

#[utoipa::path(
    delete,
    path = "/api/v1/cart/items/{id}",
    params(("id" = Uuid, Path, description = "Cart line id")),
    responses(
        (status = 204, description = "Line removed"),
        (status = 404, description = "Line not in this cart", body = crate::errors::ErrorResponse)
    ),
    tag = "Cart"
)]
pub async fn remove_cart_item(
    State(state): State<AppState>,
    identity: Identity,
    Path(item_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .services
        .cart
        .remove_item(&identity.id, item_id)
        .await?;
    Ok(no_content_response())
}

/// Fold a guest cart into the signed-in cart
#[utoipa::path(
    post,
    path = "/api/v1/cart/merge",
    request_body = MergeCartRequest,
    responses((status = 200, description = "Merged cart", body = CartView)),
    tag = "Cart"
)]
pub async fn merge_cart(
    State(state): State<AppState>,
    identity: Identity,
    Json(payload): Json<MergeCartRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;

    let cart = state
        .services
        .cart
        .merge_carts(payload.from_identity_id.trim(), &identity.id)
        .await?;
    Ok(success_response(cart))
}
