use axum::{
    extract::{Json, Path, State},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    auth::Identity,
    entities::{CheckoutSessionModel, CheckoutStatus},
    errors::ApiError,
    handlers::common::{created_response, success_response, validate_input},
    services::{
        checkout::{Address, CheckoutIntent, CreateIntentInput},
        order_status::OrderDetails,
    },
    AppState,
};

/// Creates the router for checkout endpoints
pub fn checkout_routes() -> Router<AppState> {
    Router::new()
        .route("/intent", post(create_intent))
        .route("/confirm", post(confirm_checkout))
        .route("/sessions/:id", get(get_session))
}

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreateIntentRequest {
    /// Receipt address; defaults to the identity's email
    #[validate(email)]
    pub email: Option<String>,
    #[validate(length(min = 1, max = 64))]
    pub discount_code: Option<String>,
    #[validate]
    pub shipping_address: Address,
    /// Defaults to the shipping address
    #[validate]
    pub billing_address: Option<Address>,
}

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct ConfirmCheckoutRequest {
    #[validate(length(min = 1, max = 255))]
    pub payment_intent_id: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CheckoutSessionResponse {
    pub id: Uuid,
    pub status: CheckoutStatus,
    pub discount_code: Option<String>,
    pub subtotal: Decimal,
    pub tax_amount: Decimal,
    pub shipping_amount: Decimal,
    pub discount_amount: Decimal,
    pub total_amount: Decimal,
    pub currency: String,
    pub payment_intent_id: Option<String>,
    pub failure_reason: Option<String>,
    pub order_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<CheckoutSessionModel> for CheckoutSessionResponse {
    fn from(session: CheckoutSessionModel) -> Self {
        Self {
            id: session.id,
            status: session.status,
            discount_code: session.discount_code,
            subtotal: session.subtotal,
            tax_amount: session.tax_amount,
            shipping_amount: session.shipping_amount,
            discount_amount: session.discount_amount,
            total_amount: session.total_amount,
            currency: session.currency,
            payment_intent_id: session.payment_intent_id,
            failure_reason: session.failure_reason,
            order_id: session.order_id,
            created_at: session.created_at,
            updated_at: session.updated_at,
        }
    }
}

/// Price the cart and open (or reuse) a payment intent
#[utoipa::path(
    post,
    path = "/api/v1/checkout/intent",
    request_body = CreateIntentRequest,
    responses(
        (status = 201, description = "Payment intent ready for the payment sheet", body = CheckoutIntent),
        (status = 400, description = "Empty cart or discount code rejected", body = crate::errors::ErrorResponse),
        (status = 409, description = "Not enough stock", body = crate::errors::ErrorResponse),
        (status = 502, description = "Payment provider unavailable", body = crate::errors::ErrorResponse)
    ),
    tag = "Checkout"
)]
pub async fn create_intent(
    State(state): State<AppState>,
    identity: Identity,
    Json(payload): Json<CreateIntentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;

    let input = CreateIntentInput {
        email: payload.email.or_else(|| identity.email.clone()),
        discount_code: payload
            .discount_code
            .map(|code| code.trim().to_string())
            .filter(|code| !code.is_empty()),
        shipping_address: payload.shipping_address,
        billing_address: payload.billing_address,
    };

    let intent = state.services.checkout.create_intent(&identity, input).await?;
    Ok(created_response(intent))
}

/// Complete checkout after the payment sheet succeeded
#[utoipa::path(
    post,
    path = "/api/v1/checkout/confirm",
    request_body = ConfirmCheckoutRequest,
    responses(
        (status = 201, description = "Order placed", body = OrderDetails),
        (status = 402, description = "Payment declined", body = crate::errors::ErrorResponse),
        (status = 409, description = "Stock or discount code taken by another order", body = crate::errors::ErrorResponse),
        (status = 500, description = "Paid but the order could not be recorded", body = crate::errors::ErrorResponse)
    ),
    tag = "Checkout"
)]
pub async fn confirm_checkout(
    State(state): State<AppState>,
    identity: Identity,
    Json(payload): Json<ConfirmCheckoutRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;

    let order = state
        .services
        .checkout
        .confirm(&identity, payload.payment_intent_id.trim())
        .await?;
    Ok(created_response(order))
}

#[utoipa::path(
    get,
    path = "/api/v1/checkout/sessions/{id}",
    params(("id" = Uuid, Path, description = "Checkout session id")),
    responses(
        (status = 200, description = "Checkout session", body = CheckoutSessionResponse),
        (status = 404, description = "Not this identity's checkout", body = crate::errors::ErrorResponse)
    ),
    tag = "Checkout"
)]
pub async fn get_session(
    State(state): State<AppState>,
    identity: Identity,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state.services.checkout.get_session(&identity.id, id).await?;
    Ok(success_response(CheckoutSessionResponse::from(session)))
}
