use axum::{
    extract::{Json, State},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::{Validate, ValidationError};

use crate::{
    entities::{DiscountType, OfferModel},
    errors::ApiError,
    handlers::common::{success_response, validate_input},
    services::discounts::DiscountQuote,
    AppState,
};

pub fn discount_routes() -> Router<AppState> {
    Router::new()
        .route("/discount/validate", post(validate_code))
        .route("/offers/active", get(active_offers))
}

fn non_negative(amount: &Decimal) -> Result<(), ValidationError> {
    if amount.is_sign_negative() {
        return Err(ValidationError::new("order_amount_negative"));
    }
    Ok(())
}

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct ValidateCodeRequest {
    #[validate(length(min = 1, max = 64))]
    pub code: String,
    #[validate(custom = "non_negative")]
    pub order_amount: Decimal,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OfferResponse {
    pub code: String,
    pub title: String,
    pub description: Option<String>,
    pub discount_type: DiscountType,
    pub discount_value: Decimal,
    pub min_order_amount: Option<Decimal>,
    pub end_date: Option<DateTime<Utc>>,
}

impl From<OfferModel> for OfferResponse {
    fn from(offer: OfferModel) -> Self {
        Self {
            code: offer.code,
            title: offer.title,
            description: offer.description,
            discount_type: offer.discount_type,
            discount_value: offer.discount_value,
            min_order_amount: offer.min_order_amount,
            end_date: offer.end_date,
        }
    }
}

/// Check a code against an order amount without using it up
#[utoipa::path(
    post,
    path = "/api/v1/discount/validate",
    request_body = ValidateCodeRequest,
    responses(
        (status = 200, description = "Code applies", body = DiscountQuote),
        (status = 400, description = "Code rejected", body = crate::errors::ErrorResponse),
        (status = 409, description = "Code used up", body = crate::errors::ErrorResponse)
    ),
    tag = "Discounts"
)]
pub async fn validate_code(
    State(state): State<AppState>,
    Json(payload): Json<ValidateCodeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;
    let quote = state
        .services
        .discounts
        .validate(&payload.code, payload.order_amount)
        .await?;
    Ok(success_response(quote))
}

#[utoipa::path(
    get,
    path = "/api/v1/offers/active",
    responses((status = 200, description = "Offers redeemable right now", body = [OfferResponse])),
    tag = "Discounts"
)]
pub async fn active_offers(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let offers = state.services.discounts.active_offers().await?;
    Ok(success_response(
        offers.into_iter().map(OfferResponse::from).collect::<Vec<_>>(),
    ))
}
