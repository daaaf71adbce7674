use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rust_decimal::Decimal;
use sea_orm::error::DbErr;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

fn current_request_id() -> Option<String> {
    crate::tracing::current_request_id().map(|rid| rid.as_str().to_string())
}

/// Error body returned by every failing endpoint
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "error": "Conflict",
    "code": "usage_limit_reached",
    "message": "Discount code LAST1 has reached its usage limit",
    "details": null,
    "request_id": "req-abc123xyz",
    "timestamp": "2025-03-09T10:30:00.000Z"
}))]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Not Found", "Bad Request")
    pub error: String,
    /// Stable machine-readable error code
    pub code: String,
    /// Human-readable error description
    pub message: String,
    /// Extra context for the caller (payment references, minimums)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// Unique request identifier for support and debugging
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// ISO 8601 timestamp when error occurred
    pub timestamp: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] DbErr),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Cart is empty")]
    EmptyCart,

    #[error("Product {0} not found")]
    ProductNotFound(Uuid),

    #[error("Cart item {0} not found")]
    CartItemNotFound(Uuid),

    #[error("Discount code {0} does not exist")]
    CodeNotFound(String),

    #[error("Discount code {0} is not active")]
    CodeInactive(String),

    #[error("Discount code {0} is not active yet")]
    CodeNotYetActive(String),

    #[error("Discount code {0} has expired")]
    CodeExpired(String),

    #[error("Discount code {0} has reached its usage limit")]
    UsageLimitReached(String),

    #[error("Order amount {actual} is below the minimum of {minimum} for code {code}")]
    MinimumOrderNotMet {
        code: String,
        minimum: Decimal,
        actual: Decimal,
    },

    #[error("Insufficient inventory for {0}")]
    InsufficientInventory(String),

    #[error("Payment declined: {0}")]
    PaymentDeclined(String),

    #[error("Payment gateway error: {0}")]
    PaymentGatewayError(String),

    #[error(
        "Order could not be recorded for confirmed payment {payment_intent_id} (identity {identity_id}, amount {amount}): {reason}"
    )]
    OrderPersistFailed {
        payment_intent_id: String,
        identity_id: String,
        amount: Decimal,
        reason: String,
    },

    #[error("Cannot move order from {from} to {to}")]
    InvalidStatusTransition { from: String, to: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl ServiceError {
    /// Stable code clients can branch on ("someone just took the last item"
    /// is `insufficient_inventory`, not a generic failure).
    pub fn code(&self) -> &'static str {
        match self {
            Self::DatabaseError(_) => "storage_unavailable",
            Self::NotFound(_) => "not_found",
            Self::ValidationError(_) => "validation_error",
            Self::Unauthorized(_) => "unauthorized",
            Self::Forbidden(_) => "forbidden",
            Self::EmptyCart => "empty_cart",
            Self::ProductNotFound(_) => "product_not_found",
            Self::CartItemNotFound(_) => "cart_item_not_found",
            Self::CodeNotFound(_) => "code_not_found",
            Self::CodeInactive(_) => "code_inactive",
            Self::CodeNotYetActive(_) => "code_not_yet_active",
            Self::CodeExpired(_) => "code_expired",
            Self::UsageLimitReached(_) => "usage_limit_reached",
            Self::MinimumOrderNotMet { .. } => "minimum_order_not_met",
            Self::InsufficientInventory(_) => "insufficient_inventory",
            Self::PaymentDeclined(_) => "payment_declined",
            Self::PaymentGatewayError(_) => "payment_gateway_error",
            Self::OrderPersistFailed { .. } => "order_persist_failed",
            Self::InvalidStatusTransition { .. } => "invalid_status_transition",
            Self::Conflict(_) => "conflict",
            Self::InternalError(_) => "internal_error",
        }
    }

    /// Returns the HTTP status code for this error.
    /// 500 is reserved for `OrderPersistFailed`; other infrastructure
    /// failures are reported as 503 so callers can retry.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::EmptyCart
            | Self::ValidationError(_)
            | Self::CodeNotFound(_)
            | Self::CodeInactive(_)
            | Self::CodeNotYetActive(_)
            | Self::CodeExpired(_)
            | Self::MinimumOrderNotMet { .. } => StatusCode::BAD_REQUEST,
            Self::NotFound(_) | Self::ProductNotFound(_) | Self::CartItemNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::UsageLimitReached(_)
            | Self::InsufficientInventory(_)
            | Self::InvalidStatusTransition { .. }
            | Self::Conflict(_) => StatusCode::CONFLICT,
            Self::PaymentDeclined(_) => StatusCode::PAYMENT_REQUIRED,
            Self::PaymentGatewayError(_) => StatusCode::BAD_GATEWAY,
            Self::OrderPersistFailed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::DatabaseError(_) | Self::InternalError(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
        }
    }

    /// Returns the error message suitable for HTTP responses.
    /// Internal errors return generic messages to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Storage temporarily unavailable".to_string(),
            Self::InternalError(_) => "Service temporarily unavailable".to_string(),
            Self::PaymentGatewayError(_) => "Payment provider unavailable".to_string(),
            Self::OrderPersistFailed { .. } => {
                "Your payment was received but the order could not be recorded. Our team has been notified."
                    .to_string()
            }
            _ => self.to_string(),
        }
    }

    fn details(&self) -> Option<String> {
        match self {
            Self::OrderPersistFailed {
                payment_intent_id, ..
            } => Some(format!("payment_reference={}", payment_intent_id)),
            Self::MinimumOrderNotMet { minimum, .. } => Some(format!("minimum={}", minimum)),
            _ => None,
        }
    }

    /// Concurrency and user-correctable failures discovered while writing an
    /// order; these cancel the payment authorization instead of escalating.
    pub fn is_user_correctable(&self) -> bool {
        matches!(
            self,
            Self::UsageLimitReached(_)
                | Self::InsufficientInventory(_)
                | Self::CodeNotFound(_)
                | Self::CodeInactive(_)
                | Self::ProductNotFound(_)
        )
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let err = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            code: self.code().to_string(),
            message: self.response_message(),
            details: self.details(),
            request_id: current_request_id(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(err)).into_response()
    }
}

/// API Error type for HTTP responses
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Service error: {0}")]
    ServiceError(#[from] ServiceError),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Bad request: {0}")]
    BadRequest(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::ServiceError(service_error) => service_error.into_response(),
            ApiError::ValidationError(msg) | ApiError::BadRequest(msg) => {
                let status = StatusCode::BAD_REQUEST;
                let error_response = ErrorResponse {
                    error: status.canonical_reason().unwrap_or("Bad Request").to_string(),
                    code: "validation_error".to_string(),
                    message: msg,
                    details: None,
                    request_id: current_request_id(),
                    timestamp: chrono::Utc::now().to_rfc3339(),
                };
                (status, Json(error_response)).into_response()
            }
        }
    }
}
