//! Payment gateway adapter.
//!
//! Intents are created with manual capture: confirming on the client only
//! authorizes the charge, and the order workflow captures it once the order
//! is durable (or cancels it when the order is rejected).

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{config::AppConfig, errors::ServiceError};

pub mod simulated;
pub mod stripe;

pub use simulated::SimulatedGateway;
pub use stripe::StripeGateway;

/// Where the gateway says an intent is
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntentStatus {
    /// Waiting on the shopper
    Open,
    /// Shopper confirmed, funds held, not yet captured
    Authorized,
    Captured,
    Canceled,
    Declined(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    pub client_secret: String,
    pub amount: Decimal,
    pub currency: String,
    pub status: IntentStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateIntentRequest {
    pub amount: Decimal,
    pub currency: String,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("payment declined: {0}")]
    Declined(String),
    #[error("payment intent {0} not found")]
    IntentNotFound(String),
    #[error("gateway transport failure: {0}")]
    Transport(String),
    #[error("unexpected gateway response: {0}")]
    InvalidResponse(String),
}

impl From<GatewayError> for ServiceError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Declined(reason) => ServiceError::PaymentDeclined(reason),
            GatewayError::IntentNotFound(id) => {
                ServiceError::NotFound(format!("Payment intent {} not found", id))
            }
            other => ServiceError::PaymentGatewayError(other.to_string()),
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn name(&self) -> &'static str;

    async fn create_intent(
        &self,
        request: CreateIntentRequest,
    ) -> Result<PaymentIntent, GatewayError>;

    /// Current confirmation result for an intent
    async fn retrieve_intent(&self, intent_id: &str) -> Result<PaymentIntent, GatewayError>;

    async fn capture_intent(&self, intent_id: &str) -> Result<PaymentIntent, GatewayError>;

    async fn cancel_intent(&self, intent_id: &str) -> Result<PaymentIntent, GatewayError>;
}

/// Builds the gateway selected by `payment_provider`.
pub fn gateway_from_config(cfg: &AppConfig) -> Result<Arc<dyn PaymentGateway>, ServiceError> {
    match cfg.payment_provider.to_ascii_lowercase().as_str() {
        "stripe" => {
            let key = cfg
                .stripe_secret_key
                .clone()
                .filter(|k| !k.trim().is_empty())
                .ok_or_else(|| {
                    ServiceError::InternalError("stripe_secret_key is not configured".to_string())
                })?;
            Ok(Arc::new(StripeGateway::new(key, cfg.stripe_api_base.clone())?))
        }
        "simulated" => Ok(Arc::new(SimulatedGateway::new(cfg.simulated_auto_authorize))),
        other => Err(ServiceError::InternalError(format!(
            "unknown payment provider {}",
            other
        ))),
    }
}
