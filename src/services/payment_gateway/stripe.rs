use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::{prelude::ToPrimitive, Decimal, RoundingStrategy};
use serde::Deserialize;
use tracing::{info, instrument, warn};

use super::{CreateIntentRequest, GatewayError, IntentStatus, PaymentGateway, PaymentIntent};
use crate::errors::ServiceError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Stripe PaymentIntents over the REST API
#[derive(Clone)]
pub struct StripeGateway {
    secret_key: String,
    api_base: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct StripePaymentIntent {
    id: String,
    #[serde(default)]
    client_secret: Option<String>,
    amount: i64,
    currency: String,
    status: String,
    #[serde(default)]
    last_payment_error: Option<StripeErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct StripeErrorBody {
    error: StripeErrorDetail,
}

#[derive(Debug, Deserialize)]
struct StripeErrorDetail {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl StripeErrorDetail {
    fn reason(&self) -> String {
        self.message
            .clone()
            .or_else(|| self.code.clone())
            .unwrap_or_else(|| "payment declined".to_string())
    }
}

/// Stripe amounts are integers in the currency's minor unit.
fn to_minor_units(amount: Decimal) -> Result<i64, GatewayError> {
    (amount * Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .ok_or_else(|| GatewayError::InvalidResponse(format!("amount {} out of range", amount)))
}

fn from_minor_units(amount: i64) -> Decimal {
    Decimal::new(amount, 2)
}

impl StripePaymentIntent {
    fn into_intent(self) -> PaymentIntent {
        let status = match self.status.as_str() {
            "requires_capture" => IntentStatus::Authorized,
            "succeeded" => IntentStatus::Captured,
            "canceled" => IntentStatus::Canceled,
            "requires_payment_method" if self.last_payment_error.is_some() => {
                IntentStatus::Declined(
                    self.last_payment_error
                        .as_ref()
                        .map(StripeErrorDetail::reason)
                        .unwrap_or_default(),
                )
            }
            _ => IntentStatus::Open,
        };

        PaymentIntent {
            client_secret: self.client_secret.unwrap_or_default(),
            amount: from_minor_units(self.amount),
            currency: self.currency.to_uppercase(),
            id: self.id,
            status,
        }
    }
}

impl StripeGateway {
    pub fn new(secret_key: String, api_base: String) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ServiceError::InternalError(format!("HTTP client: {}", e)))?;
        Ok(Self {
            secret_key,
            api_base: api_base.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.api_base, path)
    }

    async fn post(
        &self,
        path: &str,
        params: &[(String, String)],
    ) -> Result<PaymentIntent, GatewayError> {
        let response = self
            .client
            .post(self.url(path))
            .basic_auth(&self.secret_key, Some(""))
            .form(params)
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        Self::parse(response).await
    }

    async fn parse(response: reqwest::Response) -> Result<PaymentIntent, GatewayError> {
        let status = response.status();
        if status.is_success() {
            let intent: StripePaymentIntent = response
                .json()
                .await
                .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;
            return Ok(intent.into_intent());
        }

        let body = response.text().await.unwrap_or_default();
        let detail = serde_json::from_str::<StripeErrorBody>(&body).ok().map(|b| b.error);
        warn!(status = %status, body = %body, "Stripe API error");

        match (status.as_u16(), detail) {
            (402, Some(detail)) => Err(GatewayError::Declined(detail.reason())),
            (_, Some(detail)) if detail.kind.as_deref() == Some("card_error") => {
                Err(GatewayError::Declined(detail.reason()))
            }
            (404, _) => Err(GatewayError::IntentNotFound(body)),
            (code, _) if code >= 500 => Err(GatewayError::Transport(format!("HTTP {}", code))),
            (code, _) => Err(GatewayError::InvalidResponse(format!("HTTP {}: {}", code, body))),
        }
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    fn name(&self) -> &'static str {
        "stripe"
    }

    #[instrument(skip(self, request), fields(amount = %request.amount, currency = %request.currency))]
    async fn create_intent(
        &self,
        request: CreateIntentRequest,
    ) -> Result<PaymentIntent, GatewayError> {
        let mut params = vec![
            ("amount".to_string(), to_minor_units(request.amount)?.to_string()),
            ("currency".to_string(), request.currency.to_lowercase()),
            ("capture_method".to_string(), "manual".to_string()),
            (
                "automatic_payment_methods[enabled]".to_string(),
                "true".to_string(),
            ),
        ];
        for (key, value) in request.metadata {
            params.push((format!("metadata[{}]", key), value));
        }

        let intent = self.post("payment_intents", &params).await?;
        info!(intent_id = %intent.id, "Stripe payment intent created");
        Ok(intent)
    }

    #[instrument(skip(self))]
    async fn retrieve_intent(&self, intent_id: &str) -> Result<PaymentIntent, GatewayError> {
        let response = self
            .client
            .get(self.url(&format!("payment_intents/{}", intent_id)))
            .basic_auth(&self.secret_key, Some(""))
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        Self::parse(response).await
    }

    #[instrument(skip(self))]
    async fn capture_intent(&self, intent_id: &str) -> Result<PaymentIntent, GatewayError> {
        self.post(&format!("payment_intents/{}/capture", intent_id), &[])
            .await
    }

    #[instrument(skip(self))]
    async fn cancel_intent(&self, intent_id: &str) -> Result<PaymentIntent, GatewayError> {
        self.post(&format!("payment_intents/{}/cancel", intent_id), &[])
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn raw(status: &str, error: Option<&str>) -> StripePaymentIntent {
        StripePaymentIntent {
            id: "pi_1".into(),
            client_secret: Some("pi_1_secret".into()),
            amount: 88000,
            currency: "inr".into(),
            status: status.into(),
            last_payment_error: error.map(|m| StripeErrorDetail {
                kind: Some("card_error".into()),
                code: Some("card_declined".into()),
                message: Some(m.into()),
            }),
        }
    }

    #[test]
    fn minor_unit_conversion() {
        assert_eq!(to_minor_units(dec!(880.00)).unwrap(), 88000);
        assert_eq!(to_minor_units(dec!(12.345)).unwrap(), 1235);
        assert_eq!(from_minor_units(88000), dec!(880));
    }

    #[test]
    fn stripe_statuses_map_to_intent_statuses() {
        assert_eq!(raw("requires_capture", None).into_intent().status, IntentStatus::Authorized);
        assert_eq!(raw("succeeded", None).into_intent().status, IntentStatus::Captured);
        assert_eq!(raw("canceled", None).into_intent().status, IntentStatus::Canceled);
        assert_eq!(raw("requires_payment_method", None).into_intent().status, IntentStatus::Open);
        assert_eq!(
            raw("requires_payment_method", Some("Your card was declined.")).into_intent().status,
            IntentStatus::Declined("Your card was declined.".into())
        );
        let intent = raw("processing", None).into_intent();
        assert_eq!(intent.status, IntentStatus::Open);
        assert_eq!(intent.currency, "INR");
        assert_eq!(intent.amount, dec!(880));
    }
}
