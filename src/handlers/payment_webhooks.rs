use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use bytes::Bytes;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use tracing::{info, warn};

use crate::{
    errors::{ApiError, ServiceError},
    AppState,
};

type HmacSha256 = Hmac<Sha256>;

const DEFAULT_TOLERANCE_SECS: u64 = 300;

/// Gateway events that mean the shopper finished paying
const COMPLETION_EVENTS: &[&str] = &[
    "payment_intent.amount_capturable_updated",
    "payment_intent.succeeded",
    "payment_intent.payment_failed",
    "payment_intent.canceled",
];

#[derive(Debug, Deserialize)]
struct WebhookEvent {
    #[serde(default)]
    id: Option<String>,
    #[serde(rename = "type")]
    kind: String,
    data: WebhookData,
}

#[derive(Debug, Deserialize)]
struct WebhookData {
    object: WebhookObject,
}

#[derive(Debug, Deserialize)]
struct WebhookObject {
    id: String,
}

// POST /api/v1/payments/webhook
#[utoipa::path(
    post,
    path = "/api/v1/payments/webhook",
    request_body = String,
    responses(
        (status = 200, description = "Webhook accepted"),
        (status = 401, description = "Invalid signature", body = crate::errors::ErrorResponse),
        (status = 400, description = "Invalid payload", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    match state.config.payment_webhook_secret.as_deref() {
        Some(secret) => {
            let tolerance = state
                .config
                .payment_webhook_tolerance_secs
                .unwrap_or(DEFAULT_TOLERANCE_SECS);
            if !verify_signature(&headers, &body, secret, tolerance, chrono::Utc::now().timestamp())
            {
                warn!("Payment webhook signature verification failed");
                return Err(ServiceError::Unauthorized("invalid webhook signature".to_string()).into());
            }
        }
        None if state.config.is_development() => {
            warn!("Accepting unsigned payment webhook; no webhook secret configured");
        }
        None => {
            return Err(
                ServiceError::Unauthorized("webhook secret not configured".to_string()).into(),
            );
        }
    }

    let event: WebhookEvent = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("invalid webhook payload: {}", e)))?;

    if !COMPLETION_EVENTS.contains(&event.kind.as_str()) {
        info!(event_type = %event.kind, "Ignoring payment webhook");
        return Ok((StatusCode::OK, "ok"));
    }

    let intent_id = event.data.object.id;
    match state
        .services
        .checkout
        .complete_from_gateway(&intent_id)
        .await
    {
        Ok(order) => {
            info!(
                event_id = ?event.id,
                intent_id = %intent_id,
                order_number = %order.order_number,
                "Checkout completed from webhook"
            );
        }
        // Server-side failures are returned so the gateway redelivers
        Err(err) if err.status_code().is_server_error() => return Err(err.into()),
        Err(err) => {
            info!(
                event_id = ?event.id,
                intent_id = %intent_id,
                code = err.code(),
                "Webhook acknowledged without an order"
            );
        }
    }

    Ok((StatusCode::OK, "ok"))
}

fn sign(secret: &str, timestamp: &str, payload: &[u8]) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(payload);
    Some(hex::encode(mac.finalize().into_bytes()))
}

fn within_tolerance(timestamp: &str, tolerance_secs: u64, now: i64) -> bool {
    timestamp
        .parse::<i64>()
        .map(|ts| (now - ts).unsigned_abs() <= tolerance_secs)
        .unwrap_or(false)
}

/// Accepts either `x-timestamp` + `x-signature` or a Stripe-style
/// `Stripe-Signature: t=..,v1=..` header, both HMAC-SHA256 over
/// `"{timestamp}.{body}"`.
pub(crate) fn verify_signature(
    headers: &HeaderMap,
    payload: &[u8],
    secret: &str,
    tolerance_secs: u64,
    now: i64,
) -> bool {
    let header = |name: &str| headers.get(name).and_then(|h| h.to_str().ok());

    if let (Some(ts), Some(sig)) = (header("x-timestamp"), header("x-signature")) {
        return within_tolerance(ts, tolerance_secs, now)
            && sign(secret, ts, payload).map_or(false, |expected| constant_time_eq(&expected, sig));
    }

    if let Some(sig) = header("stripe-signature") {
        let mut ts = None;
        let mut candidates = Vec::new();
        for part in sig.split(',') {
            match part.trim().split_once('=') {
                Some(("t", val)) => ts = Some(val),
                Some(("v1", val)) => candidates.push(val),
                _ => {}
            }
        }
        if let Some(ts) = ts {
            if !within_tolerance(ts, tolerance_secs, now) {
                return false;
            }
            if let Some(expected) = sign(secret, ts, payload) {
                return candidates.iter().any(|v1| constant_time_eq(&expected, v1));
            }
        }
    }
    false
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut res = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        res |= x ^ y;
    }
    res == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    const SECRET: &str = "whsec_test";
    const BODY: &[u8] = br#"{"type":"payment_intent.succeeded","data":{"object":{"id":"pi_1"}}}"#;

    #[test]
    fn generic_headers_are_verified() {
        let now = 1_700_000_000;
        let sig = sign(SECRET, "1700000000", BODY).unwrap();
        let mut headers = HeaderMap::new();
        headers.insert("x-timestamp", HeaderValue::from_static("1700000000"));
        headers.insert("x-signature", HeaderValue::from_str(&sig).unwrap());

        assert!(verify_signature(&headers, BODY, SECRET, 300, now));
        assert!(!verify_signature(&headers, b"{}", SECRET, 300, now));
        assert!(!verify_signature(&headers, BODY, "other", 300, now));
        assert!(!verify_signature(&headers, BODY, SECRET, 300, now + 301));
    }

    #[test]
    fn stripe_header_is_verified() {
        let now = 1_700_000_000;
        let sig = sign(SECRET, "1700000000", BODY).unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(
            "stripe-signature",
            HeaderValue::from_str(&format!("t=1700000000,v1=deadbeef,v1={}", sig)).unwrap(),
        );
        assert!(verify_signature(&headers, BODY, SECRET, 300, now));

        let mut stale = HeaderMap::new();
        stale.insert(
            "stripe-signature",
            HeaderValue::from_str(&format!("t=1600000000,v1={}", sig)).unwrap(),
        );
        assert!(!verify_signature(&stale, BODY, SECRET, 300, now));
    }

    #[test]
    fn missing_headers_fail() {
        assert!(!verify_signature(&HeaderMap::new(), BODY, SECRET, 300, 0));
    }
}
