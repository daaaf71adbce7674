use std::collections::BTreeMap;

use assert_matches::assert_matches;
use nestling_store::services::payment_gateway::{
    CreateIntentRequest, GatewayError, IntentStatus, PaymentGateway, StripeGateway,
};
use rust_decimal_macros::dec;
use serde_json::json;
use wiremock::{
    matchers::{body_string_contains, header_exists, method, path},
    Mock, MockServer, ResponseTemplate,
};

fn intent_body(status: &str) -> serde_json::Value {
    json!({
        "id": "pi_3Nx",
        "object": "payment_intent",
        "client_secret": "pi_3Nx_secret_abc",
        "amount": 88000,
        "currency": "inr",
        "status": status,
        "capture_method": "manual"
    })
}

async fn gateway(server: &MockServer) -> StripeGateway {
    StripeGateway::new("sk_test_123".to_string(), server.uri()).expect("client")
}

#[tokio::test]
async fn create_intent_posts_manual_capture_in_minor_units() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/payment_intents"))
        .and(header_exists("authorization"))
        .and(body_string_contains("amount=88000"))
        .and(body_string_contains("currency=inr"))
        .and(body_string_contains("capture_method=manual"))
        .and(body_string_contains("checkout_session_id"))
        .respond_with(ResponseTemplate::new(200).set_body_json(intent_body("requires_payment_method")))
        .expect(1)
        .mount(&server)
        .await;

    let mut metadata = BTreeMap::new();
    metadata.insert("checkout_session_id".to_string(), "sess-1".to_string());
    let intent = gateway(&server)
        .await
        .create_intent(CreateIntentRequest {
            amount: dec!(880.00),
            currency: "INR".to_string(),
            metadata,
        })
        .await
        .unwrap();

    assert_eq!(intent.id, "pi_3Nx");
    assert_eq!(intent.client_secret, "pi_3Nx_secret_abc");
    assert_eq!(intent.amount, dec!(880));
    assert_eq!(intent.currency, "INR");
    assert_eq!(intent.status, IntentStatus::Open);
}

#[tokio::test]
async fn retrieve_reports_authorization_awaiting_capture() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/payment_intents/pi_3Nx"))
        .respond_with(ResponseTemplate::new(200).set_body_json(intent_body("requires_capture")))
        .mount(&server)
        .await;

    let intent = gateway(&server).await.retrieve_intent("pi_3Nx").await.unwrap();
    assert_eq!(intent.status, IntentStatus::Authorized);
}

#[tokio::test]
async fn capture_and_cancel_hit_their_endpoints() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/payment_intents/pi_3Nx/capture"))
        .respond_with(ResponseTemplate::new(200).set_body_json(intent_body("succeeded")))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/payment_intents/pi_3Nx/cancel"))
        .respond_with(ResponseTemplate::new(200).set_body_json(intent_body("canceled")))
        .expect(1)
        .mount(&server)
        .await;

    let stripe = gateway(&server).await;
    assert_eq!(
        stripe.capture_intent("pi_3Nx").await.unwrap().status,
        IntentStatus::Captured
    );
    assert_eq!(
        stripe.cancel_intent("pi_3Nx").await.unwrap().status,
        IntentStatus::Canceled
    );
}

#[tokio::test]
async fn card_errors_become_declines() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/payment_intents/pi_3Nx/capture"))
        .respond_with(ResponseTemplate::new(402).set_body_json(json!({
            "error": {
                "type": "card_error",
                "code": "card_declined",
                "message": "Your card was declined."
            }
        })))
        .mount(&server)
        .await;

    let err = gateway(&server)
        .await
        .capture_intent("pi_3Nx")
        .await
        .unwrap_err();
    assert_matches!(err, GatewayError::Declined(ref msg) if msg == "Your card was declined.");
}

#[tokio::test]
async fn missing_intent_and_server_errors_are_distinguished() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/payment_intents/pi_missing"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": { "type": "invalid_request_error", "message": "No such payment_intent" }
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/payment_intents/pi_flaky"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let stripe = gateway(&server).await;
    assert_matches!(
        stripe.retrieve_intent("pi_missing").await,
        Err(GatewayError::IntentNotFound(_))
    );
    assert_matches!(
        stripe.retrieve_intent("pi_flaky").await,
        Err(GatewayError::Transport(_))
    );
}
