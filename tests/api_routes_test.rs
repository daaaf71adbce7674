mod common;

use std::str::FromStr;

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::{json, Value};

use common::{percent_offer, TestApp};

const SHOPPER: Option<(&str, &str)> = Some(("shopper-http", ""));
const ADMIN: Option<(&str, &str)> = Some(("staff-1", "support,admin"));

fn money(value: &Value) -> Decimal {
    match value {
        Value::String(s) => Decimal::from_str(s).expect("decimal string"),
        Value::Number(n) => Decimal::from_str(&n.to_string()).expect("decimal number"),
        other => panic!("not a money value: {}", other),
    }
}

fn shipping_address() -> Value {
    json!({
        "full_name": "Asha Rao",
        "line1": "12 Lake Road",
        "city": "Pune",
        "state": "MH",
        "postal_code": "411001",
        "country": "IN"
    })
}

#[tokio::test]
async fn health_and_docs_are_public() {
    let app = TestApp::new().await;

    let (status, body) = app.request(Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "healthy");

    let (status, body) = app
        .request(Method::GET, "/api-docs/openapi.json", None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["paths"]["/api/v1/checkout/intent"].is_object());
}

#[tokio::test]
async fn catalog_lists_active_products_in_envelope() {
    let app = TestApp::new().await;
    let cot = app.product("Travel cot", dec!(4500), 3).await;
    app.product("Play gym", dec!(2100), 0).await;

    let (status, body) = app
        .request(Method::GET, "/api/v1/products?per_page=1", None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["total"], 2);
    assert_eq!(body["data"]["total_pages"], 2);
    assert_eq!(body["data"]["items"].as_array().unwrap().len(), 1);
    assert!(body["meta"]["timestamp"].is_string());

    let (status, body) = app
        .request(
            Method::GET,
            &format!("/api/v1/products/{}", cot.id),
            None,
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["name"], "Travel cot");
    assert_eq!(body["data"]["in_stock"], true);

    let (status, body) = app
        .request(
            Method::GET,
            "/api/v1/products/00000000-0000-0000-0000-000000000000",
            None,
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "product_not_found");
}

#[tokio::test]
async fn cart_routes_require_identity() {
    let app = TestApp::new().await;
    let (status, body) = app.request(Method::GET, "/api/v1/cart", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "unauthorized");

    let (status, _) = app
        .request(Method::GET, "/api/v1/orders", None, None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn cart_round_trip_over_http() {
    let app = TestApp::new().await;
    let bib = app.product("Bib", dec!(120), 10).await;

    let (status, body) = app
        .request(
            Method::POST,
            "/api/v1/cart/items",
            SHOPPER,
            Some(json!({ "product_id": bib.id, "quantity": 2 })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["item_count"], 2);
    let item_id = body["data"]["items"][0]["item_id"]
        .as_str()
        .unwrap()
        .to_string();

    let (status, body) = app
        .request(
            Method::POST,
            "/api/v1/cart/items",
            SHOPPER,
            Some(json!({ "product_id": bib.id, "quantity": 0 })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "validation_error");

    let (status, body) = app
        .request(
            Method::PATCH,
            &format!("/api/v1/cart/items/{}", item_id),
            SHOPPER,
            Some(json!({ "quantity": 5 })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(money(&body["data"]["subtotal"]), dec!(600));

    let (status, _) = app
        .request(
            Method::DELETE,
            &format!("/api/v1/cart/items/{}", item_id),
            Some(("someone-else", "")),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app
        .request(
            Method::DELETE,
            &format!("/api/v1/cart/items/{}", item_id),
            SHOPPER,
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn discount_validation_over_http() {
    let app = TestApp::new().await;
    app.offer(percent_offer("SAVE20", dec!(20), Some(dec!(500))))
        .await;

    let (status, body) = app
        .request(
            Method::POST,
            "/api/v1/discount/validate",
            None,
            Some(json!({ "code": "save20", "order_amount": "1000" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(money(&body["data"]["discount_amount"]), dec!(200));

    let (status, body) = app
        .request(
            Method::POST,
            "/api/v1/discount/validate",
            None,
            Some(json!({ "code": "SAVE20", "order_amount": "300" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "minimum_order_not_met");
    assert_eq!(body["details"], "minimum=500");

    let (status, body) = app
        .request(Method::GET, "/api/v1/offers/active", None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"][0]["code"], "SAVE20");
}

#[tokio::test]
async fn checkout_over_http_places_order() {
    let app = TestApp::new().await;
    let stroller = app.product("Travel stroller", dec!(1000), 10).await;
    app.offer(percent_offer("SAVE20", dec!(20), Some(dec!(500))))
        .await;

    app.request(
        Method::POST,
        "/api/v1/cart/items",
        SHOPPER,
        Some(json!({ "product_id": stroller.id, "quantity": 1 })),
    )
    .await;

    let (status, body) = app
        .request(
            Method::POST,
            "/api/v1/checkout/intent",
            SHOPPER,
            Some(json!({
                "email": "asha@example.com",
                "discount_code": "SAVE20",
                "shipping_address": shipping_address()
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(money(&body["data"]["pricing"]["total_amount"]), dec!(880));
    let intent_id = body["data"]["payment_intent_id"]
        .as_str()
        .unwrap()
        .to_string();
    let session_id = body["data"]["session_id"].as_str().unwrap().to_string();
    assert!(body["data"]["client_secret"].is_string());

    let (status, body) = app
        .request(
            Method::POST,
            "/api/v1/checkout/confirm",
            SHOPPER,
            Some(json!({ "payment_intent_id": intent_id })),
        )
        .await;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    assert_eq!(body["code"], "payment_declined");

    app.gateway.authorize(&intent_id);
    let (status, body) = app
        .request(
            Method::POST,
            "/api/v1/checkout/confirm",
            SHOPPER,
            Some(json!({ "payment_intent_id": intent_id })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["status"], "CONFIRMED");
    assert_eq!(money(&body["data"]["total_amount"]), dec!(880));
    let order_id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, body) = app
        .request(
            Method::GET,
            &format!("/api/v1/checkout/sessions/{}", session_id),
            SHOPPER,
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "PLACED");

    let (status, body) = app
        .request(Method::GET, "/api/v1/orders", SHOPPER, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total"], 1);

    let (status, _) = app
        .request(
            Method::GET,
            &format!("/api/v1/orders/{}", order_id),
            Some(("nosy", "")),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn empty_cart_checkout_is_bad_request() {
    let app = TestApp::new().await;
    let (status, body) = app
        .request(
            Method::POST,
            "/api/v1/checkout/intent",
            SHOPPER,
            Some(json!({ "shipping_address": shipping_address() })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "empty_cart");
    assert_eq!(app.gateway.intent_count(), 0);
}

#[tokio::test]
async fn admin_routes_check_role() {
    let app = TestApp::new().await;
    let (status, body) = app
        .request(Method::GET, "/api/v1/admin/analytics/dashboard", SHOPPER, None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "forbidden");

    let (status, _) = app
        .request(Method::GET, "/api/v1/admin/analytics/dashboard", None, None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = app
        .request(
            Method::GET,
            "/api/v1/admin/analytics/dashboard?days=7",
            ADMIN,
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["period_days"], 7);

    let (status, _) = app
        .request(
            Method::GET,
            "/api/v1/admin/analytics/dashboard?days=400",
            ADMIN,
            None,
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn admin_moves_and_refunds_orders() {
    let app = TestApp::new().await;
    let seat = app.product("Car seat", dec!(700), 5).await;
    let order = app
        .place_order(&nestling_store::auth::Identity::new("buyer"), &seat, 1, None)
        .await;

    let (status, body) = app
        .request(
            Method::PUT,
            &format!("/api/v1/admin/orders/{}/status", order.id),
            ADMIN,
            Some(json!({ "status": "SHIPPED" })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "invalid_status_transition");

    let (status, body) = app
        .request(
            Method::PUT,
            &format!("/api/v1/admin/orders/{}/status", order.id),
            ADMIN,
            Some(json!({ "status": "PROCESSING" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "PROCESSING");

    let (status, body) = app
        .request(
            Method::POST,
            &format!("/api/v1/admin/orders/{}/refund", order.id),
            ADMIN,
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "REFUNDED");
    assert_eq!(body["data"]["payment"]["status"], "REFUNDED");
}

#[tokio::test]
async fn unsigned_webhooks_are_rejected() {
    let app = TestApp::new().await;
    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/v1/payments/webhook")
        .header("content-type", "application/json")
        .header("x-timestamp", chrono::Utc::now().timestamp().to_string())
        .header("x-signature", "deadbeef")
        .body(Body::from(
            json!({
                "type": "payment_intent.succeeded",
                "data": { "object": { "id": "pi_x" } }
            })
            .to_string(),
        ))
        .unwrap();
    let (status, body) = app.send(request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "unauthorized");
}

#[tokio::test]
async fn responses_carry_request_id() {
    let app = TestApp::new().await;
    let request = Request::builder()
        .method(Method::GET)
        .uri("/api/v1/status")
        .header("x-request-id", "req-fixed-1")
        .body(Body::empty())
        .unwrap();
    let (status, body) = app.send(request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["meta"]["request_id"], "req-fixed-1");
}
