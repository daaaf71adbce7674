#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use nestling_store::{
    app_router,
    auth::{Identity, IDENTITY_ID_HEADER, IDENTITY_ROLES_HEADER},
    config::AppConfig,
    db::{self, DbConfig},
    entities::{DiscountType, OfferModel, ProductModel},
    events::{self, EventSender},
    handlers::AppServices,
    services::{
        catalog::CreateProductInput,
        checkout::{Address, CheckoutIntent, CreateIntentInput},
        discounts::CreateOfferInput,
        order_status::OrderDetails,
        payment_gateway::{simulated::SimulatedGateway, PaymentGateway},
        pricing::PricingPolicy,
    },
    AppState,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{ConnectionTrait, DatabaseConnection, Statement};
use serde_json::Value;
use sha2::Sha256;
use tempfile::TempDir;
use tokio::{sync::mpsc, task::JoinHandle};
use tower::ServiceExt;

pub const WEBHOOK_SECRET: &str = "whsec_test_secret";

/// Application wired against a throwaway SQLite file and the
/// simulated payment gateway.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub db: Arc<DatabaseConnection>,
    pub gateway: Arc<SimulatedGateway>,
    pub services: AppServices,
    event_task: JoinHandle<()>,
    _db_dir: TempDir,
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self.event_task.abort();
    }
}

pub fn pricing() -> PricingPolicy {
    PricingPolicy {
        tax_rate: dec!(0.08),
        free_shipping_threshold: dec!(499),
        flat_shipping_fee: dec!(49),
        currency: "INR".to_string(),
    }
}

pub fn address() -> Address {
    Address {
        full_name: "Asha Rao".to_string(),
        line1: "12 Lake Road".to_string(),
        line2: Some("Flat 3B".to_string()),
        city: "Pune".to_string(),
        state: "MH".to_string(),
        postal_code: "411001".to_string(),
        country: "IN".to_string(),
        phone: Some("+919800000000".to_string()),
    }
}

pub fn intent_input(discount_code: Option<&str>) -> CreateIntentInput {
    CreateIntentInput {
        email: Some("asha@example.com".to_string()),
        discount_code: discount_code.map(str::to_string),
        shipping_address: address(),
        billing_address: None,
    }
}

pub fn percent_offer(code: &str, percent: Decimal, min_order: Option<Decimal>) -> CreateOfferInput {
    CreateOfferInput {
        code: code.to_string(),
        title: format!("{} off", code),
        description: None,
        discount_type: DiscountType::Percentage,
        discount_value: percent,
        min_order_amount: min_order,
        max_uses: None,
        start_date: Utc::now() - Duration::days(1),
        end_date: Some(Utc::now() + Duration::days(30)),
        is_active: true,
    }
}

impl TestApp {
    pub async fn new() -> Self {
        let db_dir = tempfile::tempdir().expect("temp dir for test database");
        let db_path = db_dir.path().join("nestling_test.db");
        let mut cfg = AppConfig::new(
            format!("sqlite://{}?mode=rwc", db_path.display()),
            "127.0.0.1".to_string(),
            0,
            "test".to_string(),
        );
        cfg.payment_provider = "simulated".to_string();
        cfg.simulated_auto_authorize = false;
        cfg.payment_webhook_secret = Some(WEBHOOK_SECRET.to_string());

        // One connection serializes writers the way SQLite wants them
        let pool = db::establish_connection_with_config(&DbConfig {
            url: cfg.database_url.clone(),
            max_connections: 1,
            min_connections: 1,
            ..Default::default()
        })
        .await
        .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");
        let db = Arc::new(pool);

        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = Arc::new(EventSender::new(event_tx));
        let event_task = tokio::spawn(events::process_events(event_rx));

        let gateway = Arc::new(SimulatedGateway::new(false));
        let services = AppServices::new(
            db.clone(),
            event_sender.clone(),
            gateway.clone() as Arc<dyn PaymentGateway>,
            pricing(),
        );

        let state = AppState {
            db: db.clone(),
            config: cfg,
            event_sender,
            services: services.clone(),
        };

        Self {
            router: app_router(state.clone()),
            state,
            db,
            gateway,
            services,
            event_task,
            _db_dir: db_dir,
        }
    }

    pub async fn product(&self, name: &str, price: Decimal, inventory: i32) -> ProductModel {
        self.services
            .catalog
            .create_product(CreateProductInput::active(name, price, inventory))
            .await
            .expect("seed product")
    }

    pub async fn offer(&self, input: CreateOfferInput) -> OfferModel {
        self.services
            .discounts
            .create_offer(input)
            .await
            .expect("seed offer")
    }

    /// Fills `identity`'s cart and opens a checkout for it.
    pub async fn checkout_for(
        &self,
        identity: &Identity,
        product: &ProductModel,
        quantity: i32,
        discount_code: Option<&str>,
    ) -> CheckoutIntent {
        self.services
            .cart
            .add_item(&identity.id, product.id, quantity)
            .await
            .expect("add to cart");
        self.services
            .checkout
            .create_intent(identity, intent_input(discount_code))
            .await
            .expect("create intent")
    }

    /// Runs a full checkout with an authorized payment.
    pub async fn place_order(
        &self,
        identity: &Identity,
        product: &ProductModel,
        quantity: i32,
        discount_code: Option<&str>,
    ) -> OrderDetails {
        let intent = self
            .checkout_for(identity, product, quantity, discount_code)
            .await;
        self.gateway.authorize(&intent.payment_intent_id);
        self.services
            .checkout
            .confirm(identity, &intent.payment_intent_id)
            .await
            .expect("order placed")
    }

    pub async fn execute_sql(&self, sql: &str) {
        self.db
            .execute(Statement::from_string(
                self.db.get_database_backend(),
                sql.to_string(),
            ))
            .await
            .expect("raw sql");
    }

    pub async fn count(&self, table: &str) -> i64 {
        let row = self
            .db
            .query_one(Statement::from_string(
                self.db.get_database_backend(),
                format!("SELECT COUNT(*) AS n FROM {}", table),
            ))
            .await
            .expect("count query")
            .expect("count row");
        row.try_get::<i64>("", "n").expect("count column")
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        identity: Option<(&str, &str)>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some((id, roles)) = identity {
            builder = builder.header(IDENTITY_ID_HEADER, id);
            if !roles.is_empty() {
                builder = builder.header(IDENTITY_ROLES_HEADER, roles);
            }
        }
        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("request");

        self.send(request).await
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("response body");
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    /// Posts a webhook signed with `x-timestamp`/`x-signature`.
    pub async fn webhook(&self, payload: &Value) -> StatusCode {
        let body = payload.to_string();
        let ts = Utc::now().timestamp().to_string();
        let mut mac =
            Hmac::<Sha256>::new_from_slice(WEBHOOK_SECRET.as_bytes()).expect("hmac key");
        mac.update(ts.as_bytes());
        mac.update(b".");
        mac.update(body.as_bytes());
        let signature = hex::encode(mac.finalize().into_bytes());

        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/v1/payments/webhook")
            .header("content-type", "application/json")
            .header("x-timestamp", ts)
            .header("x-signature", signature)
            .body(Body::from(body))
            .expect("webhook request");
        self.send(request).await.0
    }
}
