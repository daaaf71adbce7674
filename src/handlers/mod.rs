pub mod admin;
pub mod carts;
pub mod catalog;
pub mod checkout;
pub mod common;
pub mod discounts;
pub mod orders;
pub mod payment_webhooks;

use std::sync::Arc;

use sea_orm::DatabaseConnection;

use crate::events::EventSender;
use crate::services::{
    analytics::AnalyticsService, cart::CartService, catalog::CatalogService,
    checkout::CheckoutService, discounts::DiscountService, order_status::OrderStatusService,
    payment_gateway::PaymentGateway, pricing::PricingPolicy,
};

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub catalog: Arc<CatalogService>,
    pub cart: Arc<CartService>,
    pub discounts: Arc<DiscountService>,
    pub checkout: Arc<CheckoutService>,
    pub orders: Arc<OrderStatusService>,
    pub analytics: Arc<AnalyticsService>,
}

impl AppServices {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        gateway: Arc<dyn PaymentGateway>,
        pricing: PricingPolicy,
    ) -> Self {
        Self {
            catalog: Arc::new(CatalogService::new(db.clone())),
            cart: Arc::new(CartService::new(db.clone(), event_sender.clone())),
            discounts: Arc::new(DiscountService::new(db.clone())),
            checkout: Arc::new(CheckoutService::new(
                db.clone(),
                gateway,
                pricing,
                event_sender.clone(),
            )),
            orders: Arc::new(OrderStatusService::new(db.clone(), event_sender)),
            analytics: Arc::new(AnalyticsService::new(db)),
        }
    }
}
