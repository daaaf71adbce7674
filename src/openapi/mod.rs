use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Nestling Store API",
        version = "0.3.0",
        description = r#"
# Nestling Store API

Checkout, order and discount backend for the Nestling baby-products storefront.

## Identity

Requests arrive through the identity gateway, which sets:

- `x-identity-id`: required for cart, checkout and order routes
- `x-identity-email`, `x-identity-name`: optional profile
- `x-identity-roles`: comma-separated; `admin` unlocks `/admin` routes

## Payments

Payment intents are created with manual capture. The shopper authorizes the
payment in the payment sheet and the hold is captured only when the order is
written. If the order loses a race for stock or a limited discount code, the
hold is released.

## Errors

```json
{
  "error": "Conflict",
  "code": "usage_limit_reached",
  "message": "Discount code LAST1 has reached its usage limit",
  "request_id": "req-abc123xyz",
  "timestamp": "2025-03-09T10:30:00Z"
}
```

`code` is stable and safe to branch on. An `order_persist_failed` error carries
the payment reference in `details`.
        "#,
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers((url = "http://localhost:8080", description = "Local development")),
    tags(
        (name = "Catalog", description = "Products and categories"),
        (name = "Cart", description = "Per-identity shopping cart"),
        (name = "Discounts", description = "Discount codes and offers"),
        (name = "Checkout", description = "Payment intents and order placement"),
        (name = "Orders", description = "Order history"),
        (name = "Payments", description = "Payment gateway callbacks"),
        (name = "Admin", description = "Order management and analytics")
    ),
    paths(
        crate::handlers::catalog::list_products,
        crate::handlers::catalog::get_product,
        crate::handlers::catalog::list_categories,
        crate::handlers::carts::get_cart,
        crate::handlers::carts::add_to_cart,
        crate::handlers::carts::update_cart_item,
        crate::handlers::carts::remove_cart_item,
        crate::handlers::carts::merge_cart,
        crate::handlers::discounts::validate_code,
        crate::handlers::discounts::active_offers,
        crate::handlers::checkout::create_intent,
        crate::handlers::checkout::confirm_checkout,
        crate::handlers::checkout::get_session,
        crate::handlers::orders::list_orders,
        crate::handlers::orders::get_order,
        crate::handlers::payment_webhooks::payment_webhook,
        crate::handlers::admin::dashboard,
        crate::handlers::admin::get_order,
        crate::handlers::admin::update_order_status,
        crate::handlers::admin::record_refund,
    ),
    components(
        schemas(
            crate::handlers::catalog::ProductResponse,
            crate::handlers::catalog::CategoryResponse,
            crate::handlers::carts::AddItemRequest,
            crate::handlers::carts::UpdateQuantityRequest,
            crate::handlers::carts::MergeCartRequest,
            crate::services::cart::CartView,
            crate::services::cart::CartLineView,
            crate::handlers::discounts::ValidateCodeRequest,
            crate::handlers::discounts::OfferResponse,
            crate::services::discounts::DiscountQuote,
            crate::handlers::checkout::CreateIntentRequest,
            crate::handlers::checkout::ConfirmCheckoutRequest,
            crate::handlers::checkout::CheckoutSessionResponse,
            crate::services::checkout::Address,
            crate::services::checkout::CheckoutIntent,
            crate::services::checkout::CheckoutLine,
            crate::services::pricing::PriceBreakdown,
            crate::handlers::orders::OrderSummary,
            crate::services::order_status::OrderDetails,
            crate::services::order_status::OrderLine,
            crate::services::order_status::PaymentSummary,
            crate::handlers::admin::UpdateStatusRequest,
            crate::services::analytics::DashboardMetrics,
            crate::services::analytics::MetricWithTrend,
            crate::entities::OrderStatus,
            crate::entities::CheckoutStatus,
            crate::entities::DiscountType,
            crate::entities::PaymentStatus,
            crate::errors::ErrorResponse
        )
    )
)]
pub struct ApiDocV1;

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui")
        .url("/api-docs/openapi.json", ApiDocV1::openapi())
        .config(utoipa_swagger_ui::Config::from("/api-docs/openapi.json").try_it_out_enabled(true))
}
