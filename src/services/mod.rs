// Catalog and cart
pub mod cart;
pub mod catalog;

// Pricing and promotions
pub mod discounts;
pub mod pricing;

// Checkout and payments
pub mod checkout;
pub mod payment_gateway;

// Post-purchase lifecycle
pub mod order_status;

// Reporting
pub mod analytics;
