use crate::config::AppConfig;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::discounts::DiscountQuote;

/// Rounds a computed amount to the currency's two decimal places.
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Store-wide pricing rules applied at checkout.
#[derive(Debug, Clone)]
pub struct PricingPolicy {
    pub tax_rate: Decimal,
    pub free_shipping_threshold: Decimal,
    pub flat_shipping_fee: Decimal,
    pub currency: String,
}

impl From<&AppConfig> for PricingPolicy {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            tax_rate: cfg.tax_rate,
            free_shipping_threshold: cfg.free_shipping_threshold,
            flat_shipping_fee: cfg.flat_shipping_fee,
            currency: cfg.default_currency.to_ascii_uppercase(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PriceBreakdown {
    pub subtotal: Decimal,
    pub tax_amount: Decimal,
    pub shipping_amount: Decimal,
    pub discount_amount: Decimal,
    pub total_amount: Decimal,
}

impl PricingPolicy {
    pub fn shipping_for(&self, subtotal: Decimal, free_shipping_code: bool) -> Decimal {
        if free_shipping_code || subtotal >= self.free_shipping_threshold {
            Decimal::ZERO
        } else {
            round_money(self.flat_shipping_fee)
        }
    }

    /// Prices a cart subtotal. Tax is charged on the pre-discount subtotal.
    pub fn price(&self, subtotal: Decimal, discount: Option<&DiscountQuote>) -> PriceBreakdown {
        let subtotal = round_money(subtotal);
        let discount_amount = discount
            .map(|d| round_money(d.discount_amount.min(subtotal)))
            .unwrap_or(Decimal::ZERO);
        let free_shipping_code = discount.map(|d| d.applies_free_shipping).unwrap_or(false);

        let tax_amount = round_money(subtotal * self.tax_rate);
        let shipping_amount = self.shipping_for(subtotal, free_shipping_code);
        let total_amount = subtotal + tax_amount + shipping_amount - discount_amount;

        PriceBreakdown {
            subtotal,
            tax_amount,
            shipping_amount,
            discount_amount,
            total_amount,
        }
    }
}
