use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ActiveValue::Set, ColumnTrait, Condition, ConnectionTrait,
    DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    entities::{offer, DiscountType, Offer, OfferModel},
    errors::ServiceError,
};

use super::pricing::round_money;

/// Result of checking a code against an order amount
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DiscountQuote {
    pub code: String,
    pub discount_type: DiscountType,
    pub discount_amount: Decimal,
    pub applies_free_shipping: bool,
}

#[derive(Debug, Clone)]
pub struct CreateOfferInput {
    pub code: String,
    pub title: String,
    pub description: Option<String>,
    pub discount_type: DiscountType,
    pub discount_value: Decimal,
    pub min_order_amount: Option<Decimal>,
    pub max_uses: Option<i32>,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
    pub is_active: bool,
}

/// Codes are matched case-insensitively and stored upper-case.
pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

/// Checks `offer` against `order_amount` at `now`. The checks run in a fixed
/// order so the caller always sees the first blocking reason.
pub fn evaluate(
    offer: &OfferModel,
    order_amount: Decimal,
    now: DateTime<Utc>,
) -> Result<DiscountQuote, ServiceError> {
    if !offer.is_active {
        return Err(ServiceError::CodeInactive(offer.code.clone()));
    }
    if now < offer.start_date {
        return Err(ServiceError::CodeNotYetActive(offer.code.clone()));
    }
    if let Some(end) = offer.end_date {
        if now > end {
            return Err(ServiceError::CodeExpired(offer.code.clone()));
        }
    }
    if let Some(max_uses) = offer.max_uses {
        if offer.used_count >= max_uses {
            return Err(ServiceError::UsageLimitReached(offer.code.clone()));
        }
    }
    if let Some(minimum) = offer.min_order_amount {
        if order_amount < minimum {
            return Err(ServiceError::MinimumOrderNotMet {
                code: offer.code.clone(),
                minimum,
                actual: order_amount,
            });
        }
    }

    let raw = match offer.discount_type {
        DiscountType::Percentage => order_amount * offer.discount_value / Decimal::ONE_HUNDRED,
        DiscountType::FixedAmount => offer.discount_value,
        DiscountType::FreeShipping => Decimal::ZERO,
    };
    let discount_amount = round_money(raw.min(order_amount).max(Decimal::ZERO));

    Ok(DiscountQuote {
        code: offer.code.clone(),
        discount_type: offer.discount_type,
        discount_amount,
        applies_free_shipping: offer.discount_type == DiscountType::FreeShipping,
    })
}

/// Discount ledger: validation and usage bookkeeping for offer codes.
#[derive(Clone)]
pub struct DiscountService {
    db: Arc<DatabaseConnection>,
}

impl DiscountService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    async fn find_by_code<C: ConnectionTrait>(
        conn: &C,
        code: &str,
    ) -> Result<Option<OfferModel>, ServiceError> {
        Ok(Offer::find()
            .filter(offer::Column::Code.eq(code))
            .one(conn)
            .await?)
    }

    /// Validates a code without consuming a use.
    #[instrument(skip(self))]
    pub async fn validate(
        &self,
        code: &str,
        order_amount: Decimal,
    ) -> Result<DiscountQuote, ServiceError> {
        Self::validate_in(&*self.db, code, order_amount).await
    }

    pub async fn validate_in<C: ConnectionTrait>(
        conn: &C,
        code: &str,
        order_amount: Decimal,
    ) -> Result<DiscountQuote, ServiceError> {
        let code = normalize_code(code);
        let offer = Self::find_by_code(conn, &code)
            .await?
            .ok_or_else(|| ServiceError::CodeNotFound(code.clone()))?;
        evaluate(&offer, order_amount, Utc::now())
    }

    /// Consumes one use of `code`.
    #[instrument(skip(self))]
    pub async fn redeem(&self, code: &str) -> Result<(), ServiceError> {
        Self::redeem_in(&*self.db, code).await
    }

    /// Consumes one use of `code` on `conn`, which may be an open transaction.
    /// The increment is a single conditional UPDATE so concurrent redeemers can
    /// never push `used_count` past `max_uses`.
    pub async fn redeem_in<C: ConnectionTrait>(conn: &C, code: &str) -> Result<(), ServiceError> {
        let code = normalize_code(code);

        let result = Offer::update_many()
            .col_expr(
                offer::Column::UsedCount,
                Expr::col(offer::Column::UsedCount).add(1),
            )
            .col_expr(offer::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(offer::Column::Code.eq(code.as_str()))
            .filter(offer::Column::IsActive.eq(true))
            .filter(
                Condition::any()
                    .add(offer::Column::MaxUses.is_null())
                    .add(Expr::col(offer::Column::UsedCount).lt(Expr::col(offer::Column::MaxUses))),
            )
            .exec(conn)
            .await?;

        if result.rows_affected == 1 {
            counter!("discount_redemptions_total", 1);
            info!(code = %code, "Discount code redeemed");
            return Ok(());
        }

        let err = match Self::find_by_code(conn, &code).await? {
            None => ServiceError::CodeNotFound(code),
            Some(offer) if !offer.is_active => ServiceError::CodeInactive(code),
            Some(_) => ServiceError::UsageLimitReached(code),
        };
        warn!(error = %err, "Discount redemption rejected");
        Err(err)
    }

    #[instrument(skip(self, input), fields(code = %input.code))]
    pub async fn create_offer(&self, input: CreateOfferInput) -> Result<OfferModel, ServiceError> {
        if input.discount_value.is_sign_negative() {
            return Err(ServiceError::ValidationError(
                "discount_value must not be negative".to_string(),
            ));
        }
        if input.discount_type == DiscountType::Percentage && input.discount_value > Decimal::ONE_HUNDRED
        {
            return Err(ServiceError::ValidationError(
                "percentage discounts cannot exceed 100".to_string(),
            ));
        }
        if matches!(input.max_uses, Some(n) if n < 0) {
            return Err(ServiceError::ValidationError(
                "max_uses must not be negative".to_string(),
            ));
        }

        let now = Utc::now();
        let model = offer::ActiveModel {
            id: Set(Uuid::new_v4()),
            code: Set(normalize_code(&input.code)),
            title: Set(input.title),
            description: Set(input.description),
            discount_type: Set(input.discount_type),
            discount_value: Set(input.discount_value),
            min_order_amount: Set(input.min_order_amount),
            max_uses: Set(input.max_uses),
            used_count: Set(0),
            start_date: Set(input.start_date),
            end_date: Set(input.end_date),
            is_active: Set(input.is_active),
            created_at: Set(now),
            updated_at: Set(now),
        };
        Ok(model.insert(&*self.db).await?)
    }

    /// Offers a shopper could redeem right now, for the storefront banner.
    pub async fn active_offers(&self) -> Result<Vec<OfferModel>, ServiceError> {
        let now = Utc::now();
        let offers = Offer::find()
            .filter(offer::Column::IsActive.eq(true))
            .filter(offer::Column::StartDate.lte(now))
            .filter(
                Condition::any()
                    .add(offer::Column::EndDate.is_null())
                    .add(offer::Column::EndDate.gte(now)),
            )
            .order_by_asc(offer::Column::EndDate)
            .all(&*self.db)
            .await?;

        Ok(offers
            .into_iter()
            .filter(|o| o.max_uses.map_or(true, |max| o.used_count < max))
            .collect())
    }
}
