use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Order workflow record for one identity's checkout attempt
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "checkout_sessions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub identity_id: String,
    #[sea_orm(nullable)]
    pub email: Option<String>,
    pub status: CheckoutStatus,
    #[sea_orm(nullable)]
    pub discount_code: Option<String>,
    /// Snapshot of the priced cart lines
    #[sea_orm(column_type = "Json")]
    pub lines: Json,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub subtotal: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub tax_amount: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub shipping_amount: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub discount_amount: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub total_amount: Decimal,
    pub currency: String,
    #[sea_orm(column_type = "Json")]
    pub shipping_address: Json,
    #[sea_orm(column_type = "Json")]
    pub billing_address: Json,
    #[sea_orm(unique, nullable)]
    pub payment_intent_id: Option<String>,
    #[sea_orm(nullable)]
    pub client_secret: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub failure_reason: Option<String>,
    #[sea_orm(nullable)]
    pub order_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::order::Entity",
        from = "Column::OrderId",
        to = "super::order::Column::Id"
    )]
    Order,
}

impl Related<super::order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Order.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
    strum::Display, utoipa::ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckoutStatus {
    #[sea_orm(string_value = "draft")]
    Draft,
    #[sea_orm(string_value = "payment_pending")]
    PaymentPending,
    #[sea_orm(string_value = "payment_confirmed")]
    PaymentConfirmed,
    #[sea_orm(string_value = "order_created")]
    OrderCreated,
    #[sea_orm(string_value = "placed")]
    Placed,
    #[sea_orm(string_value = "payment_failed")]
    PaymentFailed,
    #[sea_orm(string_value = "order_persist_failed")]
    OrderPersistFailed,
    #[sea_orm(string_value = "expired")]
    Expired,
}

impl CheckoutStatus {
    /// Sessions a new intent request may pick up and rebuild.
    pub fn is_open(self) -> bool {
        matches!(
            self,
            Self::Draft | Self::PaymentPending | Self::PaymentFailed
        )
    }
}
