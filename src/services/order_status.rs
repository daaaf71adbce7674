use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait,
    DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    entities::{
        order, order_item, payment, product, Order, OrderItem, OrderItemModel, OrderModel,
        OrderStatus, Payment, PaymentModel, PaymentStatus, Product,
    },
    errors::ServiceError,
    events::{Event, EventSender},
};

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderLine {
    pub product_id: Uuid,
    pub product_name: String,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub line_total: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PaymentSummary {
    pub id: Uuid,
    pub amount: Decimal,
    pub currency: String,
    pub status: PaymentStatus,
    pub gateway_reference: String,
}

/// An order with its lines and payment, as returned to shoppers and staff
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderDetails {
    pub id: Uuid,
    pub order_number: String,
    pub identity_id: String,
    pub email: Option<String>,
    pub status: OrderStatus,
    pub subtotal: Decimal,
    pub tax_amount: Decimal,
    pub shipping_amount: Decimal,
    pub discount_amount: Decimal,
    pub total_amount: Decimal,
    pub currency: String,
    pub discount_code: Option<String>,
    pub shipping_address: serde_json::Value,
    pub billing_address: serde_json::Value,
    pub payment_intent_id: String,
    pub items: Vec<OrderLine>,
    pub payment: Option<PaymentSummary>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OrderDetails {
    pub fn from_parts(
        order: OrderModel,
        items: Vec<OrderItemModel>,
        payment: Option<PaymentModel>,
    ) -> Self {
        Self {
            id: order.id,
            order_number: order.order_number,
            identity_id: order.identity_id,
            email: order.email,
            status: order.status,
            subtotal: order.subtotal,
            tax_amount: order.tax_amount,
            shipping_amount: order.shipping_amount,
            discount_amount: order.discount_amount,
            total_amount: order.total_amount,
            currency: order.currency,
            discount_code: order.discount_code,
            shipping_address: order.shipping_address,
            billing_address: order.billing_address,
            payment_intent_id: order.payment_intent_id,
            items: items
                .into_iter()
                .map(|i| OrderLine {
                    product_id: i.product_id,
                    product_name: i.product_name,
                    quantity: i.quantity,
                    unit_price: i.unit_price,
                    line_total: i.line_total,
                })
                .collect(),
            payment: payment.map(|p| PaymentSummary {
                id: p.id,
                amount: p.amount,
                currency: p.currency,
                status: p.status,
                gateway_reference: p.gateway_reference,
            }),
            created_at: order.created_at,
            updated_at: order.updated_at,
        }
    }
}

/// Lifecycle moves an administrator may make directly. REFUNDED is only
/// reachable through [`OrderStatusService::record_refund`].
pub fn is_valid_transition(from: OrderStatus, to: OrderStatus) -> bool {
    use OrderStatus::*;
    matches!(
        (from, to),
        (Pending, Confirmed)
            | (Confirmed, Processing)
            | (Processing, Shipped)
            | (Shipped, Delivered)
            | (Pending, Cancelled)
            | (Confirmed, Cancelled)
            | (Processing, Cancelled)
    )
}

#[derive(Clone)]
pub struct OrderStatusService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl OrderStatusService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    pub async fn load_details_in<C: ConnectionTrait>(
        conn: &C,
        order: OrderModel,
    ) -> Result<OrderDetails, ServiceError> {
        let items = OrderItem::find()
            .filter(order_item::Column::OrderId.eq(order.id))
            .all(conn)
            .await?;
        let payment = Payment::find()
            .filter(payment::Column::OrderId.eq(order.id))
            .one(conn)
            .await?;
        Ok(OrderDetails::from_parts(order, items, payment))
    }

    async fn find_order(&self, order_id: Uuid) -> Result<OrderModel, ServiceError> {
        Order::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))
    }

    /// Order lookup scoped to its owner. Other identities' orders read as
    /// missing.
    #[instrument(skip(self))]
    pub async fn get_for_identity(
        &self,
        identity_id: &str,
        order_id: Uuid,
    ) -> Result<OrderDetails, ServiceError> {
        let order = self.find_order(order_id).await?;
        if order.identity_id != identity_id {
            return Err(ServiceError::NotFound(format!("Order {} not found", order_id)));
        }
        Self::load_details_in(&*self.db, order).await
    }

    pub async fn get_details(&self, order_id: Uuid) -> Result<OrderDetails, ServiceError> {
        let order = self.find_order(order_id).await?;
        Self::load_details_in(&*self.db, order).await
    }

    /// Order history, newest first. `page` is 1-based.
    #[instrument(skip(self))]
    pub async fn list_for_identity(
        &self,
        identity_id: &str,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<OrderModel>, u64), ServiceError> {
        let paginator = Order::find()
            .filter(order::Column::IdentityId.eq(identity_id))
            .order_by_desc(order::Column::CreatedAt)
            .paginate(&*self.db, per_page.max(1));
        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok((orders, total))
    }

    /// Moves an order along its lifecycle. Cancelling puts the order's units
    /// back into stock in the same transaction.
    #[instrument(skip(self))]
    pub async fn update_status(
        &self,
        order_id: Uuid,
        new_status: OrderStatus,
    ) -> Result<OrderDetails, ServiceError> {
        let txn = self.db.begin().await?;

        let order = Order::find_by_id(order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;
        let old_status = order.status;

        if !is_valid_transition(old_status, new_status) {
            error!("Invalid status transition from {} to {}", old_status, new_status);
            return Err(ServiceError::InvalidStatusTransition {
                from: old_status.to_string(),
                to: new_status.to_string(),
            });
        }

        if new_status == OrderStatus::Cancelled {
            let items = OrderItem::find()
                .filter(order_item::Column::OrderId.eq(order_id))
                .all(&txn)
                .await?;
            for item in items {
                Product::update_many()
                    .col_expr(
                        product::Column::Inventory,
                        Expr::col(product::Column::Inventory).add(item.quantity),
                    )
                    .col_expr(product::Column::UpdatedAt, Expr::value(Utc::now()))
                    .filter(product::Column::Id.eq(item.product_id))
                    .exec(&txn)
                    .await?;
            }
        }

        let mut active: order::ActiveModel = order.into();
        active.status = Set(new_status);
        active.updated_at = Set(Utc::now());
        let updated = active.update(&txn).await?;
        txn.commit().await?;

        info!(
            "Order {} status updated from '{}' to '{}'",
            order_id, old_status, new_status
        );
        self.event_sender
            .send_or_log(Event::OrderStatusChanged {
                order_id,
                old_status: old_status.to_string(),
                new_status: new_status.to_string(),
            })
            .await;

        Self::load_details_in(&*self.db, updated).await
    }

    /// Records that the order's payment was refunded: the payment becomes
    /// REFUNDED and so does the order, whatever state it was in.
    #[instrument(skip(self))]
    pub async fn record_refund(&self, order_id: Uuid) -> Result<OrderDetails, ServiceError> {
        let txn = self.db.begin().await?;

        let order = Order::find_by_id(order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;
        if order.status == OrderStatus::Refunded {
            return Err(ServiceError::InvalidStatusTransition {
                from: order.status.to_string(),
                to: OrderStatus::Refunded.to_string(),
            });
        }

        let payment = Payment::find()
            .filter(payment::Column::OrderId.eq(order_id))
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::Conflict(format!("Order {} has no payment to refund", order_id))
            })?;
        if payment.status != PaymentStatus::Completed {
            return Err(ServiceError::Conflict(format!(
                "Payment for order {} is {}",
                order_id, payment.status
            )));
        }
        let amount = payment.amount;
        let old_status = order.status;

        let now = Utc::now();
        let mut payment: payment::ActiveModel = payment.into();
        payment.status = Set(PaymentStatus::Refunded);
        payment.updated_at = Set(now);
        payment.update(&txn).await?;

        let mut active: order::ActiveModel = order.into();
        active.status = Set(OrderStatus::Refunded);
        active.updated_at = Set(now);
        let updated = active.update(&txn).await?;
        txn.commit().await?;

        info!(%order_id, %amount, "Refund recorded");
        self.event_sender
            .send_or_log(Event::OrderStatusChanged {
                order_id,
                old_status: old_status.to_string(),
                new_status: OrderStatus::Refunded.to_string(),
            })
            .await;
        self.event_sender
            .send_or_log(Event::OrderRefunded { order_id, amount })
            .await;

        Self::load_details_in(&*self.db, updated).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use OrderStatus::*;

    #[rstest]
    #[case(Pending, Confirmed, true)]
    #[case(Confirmed, Processing, true)]
    #[case(Processing, Shipped, true)]
    #[case(Shipped, Delivered, true)]
    #[case(Confirmed, Cancelled, true)]
    #[case(Processing, Cancelled, true)]
    #[case(Shipped, Cancelled, false)]
    #[case(Delivered, Processing, false)]
    #[case(Cancelled, Confirmed, false)]
    #[case(Confirmed, Refunded, false)]
    #[case(Confirmed, Confirmed, false)]
    #[case(Pending, Shipped, false)]
    fn lifecycle_transitions(#[case] from: OrderStatus, #[case] to: OrderStatus, #[case] ok: bool) {
        assert_eq!(is_valid_transition(from, to), ok);
    }
}
