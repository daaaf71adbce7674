//! Order workflow.
//!
//! A checkout session walks `DRAFT -> PAYMENT_PENDING -> PAYMENT_CONFIRMED ->
//! ORDER_CREATED -> PLACED`. Payment intents are authorized by the shopper and
//! only captured inside the transaction that writes the order, so an order
//! that loses a race for stock or a limited discount code releases the hold
//! instead of charging the shopper.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use metrics::counter;
use rand::{distributions::Alphanumeric, Rng};
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection,
    DatabaseTransaction, EntityTrait, QueryFilter, QueryOrder, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    auth::Identity,
    entities::{
        checkout_session, order, order_item, payment, product, CheckoutSession,
        CheckoutSessionModel, CheckoutStatus, Order, OrderStatus, PaymentStatus, Product,
        ProductStatus,
    },
    errors::ServiceError,
    events::{Event, EventSender},
};

use super::{
    cart::CartService,
    discounts::{DiscountQuote, DiscountService},
    order_status::{OrderDetails, OrderStatusService},
    payment_gateway::{CreateIntentRequest, IntentStatus, PaymentGateway, PaymentIntent},
    pricing::{round_money, PriceBreakdown, PricingPolicy},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate, ToSchema)]
pub struct Address {
    #[validate(length(min = 1, max = 120))]
    pub full_name: String,
    #[validate(length(min = 1, max = 200))]
    pub line1: String,
    #[validate(length(max = 200))]
    pub line2: Option<String>,
    #[validate(length(min = 1, max = 100))]
    pub city: String,
    #[validate(length(min = 1, max = 100))]
    pub state: String,
    #[validate(length(min = 3, max = 12))]
    pub postal_code: String,
    #[validate(length(equal = 2))]
    pub country: String,
    #[validate(length(max = 20))]
    pub phone: Option<String>,
}

/// Priced snapshot of one cart line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct CheckoutLine {
    pub product_id: Uuid,
    pub product_name: String,
    pub unit_price: Decimal,
    pub quantity: i32,
    pub line_total: Decimal,
}

#[derive(Debug, Clone)]
pub struct CreateIntentInput {
    pub email: Option<String>,
    pub discount_code: Option<String>,
    pub shipping_address: Address,
    pub billing_address: Option<Address>,
}

/// What the client needs to show the payment sheet
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CheckoutIntent {
    pub session_id: Uuid,
    pub status: CheckoutStatus,
    pub payment_intent_id: String,
    pub client_secret: String,
    pub currency: String,
    pub lines: Vec<CheckoutLine>,
    pub pricing: PriceBreakdown,
    pub discount: Option<DiscountQuote>,
    /// True when an earlier intent for the same amount was handed back
    pub reused: bool,
}

struct Draft {
    lines: Vec<CheckoutLine>,
    pricing: PriceBreakdown,
    discount: Option<DiscountQuote>,
}

/// Why writing the order did not happen
enum PersistError {
    /// Lost a race for stock or a limited code; the shopper can fix it
    Rejected(ServiceError),
    /// Capture failed; the authorization still stands and confirm can be retried
    Gateway(ServiceError),
    /// Storage failed after the payment was confirmed
    Storage(String),
    /// Another completion of the same session already holds or wrote the order
    AlreadyClaimed,
}

impl From<ServiceError> for PersistError {
    fn from(err: ServiceError) -> Self {
        if err.is_user_correctable() {
            PersistError::Rejected(err)
        } else if matches!(err, ServiceError::PaymentGatewayError(_)) {
            PersistError::Gateway(err)
        } else {
            PersistError::Storage(err.to_string())
        }
    }
}

impl From<sea_orm::DbErr> for PersistError {
    fn from(err: sea_orm::DbErr) -> Self {
        PersistError::Storage(err.to_string())
    }
}

/// `BB-YYYYMMDD-XXXXXXXX`
pub fn generate_order_number() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(|b| char::from(b).to_ascii_uppercase())
        .collect();
    format!("BB-{}-{}", Utc::now().format("%Y%m%d"), suffix)
}

#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DatabaseConnection>,
    gateway: Arc<dyn PaymentGateway>,
    pricing: PricingPolicy,
    event_sender: Arc<EventSender>,
}

impl CheckoutService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        gateway: Arc<dyn PaymentGateway>,
        pricing: PricingPolicy,
        event_sender: Arc<EventSender>,
    ) -> Self {
        Self {
            db,
            gateway,
            pricing,
            event_sender,
        }
    }

    pub fn pricing(&self) -> &PricingPolicy {
        &self.pricing
    }

    /// Snapshots and prices the identity's cart. Nothing is written and the
    /// gateway is not contacted.
    async fn build_draft(
        &self,
        identity_id: &str,
        discount_code: Option<&str>,
    ) -> Result<Draft, ServiceError> {
        let cart = CartService::get_or_create_cart_in(&*self.db, identity_id).await?;
        let rows = CartService::lines_in(&*self.db, cart.id).await?;
        if rows.is_empty() {
            return Err(ServiceError::EmptyCart);
        }

        let mut lines = Vec::with_capacity(rows.len());
        for (item, product) in rows {
            let product = product
                .filter(|p| p.is_purchasable())
                .ok_or(ServiceError::ProductNotFound(item.product_id))?;
            if product.inventory < item.quantity {
                return Err(ServiceError::InsufficientInventory(product.name));
            }
            lines.push(CheckoutLine {
                product_id: product.id,
                line_total: round_money(product.price * Decimal::from(item.quantity)),
                unit_price: product.price,
                product_name: product.name,
                quantity: item.quantity,
            });
        }

        let subtotal: Decimal = lines.iter().map(|l| l.line_total).sum();
        let discount = match discount_code.map(str::trim).filter(|c| !c.is_empty()) {
            Some(code) => Some(DiscountService::validate_in(&*self.db, code, subtotal).await?),
            None => None,
        };
        let pricing = self.pricing.price(subtotal, discount.as_ref());

        Ok(Draft {
            lines,
            pricing,
            discount,
        })
    }

    async fn open_session(
        &self,
        identity_id: &str,
    ) -> Result<Option<CheckoutSessionModel>, ServiceError> {
        Ok(CheckoutSession::find()
            .filter(checkout_session::Column::IdentityId.eq(identity_id))
            .filter(checkout_session::Column::Status.is_in([
                CheckoutStatus::Draft,
                CheckoutStatus::PaymentPending,
                CheckoutStatus::PaymentFailed,
            ]))
            .order_by_desc(checkout_session::Column::UpdatedAt)
            .one(&*self.db)
            .await?)
    }

    /// The session's current intent if the shopper can still pay it for
    /// `amount`; otherwise the stale intent is cancelled.
    async fn reusable_intent(
        &self,
        session: &CheckoutSessionModel,
        amount: Decimal,
        currency: &str,
    ) -> Result<Option<PaymentIntent>, ServiceError> {
        let Some(intent_id) = session.payment_intent_id.as_deref() else {
            return Ok(None);
        };
        let intent = self.gateway.retrieve_intent(intent_id).await?;

        let payable = matches!(
            intent.status,
            IntentStatus::Open | IntentStatus::Declined(_) | IntentStatus::Authorized
        );
        if payable && intent.amount == amount && intent.currency.eq_ignore_ascii_case(currency) {
            return Ok(Some(intent));
        }

        if payable {
            if let Err(e) = self.gateway.cancel_intent(intent_id).await {
                warn!(intent_id, error = %e, "Could not cancel superseded payment intent");
            }
        }
        Ok(None)
    }

    /// Prices the cart and returns a payment intent for it.
    ///
    /// Everything that can be rejected up front (empty cart, missing products,
    /// short stock, discount code problems) is checked before the gateway is
    /// contacted, so a rejected request leaves no intent behind.
    #[instrument(skip(self, identity, input), fields(identity_id = %identity.id))]
    pub async fn create_intent(
        &self,
        identity: &Identity,
        input: CreateIntentInput,
    ) -> Result<CheckoutIntent, ServiceError> {
        input.shipping_address.validate()?;
        if let Some(billing) = &input.billing_address {
            billing.validate()?;
        }

        let draft = self
            .build_draft(&identity.id, input.discount_code.as_deref())
            .await?;
        let currency = self.pricing.currency.clone();
        let total = draft.pricing.total_amount;

        let lines_json = serde_json::to_value(&draft.lines)
            .map_err(|e| ServiceError::InternalError(format!("serialize lines: {}", e)))?;
        let shipping_json = serde_json::to_value(&input.shipping_address)
            .map_err(|e| ServiceError::InternalError(format!("serialize address: {}", e)))?;
        let billing_json = match &input.billing_address {
            Some(billing) => serde_json::to_value(billing)
                .map_err(|e| ServiceError::InternalError(format!("serialize address: {}", e)))?,
            None => shipping_json.clone(),
        };

        let now = Utc::now();
        let existing = self.open_session(&identity.id).await?;
        let reused_intent = match &existing {
            Some(session) => self.reusable_intent(session, total, &currency).await?,
            None => None,
        };

        let is_new = existing.is_none();
        let mut session: checkout_session::ActiveModel = match existing {
            Some(session) => session.into(),
            None => checkout_session::ActiveModel {
                id: Set(Uuid::new_v4()),
                identity_id: Set(identity.id.clone()),
                payment_intent_id: Set(None),
                client_secret: Set(None),
                order_id: Set(None),
                created_at: Set(now),
                ..Default::default()
            },
        };
        session.email = Set(input.email.clone().or_else(|| identity.email.clone()));
        session.status = Set(CheckoutStatus::Draft);
        session.discount_code = Set(draft.discount.as_ref().map(|d| d.code.clone()));
        session.lines = Set(lines_json);
        session.subtotal = Set(draft.pricing.subtotal);
        session.tax_amount = Set(draft.pricing.tax_amount);
        session.shipping_amount = Set(draft.pricing.shipping_amount);
        session.discount_amount = Set(draft.pricing.discount_amount);
        session.total_amount = Set(total);
        session.currency = Set(currency.clone());
        session.shipping_address = Set(shipping_json);
        session.billing_address = Set(billing_json);
        session.failure_reason = Set(None);
        session.updated_at = Set(now);
        let saved = if is_new {
            session.insert(&*self.db).await?
        } else {
            session.update(&*self.db).await?
        };
        let session_id = saved.id;

        let reused = reused_intent.is_some();
        let intent = match reused_intent {
            Some(intent) => intent,
            None => {
                let mut metadata = BTreeMap::new();
                metadata.insert("checkout_session_id".to_string(), session_id.to_string());
                metadata.insert("identity_id".to_string(), identity.id.clone());
                let created = self
                    .gateway
                    .create_intent(CreateIntentRequest {
                        amount: total,
                        currency: currency.clone(),
                        metadata,
                    })
                    .await;
                match created {
                    Ok(intent) => intent,
                    Err(e) => {
                        let err = ServiceError::from(e);
                        self.mark_session(session_id, CheckoutStatus::Draft, Some(err.to_string()))
                            .await;
                        return Err(err);
                    }
                }
            }
        };

        let mut pending: checkout_session::ActiveModel = saved.into();
        pending.status = Set(CheckoutStatus::PaymentPending);
        pending.payment_intent_id = Set(Some(intent.id.clone()));
        pending.client_secret = Set(Some(intent.client_secret.clone()));
        pending.updated_at = Set(Utc::now());
        pending.update(&*self.db).await?;

        counter!("checkout_intents_created_total", 1);
        info!(%session_id, intent_id = %intent.id, %total, reused, "Checkout intent ready");
        if !reused {
            self.event_sender
                .send_or_log(Event::CheckoutIntentCreated {
                    session_id,
                    payment_intent_id: intent.id.clone(),
                    amount: total,
                })
                .await;
        }

        Ok(CheckoutIntent {
            session_id,
            status: CheckoutStatus::PaymentPending,
            payment_intent_id: intent.id,
            client_secret: intent.client_secret,
            currency,
            lines: draft.lines,
            pricing: draft.pricing,
            discount: draft.discount,
            reused,
        })
    }

    /// Called by the client after the payment sheet completes.
    #[instrument(skip(self, identity), fields(identity_id = %identity.id))]
    pub async fn confirm(
        &self,
        identity: &Identity,
        payment_intent_id: &str,
    ) -> Result<OrderDetails, ServiceError> {
        let session = CheckoutSession::find()
            .filter(checkout_session::Column::PaymentIntentId.eq(payment_intent_id))
            .filter(checkout_session::Column::IdentityId.eq(identity.id.as_str()))
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!(
                    "No checkout found for payment {}",
                    payment_intent_id
                ))
            })?;
        self.finalize(session).await
    }

    /// Gateway webhook path: the same completion as [`Self::confirm`],
    /// located by intent id alone.
    #[instrument(skip(self))]
    pub async fn complete_from_gateway(
        &self,
        payment_intent_id: &str,
    ) -> Result<OrderDetails, ServiceError> {
        let session = CheckoutSession::find()
            .filter(checkout_session::Column::PaymentIntentId.eq(payment_intent_id))
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!(
                    "No checkout found for payment {}",
                    payment_intent_id
                ))
            })?;
        self.finalize(session).await
    }

    async fn existing_order(&self, payment_intent_id: &str) -> Result<Option<OrderDetails>, ServiceError> {
        match Order::find()
            .filter(order::Column::PaymentIntentId.eq(payment_intent_id))
            .one(&*self.db)
            .await?
        {
            Some(order) => Ok(Some(OrderStatusService::load_details_in(&*self.db, order).await?)),
            None => Ok(None),
        }
    }

    async fn finalize(&self, session: CheckoutSessionModel) -> Result<OrderDetails, ServiceError> {
        let intent_id = session.payment_intent_id.clone().ok_or_else(|| {
            ServiceError::InternalError("checkout session has no payment intent".into())
        })?;

        if let Some(details) = self.existing_order(&intent_id).await? {
            if session.status != CheckoutStatus::Placed {
                self.mark_placed(session.id, details.id).await;
            }
            return Ok(details);
        }

        let intent = self.gateway.retrieve_intent(&intent_id).await?;
        match &intent.status {
            IntentStatus::Declined(reason) => {
                return Err(self.payment_failed(&session, &intent_id, reason).await);
            }
            IntentStatus::Canceled => {
                return Err(self
                    .payment_failed(&session, &intent_id, "payment was canceled")
                    .await);
            }
            IntentStatus::Open => {
                return Err(ServiceError::PaymentDeclined(
                    "payment has not been completed".to_string(),
                ));
            }
            IntentStatus::Authorized | IntentStatus::Captured => {}
        }

        if intent.amount != session.total_amount {
            error!(
                intent_id = %intent_id,
                intent_amount = %intent.amount,
                session_amount = %session.total_amount,
                "Payment amount does not match checkout total"
            );
            if intent.status == IntentStatus::Authorized {
                if let Err(e) = self.gateway.cancel_intent(&intent_id).await {
                    warn!(intent_id = %intent_id, error = %e, "Could not cancel mismatched intent");
                }
            }
            self.mark_session(
                session.id,
                CheckoutStatus::PaymentFailed,
                Some("payment amount mismatch".into()),
            )
            .await;
            return Err(ServiceError::Conflict(
                "Payment amount does not match the checkout total".to_string(),
            ));
        }

        self.mark_session(session.id, CheckoutStatus::PaymentConfirmed, None)
            .await;

        let outcome = match self.db.begin().await {
            Ok(txn) => match self.persist_order(&txn, &session, &intent).await {
                Ok(order_id) => match txn.commit().await {
                    Ok(()) => Ok(order_id),
                    Err(e) => Err(PersistError::Storage(e.to_string())),
                },
                Err(err) => {
                    if let Err(e) = txn.rollback().await {
                        warn!(error = %e, "Rollback failed");
                    }
                    Err(err)
                }
            },
            Err(e) => Err(PersistError::Storage(e.to_string())),
        };

        if outcome.is_err() {
            // A concurrent completion for this intent may have won the write.
            if let Ok(Some(details)) = self.existing_order(&intent_id).await {
                info!(intent_id = %intent_id, order_id = %details.id, "Checkout already completed");
                self.mark_placed(session.id, details.id).await;
                return Ok(details);
            }
        }

        match outcome {
            Ok(order_id) => self.order_placed(&session, order_id).await,
            Err(PersistError::AlreadyClaimed) => Err(ServiceError::Conflict(
                "Checkout is already being completed".to_string(),
            )),
            Err(PersistError::Rejected(err)) if intent.status == IntentStatus::Authorized => {
                if let Err(e) = self.gateway.cancel_intent(&intent_id).await {
                    warn!(intent_id = %intent_id, error = %e, "Could not release authorization");
                }
                Err(self.payment_failed_with(&session, &intent_id, err).await)
            }
            Err(PersistError::Rejected(err)) => {
                // Captured on an earlier attempt; money has moved, so this needs a person.
                Err(self.persist_failed(&session, &intent_id, err.to_string()).await)
            }
            Err(PersistError::Gateway(err)) => {
                warn!(intent_id = %intent_id, error = %err, "Capture failed; order not written");
                self.mark_session(
                    session.id,
                    CheckoutStatus::PaymentPending,
                    Some(err.to_string()),
                )
                .await;
                Err(err)
            }
            Err(PersistError::Storage(reason)) => {
                Err(self.persist_failed(&session, &intent_id, reason).await)
            }
        }
    }

    /// Writes the order, its lines and payment, takes stock, redeems the code
    /// and clears the cart on `txn`, then captures the authorization. The
    /// caller commits.
    async fn persist_order(
        &self,
        txn: &DatabaseTransaction,
        session: &CheckoutSessionModel,
        intent: &PaymentIntent,
    ) -> Result<Uuid, PersistError> {
        let lines: Vec<CheckoutLine> = serde_json::from_value(session.lines.clone())
            .map_err(|e| PersistError::Storage(format!("corrupt checkout lines: {}", e)))?;
        let now = Utc::now();

        // Claim the session first so a racing completion stops here and
        // never touches stock, the code or the authorization.
        let claimed = CheckoutSession::update_many()
            .col_expr(
                checkout_session::Column::Status,
                Expr::value(CheckoutStatus::OrderCreated),
            )
            .col_expr(checkout_session::Column::UpdatedAt, Expr::value(now))
            .filter(checkout_session::Column::Id.eq(session.id))
            .filter(checkout_session::Column::OrderId.is_null())
            .filter(
                checkout_session::Column::Status
                    .is_not_in([CheckoutStatus::OrderCreated, CheckoutStatus::Placed]),
            )
            .exec(txn)
            .await?;
        if claimed.rows_affected == 0 {
            return Err(PersistError::AlreadyClaimed);
        }

        for line in &lines {
            let taken = Product::update_many()
                .col_expr(
                    product::Column::Inventory,
                    Expr::col(product::Column::Inventory).sub(line.quantity),
                )
                .col_expr(product::Column::UpdatedAt, Expr::value(now))
                .filter(product::Column::Id.eq(line.product_id))
                .filter(product::Column::Status.eq(ProductStatus::Active))
                .filter(product::Column::Inventory.gte(line.quantity))
                .exec(txn)
                .await?;
            if taken.rows_affected == 0 {
                let err = match Product::find_by_id(line.product_id).one(txn).await? {
                    Some(p) if p.is_purchasable() => ServiceError::InsufficientInventory(p.name),
                    _ => ServiceError::ProductNotFound(line.product_id),
                };
                return Err(PersistError::Rejected(err));
            }
        }

        if let Some(code) = session.discount_code.as_deref() {
            DiscountService::redeem_in(txn, code).await?;
        }

        let order_id = Uuid::new_v4();
        order::ActiveModel {
            id: Set(order_id),
            order_number: Set(generate_order_number()),
            identity_id: Set(session.identity_id.clone()),
            email: Set(session.email.clone()),
            status: Set(OrderStatus::Confirmed),
            subtotal: Set(session.subtotal),
            tax_amount: Set(session.tax_amount),
            shipping_amount: Set(session.shipping_amount),
            discount_amount: Set(session.discount_amount),
            total_amount: Set(session.subtotal + session.tax_amount + session.shipping_amount
                - session.discount_amount),
            currency: Set(session.currency.clone()),
            discount_code: Set(session.discount_code.clone()),
            shipping_address: Set(session.shipping_address.clone()),
            billing_address: Set(session.billing_address.clone()),
            payment_intent_id: Set(intent.id.clone()),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(txn)
        .await?;

        for line in &lines {
            order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(line.product_id),
                product_name: Set(line.product_name.clone()),
                quantity: Set(line.quantity),
                unit_price: Set(line.unit_price),
                line_total: Set(line.line_total),
            }
            .insert(txn)
            .await?;
        }

        payment::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            amount: Set(session.total_amount),
            currency: Set(session.currency.clone()),
            status: Set(PaymentStatus::Completed),
            gateway_reference: Set(intent.id.clone()),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(txn)
        .await?;

        let cart = CartService::get_or_create_cart_in(txn, &session.identity_id).await?;
        CartService::clear_in(txn, cart.id).await?;

        CheckoutSession::update_many()
            .col_expr(checkout_session::Column::OrderId, Expr::value(order_id))
            .col_expr(checkout_session::Column::UpdatedAt, Expr::value(now))
            .filter(checkout_session::Column::Id.eq(session.id))
            .exec(txn)
            .await?;

        if intent.status == IntentStatus::Authorized {
            self.gateway
                .capture_intent(&intent.id)
                .await
                .map_err(|e| PersistError::Gateway(e.into()))?;
        }

        Ok(order_id)
    }

    async fn order_placed(
        &self,
        session: &CheckoutSessionModel,
        order_id: Uuid,
    ) -> Result<OrderDetails, ServiceError> {
        self.mark_placed(session.id, order_id).await;

        let details = OrderStatusService::load_details_in(
            &*self.db,
            Order::find_by_id(order_id)
                .one(&*self.db)
                .await?
                .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?,
        )
        .await?;

        counter!("checkout_orders_placed_total", 1);
        info!(
            order_id = %details.id,
            order_number = %details.order_number,
            total = %details.total_amount,
            "Order placed"
        );

        if let Some(code) = &details.discount_code {
            self.event_sender
                .send_or_log(Event::DiscountRedeemed {
                    code: code.clone(),
                    order_id,
                    amount: details.discount_amount,
                })
                .await;
        }
        self.event_sender
            .send_or_log(Event::OrderPlaced {
                order_id,
                order_number: details.order_number.clone(),
                identity_id: details.identity_id.clone(),
                total: details.total_amount,
            })
            .await;

        let product_ids: Vec<Uuid> = details.items.iter().map(|i| i.product_id).collect();
        let touched = Product::find()
            .filter(product::Column::Id.is_in(product_ids))
            .all(&*self.db)
            .await?;
        for p in touched.into_iter().filter(|p| p.is_low_stock()) {
            self.event_sender
                .send_or_log(Event::LowStock {
                    product_id: p.id,
                    remaining: p.inventory,
                })
                .await;
        }

        Ok(details)
    }

    async fn payment_failed(
        &self,
        session: &CheckoutSessionModel,
        intent_id: &str,
        reason: &str,
    ) -> ServiceError {
        self.payment_failed_with(session, intent_id, ServiceError::PaymentDeclined(reason.to_string()))
            .await
    }

    async fn payment_failed_with(
        &self,
        session: &CheckoutSessionModel,
        intent_id: &str,
        err: ServiceError,
    ) -> ServiceError {
        counter!("checkout_payment_declined_total", 1);
        warn!(session_id = %session.id, intent_id, error = %err, "Checkout payment failed");
        self.mark_session(session.id, CheckoutStatus::PaymentFailed, Some(err.to_string()))
            .await;
        self.event_sender
            .send_or_log(Event::PaymentFailed {
                session_id: session.id,
                payment_intent_id: intent_id.to_string(),
                reason: err.to_string(),
            })
            .await;
        err
    }

    /// The shopper's payment is confirmed but no order exists. The cart is
    /// left alone and a later confirm for the same intent retries the write.
    async fn persist_failed(
        &self,
        session: &CheckoutSessionModel,
        intent_id: &str,
        reason: String,
    ) -> ServiceError {
        error!(
            payment_intent_id = %intent_id,
            identity_id = %session.identity_id,
            amount = %session.total_amount,
            reason = %reason,
            "Order persistence failed after payment confirmation"
        );
        counter!("checkout_order_persist_failed_total", 1);
        self.mark_session(
            session.id,
            CheckoutStatus::OrderPersistFailed,
            Some(reason.clone()),
        )
        .await;
        self.event_sender
            .send_or_log(Event::OrderPersistFailed {
                payment_intent_id: intent_id.to_string(),
                identity_id: session.identity_id.clone(),
                amount: session.total_amount,
                reason: reason.clone(),
            })
            .await;

        ServiceError::OrderPersistFailed {
            payment_intent_id: intent_id.to_string(),
            identity_id: session.identity_id.clone(),
            amount: session.total_amount,
            reason,
        }
    }

    /// Best-effort status write outside the order transaction. A session
    /// that holds an order is left alone. Returns whether a row changed.
    async fn mark_session(
        &self,
        session_id: Uuid,
        status: CheckoutStatus,
        reason: Option<String>,
    ) -> bool {
        let result = CheckoutSession::update_many()
            .col_expr(checkout_session::Column::Status, Expr::value(status))
            .col_expr(checkout_session::Column::FailureReason, Expr::value(reason))
            .col_expr(checkout_session::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(checkout_session::Column::Id.eq(session_id))
            .filter(
                checkout_session::Column::Status
                    .is_not_in([CheckoutStatus::OrderCreated, CheckoutStatus::Placed]),
            )
            .exec(&*self.db)
            .await;
        match result {
            Ok(res) => res.rows_affected > 0,
            Err(e) => {
                warn!(%session_id, %status, error = %e, "Could not update checkout session");
                false
            }
        }
    }

    async fn mark_placed(&self, session_id: Uuid, order_id: Uuid) {
        let result = CheckoutSession::update_many()
            .col_expr(
                checkout_session::Column::Status,
                Expr::value(CheckoutStatus::Placed),
            )
            .col_expr(checkout_session::Column::OrderId, Expr::value(order_id))
            .col_expr(
                checkout_session::Column::FailureReason,
                Expr::value(Option::<String>::None),
            )
            .col_expr(checkout_session::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(checkout_session::Column::Id.eq(session_id))
            .exec(&*self.db)
            .await;
        if let Err(e) = result {
            warn!(%session_id, %order_id, error = %e, "Could not mark checkout session placed");
        }
    }

    pub async fn get_session(
        &self,
        identity_id: &str,
        session_id: Uuid,
    ) -> Result<CheckoutSessionModel, ServiceError> {
        CheckoutSession::find_by_id(session_id)
            .filter(checkout_session::Column::IdentityId.eq(identity_id))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Checkout {} not found", session_id)))
    }

    /// Expires checkouts left in PAYMENT_PENDING for longer than `ttl` and
    /// releases their intents. Sessions the shopper actually paid are
    /// completed instead. Returns how many sessions were expired.
    #[instrument(skip(self))]
    pub async fn sweep_stale_sessions(&self, ttl: Duration) -> Result<usize, ServiceError> {
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| ServiceError::ValidationError(format!("invalid ttl: {}", e)))?;
        let cutoff = Utc::now() - ttl;

        let stale = CheckoutSession::find()
            .filter(checkout_session::Column::Status.eq(CheckoutStatus::PaymentPending))
            .filter(checkout_session::Column::UpdatedAt.lt(cutoff))
            .all(&*self.db)
            .await?;

        let mut expired = 0;
        for session in stale {
            if let Some(intent_id) = session.payment_intent_id.clone() {
                match self.gateway.retrieve_intent(&intent_id).await {
                    Ok(intent)
                        if matches!(
                            intent.status,
                            IntentStatus::Authorized | IntentStatus::Captured
                        ) =>
                    {
                        if let Err(e) = self.finalize(session).await {
                            warn!(intent_id = %intent_id, error = %e, "Stale paid checkout not completed");
                        }
                        continue;
                    }
                    Ok(intent) if intent.status != IntentStatus::Canceled => {
                        if let Err(e) = self.gateway.cancel_intent(&intent_id).await {
                            warn!(intent_id = %intent_id, error = %e, "Could not cancel stale intent");
                            continue;
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(intent_id = %intent_id, error = %e, "Skipping stale checkout");
                        continue;
                    }
                }
            }
            if self
                .mark_session(session.id, CheckoutStatus::Expired, Some("expired".into()))
                .await
            {
                expired += 1;
            }
        }

        if expired > 0 {
            info!(expired, "Expired stale checkout sessions");
            self.event_sender
                .send_or_log(Event::CheckoutSessionsExpired {
                    count: expired,
                    at: Utc::now(),
                })
                .await;
        }
        Ok(expired)
    }
}
