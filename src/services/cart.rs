use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::{Expr, OnConflict},
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr,
    EntityTrait, ModelTrait, QueryFilter, QueryOrder, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    entities::{cart, cart_item, Cart, CartItem, CartItemModel, CartModel, Product, ProductModel},
    errors::ServiceError,
    events::{Event, EventSender},
};

use super::pricing::round_money;

/// Cart line joined with the live product row
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CartLineView {
    pub item_id: Uuid,
    pub product_id: Uuid,
    pub product_name: String,
    pub unit_price: Decimal,
    pub compare_price: Option<Decimal>,
    pub quantity: i32,
    pub line_total: Decimal,
    pub available: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CartView {
    pub cart_id: Uuid,
    pub identity_id: String,
    pub items: Vec<CartLineView>,
    pub item_count: i32,
    pub subtotal: Decimal,
}

/// Outcome of setting a line's quantity
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuantityUpdate {
    Updated(CartItemModel),
    Removed,
}

#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl CartService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Returns the identity's cart, creating it on first use. Safe to race:
    /// the insert is ignored when the identity already has a cart.
    pub async fn get_or_create_cart_in<C: ConnectionTrait>(
        conn: &C,
        identity_id: &str,
    ) -> Result<CartModel, ServiceError> {
        let now = Utc::now();
        let model = cart::ActiveModel {
            id: Set(Uuid::new_v4()),
            identity_id: Set(identity_id.to_string()),
            created_at: Set(now),
            updated_at: Set(now),
        };

        let inserted = Cart::insert(model)
            .on_conflict(
                OnConflict::column(cart::Column::IdentityId)
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(conn)
            .await;
        match inserted {
            Ok(_) | Err(DbErr::RecordNotInserted) => {}
            Err(e) => return Err(e.into()),
        }

        Self::find_cart_in(conn, identity_id).await?.ok_or_else(|| {
            ServiceError::InternalError(format!("cart for {} vanished after upsert", identity_id))
        })
    }

    async fn find_cart_in<C: ConnectionTrait>(
        conn: &C,
        identity_id: &str,
    ) -> Result<Option<CartModel>, ServiceError> {
        Ok(Cart::find()
            .filter(cart::Column::IdentityId.eq(identity_id))
            .one(conn)
            .await?)
    }

    #[instrument(skip(self))]
    pub async fn get_or_create_cart(&self, identity_id: &str) -> Result<CartModel, ServiceError> {
        Self::get_or_create_cart_in(&*self.db, identity_id).await
    }

    /// Adds `quantity` of a product with one upsert keyed on (cart, product),
    /// so concurrent adds accumulate instead of producing duplicate lines.
    async fn upsert_line_in<C: ConnectionTrait>(
        conn: &C,
        cart_id: Uuid,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<CartItemModel, ServiceError> {
        let now = Utc::now();
        let model = cart_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            cart_id: Set(cart_id),
            product_id: Set(product_id),
            quantity: Set(quantity),
            created_at: Set(now),
            updated_at: Set(now),
        };

        CartItem::insert(model)
            .on_conflict(
                OnConflict::columns([cart_item::Column::CartId, cart_item::Column::ProductId])
                    .value(
                        cart_item::Column::Quantity,
                        Expr::col((CartItem, cart_item::Column::Quantity)).add(quantity),
                    )
                    .value(cart_item::Column::UpdatedAt, Expr::value(now))
                    .to_owned(),
            )
            .exec_without_returning(conn)
            .await?;

        CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart_id))
            .filter(cart_item::Column::ProductId.eq(product_id))
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::InternalError("cart line missing after upsert".into()))
    }

    #[instrument(skip(self))]
    pub async fn add_item(
        &self,
        identity_id: &str,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<CartItemModel, ServiceError> {
        if quantity <= 0 {
            return Err(ServiceError::ValidationError(
                "quantity must be at least 1".to_string(),
            ));
        }

        Product::find_by_id(product_id)
            .one(&*self.db)
            .await?
            .filter(ProductModel::is_purchasable)
            .ok_or(ServiceError::ProductNotFound(product_id))?;

        let cart = self.get_or_create_cart(identity_id).await?;
        let item = Self::upsert_line_in(&*self.db, cart.id, product_id, quantity).await?;

        self.event_sender
            .send_or_log(Event::CartItemAdded {
                identity_id: identity_id.to_string(),
                product_id,
                quantity,
            })
            .await;
        Ok(item)
    }

    async fn owned_item(
        &self,
        identity_id: &str,
        item_id: Uuid,
    ) -> Result<CartItemModel, ServiceError> {
        let cart = Self::find_cart_in(&*self.db, identity_id)
            .await?
            .ok_or(ServiceError::CartItemNotFound(item_id))?;
        CartItem::find_by_id(item_id)
            .filter(cart_item::Column::CartId.eq(cart.id))
            .one(&*self.db)
            .await?
            .ok_or(ServiceError::CartItemNotFound(item_id))
    }

    /// Sets a line's quantity; zero or less removes the line.
    #[instrument(skip(self))]
    pub async fn update_item_quantity(
        &self,
        identity_id: &str,
        item_id: Uuid,
        quantity: i32,
    ) -> Result<QuantityUpdate, ServiceError> {
        let item = self.owned_item(identity_id, item_id).await?;

        if quantity <= 0 {
            item.delete(&*self.db).await?;
            return Ok(QuantityUpdate::Removed);
        }

        let mut active: cart_item::ActiveModel = item.into();
        active.quantity = Set(quantity);
        active.updated_at = Set(Utc::now());
        Ok(QuantityUpdate::Updated(active.update(&*self.db).await?))
    }

    #[instrument(skip(self))]
    pub async fn remove_item(&self, identity_id: &str, item_id: Uuid) -> Result<(), ServiceError> {
        let item = self.owned_item(identity_id, item_id).await?;
        item.delete(&*self.db).await?;
        Ok(())
    }

    /// Lines with their product rows, oldest first. A `None` product means the
    /// row was deleted after the line was added.
    pub async fn lines_in<C: ConnectionTrait>(
        conn: &C,
        cart_id: Uuid,
    ) -> Result<Vec<(CartItemModel, Option<ProductModel>)>, ServiceError> {
        Ok(CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart_id))
            .order_by_asc(cart_item::Column::CreatedAt)
            .find_also_related(Product)
            .all(conn)
            .await?)
    }

    #[instrument(skip(self))]
    pub async fn get_cart(&self, identity_id: &str) -> Result<CartView, ServiceError> {
        let cart = self.get_or_create_cart(identity_id).await?;
        let lines = Self::lines_in(&*self.db, cart.id).await?;

        let items: Vec<CartLineView> = lines
            .into_iter()
            .filter_map(|(item, product)| {
                let product = product?;
                let line_total = round_money(product.price * Decimal::from(item.quantity));
                Some(CartLineView {
                    item_id: item.id,
                    product_id: product.id,
                    available: product.is_purchasable() && product.inventory >= item.quantity,
                    compare_price: product.display_compare_price(),
                    product_name: product.name,
                    unit_price: product.price,
                    quantity: item.quantity,
                    line_total,
                })
            })
            .collect();

        let subtotal = items.iter().map(|l| l.line_total).sum();
        let item_count = items.iter().map(|l| l.quantity).sum();

        Ok(CartView {
            cart_id: cart.id,
            identity_id: cart.identity_id,
            items,
            item_count,
            subtotal,
        })
    }

    /// Empties a cart. Only the order workflow calls this, inside its
    /// persistence transaction.
    pub async fn clear_in<C: ConnectionTrait>(conn: &C, cart_id: Uuid) -> Result<u64, ServiceError> {
        let result = CartItem::delete_many()
            .filter(cart_item::Column::CartId.eq(cart_id))
            .exec(conn)
            .await?;
        Ok(result.rows_affected)
    }

    /// Folds a guest cart into the signed-in identity's cart and empties the
    /// guest cart.
    #[instrument(skip(self))]
    pub async fn merge_carts(
        &self,
        from_identity: &str,
        into_identity: &str,
    ) -> Result<CartView, ServiceError> {
        if from_identity == into_identity {
            return self.get_cart(into_identity).await;
        }

        let txn = self.db.begin().await?;
        let merged = match Self::find_cart_in(&txn, from_identity).await? {
            Some(source) => {
                let target = Self::get_or_create_cart_in(&txn, into_identity).await?;
                let lines = CartItem::find()
                    .filter(cart_item::Column::CartId.eq(source.id))
                    .all(&txn)
                    .await?;
                for line in &lines {
                    Self::upsert_line_in(&txn, target.id, line.product_id, line.quantity).await?;
                }
                Self::clear_in(&txn, source.id).await?;
                lines.len()
            }
            None => 0,
        };
        txn.commit().await?;

        info!(from = %from_identity, into = %into_identity, lines = merged, "Carts merged");
        if merged > 0 {
            self.event_sender
                .send_or_log(Event::CartsMerged {
                    from_identity: from_identity.to_string(),
                    into_identity: into_identity.to_string(),
                    lines: merged,
                })
                .await;
        }

        self.get_cart(into_identity).await
    }
}
