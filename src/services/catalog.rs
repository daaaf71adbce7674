use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection,
    EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect,
};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::{
    entities::{category, product, Category, CategoryModel, Product, ProductModel, ProductStatus},
    errors::ServiceError,
};

#[derive(Debug, Clone)]
pub struct CreateProductInput {
    pub name: String,
    pub description: Option<String>,
    pub price: Decimal,
    pub compare_price: Option<Decimal>,
    pub inventory: i32,
    pub low_stock_threshold: i32,
    pub category_id: Option<Uuid>,
    pub status: ProductStatus,
}

impl CreateProductInput {
    pub fn active(name: impl Into<String>, price: Decimal, inventory: i32) -> Self {
        Self {
            name: name.into(),
            description: None,
            price,
            compare_price: None,
            inventory,
            low_stock_threshold: 5,
            category_id: None,
            status: ProductStatus::Active,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CreateCategoryInput {
    pub name: String,
    pub slug: String,
}

/// Read side of the catalog; products and categories are seeded out of band.
#[derive(Clone)]
pub struct CatalogService {
    db: Arc<DatabaseConnection>,
}

impl CatalogService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Product as a shopper sees it; anything not ACTIVE is treated as missing.
    #[instrument(skip(self))]
    pub async fn get_product(&self, id: Uuid) -> Result<ProductModel, ServiceError> {
        Product::find_by_id(id)
            .one(&*self.db)
            .await?
            .filter(ProductModel::is_purchasable)
            .ok_or(ServiceError::ProductNotFound(id))
    }

    /// Active products, newest first. `page` is 1-based.
    #[instrument(skip(self))]
    pub async fn list_products(
        &self,
        category_id: Option<Uuid>,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<ProductModel>, u64), ServiceError> {
        let mut query = Product::find().filter(product::Column::Status.eq(ProductStatus::Active));
        if let Some(category_id) = category_id {
            query = query.filter(product::Column::CategoryId.eq(category_id));
        }

        let paginator = query
            .order_by_desc(product::Column::CreatedAt)
            .paginate(&*self.db, per_page.max(1));
        let total = paginator.num_items().await?;
        let products = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok((products, total))
    }

    pub async fn list_categories(&self) -> Result<Vec<CategoryModel>, ServiceError> {
        Ok(Category::find()
            .order_by_asc(category::Column::Name)
            .all(&*self.db)
            .await?)
    }

    #[instrument(skip(self, input), fields(name = %input.name))]
    pub async fn create_product(
        &self,
        input: CreateProductInput,
    ) -> Result<ProductModel, ServiceError> {
        if input.price.is_sign_negative() || input.inventory < 0 {
            return Err(ServiceError::ValidationError(
                "price and inventory must not be negative".to_string(),
            ));
        }

        let now = Utc::now();
        let model = product::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(input.name),
            description: Set(input.description),
            price: Set(input.price),
            compare_price: Set(input.compare_price),
            inventory: Set(input.inventory),
            low_stock_threshold: Set(input.low_stock_threshold),
            status: Set(input.status),
            category_id: Set(input.category_id),
            created_at: Set(now),
            updated_at: Set(now),
        };
        let product = model.insert(&*self.db).await?;
        info!(product_id = %product.id, "Product created");
        Ok(product)
    }

    pub async fn create_category(
        &self,
        input: CreateCategoryInput,
    ) -> Result<CategoryModel, ServiceError> {
        let model = category::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(input.name),
            slug: Set(input.slug.trim().to_lowercase()),
            created_at: Set(Utc::now()),
        };
        Ok(model.insert(&*self.db).await?)
    }

    /// Active products at or below their restock threshold, scarcest first.
    pub async fn low_stock_products(&self, limit: u64) -> Result<Vec<ProductModel>, ServiceError> {
        Ok(Product::find()
            .filter(product::Column::Status.eq(ProductStatus::Active))
            .filter(
                Expr::col(product::Column::Inventory)
                    .lte(Expr::col(product::Column::LowStockThreshold)),
            )
            .order_by_asc(product::Column::Inventory)
            .limit(limit)
            .all(&*self.db)
            .await?)
    }
}
