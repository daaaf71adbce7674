use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::{
    entities::{CategoryModel, ProductModel},
    errors::ApiError,
    handlers::common::{success_response, PaginationParams},
    AppState, PaginatedResponse,
};

/// Creates the router for catalog endpoints
pub fn catalog_routes() -> Router<AppState> {
    Router::new()
        .route("/products", get(list_products))
        .route("/products/:id", get(get_product))
        .route("/categories", get(list_categories))
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProductResponse {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub price: Decimal,
    /// Only present when higher than `price`
    pub compare_price: Option<Decimal>,
    pub in_stock: bool,
    pub category_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl From<ProductModel> for ProductResponse {
    fn from(product: ProductModel) -> Self {
        Self {
            compare_price: product.display_compare_price(),
            in_stock: product.inventory > 0,
            id: product.id,
            name: product.name,
            description: product.description,
            price: product.price,
            category_id: product.category_id,
            created_at: product.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CategoryResponse {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
}

impl From<CategoryModel> for CategoryResponse {
    fn from(category: CategoryModel) -> Self {
        Self {
            id: category.id,
            name: category.name,
            slug: category.slug,
        }
    }
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListProductsQuery {
    pub category_id: Option<Uuid>,
    pub page: Option<u64>,
    pub per_page: Option<u64>,
}

/// List active products, newest first
#[utoipa::path(
    get,
    path = "/api/v1/products",
    params(ListProductsQuery),
    responses(
        (status = 200, description = "Page of active products", body = [ProductResponse])
    ),
    tag = "Catalog"
)]
pub async fn list_products(
    State(state): State<AppState>,
    Query(query): Query<ListProductsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let (page, per_page) = PaginationParams {
        page: query.page.unwrap_or(1),
        per_page: query.per_page.unwrap_or(20),
    }
    .clamped();

    let (products, total) = state
        .services
        .catalog
        .list_products(query.category_id, page, per_page)
        .await?;

    Ok(success_response(PaginatedResponse::new(
        products.into_iter().map(ProductResponse::from).collect(),
        total,
        page,
        per_page,
    )))
}

#[utoipa::path(
    get,
    path = "/api/v1/products/{id}",
    params(("id" = Uuid, Path, description = "Product id")),
    responses(
        (status = 200, description = "Product", body = ProductResponse),
        (status = 404, description = "Unknown or inactive product", body = crate::errors::ErrorResponse)
    ),
    tag = "Catalog"
)]
pub async fn get_product(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let product = state.services.catalog.get_product(id).await?;
    Ok(success_response(ProductResponse::from(product)))
}

#[utoipa::path(
    get,
    path = "/api/v1/categories",
    responses((status = 200, description = "All categories", body = [CategoryResponse])),
    tag = "Catalog"
)]
pub async fn list_categories(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let categories = state.services.catalog.list_categories().await?;
    Ok(success_response(
        categories
            .into_iter()
            .map(CategoryResponse::from)
            .collect::<Vec<_>>(),
    ))
}
