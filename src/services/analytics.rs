use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    entities::{
        offer, order, order_item, payment, product, Offer, Order, OrderItem, OrderModel,
        Payment, PaymentModel, PaymentStatus, Product, ProductStatus,
    },
    errors::ServiceError,
};

use super::pricing::round_money;

const MAX_DAYS: i64 = 365;
const TOP_PRODUCTS: usize = 10;
const LOW_STOCK_LIMIT: u64 = 20;

/// A figure for the selected window next to the window before it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct MetricWithTrend {
    pub current: Decimal,
    pub previous: Decimal,
    /// Percent change; absent when the previous window was zero
    pub trend_percent: Option<Decimal>,
}

impl MetricWithTrend {
    pub fn new(current: Decimal, previous: Decimal) -> Self {
        Self {
            current,
            previous,
            trend_percent: trend_percent(current, previous),
        }
    }
}

pub fn trend_percent(current: Decimal, previous: Decimal) -> Option<Decimal> {
    if previous.is_zero() {
        return None;
    }
    Some(
        ((current - previous) / previous * Decimal::ONE_HUNDRED)
            .round_dp_with_strategy(1, rust_decimal::RoundingStrategy::MidpointAwayFromZero),
    )
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StatusCount {
    pub status: String,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DailySales {
    /// `YYYY-MM-DD`
    pub date: String,
    pub orders: u64,
    pub revenue: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TopProduct {
    pub product_id: Uuid,
    pub product_name: String,
    pub units_sold: i64,
    pub revenue: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LowStockProduct {
    pub product_id: Uuid,
    pub name: String,
    pub inventory: i32,
    pub low_stock_threshold: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DiscountUsage {
    pub code: String,
    pub orders_in_period: u64,
    pub discount_given: Decimal,
    pub used_count: i32,
    pub max_uses: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DashboardMetrics {
    pub period_days: i64,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub revenue: MetricWithTrend,
    pub orders: MetricWithTrend,
    pub average_order_value: MetricWithTrend,
    pub customers: MetricWithTrend,
    pub orders_by_status: Vec<StatusCount>,
    pub daily_sales: Vec<DailySales>,
    pub top_products: Vec<TopProduct>,
    pub low_stock: Vec<LowStockProduct>,
    pub discount_usage: Vec<DiscountUsage>,
    pub generated_at: DateTime<Utc>,
}

struct WindowTotals {
    revenue: Decimal,
    orders: Decimal,
    average_order_value: Decimal,
    customers: Decimal,
}

fn window_totals(orders: &[&OrderModel], payments: &HashMap<Uuid, &PaymentModel>) -> WindowTotals {
    let mut revenue = Decimal::ZERO;
    let mut paid_orders = 0u64;
    for o in orders {
        if let Some(p) = payments.get(&o.id) {
            if p.status == PaymentStatus::Completed {
                revenue += p.amount;
                paid_orders += 1;
            }
        }
    }
    let customers: HashSet<&str> = orders.iter().map(|o| o.identity_id.as_str()).collect();
    let average_order_value = if paid_orders > 0 {
        round_money(revenue / Decimal::from(paid_orders))
    } else {
        Decimal::ZERO
    };

    WindowTotals {
        revenue: round_money(revenue),
        orders: Decimal::from(orders.len() as u64),
        average_order_value,
        customers: Decimal::from(customers.len() as u64),
    }
}

/// Read-only reporting for the admin dashboard
#[derive(Clone)]
pub struct AnalyticsService {
    db: Arc<DatabaseConnection>,
}

impl AnalyticsService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Dashboard for the last `days` days compared with the `days` before.
    #[instrument(skip(self))]
    pub async fn dashboard(&self, days: i64) -> Result<DashboardMetrics, ServiceError> {
        if !(1..=MAX_DAYS).contains(&days) {
            return Err(ServiceError::ValidationError(format!(
                "days must be between 1 and {}",
                MAX_DAYS
            )));
        }
        info!("Generating dashboard metrics");

        let db = &*self.db;
        let now = Utc::now();
        let period_start = now - Duration::days(days);
        let previous_start = period_start - Duration::days(days);

        let orders = Order::find()
            .filter(order::Column::CreatedAt.gte(previous_start))
            .order_by_asc(order::Column::CreatedAt)
            .all(db)
            .await?;
        let order_ids: Vec<Uuid> = orders.iter().map(|o| o.id).collect();
        let payments = if order_ids.is_empty() {
            Vec::new()
        } else {
            Payment::find()
                .filter(payment::Column::OrderId.is_in(order_ids))
                .all(db)
                .await?
        };
        let payments_by_order: HashMap<Uuid, &PaymentModel> =
            payments.iter().map(|p| (p.order_id, p)).collect();

        let (current, previous): (Vec<&OrderModel>, Vec<&OrderModel>) =
            orders.iter().partition(|o| o.created_at >= period_start);
        let cur = window_totals(&current, &payments_by_order);
        let prev = window_totals(&previous, &payments_by_order);

        let mut by_status: BTreeMap<String, u64> = BTreeMap::new();
        let mut daily: BTreeMap<String, (u64, Decimal)> = BTreeMap::new();
        for o in &current {
            *by_status.entry(o.status.to_string()).or_default() += 1;
            let day = daily
                .entry(o.created_at.format("%Y-%m-%d").to_string())
                .or_insert((0, Decimal::ZERO));
            day.0 += 1;
            if let Some(p) = payments_by_order.get(&o.id) {
                if p.status == PaymentStatus::Completed {
                    day.1 += p.amount;
                }
            }
        }

        let top_products = self.top_products(&current).await?;
        let low_stock = self.low_stock().await?;
        let discount_usage = self.discount_usage(&current).await?;

        Ok(DashboardMetrics {
            period_days: days,
            period_start,
            period_end: now,
            revenue: MetricWithTrend::new(cur.revenue, prev.revenue),
            orders: MetricWithTrend::new(cur.orders, prev.orders),
            average_order_value: MetricWithTrend::new(
                cur.average_order_value,
                prev.average_order_value,
            ),
            customers: MetricWithTrend::new(cur.customers, prev.customers),
            orders_by_status: by_status
                .into_iter()
                .map(|(status, count)| StatusCount { status, count })
                .collect(),
            daily_sales: daily
                .into_iter()
                .map(|(date, (orders, revenue))| DailySales {
                    date,
                    orders,
                    revenue: round_money(revenue),
                })
                .collect(),
            top_products,
            low_stock,
            discount_usage,
            generated_at: now,
        })
    }

    async fn top_products(&self, orders: &[&OrderModel]) -> Result<Vec<TopProduct>, ServiceError> {
        let ids: Vec<Uuid> = orders.iter().map(|o| o.id).collect();
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let items = OrderItem::find()
            .filter(order_item::Column::OrderId.is_in(ids))
            .all(&*self.db)
            .await?;

        let mut totals: HashMap<Uuid, TopProduct> = HashMap::new();
        for item in items {
            let entry = totals.entry(item.product_id).or_insert_with(|| TopProduct {
                product_id: item.product_id,
                product_name: item.product_name.clone(),
                units_sold: 0,
                revenue: Decimal::ZERO,
            });
            entry.units_sold += i64::from(item.quantity);
            entry.revenue += item.line_total;
        }

        let mut ranked: Vec<TopProduct> = totals.into_values().collect();
        ranked.sort_by(|a, b| {
            b.units_sold
                .cmp(&a.units_sold)
                .then_with(|| b.revenue.cmp(&a.revenue))
                .then_with(|| a.product_name.cmp(&b.product_name))
        });
        ranked.truncate(TOP_PRODUCTS);
        Ok(ranked)
    }

    async fn low_stock(&self) -> Result<Vec<LowStockProduct>, ServiceError> {
        let products = Product::find()
            .filter(product::Column::Status.eq(ProductStatus::Active))
            .filter(
                Expr::col(product::Column::Inventory)
                    .lte(Expr::col(product::Column::LowStockThreshold)),
            )
            .order_by_asc(product::Column::Inventory)
            .limit(LOW_STOCK_LIMIT)
            .all(&*self.db)
            .await?;
        Ok(products
            .into_iter()
            .map(|p| LowStockProduct {
                product_id: p.id,
                name: p.name,
                inventory: p.inventory,
                low_stock_threshold: p.low_stock_threshold,
            })
            .collect())
    }

    async fn discount_usage(
        &self,
        orders: &[&OrderModel],
    ) -> Result<Vec<DiscountUsage>, ServiceError> {
        let mut per_code: BTreeMap<String, (u64, Decimal)> = BTreeMap::new();
        for o in orders {
            if let Some(code) = &o.discount_code {
                let entry = per_code.entry(code.clone()).or_insert((0, Decimal::ZERO));
                entry.0 += 1;
                entry.1 += o.discount_amount;
            }
        }
        if per_code.is_empty() {
            return Ok(Vec::new());
        }

        let offers = Offer::find()
            .filter(offer::Column::Code.is_in(per_code.keys().cloned().collect::<Vec<_>>()))
            .all(&*self.db)
            .await?;
        let offers: HashMap<String, _> = offers.into_iter().map(|o| (o.code.clone(), o)).collect();

        Ok(per_code
            .into_iter()
            .map(|(code, (orders_in_period, discount_given))| {
                let offer = offers.get(&code);
                DiscountUsage {
                    used_count: offer.map(|o| o.used_count).unwrap_or(0),
                    max_uses: offer.and_then(|o| o.max_uses),
                    code,
                    orders_in_period,
                    discount_given: round_money(discount_given),
                }
            })
            .collect())
    }
}
