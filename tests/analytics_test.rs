mod common;

use assert_matches::assert_matches;
use chrono::{Duration, Utc};
use nestling_store::{
    auth::Identity,
    entities::{order, Order},
    errors::ServiceError,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{sea_query::Expr, ColumnTrait, EntityTrait, QueryFilter};

use common::{percent_offer, TestApp};

#[tokio::test]
async fn dashboard_compares_current_and_previous_windows() {
    let app = TestApp::new().await;
    let stroller = app.product("Travel stroller", dec!(1000), 10).await;
    let crib = app.product("Convertible crib", dec!(600), 4).await;
    app.offer(percent_offer("SAVE20", dec!(20), Some(dec!(500))))
        .await;

    // Previous window: 1000 + 80 tax
    let old = app
        .place_order(&Identity::new("returning"), &stroller, 1, None)
        .await;
    Order::update_many()
        .col_expr(
            order::Column::CreatedAt,
            Expr::value(Utc::now() - Duration::days(40)),
        )
        .filter(order::Column::Id.eq(old.id))
        .exec(&*app.db)
        .await
        .unwrap();

    // Current window: 880 and 648
    app.place_order(&Identity::new("alice"), &stroller, 1, Some("SAVE20"))
        .await;
    app.place_order(&Identity::new("bea"), &crib, 1, None).await;

    let metrics = app.services.analytics.dashboard(30).await.unwrap();
    assert_eq!(metrics.period_days, 30);

    assert_eq!(metrics.revenue.current, dec!(1528));
    assert_eq!(metrics.revenue.previous, dec!(1080));
    assert_eq!(metrics.revenue.trend_percent, Some(dec!(41.5)));

    assert_eq!(metrics.orders.current, dec!(2));
    assert_eq!(metrics.orders.previous, dec!(1));
    assert_eq!(metrics.orders.trend_percent, Some(dec!(100.0)));
    assert_eq!(metrics.average_order_value.current, dec!(764));
    assert_eq!(metrics.customers.current, dec!(2));

    assert_eq!(metrics.orders_by_status.len(), 1);
    assert_eq!(metrics.orders_by_status[0].status, "CONFIRMED");
    assert_eq!(metrics.orders_by_status[0].count, 2);

    let daily_orders: u64 = metrics.daily_sales.iter().map(|d| d.orders).sum();
    let daily_revenue: Decimal = metrics.daily_sales.iter().map(|d| d.revenue).sum();
    assert_eq!(daily_orders, 2);
    assert_eq!(daily_revenue, dec!(1528));

    assert_eq!(metrics.top_products.len(), 2);
    assert_eq!(metrics.top_products[0].product_id, stroller.id);
    assert_eq!(metrics.top_products[0].units_sold, 1);
    assert_eq!(metrics.top_products[1].product_id, crib.id);

    // The crib dropped to 3 units, under the default threshold of 5
    assert!(metrics.low_stock.iter().any(|p| p.product_id == crib.id && p.inventory == 3));
    assert!(metrics.low_stock.iter().all(|p| p.product_id != stroller.id));

    assert_eq!(metrics.discount_usage.len(), 1);
    let usage = &metrics.discount_usage[0];
    assert_eq!(usage.code, "SAVE20");
    assert_eq!(usage.orders_in_period, 1);
    assert_eq!(usage.discount_given, dec!(200));
    assert_eq!(usage.used_count, 1);
    assert_eq!(usage.max_uses, None);
}

#[tokio::test]
async fn refunded_payments_do_not_count_as_revenue() {
    let app = TestApp::new().await;
    let seat = app.product("Car seat", dec!(1000), 10).await;
    app.place_order(&Identity::new("keeps"), &seat, 1, None).await;
    let returned = app
        .place_order(&Identity::new("returns"), &seat, 1, None)
        .await;
    app.services.orders.record_refund(returned.id).await.unwrap();

    let metrics = app.services.analytics.dashboard(7).await.unwrap();
    assert_eq!(metrics.orders.current, dec!(2));
    assert_eq!(metrics.revenue.current, dec!(1080));
    assert_eq!(metrics.average_order_value.current, dec!(1080));
    assert!(metrics
        .orders_by_status
        .iter()
        .any(|s| s.status == "REFUNDED" && s.count == 1));
}

#[tokio::test]
async fn empty_store_has_no_trends() {
    let app = TestApp::new().await;
    let metrics = app.services.analytics.dashboard(1).await.unwrap();
    assert_eq!(metrics.revenue.current, Decimal::ZERO);
    assert_eq!(metrics.revenue.trend_percent, None);
    assert!(metrics.daily_sales.is_empty());
    assert!(metrics.top_products.is_empty());
    assert!(metrics.discount_usage.is_empty());
}

#[tokio::test]
async fn window_length_is_bounded() {
    let app = TestApp::new().await;
    for days in [0, -3, 366] {
        assert_matches!(
            app.services.analytics.dashboard(days).await,
            Err(ServiceError::ValidationError(_))
        );
    }
    assert!(app.services.analytics.dashboard(365).await.is_ok());
}
