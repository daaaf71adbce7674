mod common;

use assert_matches::assert_matches;
use nestling_store::{
    entities::ProductStatus,
    errors::ServiceError,
    services::{cart::QuantityUpdate, catalog::CreateProductInput},
};
use rust_decimal_macros::dec;
use uuid::Uuid;

use common::TestApp;

#[tokio::test]
async fn adding_the_same_product_accumulates_one_line() {
    let app = TestApp::new().await;
    let socks = app.product("Grip socks (3 pack)", dec!(199), 40).await;
    let cart = &app.services.cart;

    cart.add_item("parent-1", socks.id, 2).await.unwrap();
    let line = cart.add_item("parent-1", socks.id, 3).await.unwrap();
    assert_eq!(line.quantity, 5);

    let view = cart.get_cart("parent-1").await.unwrap();
    assert_eq!(view.items.len(), 1);
    assert_eq!(view.item_count, 5);
    assert_eq!(view.items[0].line_total, dec!(995));
    assert_eq!(view.subtotal, dec!(995));
    assert!(view.items[0].available);
}

#[tokio::test]
async fn concurrent_adds_never_duplicate_lines() {
    let app = TestApp::new().await;
    let rattle = app.product("Wooden rattle", dec!(150), 100).await;
    let cart = app.services.cart.clone();

    let adds = (0..5).map(|_| {
        let cart = cart.clone();
        let id = rattle.id;
        async move { cart.add_item("parent-2", id, 1).await }
    });
    for result in futures::future::join_all(adds).await {
        result.unwrap();
    }

    let view = cart.get_cart("parent-2").await.unwrap();
    assert_eq!(view.items.len(), 1);
    assert_eq!(view.items[0].quantity, 5);
}

#[tokio::test]
async fn first_read_creates_an_empty_cart_once() {
    let app = TestApp::new().await;
    let first = app.services.cart.get_cart("fresh").await.unwrap();
    let second = app.services.cart.get_cart("fresh").await.unwrap();
    assert!(first.items.is_empty());
    assert_eq!(first.subtotal, dec!(0));
    assert_eq!(first.cart_id, second.cart_id);
    assert_eq!(app.count("carts").await, 1);
}

#[tokio::test]
async fn inactive_or_unknown_products_cannot_be_added() {
    let app = TestApp::new().await;
    let mut draft = CreateProductInput::active("Retired playmat", dec!(900), 5);
    draft.status = ProductStatus::Archived;
    let retired = app.services.catalog.create_product(draft).await.unwrap();

    let err = app
        .services
        .cart
        .add_item("parent-3", retired.id, 1)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ProductNotFound(id) if id == retired.id);

    let missing = Uuid::new_v4();
    let err = app
        .services
        .cart
        .add_item("parent-3", missing, 1)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ProductNotFound(id) if id == missing);

    let err = app
        .services
        .cart
        .add_item("parent-3", retired.id, 0)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));
}

#[tokio::test]
async fn quantity_zero_removes_the_line() {
    let app = TestApp::new().await;
    let cream = app.product("Diaper cream", dec!(320), 20).await;
    let cart = &app.services.cart;

    let line = cart.add_item("parent-4", cream.id, 2).await.unwrap();
    let updated = cart
        .update_item_quantity("parent-4", line.id, 4)
        .await
        .unwrap();
    assert_matches!(updated, QuantityUpdate::Updated(ref item) if item.quantity == 4);

    let removed = cart
        .update_item_quantity("parent-4", line.id, 0)
        .await
        .unwrap();
    assert_eq!(removed, QuantityUpdate::Removed);
    assert!(cart.get_cart("parent-4").await.unwrap().items.is_empty());
}

#[tokio::test]
async fn lines_belong_to_their_owner() {
    let app = TestApp::new().await;
    let spoon = app.product("Silicone spoons", dec!(180), 20).await;
    let cart = &app.services.cart;
    let line = cart.add_item("owner", spoon.id, 1).await.unwrap();

    let err = cart
        .update_item_quantity("someone-else", line.id, 3)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::CartItemNotFound(id) if id == line.id);
    let err = cart.remove_item("someone-else", line.id).await.unwrap_err();
    assert_matches!(err, ServiceError::CartItemNotFound(_));

    assert_eq!(cart.get_cart("owner").await.unwrap().item_count, 1);
}

#[tokio::test]
async fn guest_cart_merges_into_signed_in_cart() {
    let app = TestApp::new().await;
    let onesie = app.product("Organic onesie", dec!(350), 30).await;
    let hat = app.product("Sun hat", dec!(220), 30).await;
    let cart = &app.services.cart;

    cart.add_item("guest-9", onesie.id, 2).await.unwrap();
    cart.add_item("guest-9", hat.id, 1).await.unwrap();
    cart.add_item("member-9", onesie.id, 1).await.unwrap();

    let merged = cart.merge_carts("guest-9", "member-9").await.unwrap();
    assert_eq!(merged.items.len(), 2);
    let onesie_line = merged
        .items
        .iter()
        .find(|l| l.product_id == onesie.id)
        .unwrap();
    assert_eq!(onesie_line.quantity, 3);
    assert_eq!(merged.subtotal, dec!(1270));

    assert!(cart.get_cart("guest-9").await.unwrap().items.is_empty());

    // Merging again is a no-op
    let again = cart.merge_carts("guest-9", "member-9").await.unwrap();
    assert_eq!(again.item_count, 4);
}

#[tokio::test]
async fn cart_view_reflects_live_price_and_stock() {
    let app = TestApp::new().await;
    let lamp = app.product("Night lamp", dec!(400), 1).await;
    let cart = &app.services.cart;
    cart.add_item("parent-5", lamp.id, 2).await.unwrap();

    let view = cart.get_cart("parent-5").await.unwrap();
    assert!(!view.items[0].available);
    assert_eq!(view.items[0].unit_price, dec!(400));
}
