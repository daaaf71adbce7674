mod common;

use assert_matches::assert_matches;
use chrono::{Duration, Utc};
use nestling_store::{
    auth::Identity,
    entities::{DiscountType, Offer},
    errors::ServiceError,
};
use rust_decimal_macros::dec;
use sea_orm::EntityTrait;

use common::{percent_offer, TestApp};

#[tokio::test]
async fn validate_is_case_insensitive_and_does_not_consume() {
    let app = TestApp::new().await;
    let offer = app
        .offer(percent_offer("Welcome10", dec!(10), Some(dec!(200))))
        .await;
    assert_eq!(offer.code, "WELCOME10");

    let quote = app
        .services
        .discounts
        .validate(" welcome10 ", dec!(850))
        .await
        .unwrap();
    assert_eq!(quote.code, "WELCOME10");
    assert_eq!(quote.discount_amount, dec!(85));
    assert!(!quote.applies_free_shipping);

    let stored = Offer::find_by_id(offer.id)
        .one(&*app.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.used_count, 0);
}

#[tokio::test]
async fn unknown_and_inactive_codes_are_reported() {
    let app = TestApp::new().await;
    let mut paused = percent_offer("PAUSED", dec!(15), None);
    paused.is_active = false;
    app.offer(paused).await;

    let discounts = &app.services.discounts;
    assert_matches!(
        discounts.validate("NOPE", dec!(100)).await,
        Err(ServiceError::CodeNotFound(ref code)) if code == "NOPE"
    );
    assert_matches!(
        discounts.validate("paused", dec!(100)).await,
        Err(ServiceError::CodeInactive(_))
    );
    assert_matches!(discounts.redeem("paused").await, Err(ServiceError::CodeInactive(_)));
    assert_matches!(discounts.redeem("nope").await, Err(ServiceError::CodeNotFound(_)));
}

#[tokio::test]
async fn window_bounds_are_enforced() {
    let app = TestApp::new().await;
    let mut early = percent_offer("SOON", dec!(10), None);
    early.start_date = Utc::now() + Duration::days(2);
    app.offer(early).await;
    let mut late = percent_offer("GONE", dec!(10), None);
    late.start_date = Utc::now() - Duration::days(10);
    late.end_date = Some(Utc::now() - Duration::days(1));
    app.offer(late).await;

    let discounts = &app.services.discounts;
    assert_matches!(
        discounts.validate("SOON", dec!(100)).await,
        Err(ServiceError::CodeNotYetActive(_))
    );
    assert_matches!(
        discounts.validate("GONE", dec!(100)).await,
        Err(ServiceError::CodeExpired(_))
    );
}

#[tokio::test]
async fn concurrent_redemptions_never_exceed_max_uses() {
    let app = TestApp::new().await;
    let mut limited = percent_offer("FIRST3", dec!(5), None);
    limited.max_uses = Some(3);
    let offer = app.offer(limited).await;

    let attempts = (0..8).map(|_| {
        let discounts = app.services.discounts.clone();
        async move { discounts.redeem("first3").await }
    });
    let results = futures::future::join_all(attempts).await;

    let redeemed = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(redeemed, 3);
    for err in results.into_iter().filter_map(Result::err) {
        assert_matches!(err, ServiceError::UsageLimitReached(ref code) if code == "FIRST3");
    }

    let stored = Offer::find_by_id(offer.id)
        .one(&*app.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.used_count, 3);

    assert_matches!(
        app.services.discounts.validate("FIRST3", dec!(100)).await,
        Err(ServiceError::UsageLimitReached(_))
    );
}

#[tokio::test]
async fn unlimited_codes_keep_counting() {
    let app = TestApp::new().await;
    let offer = app.offer(percent_offer("ALWAYS", dec!(5), None)).await;
    for _ in 0..4 {
        app.services.discounts.redeem("ALWAYS").await.unwrap();
    }
    let stored = Offer::find_by_id(offer.id)
        .one(&*app.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.used_count, 4);
}

#[tokio::test]
async fn active_offers_hide_exhausted_and_inactive_codes() {
    let app = TestApp::new().await;
    app.offer(percent_offer("LIVE", dec!(10), None)).await;
    let mut exhausted = percent_offer("USEDUP", dec!(10), None);
    exhausted.max_uses = Some(1);
    app.offer(exhausted).await;
    app.services.discounts.redeem("USEDUP").await.unwrap();
    let mut off = percent_offer("OFF", dec!(10), None);
    off.is_active = false;
    app.offer(off).await;

    let codes: Vec<String> = app
        .services
        .discounts
        .active_offers()
        .await
        .unwrap()
        .into_iter()
        .map(|o| o.code)
        .collect();
    assert_eq!(codes, vec!["LIVE".to_string()]);
}

#[tokio::test]
async fn invalid_offers_are_refused() {
    let app = TestApp::new().await;
    let mut too_much = percent_offer("HUGE", dec!(120), None);
    assert_matches!(
        app.services.discounts.create_offer(too_much.clone()).await,
        Err(ServiceError::ValidationError(_))
    );
    too_much.discount_value = dec!(-5);
    assert_matches!(
        app.services.discounts.create_offer(too_much).await,
        Err(ServiceError::ValidationError(_))
    );
}

#[tokio::test]
async fn free_shipping_code_waives_the_flat_fee() {
    let app = TestApp::new().await;
    let teether = app.product("Teether ring", dec!(300), 10).await;
    let mut ship_free = percent_offer("SHIPFREE", dec!(0), None);
    ship_free.discount_type = DiscountType::FreeShipping;
    app.offer(ship_free).await;
    let shopper = Identity::new("free-ship");

    let intent = app
        .checkout_for(&shopper, &teether, 1, Some("SHIPFREE"))
        .await;
    assert_eq!(intent.pricing.shipping_amount, dec!(0));
    assert_eq!(intent.pricing.discount_amount, dec!(0));
    assert_eq!(intent.pricing.tax_amount, dec!(24));
    assert_eq!(intent.pricing.total_amount, dec!(324));

    // Without the code the flat fee applies below the threshold
    let other = Identity::new("pays-shipping");
    let intent = app.checkout_for(&other, &teether, 1, None).await;
    assert_eq!(intent.pricing.shipping_amount, dec!(49));
    assert_eq!(intent.pricing.total_amount, dec!(373));
}
