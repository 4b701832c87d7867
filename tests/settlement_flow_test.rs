mod common;

use common::TestApp;
use http::{Method, StatusCode};
use rust_decimal_macros::dec;
use sea_orm::EntityTrait;
use serde_json::json;
use swiftcart_api::entities::{order, product_variant};
use uuid::Uuid;

async fn cart_with_item(app: &TestApp, token: &str, variant_id: Uuid, quantity: i32) {
    let (status, _) = app
        .post(
            "/api/v1/cart/items",
            token,
            json!({ "variant_id": variant_id, "quantity": quantity }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
}

async fn stock_of(app: &TestApp, variant_id: Uuid) -> i32 {
    product_variant::Entity::find_by_id(variant_id)
        .one(&*app.db)
        .await
        .expect("query variant")
        .expect("variant exists")
        .stock
}

async fn order_row(app: &TestApp, order_id: Uuid) -> order::Model {
    order::Entity::find_by_id(order_id)
        .one(&*app.db)
        .await
        .expect("query order")
        .expect("order exists")
}

#[tokio::test]
async fn full_settlement_happy_path() {
    let app = TestApp::spawn().await;
    let customer = app.seed_customer("Asha", "asha@example.com").await;
    let token = app.token_for(customer);
    let product = app.seed_product("Linen Shirt").await;
    let variant = app
        .seed_variant(product, "M", "White", dec!(1200), 5)
        .await;

    cart_with_item(&app, &token, variant, 2).await;

    let (status, receipt) = app
        .post(
            "/api/v1/checkout/orders",
            &token,
            json!({ "subtotal": "2400", "discount": "0", "total": "2400" }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(receipt["buyer"]["email"], "asha@example.com");
    let order_id: Uuid = serde_json::from_value(receipt["order_id"].clone()).unwrap();

    let (status, intent) = app
        .post(
            "/api/v1/checkout/payment/create-order",
            &token,
            json!({ "order_id": order_id, "amount": "2400" }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(intent["amount_minor"], 240000);
    let gw_order = intent["gateway_order_id"].as_str().unwrap().to_string();

    let payment_id = "pay_happy_path";
    let signature = app.sign_payment(&gw_order, payment_id);
    let (status, verified) = app
        .post(
            "/api/v1/checkout/payment/verify",
            &token,
            json!({
                "order_id": order_id,
                "gateway_order_id": gw_order,
                "gateway_payment_id": payment_id,
                "signature": signature,
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(verified["payment_stage"], "completed");
    assert_eq!(verified["fulfillment_stage"], "confirmed");

    // Side effects: stock down, cart empty, order visible in listings.
    assert_eq!(stock_of(&app, variant).await, 3);

    let (status, cart) = app.get("/api/v1/cart", &token).await;
    assert_eq!(status, StatusCode::OK);
    assert!(cart["items"].as_array().unwrap().is_empty());

    let (status, orders) = app.get("/api/v1/orders/my", &token).await;
    assert_eq!(status, StatusCode::OK);
    let orders = orders.as_array().unwrap();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0]["id"], json!(order_id));
}

#[tokio::test]
async fn tampered_signature_fails_payment_and_allows_retry() {
    let app = TestApp::spawn().await;
    let customer = app.seed_customer("Bilal", "bilal@example.com").await;
    let token = app.token_for(customer);
    let product = app.seed_product("Denim Jacket").await;
    let variant = app.seed_variant(product, "L", "Blue", dec!(3000), 4).await;

    cart_with_item(&app, &token, variant, 1).await;
    let (_, receipt) = app
        .post(
            "/api/v1/checkout/orders",
            &token,
            json!({ "subtotal": "3000", "discount": "0", "total": "3000" }),
        )
        .await;
    let order_id: Uuid = serde_json::from_value(receipt["order_id"].clone()).unwrap();

    let (_, intent) = app
        .post(
            "/api/v1/checkout/payment/create-order",
            &token,
            json!({ "order_id": order_id, "amount": "3000" }),
        )
        .await;
    let gw_order = intent["gateway_order_id"].as_str().unwrap().to_string();

    let (status, body) = app
        .post(
            "/api/v1/checkout/payment/verify",
            &token,
            json!({
                "order_id": order_id,
                "gateway_order_id": gw_order,
                "gateway_payment_id": "pay_evil",
                "signature": "deadbeef",
            }),
        )
        .await;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    assert!(body["message"]
        .as_str()
        .unwrap()
        .contains("Invalid signature"));

    // Failure leaves the order retryable and stock untouched.
    let row = order_row(&app, order_id).await;
    assert_eq!(row.payment_stage, order::PaymentStage::Failed);
    assert_eq!(row.fulfillment_stage, order::FulfillmentStage::Pending);
    assert_eq!(stock_of(&app, variant).await, 4);

    // The cart still holds the line and the unpaid order stays hidden.
    let (_, cart) = app.get("/api/v1/cart", &token).await;
    assert_eq!(cart["items"].as_array().unwrap().len(), 1);
    let (_, orders) = app.get("/api/v1/orders/my", &token).await;
    assert!(orders.as_array().unwrap().is_empty());

    // A genuine signature for the same order then settles it.
    let signature = app.sign_payment(&gw_order, "pay_retry");
    let (status, _) = app
        .post(
            "/api/v1/checkout/payment/verify",
            &token,
            json!({
                "order_id": order_id,
                "gateway_order_id": gw_order,
                "gateway_payment_id": "pay_retry",
                "signature": signature,
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stock_of(&app, variant).await, 3);
}

#[tokio::test]
async fn repeated_checkout_reuses_pending_order() {
    let app = TestApp::spawn().await;
    let customer = app.seed_customer("Chen", "chen@example.com").await;
    let token = app.token_for(customer);
    let product = app.seed_product("Wool Scarf").await;
    let variant = app.seed_variant(product, "OS", "Grey", dec!(800), 10).await;

    cart_with_item(&app, &token, variant, 1).await;
    let totals = json!({ "subtotal": "800", "discount": "0", "total": "800" });

    let (status, first) = app
        .post("/api/v1/checkout/orders", &token, totals.clone())
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, second) = app.post("/api/v1/checkout/orders", &token, totals).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["reused"], json!(true));
    assert_eq!(second["order_id"], first["order_id"]);
}

#[tokio::test]
async fn order_creation_reports_every_stock_shortage() {
    let app = TestApp::spawn().await;
    let customer = app.seed_customer("Dina", "dina@example.com").await;
    let token = app.token_for(customer);
    let product = app.seed_product("Canvas Tote").await;
    let variant = app.seed_variant(product, "OS", "Beige", dec!(500), 2).await;

    cart_with_item(&app, &token, variant, 2).await;

    // Stock drops to 1 after the cart was filled.
    let mut active: product_variant::ActiveModel = product_variant::Entity::find_by_id(variant)
        .one(&*app.db)
        .await
        .unwrap()
        .unwrap()
        .into();
    active.stock = sea_orm::Set(1);
    sea_orm::ActiveModelTrait::update(active, &*app.db)
        .await
        .unwrap();

    let (status, body) = app
        .post(
            "/api/v1/checkout/orders",
            &token,
            json!({ "subtotal": "1000", "discount": "0", "total": "1000" }),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    let message = body["message"].as_str().unwrap();
    assert!(message.contains("Canvas Tote"));
    assert!(message.contains("requested 2"));
    assert!(message.contains("available 1"));
}

#[tokio::test]
async fn paid_order_that_lost_stock_is_flagged_for_reconciliation() {
    let app = TestApp::spawn().await;
    let customer = app.seed_customer("Esha", "esha@example.com").await;
    let token = app.token_for(customer);
    let product = app.seed_product("Silk Tie").await;
    let variant = app.seed_variant(product, "OS", "Navy", dec!(900), 1).await;

    cart_with_item(&app, &token, variant, 1).await;
    let (_, receipt) = app
        .post(
            "/api/v1/checkout/orders",
            &token,
            json!({ "subtotal": "900", "discount": "0", "total": "900" }),
        )
        .await;
    let order_id: Uuid = serde_json::from_value(receipt["order_id"].clone()).unwrap();
    let (_, intent) = app
        .post(
            "/api/v1/checkout/payment/create-order",
            &token,
            json!({ "order_id": order_id, "amount": "900" }),
        )
        .await;
    let gw_order = intent["gateway_order_id"].as_str().unwrap().to_string();

    // The last unit sells elsewhere between intent and verification.
    let mut active: product_variant::ActiveModel = product_variant::Entity::find_by_id(variant)
        .one(&*app.db)
        .await
        .unwrap()
        .unwrap()
        .into();
    active.stock = sea_orm::Set(0);
    sea_orm::ActiveModelTrait::update(active, &*app.db)
        .await
        .unwrap();

    let signature = app.sign_payment(&gw_order, "pay_reconcile");
    let (status, _) = app
        .post(
            "/api/v1/checkout/payment/verify",
            &token,
            json!({
                "order_id": order_id,
                "gateway_order_id": gw_order,
                "gateway_payment_id": "pay_reconcile",
                "signature": signature,
            }),
        )
        .await;

    // Payment already happened, so settlement succeeds but is flagged.
    assert_eq!(status, StatusCode::OK);
    let row = order_row(&app, order_id).await;
    assert_eq!(row.payment_stage, order::PaymentStage::Completed);
    assert!(row.needs_reconciliation);
    assert_eq!(stock_of(&app, variant).await, 0);
}

#[tokio::test]
async fn settled_order_ignores_duplicate_verification() {
    let app = TestApp::spawn().await;
    let customer = app.seed_customer("Farid", "farid@example.com").await;
    let token = app.token_for(customer);
    let product = app.seed_product("Leather Belt").await;
    let variant = app.seed_variant(product, "34", "Brown", dec!(700), 5).await;

    cart_with_item(&app, &token, variant, 1).await;
    let (_, receipt) = app
        .post(
            "/api/v1/checkout/orders",
            &token,
            json!({ "subtotal": "700", "discount": "0", "total": "700" }),
        )
        .await;
    let order_id: Uuid = serde_json::from_value(receipt["order_id"].clone()).unwrap();
    let (_, intent) = app
        .post(
            "/api/v1/checkout/payment/create-order",
            &token,
            json!({ "order_id": order_id, "amount": "700" }),
        )
        .await;
    let gw_order = intent["gateway_order_id"].as_str().unwrap().to_string();
    let signature = app.sign_payment(&gw_order, "pay_once");

    let verify_body = json!({
        "order_id": order_id,
        "gateway_order_id": gw_order,
        "gateway_payment_id": "pay_once",
        "signature": signature,
    });
    let (status, _) = app
        .post("/api/v1/checkout/payment/verify", &token, verify_body.clone())
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app
        .post("/api/v1/checkout/payment/verify", &token, verify_body)
        .await;
    assert_eq!(status, StatusCode::OK);

    // Stock was decremented exactly once.
    assert_eq!(stock_of(&app, variant).await, 4);
}

#[tokio::test]
async fn paid_order_refuses_another_payment_intent() {
    let app = TestApp::spawn().await;
    let customer = app.seed_customer("Gita", "gita@example.com").await;
    let token = app.token_for(customer);
    let product = app.seed_product("Cotton Kurta").await;
    let variant = app.seed_variant(product, "S", "Green", dec!(650), 3).await;

    cart_with_item(&app, &token, variant, 1).await;
    let (_, receipt) = app
        .post(
            "/api/v1/checkout/orders",
            &token,
            json!({ "subtotal": "650", "discount": "0", "total": "650" }),
        )
        .await;
    let order_id: Uuid = serde_json::from_value(receipt["order_id"].clone()).unwrap();
    let (_, intent) = app
        .post(
            "/api/v1/checkout/payment/create-order",
            &token,
            json!({ "order_id": order_id, "amount": "650" }),
        )
        .await;
    let gw_order = intent["gateway_order_id"].as_str().unwrap().to_string();
    let signature = app.sign_payment(&gw_order, "pay_final");
    app.post(
        "/api/v1/checkout/payment/verify",
        &token,
        json!({
            "order_id": order_id,
            "gateway_order_id": gw_order,
            "gateway_payment_id": "pay_final",
            "signature": signature,
        }),
    )
    .await;

    let (status, body) = app
        .post(
            "/api/v1/checkout/payment/create-order",
            &token,
            json!({ "order_id": order_id, "amount": "650" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].as_str().unwrap().contains("already paid"));
}

#[tokio::test]
async fn checkout_requires_authentication_and_ownership() {
    let app = TestApp::spawn().await;
    let customer = app.seed_customer("Hana", "hana@example.com").await;
    let other = app.seed_customer("Iker", "iker@example.com").await;
    let token = app.token_for(customer);
    let other_token = app.token_for(other);
    let product = app.seed_product("Rain Jacket").await;
    let variant = app
        .seed_variant(product, "M", "Yellow", dec!(2100), 3)
        .await;

    let (status, _) = app
        .request(Method::GET, "/api/v1/orders/my", None, None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Browsing the catalog takes no account.
    let (status, _) = app
        .request(
            Method::GET,
            &format!("/api/v1/products/{}/variants", product),
            None,
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    cart_with_item(&app, &token, variant, 1).await;
    let (_, receipt) = app
        .post(
            "/api/v1/checkout/orders",
            &token,
            json!({ "subtotal": "2100", "discount": "0", "total": "2100" }),
        )
        .await;
    let order_id = receipt["order_id"].as_str().unwrap().to_string();

    // Another customer cannot see or pay for the order.
    let (status, _) = app
        .get(&format!("/api/v1/orders/{}", order_id), &other_token)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app
        .post(
            "/api/v1/checkout/payment/create-order",
            &other_token,
            json!({ "order_id": order_id, "amount": "2100" }),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn mismatched_totals_are_rejected() {
    let app = TestApp::spawn().await;
    let customer = app.seed_customer("Jala", "jala@example.com").await;
    let token = app.token_for(customer);
    let product = app.seed_product("Straw Hat").await;
    let variant = app.seed_variant(product, "OS", "Tan", dec!(450), 5).await;

    cart_with_item(&app, &token, variant, 1).await;

    // Subtotal that disagrees with the cart.
    let (status, _) = app
        .post(
            "/api/v1/checkout/orders",
            &token,
            json!({ "subtotal": "9999", "discount": "0", "total": "9999" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Arithmetic that does not add up.
    let (status, _) = app
        .post(
            "/api/v1/checkout/orders",
            &token,
            json!({ "subtotal": "450", "discount": "100", "total": "450" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn two_paid_orders_for_the_last_unit_never_oversell() {
    let app = TestApp::spawn().await;
    let first = app.seed_customer("Kira", "kira@example.com").await;
    let second = app.seed_customer("Luis", "luis@example.com").await;
    let product = app.seed_product("Limited Print").await;
    let variant = app.seed_variant(product, "OS", "Black", dec!(5000), 1).await;

    // Both customers check out the last unit before either pays.
    let mut settlements = Vec::new();
    for customer in [first, second] {
        let token = app.token_for(customer);
        cart_with_item(&app, &token, variant, 1).await;
        let (_, receipt) = app
            .post(
                "/api/v1/checkout/orders",
                &token,
                json!({ "subtotal": "5000", "discount": "0", "total": "5000" }),
            )
            .await;
        let order_id: Uuid = serde_json::from_value(receipt["order_id"].clone()).unwrap();
        let (_, intent) = app
            .post(
                "/api/v1/checkout/payment/create-order",
                &token,
                json!({ "order_id": order_id, "amount": "5000" }),
            )
            .await;
        let gw_order = intent["gateway_order_id"].as_str().unwrap().to_string();
        settlements.push((token, order_id, gw_order));
    }

    for (i, (token, order_id, gw_order)) in settlements.iter().enumerate() {
        let payment_id = format!("pay_race_{}", i);
        let signature = app.sign_payment(gw_order, &payment_id);
        let (status, _) = app
            .post(
                "/api/v1/checkout/payment/verify",
                token,
                json!({
                    "order_id": order_id,
                    "gateway_order_id": gw_order,
                    "gateway_payment_id": payment_id,
                    "signature": signature,
                }),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
    }

    // Stock bottoms out at zero; the loser is flagged, not oversold.
    assert_eq!(stock_of(&app, variant).await, 0);
    let first_order = order_row(&app, settlements[0].1).await;
    let second_order = order_row(&app, settlements[1].1).await;
    assert!(!first_order.needs_reconciliation);
    assert!(second_order.needs_reconciliation);
}

#[tokio::test]
async fn simultaneous_settlements_of_the_last_unit_never_oversell() {
    let app = TestApp::spawn().await;
    let first = app.seed_customer("Mara", "mara@example.com").await;
    let second = app.seed_customer("Nate", "nate@example.com").await;
    let product = app.seed_product("Signed Poster").await;
    let variant = app.seed_variant(product, "OS", "White", dec!(2500), 1).await;

    let mut settlements = Vec::new();
    for customer in [first, second] {
        let token = app.token_for(customer);
        cart_with_item(&app, &token, variant, 1).await;
        let (_, receipt) = app
            .post(
                "/api/v1/checkout/orders",
                &token,
                json!({ "subtotal": "2500", "discount": "0", "total": "2500" }),
            )
            .await;
        let order_id: Uuid = serde_json::from_value(receipt["order_id"].clone()).unwrap();
        let (_, intent) = app
            .post(
                "/api/v1/checkout/payment/create-order",
                &token,
                json!({ "order_id": order_id, "amount": "2500" }),
            )
            .await;
        let gw_order = intent["gateway_order_id"].as_str().unwrap().to_string();
        settlements.push((token, order_id, gw_order));
    }

    // Both verifications race; the conditional decrement arbitrates.
    let verify = |i: usize| {
        let (token, order_id, gw_order) = settlements[i].clone();
        let payment_id = format!("pay_joint_{}", i);
        let signature = app.sign_payment(&gw_order, &payment_id);
        let app = &app;
        async move {
            app.post(
                "/api/v1/checkout/payment/verify",
                &token,
                json!({
                    "order_id": order_id,
                    "gateway_order_id": gw_order,
                    "gateway_payment_id": payment_id,
                    "signature": signature,
                }),
            )
            .await
        }
    };
    let ((status_a, _), (status_b, _)) = tokio::join!(verify(0), verify(1));
    assert_eq!(status_a, StatusCode::OK);
    assert_eq!(status_b, StatusCode::OK);

    // Money moved twice, the one unit left exactly once.
    assert_eq!(stock_of(&app, variant).await, 0);
    let flagged = [
        order_row(&app, settlements[0].1).await,
        order_row(&app, settlements[1].1).await,
    ]
    .iter()
    .filter(|o| o.needs_reconciliation)
    .count();
    assert_eq!(flagged, 1);
}
