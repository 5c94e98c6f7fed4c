mod common;

use axum::http::{Method, StatusCode};
use common::{dec, TestApp};
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use uuid::Uuid;

fn order_payload(product_id: Uuid, quantity: i32, promo: Option<&str>, user: &str) -> Value {
    json!({
        "customer_name": "Wanjiku Kamau",
        "customer_email": "wanjiku@example.co.ke",
        "customer_phone": "0712345678",
        "user_id": user,
        "delivery_location": "Nairobi CBD",
        "delivery_address": "Moi Avenue, Nairobi",
        "promo_code": promo,
        "items": [{"product_id": product_id, "quantity": quantity}]
    })
}

#[tokio::test]
async fn checkout_combines_subtotal_promo_and_delivery() {
    let app = TestApp::new().await;
    app.seed_nairobi_cbd().await;
    let product = app.seed_product("HP-JUG-2L", dec!(750), 10).await;
    app.seed_promo(json!({
        "code": "SAVE10",
        "discount_type": "PERCENTAGE",
        "discount_value": 10,
        "min_order_amount": 1000
    }))
    .await;

    let (status, body) = app
        .json(
            Method::POST,
            "/api/orders",
            Some(order_payload(product.id, 2, Some("save10"), "user-1")),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");

    let order = &body["data"];
    assert_eq!(dec(&order["subtotal"]), dec!(1500));
    assert_eq!(dec(&order["discount_amount"]), dec!(150));
    assert_eq!(dec(&order["shipping_cost"]), dec!(100));
    assert_eq!(dec(&order["total"]), dec!(1450));
    assert_eq!(order["promo_code"], json!("SAVE10"));
    assert_eq!(order["customer_phone"], json!("254712345678"));
    assert_eq!(order["status"], json!("PENDING"));
    assert_eq!(order["payment_status"], json!("PENDING"));
    assert!(order["order_number"].as_str().unwrap().starts_with("HP-"));
    assert_eq!(order["items"].as_array().unwrap().len(), 1);

    let stored = app.state.services.products.get(product.id).await.unwrap();
    assert_eq!(stored.stock_quantity, 8);

    let promo = app
        .state
        .services
        .promo_codes
        .list(&Default::default(), false)
        .await
        .unwrap()
        .0
        .remove(0);
    assert_eq!(promo.usage_count, 1);
    let usages = app.state.services.promo_codes.usages(promo.id).await.unwrap();
    assert_eq!(usages.len(), 1);
    assert_eq!(usages[0].user_id.as_deref(), Some("user-1"));
}

#[tokio::test]
async fn large_orders_ship_free() {
    let app = TestApp::new().await;
    app.seed_nairobi_cbd().await;
    let product = app.seed_product("HP-SOFA", dec!(3000), 5).await;

    let (status, body) = app
        .json(
            Method::POST,
            "/api/orders",
            Some(order_payload(product.id, 2, None, "user-1")),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(dec(&body["data"]["shipping_cost"]), dec!(0));
    assert_eq!(dec(&body["data"]["total"]), dec!(6000));
    assert_eq!(body["data"]["delivery"]["free_shipping"], json!(true));
}

#[tokio::test]
async fn exhausted_promo_rolls_back_the_whole_order() {
    let app = TestApp::new().await;
    app.seed_nairobi_cbd().await;
    let product = app.seed_product("HP-BUCKET", dec!(500), 10).await;
    app.seed_promo(json!({
        "code": "FIRST1",
        "discount_type": "FIXED",
        "discount_value": 100,
        "usage_limit": 1
    }))
    .await;

    let (status, body) = app
        .json(
            Method::POST,
            "/api/orders",
            Some(order_payload(product.id, 1, Some("FIRST1"), "user-a")),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");

    let (status, body) = app
        .json(
            Method::POST,
            "/api/orders",
            Some(order_payload(product.id, 1, Some("FIRST1"), "user-b")),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
    assert_eq!(body["details"], json!("usage_limit_reached"));

    let stored = app.state.services.products.get(product.id).await.unwrap();
    assert_eq!(stored.stock_quantity, 9);
    let (_, list) = app.json(Method::GET, "/api/orders", None).await;
    assert_eq!(list["data"]["total"], json!(1));
}

#[tokio::test]
async fn per_customer_limit_is_enforced() {
    let app = TestApp::new().await;
    app.seed_nairobi_cbd().await;
    let product = app.seed_product("HP-MOP", dec!(400), 10).await;
    app.seed_promo(json!({
        "code": "WELCOME",
        "discount_type": "FIXED",
        "discount_value": 50,
        "user_usage_limit": 1
    }))
    .await;

    let (status, _) = app
        .json(
            Method::POST,
            "/api/orders",
            Some(order_payload(product.id, 1, Some("WELCOME"), "user-1")),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = app
        .json(
            Method::POST,
            "/api/orders",
            Some(order_payload(product.id, 1, Some("WELCOME"), "user-1")),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["details"], json!("user_limit_reached"));

    let (status, _) = app
        .json(
            Method::POST,
            "/api/orders",
            Some(order_payload(product.id, 1, Some("WELCOME"), "user-2")),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn shipping_cost_is_frozen_at_checkout() {
    let app = TestApp::new().await;
    app.seed_nairobi_cbd().await;
    let product = app.seed_product("HP-PAN", dec!(1200), 10).await;

    let (_, created) = app
        .json(
            Method::POST,
            "/api/orders",
            Some(order_payload(product.id, 1, None, "user-1")),
        )
        .await;
    let order_number = created["data"]["order_number"].as_str().unwrap().to_string();

    let (status, _) = app
        .json(
            Method::PUT,
            "/api/delivery/locations/nairobi-cbd",
            Some(json!({"price": 180})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, fetched) = app
        .json(Method::GET, &format!("/api/orders/{order_number}"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(dec(&fetched["data"]["shipping_cost"]), dec!(100));
    assert_eq!(dec(&fetched["data"]["total"]), dec!(1300));
}

#[tokio::test]
async fn insufficient_stock_is_unprocessable() {
    let app = TestApp::new().await;
    app.seed_nairobi_cbd().await;
    let product = app.seed_product("HP-RARE", dec!(900), 1).await;

    let (status, _) = app
        .json(
            Method::POST,
            "/api/orders",
            Some(order_payload(product.id, 2, None, "user-1")),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let stored = app.state.services.products.get(product.id).await.unwrap();
    assert_eq!(stored.stock_quantity, 1);
}

#[tokio::test]
async fn unknown_location_fails_checkout() {
    let app = TestApp::new().await;
    let product = app.seed_product("HP-CUP", dec!(100), 5).await;

    let (status, body) = app
        .json(
            Method::POST,
            "/api/orders",
            Some(order_payload(product.id, 1, None, "user-1")),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["details"], json!("location_not_found"));
    let stored = app.state.services.products.get(product.id).await.unwrap();
    assert_eq!(stored.stock_quantity, 5);
}

#[tokio::test]
async fn status_transitions_are_checked_and_cancel_restocks() {
    let app = TestApp::new().await;
    app.seed_nairobi_cbd().await;
    let product = app.seed_product("HP-KETTLE", dec!(2500), 3).await;

    let (_, created) = app
        .json(
            Method::POST,
            "/api/orders",
            Some(order_payload(product.id, 2, None, "user-1")),
        )
        .await;
    let order_id = created["data"]["id"].as_str().unwrap().to_string();

    let (status, _) = app
        .json(
            Method::PUT,
            &format!("/api/orders/{order_id}/status"),
            Some(json!({"status": "SHIPPED"})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = app
        .json(
            Method::PUT,
            &format!("/api/orders/{order_id}/status"),
            Some(json!({"status": "CANCELLED", "notes": "Customer changed their mind"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["status"], json!("CANCELLED"));

    let stored = app.state.services.products.get(product.id).await.unwrap();
    assert_eq!(stored.stock_quantity, 3);
}
