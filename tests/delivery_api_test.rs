mod common;

use axum::http::{Method, StatusCode};
use common::{dec, TestApp};
use rust_decimal_macros::dec;
use serde_json::json;

#[tokio::test]
async fn quote_below_threshold_charges_location_price() {
    let app = TestApp::new().await;
    app.seed_nairobi_cbd().await;

    let (status, body) = app
        .json(
            Method::POST,
            "/api/delivery/quote",
            Some(json!({"location": "Nairobi CBD", "subtotal": 2000})),
        )
        .await;

    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(dec(&body["data"]["price"]), dec!(100));
    assert_eq!(body["data"]["free_shipping"], json!(false));
    assert_eq!(body["data"]["location_id"], json!("nairobi-cbd"));
}

#[tokio::test]
async fn quote_at_or_above_threshold_is_free() {
    let app = TestApp::new().await;
    app.seed_nairobi_cbd().await;

    for subtotal in [5000, 6000] {
        let (status, body) = app
            .json(
                Method::POST,
                "/api/delivery/quote",
                Some(json!({"location": "nairobi-cbd", "subtotal": subtotal, "express": true})),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(dec(&body["data"]["price"]), dec!(0));
        assert_eq!(body["data"]["free_shipping"], json!(true));
    }
}

#[tokio::test]
async fn express_uses_express_price_when_available() {
    let app = TestApp::new().await;
    app.seed_nairobi_cbd().await;

    let (status, body) = app
        .json(
            Method::POST,
            "/api/delivery/quote",
            Some(json!({"location": "nairobi-cbd", "subtotal": 1000, "express": true})),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(dec(&body["data"]["price"]), dec!(250));
    assert_eq!(body["data"]["express"], json!(true));
}

#[tokio::test]
async fn express_without_availability_is_rejected() {
    let app = TestApp::new().await;
    let (status, _) = app
        .json(
            Method::POST,
            "/api/delivery/locations",
            Some(json!({
                "name": "Kisumu",
                "tier": 3,
                "price": 500,
                "estimated_days": "2-3 days"
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = app
        .json(
            Method::POST,
            "/api/delivery/quote",
            Some(json!({"location": "kisumu", "subtotal": 1000, "express": true})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["details"], json!("express_not_available"));
}

#[tokio::test]
async fn unknown_location_is_not_found() {
    let app = TestApp::new().await;
    let (status, body) = app
        .json(
            Method::POST,
            "/api/delivery/quote",
            Some(json!({"location": "Atlantis", "subtotal": 1000})),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["details"], json!("location_not_found"));
}

#[tokio::test]
async fn name_lookup_is_case_sensitive() {
    let app = TestApp::new().await;
    app.seed_nairobi_cbd().await;

    let (status, _) = app
        .json(
            Method::POST,
            "/api/delivery/quote",
            Some(json!({"location": "nairobi cbd", "subtotal": 1000})),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn locations_are_managed_and_listed_by_tier() {
    let app = TestApp::new().await;
    app.seed_nairobi_cbd().await;
    let (status, created) = app
        .json(
            Method::POST,
            "/api/delivery/locations",
            Some(json!({"name": "Mombasa Town", "tier": 2, "price": 350, "estimated_days": "1-2 days"})),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["data"]["id"], json!("mombasa-town"));

    let (status, _) = app
        .json(
            Method::POST,
            "/api/delivery/locations",
            Some(json!({"name": "Mombasa Town", "tier": 2, "price": 1, "estimated_days": "1 day"})),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, updated) = app
        .json(
            Method::PUT,
            "/api/delivery/locations/mombasa-town",
            Some(json!({"price": 400})),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{updated}");
    assert_eq!(dec(&updated["data"]["price"]), dec!(400));

    let (status, list) = app.json(Method::GET, "/api/delivery/locations", None).await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<_> = list["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|l| l["name"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(names, vec!["Nairobi CBD", "Mombasa Town"]);

    let response = app
        .request(Method::DELETE, "/api/delivery/locations/mombasa-town", None)
        .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let (status, _) = app
        .json(Method::GET, "/api/delivery/locations/mombasa-town", None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn admin_routes_require_key_when_configured() {
    let app = TestApp::with_config(|cfg| cfg.admin_api_key = Some("s3cret".to_string())).await;
    let payload = json!({"name": "Thika", "tier": 2, "price": 300, "estimated_days": "1 day"});

    let response = app
        .request(Method::POST, "/api/delivery/locations", Some(payload.clone()))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .request_with_headers(
            Method::POST,
            "/api/delivery/locations",
            Some(payload.clone()),
            &[("x-admin-key", "wrong")],
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .request_with_headers(
            Method::POST,
            "/api/delivery/locations",
            Some(payload),
            &[("x-admin-key", "s3cret")],
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    // Storefront reads stay open
    let response = app.request(Method::GET, "/api/delivery/locations", None).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn update_can_withdraw_express_delivery() {
    let app = TestApp::new().await;
    app.seed_nairobi_cbd().await;

    let (status, updated) = app
        .json(
            Method::PUT,
            "/api/delivery/locations/nairobi-cbd",
            Some(json!({"express_available": false, "express_price": null})),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{updated}");
    assert_eq!(updated["data"]["express_available"], json!(false));
    assert_eq!(updated["data"]["express_price"], json!(null));
    assert_eq!(dec(&updated["data"]["price"]), dec!(100));

    let (status, body) = app
        .json(
            Method::POST,
            "/api/delivery/quote",
            Some(json!({"location": "nairobi-cbd", "subtotal": 1000, "express": true})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["details"], json!("express_not_available"));
}
