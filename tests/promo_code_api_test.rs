mod common;

use axum::http::{Method, StatusCode};
use chrono::{Duration, Utc};
use common::{dec, TestApp};
use rust_decimal_macros::dec;
use serde_json::json;

#[tokio::test]
async fn percentage_code_discounts_order() {
    let app = TestApp::new().await;
    app.seed_promo(json!({
        "code": "save10",
        "discount_type": "PERCENTAGE",
        "discount_value": 10,
        "min_order_amount": 1000
    }))
    .await;

    let (status, body) = app
        .json(
            Method::POST,
            "/api/promo-codes/validate",
            Some(json!({"code": "SAVE10", "order_amount": 1500})),
        )
        .await;

    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["valid"], json!(true));
    assert_eq!(dec(&body["data"]["discount_amount"]), dec!(150));
    assert_eq!(dec(&body["data"]["final_amount"]), dec!(1350));
}

#[tokio::test]
async fn fixed_code_discounts_order() {
    let app = TestApp::new().await;
    app.seed_promo(json!({
        "code": "FIXED100",
        "discount_type": "FIXED",
        "discount_value": 100,
        "min_order_amount": 500
    }))
    .await;

    let (status, body) = app
        .json(
            Method::POST,
            "/api/promo-codes/validate",
            Some(json!({"code": "fixed100", "order_amount": 800})),
        )
        .await;

    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(dec(&body["data"]["discount_amount"]), dec!(100));
    assert_eq!(dec(&body["data"]["final_amount"]), dec!(700));
}

#[tokio::test]
async fn percentage_discount_is_capped() {
    let app = TestApp::new().await;
    app.seed_promo(json!({
        "code": "HALF",
        "discount_type": "PERCENTAGE",
        "discount_value": 50,
        "max_discount": 300
    }))
    .await;

    let (_, body) = app
        .json(
            Method::POST,
            "/api/promo-codes/validate",
            Some(json!({"code": "HALF", "order_amount": 2000})),
        )
        .await;
    assert_eq!(dec(&body["data"]["discount_amount"]), dec!(300));
    assert_eq!(dec(&body["data"]["final_amount"]), dec!(1700));
}

#[tokio::test]
async fn rejections_carry_reason_codes() {
    let app = TestApp::new().await;
    app.seed_promo(json!({
        "code": "BIGSPEND",
        "discount_type": "FIXED",
        "discount_value": 200,
        "min_order_amount": 3000
    }))
    .await;
    app.seed_promo(json!({
        "code": "SLEEPING",
        "discount_type": "FIXED",
        "discount_value": 200,
        "is_active": false
    }))
    .await;
    app.seed_promo(json!({
        "code": "OLDNEWS",
        "discount_type": "FIXED",
        "discount_value": 200,
        "valid_from": (Utc::now() - Duration::days(30)).to_rfc3339(),
        "valid_until": (Utc::now() - Duration::days(1)).to_rfc3339()
    }))
    .await;

    let cases = [
        ("NOPE", StatusCode::NOT_FOUND, "not_found"),
        ("SLEEPING", StatusCode::BAD_REQUEST, "inactive"),
        ("OLDNEWS", StatusCode::BAD_REQUEST, "expired"),
        ("BIGSPEND", StatusCode::BAD_REQUEST, "minimum_not_met"),
    ];
    for (code, expected_status, reason) in cases {
        let (status, body) = app
            .json(
                Method::POST,
                "/api/promo-codes/validate",
                Some(json!({"code": code, "order_amount": 1000})),
            )
            .await;
        assert_eq!(status, expected_status, "{code}: {body}");
        assert_eq!(body["details"], json!(reason), "{code}");
    }
}

#[tokio::test]
async fn invalid_terms_are_rejected_on_create() {
    let app = TestApp::new().await;
    let (status, _) = app
        .json(
            Method::POST,
            "/api/promo-codes",
            Some(json!({"code": "TOOMUCH", "discount_type": "PERCENTAGE", "discount_value": 150})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    app.seed_promo(json!({"code": "ONCE", "discount_type": "FIXED", "discount_value": 50}))
        .await;
    let (status, _) = app
        .json(
            Method::POST,
            "/api/promo-codes",
            Some(json!({"code": "once", "discount_type": "FIXED", "discount_value": 50})),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn admin_can_update_and_deactivate() {
    let app = TestApp::new().await;
    let promo = app
        .seed_promo(json!({"code": "WEEKEND", "discount_type": "FIXED", "discount_value": 100}))
        .await;
    let id = promo["id"].as_str().unwrap();

    let (status, updated) = app
        .json(
            Method::PUT,
            &format!("/api/promo-codes/{id}"),
            Some(json!({"discount_value": 150, "usage_limit": 10})),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{updated}");
    assert_eq!(dec(&updated["data"]["discount_value"]), dec!(150));
    assert_eq!(updated["data"]["usage_limit"], json!(10));
    assert_eq!(updated["data"]["code"], json!("WEEKEND"));

    let (status, deactivated) = app
        .json(Method::DELETE, &format!("/api/promo-codes/{id}"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(deactivated["data"]["is_active"], json!(false));

    let (status, body) = app
        .json(
            Method::POST,
            "/api/promo-codes/validate",
            Some(json!({"code": "WEEKEND", "order_amount": 1000})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["details"], json!("inactive"));

    let (status, list) = app
        .json(Method::GET, "/api/promo-codes?active_only=true", None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list["data"]["total"], json!(0));
}

#[tokio::test]
async fn update_can_clear_optional_terms() {
    let app = TestApp::new().await;
    let promo = app
        .seed_promo(json!({
            "code": "CAPPED",
            "discount_type": "PERCENTAGE",
            "discount_value": 20,
            "max_discount": 300,
            "usage_limit": 5,
            "description": "Launch week"
        }))
        .await;
    let id = promo["id"].as_str().unwrap();

    let (status, updated) = app
        .json(
            Method::PUT,
            &format!("/api/promo-codes/{id}"),
            Some(json!({"max_discount": null, "usage_limit": null})),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{updated}");
    assert_eq!(updated["data"]["max_discount"], json!(null));
    assert_eq!(updated["data"]["usage_limit"], json!(null));
    assert_eq!(updated["data"]["description"], json!("Launch week"));
    assert_eq!(dec(&updated["data"]["discount_value"]), dec!(20));

    let (status, body) = app
        .json(
            Method::POST,
            "/api/promo-codes/validate",
            Some(json!({"code": "CAPPED", "order_amount": 5000})),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(dec(&body["data"]["discount_amount"]), dec!(1000));

    let (status, _) = app
        .json(
            Method::PUT,
            &format!("/api/promo-codes/{id}"),
            Some(json!({"usage_limit": 0})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn out_of_range_order_amount_is_rejected() {
    let app = TestApp::new().await;
    app.seed_promo(json!({"code": "SAVE10", "discount_type": "PERCENTAGE", "discount_value": 10}))
        .await;

    let (status, body) = app
        .json(
            Method::POST,
            "/api/promo-codes/validate",
            Some(json!({"code": "SAVE10", "order_amount": "79228162514264337593543950335"})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
}
