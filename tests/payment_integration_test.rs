mod common;

use axum::http::{Method, StatusCode};
use common::{dec, into_json, TestApp};
use hmac::{Hmac, Mac};
use household_planet_api::config::{MpesaConfig, StripeConfig};
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use sha2::Sha256;
use wiremock::{
    matchers::{header, method, path},
    Mock, MockServer, ResponseTemplate,
};

const STRIPE_WEBHOOK_SECRET: &str = "whsec_test_secret";

/// Seeds a location and product, then checks out one order totalling KES 1450.
async fn place_order(app: &TestApp) -> Value {
    app.seed_nairobi_cbd().await;
    let product = app.seed_product("HP-BLENDER", dec!(1350), 5).await;
    let (status, body) = app
        .json(
            Method::POST,
            "/api/orders",
            Some(json!({
                "customer_name": "Otieno Odhiambo",
                "customer_phone": "+254 712 345 678",
                "delivery_location": "nairobi-cbd",
                "items": [{"product_id": product.id, "quantity": 1}]
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(dec(&body["data"]["total"]), dec!(1450));
    body["data"].clone()
}

async fn initiate(app: &TestApp, order_id: &str, provider: &str) -> (StatusCode, Value) {
    app.json(
        Method::POST,
        "/api/payments/initiate",
        Some(json!({"order_id": order_id, "provider": provider})),
    )
    .await
}

async fn order_state(app: &TestApp, order_id: &str) -> Value {
    let (status, body) = app
        .json(Method::GET, &format!("/api/orders/{order_id}"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    body["data"].clone()
}

fn mpesa_config(base_url: String) -> MpesaConfig {
    MpesaConfig {
        consumer_key: "consumer".to_string(),
        consumer_secret: "secret".to_string(),
        shortcode: "174379".to_string(),
        passkey: "passkey".to_string(),
        callback_url: "https://shop.example.co.ke/api/payments/mpesa/callback".to_string(),
        base_url,
        transaction_type: "CustomerPayBillOnline".to_string(),
    }
}

fn stripe_config(base_url: String) -> StripeConfig {
    StripeConfig {
        secret_key: "sk_test_123".to_string(),
        webhook_secret: Some(STRIPE_WEBHOOK_SECRET.to_string()),
        base_url,
        webhook_tolerance_secs: 300,
    }
}

fn stripe_signature(body: &[u8]) -> String {
    let ts = chrono::Utc::now().timestamp();
    let mut mac = Hmac::<Sha256>::new_from_slice(STRIPE_WEBHOOK_SECRET.as_bytes()).unwrap();
    mac.update(format!("{ts}.").as_bytes());
    mac.update(body);
    format!("t={},v1={}", ts, hex::encode(mac.finalize().into_bytes()))
}

fn stk_callback(checkout_request_id: &str, result_code: i64) -> Value {
    if result_code == 0 {
        json!({"Body": {"stkCallback": {
            "MerchantRequestID": "29115-34620561-1",
            "CheckoutRequestID": checkout_request_id,
            "ResultCode": 0,
            "ResultDesc": "The service request is processed successfully.",
            "CallbackMetadata": {"Item": [
                {"Name": "Amount", "Value": 1450},
                {"Name": "MpesaReceiptNumber", "Value": "QKJ7RT61SV"},
                {"Name": "PhoneNumber", "Value": 254712345678u64}
            ]}
        }}})
    } else {
        json!({"Body": {"stkCallback": {
            "CheckoutRequestID": checkout_request_id,
            "ResultCode": result_code,
            "ResultDesc": "Request cancelled by user"
        }}})
    }
}

#[tokio::test]
async fn cash_on_delivery_is_settled_by_admin_confirmation() {
    let app = TestApp::new().await;
    let order = place_order(&app).await;
    let order_id = order["id"].as_str().unwrap();

    let (status, body) = initiate(&app, order_id, "CASH_ON_DELIVERY").await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let tx = &body["data"]["transaction"];
    assert_eq!(tx["status"], json!("PENDING"));
    assert_eq!(dec(&tx["amount"]), dec!(1450));
    let expected_prefix = format!("COD-{}-", order["order_number"].as_str().unwrap());
    assert!(tx["provider_reference"]
        .as_str()
        .unwrap()
        .starts_with(&expected_prefix));
    assert!(body["data"]["instructions"].as_str().unwrap().contains("Nairobi CBD"));

    let tx_id = tx["id"].as_str().unwrap();
    let (status, confirmed) = app
        .json(
            Method::POST,
            &format!("/api/payments/{tx_id}/confirm"),
            Some(json!({"external_transaction_id": "RIDER-42"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{confirmed}");
    assert_eq!(confirmed["data"]["status"], json!("COMPLETED"));
    assert_eq!(confirmed["data"]["external_transaction_id"], json!("RIDER-42"));

    let order = order_state(&app, order_id).await;
    assert_eq!(order["payment_status"], json!("PAID"));
    assert_eq!(order["status"], json!("CONFIRMED"));
    assert_eq!(dec(&order["paid_amount"]), dec!(1450));
    assert_eq!(order["payment_method"], json!("CASH_ON_DELIVERY"));

    // A second confirmation changes nothing
    let (status, again) = app
        .json(
            Method::POST,
            &format!("/api/payments/{tx_id}/confirm"),
            Some(json!({})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(again["data"]["status"], json!("COMPLETED"));
    let order = order_state(&app, order_id).await;
    assert_eq!(dec(&order["paid_amount"]), dec!(1450));

    let (status, _) = initiate(&app, order_id, "BANK_TRANSFER").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn partial_bank_transfers_accumulate() {
    let app = TestApp::new().await;
    let order = place_order(&app).await;
    let order_id = order["id"].as_str().unwrap();

    let (_, first) = initiate(&app, order_id, "BANK_TRANSFER").await;
    let first_id = first["data"]["transaction"]["id"].as_str().unwrap().to_string();
    let (status, _) = app
        .json(
            Method::POST,
            &format!("/api/payments/{first_id}/confirm"),
            Some(json!({"amount": 500})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let order_after_first = order_state(&app, order_id).await;
    assert_eq!(order_after_first["payment_status"], json!("PARTIALLY_PAID"));
    assert_eq!(dec(&order_after_first["paid_amount"]), dec!(500));

    let (status, second) = initiate(&app, order_id, "BANK_TRANSFER").await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(dec(&second["data"]["transaction"]["amount"]), dec!(950));

    let second_id = second["data"]["transaction"]["id"].as_str().unwrap().to_string();
    app.json(
        Method::POST,
        &format!("/api/payments/{second_id}/confirm"),
        Some(json!({})),
    )
    .await;

    let order = order_state(&app, order_id).await;
    assert_eq!(order["payment_status"], json!("PAID"));
    assert_eq!(dec(&order["paid_amount"]), dec!(1450));

    let (status, payments) = app
        .json(Method::GET, &format!("/api/payments/order/{order_id}"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(payments["data"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn rejected_manual_payment_marks_order_failed() {
    let app = TestApp::new().await;
    let order = place_order(&app).await;
    let order_id = order["id"].as_str().unwrap();

    let (_, initiated) = initiate(&app, order_id, "BANK_TRANSFER").await;
    let tx_id = initiated["data"]["transaction"]["id"].as_str().unwrap().to_string();

    let (status, body) = app
        .json(
            Method::POST,
            &format!("/api/payments/{tx_id}/confirm"),
            Some(json!({"success": false, "reason": "Transfer never arrived"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["status"], json!("FAILED"));
    assert_eq!(body["data"]["failure_reason"], json!("Transfer never arrived"));

    let order = order_state(&app, order_id).await;
    assert_eq!(order["payment_status"], json!("FAILED"));
    assert_eq!(order["status"], json!("PENDING"));
}

#[tokio::test]
async fn manual_payment_can_be_retried_after_failure() {
    let app = TestApp::new().await;
    let order = place_order(&app).await;
    let order_id = order["id"].as_str().unwrap();

    let (_, first) = initiate(&app, order_id, "CASH_ON_DELIVERY").await;
    let first_tx = &first["data"]["transaction"];
    let first_id = first_tx["id"].as_str().unwrap().to_string();
    let (status, _) = app
        .json(
            Method::POST,
            &format!("/api/payments/{first_id}/confirm"),
            Some(json!({"success": false, "reason": "Customer not home"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, second) = initiate(&app, order_id, "CASH_ON_DELIVERY").await;
    assert_eq!(status, StatusCode::CREATED, "{second}");
    let second_tx = &second["data"]["transaction"];
    let second_id = second_tx["id"].as_str().unwrap().to_string();
    assert_ne!(second_tx["provider_reference"], first_tx["provider_reference"]);

    let (status, confirmed) = app
        .json(
            Method::POST,
            &format!("/api/payments/{second_id}/confirm"),
            Some(json!({})),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{confirmed}");
    assert_eq!(confirmed["data"]["id"], json!(second_id));
    assert_eq!(confirmed["data"]["status"], json!("COMPLETED"));

    let (_, stored_first) = app
        .json(Method::GET, &format!("/api/payments/{first_id}"), None)
        .await;
    assert_eq!(stored_first["data"]["status"], json!("FAILED"));

    let order = order_state(&app, order_id).await;
    assert_eq!(order["payment_status"], json!("PAID"));
    assert_eq!(order["status"], json!("CONFIRMED"));
    assert_eq!(dec(&order["paid_amount"]), dec!(1450));
}

#[tokio::test]
async fn unconfigured_provider_is_rejected() {
    let app = TestApp::new().await;
    let order = place_order(&app).await;

    let (status, _) = initiate(&app, order["id"].as_str().unwrap(), "STRIPE").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, providers) = app.json(Method::GET, "/api/payments/providers", None).await;
    assert_eq!(
        providers["data"],
        json!(["BANK_TRANSFER", "CASH_ON_DELIVERY"])
    );
}

#[tokio::test]
async fn mpesa_stk_push_and_callback_reconcile_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/oauth/v1/generate"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"access_token": "daraja-token", "expires_in": "3599"})),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/mpesa/stkpush/v1/processrequest"))
        .and(header("authorization", "Bearer daraja-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "MerchantRequestID": "29115-34620561-1",
            "CheckoutRequestID": "ws_CO_191220191020363925",
            "ResponseCode": "0",
            "ResponseDescription": "Success. Request accepted for processing",
            "CustomerMessage": "Success. Request accepted for processing"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let uri = server.uri();
    let app = TestApp::with_config(move |cfg| cfg.mpesa = Some(mpesa_config(uri))).await;
    let order = place_order(&app).await;
    let order_id = order["id"].as_str().unwrap();

    let (status, body) = initiate(&app, order_id, "MPESA").await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(
        body["data"]["transaction"]["provider_reference"],
        json!("ws_CO_191220191020363925")
    );
    assert_eq!(body["data"]["transaction"]["phone_number"], json!("254712345678"));

    let callback = serde_json::to_vec(&stk_callback("ws_CO_191220191020363925", 0)).unwrap();
    for _ in 0..2 {
        let response = app
            .post_raw("/api/payments/mpesa/callback", &callback, &[])
            .await;
        let (status, ack) = into_json(response).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(ack, json!({"ResultCode": 0, "ResultDesc": "Accepted"}));
    }

    let order = order_state(&app, order_id).await;
    assert_eq!(order["payment_status"], json!("PAID"));
    assert_eq!(dec(&order["paid_amount"]), dec!(1450));

    let tx_id = body["data"]["transaction"]["id"].as_str().unwrap();
    let (_, tx) = app.json(Method::GET, &format!("/api/payments/{tx_id}"), None).await;
    assert_eq!(tx["data"]["status"], json!("COMPLETED"));
    assert_eq!(tx["data"]["external_transaction_id"], json!("QKJ7RT61SV"));
}

#[tokio::test]
async fn mpesa_rejection_marks_transaction_failed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/oauth/v1/generate"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"access_token": "daraja-token"})),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/mpesa/stkpush/v1/processrequest"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "requestId": "11728-2929992-1",
            "errorCode": "400.002.02",
            "errorMessage": "Bad Request - Invalid PhoneNumber"
        })))
        .mount(&server)
        .await;

    let uri = server.uri();
    let app = TestApp::with_config(move |cfg| cfg.mpesa = Some(mpesa_config(uri))).await;
    let order = place_order(&app).await;
    let order_id = order["id"].as_str().unwrap();

    let (status, body) = initiate(&app, order_id, "MPESA").await;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED, "{body}");

    let (_, payments) = app
        .json(Method::GET, &format!("/api/payments/order/{order_id}"), None)
        .await;
    let payments = payments["data"].as_array().unwrap();
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0]["status"], json!("FAILED"));
}

#[tokio::test]
async fn mpesa_payment_can_be_retried_after_cancellation() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/oauth/v1/generate"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"access_token": "daraja-token"})),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/mpesa/stkpush/v1/processrequest"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "CheckoutRequestID": "ws_CO_cancelled",
            "ResponseCode": "0",
            "CustomerMessage": "Success"
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/mpesa/stkpush/v1/processrequest"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "CheckoutRequestID": "ws_CO_retry",
            "ResponseCode": "0",
            "CustomerMessage": "Success"
        })))
        .mount(&server)
        .await;

    let uri = server.uri();
    let app = TestApp::with_config(move |cfg| cfg.mpesa = Some(mpesa_config(uri))).await;
    let order = place_order(&app).await;
    let order_id = order["id"].as_str().unwrap();
    initiate(&app, order_id, "MPESA").await;

    let callback = serde_json::to_vec(&stk_callback("ws_CO_cancelled", 1032)).unwrap();
    let response = app
        .post_raw("/api/payments/mpesa/callback", &callback, &[])
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let order = order_state(&app, order_id).await;
    assert_eq!(order["payment_status"], json!("FAILED"));

    let (status, retry) = initiate(&app, order_id, "MPESA").await;
    assert_eq!(status, StatusCode::CREATED, "{retry}");
    assert_eq!(
        retry["data"]["transaction"]["provider_reference"],
        json!("ws_CO_retry")
    );

    let callback = serde_json::to_vec(&stk_callback("ws_CO_retry", 0)).unwrap();
    let response = app
        .post_raw("/api/payments/mpesa/callback", &callback, &[])
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let order = order_state(&app, order_id).await;
    assert_eq!(order["payment_status"], json!("PAID"));
    assert_eq!(dec(&order["paid_amount"]), dec!(1450));

    let retry_id = retry["data"]["transaction"]["id"].as_str().unwrap();
    let (_, tx) = app
        .json(Method::GET, &format!("/api/payments/{retry_id}"), None)
        .await;
    assert_eq!(tx["data"]["status"], json!("COMPLETED"));
}

#[tokio::test]
async fn stripe_webhook_requires_valid_signature() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/payment_intents"))
        .and(header("authorization", "Bearer sk_test_123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "pi_3MtwBwLkdIwHu7ix28a3tqPa",
            "object": "payment_intent",
            "amount": 145000,
            "client_secret": "pi_3MtwBwLkdIwHu7ix28a3tqPa_secret_YrKJUKribcBjcG8HVhfZluoGH",
            "status": "requires_payment_method"
        })))
        .mount(&server)
        .await;

    let uri = server.uri();
    let app = TestApp::with_config(move |cfg| cfg.stripe = Some(stripe_config(uri))).await;
    let order = place_order(&app).await;
    let order_id = order["id"].as_str().unwrap();

    let (status, initiated) = initiate(&app, order_id, "STRIPE").await;
    assert_eq!(status, StatusCode::CREATED, "{initiated}");
    assert!(initiated["data"]["client_secret"]
        .as_str()
        .unwrap()
        .starts_with("pi_3MtwBwLkdIwHu7ix28a3tqPa_secret"));

    let event = serde_json::to_vec(&json!({
        "id": "evt_1",
        "type": "payment_intent.succeeded",
        "data": {"object": {
            "id": "pi_3MtwBwLkdIwHu7ix28a3tqPa",
            "amount_received": 145000,
            "latest_charge": "ch_3MtwBwLkdIwHu7ix28a3tqPa"
        }}
    }))
    .unwrap();

    let response = app
        .post_raw("/api/payments/stripe/webhook", &event, &[])
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .post_raw(
            "/api/payments/stripe/webhook",
            &event,
            &[("stripe-signature", "t=1,v1=deadbeef")],
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let signature = stripe_signature(&event);
    let response = app
        .post_raw(
            "/api/payments/stripe/webhook",
            &event,
            &[("stripe-signature", signature.as_str())],
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let order = order_state(&app, order_id).await;
    assert_eq!(order["payment_status"], json!("PAID"));
    assert_eq!(order["status"], json!("CONFIRMED"));

    let other = serde_json::to_vec(&json!({
        "id": "evt_2",
        "type": "customer.created",
        "data": {"object": {"id": "cus_NffrFeUfNV2Hib"}}
    }))
    .unwrap();
    let signature = stripe_signature(&other);
    let response = app
        .post_raw(
            "/api/payments/stripe/webhook",
            &other,
            &[("stripe-signature", signature.as_str())],
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let (_, body) = into_json(response).await;
    assert_eq!(body, json!({"received": true}));
}

#[tokio::test]
async fn callback_for_unknown_reference_is_not_found() {
    let app = TestApp::new().await;
    let response = app
        .request(
            Method::POST,
            "/api/payments/00000000-0000-4000-8000-000000000000/confirm",
            Some(json!({})),
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
