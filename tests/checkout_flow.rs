//! End-to-end checkout, webhook and admin flows through the HTTP router.

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use hmac::{Hmac, Mac};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::{json, Value};
use sha2::Sha256;
use shopcore::api::{Claims, Role};
use shopcore::domain::aggregates::{Cart, CartItem, Product, WebhookStatus};
use shopcore::domain::value_objects::Money;
use shopcore::gateway::stripe::sign_payload;
use shopcore::notify::NoopNotifier;
use shopcore::store::{InMemoryStore, Stores};
use shopcore::{router, AppConfig, AppState};
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const JWT_SECRET: &str = "test-jwt-secret";
const STRIPE_WEBHOOK_SECRET: &str = "whsec_test";
const RAZORPAY_KEY_SECRET: &str = "rzp_key_secret";

struct TestApp {
    app: Router,
    store: InMemoryStore,
    user: Uuid,
    _provider: MockServer,
}

async fn spawn(default_provider: &str) -> TestApp {
    let provider = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/payment_intents"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "pi_123", "client_secret": "pi_123_secret"})))
        .mount(&provider)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/orders"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "order_rzp_123", "amount": 200, "currency": "INR"})))
        .mount(&provider)
        .await;

    let vars = [
        ("JWT_ACCESS_SECRET", JWT_SECRET.to_string()),
        ("DEFAULT_PAYMENT_PROVIDER", default_provider.to_string()),
        ("STRIPE_SECRET_KEY", "sk_test".to_string()),
        ("STRIPE_WEBHOOK_SECRET", STRIPE_WEBHOOK_SECRET.to_string()),
        ("STRIPE_API_BASE", provider.uri()),
        ("RAZORPAY_KEY_ID", "rzp_key".to_string()),
        ("RAZORPAY_KEY_SECRET", RAZORPAY_KEY_SECRET.to_string()),
        ("RAZORPAY_API_BASE", provider.uri()),
    ];
    let config = AppConfig::from_lookup(|k| vars.iter().find(|(name, _)| *name == k).map(|(_, v)| v.clone())).unwrap();

    let store = InMemoryStore::new();
    let state = AppState::build(&config, Stores::in_memory(store.clone()), Arc::new(NoopNotifier), reqwest::Client::new());
    TestApp { app: router(state), store, user: Uuid::new_v4(), _provider: provider }
}

fn token(user: Uuid, role: Role) -> String {
    let exp = (chrono::Utc::now().timestamp() + 3600) as usize;
    encode(&Header::default(), &Claims { sub: user, role, exp }, &EncodingKey::from_secret(JWT_SECRET.as_bytes())).unwrap()
}

fn shipping() -> Value {
    json!({
        "fullName": "Asha Rao",
        "phone": "9876543210",
        "addressLine1": "12 MG Road",
        "city": "Bengaluru",
        "state": "Karnataka",
        "pincode": "560001"
    })
}

impl TestApp {
    fn stock_product(&self, price: i64, stock: i64) -> Uuid {
        let product = Product::new("Widget", Money::from_minor(price), stock);
        let id = product.id;
        self.store.put_product(product);
        id
    }

    fn fill_cart(&self, product_id: Uuid, qty: u32) {
        let line = CartItem { product_id, title: "Widget".into(), unit_price: Money::from_minor(1), qty };
        self.store.put_cart(Cart::with_items(self.user, vec![line]));
    }

    async fn send(&self, method: Method, uri: &str, bearer: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri).header("content-type", "application/json");
        if let Some(bearer) = bearer {
            request = request.header("authorization", format!("Bearer {bearer}"));
        }
        let body = body.map_or_else(Body::empty, |b| Body::from(b.to_string()));
        self.call(request.body(body).unwrap()).await
    }

    async fn call(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    async fn checkout(&self, payment_method: &str) -> (StatusCode, Value) {
        let body = json!({"shippingAddress": shipping(), "paymentMethod": payment_method});
        self.send(Method::POST, "/checkout/create-order", Some(&token(self.user, Role::User)), Some(body)).await
    }

    async fn webhook(&self, provider: &str, header: &str, signature: &str, body: &[u8]) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(Method::POST)
            .uri(format!("/webhooks/{provider}"))
            .header("content-type", "application/json")
            .header(header, signature)
            .body(Body::from(body.to_vec()))
            .unwrap();
        self.call(request).await
    }

    async fn stripe_event(&self, event_type: &str) -> (StatusCode, Value) {
        let body = json!({
            "id": format!("evt_{}", Uuid::new_v4().simple()),
            "type": event_type,
            "data": {"object": {"id": "pi_123", "metadata": {}, "last_payment_error": {"message": "Card declined"}}}
        })
        .to_string();
        let signature = sign_payload(STRIPE_WEBHOOK_SECRET, body.as_bytes(), chrono::Utc::now().timestamp());
        self.webhook("stripe", "stripe-signature", &signature, body.as_bytes()).await
    }

    async fn order(&self, order_id: &str) -> Value {
        let (status, body) = self.send(Method::GET, &format!("/orders/{order_id}"), Some(&token(self.user, Role::User)), None).await;
        assert_eq!(status, StatusCode::OK);
        body
    }
}

#[tokio::test]
async fn cod_checkout_reserves_stock() {
    let t = spawn("stripe").await;
    let product = t.stock_product(100, 5);
    t.fill_cart(product, 2);

    let (status, body) = t.checkout("COD").await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["order"]["status"], "COD_CONFIRMED");
    assert_eq!(body["order"]["totalAmount"], 200);
    assert!(body["order"]["orderId"].as_str().unwrap().starts_with("ORD-"));
    assert!(body["paymentData"].is_null());
    assert_eq!(t.store.stock_of(product), Some(3));
}

#[tokio::test]
async fn short_stock_is_rejected_without_side_effects() {
    let t = spawn("stripe").await;
    let product = t.stock_product(100, 1);
    t.fill_cart(product, 2);

    let (status, body) = t.checkout("COD").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "STOCK_VALIDATION_FAILED");
    assert_eq!(body["issues"][0]["productId"], product.to_string());
    assert_eq!(body["issues"][0]["issue"], "Only 1 items available");
    assert_eq!(t.store.stock_of(product), Some(1));
}

#[tokio::test]
async fn empty_cart_and_bad_address_are_rejected() {
    let t = spawn("stripe").await;
    let (status, body) = t.checkout("COD").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "EMPTY_CART");

    let mut address = shipping();
    address["pincode"] = json!("12");
    let body = json!({"shippingAddress": address, "paymentMethod": "COD"});
    let (status, body) = t.send(Method::POST, "/checkout/create-order", Some(&token(t.user, Role::User)), Some(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn stripe_payment_success_marks_order_paid() {
    let t = spawn("stripe").await;
    let product = t.stock_product(100, 5);
    t.fill_cart(product, 2);

    let (status, body) = t.checkout("ONLINE").await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["order"]["status"], "PENDING");
    assert_eq!(body["order"]["paymentProvider"], "stripe");
    assert_eq!(body["paymentData"]["paymentIntentId"], "pi_123");
    assert_eq!(body["paymentData"]["clientSecret"], "pi_123_secret");
    let order_id = body["order"]["orderId"].as_str().unwrap().to_string();

    let (status, body) = t.stripe_event("payment_intent.succeeded").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Webhook processed successfully");

    let order = t.order(&order_id).await;
    assert_eq!(order["status"], "PAID");
    assert_eq!(order["providerReference"]["externalPaymentId"], "pi_123");
    let logs = t.store.webhook_logs();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].status, WebhookStatus::Success);
    assert_eq!(logs[0].order_id.as_deref(), Some(order_id.as_str()));
}

#[tokio::test]
async fn forged_webhook_is_logged_and_ignored() {
    let t = spawn("stripe").await;
    let product = t.stock_product(100, 5);
    t.fill_cart(product, 1);
    let (_, body) = t.checkout("ONLINE").await;
    let order_id = body["order"]["orderId"].as_str().unwrap().to_string();

    let payload = json!({"id": "evt_1", "type": "payment_intent.succeeded", "data": {"object": {"id": "pi_123"}}}).to_string();
    let forged = sign_payload("whsec_attacker", payload.as_bytes(), chrono::Utc::now().timestamp());
    let (status, body) = t.webhook("stripe", "stripe-signature", &forged, payload.as_bytes()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_SIGNATURE");

    assert_eq!(t.order(&order_id).await["status"], "PENDING");
    let logs = t.store.webhook_logs();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].status, WebhookStatus::Failed);
    assert_eq!(logs[0].error_message.as_deref(), Some("Invalid signature"));
}

#[tokio::test]
async fn duplicate_failure_webhook_restores_stock_once() {
    let t = spawn("stripe").await;
    let product = t.stock_product(100, 5);
    t.fill_cart(product, 2);
    let (_, body) = t.checkout("ONLINE").await;
    let order_id = body["order"]["orderId"].as_str().unwrap().to_string();
    assert_eq!(t.store.stock_of(product), Some(3));

    for _ in 0..2 {
        let (status, _) = t.stripe_event("payment_intent.payment_failed").await;
        assert_eq!(status, StatusCode::OK);
    }

    let order = t.order(&order_id).await;
    assert_eq!(order["status"], "CANCELLED");
    assert_eq!(order["failureReason"], "Card declined");
    assert_eq!(t.store.stock_of(product), Some(5));
    assert_eq!(t.store.webhook_logs().len(), 2);
}

#[tokio::test]
async fn admin_cannot_reopen_cod_order() {
    let t = spawn("stripe").await;
    let product = t.stock_product(100, 5);
    t.fill_cart(product, 1);
    let (_, body) = t.checkout("COD").await;
    let uri = format!("/orders/{}/status", body["order"]["orderId"].as_str().unwrap());
    let admin = token(Uuid::new_v4(), Role::Admin);

    let (status, body) = t.send(Method::PATCH, &uri, Some(&admin), Some(json!({"status": "PENDING"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_TRANSITION");
    assert_eq!(body["currentStatus"], "COD_CONFIRMED");
    assert_eq!(body["allowedTransitions"], json!(["COMPLETED", "CANCELLED"]));

    let (status, body) = t.send(Method::PATCH, &uri, Some(&admin), Some(json!({"status": "SHIPPED"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_STATUS");
    assert_eq!(body["validStatuses"].as_array().unwrap().len(), 5);

    let (status, body) = t.send(Method::PATCH, &uri, Some(&admin), Some(json!({"status": "CANCELLED"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "CANCELLED");
    assert_eq!(t.store.stock_of(product), Some(5));
}

#[tokio::test]
async fn status_changes_require_admin() {
    let t = spawn("stripe").await;
    let (status, body) = t.send(Method::PATCH, "/orders/ORD-1-X/status", None, Some(json!({"status": "PAID"}))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "NO_TOKEN");

    let user = token(t.user, Role::User);
    let (status, body) = t.send(Method::PATCH, "/orders/ORD-1-X/status", Some(&user), Some(json!({"status": "PAID"}))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "ADMIN_ONLY");
}

#[tokio::test]
async fn cod_confirmation_is_owner_only() {
    let t = spawn("stripe").await;
    let product = t.stock_product(100, 5);
    t.fill_cart(product, 1);
    let (_, body) = t.checkout("COD").await;
    let uri = format!("/checkout/confirm-cod/{}", body["order"]["orderId"].as_str().unwrap());

    let stranger = token(Uuid::new_v4(), Role::User);
    let (status, body) = t.send(Method::POST, &uri, Some(&stranger), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "ORDER_NOT_FOUND");

    let (status, body) = t.send(Method::POST, &uri, Some(&token(t.user, Role::User)), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "COMPLETED");
    assert!(body["completedAt"].is_string());
}

#[tokio::test]
async fn order_total_is_frozen_at_checkout() {
    let t = spawn("stripe").await;
    let product = t.stock_product(100, 5);
    t.fill_cart(product, 2);
    let (_, body) = t.checkout("COD").await;
    let order_id = body["order"]["orderId"].as_str().unwrap().to_string();

    t.store.set_product_price(product, Money::from_minor(150));
    let order = t.order(&order_id).await;
    assert_eq!(order["totalAmount"], 200);
    assert_eq!(order["items"][0]["unitPrice"], 100);
}

#[tokio::test]
async fn razorpay_client_confirmation_is_verified() {
    let t = spawn("razorpay").await;
    let product = t.stock_product(100, 5);
    t.fill_cart(product, 2);
    let (status, body) = t.checkout("ONLINE").await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["paymentData"]["orderId"], "order_rzp_123");
    assert_eq!(body["paymentData"]["keyId"], "rzp_key");
    let uri = format!("/checkout/verify-payment/{}", body["order"]["orderId"].as_str().unwrap());
    let user = token(t.user, Role::User);

    let mut mac = Hmac::<Sha256>::new_from_slice(RAZORPAY_KEY_SECRET.as_bytes()).unwrap();
    mac.update(b"order_rzp_123|pay_9");
    let signature = hex::encode(mac.finalize().into_bytes());

    let forged = json!({"razorpayOrderId": "order_rzp_123", "razorpayPaymentId": "pay_9", "razorpaySignature": "00"});
    let (status, body) = t.send(Method::POST, &uri, Some(&user), Some(forged)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_SIGNATURE");

    let mismatched = json!({"razorpayOrderId": "order_other", "razorpayPaymentId": "pay_9", "razorpaySignature": signature});
    let (status, body) = t.send(Method::POST, &uri, Some(&user), Some(mismatched)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "PAYMENT_MISMATCH");

    let genuine = json!({"razorpayOrderId": "order_rzp_123", "razorpayPaymentId": "pay_9", "razorpaySignature": signature});
    let (status, body) = t.send(Method::POST, &uri, Some(&user), Some(genuine)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["order"]["status"], "PENDING");
    assert_eq!(body["order"]["providerReference"]["externalPaymentId"], "pay_9");
}

#[tokio::test]
async fn razorpay_capture_webhook_completes_payment() {
    let t = spawn("razorpay").await;
    let product = t.stock_product(100, 5);
    t.fill_cart(product, 2);
    let (_, body) = t.checkout("ONLINE").await;
    let order_id = body["order"]["orderId"].as_str().unwrap().to_string();

    let payload = json!({
        "event": "payment.captured",
        "payload": {"payment": {"entity": {"id": "pay_42", "order_id": "order_rzp_123", "notes": {"orderId": order_id}}}}
    })
    .to_string();
    let mut mac = Hmac::<Sha256>::new_from_slice(RAZORPAY_KEY_SECRET.as_bytes()).unwrap();
    mac.update(payload.as_bytes());
    let signature = hex::encode(mac.finalize().into_bytes());

    let (status, _) = t.webhook("razorpay", "x-razorpay-signature", &signature, payload.as_bytes()).await;
    assert_eq!(status, StatusCode::OK);
    let order = t.order(&order_id).await;
    assert_eq!(order["status"], "PAID");
    assert_eq!(order["providerReference"]["externalPaymentId"], "pay_42");
}

#[tokio::test]
async fn admin_listing_and_stats() {
    let t = spawn("stripe").await;
    let product = t.stock_product(100, 10);
    for _ in 0..2 {
        t.fill_cart(product, 1);
        t.checkout("COD").await;
    }
    let admin = token(Uuid::new_v4(), Role::Admin);

    let (status, body) = t.send(Method::GET, "/orders?status=COD_CONFIRMED", Some(&admin), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 2);
    assert_eq!(body["statusCounts"]["COD_CONFIRMED"], 2);

    let (status, body) = t.send(Method::GET, "/orders/my", Some(&token(t.user, Role::User)), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 2);

    let (status, body) = t.send(Method::GET, "/orders/admin/stats", Some(&admin), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["totalOrders"], 2);
    assert_eq!(body["totalRevenue"], 0);
}
