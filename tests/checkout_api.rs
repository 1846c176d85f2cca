use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use medixmall_checkout::api::{self, AppState};
use medixmall_checkout::domain::pricing::PricingPolicy;
use medixmall_checkout::domain::value_objects::Money;
use medixmall_checkout::gateway::{signature, GatewayError, GatewayOrder, PaymentGateway};
use medixmall_checkout::notify::MemoryPublisher;
use medixmall_checkout::{CheckoutService, MemoryStore};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

const KEY_SECRET: &str = "test_key_secret";
const WEBHOOK_SECRET: &str = "test_webhook_secret";
const ADMIN_TOKEN: &str = "admin-secret";

#[derive(Default)]
struct FakeRazorpay { orders: AtomicUsize }

#[async_trait]
impl PaymentGateway for FakeRazorpay {
    fn key_id(&self) -> &str { "rzp_test_123" }

    async fn create_order(&self, amount: &Money, _receipt: &str) -> Result<GatewayOrder, GatewayError> {
        let n = self.orders.fetch_add(1, Ordering::SeqCst);
        Ok(GatewayOrder { id: format!("order_test_{n}"), amount_minor: amount.minor_units(), currency: amount.currency().to_string() })
    }

    async fn refund(&self, _gateway_payment_id: &str, _amount: &Money) -> Result<String, GatewayError> {
        Ok("rfnd_test".into())
    }

    fn verify_payment_signature(&self, order_id: &str, payment_id: &str, sig: &str) -> bool {
        signature::verify_payment_signature(KEY_SECRET, order_id, payment_id, sig)
    }

    fn verify_webhook_signature(&self, body: &[u8], sig: &str) -> bool {
        signature::verify_webhook_signature(WEBHOOK_SECRET, body, sig)
    }
}

fn app() -> Router {
    let service = CheckoutService::new(
        Arc::new(MemoryStore::new()),
        Arc::new(FakeRazorpay::default()),
        Arc::new(MemoryPublisher::default()),
        PricingPolicy::default(),
    );
    api::router(AppState { service: Arc::new(service), admin_token: Some(ADMIN_TOKEN.into()) })
}

enum Caller { Anonymous, User(Uuid), Admin }

async fn send(app: &Router, method: Method, uri: &str, caller: Caller, body: Option<Value>) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri).header("content-type", "application/json");
    request = match caller {
        Caller::Anonymous => request,
        Caller::User(id) => request.header(api::USER_HEADER, id.to_string()),
        Caller::Admin => request.header(api::ADMIN_HEADER, ADMIN_TOKEN),
    };
    let body = body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty);
    let response = app.clone().oneshot(request.body(body).unwrap()).await.unwrap();
    read(response).await
}

async fn read(response: axum::response::Response) -> (StatusCode, Value) {
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
    (status, value)
}

async fn webhook(app: &Router, body: &Value, event_id: &str) -> (StatusCode, Value) {
    let raw = body.to_string();
    let sig = signature::sign(WEBHOOK_SECRET, raw.as_bytes());
    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/v1/payments/webhook")
        .header(api::SIGNATURE_HEADER, sig)
        .header(api::EVENT_ID_HEADER, event_id)
        .body(Body::from(raw))
        .unwrap();
    read(app.clone().oneshot(request).await.unwrap()).await
}

async fn create_product(app: &Router, sku: &str, product_type: &str, price: &str, stock: u32) -> String {
    let body = json!({ "sku": sku, "name": sku, "product_type": product_type, "price": price, "stock": stock });
    let (status, product) = send(app, Method::POST, "/api/v1/admin/products", Caller::Admin, Some(body)).await;
    assert_eq!(status, StatusCode::CREATED, "{product}");
    product["id"].as_str().unwrap().to_string()
}

async fn add_to_cart(app: &Router, user: Uuid, product_id: &str, quantity: u32) -> (StatusCode, Value) {
    send(app, Method::POST, "/api/v1/cart/items", Caller::User(user), Some(json!({ "product_id": product_id, "quantity": quantity }))).await
}

fn checkout_body(method: &str, key: &str) -> Value {
    json!({
        "payment_method": method,
        "checkout_key": key,
        "shipping_address": {
            "name": "Asha Rao", "phone": "9876543210", "line1": "12 MG Road",
            "city": "Bengaluru", "state": "Karnataka", "pincode": "560001"
        }
    })
}

#[tokio::test]
async fn health_check() {
    let (status, body) = send(&app(), Method::GET, "/health", Caller::Anonymous, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn user_routes_require_identity() {
    let app = app();
    let (status, body) = send(&app, Method::GET, "/api/v1/cart", Caller::Anonymous, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn admin_routes_require_token() {
    let app = app();
    let body = json!({ "sku": "X-1", "name": "X", "price": "10" });
    let (status, _) = send(&app, Method::POST, "/api/v1/admin/products", Caller::User(Uuid::new_v4()), Some(body)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn invalid_bodies_are_rejected() {
    let app = app();
    let user = Uuid::new_v4();
    let product = create_product(&app, "ORS-1", "wellness", "25.00", 10).await;

    let (status, _) = add_to_cart(&app, user, &product, 0).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    add_to_cart(&app, user, &product, 1).await;
    let mut body = checkout_body("cod", "bad-pin");
    body["shipping_address"]["pincode"] = json!("12");
    let (status, _) = send(&app, Method::POST, "/api/v1/checkout", Caller::User(user), Some(body)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn rejected_extractors_answer_with_error_body() {
    let app = app();
    let user = Uuid::new_v4();

    let bad_uuid = json!({ "product_id": "not-a-uuid", "quantity": 1 });
    let (status, body) = send(&app, Method::POST, "/api/v1/cart/items", Caller::User(user), Some(bad_uuid)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["error"].is_string(), "{body}");

    let (status, body) = send(&app, Method::GET, "/api/v1/orders/not-a-uuid", Caller::User(user), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string(), "{body}");

    let (status, body) = send(&app, Method::GET, "/api/v1/products?medixmall=maybe", Caller::Anonymous, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string(), "{body}");

    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/v1/cart/items")
        .header("content-type", "application/json")
        .header(api::USER_HEADER, user.to_string())
        .body(Body::from("{\"product_id\":"))
        .unwrap();
    let (status, body) = read(app.clone().oneshot(request).await.unwrap()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string(), "{body}");
}

#[tokio::test]
async fn cod_checkout_lifecycle() {
    let app = app();
    let user = Uuid::new_v4();
    let product = create_product(&app, "PARA-500", "medicine", "40.00", 10).await;

    let (status, cart) = add_to_cart(&app, user, &product, 2).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cart["items"].as_array().unwrap().len(), 1);

    let (status, receipt) = send(&app, Method::POST, "/api/v1/checkout", Caller::User(user), Some(checkout_body("cod", "cod-1"))).await;
    assert_eq!(status, StatusCode::CREATED, "{receipt}");
    assert_eq!(receipt["order"]["status"], "confirmed");
    assert_eq!(receipt["payment"]["status"], "pending");
    let order_id = receipt["order"]["id"].as_str().unwrap().to_string();

    // Same key again: same order, nothing new reserved.
    let (_, replay) = send(&app, Method::POST, "/api/v1/checkout", Caller::User(user), Some(checkout_body("cod", "cod-1"))).await;
    assert_eq!(replay["order"]["id"], receipt["order"]["id"]);
    let (_, orders) = send(&app, Method::GET, "/api/v1/orders", Caller::User(user), None).await;
    assert_eq!(orders.as_array().unwrap().len(), 1);

    let (_, cart) = send(&app, Method::GET, "/api/v1/cart", Caller::User(user), None).await;
    assert!(cart["items"].as_array().unwrap().is_empty());

    let (status, order) = send(&app, Method::POST, &format!("/api/v1/admin/orders/{order_id}/process"), Caller::Admin, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(order["status"], "processing");

    let ship = json!({ "tracking_number": "AWB123" });
    let (status, _) = send(&app, Method::POST, &format!("/api/v1/admin/orders/{order_id}/ship"), Caller::Admin, Some(ship)).await;
    assert_eq!(status, StatusCode::OK);
    send(&app, Method::POST, &format!("/api/v1/admin/orders/{order_id}/deliver"), Caller::Admin, None).await;
    let (status, order) = send(&app, Method::POST, &format!("/api/v1/admin/orders/{order_id}/cod-collected"), Caller::Admin, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(order["status"], "delivered");
    assert_eq!(order["payment_status"], "paid");

    let (status, _) = send(&app, Method::POST, &format!("/api/v1/orders/{order_id}/cancel"), Caller::User(user), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn razorpay_webhook_is_idempotent() {
    let app = app();
    let user = Uuid::new_v4();
    let product = create_product(&app, "AMOX-250", "medicine", "120.00", 5).await;
    add_to_cart(&app, user, &product, 1).await;

    let (status, receipt) = send(&app, Method::POST, "/api/v1/checkout", Caller::User(user), Some(checkout_body("razorpay", "rzp-1"))).await;
    assert_eq!(status, StatusCode::CREATED, "{receipt}");
    assert_eq!(receipt["order"]["status"], "pending");
    assert_eq!(receipt["gateway_key_id"], "rzp_test_123");
    let gateway_order_id = receipt["gateway_order"]["id"].as_str().unwrap().to_string();
    let order_id = receipt["order"]["id"].as_str().unwrap().to_string();

    let event = json!({
        "event": "payment.captured",
        "payload": { "payment": { "entity": { "id": "pay_abc", "order_id": gateway_order_id, "status": "captured" } } }
    });
    let (status, ack) = webhook(&app, &event, "evt_1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["status"], "processed");
    let (_, ack) = webhook(&app, &event, "evt_1").await;
    assert_eq!(ack["status"], "duplicate");

    let (_, order) = send(&app, Method::GET, &format!("/api/v1/orders/{order_id}"), Caller::User(user), None).await;
    assert_eq!(order["status"], "confirmed");
    assert_eq!(order["payment_status"], "paid");
    let (_, cart) = send(&app, Method::GET, "/api/v1/cart", Caller::User(user), None).await;
    assert!(cart["items"].as_array().unwrap().is_empty());

    // The client callback arriving late is accepted and changes nothing.
    let sig = signature::sign(KEY_SECRET, format!("{gateway_order_id}|pay_abc").as_bytes());
    let verify = json!({ "gateway_order_id": gateway_order_id, "gateway_payment_id": "pay_abc", "signature": sig });
    let (status, order) = send(&app, Method::POST, "/api/v1/payments/verify", Caller::User(user), Some(verify)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(order["payment_status"], "paid");
}

#[tokio::test]
async fn capture_events_after_cancellation_are_acknowledged() {
    let app = app();
    let user = Uuid::new_v4();
    let product = create_product(&app, "CETIRIZINE", "medicine", "35.00", 4).await;
    add_to_cart(&app, user, &product, 1).await;
    let (_, receipt) = send(&app, Method::POST, "/api/v1/checkout", Caller::User(user), Some(checkout_body("razorpay", "rzp-late"))).await;
    let gateway_order_id = receipt["gateway_order"]["id"].as_str().unwrap().to_string();
    let order_id = receipt["order"]["id"].as_str().unwrap().to_string();

    let (status, _) = send(&app, Method::POST, &format!("/api/v1/orders/{order_id}/cancel"), Caller::User(user), None).await;
    assert_eq!(status, StatusCode::OK);

    for (event, event_id) in [("payment.captured", "evt_cap"), ("order.paid", "evt_paid")] {
        let body = json!({
            "event": event,
            "payload": { "payment": { "entity": { "id": "pay_late", "order_id": gateway_order_id } } }
        });
        let (status, ack) = webhook(&app, &body, event_id).await;
        assert_eq!(status, StatusCode::OK, "{event}: {ack}");
        assert_eq!(ack["status"], "processed");
    }

    let (_, order) = send(&app, Method::GET, &format!("/api/v1/orders/{order_id}"), Caller::User(user), None).await;
    assert_eq!(order["status"], "cancelled");
}

#[tokio::test]
async fn forged_signatures_are_rejected() {
    let app = app();
    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/v1/payments/webhook")
        .header(api::SIGNATURE_HEADER, "00ff")
        .body(Body::from(r#"{"event":"payment.captured","payload":{}}"#))
        .unwrap();
    let (status, _) = read(app.clone().oneshot(request).await.unwrap()).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let verify = json!({ "gateway_order_id": "order_x", "gateway_payment_id": "pay_x", "signature": "nothex" });
    let (status, _) = send(&app, Method::POST, "/api/v1/payments/verify", Caller::User(Uuid::new_v4()), Some(verify)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn wallet_checkout_and_insufficient_balance() {
    let app = app();
    let user = Uuid::new_v4();
    let product = create_product(&app, "GLUCO-1", "device", "800.00", 5).await;
    add_to_cart(&app, user, &product, 1).await;

    let (status, body) = send(&app, Method::POST, "/api/v1/checkout", Caller::User(user), Some(checkout_body("wallet", "w-1"))).await;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED, "{body}");

    let credit = json!({ "amount": "1000", "reference": "promo" });
    let (status, _) = send(&app, Method::POST, &format!("/api/v1/admin/wallets/{user}/credit"), Caller::Admin, Some(credit)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, receipt) = send(&app, Method::POST, "/api/v1/checkout", Caller::User(user), Some(checkout_body("wallet", "w-2"))).await;
    assert_eq!(status, StatusCode::CREATED, "{receipt}");
    assert_eq!(receipt["order"]["payment_status"], "paid");
    let (_, wallet) = send(&app, Method::GET, "/api/v1/wallet", Caller::User(user), None).await;
    assert_eq!(wallet["transactions"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn stock_and_ownership_errors() {
    let app = app();
    let user = Uuid::new_v4();
    let product = create_product(&app, "OXI-1", "device", "900.00", 1).await;

    let (status, body) = add_to_cart(&app, user, &product, 2).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains("insufficient inventory"));

    add_to_cart(&app, user, &product, 1).await;
    let (_, receipt) = send(&app, Method::POST, "/api/v1/checkout", Caller::User(user), Some(checkout_body("cod", "k"))).await;
    let order_id = receipt["order"]["id"].as_str().unwrap().to_string();

    let stranger = Caller::User(Uuid::new_v4());
    let (status, _) = send(&app, Method::GET, &format!("/api/v1/orders/{order_id}"), stranger, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send(&app, Method::POST, "/api/v1/checkout", Caller::User(Uuid::new_v4()), Some(checkout_body("cod", "k"))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn medixmall_mode_filters_catalog() {
    let app = app();
    create_product(&app, "MET-500", "medicine", "150.00", 10).await;
    create_product(&app, "PAD-1", "device", "900.00", 10).await;

    let (_, all) = send(&app, Method::GET, "/api/v1/products", Caller::Anonymous, None).await;
    assert_eq!(all.as_array().unwrap().len(), 2);
    let (_, medicines) = send(&app, Method::GET, "/api/v1/products?medixmall=true", Caller::Anonymous, None).await;
    let medicines = medicines.as_array().unwrap();
    assert_eq!(medicines.len(), 1);
    assert_eq!(medicines[0]["product_type"], "medicine");
}

#[tokio::test]
async fn coupon_preview_through_api() {
    let app = app();
    let user = Uuid::new_v4();
    let product = create_product(&app, "BP-1", "device", "1000.00", 3).await;
    let coupon = json!({
        "code": "care20", "discount_type": "percentage", "value": "20", "max_discount": "150",
        "valid_from": "2020-01-01T00:00:00Z", "valid_until": "2099-01-01T00:00:00Z"
    });
    let (status, _) = send(&app, Method::POST, "/api/v1/admin/coupons", Caller::Admin, Some(coupon)).await;
    assert_eq!(status, StatusCode::CREATED);
    add_to_cart(&app, user, &product, 1).await;

    let (status, preview) = send(&app, Method::POST, "/api/v1/coupons/validate", Caller::User(user), Some(json!({ "code": "CARE20" }))).await;
    assert_eq!(status, StatusCode::OK, "{preview}");
    assert_eq!(preview["code"], "CARE20");
    let (status, _) = send(&app, Method::POST, "/api/v1/coupons/validate", Caller::User(user), Some(json!({ "code": "NOPE" }))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
