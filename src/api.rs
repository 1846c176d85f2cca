//! HTTP surface. Handlers validate input, resolve the caller and delegate to
//! [`CheckoutService`].

use axum::{
    async_trait,
    body::Bytes,
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        FromRequest, FromRequestParts, State,
    },
    http::{request::Parts, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use thiserror::Error;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use uuid::Uuid;
use validator::{Validate, ValidationError, ValidationErrors};
use crate::checkout::{CheckoutRequest, CheckoutService, PaymentVerification, ProductDraft, VariantDraft};
use crate::domain::aggregates::{
    Address, CartError, Coupon, CouponError, DiscountType, PaymentMethod, ProductError, ProductType, WalletError,
};
use crate::CheckoutError;

pub const USER_HEADER: &str = "x-user-id";
pub const ADMIN_HEADER: &str = "x-admin-token";
pub const SIGNATURE_HEADER: &str = "x-razorpay-signature";
pub const EVENT_ID_HEADER: &str = "x-razorpay-event-id";

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<CheckoutService>,
    /// Admin routes answer 401 while this is unset.
    pub admin_token: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { Json(serde_json::json!({"status": "healthy", "service": "medixmall-checkout"})) }))
        .route("/api/v1/products", get(list_products))
        .route("/api/v1/cart", get(get_cart).delete(clear_cart))
        .route("/api/v1/cart/items", post(add_cart_item).put(set_cart_item))
        .route("/api/v1/cart/items/:product_id", delete(remove_cart_item))
        .route("/api/v1/coupons/validate", post(validate_coupon))
        .route("/api/v1/checkout", post(checkout))
        .route("/api/v1/payments/verify", post(verify_payment))
        .route("/api/v1/payments/webhook", post(payment_webhook))
        .route("/api/v1/orders", get(list_orders))
        .route("/api/v1/orders/:id", get(get_order))
        .route("/api/v1/orders/:id/cancel", post(cancel_order))
        .route("/api/v1/wallet", get(get_wallet))
        .route("/api/v1/admin/products", post(create_product))
        .route("/api/v1/admin/products/:id/restock", post(restock_product))
        .route("/api/v1/admin/coupons", post(create_coupon))
        .route("/api/v1/admin/wallets/:user_id/credit", post(credit_wallet))
        .route("/api/v1/admin/orders/:id/process", post(process_order))
        .route("/api/v1/admin/orders/:id/ship", post(ship_order))
        .route("/api/v1/admin/orders/:id/deliver", post(deliver_order))
        .route("/api/v1/admin/orders/:id/cod-collected", post(confirm_cod))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Checkout(#[from] CheckoutError),
    #[error("{0}")]
    Unauthorized(&'static str),
    #[error("invalid request: {0}")]
    Invalid(#[from] ValidationErrors),
    #[error("{message}")]
    Rejected { status: StatusCode, message: String },
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self { ApiError::Rejected { status: rejection.status(), message: rejection.body_text() } }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self { ApiError::Rejected { status: rejection.status(), message: rejection.body_text() } }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self { ApiError::Rejected { status: rejection.status(), message: rejection.body_text() } }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        let error = match self {
            ApiError::Unauthorized(_) => return StatusCode::UNAUTHORIZED,
            ApiError::Invalid(_) => return StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Rejected { status, .. } => return *status,
            ApiError::Checkout(error) => error,
        };
        match error {
            CheckoutError::NotFound(_)
            | CheckoutError::Cart(CartError::ItemNotFound)
            | CheckoutError::Product(ProductError::VariantNotFound)
            | CheckoutError::Coupon(CouponError::NotFound) => StatusCode::NOT_FOUND,
            CheckoutError::InvalidSignature => StatusCode::UNAUTHORIZED,
            CheckoutError::Wallet(WalletError::InsufficientBalance { .. }) => StatusCode::PAYMENT_REQUIRED,
            CheckoutError::ProductUnavailable(_)
            | CheckoutError::Conflict(_)
            | CheckoutError::Product(ProductError::InsufficientInventory { .. })
            | CheckoutError::Order(_)
            | CheckoutError::Payment(_) => StatusCode::CONFLICT,
            CheckoutError::Coupon(CouponError::InvalidDefinition(_)) => StatusCode::BAD_REQUEST,
            CheckoutError::Coupon(_) => StatusCode::CONFLICT,
            CheckoutError::EmptyCart
            | CheckoutError::Validation(_)
            | CheckoutError::Cart(_)
            | CheckoutError::Product(_)
            | CheckoutError::Wallet(_)
            | CheckoutError::Money(_) => StatusCode::BAD_REQUEST,
            CheckoutError::Gateway(_) => StatusCode::BAD_GATEWAY,
            CheckoutError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
            if status == StatusCode::BAD_GATEWAY { "payment gateway unavailable".to_string() } else { "internal error".to_string() }
        } else {
            self.to_string()
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Request extractors that reject with the JSON error body.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct JsonBody<T>(pub T);

#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(ApiError))]
pub struct UrlPath<T>(pub T);

#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(ApiError))]
pub struct UrlQuery<T>(pub T);

// =============================================================================
// Caller identity
// =============================================================================

/// The user forwarded by the upstream auth gateway.
#[derive(Clone, Copy, Debug)]
pub struct CurrentUser(pub Uuid);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts.headers.get(USER_HEADER).ok_or(ApiError::Unauthorized("missing user identity"))?;
        value.to_str().ok()
            .and_then(|v| Uuid::parse_str(v.trim()).ok())
            .map(CurrentUser)
            .ok_or(ApiError::Unauthorized("malformed user identity"))
    }
}

pub struct AdminUser;

#[async_trait]
impl FromRequestParts<AppState> for AdminUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let expected = state.admin_token.as_deref().ok_or(ApiError::Unauthorized("admin access is disabled"))?;
        let presented = parts.headers.get(ADMIN_HEADER).and_then(|v| v.to_str().ok()).unwrap_or_default();
        if bool::from(presented.as_bytes().ct_eq(expected.as_bytes())) {
            Ok(AdminUser)
        } else {
            Err(ApiError::Unauthorized("admin token required"))
        }
    }
}

// =============================================================================
// Request bodies
// =============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct ListParams { pub medixmall: Option<bool> }

#[derive(Debug, Deserialize)]
pub struct VariantParams { pub variant_id: Option<Uuid> }

#[derive(Debug, Deserialize, Validate)]
pub struct AddCartItemRequest {
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    #[validate(range(min = 1, max = 100))]
    pub quantity: u32,
}

/// Quantity zero removes the line.
#[derive(Debug, Deserialize, Validate)]
pub struct SetCartItemRequest {
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    #[validate(range(max = 100))]
    pub quantity: u32,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CouponRequest {
    #[validate(length(min = 1, max = 32))]
    pub code: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct AddressRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    #[validate(length(min = 10, max = 15))]
    pub phone: String,
    #[validate(length(min = 1, max = 200))]
    pub line1: String,
    pub line2: Option<String>,
    #[validate(length(min = 1, max = 100))]
    pub city: String,
    #[validate(length(min = 1, max = 100))]
    pub state: String,
    #[validate(length(equal = 6))]
    pub pincode: String,
    #[serde(default = "default_country")]
    pub country: String,
}

fn default_country() -> String { "IN".into() }

impl From<AddressRequest> for Address {
    fn from(r: AddressRequest) -> Self {
        Address { name: r.name, phone: r.phone, line1: r.line1, line2: r.line2, city: r.city, state: r.state, pincode: r.pincode, country: r.country }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct CheckoutBody {
    pub payment_method: PaymentMethod,
    #[validate(length(min = 1, max = 32))]
    pub coupon_code: Option<String>,
    pub shipping_address: AddressRequest,
    #[validate(length(min = 1, max = 64))]
    pub checkout_key: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct VerifyPaymentRequest {
    #[validate(length(min = 1, max = 64))]
    pub gateway_order_id: String,
    #[validate(length(min = 1, max = 64))]
    pub gateway_payment_id: String,
    #[validate(length(min = 1, max = 128))]
    pub signature: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateProductRequest {
    #[validate(length(min = 1, max = 50))]
    pub sku: String,
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub product_type: ProductType,
    #[validate(custom = "positive")]
    pub price: Decimal,
    #[serde(default)]
    pub stock: u32,
    #[serde(default)]
    pub variants: Vec<CreateVariantRequest>,
    #[serde(default = "default_publish")]
    pub publish: bool,
}

fn default_publish() -> bool { true }

#[derive(Debug, Deserialize, Validate)]
pub struct CreateVariantRequest {
    #[validate(length(min = 1, max = 50))]
    pub sku: String,
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    #[validate(custom = "positive")]
    pub price: Decimal,
    #[serde(default)]
    pub stock: u32,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RestockRequest {
    pub variant_id: Option<Uuid>,
    #[validate(range(min = 1))]
    pub quantity: u32,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateCouponRequest {
    #[validate(length(min = 3, max = 32))]
    pub code: String,
    #[serde(default)]
    pub description: String,
    pub discount_type: DiscountType,
    #[validate(custom = "positive")]
    pub value: Decimal,
    #[validate(custom = "positive")]
    pub max_discount: Option<Decimal>,
    pub min_order_amount: Option<Decimal>,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    #[validate(range(min = 1))]
    pub usage_limit: Option<u32>,
    #[validate(range(min = 1))]
    pub per_user_limit: Option<u32>,
    #[serde(default)]
    pub assigned_users: Vec<Uuid>,
    /// Upserting with `active: false` withdraws an existing code.
    #[serde(default = "default_publish")]
    pub active: bool,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreditWalletRequest {
    #[validate(custom = "positive")]
    pub amount: Decimal,
    #[validate(length(min = 1, max = 100))]
    pub reference: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ShipRequest {
    #[validate(length(min = 1, max = 64))]
    pub tracking_number: String,
}

fn positive(value: &Decimal) -> Result<(), ValidationError> {
    if *value > Decimal::ZERO { Ok(()) } else { Err(ValidationError::new("positive")) }
}

#[derive(Debug, Serialize)]
struct WebhookResponse { status: crate::checkout::WebhookAck }

// =============================================================================
// Handlers
// =============================================================================

async fn list_products(State(s): State<AppState>, UrlQuery(p): UrlQuery<ListParams>) -> ApiResult<impl IntoResponse> {
    Ok(Json(s.service.list_products(p.medixmall.unwrap_or(false)).await?))
}

async fn get_cart(State(s): State<AppState>, CurrentUser(user): CurrentUser) -> ApiResult<impl IntoResponse> {
    Ok(Json(s.service.cart(user).await?))
}

async fn clear_cart(State(s): State<AppState>, CurrentUser(user): CurrentUser) -> ApiResult<impl IntoResponse> {
    Ok(Json(s.service.clear_cart(user).await?))
}

async fn add_cart_item(State(s): State<AppState>, CurrentUser(user): CurrentUser, JsonBody(r): JsonBody<AddCartItemRequest>) -> ApiResult<impl IntoResponse> {
    r.validate()?;
    Ok(Json(s.service.add_to_cart(user, r.product_id, r.variant_id, r.quantity).await?))
}

async fn set_cart_item(State(s): State<AppState>, CurrentUser(user): CurrentUser, JsonBody(r): JsonBody<SetCartItemRequest>) -> ApiResult<impl IntoResponse> {
    r.validate()?;
    Ok(Json(s.service.update_cart_item(user, r.product_id, r.variant_id, r.quantity).await?))
}

async fn remove_cart_item(
    State(s): State<AppState>,
    CurrentUser(user): CurrentUser,
    UrlPath(product_id): UrlPath<Uuid>,
    UrlQuery(q): UrlQuery<VariantParams>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(s.service.remove_from_cart(user, product_id, q.variant_id).await?))
}

async fn validate_coupon(State(s): State<AppState>, CurrentUser(user): CurrentUser, JsonBody(r): JsonBody<CouponRequest>) -> ApiResult<impl IntoResponse> {
    r.validate()?;
    Ok(Json(s.service.validate_coupon(user, &r.code).await?))
}

async fn checkout(State(s): State<AppState>, CurrentUser(user): CurrentUser, JsonBody(r): JsonBody<CheckoutBody>) -> ApiResult<impl IntoResponse> {
    r.validate()?;
    r.shipping_address.validate()?;
    let request = CheckoutRequest {
        payment_method: r.payment_method,
        coupon_code: r.coupon_code,
        shipping_address: r.shipping_address.into(),
        checkout_key: r.checkout_key,
    };
    let receipt = s.service.checkout(user, request).await?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

async fn verify_payment(State(s): State<AppState>, CurrentUser(user): CurrentUser, JsonBody(r): JsonBody<VerifyPaymentRequest>) -> ApiResult<impl IntoResponse> {
    r.validate()?;
    let verification = PaymentVerification { gateway_order_id: r.gateway_order_id, gateway_payment_id: r.gateway_payment_id, signature: r.signature };
    Ok(Json(s.service.verify_payment(user, verification).await?))
}

async fn payment_webhook(State(s): State<AppState>, headers: HeaderMap, body: Bytes) -> ApiResult<impl IntoResponse> {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
    let signature = header(SIGNATURE_HEADER).ok_or(CheckoutError::InvalidSignature)?;
    let status = s.service.handle_webhook(&body, signature, header(EVENT_ID_HEADER)).await?;
    Ok(Json(WebhookResponse { status }))
}

async fn list_orders(State(s): State<AppState>, CurrentUser(user): CurrentUser, UrlQuery(p): UrlQuery<ListParams>) -> ApiResult<impl IntoResponse> {
    Ok(Json(s.service.list_orders(user, p.medixmall.unwrap_or(false)).await?))
}

async fn get_order(State(s): State<AppState>, CurrentUser(user): CurrentUser, UrlPath(id): UrlPath<Uuid>) -> ApiResult<impl IntoResponse> {
    Ok(Json(s.service.order(user, id).await?))
}

async fn cancel_order(State(s): State<AppState>, CurrentUser(user): CurrentUser, UrlPath(id): UrlPath<Uuid>) -> ApiResult<impl IntoResponse> {
    Ok(Json(s.service.cancel_order(user, id).await?))
}

async fn get_wallet(State(s): State<AppState>, CurrentUser(user): CurrentUser) -> ApiResult<impl IntoResponse> {
    Ok(Json(s.service.wallet(user).await?))
}

async fn create_product(State(s): State<AppState>, _: AdminUser, JsonBody(r): JsonBody<CreateProductRequest>) -> ApiResult<impl IntoResponse> {
    r.validate()?;
    for variant in &r.variants { variant.validate()?; }
    let draft = ProductDraft {
        sku: r.sku,
        name: r.name,
        description: r.description,
        product_type: r.product_type,
        price: r.price,
        stock: r.stock,
        variants: r.variants.into_iter().map(|v| VariantDraft { sku: v.sku, name: v.name, price: v.price, stock: v.stock }).collect(),
        publish: r.publish,
    };
    Ok((StatusCode::CREATED, Json(s.service.create_product(draft).await?)))
}

async fn restock_product(State(s): State<AppState>, _: AdminUser, UrlPath(id): UrlPath<Uuid>, JsonBody(r): JsonBody<RestockRequest>) -> ApiResult<impl IntoResponse> {
    r.validate()?;
    Ok(Json(s.service.restock_product(id, r.variant_id, r.quantity).await?))
}

async fn create_coupon(State(s): State<AppState>, _: AdminUser, JsonBody(r): JsonBody<CreateCouponRequest>) -> ApiResult<impl IntoResponse> {
    r.validate()?;
    let mut coupon = Coupon::new(&r.code, r.discount_type, r.value, r.valid_from, r.valid_until)
        .map_err(CheckoutError::from)?
        .with_description(r.description)
        .assigned_to(r.assigned_users);
    if let Some(cap) = r.max_discount { coupon = coupon.with_max_discount(cap); }
    if let Some(min) = r.min_order_amount { coupon = coupon.with_min_order_amount(min); }
    if let Some(limit) = r.usage_limit { coupon = coupon.with_usage_limit(limit); }
    if let Some(limit) = r.per_user_limit { coupon = coupon.with_per_user_limit(limit); }
    if !r.active { coupon.deactivate(); }
    Ok((StatusCode::CREATED, Json(s.service.upsert_coupon(coupon).await?)))
}

async fn credit_wallet(State(s): State<AppState>, _: AdminUser, UrlPath(user_id): UrlPath<Uuid>, JsonBody(r): JsonBody<CreditWalletRequest>) -> ApiResult<impl IntoResponse> {
    r.validate()?;
    Ok(Json(s.service.credit_wallet(user_id, r.amount, &r.reference).await?))
}

async fn process_order(State(s): State<AppState>, _: AdminUser, UrlPath(id): UrlPath<Uuid>) -> ApiResult<impl IntoResponse> {
    Ok(Json(s.service.process_order(id).await?))
}

async fn ship_order(State(s): State<AppState>, _: AdminUser, UrlPath(id): UrlPath<Uuid>, JsonBody(r): JsonBody<ShipRequest>) -> ApiResult<impl IntoResponse> {
    r.validate()?;
    Ok(Json(s.service.ship_order(id, &r.tracking_number).await?))
}

async fn deliver_order(State(s): State<AppState>, _: AdminUser, UrlPath(id): UrlPath<Uuid>) -> ApiResult<impl IntoResponse> {
    Ok(Json(s.service.deliver_order(id).await?))
}

async fn confirm_cod(State(s): State<AppState>, _: AdminUser, UrlPath(id): UrlPath<Uuid>) -> ApiResult<impl IntoResponse> {
    Ok(Json(s.service.confirm_cod_payment(id).await?))
}
