//! Axum HTTP gateway for the ordering and payment pipeline.
//!
//! Body limits, request timeouts, and CORS are applied as layers; JSON
//! handlers funnel failures through [`AppError`] while the two payment
//! callback endpoints answer plaintext (`OK` / rejection) because the
//! provider treats anything but a 2xx body as a redelivery trigger.

use crate::config::Config;
use crate::error::AppError;
use crate::orders::{Customer, NewOrder, Order, OrderStatus, OrderStore, TransitionOutcome};
use crate::payments::{
    mark_paid, CallbackSource, CreateLink, LinkCustomer, PaymentLinkIssuer, PaymentMethod,
    PaymentVerifier, RazorpayClient,
};
use crate::pricing::{PlanType, PricingEngine};
use crate::security::AdminAuth;
use anyhow::Result;
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

/// Maximum request body size (64KB) — prevents memory exhaustion
pub const MAX_BODY_SIZE: usize = 65_536;

/// Shared state for all axum handlers
#[derive(Clone)]
pub struct AppState {
    pub business_name: Arc<str>,
    pub pricing: Arc<PricingEngine>,
    pub store: Arc<dyn OrderStore>,
    pub issuer: Arc<PaymentLinkIssuer>,
    pub verifier: Arc<PaymentVerifier>,
    pub admin: Arc<AdminAuth>,
}

impl AppState {
    pub fn from_config(config: &Config, store: Arc<dyn OrderStore>) -> Self {
        Self {
            business_name: Arc::from(config.business.name.as_str()),
            pricing: Arc::new(PricingEngine::new(&config.pricing, &config.delivery)),
            store,
            issuer: Arc::new(PaymentLinkIssuer::new(
                config.business.upi_vpa.clone(),
                config.business.name.clone(),
                RazorpayClient::from_config(&config.razorpay),
            )),
            verifier: Arc::new(PaymentVerifier::new(
                config.razorpay.key_secret.clone(),
                config.razorpay.webhook_secret.clone(),
            )),
            admin: Arc::new(AdminAuth::new(
                &config.admin.pin,
                Duration::from_secs(config.admin.session_ttl_secs),
            )),
        }
    }
}

/// Run the HTTP gateway until ctrl-c or SIGTERM.
pub async fn run_gateway(config: &Config, store: Arc<dyn OrderStore>) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.gateway.host, config.gateway.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let display_addr = listener.local_addr()?;

    let state = AppState::from_config(config, store);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::HeaderName::from_static("x-admin-pin"),
        ])
        .max_age(Duration::from_secs(3600));

    let app = Router::new()
        .route("/", get(handle_root))
        .route("/health", get(handle_health))
        .route("/menu", get(handle_menu))
        .route("/delivery/fee", get(handle_delivery_fee))
        .route("/orders", post(handle_create_order))
        .route("/admin/login", post(handle_admin_login))
        .route("/admin/orders", get(handle_admin_orders))
        .route("/admin/orders/{id}/status", post(handle_admin_set_status))
        .route("/payments/create_link", post(handle_create_link))
        .route("/payments/webhook", get(handle_payment_redirect))
        .route("/payments/razorpay-webhook", post(handle_razorpay_webhook))
        .with_state(state)
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_SIZE))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(config.gateway.request_timeout_secs),
        ));

    println!(
        "🍱 {} gateway listening on http://{display_addr}",
        config.business.name
    );
    println!("  GET  /menu                      — pricing table");
    println!("  GET  /delivery/fee?km=          — delivery fee quote");
    println!("  POST /orders                    — place an order (UPI deep link back)");
    println!("  POST /payments/create_link      — hosted payment link");
    println!("  GET  /payments/webhook          — provider redirect confirmation");
    println!("  POST /payments/razorpay-webhook — provider event webhook");
    println!("  GET  /health                    — health check");
    println!("  Press Ctrl+C to stop.\n");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
        tracing::info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
        tracing::info!("Received terminate signal, shutting down");
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// AXUM HANDLERS
// ══════════════════════════════════════════════════════════════════════════════

/// GET / — business card.
async fn handle_root(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({"ok": true, "name": state.business_name.as_ref()}))
}

/// GET /health — always public.
async fn handle_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"ok": true, "status": "up"}))
}

/// GET /menu — pricing table snapshot.
async fn handle_menu(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(state.pricing.menu_snapshot())
}

#[derive(Debug, Deserialize)]
pub struct FeeQuery {
    pub km: Option<f64>,
}

/// GET /delivery/fee?km= — quote the delivery fee for a distance.
async fn handle_delivery_fee(
    State(state): State<AppState>,
    Query(query): Query<FeeQuery>,
) -> Json<serde_json::Value> {
    let km = query.km.unwrap_or(0.0).max(0.0);
    let fee = state.pricing.delivery_fee(km);
    Json(serde_json::json!({"km": km, "fee": fee}))
}

fn default_qty() -> u32 {
    1
}

/// POST /orders request body.
#[derive(Debug, Deserialize)]
pub struct CreateOrderBody {
    pub mobile: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(rename = "type")]
    pub plan: Option<String>,
    #[serde(default = "default_qty")]
    pub qty: u32,
    #[serde(default, rename = "distanceKm")]
    pub distance_km: f64,
    #[serde(default)]
    pub note: String,
}

/// POST /orders — quote, persist, hand back a UPI deep link.
///
/// The amount is always recomputed from the validated tables; anything
/// amount-shaped in the request body is ignored.
async fn handle_create_order(
    State(state): State<AppState>,
    Json(body): Json<CreateOrderBody>,
) -> Result<Json<serde_json::Value>, AppError> {
    let mobile = body
        .mobile
        .as_deref()
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .ok_or_else(|| AppError::Validation("mobile is required".into()))?;

    let plan = body
        .plan
        .as_deref()
        .and_then(PlanType::from_str_opt)
        .ok_or_else(|| {
            AppError::Validation(
                "type must be one of daily, breakfast, monthlyVeg, monthlyNonVeg".into(),
            )
        })?;

    if !body.distance_km.is_finite() || body.distance_km < 0.0 {
        return Err(AppError::Validation("distanceKm must be non-negative".into()));
    }

    let quote = state
        .pricing
        .quote(plan, body.qty, body.distance_km)
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let order = state
        .store
        .create(NewOrder {
            customer: Customer {
                mobile: mobile.to_owned(),
                name: body.name.clone().filter(|n| !n.trim().is_empty()),
                address: body.address.clone().filter(|a| !a.trim().is_empty()),
            },
            note: body.note.clone(),
            plan,
            qty: body.qty,
            distance_km: body.distance_km,
            quote,
        })
        .await?;

    let payable = state
        .issuer
        .issue(&order, PaymentMethod::UpiDeepLink)
        .await?;
    tracing::info!(order_id = %order.id, amount = order.amount, "order created");

    Ok(Json(serde_json::json!({
        "ok": true,
        "order": order,
        "payment": { "upiUrl": payable.url(), "amount": order.amount },
    })))
}

// ── Admin ──────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct AdminLoginBody {
    #[serde(default)]
    pub pin: String,
}

/// POST /admin/login — exchange the PIN for a bearer session token.
async fn handle_admin_login(
    State(state): State<AppState>,
    Json(body): Json<AdminLoginBody>,
) -> Json<serde_json::Value> {
    match state.admin.login(&body.pin) {
        Some(token) => Json(serde_json::json!({"ok": true, "token": token})),
        None => {
            tracing::warn!("admin login failed");
            Json(serde_json::json!({"ok": false}))
        }
    }
}

/// Admin auth: a live bearer token, the PIN in `X-Admin-Pin`, or (for
/// the status form) the PIN in the request body.
fn require_admin(
    state: &AppState,
    headers: &HeaderMap,
    body_pin: Option<&str>,
) -> Result<(), AppError> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("");
    if state.admin.token_valid(bearer) {
        return Ok(());
    }

    let header_pin = headers
        .get("X-Admin-Pin")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if !header_pin.is_empty() && state.admin.pin_matches(header_pin) {
        return Ok(());
    }

    if let Some(pin) = body_pin {
        if !pin.is_empty() && state.admin.pin_matches(pin) {
            return Ok(());
        }
    }

    tracing::warn!("admin request rejected — missing or invalid credentials");
    Err(AppError::Unauthorized)
}

/// GET /admin/orders — every order, most recent first. Requires admin
/// auth; the listing and the status update share one check.
async fn handle_admin_orders(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<Order>>, AppError> {
    require_admin(&state, &headers, None)?;
    Ok(Json(state.store.list().await?))
}

#[derive(Debug, Default, Deserialize)]
pub struct SetStatusBody {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub pin: Option<String>,
}

/// POST /admin/orders/{id}/status — fulfilment transitions only.
async fn handle_admin_set_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<SetStatusBody>,
) -> Result<Json<serde_json::Value>, AppError> {
    require_admin(&state, &headers, body.pin.as_deref())?;

    let next = body
        .status
        .as_deref()
        .and_then(OrderStatus::from_str_opt)
        .filter(|s| OrderStatus::ADMIN_SETTABLE.contains(s))
        .ok_or_else(|| {
            AppError::Validation(
                "status must be one of preparing, out_for_delivery, delivered, cancelled".into(),
            )
        })?;

    match state.store.transition(&id, next, None).await? {
        TransitionOutcome::Applied(order) => {
            tracing::info!(
                order_id = %id,
                status = order.status.as_str(),
                "order status updated"
            );
            Ok(Json(serde_json::json!({"ok": true})))
        }
        TransitionOutcome::AlreadyInState(_) => Ok(Json(serde_json::json!({"ok": true}))),
        TransitionOutcome::Rejected { current } => Err(AppError::Validation(format!(
            "cannot move a {} order to {}",
            current.as_str(),
            next.as_str()
        ))),
        TransitionOutcome::NotFound => Err(AppError::NotFound),
    }
}

// ── Payments ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateLinkBody {
    pub amount: Option<u32>,
    pub customer: Option<CreateLinkCustomer>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, rename = "orderId")]
    pub order_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateLinkCustomer {
    pub name: Option<String>,
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

/// POST /payments/create_link — hosted payment link for an amount.
async fn handle_create_link(
    State(state): State<AppState>,
    Json(body): Json<CreateLinkBody>,
) -> Result<Json<serde_json::Value>, AppError> {
    let (Some(amount), Some(customer)) = (body.amount, body.customer.as_ref()) else {
        return Err(AppError::Validation(
            "Provide amount and customer {name, phone}".into(),
        ));
    };
    let (Some(name), Some(phone)) = (customer.name.as_deref(), customer.phone.as_deref()) else {
        return Err(AppError::Validation(
            "Provide amount and customer {name, phone}".into(),
        ));
    };

    let url = state
        .issuer
        .create_hosted_link(CreateLink {
            amount,
            customer: LinkCustomer {
                name: name.to_owned(),
                phone: phone.to_owned(),
                email: customer.email.clone(),
            },
            description: body.description.clone(),
            reference_id: body.order_id.clone().unwrap_or_default(),
        })
        .await?;

    Ok(Json(serde_json::json!({"ok": true, "url": url})))
}

/// GET /payments/webhook query parameters (provider redirect).
#[derive(Debug, Default, Deserialize)]
pub struct RedirectQuery {
    pub razorpay_payment_id: Option<String>,
    pub razorpay_payment_link_id: Option<String>,
    pub razorpay_order_id: Option<String>,
    pub razorpay_signature: Option<String>,
    #[serde(rename = "orderId")]
    pub order_id: Option<String>,
}

/// GET /payments/webhook — redirect-style confirmation after a hosted
/// checkout. Plaintext responses: the provider only needs `OK`.
async fn handle_payment_redirect(
    State(state): State<AppState>,
    Query(query): Query<RedirectQuery>,
) -> (StatusCode, String) {
    let source = CallbackSource::RedirectConfirmation {
        payment_id: query.razorpay_payment_id.unwrap_or_default(),
        payment_link_id: query.razorpay_payment_link_id,
        order_id: query.razorpay_order_id,
        signature: query.razorpay_signature.unwrap_or_default(),
        local_order_id: query.order_id,
    };

    match state.verifier.verify_callback(&source) {
        Ok(result) => match mark_paid(state.store.as_ref(), &result).await {
            Ok(()) => (StatusCode::OK, "OK".into()),
            Err(e) => {
                tracing::error!("failed to apply payment confirmation: {e}");
                (StatusCode::INTERNAL_SERVER_ERROR, "Server error".into())
            }
        },
        Err(AppError::MissingSecret) => {
            tracing::error!("redirect confirmation received but no payment secret configured");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Missing payment secret".into(),
            )
        }
        Err(_) => {
            tracing::warn!("redirect confirmation rejected — signature verification failed");
            (
                StatusCode::BAD_REQUEST,
                "Signature verification failed".into(),
            )
        }
    }
}

/// POST /payments/razorpay-webhook — asynchronous event notification.
/// The signature covers the exact raw bytes, so the body is taken
/// unparsed and only decoded after verification.
async fn handle_razorpay_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, String) {
    let signature = headers
        .get("x-razorpay-signature")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_owned();

    let source = CallbackSource::WebhookEvent {
        body: body.to_vec(),
        signature,
    };

    match state.verifier.verify_callback(&source) {
        Ok(result) => match mark_paid(state.store.as_ref(), &result).await {
            Ok(()) => (StatusCode::OK, "OK".into()),
            Err(e) => {
                tracing::error!("failed to apply webhook event: {e}");
                (StatusCode::INTERNAL_SERVER_ERROR, "Server error".into())
            }
        },
        Err(AppError::MissingSecret) => {
            tracing::error!("webhook received but no webhook secret configured");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Missing webhook secret".into(),
            )
        }
        Err(AppError::Validation(_)) => {
            tracing::warn!("webhook body verified but not parseable");
            (StatusCode::BAD_REQUEST, "Invalid payload".into())
        }
        Err(_) => {
            tracing::warn!("webhook rejected — bad signature");
            (StatusCode::BAD_REQUEST, "Bad signature".into())
        }
    }
}
