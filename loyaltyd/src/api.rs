//! HTTP API for the loyalty daemon.
//!
//! Provides REST endpoints for:
//! - Health check
//! - Order submission and listing
//! - Balance, withdrawal and withdrawal history
//!
//! Authentication happens upstream; the identity provider places the
//! authenticated user id in the `X-User-Id` header.

use axum::{
    async_trait,
    extract::{FromRequestParts, State},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::error;

use loyalty_domain::{Order, OrderStatus, Points, UserId, Withdrawal};
use loyalty_store::Store;

use crate::balance_service::{BalanceService, WithdrawOutcome};
use crate::error::DaemonError;
use crate::order_service::{OrderService, SubmitOutcome};

/// Header carrying the authenticated user id.
pub const USER_HEADER: &str = "x-user-id";

// =============================================================================
// API State
// =============================================================================

/// Shared state for API handlers.
pub struct ApiState<S: Store + 'static> {
    pub orders: OrderService<S>,
    pub balances: BalanceService<S>,
}

// =============================================================================
// Request/Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// One entry of the order list.
#[derive(Debug, Serialize)]
pub struct OrderResponse {
    pub number: String,
    pub status: OrderStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accrual: Option<Points>,
    pub uploaded_at: DateTime<Utc>,
}

/// Balance response.
#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub current: Points,
    pub withdrawn: Points,
}

/// Request to spend points.
#[derive(Debug, Deserialize)]
pub struct WithdrawRequest {
    pub order: String,
    pub sum: Decimal,
}

/// One entry of the withdrawal history.
#[derive(Debug, Serialize)]
pub struct WithdrawalResponse {
    pub order: String,
    pub sum: Points,
    pub processed_at: DateTime<Utc>,
}

/// Error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

// =============================================================================
// Authenticated user
// =============================================================================

/// User id extracted from [`USER_HEADER`]; rejects with 401 when absent.
pub struct AuthUser(pub UserId);

#[async_trait]
impl<T: Send + Sync> FromRequestParts<T> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &T) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| UserId::new(value.trim()).ok())
            .map(AuthUser)
            .ok_or_else(|| api_error(StatusCode::UNAUTHORIZED, "Missing or empty X-User-Id"))
    }
}

// =============================================================================
// Router
// =============================================================================

/// Create the API router.
pub fn create_router<S>(state: Arc<ApiState<S>>) -> Router
where
    S: Store + 'static,
{
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/user/orders", post(submit_order_handler::<S>).get(list_orders_handler::<S>))
        .route("/api/user/balance", get(balance_handler::<S>))
        .route("/api/user/balance/withdraw", post(withdraw_handler::<S>))
        .route("/api/user/withdrawals", get(withdrawals_handler::<S>))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// =============================================================================
// Handlers
// =============================================================================

/// Health check endpoint.
async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Submit an order number (plain-text body).
async fn submit_order_handler<S>(
    State(state): State<Arc<ApiState<S>>>,
    AuthUser(user): AuthUser,
    body: String,
) -> Result<StatusCode, ApiError>
where
    S: Store + 'static,
{
    if body.trim().is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "Empty order number"));
    }

    match state.orders.submit(&body, &user).await.map_err(to_error_response)? {
        SubmitOutcome::Accepted(_) => Ok(StatusCode::ACCEPTED),
        SubmitOutcome::AlreadySubmitted(_) => Ok(StatusCode::OK),
    }
}

/// List the caller's orders, oldest first.
async fn list_orders_handler<S>(
    State(state): State<Arc<ApiState<S>>>,
    AuthUser(user): AuthUser,
) -> Result<Response, ApiError>
where
    S: Store + 'static,
{
    let orders = state.orders.list(&user).await.map_err(to_error_response)?;
    if orders.is_empty() {
        return Ok(StatusCode::NO_CONTENT.into_response());
    }

    let body: Vec<OrderResponse> = orders.iter().map(order_to_response).collect();
    Ok(Json(body).into_response())
}

/// Current and withdrawn points.
async fn balance_handler<S>(
    State(state): State<Arc<ApiState<S>>>,
    AuthUser(user): AuthUser,
) -> Result<Json<BalanceResponse>, ApiError>
where
    S: Store + 'static,
{
    let snapshot = state.balances.balance(&user).await.map_err(to_error_response)?;

    Ok(Json(BalanceResponse {
        current: snapshot.available(),
        withdrawn: snapshot.withdrawn,
    }))
}

/// Spend points against a target order number.
async fn withdraw_handler<S>(
    State(state): State<Arc<ApiState<S>>>,
    AuthUser(user): AuthUser,
    Json(req): Json<WithdrawRequest>,
) -> Result<StatusCode, ApiError>
where
    S: Store + 'static,
{
    match state
        .balances
        .withdraw(&user, &req.order, req.sum)
        .await
        .map_err(to_error_response)?
    {
        WithdrawOutcome::Recorded(_) | WithdrawOutcome::AlreadyWithdrawn(_) => Ok(StatusCode::OK),
    }
}

/// List the caller's withdrawals, oldest first.
async fn withdrawals_handler<S>(
    State(state): State<Arc<ApiState<S>>>,
    AuthUser(user): AuthUser,
) -> Result<Response, ApiError>
where
    S: Store + 'static,
{
    let withdrawals = state.balances.withdrawals(&user).await.map_err(to_error_response)?;
    if withdrawals.is_empty() {
        return Ok(StatusCode::NO_CONTENT.into_response());
    }

    let body: Vec<WithdrawalResponse> = withdrawals.iter().map(withdrawal_to_response).collect();
    Ok(Json(body).into_response())
}

// =============================================================================
// Helpers
// =============================================================================

fn to_error_response(error: DaemonError) -> ApiError {
    let status = match &error {
        DaemonError::InvalidOrderNumber(_) | DaemonError::InvalidAmount(_) => {
            StatusCode::UNPROCESSABLE_ENTITY
        },
        DaemonError::OrderOwnedByAnotherUser(_) => StatusCode::CONFLICT,
        DaemonError::InsufficientFunds { .. } => StatusCode::PAYMENT_REQUIRED,
        DaemonError::Store(_) | DaemonError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };

    if status == StatusCode::INTERNAL_SERVER_ERROR {
        error!(error = %error, "Request failed");
        return api_error(status, "Internal server error");
    }

    api_error(status, error.to_string())
}

fn order_to_response(order: &Order) -> OrderResponse {
    OrderResponse {
        number: order.number.to_string(),
        status: order.status,
        accrual: order.accrual,
        uploaded_at: order.uploaded_at,
    }
}

fn withdrawal_to_response(withdrawal: &Withdrawal) -> WithdrawalResponse {
    WithdrawalResponse {
        order: withdrawal.order.to_string(),
        sum: withdrawal.sum,
        processed_at: withdrawal.processed_at,
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use loyalty_domain::OrderNumber;
    use loyalty_store::MemoryStore;
    use rust_decimal_macros::dec;
    use tower::util::ServiceExt;

    fn create_test_app() -> (Router, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let state = Arc::new(ApiState {
            orders: OrderService::new(store.clone()),
            balances: BalanceService::new(store.clone()),
        });
        (create_router(state), store)
    }

    fn request(method: &str, uri: &str, user: Option<&str>, body: impl Into<Body>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            builder = builder.header(USER_HEADER, user);
        }
        builder.body(body.into()).unwrap()
    }

    fn withdraw_request(user: &str, order: &str, sum: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/user/balance/withdraw")
            .header(USER_HEADER, user)
            .header("content-type", "application/json")
            .body(Body::from(format!(r#"{{"order":"{}","sum":{}}}"#, order, sum)))
            .unwrap()
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn credit(store: &MemoryStore, user: &str, raw: &str, amount: Decimal) {
        let number = OrderNumber::parse(raw).unwrap();
        let owner = UserId::new(user).unwrap();
        store.orders().insert_if_absent(&Order::new(number.clone(), owner)).await.unwrap();
        store.settle(&number, Points::new(amount).unwrap()).await.unwrap();
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (app, _) = create_test_app();
        let response = app.oneshot(request("GET", "/health", None, Body::empty())).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "healthy");
    }

    #[tokio::test]
    async fn test_missing_user_is_unauthorized() {
        let (app, _) = create_test_app();
        let response = app
            .oneshot(request("GET", "/api/user/balance", None, Body::empty()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_submit_order_status_codes() {
        let (app, _) = create_test_app();

        let cases = [
            ("alice", "79927398713", StatusCode::ACCEPTED),
            ("alice", "79927398713", StatusCode::OK),
            ("bob", "79927398713", StatusCode::CONFLICT),
            ("alice", "12345678904", StatusCode::UNPROCESSABLE_ENTITY),
            ("alice", "", StatusCode::BAD_REQUEST),
        ];

        for (user, body, expected) in cases {
            let response = app
                .clone()
                .oneshot(request("POST", "/api/user/orders", Some(user), body.to_string()))
                .await
                .unwrap();
            assert_eq!(response.status(), expected, "{} submitting {:?}", user, body);
        }
    }

    #[tokio::test]
    async fn test_list_orders() {
        let (app, store) = create_test_app();

        let empty = app
            .clone()
            .oneshot(request("GET", "/api/user/orders", Some("alice"), Body::empty()))
            .await
            .unwrap();
        assert_eq!(empty.status(), StatusCode::NO_CONTENT);

        credit(&store, "alice", "79927398713", dec!(500)).await;
        let pending = OrderNumber::parse("12345678903").unwrap();
        store
            .orders()
            .insert_if_absent(&Order::new(pending, UserId::new("alice").unwrap()))
            .await
            .unwrap();

        let response = app
            .oneshot(request("GET", "/api/user/orders", Some("alice"), Body::empty()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        let list = body.as_array().unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0]["number"], "79927398713");
        assert_eq!(list[0]["status"], "PROCESSED");
        assert_eq!(list[0]["accrual"], 500.0);
        assert_eq!(list[1]["status"], "NEW");
        assert!(list[1].get("accrual").is_none());
    }

    #[tokio::test]
    async fn test_balance_and_withdraw() {
        let (app, store) = create_test_app();
        credit(&store, "alice", "79927398713", dec!(500)).await;

        let response = app
            .clone()
            .oneshot(withdraw_request("alice", "2377225624", "751"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);

        let response = app
            .clone()
            .oneshot(withdraw_request("alice", "2377225624", "120.5"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .clone()
            .oneshot(withdraw_request("alice", "1", "1"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let response = app
            .clone()
            .oneshot(withdraw_request("alice", "9278923470", "0"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let response = app
            .clone()
            .oneshot(request("GET", "/api/user/balance", Some("alice"), Body::empty()))
            .await
            .unwrap();
        let body = json_body(response).await;
        assert_eq!(body["current"], 379.5);
        assert_eq!(body["withdrawn"], 120.5);

        let response = app
            .oneshot(request("GET", "/api/user/withdrawals", Some("alice"), Body::empty()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body[0]["order"], "2377225624");
        assert_eq!(body[0]["sum"], 120.5);
    }

    #[tokio::test]
    async fn test_withdrawals_empty() {
        let (app, _) = create_test_app();
        let response = app
            .oneshot(request("GET", "/api/user/withdrawals", Some("alice"), Body::empty()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_store_failure_is_internal_error() {
        let (app, store) = create_test_app();
        store.fail_next_write();

        let response = app
            .oneshot(request("POST", "/api/user/orders", Some("alice"), "79927398713"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json_body(response).await["error"], "Internal server error");
    }
}
