use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Request, State};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use chrono::Utc;
use marginalia_core::entitlement::EntitlementResponse;
use marginalia_core::remote::{ReconcileRequest, ReconcileResponse, SaltResponse};
use marginalia_core::util::normalize_domain;
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::accounts::{AccountStore, AccountStoreSnapshot};
use crate::auth::{extract_bearer_token, AuthenticatedAccount, StaticTokenVerifier};
use crate::config::AppConfig;
use crate::error::AppError;
use crate::rate_limit::{
    account_fingerprint, EndpointRateLimiter, ProtectedEndpoint, RateLimitMetricsSnapshot,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    verifier: StaticTokenVerifier,
    accounts: Arc<AccountStore>,
    endpoint_rate_limiter: Arc<EndpointRateLimiter>,
}

impl AppState {
    pub fn from_config(config: Arc<AppConfig>) -> Self {
        Self {
            verifier: StaticTokenVerifier::new(&config),
            accounts: Arc::new(AccountStore::new()),
            endpoint_rate_limiter: Arc::new(EndpointRateLimiter::from_config(config.as_ref())),
            config,
        }
    }
}

pub fn app_router(state: AppState) -> Router {
    let protected_routes = Router::new()
        .route("/sync/reconcile", post(reconcile))
        .route("/account/salt", get(account_salt))
        .route("/entitlement", get(entitlement))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/healthz", get(healthz))
        .nest("/v1", protected_routes)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_headers(Any)
                .allow_methods(Any),
        )
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: i64,
    store: AccountStoreSnapshot,
    rate_limit: RateLimitMetricsSnapshot,
}

async fn healthz(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now().timestamp(),
        store: state.accounts.snapshot().await,
        rate_limit: state.endpoint_rate_limiter.metrics_snapshot(),
    })
}

async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = extract_bearer_token(request.headers())?;
    let account = state.verifier.verify(token)?;
    request.extensions_mut().insert(account);
    Ok(next.run(request).await)
}

async fn reconcile(
    State(state): State<AppState>,
    Extension(account): Extension<AuthenticatedAccount>,
    payload: Result<Json<ReconcileRequest>, JsonRejection>,
) -> Result<Json<ReconcileResponse>, AppError> {
    let Json(request) = payload?;
    state
        .endpoint_rate_limiter
        .check(ProtectedEndpoint::Reconcile, &account.account_id)
        .await?;

    if request.device_batch_id.trim().is_empty() {
        return Err(AppError::bad_request("deviceBatchId cannot be empty"));
    }
    let batch_size = request.notes.len() + request.deletions.len();
    if batch_size > state.config.max_batch_size {
        return Err(AppError::bad_request(format!(
            "Batch of {batch_size} changes exceeds the limit of {}",
            state.config.max_batch_size
        )));
    }
    if let Some(note) = request
        .notes
        .iter()
        .find(|note| normalize_domain(&note.domain).is_none())
    {
        return Err(AppError::bad_request(format!(
            "Note {} has no usable domain",
            note.id
        )));
    }

    let response = state
        .accounts
        .reconcile(&account.account_id, &request)
        .await;
    tracing::info!(
        endpoint = "reconcile",
        account = account_fingerprint(&account.account_id),
        batch_id = %request.device_batch_id,
        pushed = request.notes.len(),
        deleted = request.deletions.len(),
        accepted = response.accepted.len(),
        missing = response.missing_notes.len(),
        conflicts = response.conflicts.len(),
        "Reconciled batch"
    );
    Ok(Json(response))
}

async fn account_salt(
    State(state): State<AppState>,
    Extension(account): Extension<AuthenticatedAccount>,
) -> Result<Json<SaltResponse>, AppError> {
    state
        .endpoint_rate_limiter
        .check(ProtectedEndpoint::Account, &account.account_id)
        .await?;

    let salt = state.accounts.salt(&account.account_id).await;
    Ok(Json(SaltResponse {
        salt: salt.to_base64(),
    }))
}

async fn entitlement(
    State(state): State<AppState>,
    Extension(account): Extension<AuthenticatedAccount>,
) -> Result<Json<EntitlementResponse>, AppError> {
    state
        .endpoint_rate_limiter
        .check(ProtectedEndpoint::Account, &account.account_id)
        .await?;

    Ok(Json(EntitlementResponse { tier: account.tier }))
}
