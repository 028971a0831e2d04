//! HTTP handlers.
//!
//! Implements:
//! - GET /health - Health check endpoint
//! - GET/PUT/DELETE /tenants/{code}/records/{key} - Tenant record access
//! - GET/PUT /tenants/{code}/policy - Tenant credential policy
//! - POST /tenants/{code}/policy/check - Password check against the policy
//! - GET /Error/ - Error destination

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tenant_session_core::{
    ErrorLogger, PasswordViolation, ResourceSession, TenantId, UsernameAndPasswordRule,
};
use tracing::{debug, info};

use crate::error::{AppError, Result};
use crate::lifecycle::{SessionLifecycle, StatsSnapshot};
use crate::memory::{MemorySession, MemoryStore};
use crate::registry::RequestScope;

/// Key under which a tenant's policy is stored; record routes may not touch it.
const POLICY_KEY: &str = "__policy";

/// Request scope over the in-memory store.
pub type TenantScope = RequestScope<MemoryStore>;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub lifecycle: Arc<SessionLifecycle<MemoryStore>>,
}

impl AppState {
    pub fn new(
        store: Arc<MemoryStore>,
        logger: Arc<dyn ErrorLogger>,
        site_url: Option<String>,
    ) -> Self {
        Self {
            lifecycle: Arc::new(SessionLifecycle::new(store, logger, site_url)),
        }
    }

    /// The backing store sessions are opened against.
    pub fn store(&self) -> &Arc<MemoryStore> {
        self.lifecycle.factory()
    }
}

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub healthy: bool,
    pub version: &'static str,
    pub tracked_sessions: usize,
    pub tracked_tenants: usize,
    pub stats: StatsSnapshot,
}

/// GET /health - Health check endpoint.
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let tracker = state.lifecycle.tracker();
    Json(HealthResponse {
        healthy: true,
        version: env!("CARGO_PKG_VERSION"),
        tracked_sessions: tracker.len(),
        tracked_tenants: tracker.tenant_count(),
        stats: state.lifecycle.stats(),
    })
}

async fn tenant_session(scope: &TenantScope, code: &str) -> Result<Arc<MemorySession>> {
    let tenant = TenantId::parse(code)?;
    Ok(scope.session(&tenant).await?)
}

fn record_key(key: &str) -> Result<&str> {
    if key.starts_with("__") {
        return Err(AppError::ReservedKey(key.to_string()));
    }
    Ok(key)
}

#[derive(Serialize)]
pub struct RecordResponse {
    pub tenant: String,
    pub key: String,
    pub value: Value,
}

/// GET /tenants/{code}/records/{key}
pub async fn get_record(
    Extension(scope): Extension<TenantScope>,
    Path((code, key)): Path<(String, String)>,
) -> Result<Json<RecordResponse>> {
    let key = record_key(&key)?;
    let session = tenant_session(&scope, &code).await?;
    let value = session
        .get(key)
        .await?
        .ok_or_else(|| AppError::NotFound(key.to_string()))?;

    Ok(Json(RecordResponse {
        tenant: code,
        key: key.to_string(),
        value,
    }))
}

#[derive(Deserialize)]
pub struct WriteParams {
    /// Commit the write before responding. Defaults to true.
    pub commit: Option<bool>,
}

#[derive(Serialize)]
pub struct WriteResponse {
    pub tenant: String,
    pub key: String,
    pub committed: bool,
}

/// PUT /tenants/{code}/records/{key}?commit=<bool>
///
/// With `commit=false` the transaction is left open and rolled back when the
/// request completes.
pub async fn put_record(
    Extension(scope): Extension<TenantScope>,
    Path((code, key)): Path<(String, String)>,
    Query(params): Query<WriteParams>,
    Json(value): Json<Value>,
) -> Result<Json<WriteResponse>> {
    let key = record_key(&key)?;
    let session = tenant_session(&scope, &code).await?;
    let commit = params.commit.unwrap_or(true);

    session.begin_transaction().await?;
    session.put(key, value).await?;
    if commit {
        session.commit().await?;
        debug!("Committed {} for tenant {}", key, code);
    }

    Ok(Json(WriteResponse {
        tenant: code,
        key: key.to_string(),
        committed: commit,
    }))
}

#[derive(Serialize)]
pub struct DeleteResponse {
    pub deleted: bool,
}

/// DELETE /tenants/{code}/records/{key}
pub async fn delete_record(
    Extension(scope): Extension<TenantScope>,
    Path((code, key)): Path<(String, String)>,
) -> Result<Json<DeleteResponse>> {
    let key = record_key(&key)?;
    let session = tenant_session(&scope, &code).await?;

    session.begin_transaction().await?;
    let deleted = session.delete(key).await?;
    session.commit().await?;

    Ok(Json(DeleteResponse { deleted }))
}

async fn load_policy(session: &MemorySession) -> Result<UsernameAndPasswordRule> {
    match session.get(POLICY_KEY).await? {
        Some(value) => Ok(serde_json::from_value(value)?),
        None => Ok(UsernameAndPasswordRule::default()),
    }
}

/// GET /tenants/{code}/policy
pub async fn get_policy(
    Extension(scope): Extension<TenantScope>,
    Path(code): Path<String>,
) -> Result<Json<UsernameAndPasswordRule>> {
    let session = tenant_session(&scope, &code).await?;
    Ok(Json(load_policy(&session).await?))
}

/// PUT /tenants/{code}/policy
pub async fn put_policy(
    Extension(scope): Extension<TenantScope>,
    Path(code): Path<String>,
    Json(policy): Json<UsernameAndPasswordRule>,
) -> Result<Json<UsernameAndPasswordRule>> {
    policy.validate()?;
    let session = tenant_session(&scope, &code).await?;

    session.begin_transaction().await?;
    session.put(POLICY_KEY, serde_json::to_value(&policy)?).await?;
    session.commit().await?;
    info!("Updated credential policy for tenant {}", code);

    Ok(Json(policy))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PasswordCheckRequest {
    pub password: String,
    pub user_name: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PasswordCheckResponse {
    pub valid: bool,
    pub violations: Vec<PasswordViolation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_name_allowed: Option<bool>,
}

/// POST /tenants/{code}/policy/check
pub async fn check_password(
    Extension(scope): Extension<TenantScope>,
    Path(code): Path<String>,
    Json(req): Json<PasswordCheckRequest>,
) -> Result<Json<PasswordCheckResponse>> {
    let session = tenant_session(&scope, &code).await?;
    let policy = load_policy(&session).await?;

    let violations = policy.check_password(&req.password);
    let user_name_allowed = req
        .user_name
        .as_deref()
        .map(|name| policy.is_user_name_allowed(name));

    Ok(Json(PasswordCheckResponse {
        valid: violations.is_empty() && user_name_allowed.unwrap_or(true),
        violations,
        user_name_allowed,
    }))
}

#[derive(Deserialize)]
pub struct ErrorPageParams {
    pub gl: Option<u8>,
}

#[derive(Serialize)]
pub struct ErrorPageResponse {
    pub error: &'static str,
    /// Set when the client was redirected by the unhandled-error path.
    pub global: bool,
}

/// GET /Error/
pub async fn error_page(Query(params): Query<ErrorPageParams>) -> Json<ErrorPageResponse> {
    Json(ErrorPageResponse {
        error: "An unexpected error occurred",
        global: params.gl == Some(1),
    })
}
